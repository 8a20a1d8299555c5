//! XGBoost model loaders.
//!
//! [`json`] parses the JSON document format (XGBoost >= 1.0), [`binary`] the
//! legacy pre-1.0 binary snapshot. Both feed the same layout and objective
//! mapping below, so a model trained once predicts identically regardless of
//! which serialization it travelled through.

pub mod binary;
pub mod json;

use crate::error::ParseError;
use crate::model::{PostProcessor, TaskType};

/// Knobs controlling how strictly the JSON parser treats its input.
#[derive(Debug, Clone, Copy)]
pub struct ParserConfig {
    /// Tolerate unrecognized JSON keys (logging each one) instead of failing.
    pub allow_unknown_field: bool,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            allow_unknown_field: false,
        }
    }
}

/// Map an XGBoost objective name to the output transformation baked into the
/// model. Unrecognized objectives are an error, never a silent identity.
pub(crate) fn objective_postprocessor(objective: &str) -> Result<PostProcessor, ParseError> {
    match objective {
        "multi:softmax" | "multi:softprob" => Ok(PostProcessor::Softmax),
        "reg:logistic" | "binary:logistic" => Ok(PostProcessor::Sigmoid),
        "count:poisson" | "reg:gamma" | "reg:tweedie" | "survival:cox" | "survival:aft" => {
            Ok(PostProcessor::Exponential)
        }
        "binary:hinge" => Ok(PostProcessor::Hinge),
        "reg:squarederror" | "reg:linear" | "reg:squaredlogerror" | "reg:pseudohubererror"
        | "reg:absoluteerror" | "binary:logitraw" | "rank:pairwise" | "rank:ndcg"
        | "rank:map" => Ok(PostProcessor::Identity),
        other => Err(ParseError::UnknownObjective(other.to_string())),
    }
}

/// Task type implied by the objective family (single-class models only;
/// `num_class > 1` always means multi-class classification).
pub(crate) fn task_for_objective(objective: &str) -> TaskType {
    if objective.starts_with("binary:") {
        TaskType::BinaryClf
    } else if objective.starts_with("rank:") {
        TaskType::LearningToRank
    } else {
        TaskType::Regressor
    }
}

/// Convert a base score from probability space (how XGBoost persists it) to
/// margin space (what aggregation adds before the postprocessor runs).
pub(crate) fn prob_to_margin(base_score: f32, postprocessor: PostProcessor) -> f32 {
    match postprocessor {
        PostProcessor::Sigmoid => {
            let p = base_score.clamp(1e-7, 1.0 - 1e-7);
            -(1.0 / p - 1.0).ln()
        }
        PostProcessor::Exponential => base_score.max(1e-7).ln(),
        _ => base_score,
    }
}

/// Per-tree output routing shared by the JSON and binary loaders.
pub(crate) struct EnsembleLayout {
    pub task_type: TaskType,
    pub num_target: u32,
    pub num_class: Box<[u32]>,
    pub leaf_vector_shape: [u32; 2],
    pub target_id: Box<[i32]>,
    pub class_id: Box<[i32]>,
}

/// Decide how trees map onto the `(target, class)` output grid.
///
/// Multi-class models route each tree to the class named by `tree_info`
/// (grove-per-class), unless leaves are vectors, in which case every tree
/// spans the class axis. Single-class models symmetrically use `tree_info`
/// as the target id, with vector leaves spanning the target axis.
pub(crate) fn ensemble_layout(
    objective: &str,
    n_class: u32,
    num_target_param: u32,
    leaf_len: u32,
    tree_info: &[i32],
) -> Result<EnsembleLayout, ParseError> {
    let n_trees = tree_info.len();
    let vector_leaf = leaf_len > 1;

    if n_class > 1 {
        let class_id = if vector_leaf {
            if leaf_len != n_class {
                return Err(ParseError::InvalidValue {
                    field: "size_leaf_vector",
                    message: format!("leaf width {leaf_len} does not match num_class {n_class}"),
                });
            }
            vec![-1; n_trees]
        } else {
            tree_info.to_vec()
        };
        Ok(EnsembleLayout {
            task_type: TaskType::MultiClf,
            num_target: 1,
            num_class: vec![n_class].into_boxed_slice(),
            leaf_vector_shape: if vector_leaf { [1, leaf_len] } else { [1, 1] },
            target_id: vec![0; n_trees].into_boxed_slice(),
            class_id: class_id.into_boxed_slice(),
        })
    } else {
        let (num_target, target_id) = if vector_leaf {
            if leaf_len != num_target_param {
                return Err(ParseError::InvalidValue {
                    field: "size_leaf_vector",
                    message: format!(
                        "leaf width {leaf_len} does not match num_target {num_target_param}"
                    ),
                });
            }
            (leaf_len, vec![-1; n_trees])
        } else {
            (num_target_param.max(1), tree_info.to_vec())
        };
        Ok(EnsembleLayout {
            task_type: task_for_objective(objective),
            num_target,
            num_class: vec![1; num_target as usize].into_boxed_slice(),
            leaf_vector_shape: if vector_leaf { [leaf_len, 1] } else { [1, 1] },
            target_id: target_id.into_boxed_slice(),
            class_id: vec![0; n_trees].into_boxed_slice(),
        })
    }
}
