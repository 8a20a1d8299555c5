//! Ensemble model: trees plus the metadata that governs aggregation.

mod postprocess;

use serde::{Deserialize, Serialize};

use crate::error::CorruptModelError;
use crate::repr::Tree;

pub use postprocess::PostProcessor;

/// Type of machine learning task, governing how per-tree outputs combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TaskType {
    /// Regression (continuous target).
    #[default]
    #[serde(rename = "kRegressor")]
    Regressor,
    /// Binary classification.
    #[serde(rename = "kBinaryClf")]
    BinaryClf,
    /// Multi-class classification.
    #[serde(rename = "kMultiClf")]
    MultiClf,
    /// Learning to rank.
    #[serde(rename = "kLearningToRank")]
    LearningToRank,
    /// Anomaly detection with isolation forests.
    #[serde(rename = "kIsolationForest")]
    IsolationForest,
}

impl TaskType {
    /// Canonical name, as reported by the serializer.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Regressor => "kRegressor",
            Self::BinaryClf => "kBinaryClf",
            Self::MultiClf => "kMultiClf",
            Self::LearningToRank => "kLearningToRank",
            Self::IsolationForest => "kIsolationForest",
        }
    }
}

/// A tree ensemble model in the framework-independent representation.
///
/// Built once by a parser, immutable thereafter. Trees are owned exclusively
/// by their model; the model may be shared read-only across threads.
///
/// # Output layout
///
/// Predictions have shape `(num_row, num_target, max_num_class)`. Each tree
/// is associated with a `(target_id, class_id)` pair: non-negative ids mean
/// the tree's scalar leaf accumulates into that single slot
/// (one-output-per-tree); `-1` on an axis means the tree's vector leaf spans
/// that axis (multi-output-tree). `leaf_vector_shape` is
/// `[per-target width, per-class width]` and its product is the uniform leaf
/// width of every tree.
#[derive(Debug, Clone)]
pub struct Model {
    /// Number of input features; every split index is below this.
    pub num_feature: u32,
    pub task_type: TaskType,
    /// Average per-tree outputs (random forest) instead of summing (boosting).
    pub average_tree_output: bool,
    pub num_target: u32,
    /// Number of classes per target (1 for regression targets).
    pub num_class: Box<[u32]>,
    pub leaf_vector_shape: [u32; 2],
    /// Per-tree target assignment; `-1` = vector leaf spans the target axis.
    pub target_id: Box<[i32]>,
    /// Per-tree class assignment; `-1` = vector leaf spans the class axis.
    pub class_id: Box<[i32]>,
    pub postprocessor: PostProcessor,
    /// Scaling for the sigmoid postprocessors.
    pub sigmoid_alpha: f32,
    /// Normalization constant for the isolation-forest postprocessor.
    pub ratio_c: f32,
    /// Per-slot bias, length `num_target * max_num_class`, added once after
    /// aggregation.
    pub base_scores: Box<[f32]>,
    /// Opaque JSON attribute blob.
    pub attributes: String,
    /// DART per-tree multipliers, applied at aggregation.
    pub tree_weights: Option<Box<[f32]>>,
    pub trees: Vec<Tree>,
}

impl Model {
    /// Number of trees.
    #[inline]
    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    /// Largest class count over all targets (the class extent of the output).
    #[inline]
    pub fn max_num_class(&self) -> u32 {
        self.num_class.iter().copied().max().unwrap_or(1)
    }

    /// Uniform leaf width of every tree.
    #[inline]
    pub fn leaf_len(&self) -> u32 {
        self.leaf_vector_shape[0] * self.leaf_vector_shape[1]
    }

    /// Validate every structural invariant eagerly.
    ///
    /// Parsers call this before returning a model; a failure here after
    /// parsing indicates a parser bug or a hand-corrupted model.
    pub fn validate(&self) -> Result<(), CorruptModelError> {
        let n_trees = self.n_trees();
        let max_class = self.max_num_class();

        for (field, len) in [
            ("target_id", self.target_id.len()),
            ("class_id", self.class_id.len()),
        ] {
            if len != n_trees {
                return Err(CorruptModelError::TreeMetadataMismatch {
                    field,
                    n_trees,
                    actual: len,
                });
            }
        }
        if let Some(w) = &self.tree_weights {
            if w.len() != n_trees {
                return Err(CorruptModelError::TreeMetadataMismatch {
                    field: "tree_weights",
                    n_trees,
                    actual: w.len(),
                });
            }
        }

        let expected_scores = (self.num_target * max_class) as usize;
        if self.base_scores.len() != expected_scores {
            return Err(CorruptModelError::BaseScoresMismatch {
                expected: expected_scores,
                actual: self.base_scores.len(),
            });
        }

        let leaf_len = self.leaf_len();
        for (tree_idx, tree) in self.trees.iter().enumerate() {
            tree.validate(tree_idx)?;

            if tree.leaf_len() != leaf_len {
                return Err(CorruptModelError::LeafShapeMismatch {
                    tree: tree_idx,
                    leaf_len: tree.leaf_len(),
                    expected: leaf_len,
                });
            }

            for node in 0..tree.n_nodes() as u32 {
                if !tree.is_leaf(node) && tree.split_index(node) >= self.num_feature {
                    return Err(CorruptModelError::FeatureOutOfRange {
                        tree: tree_idx,
                        node,
                        feature: tree.split_index(node),
                        num_feature: self.num_feature,
                    });
                }
            }

            let target = self.target_id[tree_idx];
            if target < -1 || target >= self.num_target as i32 {
                return Err(CorruptModelError::TargetIdOutOfRange {
                    tree: tree_idx,
                    target_id: target,
                    num_target: self.num_target,
                });
            }
            let class = self.class_id[tree_idx];
            if class < -1 || class >= max_class as i32 {
                return Err(CorruptModelError::ClassIdOutOfRange {
                    tree: tree_idx,
                    class_id: class,
                    num_class: max_class,
                });
            }
        }

        Ok(())
    }
}
