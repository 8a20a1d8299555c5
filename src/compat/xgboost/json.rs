//! XGBoost JSON model loader.
//!
//! Deserializes the document into foreign types mirroring XGBoost's own
//! schema, checks every object against the recognized key set, then converts
//! into the native [`Model`]. XGBoost serializes most integer parameters as
//! decimal strings, hence the `DisplayFromStr` annotations.

use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use serde_with::{serde_as, DisplayFromStr};
use tracing::warn;

use crate::error::{CorruptModelError, LoadError, ParseError, UnknownFieldError, UnsupportedFeatureError};
use crate::model::Model;
use crate::repr::{Tree, TreeBuilder};

use super::{ensemble_layout, objective_postprocessor, prob_to_margin, ParserConfig};

// ===== Custom deserializers for XGBoost quirks =====

/// base_score appears as a number, a string, an array, or a stringified
/// array like `"[1.5E0]"`, depending on the XGBoost version.
fn deserialize_base_score<'de, D>(deserializer: D) -> Result<f32, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error as SerdeError;

    let mut cur = Value::deserialize(deserializer)?;
    loop {
        match cur {
            Value::Number(n) => {
                return n
                    .as_f64()
                    .map(|f| f as f32)
                    .ok_or_else(|| SerdeError::custom("base_score is not a finite number"));
            }
            Value::String(s) => {
                if let Ok(f) = s.parse::<f32>() {
                    return Ok(f);
                }
                let t = s.trim();
                if let Some(inner) = t.strip_prefix('[').and_then(|t| t.strip_suffix(']')) {
                    if let Ok(f) = inner.parse::<f32>() {
                        return Ok(f);
                    }
                }
                return Err(SerdeError::custom(format!(
                    "cannot parse base_score from string: {s}"
                )));
            }
            Value::Array(arr) => match arr.into_iter().next() {
                Some(first) => cur = first,
                None => return Err(SerdeError::custom("base_score array is empty")),
            },
            _ => {
                return Err(SerdeError::custom(
                    "base_score must be a number, string, or array",
                ));
            }
        }
    }
}

fn deserialize_bool_any<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error as SerdeError;

    match Value::deserialize(deserializer)? {
        Value::Bool(b) => Ok(b),
        Value::Number(n) => Ok(n.as_f64().is_some_and(|f| f != 0.0)),
        Value::String(s) => {
            let t = s.trim();
            if t.eq_ignore_ascii_case("true") || t == "1" {
                Ok(true)
            } else if t.eq_ignore_ascii_case("false") || t == "0" {
                Ok(false)
            } else {
                Err(SerdeError::custom(format!("cannot parse bool from string: {s}")))
            }
        }
        _ => Err(SerdeError::custom("unsupported type for bool")),
    }
}

/// default_left is an array of 0/1 integers in older dumps and of booleans in
/// newer ones.
fn deserialize_flag_vec<'de, D>(deserializer: D) -> Result<Vec<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error as SerdeError;

    let raw = Vec::<Value>::deserialize(deserializer)?;
    raw.into_iter()
        .map(|v| match v {
            Value::Bool(b) => Ok(b),
            Value::Number(n) => Ok(n.as_f64().is_some_and(|f| f != 0.0)),
            _ => Err(SerdeError::custom("flag array entries must be bool or 0/1")),
        })
        .collect()
}

fn default_base_score() -> f32 {
    0.5
}
fn default_one_i64() -> i64 {
    1
}
fn default_true() -> bool {
    true
}

// ===== Foreign types mirroring the XGBoost schema =====

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
struct TreeParam {
    #[serde_as(as = "DisplayFromStr")]
    num_nodes: i64,
    #[serde_as(as = "DisplayFromStr")]
    #[serde(default)]
    size_leaf_vector: i64,
    #[serde_as(as = "DisplayFromStr")]
    #[serde(default)]
    num_feature: i64,
    #[serde_as(as = "DisplayFromStr")]
    #[serde(default)]
    num_deleted: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct XgbTree {
    tree_param: TreeParam,
    #[serde(default)]
    id: i32,
    loss_changes: Vec<f32>,
    sum_hessian: Vec<f32>,
    base_weights: Vec<f32>,
    left_children: Vec<i32>,
    right_children: Vec<i32>,
    parents: Vec<i64>,
    split_indices: Vec<u32>,
    split_conditions: Vec<f32>,
    #[serde(default)]
    split_type: Vec<i32>,
    #[serde(deserialize_with = "deserialize_flag_vec")]
    default_left: Vec<bool>,
    #[serde(default)]
    categories: Vec<i64>,
    #[serde(default)]
    categories_nodes: Vec<i64>,
    #[serde(default)]
    categories_segments: Vec<i64>,
    #[serde(default)]
    categories_sizes: Vec<i64>,
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
struct GbtreeModelParam {
    #[serde_as(as = "DisplayFromStr")]
    #[serde(default)]
    num_trees: i64,
    #[serde_as(as = "DisplayFromStr")]
    #[serde(default = "default_one_i64")]
    num_parallel_tree: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TreeCollection {
    trees: Vec<XgbTree>,
    tree_info: Vec<i32>,
    gbtree_model_param: GbtreeModelParam,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GbtreeDefinition {
    model: TreeCollection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "name", rename_all = "lowercase")]
enum GradientBooster {
    Gbtree {
        model: TreeCollection,
    },
    // DART keeps its tree model nested one level deeper, next to the
    // per-tree drop weights.
    Dart {
        gbtree: GbtreeDefinition,
        #[serde(default)]
        weight_drop: Vec<f32>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Objective {
    name: String,
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
struct LearnerModelParam {
    #[serde(deserialize_with = "deserialize_base_score", default = "default_base_score")]
    base_score: f32,
    #[serde_as(as = "DisplayFromStr")]
    #[serde(default)]
    num_class: i64,
    #[serde_as(as = "DisplayFromStr")]
    num_feature: i64,
    #[serde_as(as = "DisplayFromStr")]
    #[serde(default = "default_one_i64")]
    num_target: i64,
    #[serde(deserialize_with = "deserialize_bool_any", default = "default_true")]
    boost_from_average: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Learner {
    #[serde(default)]
    attributes: serde_json::Map<String, Value>,
    #[serde(default)]
    feature_names: Vec<String>,
    #[serde(default)]
    feature_types: Vec<String>,
    gradient_booster: GradientBooster,
    objective: Objective,
    learner_model_param: LearnerModelParam,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct XgbModel {
    #[serde(default)]
    version: Vec<u64>,
    learner: Learner,
}

// ===== Recognized key sets, one per object in the schema =====

const ROOT_KEYS: &[&str] = &["version", "learner", "Config", "Model"];
const LEARNER_KEYS: &[&str] = &[
    "attributes",
    "feature_names",
    "feature_types",
    "gradient_booster",
    "learner_model_param",
    "objective",
];
const LEARNER_PARAM_KEYS: &[&str] = &[
    "base_score",
    "boost_from_average",
    "num_class",
    "num_feature",
    "num_target",
];
const OBJECTIVE_KEYS: &[&str] = &[
    "name",
    "reg_loss_param",
    "poisson_regression_param",
    "tweedie_regression_param",
    "quantile_loss_param",
    "softmax_multiclass_param",
    "lambda_rank_param",
    "lambdarank_param",
    "aft_loss_param",
    "pseudo_huber_param",
];
const BOOSTER_KEYS: &[&str] = &["name", "model", "gbtree", "weight_drop"];
const TREE_COLLECTION_KEYS: &[&str] = &["trees", "tree_info", "gbtree_model_param", "iteration_indptr"];
const GBTREE_PARAM_KEYS: &[&str] = &[
    "num_trees",
    "num_parallel_tree",
    "num_deleted",
    "num_feature",
    "num_output_group",
    "num_pbuffer",
    "num_roots",
    "size_leaf_vector",
    "updater_seq",
];
const TREE_KEYS: &[&str] = &[
    "tree_param",
    "id",
    "loss_changes",
    "sum_hessian",
    "base_weights",
    "leaf_child_counts",
    "left_children",
    "right_children",
    "parents",
    "split_indices",
    "split_conditions",
    "split_type",
    "default_left",
    "categories",
    "categories_nodes",
    "categories_segments",
    "categories_sizes",
];
const TREE_PARAM_KEYS: &[&str] = &[
    "num_nodes",
    "num_deleted",
    "num_feature",
    "num_roots",
    "size_leaf_vector",
];

fn check_keys(
    value: &Value,
    path: &str,
    recognized: &[&str],
    allow_unknown: bool,
) -> Result<(), UnknownFieldError> {
    let Value::Object(map) = value else {
        return Ok(());
    };
    for key in map.keys() {
        if !recognized.contains(&key.as_str()) {
            if allow_unknown {
                warn!(path, key = key.as_str(), "ignoring unrecognized key");
            } else {
                return Err(UnknownFieldError {
                    path: path.to_string(),
                    key: key.clone(),
                });
            }
        }
    }
    Ok(())
}

/// Walk the document and flag every key outside the recognized schema.
fn check_document(doc: &Value, allow_unknown: bool) -> Result<(), UnknownFieldError> {
    check_keys(doc, "$", ROOT_KEYS, allow_unknown)?;
    let Some(learner) = doc.get("learner") else {
        return Ok(());
    };
    check_keys(learner, "$.learner", LEARNER_KEYS, allow_unknown)?;
    if let Some(lmp) = learner.get("learner_model_param") {
        check_keys(lmp, "$.learner.learner_model_param", LEARNER_PARAM_KEYS, allow_unknown)?;
    }
    if let Some(objective) = learner.get("objective") {
        check_keys(objective, "$.learner.objective", OBJECTIVE_KEYS, allow_unknown)?;
    }
    let Some(booster) = learner.get("gradient_booster") else {
        return Ok(());
    };
    let booster_path = "$.learner.gradient_booster";
    check_keys(booster, booster_path, BOOSTER_KEYS, allow_unknown)?;
    if let Some(inner) = booster.get("gbtree") {
        check_keys(inner, "$.learner.gradient_booster.gbtree", BOOSTER_KEYS, allow_unknown)?;
    }
    let collection = booster
        .get("model")
        .or_else(|| booster.get("gbtree").and_then(|g| g.get("model")));
    let Some(collection) = collection else {
        return Ok(());
    };
    let model_path = "$.learner.gradient_booster.model";
    check_keys(collection, model_path, TREE_COLLECTION_KEYS, allow_unknown)?;
    if let Some(param) = collection.get("gbtree_model_param") {
        check_keys(
            param,
            "$.learner.gradient_booster.model.gbtree_model_param",
            GBTREE_PARAM_KEYS,
            allow_unknown,
        )?;
    }
    if let Some(Value::Array(trees)) = collection.get("trees") {
        for (i, tree) in trees.iter().enumerate() {
            let tree_path = format!("{model_path}.trees[{i}]");
            check_keys(tree, &tree_path, TREE_KEYS, allow_unknown)?;
            if let Some(param) = tree.get("tree_param") {
                check_keys(param, &format!("{tree_path}.tree_param"), TREE_PARAM_KEYS, allow_unknown)?;
            }
        }
    }
    Ok(())
}

// ===== Entry points =====

/// Load a model from an XGBoost JSON document.
pub fn from_value(doc: &Value, config: &ParserConfig) -> Result<Model, LoadError> {
    // Gate on the booster kind first: a gblinear document would otherwise
    // surface as an unknown-field or enum error instead of a clear message.
    if let Some(name) = doc
        .pointer("/learner/gradient_booster/name")
        .and_then(Value::as_str)
    {
        if name != "gbtree" && name != "dart" {
            return Err(UnsupportedFeatureError(format!(
                "gradient booster {name:?} is not tree-based"
            ))
            .into());
        }
    }
    check_document(doc, config.allow_unknown_field)?;
    let xgb: XgbModel = serde_json::from_value(doc.clone()).map_err(ParseError::from)?;
    convert(&xgb)
}

/// Load a model from XGBoost JSON text.
pub fn from_str(text: &str, config: &ParserConfig) -> Result<Model, LoadError> {
    let doc: Value = serde_json::from_str(text).map_err(ParseError::from)?;
    from_value(&doc, config)
}

/// Load a model from an XGBoost JSON file.
pub fn from_file(path: impl AsRef<Path>, config: &ParserConfig) -> Result<Model, LoadError> {
    let file = File::open(path).map_err(ParseError::from)?;
    let doc: Value = serde_json::from_reader(BufReader::new(file)).map_err(ParseError::from)?;
    from_value(&doc, config)
}

// ===== Conversion to the native model =====

fn convert(xgb: &XgbModel) -> Result<Model, LoadError> {
    let (collection, tree_weights) = match &xgb.learner.gradient_booster {
        GradientBooster::Gbtree { model } => (model, None),
        GradientBooster::Dart { gbtree, weight_drop } => {
            let weights = if weight_drop.is_empty() {
                None
            } else {
                Some(weight_drop.clone().into_boxed_slice())
            };
            (&gbtree.model, weights)
        }
    };

    let lmp = &xgb.learner.learner_model_param;
    let objective = xgb.learner.objective.name.as_str();

    if collection.gbtree_model_param.num_trees >= 0
        && collection.gbtree_model_param.num_trees as usize != collection.trees.len()
    {
        return Err(ParseError::WrongDimension {
            field: "trees",
            expected: collection.gbtree_model_param.num_trees as usize,
            actual: collection.trees.len(),
        }
        .into());
    }
    if collection.tree_info.len() != collection.trees.len() {
        return Err(ParseError::WrongDimension {
            field: "tree_info",
            expected: collection.trees.len(),
            actual: collection.tree_info.len(),
        }
        .into());
    }

    // Leaf width is uniform across the ensemble; the first tree declares it.
    let leaf_len = collection
        .trees
        .first()
        .map(|t| t.tree_param.size_leaf_vector.max(1) as u32)
        .unwrap_or(1);

    let mut trees = Vec::with_capacity(collection.trees.len());
    for (idx, tree) in collection.trees.iter().enumerate() {
        trees.push(convert_tree(tree, idx, leaf_len)?);
    }

    let layout = ensemble_layout(
        objective,
        lmp.num_class.max(1) as u32,
        lmp.num_target.max(1) as u32,
        leaf_len,
        &collection.tree_info,
    )?;

    let postprocessor = objective_postprocessor(objective)?;

    // Versions >= 1.0 persist base_score in probability space; the one model
    // format predating that stored the margin directly.
    let margin = if xgb.version.first().map_or(true, |&major| major >= 1) {
        prob_to_margin(lmp.base_score, postprocessor)
    } else {
        lmp.base_score
    };
    let n_slots = (layout.num_target * layout.num_class.iter().copied().max().unwrap_or(1)) as usize;

    let model = Model {
        num_feature: lmp.num_feature as u32,
        task_type: layout.task_type,
        average_tree_output: false,
        num_target: layout.num_target,
        num_class: layout.num_class,
        leaf_vector_shape: layout.leaf_vector_shape,
        target_id: layout.target_id,
        class_id: layout.class_id,
        postprocessor,
        sigmoid_alpha: 1.0,
        ratio_c: 1.0,
        base_scores: vec![margin; n_slots].into_boxed_slice(),
        attributes: serde_json::to_string(&xgb.learner.attributes).map_err(ParseError::from)?,
        tree_weights,
        trees,
    };
    model.validate()?;
    Ok(model)
}

fn expect_len(field: &'static str, actual: usize, expected: usize) -> Result<(), ParseError> {
    if actual != expected {
        return Err(ParseError::WrongDimension {
            field,
            expected,
            actual,
        });
    }
    Ok(())
}

fn convert_tree(xgb_tree: &XgbTree, tree_idx: usize, leaf_len: u32) -> Result<Tree, LoadError> {
    let n_nodes = xgb_tree.tree_param.num_nodes.max(0) as usize;
    if n_nodes == 0 {
        return Err(CorruptModelError::EmptyTree { tree: tree_idx }.into());
    }

    expect_len("loss_changes", xgb_tree.loss_changes.len(), n_nodes)?;
    expect_len("sum_hessian", xgb_tree.sum_hessian.len(), n_nodes)?;
    expect_len("left_children", xgb_tree.left_children.len(), n_nodes)?;
    expect_len("right_children", xgb_tree.right_children.len(), n_nodes)?;
    expect_len("parents", xgb_tree.parents.len(), n_nodes)?;
    expect_len("split_indices", xgb_tree.split_indices.len(), n_nodes)?;
    expect_len("split_conditions", xgb_tree.split_conditions.len(), n_nodes)?;
    expect_len("default_left", xgb_tree.default_left.len(), n_nodes)?;
    expect_len("base_weights", xgb_tree.base_weights.len(), n_nodes * leaf_len as usize)?;
    if !xgb_tree.split_type.is_empty() {
        expect_len("split_type", xgb_tree.split_type.len(), n_nodes)?;
    }
    expect_len(
        "categories_segments",
        xgb_tree.categories_segments.len(),
        xgb_tree.categories_nodes.len(),
    )?;
    expect_len(
        "categories_sizes",
        xgb_tree.categories_sizes.len(),
        xgb_tree.categories_nodes.len(),
    )?;

    let categorical = categorical_map(xgb_tree)?;

    let mut builder = TreeBuilder::with_leaf_len(n_nodes, leaf_len);
    for node in 0..n_nodes {
        let left = xgb_tree.left_children[node];
        let right = xgb_tree.right_children[node];

        if left == -1 {
            // Leaf. Scalar leaf values live in split_conditions; vector
            // leaves only in base_weights.
            if leaf_len > 1 {
                let start = node * leaf_len as usize;
                builder.vector_leaf(node as u32, &xgb_tree.base_weights[start..start + leaf_len as usize]);
            } else {
                builder.leaf(node as u32, xgb_tree.split_conditions[node]);
            }
            continue;
        }

        for (side, child) in [("left", left), ("right", right)] {
            if child < 0 || child as usize >= n_nodes {
                return Err(CorruptModelError::ChildOutOfBounds {
                    tree: tree_idx,
                    node: node as u32,
                    side,
                    child: child as u32,
                    n_nodes,
                }
                .into());
            }
        }

        let feature = xgb_tree.split_indices[node];
        let default_left = xgb_tree.default_left[node];
        let is_categorical = xgb_tree.split_type.get(node).copied().unwrap_or(0) == 1;

        if is_categorical {
            let cats = categorical.get(&node).map(Vec::as_slice).unwrap_or(&[]);
            builder.categorical_split(node as u32, feature, cats, default_left, left as u32, right as u32);
        } else {
            builder.numeric_split(
                node as u32,
                feature,
                xgb_tree.split_conditions[node],
                default_left,
                left as u32,
                right as u32,
            );
        }
    }

    Ok(builder.build())
}

/// Per-node lists of category values routing right. XGBoost JSON stores raw
/// category integers in parallel arrays, not packed bitsets.
fn categorical_map(xgb_tree: &XgbTree) -> Result<HashMap<usize, Vec<u32>>, ParseError> {
    let mut map = HashMap::new();
    for i in 0..xgb_tree.categories_nodes.len() {
        let node = xgb_tree.categories_nodes[i] as usize;
        let start = xgb_tree.categories_segments[i] as usize;
        let size = xgb_tree.categories_sizes[i] as usize;
        if start + size > xgb_tree.categories.len() {
            return Err(ParseError::WrongDimension {
                field: "categories",
                expected: start + size,
                actual: xgb_tree.categories.len(),
            });
        }
        let values = xgb_tree.categories[start..start + size]
            .iter()
            .map(|&c| {
                u32::try_from(c).map_err(|_| ParseError::InvalidValue {
                    field: "categories",
                    message: format!("category value {c} is negative"),
                })
            })
            .collect::<Result<Vec<u32>, _>>()?;
        map.insert(node, values);
    }
    Ok(map)
}
