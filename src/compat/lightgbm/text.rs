//! Line-based parser for the LightGBM text model format.
//!
//! The file is a header of `key=value` pairs followed by one `Tree=N` block
//! per tree, each again `key=value` with space-separated arrays.

use std::collections::HashMap;
use std::str::FromStr;

use crate::error::ParseError;

// ===== Decision type bitfield =====

/// How a split treats missing values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MissingType {
    #[default]
    None = 0,
    Zero = 1,
    NaN = 2,
}

impl MissingType {
    fn from_bits(bits: u8) -> Self {
        match bits {
            1 => MissingType::Zero,
            2 => MissingType::NaN,
            _ => MissingType::None,
        }
    }
}

/// Unpacked `decision_type` bitfield.
///
/// Bit 0 marks a categorical split, bit 1 the default direction, bits 2-3
/// the missing-value mode.
#[derive(Debug, Clone, Copy, Default)]
pub struct DecisionType {
    pub is_categorical: bool,
    pub default_left: bool,
    pub missing_type: MissingType,
}

impl DecisionType {
    pub fn from_i8(value: i8) -> Self {
        let v = value as u8;
        DecisionType {
            is_categorical: (v & 1) != 0,
            default_left: (v & 2) != 0,
            missing_type: MissingType::from_bits((v >> 2) & 3),
        }
    }
}

// ===== Objective =====

/// Objective line, e.g. `binary sigmoid:1` or `multiclass num_class:3`.
/// Only the name and the parameters inference needs are kept; the raw string
/// survives for error reporting.
#[derive(Debug, Clone)]
pub struct LgbObjective {
    pub name: String,
    pub sigmoid: f32,
    pub num_class: usize,
}

impl LgbObjective {
    pub fn parse(s: &str) -> Self {
        let mut parts = s.split_whitespace();
        let name = parts.next().unwrap_or("").to_string();
        let mut sigmoid = 1.0f32;
        let mut num_class = 1usize;
        for part in parts {
            if let Some(v) = part.strip_prefix("sigmoid:") {
                if let Ok(v) = v.parse() {
                    sigmoid = v;
                }
            } else if let Some(v) = part.strip_prefix("num_class:") {
                if let Ok(v) = v.parse() {
                    num_class = v;
                }
            }
        }
        Self {
            name,
            sigmoid,
            num_class,
        }
    }
}

// ===== Parsed structures =====

/// One `Tree=N` block. Internal nodes are indexed `0..num_leaves-1`; child
/// references below zero denote leaves, leaf index `!child`.
#[derive(Debug, Clone, Default)]
pub struct LgbTree {
    pub num_leaves: usize,
    pub num_cat: usize,
    pub split_feature: Vec<i32>,
    pub threshold: Vec<f64>,
    pub decision_type: Vec<i8>,
    pub left_child: Vec<i32>,
    pub right_child: Vec<i32>,
    pub leaf_value: Vec<f64>,
    pub is_linear: bool,
    /// Word ranges into `cat_threshold`, one per categorical split.
    pub cat_boundaries: Vec<i32>,
    /// Packed bitset words; a set bit routes the category right.
    pub cat_threshold: Vec<u32>,
}

#[derive(Debug, Clone, Default)]
pub struct LgbHeader {
    pub version: String,
    pub num_class: usize,
    pub num_tree_per_iteration: usize,
    pub max_feature_idx: usize,
    pub objective: Option<LgbObjective>,
    /// Bare `average_output` line; random-forest style models set it.
    pub average_output: bool,
    pub feature_names: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct LgbModel {
    pub header: LgbHeader,
    pub trees: Vec<LgbTree>,
}

impl LgbModel {
    pub fn parse(content: &str) -> Result<Self, ParseError> {
        let mut lines = content.lines().peekable();
        let header = parse_header(&mut lines)?;

        let mut trees = Vec::new();
        while let Some(line) = lines.peek() {
            if line.starts_with("Tree=") {
                lines.next();
                trees.push(parse_tree(&mut lines)?);
            } else if line.trim() == "end of trees" {
                break;
            } else {
                lines.next();
            }
        }

        Ok(LgbModel { header, trees })
    }
}

// ===== Section parsing =====

fn parse_header(lines: &mut std::iter::Peekable<std::str::Lines>) -> Result<LgbHeader, ParseError> {
    let mut header = LgbHeader::default();
    let mut kv = HashMap::new();

    while let Some(line) = lines.peek() {
        if line.starts_with("Tree=") {
            break;
        }
        let line = match lines.next() {
            Some(l) => l,
            None => break,
        };
        if let Some((key, value)) = line.split_once('=') {
            kv.insert(key.to_string(), value.to_string());
        } else if line.trim() == "average_output" {
            header.average_output = true;
        }
        // lines without '=' (like the leading "tree") carry no data
    }

    header.version = kv.get("version").cloned().unwrap_or_default();
    header.num_class = require_parsed(&kv, "num_class")?;
    header.max_feature_idx = require_parsed(&kv, "max_feature_idx")?;
    header.num_tree_per_iteration = kv
        .get("num_tree_per_iteration")
        .and_then(|v| v.parse().ok())
        .unwrap_or_else(|| header.num_class.max(1));
    header.objective = kv.get("objective").map(|s| LgbObjective::parse(s));
    if let Some(names) = kv.get("feature_names") {
        header.feature_names = names.split(' ').map(str::to_string).collect();
    }

    Ok(header)
}

fn parse_tree(lines: &mut std::iter::Peekable<std::str::Lines>) -> Result<LgbTree, ParseError> {
    let mut kv = HashMap::new();
    while let Some(line) = lines.peek() {
        if line.starts_with("Tree=") || line.trim() == "end of trees" {
            break;
        }
        let line = match lines.next() {
            Some(l) => l,
            None => break,
        };
        if line.is_empty() {
            break;
        }
        if let Some((key, value)) = line.split_once('=') {
            kv.insert(key.to_string(), value.to_string());
        }
    }

    let mut tree = LgbTree {
        num_leaves: require_parsed(&kv, "num_leaves")?,
        num_cat: kv.get("num_cat").and_then(|v| v.parse().ok()).unwrap_or(0),
        is_linear: kv
            .get("is_linear")
            .and_then(|v| v.parse::<i32>().ok())
            .map(|v| v != 0)
            .unwrap_or(false),
        ..LgbTree::default()
    };

    // A single-leaf tree carries only its constant output.
    if tree.num_leaves <= 1 {
        tree.leaf_value = match kv.get("leaf_value") {
            Some(v) => parse_array("leaf_value", v)?,
            None => vec![0.0],
        };
        return Ok(tree);
    }

    let n_splits = tree.num_leaves - 1;
    tree.split_feature = require_array(&kv, "split_feature", n_splits)?;
    tree.threshold = require_array(&kv, "threshold", n_splits)?;
    tree.left_child = require_array(&kv, "left_child", n_splits)?;
    tree.right_child = require_array(&kv, "right_child", n_splits)?;
    tree.leaf_value = require_array(&kv, "leaf_value", tree.num_leaves)?;
    tree.decision_type = match kv.get("decision_type") {
        Some(v) => {
            let parsed = parse_array("decision_type", v)?;
            expect_len("decision_type", parsed.len(), n_splits)?;
            parsed
        }
        None => vec![0; n_splits],
    };

    if tree.num_cat > 0 {
        tree.cat_boundaries = require_array(&kv, "cat_boundaries", tree.num_cat + 1)?;
        tree.cat_threshold = match kv.get("cat_threshold") {
            Some(v) => parse_array("cat_threshold", v)?,
            None => return Err(ParseError::MissingField("cat_threshold")),
        };
    }

    Ok(tree)
}

// ===== Field helpers =====

fn require_parsed<T: FromStr>(
    kv: &HashMap<String, String>,
    field: &'static str,
) -> Result<T, ParseError> {
    kv.get(field)
        .and_then(|v| v.parse().ok())
        .ok_or(ParseError::MissingField(field))
}

fn parse_array<T: FromStr>(field: &'static str, s: &str) -> Result<Vec<T>, ParseError> {
    s.split_whitespace()
        .map(|v| {
            v.parse().map_err(|_| ParseError::InvalidValue {
                field,
                message: format!("cannot parse {v:?}"),
            })
        })
        .collect()
}

fn require_array<T: FromStr>(
    kv: &HashMap<String, String>,
    field: &'static str,
    expected: usize,
) -> Result<Vec<T>, ParseError> {
    let raw = kv.get(field).ok_or(ParseError::MissingField(field))?;
    let parsed = parse_array(field, raw)?;
    expect_len(field, parsed.len(), expected)?;
    Ok(parsed)
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

#[cfg(test)]
mod tests {
    use super::*;

    const SMALL_MODEL: &str = "\
tree
version=v4
num_class=1
num_tree_per_iteration=1
label_index=0
max_feature_idx=1
objective=regression
feature_names=f0 f1
feature_infos=[0:10] [0:10]
tree_sizes=100

Tree=0
num_leaves=2
num_cat=0
split_feature=0
split_gain=1.0
threshold=2.5
decision_type=2
left_child=-1
right_child=-2
leaf_value=1.0 3.0
leaf_weight=1 1
leaf_count=5 5
internal_value=0
internal_weight=0
internal_count=10
is_linear=0
shrinkage=1

end of trees
";

    #[test]
    fn decision_type_bits() {
        let dt = DecisionType::from_i8(0);
        assert!(!dt.is_categorical && !dt.default_left);
        assert_eq!(dt.missing_type, MissingType::None);

        let dt = DecisionType::from_i8(2);
        assert!(!dt.is_categorical && dt.default_left);

        let dt = DecisionType::from_i8(1);
        assert!(dt.is_categorical);

        let dt = DecisionType::from_i8(8);
        assert_eq!(dt.missing_type, MissingType::NaN);
    }

    #[test]
    fn objective_line_parsing() {
        let obj = LgbObjective::parse("regression");
        assert_eq!(obj.name, "regression");

        let obj = LgbObjective::parse("binary sigmoid:0.5");
        assert_eq!(obj.name, "binary");
        assert_eq!(obj.sigmoid, 0.5);

        let obj = LgbObjective::parse("multiclass num_class:3");
        assert_eq!(obj.name, "multiclass");
        assert_eq!(obj.num_class, 3);
    }

    #[test]
    fn parses_small_model() {
        let model = LgbModel::parse(SMALL_MODEL).unwrap();
        assert_eq!(model.header.version, "v4");
        assert_eq!(model.header.num_class, 1);
        assert_eq!(model.header.max_feature_idx, 1);
        assert_eq!(model.trees.len(), 1);

        let tree = &model.trees[0];
        assert_eq!(tree.num_leaves, 2);
        assert_eq!(tree.split_feature, vec![0]);
        assert_eq!(tree.threshold, vec![2.5]);
        assert_eq!(tree.left_child, vec![-1]);
        assert_eq!(tree.right_child, vec![-2]);
        assert_eq!(tree.leaf_value, vec![1.0, 3.0]);
    }

    #[test]
    fn missing_header_field_is_an_error() {
        let content = "tree\nversion=v4\nnum_class=1\n\nTree=0\nnum_leaves=1\nleaf_value=0\n";
        assert!(matches!(
            LgbModel::parse(content),
            Err(ParseError::MissingField("max_feature_idx"))
        ));
    }

    #[test]
    fn array_length_mismatch_is_an_error() {
        let content = SMALL_MODEL.replace("leaf_value=1.0 3.0", "leaf_value=1.0");
        assert!(matches!(
            LgbModel::parse(&content),
            Err(ParseError::WrongDimension {
                field: "leaf_value",
                expected: 2,
                actual: 1
            })
        ));
    }

    #[test]
    fn bare_average_output_line_is_detected() {
        let content = SMALL_MODEL.replace("objective=regression", "objective=regression\naverage_output");
        let model = LgbModel::parse(&content).unwrap();
        assert!(model.header.average_output);
    }
}
