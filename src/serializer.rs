//! Canonical JSON dump of a model.
//!
//! The dump is a stable, human-inspectable rendition of the in-memory
//! representation: every field the aggregation and traversal logic consumes
//! appears under a fixed key, trees list their nodes in index order, and the
//! `attributes` blob is inlined as a JSON object. It is a diagnostic and
//! interchange surface, not a reload format.

use serde::Serialize;

use crate::model::Model;
use crate::repr::Tree;

#[derive(Serialize)]
struct ModelDump<'a> {
    num_feature: u32,
    task_type: &'static str,
    average_tree_output: bool,
    num_target: u32,
    num_class: &'a [u32],
    leaf_vector_shape: [u32; 2],
    target_id: &'a [i32],
    class_id: &'a [i32],
    postprocessor: &'static str,
    sigmoid_alpha: f32,
    ratio_c: f32,
    base_scores: &'a [f32],
    attributes: serde_json::Value,
    trees: Vec<TreeDump>,
}

#[derive(Serialize)]
struct TreeDump {
    num_nodes: usize,
    has_categorical_split: bool,
    nodes: Vec<NodeDump>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum NodeDump {
    Numerical {
        node_id: u32,
        split_feature_id: u32,
        default_left: bool,
        node_type: &'static str,
        comparison_op: &'static str,
        threshold: f32,
        left_child: u32,
        right_child: u32,
    },
    Categorical {
        node_id: u32,
        split_feature_id: u32,
        default_left: bool,
        node_type: &'static str,
        category_list: Vec<u32>,
        category_list_right_child: bool,
        left_child: u32,
        right_child: u32,
    },
    Leaf {
        node_id: u32,
        leaf_value: LeafValue,
    },
}

#[derive(Serialize)]
#[serde(untagged)]
enum LeafValue {
    Scalar(f32),
    Vector(Vec<f32>),
}

fn dump_tree(tree: &Tree) -> TreeDump {
    let n_nodes = tree.n_nodes();
    let mut nodes = Vec::with_capacity(n_nodes);
    for node in 0..n_nodes as u32 {
        nodes.push(dump_node(tree, node));
    }
    TreeDump {
        num_nodes: n_nodes,
        has_categorical_split: tree.has_categorical_split(),
        nodes,
    }
}

fn dump_node(tree: &Tree, node: u32) -> NodeDump {
    use crate::repr::SplitType;

    if tree.is_leaf(node) {
        let values = tree.leaf_values(node);
        let leaf_value = if values.len() == 1 {
            LeafValue::Scalar(values[0])
        } else {
            LeafValue::Vector(values.to_vec())
        };
        return NodeDump::Leaf {
            node_id: node,
            leaf_value,
        };
    }

    match tree.split_type(node) {
        SplitType::Numeric => NodeDump::Numerical {
            node_id: node,
            split_feature_id: tree.split_index(node),
            default_left: tree.default_left(node),
            node_type: "numerical_test_node",
            comparison_op: "<",
            threshold: tree.threshold(node),
            left_child: tree.left_child(node),
            right_child: tree.right_child(node),
        },
        SplitType::Categorical => NodeDump::Categorical {
            node_id: node,
            split_feature_id: tree.split_index(node),
            default_left: tree.default_left(node),
            node_type: "categorical_test_node",
            category_list: tree.categories().categories_for_node(node),
            // the stored bitset always lists the right-routed categories
            category_list_right_child: true,
            left_child: tree.left_child(node),
            right_child: tree.right_child(node),
        },
    }
}

/// Serialize a model as canonical JSON; `pretty` selects indented output,
/// otherwise the dump is a single line.
pub fn dump_json(model: &Model, pretty: bool) -> Result<String, serde_json::Error> {
    let attributes: serde_json::Value = serde_json::from_str(&model.attributes)?;
    let dump = ModelDump {
        num_feature: model.num_feature,
        task_type: model.task_type.as_str(),
        average_tree_output: model.average_tree_output,
        num_target: model.num_target,
        num_class: &model.num_class,
        leaf_vector_shape: model.leaf_vector_shape,
        target_id: &model.target_id,
        class_id: &model.class_id,
        postprocessor: model.postprocessor.name(),
        sigmoid_alpha: model.sigmoid_alpha,
        ratio_c: model.ratio_c,
        base_scores: &model.base_scores,
        attributes,
        trees: model.trees.iter().map(dump_tree).collect(),
    };
    if pretty {
        serde_json::to_string_pretty(&dump)
    } else {
        serde_json::to_string(&dump)
    }
}
