//! Canonical JSON dump tests against loaded models.

use serde_json::{json, Value};

use grove::compat::sklearn::{self, SklearnTree};
use grove::compat::xgboost::{json as xgb_json, ParserConfig};
use grove::serializer::dump_json;

fn xgboost_model() -> grove::Model {
    let doc = json!({
        "version": [2, 0, 0],
        "learner": {
            "attributes": { "best_iteration": "0" },
            "gradient_booster": {
                "name": "gbtree",
                "model": {
                    "trees": [{
                        "tree_param": { "num_nodes": "3", "size_leaf_vector": "1" },
                        "loss_changes": [0.0, 0.0, 0.0],
                        "sum_hessian": [1.0, 1.0, 1.0],
                        "base_weights": [0.0, 0.0, 0.0],
                        "left_children": [1, -1, -1],
                        "right_children": [2, -1, -1],
                        "parents": [0, 0, 0],
                        "split_indices": [1, 0, 0],
                        "split_conditions": [0.5, -1.0, 1.0],
                        "default_left": [1, 1, 1]
                    }],
                    "tree_info": [0],
                    "gbtree_model_param": { "num_trees": "1" }
                }
            },
            "objective": { "name": "binary:logistic" },
            "learner_model_param": {
                "base_score": "0.5", "num_class": "0", "num_feature": "2"
            }
        }
    });
    xgb_json::from_value(&doc, &ParserConfig::default()).unwrap()
}

#[test]
fn dump_reflects_loaded_model() {
    let model = xgboost_model();
    let dump = dump_json(&model, true).unwrap();
    let v: Value = serde_json::from_str(&dump).unwrap();

    assert_eq!(v["num_feature"], 2);
    assert_eq!(v["task_type"], "kBinaryClf");
    assert_eq!(v["postprocessor"], "sigmoid");
    assert_eq!(v["average_tree_output"], false);
    assert_eq!(v["attributes"]["best_iteration"], "0");

    let nodes = v["trees"][0]["nodes"].as_array().unwrap();
    assert_eq!(nodes.len(), 3);
    assert_eq!(nodes[0]["node_type"], "numerical_test_node");
    assert_eq!(nodes[0]["split_feature_id"], 1);
    assert_eq!(nodes[0]["comparison_op"], "<");
    assert_eq!(nodes[0]["left_child"], 1);
    assert_eq!(nodes[0]["right_child"], 2);
    assert_eq!(nodes[1]["leaf_value"], -1.0);
    assert_eq!(nodes[2]["leaf_value"], 1.0);
}

#[test]
fn compact_dump_is_one_line_and_equivalent() {
    let model = xgboost_model();
    let compact = dump_json(&model, false).unwrap();
    let pretty = dump_json(&model, true).unwrap();

    assert!(!compact.contains('\n'));
    assert!(pretty.contains('\n'));

    let a: Value = serde_json::from_str(&compact).unwrap();
    let b: Value = serde_json::from_str(&pretty).unwrap();
    assert_eq!(a, b);
}

#[test]
fn vector_leaf_model_dumps_leaf_arrays() {
    // Random forest classifier leaves hold class probability vectors.
    let value = [0.0, 0.0, 3.0, 1.0, 1.0, 3.0];
    let tree = SklearnTree {
        children_left: &[1, -1, -1],
        children_right: &[2, -1, -1],
        feature: &[0, -2, -2],
        threshold: &[0.5, -2.0, -2.0],
        value: &value,
    };
    let model = sklearn::random_forest_classifier(&[tree], 1, 2).unwrap();

    let dump = dump_json(&model, false).unwrap();
    let v: Value = serde_json::from_str(&dump).unwrap();
    assert_eq!(v["task_type"], "kMultiClf");
    assert_eq!(v["leaf_vector_shape"], json!([1, 2]));

    let nodes = v["trees"][0]["nodes"].as_array().unwrap();
    assert_eq!(nodes[1]["leaf_value"], json!([0.75, 0.25]));
    assert_eq!(nodes[2]["leaf_value"], json!([0.25, 0.75]));
}
