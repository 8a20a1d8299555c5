//! XGBoost end-to-end tests: load an inline JSON document, predict, and check
//! the outputs against hand-computed values.

use approx::assert_abs_diff_eq;
use ndarray::array;
use serde_json::{json, Value};

use grove::compat::xgboost::{json as xgb_json, ParserConfig};
use grove::{predict, Parallelism, TaskType};

// =============================================================================
// Inline model documents
// =============================================================================

fn stump_tree(threshold: f32, left_value: f32, right_value: f32) -> Value {
    json!({
        "tree_param": {
            "num_nodes": "3",
            "size_leaf_vector": "1",
            "num_feature": "2",
            "num_deleted": "0"
        },
        "id": 0,
        "loss_changes": [0.0, 0.0, 0.0],
        "sum_hessian": [1.0, 1.0, 1.0],
        "base_weights": [0.0, 0.0, 0.0],
        "left_children": [1, -1, -1],
        "right_children": [2, -1, -1],
        "parents": [0, 0, 0],
        "split_indices": [0, 0, 0],
        "split_conditions": [threshold, left_value, right_value],
        "split_type": [0, 0, 0],
        "default_left": [1, 1, 1],
        "categories": [],
        "categories_nodes": [],
        "categories_segments": [],
        "categories_sizes": []
    })
}

fn regression_doc(trees: Vec<Value>) -> Value {
    let n = trees.len();
    json!({
        "version": [2, 0, 0],
        "learner": {
            "attributes": {},
            "feature_names": [],
            "feature_types": [],
            "gradient_booster": {
                "name": "gbtree",
                "model": {
                    "trees": trees,
                    "tree_info": vec![0; n],
                    "gbtree_model_param": {
                        "num_trees": n.to_string(),
                        "num_parallel_tree": "1"
                    }
                }
            },
            "objective": { "name": "reg:squarederror" },
            "learner_model_param": {
                "base_score": "0.0",
                "num_class": "0",
                "num_feature": "2",
                "num_target": "1",
                "boost_from_average": "1"
            }
        }
    })
}

// =============================================================================
// Tests
// =============================================================================

#[test]
fn summed_regression_predictions() {
    let doc = regression_doc(vec![stump_tree(1.0, 2.0, 3.0), stump_tree(0.5, 10.0, 20.0)]);
    let model = xgb_json::from_value(&doc, &ParserConfig::default()).unwrap();
    assert_eq!(model.task_type, TaskType::Regressor);

    let rows = array![[0.0f32, 0.0], [2.0, 0.0]];
    let out = predict(&model, rows.view(), false, Parallelism::Sequential).unwrap();
    assert_abs_diff_eq!(out[[0, 0, 0]], 12.0, epsilon = 1e-6);
    assert_abs_diff_eq!(out[[1, 0, 0]], 23.0, epsilon = 1e-6);
}

#[test]
fn tolerant_and_strict_modes_predict_identically() {
    // A document with a vendor extension key parses only in tolerant mode,
    // and tolerance must not change the numbers.
    let clean = regression_doc(vec![stump_tree(1.0, 2.0, 3.0)]);
    let mut extended = clean.clone();
    extended["learner"]["custom_extension"] = json!({"made_by": "somebody else"});

    let strict = ParserConfig::default();
    let tolerant = ParserConfig {
        allow_unknown_field: true,
    };

    assert!(xgb_json::from_value(&extended, &strict).is_err());

    let reference = xgb_json::from_value(&clean, &strict).unwrap();
    let lenient = xgb_json::from_value(&extended, &tolerant).unwrap();

    let rows = array![[0.0f32, 0.0], [5.0, 1.0], [0.99, -3.0]];
    let a = predict(&reference, rows.view(), false, Parallelism::Sequential).unwrap();
    let b = predict(&lenient, rows.view(), false, Parallelism::Sequential).unwrap();
    assert_eq!(a, b);
}

#[test]
fn dart_weights_scale_predictions() {
    let tree = stump_tree(1.0, 2.0, 4.0);
    let doc = json!({
        "version": [2, 0, 0],
        "learner": {
            "gradient_booster": {
                "name": "dart",
                "gbtree": {
                    "model": {
                        "trees": [tree.clone(), tree],
                        "tree_info": [0, 0],
                        "gbtree_model_param": { "num_trees": "2", "num_parallel_tree": "1" }
                    }
                },
                "weight_drop": [1.0, 0.5]
            },
            "objective": { "name": "reg:squarederror" },
            "learner_model_param": {
                "base_score": "0.0", "num_class": "0", "num_feature": "2"
            }
        }
    });
    let model = xgb_json::from_value(&doc, &ParserConfig::default()).unwrap();

    let rows = array![[0.0f32, 0.0]];
    let out = predict(&model, rows.view(), false, Parallelism::Sequential).unwrap();
    // 2.0 * 1.0 + 2.0 * 0.5
    assert_abs_diff_eq!(out[[0, 0, 0]], 3.0, epsilon = 1e-6);
}

#[test]
fn softprob_probabilities_sum_to_one() {
    let trees: Vec<Value> = (0..6).map(|i| stump_tree(1.0, i as f32, -(i as f32))).collect();
    let mut doc = regression_doc(trees);
    doc["learner"]["objective"]["name"] = json!("multi:softprob");
    doc["learner"]["learner_model_param"]["num_class"] = json!("3");
    doc["learner"]["gradient_booster"]["model"]["tree_info"] = json!([0, 1, 2, 0, 1, 2]);

    let model = xgb_json::from_value(&doc, &ParserConfig::default()).unwrap();
    assert_eq!(model.task_type, TaskType::MultiClf);

    let rows = array![[0.0f32, 0.0], [2.0, 0.0]];
    let out = predict(&model, rows.view(), false, Parallelism::Sequential).unwrap();
    for row in 0..2 {
        let sum: f32 = (0..3).map(|c| out[[row, 0, c]]).sum();
        assert_abs_diff_eq!(sum, 1.0, epsilon = 1e-5);
    }

    // margins still reachable with pred_margin
    let margins = predict(&model, rows.view(), true, Parallelism::Sequential).unwrap();
    assert_abs_diff_eq!(margins[[0, 0, 0]], 3.0, epsilon = 1e-6);
    assert_abs_diff_eq!(margins[[0, 0, 1]], 5.0, epsilon = 1e-6);
}

#[test]
fn logistic_model_outputs_probabilities() {
    let mut doc = regression_doc(vec![stump_tree(1.0, -1.0, 1.0)]);
    doc["learner"]["objective"]["name"] = json!("binary:logistic");
    doc["learner"]["learner_model_param"]["base_score"] = json!("0.5");

    let model = xgb_json::from_value(&doc, &ParserConfig::default()).unwrap();
    assert_eq!(model.task_type, TaskType::BinaryClf);

    let rows = array![[0.0f32, 0.0], [2.0, 0.0]];
    let out = predict(&model, rows.view(), false, Parallelism::Sequential).unwrap();
    // logit(0.5) = 0, so the outputs are sigmoid(-1) and sigmoid(1)
    assert_abs_diff_eq!(out[[0, 0, 0]], 1.0 / (1.0 + 1f32.exp()), epsilon = 1e-5);
    assert_abs_diff_eq!(out[[1, 0, 0]], 1.0 / (1.0 + (-1f32).exp()), epsilon = 1e-5);
    assert!(out[[0, 0, 0]] + out[[1, 0, 0]] > 0.999);
}
