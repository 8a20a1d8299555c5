//! scikit-learn importer end-to-end tests.

use approx::assert_abs_diff_eq;
use ndarray::array;

use grove::compat::sklearn::{self, HistTree, SklearnTree};
use grove::{predict, Parallelism, TaskType};

fn stump(value: &[f64]) -> SklearnTree<'_> {
    SklearnTree {
        children_left: &[1, -1, -1],
        children_right: &[2, -1, -1],
        feature: &[0, -2, -2],
        threshold: &[2.5, -2.0, -2.0],
        value,
    }
}

#[test]
fn random_forest_probabilities_average_across_trees() {
    // Tree 1 votes 100% class 0 left, tree 2 splits 50/50 everywhere.
    let v1 = [0.0, 0.0, 4.0, 0.0, 0.0, 4.0];
    let v2 = [0.0, 0.0, 1.0, 1.0, 1.0, 1.0];
    let model = sklearn::random_forest_classifier(&[stump(&v1), stump(&v2)], 1, 2).unwrap();
    assert_eq!(model.task_type, TaskType::MultiClf);

    let rows = array![[0.0f32], [5.0]];
    let out = predict(&model, rows.view(), false, Parallelism::Sequential).unwrap();
    assert_abs_diff_eq!(out[[0, 0, 0]], 0.75, epsilon = 1e-6);
    assert_abs_diff_eq!(out[[0, 0, 1]], 0.25, epsilon = 1e-6);
    assert_abs_diff_eq!(out[[1, 0, 0]], 0.25, epsilon = 1e-6);
    assert_abs_diff_eq!(out[[1, 0, 1]], 0.75, epsilon = 1e-6);
}

#[test]
fn isolation_forest_scores_anomalies_higher() {
    // Shorter path lengths (smaller leaf values) mean more anomalous.
    let shallow = [0.0, 1.0, 1.0];
    let deep = [0.0, 8.0, 8.0];
    let inlier = sklearn::isolation_forest(&[stump(&deep)], 1, 4.0).unwrap();
    let outlier = sklearn::isolation_forest(&[stump(&shallow)], 1, 4.0).unwrap();

    let rows = array![[0.0f32]];
    let s_in = predict(&inlier, rows.view(), false, Parallelism::Sequential).unwrap();
    let s_out = predict(&outlier, rows.view(), false, Parallelism::Sequential).unwrap();
    assert!(s_out[[0, 0, 0]] > s_in[[0, 0, 0]]);
    // 2^(-1/4) and 2^(-2)
    assert_abs_diff_eq!(s_out[[0, 0, 0]], 2f32.powf(-0.25), epsilon = 1e-6);
    assert_abs_diff_eq!(s_in[[0, 0, 0]], 0.25, epsilon = 1e-6);
}

#[test]
fn hist_gradient_boosting_routes_missing_explicitly() {
    let t = HistTree {
        children_left: &[1, -1, -1],
        children_right: &[2, -1, -1],
        feature: &[0, -2, -2],
        threshold: &[2.5, -2.0, -2.0],
        missing_go_to_left: &[false, false, false],
        value: &[0.0, -1.0, 1.0],
    };
    let model = sklearn::hist_gradient_boosting_regressor(&[t], 1, 0.5, None).unwrap();

    let rows = array![[f32::NAN], [0.0]];
    let out = predict(&model, rows.view(), false, Parallelism::Sequential).unwrap();
    assert_abs_diff_eq!(out[[0, 0, 0]], 1.5, epsilon = 1e-6);
    assert_abs_diff_eq!(out[[1, 0, 0]], -0.5, epsilon = 1e-6);
}

#[test]
fn categorical_hist_estimators_are_rejected() {
    let t = HistTree {
        children_left: &[-1],
        children_right: &[-1],
        feature: &[-2],
        threshold: &[0.0],
        missing_go_to_left: &[true],
        value: &[0.0],
    };
    let err =
        sklearn::hist_gradient_boosting_classifier(&[t], 2, 2, &[0.0], Some(&[true, false]))
            .unwrap_err();
    assert!(err.to_string().contains("Categorical splits are not yet supported"));
}
