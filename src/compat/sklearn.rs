//! scikit-learn estimator importers.
//!
//! scikit-learn has no model file format; callers hand over the estimator's
//! `tree_` arrays (and for histogram gradient boosting, its node arrays) as
//! borrowed slices. Each entry point bakes in the task type, postprocessor,
//! and aggregation mode of the corresponding estimator class.

use crate::error::{CorruptModelError, LoadError, ParseError, UnsupportedFeatureError};
use crate::model::{Model, PostProcessor, TaskType};
use crate::repr::{next_up_f32, Tree, TreeBuilder};

/// Borrowed view of one classic decision tree (`estimator.tree_`).
///
/// Arrays are indexed by node; `children_left[i] == -1` marks a leaf.
/// `value` is row-major, `node_count * value_width` entries.
#[derive(Debug, Clone, Copy)]
pub struct SklearnTree<'a> {
    pub children_left: &'a [i64],
    pub children_right: &'a [i64],
    pub feature: &'a [i64],
    pub threshold: &'a [f64],
    pub value: &'a [f64],
}

/// Borrowed view of one histogram-gradient-boosting tree. Same layout as
/// [`SklearnTree`] plus an explicit per-node missing-value direction.
#[derive(Debug, Clone, Copy)]
pub struct HistTree<'a> {
    pub children_left: &'a [i64],
    pub children_right: &'a [i64],
    pub feature: &'a [i64],
    pub threshold: &'a [f64],
    pub missing_go_to_left: &'a [bool],
    pub value: &'a [f64],
}

// ===== Entry points =====

/// Import a `RandomForestRegressor` / `ExtraTreesRegressor`.
///
/// Averaged over trees, no output transformation. With more than one target
/// each leaf carries the full target vector.
pub fn random_forest_regressor(
    trees: &[SklearnTree<'_>],
    n_features: u32,
    n_targets: u32,
) -> Result<Model, LoadError> {
    let n_targets = n_targets.max(1);
    let converted = convert_classic(trees, n_targets, narrow_into)?;
    let n = trees.len();
    let model = Model {
        num_feature: n_features,
        task_type: TaskType::Regressor,
        average_tree_output: true,
        num_target: n_targets,
        num_class: vec![1; n_targets as usize].into_boxed_slice(),
        leaf_vector_shape: if n_targets > 1 { [n_targets, 1] } else { [1, 1] },
        target_id: vec![if n_targets > 1 { -1 } else { 0 }; n].into_boxed_slice(),
        class_id: vec![0; n].into_boxed_slice(),
        postprocessor: PostProcessor::Identity,
        sigmoid_alpha: 1.0,
        ratio_c: 1.0,
        base_scores: vec![0.0; n_targets as usize].into_boxed_slice(),
        attributes: "{}".to_string(),
        tree_weights: None,
        trees: converted,
    };
    model.validate()?;
    Ok(model)
}

/// Import a `RandomForestClassifier` / `ExtraTreesClassifier`.
///
/// Leaves store per-class sample counts; they are normalized to class
/// probabilities here, so averaging the trees directly yields probabilities.
pub fn random_forest_classifier(
    trees: &[SklearnTree<'_>],
    n_features: u32,
    n_classes: u32,
) -> Result<Model, LoadError> {
    if n_classes < 2 {
        return Err(ParseError::InvalidValue {
            field: "n_classes",
            message: format!("classifier needs at least 2 classes, got {n_classes}"),
        }
        .into());
    }
    let converted = convert_classic(trees, n_classes, |out, values| {
        let sum: f64 = values.iter().sum();
        if sum > 0.0 {
            for (o, v) in out.iter_mut().zip(values) {
                *o = (v / sum) as f32;
            }
        } else {
            narrow_into(out, values);
        }
    })?;
    let n = trees.len();
    let model = Model {
        num_feature: n_features,
        task_type: TaskType::MultiClf,
        average_tree_output: true,
        num_target: 1,
        num_class: vec![n_classes].into_boxed_slice(),
        leaf_vector_shape: [1, n_classes],
        target_id: vec![0; n].into_boxed_slice(),
        class_id: vec![-1; n].into_boxed_slice(),
        postprocessor: PostProcessor::IdentityMulticlass,
        sigmoid_alpha: 1.0,
        ratio_c: 1.0,
        base_scores: vec![0.0; n_classes as usize].into_boxed_slice(),
        attributes: "{}".to_string(),
        tree_weights: None,
        trees: converted,
    };
    model.validate()?;
    Ok(model)
}

/// Import an `IsolationForest`.
///
/// Leaf values must be the caller-precomputed path-length scores (tree depth
/// plus the average-path-length correction for the leaf's sample count);
/// `ratio_c` is the normalization constant for the training sample size. The
/// anomaly score is then `2^(-avg_score / ratio_c)`.
pub fn isolation_forest(
    trees: &[SklearnTree<'_>],
    n_features: u32,
    ratio_c: f32,
) -> Result<Model, LoadError> {
    let converted = convert_classic(trees, 1, narrow_into)?;
    let n = trees.len();
    let model = Model {
        num_feature: n_features,
        task_type: TaskType::IsolationForest,
        average_tree_output: true,
        num_target: 1,
        num_class: vec![1].into_boxed_slice(),
        leaf_vector_shape: [1, 1],
        target_id: vec![0; n].into_boxed_slice(),
        class_id: vec![0; n].into_boxed_slice(),
        postprocessor: PostProcessor::ExponentialStandardRatio,
        sigmoid_alpha: 1.0,
        ratio_c,
        base_scores: vec![0.0].into_boxed_slice(),
        attributes: "{}".to_string(),
        tree_weights: None,
        trees: converted,
    };
    model.validate()?;
    Ok(model)
}

/// Import a `GradientBoostingRegressor`.
pub fn gradient_boosting_regressor(
    trees: &[SklearnTree<'_>],
    n_features: u32,
    base_score: f32,
) -> Result<Model, LoadError> {
    let converted = convert_classic(trees, 1, narrow_into)?;
    let n = trees.len();
    let model = Model {
        num_feature: n_features,
        task_type: TaskType::Regressor,
        average_tree_output: false,
        num_target: 1,
        num_class: vec![1].into_boxed_slice(),
        leaf_vector_shape: [1, 1],
        target_id: vec![0; n].into_boxed_slice(),
        class_id: vec![0; n].into_boxed_slice(),
        postprocessor: PostProcessor::Identity,
        sigmoid_alpha: 1.0,
        ratio_c: 1.0,
        base_scores: vec![base_score].into_boxed_slice(),
        attributes: "{}".to_string(),
        tree_weights: None,
        trees: converted,
    };
    model.validate()?;
    Ok(model)
}

/// Import a `GradientBoostingClassifier`.
///
/// Binary models carry one tree per iteration and a single sigmoid output;
/// multiclass models carry `n_iterations * n_classes` trees in class-major
/// interleaving, transformed with softmax.
pub fn gradient_boosting_classifier(
    trees: &[SklearnTree<'_>],
    n_features: u32,
    n_classes: u32,
    base_scores: &[f32],
) -> Result<Model, LoadError> {
    let converted = convert_classic(trees, 1, narrow_into)?;
    gb_classifier_model(converted, trees.len(), n_features, n_classes, base_scores)
}

/// Import a `HistGradientBoostingRegressor`.
///
/// `is_categorical` is the estimator's per-feature categorical mask, if any.
pub fn hist_gradient_boosting_regressor(
    trees: &[HistTree<'_>],
    n_features: u32,
    base_score: f32,
    is_categorical: Option<&[bool]>,
) -> Result<Model, LoadError> {
    reject_categorical(is_categorical)?;
    let converted = convert_hist(trees)?;
    let n = trees.len();
    let model = Model {
        num_feature: n_features,
        task_type: TaskType::Regressor,
        average_tree_output: false,
        num_target: 1,
        num_class: vec![1].into_boxed_slice(),
        leaf_vector_shape: [1, 1],
        target_id: vec![0; n].into_boxed_slice(),
        class_id: vec![0; n].into_boxed_slice(),
        postprocessor: PostProcessor::Identity,
        sigmoid_alpha: 1.0,
        ratio_c: 1.0,
        base_scores: vec![base_score].into_boxed_slice(),
        attributes: "{}".to_string(),
        tree_weights: None,
        trees: converted,
    };
    model.validate()?;
    Ok(model)
}

/// Import a `HistGradientBoostingClassifier`.
pub fn hist_gradient_boosting_classifier(
    trees: &[HistTree<'_>],
    n_features: u32,
    n_classes: u32,
    base_scores: &[f32],
    is_categorical: Option<&[bool]>,
) -> Result<Model, LoadError> {
    reject_categorical(is_categorical)?;
    let converted = convert_hist(trees)?;
    gb_classifier_model(converted, trees.len(), n_features, n_classes, base_scores)
}

// ===== Shared assembly =====

fn reject_categorical(is_categorical: Option<&[bool]>) -> Result<(), LoadError> {
    if is_categorical.is_some_and(|mask| mask.iter().any(|&c| c)) {
        return Err(UnsupportedFeatureError(
            "Categorical splits are not yet supported".to_string(),
        )
        .into());
    }
    Ok(())
}

fn gb_classifier_model(
    trees: Vec<Tree>,
    n_trees: usize,
    n_features: u32,
    n_classes: u32,
    base_scores: &[f32],
) -> Result<Model, LoadError> {
    if n_classes < 2 {
        return Err(ParseError::InvalidValue {
            field: "n_classes",
            message: format!("classifier needs at least 2 classes, got {n_classes}"),
        }
        .into());
    }

    let binary = n_classes == 2;
    let n_outputs = if binary { 1 } else { n_classes };
    if base_scores.len() != n_outputs as usize {
        return Err(ParseError::WrongDimension {
            field: "base_scores",
            expected: n_outputs as usize,
            actual: base_scores.len(),
        }
        .into());
    }

    let class_id: Vec<i32> = if binary {
        vec![0; n_trees]
    } else {
        if n_trees % n_classes as usize != 0 {
            return Err(ParseError::InvalidValue {
                field: "trees",
                message: format!("{n_trees} trees cannot interleave over {n_classes} classes"),
            }
            .into());
        }
        (0..n_trees).map(|i| (i % n_classes as usize) as i32).collect()
    };

    let model = Model {
        num_feature: n_features,
        task_type: if binary { TaskType::BinaryClf } else { TaskType::MultiClf },
        average_tree_output: false,
        num_target: 1,
        num_class: vec![n_outputs].into_boxed_slice(),
        leaf_vector_shape: [1, 1],
        target_id: vec![0; n_trees].into_boxed_slice(),
        class_id: class_id.into_boxed_slice(),
        postprocessor: if binary { PostProcessor::Sigmoid } else { PostProcessor::Softmax },
        sigmoid_alpha: 1.0,
        ratio_c: 1.0,
        base_scores: base_scores.to_vec().into_boxed_slice(),
        attributes: "{}".to_string(),
        tree_weights: None,
        trees,
    };
    model.validate()?;
    Ok(model)
}

// ===== Tree conversion =====

fn narrow_into(out: &mut [f32], values: &[f64]) {
    for (o, v) in out.iter_mut().zip(values) {
        *o = *v as f32;
    }
}

fn check_tree_arrays(
    n_nodes: usize,
    lens: &[(&'static str, usize)],
) -> Result<(), ParseError> {
    for &(field, len) in lens {
        if len != n_nodes {
            return Err(ParseError::WrongDimension {
                field,
                expected: n_nodes,
                actual: len,
            });
        }
    }
    Ok(())
}

/// Convert classic `tree_` arrays. `leaf_fn` maps a node's raw value row to
/// the leaf vector; splits compare `<=` with missing values going left.
fn convert_classic<F>(
    trees: &[SklearnTree<'_>],
    leaf_len: u32,
    mut leaf_fn: F,
) -> Result<Vec<Tree>, LoadError>
where
    F: FnMut(&mut [f32], &[f64]),
{
    let width = leaf_len as usize;
    let mut converted = Vec::with_capacity(trees.len());
    for (tree_idx, t) in trees.iter().enumerate() {
        let n_nodes = t.children_left.len();
        if n_nodes == 0 {
            return Err(CorruptModelError::EmptyTree { tree: tree_idx }.into());
        }
        check_tree_arrays(
            n_nodes,
            &[
                ("children_right", t.children_right.len()),
                ("feature", t.feature.len()),
                ("threshold", t.threshold.len()),
            ],
        )?;
        check_tree_arrays(n_nodes * width, &[("value", t.value.len())])?;

        let mut builder = TreeBuilder::with_leaf_len(n_nodes, leaf_len);
        let mut leaf_buf = vec![0.0f32; width];
        for node in 0..n_nodes {
            let left = t.children_left[node];
            let right = t.children_right[node];
            if left == -1 {
                leaf_fn(&mut leaf_buf, &t.value[node * width..(node + 1) * width]);
                if width == 1 {
                    builder.leaf(node as u32, leaf_buf[0]);
                } else {
                    builder.vector_leaf(node as u32, &leaf_buf);
                }
                continue;
            }
            let (left, right) = checked_children(left, right, n_nodes, tree_idx, node)?;
            builder.numeric_split(
                node as u32,
                t.feature[node] as u32,
                next_up_f32(t.threshold[node] as f32),
                true,
                left,
                right,
            );
        }
        converted.push(builder.build());
    }
    Ok(converted)
}

/// Convert histogram-GB node arrays; per-node missing direction, `<=`.
fn convert_hist(trees: &[HistTree<'_>]) -> Result<Vec<Tree>, LoadError> {
    let mut converted = Vec::with_capacity(trees.len());
    for (tree_idx, t) in trees.iter().enumerate() {
        let n_nodes = t.children_left.len();
        if n_nodes == 0 {
            return Err(CorruptModelError::EmptyTree { tree: tree_idx }.into());
        }
        check_tree_arrays(
            n_nodes,
            &[
                ("children_right", t.children_right.len()),
                ("feature", t.feature.len()),
                ("threshold", t.threshold.len()),
                ("missing_go_to_left", t.missing_go_to_left.len()),
                ("value", t.value.len()),
            ],
        )?;

        let mut builder = TreeBuilder::new(n_nodes);
        for node in 0..n_nodes {
            let left = t.children_left[node];
            let right = t.children_right[node];
            if left == -1 {
                builder.leaf(node as u32, t.value[node] as f32);
                continue;
            }
            let (left, right) = checked_children(left, right, n_nodes, tree_idx, node)?;
            builder.numeric_split(
                node as u32,
                t.feature[node] as u32,
                next_up_f32(t.threshold[node] as f32),
                t.missing_go_to_left[node],
                left,
                right,
            );
        }
        converted.push(builder.build());
    }
    Ok(converted)
}

fn checked_children(
    left: i64,
    right: i64,
    n_nodes: usize,
    tree_idx: usize,
    node: usize,
) -> Result<(u32, u32), LoadError> {
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
    Ok((left as u32, right as u32))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::predict;
    use crate::utils::Parallelism;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    // One split at feature 0, threshold 2.5; node 1 left, node 2 right.
    const LEFT: &[i64] = &[1, -1, -1];
    const RIGHT: &[i64] = &[2, -1, -1];
    const FEATURE: &[i64] = &[0, -2, -2];
    const THRESHOLD: &[f64] = &[2.5, -2.0, -2.0];

    fn stump(value: &[f64]) -> SklearnTree<'_> {
        SklearnTree {
            children_left: LEFT,
            children_right: RIGHT,
            feature: FEATURE,
            threshold: THRESHOLD,
            value,
        }
    }

    #[test]
    fn rf_regressor_averages_trees() {
        let v1 = [0.0, 1.0, 3.0];
        let v2 = [0.0, 2.0, 5.0];
        let model = random_forest_regressor(&[stump(&v1), stump(&v2)], 2, 1).unwrap();
        assert!(model.average_tree_output);
        assert_eq!(model.task_type, TaskType::Regressor);

        let rows = array![[2.5f32, 0.0], [3.0, 0.0]];
        let out = predict(&model, rows.view(), false, Parallelism::Sequential).unwrap();
        // 2.5 <= 2.5 goes left
        assert_abs_diff_eq!(out[[0, 0, 0]], 1.5, epsilon = 1e-6);
        assert_abs_diff_eq!(out[[1, 0, 0]], 4.0, epsilon = 1e-6);
    }

    #[test]
    fn rf_regressor_multi_target_uses_vector_leaves() {
        // value width 2: two targets per leaf
        let v = [0.0, 0.0, 1.0, 10.0, 3.0, 30.0];
        let model = random_forest_regressor(&[stump(&v)], 2, 2).unwrap();
        assert_eq!(model.leaf_vector_shape, [2, 1]);
        assert_eq!(&*model.target_id, &[-1]);

        let rows = array![[1.0f32, 0.0]];
        let out = predict(&model, rows.view(), false, Parallelism::Sequential).unwrap();
        assert_abs_diff_eq!(out[[0, 0, 0]], 1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(out[[0, 1, 0]], 10.0, epsilon = 1e-6);
    }

    #[test]
    fn rf_classifier_normalizes_leaf_counts() {
        // leaf sample counts: left leaf 3/1, right leaf 0/4
        let v = [0.0, 0.0, 3.0, 1.0, 0.0, 4.0];
        let model = random_forest_classifier(&[stump(&v)], 2, 2).unwrap();
        assert_eq!(model.postprocessor, PostProcessor::IdentityMulticlass);
        assert_eq!(&*model.class_id, &[-1]);

        let rows = array![[1.0f32, 0.0], [5.0, 0.0]];
        let out = predict(&model, rows.view(), false, Parallelism::Sequential).unwrap();
        assert_abs_diff_eq!(out[[0, 0, 0]], 0.75, epsilon = 1e-6);
        assert_abs_diff_eq!(out[[0, 0, 1]], 0.25, epsilon = 1e-6);
        assert_abs_diff_eq!(out[[1, 0, 0]], 0.0, epsilon = 1e-6);
        assert_abs_diff_eq!(out[[1, 0, 1]], 1.0, epsilon = 1e-6);
    }

    #[test]
    fn rf_classifier_rejects_single_class() {
        let v = [0.0, 1.0, 2.0];
        assert!(matches!(
            random_forest_classifier(&[stump(&v)], 2, 1),
            Err(LoadError::Parse(ParseError::InvalidValue { field: "n_classes", .. }))
        ));
    }

    #[test]
    fn isolation_forest_applies_ratio_transform() {
        // precomputed path-length scores at the leaves
        let v = [0.0, 2.0, 4.0];
        let model = isolation_forest(&[stump(&v)], 2, 2.0).unwrap();
        assert_eq!(model.task_type, TaskType::IsolationForest);

        let rows = array![[1.0f32, 0.0]];
        let out = predict(&model, rows.view(), false, Parallelism::Sequential).unwrap();
        // 2^(-2.0 / 2.0)
        assert_abs_diff_eq!(out[[0, 0, 0]], 0.5, epsilon = 1e-6);
    }

    #[test]
    fn gb_regressor_adds_base_score() {
        let v = [0.0, 1.0, 3.0];
        let model = gradient_boosting_regressor(&[stump(&v)], 2, 10.0).unwrap();
        assert!(!model.average_tree_output);

        let rows = array![[1.0f32, 0.0]];
        let out = predict(&model, rows.view(), false, Parallelism::Sequential).unwrap();
        assert_abs_diff_eq!(out[[0, 0, 0]], 11.0, epsilon = 1e-6);
    }

    #[test]
    fn gb_binary_classifier_is_sigmoid() {
        let v = [0.0, -1.0, 1.0];
        let model = gradient_boosting_classifier(&[stump(&v)], 2, 2, &[0.0]).unwrap();
        assert_eq!(model.task_type, TaskType::BinaryClf);
        assert_eq!(model.postprocessor, PostProcessor::Sigmoid);
        assert_eq!(&*model.num_class, &[1]);
    }

    #[test]
    fn gb_multiclass_interleaves_class_ids() {
        let v = [0.0, -1.0, 1.0];
        let trees = vec![stump(&v); 6];
        let model = gradient_boosting_classifier(&trees, 2, 3, &[0.1, 0.2, 0.3]).unwrap();
        assert_eq!(model.postprocessor, PostProcessor::Softmax);
        assert_eq!(&*model.class_id, &[0, 1, 2, 0, 1, 2]);
    }

    #[test]
    fn gb_multiclass_rejects_uneven_tree_count() {
        let v = [0.0, -1.0, 1.0];
        let trees = vec![stump(&v); 5];
        assert!(matches!(
            gradient_boosting_classifier(&trees, 2, 3, &[0.0, 0.0, 0.0]),
            Err(LoadError::Parse(ParseError::InvalidValue { field: "trees", .. }))
        ));
    }

    #[test]
    fn hist_regressor_respects_missing_direction() {
        let t = HistTree {
            children_left: LEFT,
            children_right: RIGHT,
            feature: FEATURE,
            threshold: THRESHOLD,
            missing_go_to_left: &[false, false, false],
            value: &[0.0, 1.0, 3.0],
        };
        let model = hist_gradient_boosting_regressor(&[t], 2, 0.0, None).unwrap();

        let rows = array![[f32::NAN, 0.0]];
        let out = predict(&model, rows.view(), false, Parallelism::Sequential).unwrap();
        assert_abs_diff_eq!(out[[0, 0, 0]], 3.0, epsilon = 1e-6);
    }

    #[test]
    fn hist_with_categorical_features_is_rejected() {
        let t = HistTree {
            children_left: LEFT,
            children_right: RIGHT,
            feature: FEATURE,
            threshold: THRESHOLD,
            missing_go_to_left: &[true, true, true],
            value: &[0.0, 1.0, 3.0],
        };
        let err = hist_gradient_boosting_regressor(&[t], 2, 0.0, Some(&[false, true])).unwrap_err();
        assert!(err.to_string().contains("Categorical splits are not yet supported"));
    }
}
