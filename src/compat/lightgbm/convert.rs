//! Conversion from parsed LightGBM structures to the native model.

use crate::error::{CorruptModelError, LoadError, ParseError, UnsupportedFeatureError};
use crate::model::{Model, PostProcessor, TaskType};
use crate::repr::{next_up_f32, Tree, TreeBuilder};

use super::text::{DecisionType, LgbModel, LgbObjective, LgbTree, MissingType};

pub(super) fn model_from_lgb(lgb: &LgbModel) -> Result<Model, LoadError> {
    for (idx, tree) in lgb.trees.iter().enumerate() {
        if tree.is_linear {
            return Err(
                UnsupportedFeatureError("linear trees are not supported".to_string()).into(),
            );
        }
        if tree.num_leaves == 0 {
            return Err(CorruptModelError::EmptyTree { tree: idx }.into());
        }
    }

    let (task_type, postprocessor, sigmoid_alpha) =
        interpret_objective(lgb.header.objective.as_ref())?;

    let n_class = lgb.header.num_class.max(1) as u32;
    let n_trees = lgb.trees.len();
    // Trees interleave across classes: tree i belongs to class i mod k.
    let per_iteration = lgb.header.num_tree_per_iteration.max(1);
    let class_id: Vec<i32> = if n_class > 1 {
        (0..n_trees).map(|i| (i % per_iteration) as i32).collect()
    } else {
        vec![0; n_trees]
    };

    let mut trees = Vec::with_capacity(n_trees);
    for (idx, tree) in lgb.trees.iter().enumerate() {
        trees.push(convert_tree(tree, idx)?);
    }

    let model = Model {
        num_feature: (lgb.header.max_feature_idx + 1) as u32,
        task_type,
        average_tree_output: lgb.header.average_output,
        num_target: 1,
        num_class: vec![n_class].into_boxed_slice(),
        leaf_vector_shape: [1, 1],
        target_id: vec![0; n_trees].into_boxed_slice(),
        class_id: class_id.into_boxed_slice(),
        postprocessor,
        sigmoid_alpha,
        ratio_c: 1.0,
        // LightGBM folds the boost-from-average constant into the leaves.
        base_scores: vec![0.0; n_class as usize].into_boxed_slice(),
        attributes: "{}".to_string(),
        tree_weights: None,
        trees,
    };
    model.validate()?;
    Ok(model)
}

fn interpret_objective(
    objective: Option<&LgbObjective>,
) -> Result<(TaskType, PostProcessor, f32), ParseError> {
    let Some(obj) = objective else {
        // Stripped model files omit the objective line; raw margins then.
        return Ok((TaskType::Regressor, PostProcessor::Identity, 1.0));
    };
    match obj.name.as_str() {
        "regression" | "regression_l1" | "huber" | "fair" | "quantile" | "mape" => {
            Ok((TaskType::Regressor, PostProcessor::Identity, 1.0))
        }
        "poisson" | "gamma" | "tweedie" => {
            Ok((TaskType::Regressor, PostProcessor::Exponential, 1.0))
        }
        "binary" => Ok((TaskType::BinaryClf, PostProcessor::Sigmoid, obj.sigmoid)),
        "multiclass" | "softmax" => Ok((TaskType::MultiClf, PostProcessor::Softmax, 1.0)),
        "multiclassova" | "multiova" | "ova" => Ok((
            TaskType::MultiClf,
            PostProcessor::MulticlassOva,
            obj.sigmoid,
        )),
        "xentropy" | "cross_entropy" => {
            Ok((TaskType::Regressor, PostProcessor::Sigmoid, 1.0))
        }
        "xentlambda" | "cross_entropy_lambda" => Ok((
            TaskType::Regressor,
            PostProcessor::LogarithmOnePlusExp,
            1.0,
        )),
        "lambdarank" | "rank_xendcg" => {
            Ok((TaskType::LearningToRank, PostProcessor::Identity, 1.0))
        }
        other => Err(ParseError::UnknownObjective(other.to_string())),
    }
}

/// Lay out internal nodes first, then leaves: internal node `i` keeps index
/// `i`, leaf `j` becomes node `num_internal + j`.
fn convert_tree(lgb_tree: &LgbTree, tree_idx: usize) -> Result<Tree, LoadError> {
    if lgb_tree.num_leaves == 1 {
        let mut builder = TreeBuilder::new(1);
        builder.leaf(0, lgb_tree.leaf_value[0] as f32);
        return Ok(builder.build());
    }

    let n_internal = lgb_tree.num_leaves - 1;
    let n_nodes = n_internal + lgb_tree.num_leaves;
    let mut builder = TreeBuilder::new(n_nodes);

    for node in 0..n_internal {
        let dt = DecisionType::from_i8(lgb_tree.decision_type[node]);
        let left = child_index(lgb_tree.left_child[node], lgb_tree, tree_idx, node)?;
        let right = child_index(lgb_tree.right_child[node], lgb_tree, tree_idx, node)?;
        let raw_feature = lgb_tree.split_feature[node];
        let feature = u32::try_from(raw_feature).map_err(|_| ParseError::InvalidValue {
            field: "split_feature",
            message: format!("negative feature index {raw_feature}"),
        })?;

        if dt.is_categorical {
            let cat_idx = lgb_tree.threshold[node] as usize;
            let words = category_words(lgb_tree, cat_idx)?;
            // LightGBM routes in-set categories left; the bitset storage
            // routes them right, so the children swap and the default
            // direction flips with them. Unless the split is NaN-aware,
            // NaN is read as category 0 and takes that category's branch.
            let default_left = match dt.missing_type {
                MissingType::NaN => !dt.default_left,
                MissingType::None | MissingType::Zero => {
                    let zero_in_set = words.first().map_or(false, |&w| w & 1 != 0);
                    !zero_in_set
                }
            };
            builder.categorical_split_bitset(node as u32, feature, words, default_left, right, left);
        } else {
            // LightGBM compares `<=`; the traversal uses `<`, so bump the
            // threshold one ulp to keep boundary values on the left.
            // With missing type None, NaN is read as 0.0 and compared; the
            // other missing types send NaN down the declared default branch.
            let threshold = next_up_f32(lgb_tree.threshold[node] as f32);
            let default_left = match dt.missing_type {
                MissingType::None => 0.0 <= lgb_tree.threshold[node],
                MissingType::Zero | MissingType::NaN => dt.default_left,
            };
            builder.numeric_split(node as u32, feature, threshold, default_left, left, right);
        }
    }

    // Leaf values already include shrinkage.
    for leaf in 0..lgb_tree.num_leaves {
        builder.leaf((n_internal + leaf) as u32, lgb_tree.leaf_value[leaf] as f32);
    }

    Ok(builder.build())
}

/// Negative child references denote leaves: leaf index is `!child`.
fn child_index(
    child: i32,
    lgb_tree: &LgbTree,
    tree_idx: usize,
    node: usize,
) -> Result<u32, LoadError> {
    let n_internal = lgb_tree.num_leaves - 1;
    let n_nodes = n_internal + lgb_tree.num_leaves;
    let resolved = if child < 0 {
        let leaf = !child as usize;
        n_internal + leaf
    } else {
        child as usize
    };
    let in_range = if child < 0 {
        (!child as usize) < lgb_tree.num_leaves
    } else {
        (child as usize) < n_internal
    };
    if !in_range {
        return Err(CorruptModelError::ChildOutOfBounds {
            tree: tree_idx,
            node: node as u32,
            side: if child < 0 { "leaf" } else { "internal" },
            child: resolved as u32,
            n_nodes,
        }
        .into());
    }
    Ok(resolved as u32)
}

/// Bitset words for one categorical split, sliced out of the shared
/// `cat_threshold` array via `cat_boundaries`.
fn category_words(lgb_tree: &LgbTree, cat_idx: usize) -> Result<Vec<u32>, ParseError> {
    if cat_idx + 1 >= lgb_tree.cat_boundaries.len() {
        return Err(ParseError::InvalidValue {
            field: "threshold",
            message: format!("categorical split index {cat_idx} out of range"),
        });
    }
    let start = lgb_tree.cat_boundaries[cat_idx] as usize;
    let end = lgb_tree.cat_boundaries[cat_idx + 1] as usize;
    if start > end || end > lgb_tree.cat_threshold.len() {
        return Err(ParseError::WrongDimension {
            field: "cat_threshold",
            expected: end,
            actual: lgb_tree.cat_threshold.len(),
        });
    }
    Ok(lgb_tree.cat_threshold[start..end].to_vec())
}

#[cfg(test)]
mod tests {
    use super::super::from_str;
    use crate::error::{LoadError, ParseError};
    use crate::inference::predict;
    use crate::model::{PostProcessor, TaskType};
    use crate::utils::Parallelism;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    const HEADER: &str = "\
tree
version=v4
num_class=1
num_tree_per_iteration=1
label_index=0
max_feature_idx=1
objective=regression
feature_names=f0 f1
";

    fn stump(threshold: f64, left_leaf: f64, right_leaf: f64) -> String {
        format!(
            "\nTree=0\nnum_leaves=2\nnum_cat=0\nsplit_feature=0\nthreshold={threshold}\n\
decision_type=2\nleft_child=-1\nright_child=-2\nleaf_value={left_leaf} {right_leaf}\n\
is_linear=0\nshrinkage=1\n\nend of trees\n"
        )
    }

    #[test]
    fn regression_stump_predicts_with_boundary_on_left() {
        let model = from_str(&format!("{HEADER}{}", stump(2.5, 1.0, 3.0))).unwrap();
        assert_eq!(model.task_type, TaskType::Regressor);
        assert_eq!(model.num_feature, 2);

        let rows = array![[2.5f32, 0.0], [2.6, 0.0], [f32::NAN, 0.0]];
        let out = predict(&model, rows.view(), false, Parallelism::Sequential).unwrap();
        // `<=` semantics: 2.5 stays left; NaN reads as 0.0 (missing type
        // None) and 0.0 <= 2.5 keeps it left.
        assert_abs_diff_eq!(out[[0, 0, 0]], 1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(out[[1, 0, 0]], 3.0, epsilon = 1e-6);
        assert_abs_diff_eq!(out[[2, 0, 0]], 1.0, epsilon = 1e-6);
    }

    #[test]
    fn binary_objective_sets_sigmoid_and_alpha() {
        let content = format!("{HEADER}{}", stump(2.5, -1.0, 1.0))
            .replace("objective=regression", "objective=binary sigmoid:2");
        let model = from_str(&content).unwrap();
        assert_eq!(model.task_type, TaskType::BinaryClf);
        assert_eq!(model.postprocessor, PostProcessor::Sigmoid);
        assert_eq!(model.sigmoid_alpha, 2.0);

        let rows = array![[0.0f32, 0.0]];
        let margin = predict(&model, rows.view(), true, Parallelism::Sequential).unwrap();
        let prob = predict(&model, rows.view(), false, Parallelism::Sequential).unwrap();
        assert_abs_diff_eq!(margin[[0, 0, 0]], -1.0, epsilon = 1e-6);
        // sigmoid(2 * -1)
        assert_abs_diff_eq!(prob[[0, 0, 0]], 1.0 / (1.0 + 2.0f32.exp()), epsilon = 1e-6);
    }

    #[test]
    fn multiclass_interleaves_class_ids() {
        let mut content = String::from(
            "tree\nversion=v4\nnum_class=3\nnum_tree_per_iteration=3\nmax_feature_idx=0\n\
objective=multiclass num_class:3\n",
        );
        for (i, leaf) in [0.5f64, 1.5, 2.5, 0.25, 0.75, 1.25].iter().enumerate() {
            content.push_str(&format!("\nTree={i}\nnum_leaves=1\nnum_cat=0\nleaf_value={leaf}\n"));
        }
        content.push_str("\nend of trees\n");

        let model = from_str(&content).unwrap();
        assert_eq!(model.task_type, TaskType::MultiClf);
        assert_eq!(model.postprocessor, PostProcessor::Softmax);
        assert_eq!(&*model.class_id, &[0, 1, 2, 0, 1, 2]);

        let rows = array![[0.0f32]];
        let out = predict(&model, rows.view(), true, Parallelism::Sequential).unwrap();
        assert_abs_diff_eq!(out[[0, 0, 0]], 0.75, epsilon = 1e-6);
        assert_abs_diff_eq!(out[[0, 0, 1]], 2.25, epsilon = 1e-6);
        assert_abs_diff_eq!(out[[0, 0, 2]], 3.75, epsilon = 1e-6);
    }

    #[test]
    fn categorical_split_routes_in_set_categories_left() {
        // Categories 0 and 2 are in the bitset (word 5); LightGBM sends
        // them to left_child, here leaf value 1.0.
        let content = format!(
            "{HEADER}\nTree=0\nnum_leaves=2\nnum_cat=1\nsplit_feature=0\nthreshold=0\n\
decision_type=1\nleft_child=-1\nright_child=-2\nleaf_value=1.0 3.0\n\
cat_boundaries=0 1\ncat_threshold=5\nis_linear=0\n\nend of trees\n"
        );
        let model = from_str(&content).unwrap();
        assert!(model.trees[0].has_categorical_split());

        let rows = array![[0.0f32, 0.0], [1.0, 0.0], [2.0, 0.0]];
        let out = predict(&model, rows.view(), false, Parallelism::Sequential).unwrap();
        assert_abs_diff_eq!(out[[0, 0, 0]], 1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(out[[1, 0, 0]], 3.0, epsilon = 1e-6);
        assert_abs_diff_eq!(out[[2, 0, 0]], 1.0, epsilon = 1e-6);
    }

    #[test]
    fn missing_type_none_sends_nan_where_zero_goes() {
        // decision_type=2: default_left bit set, missing type None. The
        // default bit is ignored; NaN compares as 0.0 against the threshold.
        let below = from_str(&format!("{HEADER}{}", stump(2.5, 1.0, 3.0))).unwrap();
        let above = from_str(&format!("{HEADER}{}", stump(-1.0, 1.0, 3.0))).unwrap();

        let rows = array![[f32::NAN, 0.0]];
        let out = predict(&below, rows.view(), false, Parallelism::Sequential).unwrap();
        assert_abs_diff_eq!(out[[0, 0, 0]], 1.0, epsilon = 1e-6);
        let out = predict(&above, rows.view(), false, Parallelism::Sequential).unwrap();
        assert_abs_diff_eq!(out[[0, 0, 0]], 3.0, epsilon = 1e-6);
    }

    #[test]
    fn missing_type_nan_follows_default_bit() {
        // decision_type=8: missing type NaN, default bit unset, so NaN goes
        // right even though 0.0 <= 2.5 would keep it left.
        let content =
            format!("{HEADER}{}", stump(2.5, 1.0, 3.0)).replace("decision_type=2", "decision_type=8");
        let model = from_str(&content).unwrap();

        let rows = array![[f32::NAN, 0.0], [0.0, 0.0]];
        let out = predict(&model, rows.view(), false, Parallelism::Sequential).unwrap();
        assert_abs_diff_eq!(out[[0, 0, 0]], 3.0, epsilon = 1e-6);
        assert_abs_diff_eq!(out[[1, 0, 0]], 1.0, epsilon = 1e-6);
    }

    #[test]
    fn categorical_nan_reads_as_category_zero() {
        fn categorical_stump(cat_threshold: u32) -> String {
            format!(
                "{HEADER}\nTree=0\nnum_leaves=2\nnum_cat=1\nsplit_feature=0\nthreshold=0\n\
decision_type=1\nleft_child=-1\nright_child=-2\nleaf_value=1.0 3.0\n\
cat_boundaries=0 1\ncat_threshold={cat_threshold}\nis_linear=0\n\nend of trees\n"
            )
        }

        let rows = array![[f32::NAN, 0.0]];
        // Set {0, 2}: category 0 goes left, so NaN does too.
        let model = from_str(&categorical_stump(5)).unwrap();
        let out = predict(&model, rows.view(), false, Parallelism::Sequential).unwrap();
        assert_abs_diff_eq!(out[[0, 0, 0]], 1.0, epsilon = 1e-6);
        // Set {2}: category 0 goes right.
        let model = from_str(&categorical_stump(4)).unwrap();
        let out = predict(&model, rows.view(), false, Parallelism::Sequential).unwrap();
        assert_abs_diff_eq!(out[[0, 0, 0]], 3.0, epsilon = 1e-6);
    }

    #[test]
    fn average_output_divides_by_tree_count() {
        let content = "tree\nversion=v4\nnum_class=1\nnum_tree_per_iteration=1\nmax_feature_idx=0\n\
objective=regression\naverage_output\n\
\nTree=0\nnum_leaves=1\nnum_cat=0\nleaf_value=2.0\n\
\nTree=1\nnum_leaves=1\nnum_cat=0\nleaf_value=4.0\n\nend of trees\n";
        let model = from_str(content).unwrap();
        assert!(model.average_tree_output);

        let rows = array![[0.0f32]];
        let out = predict(&model, rows.view(), false, Parallelism::Sequential).unwrap();
        assert_abs_diff_eq!(out[[0, 0, 0]], 3.0, epsilon = 1e-6);
    }

    #[test]
    fn linear_trees_are_rejected() {
        let content = format!("{HEADER}{}", stump(2.5, 1.0, 3.0)).replace("is_linear=0", "is_linear=1");
        let err = from_str(&content).unwrap_err();
        assert!(matches!(err, LoadError::Unsupported(_)));
        assert!(err.to_string().contains("linear trees"));
    }

    #[test]
    fn unknown_objective_is_an_error() {
        let content =
            format!("{HEADER}{}", stump(2.5, 1.0, 3.0)).replace("objective=regression", "objective=mystery");
        assert!(matches!(
            from_str(&content),
            Err(LoadError::Parse(ParseError::UnknownObjective(name))) if name == "mystery"
        ));
    }
}
