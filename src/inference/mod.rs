//! Generic tree ensemble inference.
//!
//! Walks every tree of a [`Model`] for each input row, aggregates per-tree
//! contributions into `(target, class)` slots, and applies the model's
//! postprocessor. Rows are independent; the work is parallelized over the
//! row axis behind a [`Parallelism`] switch.

use std::sync::Mutex;

use ndarray::{Array2, Array3, ArrayView1, ArrayView2, ArrayViewMut2, Axis};

use crate::error::{CorruptModelError, InvalidInputError, PredictError};
use crate::model::Model;
use crate::repr::Tree;
use crate::utils::Parallelism;

/// Predict output values for a batch of rows.
///
/// `rows` has shape `(num_row, num_feature)` with NaN as the missing-value
/// sentinel. The result has shape `(num_row, num_target, max_num_class)`.
///
/// Per row, each tree's leaf contribution is scaled by its DART weight (if
/// any) and accumulated into the output slots selected by the tree's
/// `(target_id, class_id)` pair. If the model averages tree outputs, each
/// slot is divided by the number of trees contributing to it. Base scores are
/// added once per slot, after aggregation. Unless `pred_margin` is set, the
/// model's postprocessor then maps margins to the framework's output space.
pub fn predict(
    model: &Model,
    rows: ArrayView2<'_, f32>,
    pred_margin: bool,
    parallelism: Parallelism,
) -> Result<Array3<f32>, PredictError> {
    check_num_features(model, &rows)?;

    let n_rows = rows.nrows();
    let n_targets = model.num_target as usize;
    let max_class = model.max_num_class() as usize;

    let mut out = Array3::<f32>::zeros((n_rows, n_targets, max_class));
    let slot_counts = contribution_counts(model);
    let first_error: Mutex<Option<CorruptModelError>> = Mutex::new(None);

    let iter = out.axis_iter_mut(Axis(0)).zip(rows.axis_iter(Axis(0)));
    parallelism.maybe_par_bridge_for_each(iter, |(mut slab, row)| {
        if let Err(e) = predict_row(model, row, &mut slab) {
            let mut guard = first_error.lock().unwrap_or_else(|p| p.into_inner());
            guard.get_or_insert(e);
            return;
        }

        finalize_row(model, &slot_counts, pred_margin, &mut slab);
    });

    match first_error.into_inner().unwrap_or_else(|p| p.into_inner()) {
        Some(e) => Err(e.into()),
        None => Ok(out),
    }
}

/// Predict the terminal leaf index of every tree for a batch of rows.
///
/// The result has shape `(num_row, num_tree)`. Independent of the
/// postprocessor and of `pred_margin`; repeated calls on identical input
/// return identical indices.
pub fn predict_leaf(
    model: &Model,
    rows: ArrayView2<'_, f32>,
    parallelism: Parallelism,
) -> Result<Array2<u32>, PredictError> {
    check_num_features(model, &rows)?;

    let n_rows = rows.nrows();
    let n_trees = model.n_trees();
    let mut out = Array2::<u32>::zeros((n_rows, n_trees));
    let first_error: Mutex<Option<CorruptModelError>> = Mutex::new(None);

    let iter = out.axis_iter_mut(Axis(0)).zip(rows.axis_iter(Axis(0)));
    parallelism.maybe_par_bridge_for_each(iter, |(mut leaves, row)| {
        for (tree_idx, tree) in model.trees.iter().enumerate() {
            match traverse(tree, tree_idx, row) {
                Ok(leaf) => leaves[tree_idx] = leaf,
                Err(e) => {
                    let mut guard = first_error.lock().unwrap_or_else(|p| p.into_inner());
                    guard.get_or_insert(e);
                    return;
                }
            }
        }
    });

    match first_error.into_inner().unwrap_or_else(|p| p.into_inner()) {
        Some(e) => Err(e.into()),
        None => Ok(out),
    }
}

fn check_num_features(model: &Model, rows: &ArrayView2<'_, f32>) -> Result<(), InvalidInputError> {
    if rows.ncols() != model.num_feature as usize {
        return Err(InvalidInputError::WrongNumFeatures {
            expected: model.num_feature as usize,
            actual: rows.ncols(),
        });
    }
    Ok(())
}

#[inline]
fn traverse(
    tree: &Tree,
    tree_idx: usize,
    row: ArrayView1<'_, f32>,
) -> Result<u32, CorruptModelError> {
    tree.leaf_for_row(row)
        .ok_or(CorruptModelError::TraversalOverrun {
            tree: tree_idx,
            n_nodes: tree.n_nodes(),
        })
}

/// Accumulate every tree's contribution for one row into `slab`
/// (shape `(num_target, max_num_class)`).
fn predict_row(
    model: &Model,
    row: ArrayView1<'_, f32>,
    slab: &mut ArrayViewMut2<'_, f32>,
) -> Result<(), CorruptModelError> {
    for (tree_idx, tree) in model.trees.iter().enumerate() {
        let leaf = traverse(tree, tree_idx, row)?;
        let weight = model
            .tree_weights
            .as_ref()
            .map_or(1.0, |w| w[tree_idx]);

        scatter_leaf(
            model,
            tree.leaf_values(leaf),
            model.target_id[tree_idx],
            model.class_id[tree_idx],
            weight,
            slab,
        );
    }
    Ok(())
}

/// Route one leaf value vector into the output slots selected by the tree's
/// `(target_id, class_id)` pair. A `-1` id means the leaf vector spans that
/// axis; the vector is laid out row-major over `leaf_vector_shape`.
fn scatter_leaf(
    model: &Model,
    leaf: &[f32],
    target_id: i32,
    class_id: i32,
    weight: f32,
    slab: &mut ArrayViewMut2<'_, f32>,
) {
    let shape1 = model.leaf_vector_shape[1] as usize;
    match (target_id, class_id) {
        (-1, -1) => {
            for target in 0..model.num_target as usize {
                for class in 0..model.num_class[target] as usize {
                    slab[[target, class]] += weight * leaf[target * shape1 + class];
                }
            }
        }
        (-1, class) => {
            for target in 0..model.num_target as usize {
                slab[[target, class as usize]] += weight * leaf[target];
            }
        }
        (target, -1) => {
            for class in 0..model.num_class[target as usize] as usize {
                slab[[target as usize, class]] += weight * leaf[class];
            }
        }
        (target, class) => {
            slab[[target as usize, class as usize]] += weight * leaf[0];
        }
    }
}

/// Count how many trees contribute to each `(target, class)` slot.
///
/// Used to divide sums into averages for `average_tree_output` models; the
/// counts depend only on the model, not on the input rows.
fn contribution_counts(model: &Model) -> Array2<f32> {
    let n_targets = model.num_target as usize;
    let max_class = model.max_num_class() as usize;
    let mut counts = Array2::<f32>::zeros((n_targets, max_class));

    for tree_idx in 0..model.n_trees() {
        match (model.target_id[tree_idx], model.class_id[tree_idx]) {
            (-1, -1) => {
                for target in 0..n_targets {
                    for class in 0..model.num_class[target] as usize {
                        counts[[target, class]] += 1.0;
                    }
                }
            }
            (-1, class) => {
                for target in 0..n_targets {
                    counts[[target, class as usize]] += 1.0;
                }
            }
            (target, -1) => {
                for class in 0..model.num_class[target as usize] as usize {
                    counts[[target as usize, class]] += 1.0;
                }
            }
            (target, class) => {
                counts[[target as usize, class as usize]] += 1.0;
            }
        }
    }

    counts
}

/// Averaging, base scores, and (unless margins were requested) the
/// postprocessor, for one row's slab.
fn finalize_row(
    model: &Model,
    slot_counts: &Array2<f32>,
    pred_margin: bool,
    slab: &mut ArrayViewMut2<'_, f32>,
) {
    let n_targets = model.num_target as usize;
    let max_class = model.max_num_class() as usize;

    if model.average_tree_output {
        for target in 0..n_targets {
            for class in 0..max_class {
                let count = slot_counts[[target, class]];
                if count > 0.0 {
                    slab[[target, class]] /= count;
                }
            }
        }
    }

    for target in 0..n_targets {
        for class in 0..max_class {
            slab[[target, class]] += model.base_scores[target * max_class + class];
        }
    }

    if !pred_margin {
        for target in 0..n_targets {
            let n_class = model.num_class[target] as usize;
            let mut lane = slab.row_mut(target);
            let lane = lane
                .as_slice_mut()
                .expect("row of a standard-layout slab is contiguous");
            model
                .postprocessor
                .apply(&mut lane[..n_class], model.sigmoid_alpha, model.ratio_c);
        }
    }
}
