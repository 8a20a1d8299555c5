//! Canonical tree storage (SoA) and parser-side construction.

use ndarray::ArrayView1;

use crate::error::CorruptModelError;

use super::categories::{categories_to_bitset, float_to_category, CategoriesStorage};
use super::node::SplitType;
use super::NodeId;

/// Structure-of-Arrays tree storage for cache-friendly traversal.
///
/// Nodes live in flat parallel arrays; child indices are local to this tree
/// and node 0 is the root. Leaf values have a uniform per-leaf width
/// `leaf_len` (1 for scalar-leaf models, `num_class` for vector-leaf models)
/// and are stored as one flat `n_nodes * leaf_len` array.
#[derive(Debug, Clone)]
pub struct Tree {
    split_indices: Box<[u32]>,
    thresholds: Box<[f32]>,
    left_children: Box<[u32]>,
    right_children: Box<[u32]>,
    default_left: Box<[bool]>,
    is_leaf: Box<[bool]>,
    split_types: Box<[SplitType]>,
    categories: CategoriesStorage,
    leaf_len: u32,
    leaf_values: Box<[f32]>,
}

impl Tree {
    /// Number of nodes in the tree.
    #[inline]
    pub fn n_nodes(&self) -> usize {
        self.is_leaf.len()
    }

    /// Width of each leaf value vector.
    #[inline]
    pub fn leaf_len(&self) -> u32 {
        self.leaf_len
    }

    #[inline]
    pub fn is_leaf(&self, node: NodeId) -> bool {
        self.is_leaf[node as usize]
    }

    #[inline]
    pub fn split_index(&self, node: NodeId) -> u32 {
        self.split_indices[node as usize]
    }

    #[inline]
    pub fn threshold(&self, node: NodeId) -> f32 {
        self.thresholds[node as usize]
    }

    #[inline]
    pub fn left_child(&self, node: NodeId) -> NodeId {
        self.left_children[node as usize]
    }

    #[inline]
    pub fn right_child(&self, node: NodeId) -> NodeId {
        self.right_children[node as usize]
    }

    #[inline]
    pub fn default_left(&self, node: NodeId) -> bool {
        self.default_left[node as usize]
    }

    #[inline]
    pub fn split_type(&self, node: NodeId) -> SplitType {
        self.split_types[node as usize]
    }

    #[inline]
    pub fn categories(&self) -> &CategoriesStorage {
        &self.categories
    }

    /// Check if the tree has any categorical splits.
    pub fn has_categorical_split(&self) -> bool {
        self.split_types
            .iter()
            .any(|t| matches!(t, SplitType::Categorical))
    }

    /// Leaf value vector at a leaf node.
    #[inline]
    pub fn leaf_values(&self, node: NodeId) -> &[f32] {
        let w = self.leaf_len as usize;
        let start = node as usize * w;
        &self.leaf_values[start..start + w]
    }

    /// Traverse from the root to the leaf selected by `row`.
    ///
    /// Missing values (NaN) follow the node's default direction; numeric
    /// splits take the left child when `value < threshold`; categorical
    /// splits take the right child when the category bit is set. Values that
    /// cannot name a stored category (negative, or too large to represent
    /// exactly) match nothing and take the left child.
    ///
    /// Returns `None` if traversal takes more steps than the tree has nodes,
    /// which can only happen for a cyclic tree that escaped validation.
    #[inline]
    pub fn leaf_for_row(&self, row: ArrayView1<'_, f32>) -> Option<NodeId> {
        let mut node: NodeId = 0;
        let mut steps = 0usize;
        let budget = self.n_nodes();

        while !self.is_leaf(node) {
            if steps >= budget {
                return None;
            }
            steps += 1;

            let fvalue = row[self.split_index(node) as usize];

            node = if fvalue.is_nan() {
                if self.default_left(node) {
                    self.left_child(node)
                } else {
                    self.right_child(node)
                }
            } else {
                match self.split_type(node) {
                    SplitType::Numeric => {
                        if fvalue < self.threshold(node) {
                            self.left_child(node)
                        } else {
                            self.right_child(node)
                        }
                    }
                    SplitType::Categorical => {
                        let matched = float_to_category(fvalue)
                            .map_or(false, |category| {
                                self.categories.category_goes_right(node, category)
                            });
                        if matched {
                            self.right_child(node)
                        } else {
                            self.left_child(node)
                        }
                    }
                }
            };
        }

        Some(node)
    }

    /// Validate structural invariants. `tree_idx` only labels the errors.
    ///
    /// Checks: non-empty, children in bounds, no self-loops, every node
    /// reached exactly once from the root (no cycles, no sharing), and the
    /// categorical segments array sized to the node count when categorical
    /// splits are present.
    pub fn validate(&self, tree_idx: usize) -> Result<(), CorruptModelError> {
        let n_nodes = self.n_nodes();
        if n_nodes == 0 {
            return Err(CorruptModelError::EmptyTree { tree: tree_idx });
        }

        if self.has_categorical_split() {
            let segments_len = self.categories.segments().len();
            if segments_len != n_nodes {
                return Err(CorruptModelError::CategoricalSegmentsMismatch {
                    tree: tree_idx,
                    segments_len,
                    n_nodes,
                });
            }
        }

        // Iterative DFS with color marking.
        // 0 = unvisited, 1 = visiting, 2 = done
        let mut color = vec![0u8; n_nodes];
        let mut stack: Vec<(NodeId, u8)> = vec![(0, 0)];

        while let Some((node, phase)) = stack.pop() {
            let node_usize = node as usize;

            match phase {
                0 => {
                    match color[node_usize] {
                        0 => {}
                        1 => return Err(CorruptModelError::CycleDetected { tree: tree_idx, node }),
                        _ => return Err(CorruptModelError::DuplicateVisit { tree: tree_idx, node }),
                    }

                    color[node_usize] = 1;
                    stack.push((node, 1));

                    if !self.is_leaf(node) {
                        let left = self.left_child(node);
                        let right = self.right_child(node);

                        if left == node || right == node {
                            return Err(CorruptModelError::SelfLoop { tree: tree_idx, node });
                        }

                        for (side, child) in [("left", left), ("right", right)] {
                            if child as usize >= n_nodes {
                                return Err(CorruptModelError::ChildOutOfBounds {
                                    tree: tree_idx,
                                    node,
                                    side,
                                    child,
                                    n_nodes,
                                });
                            }
                        }

                        stack.push((right, 0));
                        stack.push((left, 0));
                    }
                }
                _ => {
                    color[node_usize] = 2;
                }
            }
        }

        for (i, &c) in color.iter().enumerate() {
            if c == 0 {
                return Err(CorruptModelError::UnreachableNode {
                    tree: tree_idx,
                    node: i as u32,
                });
            }
        }

        Ok(())
    }
}

/// Smallest f32 strictly greater than `x`.
///
/// Used to reconcile formats whose native comparison is `value <= threshold`
/// (LightGBM, scikit-learn) with the uniform `value < threshold` rule:
/// storing `next_up(threshold)` makes boundary decisions match.
#[inline]
pub fn next_up_f32(x: f32) -> f32 {
    if x.is_nan() || x == f32::INFINITY {
        return x;
    }
    if x == -0.0 {
        return f32::from_bits(1);
    }

    let bits = x.to_bits();
    if x >= 0.0 {
        f32::from_bits(bits + 1)
    } else {
        f32::from_bits(bits - 1)
    }
}

/// Parser-side tree construction with explicit node indices.
///
/// Parsers know their node layout up front; the builder records nodes at
/// arbitrary indices (forward references to children are fine) and
/// [`TreeBuilder::build`] assembles the SoA arrays and the packed categorical
/// storage. Untouched node slots default to leaves with zero values, so a
/// builder must set every node it declared.
#[derive(Debug)]
pub struct TreeBuilder {
    n_nodes: usize,
    leaf_len: u32,
    split_indices: Vec<u32>,
    thresholds: Vec<f32>,
    left_children: Vec<u32>,
    right_children: Vec<u32>,
    default_left: Vec<bool>,
    is_leaf: Vec<bool>,
    split_types: Vec<SplitType>,
    node_categories: Vec<Vec<u32>>,
    leaf_values: Vec<f32>,
}

impl TreeBuilder {
    /// Create a builder for a tree with `n_nodes` nodes and scalar leaves.
    pub fn new(n_nodes: usize) -> Self {
        Self::with_leaf_len(n_nodes, 1)
    }

    /// Create a builder for a tree with vector leaves of width `leaf_len`.
    pub fn with_leaf_len(n_nodes: usize, leaf_len: u32) -> Self {
        Self {
            n_nodes,
            leaf_len,
            split_indices: vec![0; n_nodes],
            thresholds: vec![0.0; n_nodes],
            left_children: vec![0; n_nodes],
            right_children: vec![0; n_nodes],
            default_left: vec![false; n_nodes],
            is_leaf: vec![true; n_nodes],
            split_types: vec![SplitType::Numeric; n_nodes],
            node_categories: vec![Vec::new(); n_nodes],
            leaf_values: vec![0.0; n_nodes * leaf_len as usize],
        }
    }

    /// Record a numeric split at `node`.
    pub fn numeric_split(
        &mut self,
        node: NodeId,
        feature: u32,
        threshold: f32,
        default_left: bool,
        left: NodeId,
        right: NodeId,
    ) {
        let i = node as usize;
        self.is_leaf[i] = false;
        self.split_types[i] = SplitType::Numeric;
        self.split_indices[i] = feature;
        self.thresholds[i] = threshold;
        self.default_left[i] = default_left;
        self.left_children[i] = left;
        self.right_children[i] = right;
    }

    /// Record a categorical split at `node`; `categories` lists the category
    /// values that route right.
    pub fn categorical_split(
        &mut self,
        node: NodeId,
        feature: u32,
        categories: &[u32],
        default_left: bool,
        left: NodeId,
        right: NodeId,
    ) {
        let i = node as usize;
        self.is_leaf[i] = false;
        self.split_types[i] = SplitType::Categorical;
        self.split_indices[i] = feature;
        self.default_left[i] = default_left;
        self.left_children[i] = left;
        self.right_children[i] = right;
        self.node_categories[i] = categories_to_bitset(categories);
    }

    /// Record a categorical split from an already packed bitset.
    pub fn categorical_split_bitset(
        &mut self,
        node: NodeId,
        feature: u32,
        bitset: Vec<u32>,
        default_left: bool,
        left: NodeId,
        right: NodeId,
    ) {
        let i = node as usize;
        self.is_leaf[i] = false;
        self.split_types[i] = SplitType::Categorical;
        self.split_indices[i] = feature;
        self.default_left[i] = default_left;
        self.left_children[i] = left;
        self.right_children[i] = right;
        self.node_categories[i] = bitset;
    }

    /// Record a scalar leaf at `node`.
    ///
    /// # Panics
    /// Panics if the builder was created with `leaf_len != 1`.
    pub fn leaf(&mut self, node: NodeId, value: f32) {
        assert_eq!(self.leaf_len, 1, "scalar leaf on a vector-leaf tree");
        self.is_leaf[node as usize] = true;
        self.leaf_values[node as usize] = value;
    }

    /// Record a vector leaf at `node`.
    ///
    /// # Panics
    /// Panics if `values.len()` differs from the builder's leaf width.
    pub fn vector_leaf(&mut self, node: NodeId, values: &[f32]) {
        let w = self.leaf_len as usize;
        assert_eq!(values.len(), w, "leaf value width mismatch");
        self.is_leaf[node as usize] = true;
        let start = node as usize * w;
        self.leaf_values[start..start + w].copy_from_slice(values);
    }

    /// Assemble the immutable tree.
    pub fn build(self) -> Tree {
        let has_categorical = self.node_categories.iter().any(|c| !c.is_empty());
        let categories = if has_categorical {
            let mut words = Vec::new();
            let mut segments = Vec::with_capacity(self.n_nodes);
            for node_bits in &self.node_categories {
                if node_bits.is_empty() {
                    segments.push((0u32, 0u32));
                } else {
                    segments.push((words.len() as u32, node_bits.len() as u32));
                    words.extend_from_slice(node_bits);
                }
            }
            CategoriesStorage::new(words, segments)
        } else {
            CategoriesStorage::empty()
        };

        Tree {
            split_indices: self.split_indices.into_boxed_slice(),
            thresholds: self.thresholds.into_boxed_slice(),
            left_children: self.left_children.into_boxed_slice(),
            right_children: self.right_children.into_boxed_slice(),
            default_left: self.default_left.into_boxed_slice(),
            is_leaf: self.is_leaf.into_boxed_slice(),
            split_types: self.split_types.into_boxed_slice(),
            categories,
            leaf_len: self.leaf_len,
            leaf_values: self.leaf_values.into_boxed_slice(),
        }
    }
}
