//! Error taxonomy shared by the parsers and the inference engine.
//!
//! Each failure condition crosses the crate boundary as its own named type:
//!
//! - [`ParseError`] - malformed or truncated model artifact
//! - [`UnknownFieldError`] - unrecognized JSON field in strict mode
//! - [`UnsupportedFeatureError`] - recognized but unimplemented model feature
//! - [`CorruptModelError`] - internal invariant violation in a constructed model
//! - [`InvalidInputError`] - caller-supplied rows inconsistent with the model
//!
//! Parsers return [`LoadError`], the engine returns [`PredictError`]; both are
//! thin sums over the taxonomy so callers can match on the precise condition.

use thiserror::Error;

/// Malformed or truncated serialized model artifact.
///
/// Always fatal to the load call; no partially constructed model is returned.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("invalid value for {field}: {message}")]
    InvalidValue {
        field: &'static str,
        message: String,
    },

    /// A per-node array whose length disagrees with the declared node count.
    #[error("field {field} has an incorrect dimension; expected {expected}, got {actual}")]
    WrongDimension {
        field: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("unexpected end of input while reading {context}")]
    Truncated { context: &'static str },

    /// Objective string not in the recognized set. Never silently defaulted.
    #[error("unrecognized objective: {0}")]
    UnknownObjective(String),
}

/// JSON field outside the recognized schema, raised only when
/// `allow_unknown_field` is false.
#[derive(Debug, Error)]
#[error("key \"{key}\" is not recognized (at {path})")]
pub struct UnknownFieldError {
    /// Dotted path of the enclosing object, `$` for the document root.
    pub path: String,
    /// The offending key.
    pub key: String,
}

/// Recognized-but-unimplemented model feature, raised at import time so the
/// caller never receives a silently wrong model.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct UnsupportedFeatureError(pub String);

/// Structural invariant violation in a model, detected either by eager
/// validation after parsing or during traversal. Always fatal.
#[derive(Debug, Error)]
pub enum CorruptModelError {
    #[error("tree {tree} has no nodes")]
    EmptyTree { tree: usize },

    #[error("tree {tree}: node {node} references {side} child {child} but tree has {n_nodes} nodes")]
    ChildOutOfBounds {
        tree: usize,
        node: u32,
        side: &'static str,
        child: u32,
        n_nodes: usize,
    },

    #[error("tree {tree}: node {node} references itself as a child")]
    SelfLoop { tree: usize, node: u32 },

    #[error("tree {tree}: node {node} is reachable by more than one path")]
    DuplicateVisit { tree: usize, node: u32 },

    #[error("tree {tree}: cycle detected at node {node}")]
    CycleDetected { tree: usize, node: u32 },

    #[error("tree {tree}: node {node} is unreachable from the root")]
    UnreachableNode { tree: usize, node: u32 },

    #[error("tree {tree}: categorical segments length {segments_len} does not match node count {n_nodes}")]
    CategoricalSegmentsMismatch {
        tree: usize,
        segments_len: usize,
        n_nodes: usize,
    },

    #[error("tree {tree}: node {node} splits on feature {feature} but the model declares {num_feature} features")]
    FeatureOutOfRange {
        tree: usize,
        node: u32,
        feature: u32,
        num_feature: u32,
    },

    #[error("tree {tree}: leaf width {leaf_len} does not match leaf_vector_shape {expected}")]
    LeafShapeMismatch {
        tree: usize,
        leaf_len: u32,
        expected: u32,
    },

    #[error("tree {tree}: target_id {target_id} out of range for {num_target} targets")]
    TargetIdOutOfRange {
        tree: usize,
        target_id: i32,
        num_target: u32,
    },

    #[error("tree {tree}: class_id {class_id} out of range for {num_class} classes")]
    ClassIdOutOfRange {
        tree: usize,
        class_id: i32,
        num_class: u32,
    },

    #[error("model has {n_trees} trees but {field} has {actual} entries")]
    TreeMetadataMismatch {
        field: &'static str,
        n_trees: usize,
        actual: usize,
    },

    #[error("base_scores has {actual} entries, expected num_target * max_num_class = {expected}")]
    BaseScoresMismatch { expected: usize, actual: usize },

    /// Traversal took more steps than the tree has nodes; only possible for a
    /// cyclic tree that escaped validation.
    #[error("tree {tree}: traversal exceeded {n_nodes} steps without reaching a leaf")]
    TraversalOverrun { tree: usize, n_nodes: usize },
}

/// Caller-supplied row data inconsistent with the model metadata.
#[derive(Debug, Error)]
pub enum InvalidInputError {
    #[error("input has {actual} columns but the model expects {expected} features")]
    WrongNumFeatures { expected: usize, actual: usize },
}

/// Any failure while loading a model artifact.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    UnknownField(#[from] UnknownFieldError),
    #[error(transparent)]
    Unsupported(#[from] UnsupportedFeatureError),
    #[error(transparent)]
    Corrupt(#[from] CorruptModelError),
}

impl From<serde_json::Error> for LoadError {
    fn from(e: serde_json::Error) -> Self {
        LoadError::Parse(ParseError::Json(e))
    }
}

impl From<std::io::Error> for LoadError {
    fn from(e: std::io::Error) -> Self {
        LoadError::Parse(ParseError::Io(e))
    }
}

/// Any failure while running predictions.
#[derive(Debug, Error)]
pub enum PredictError {
    #[error(transparent)]
    Input(#[from] InvalidInputError),
    #[error(transparent)]
    Corrupt(#[from] CorruptModelError),
}
