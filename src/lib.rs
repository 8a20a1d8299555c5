//! grove: framework-agnostic decision tree ensembles.
//!
//! A single in-memory representation for tree ensemble models, loaders that
//! map framework-specific formats onto it, and an inference engine that runs
//! any loaded model the same way.
//!
//! # Key Types
//!
//! - [`Model`] - The framework-independent ensemble
//! - [`predict`] / [`predict_leaf`] - Batch inference over `ndarray` rows
//! - [`compat`] - XGBoost (JSON and legacy binary), LightGBM text, and
//!   scikit-learn importers
//! - [`serializer::dump_json`] - Canonical JSON dump of a model
//!
//! # Loading Models
//!
//! Use `compat::xgboost::json::from_file` for XGBoost JSON models,
//! `compat::xgboost::binary::from_file` for the legacy binary format, and
//! `compat::lightgbm::from_file` for LightGBM `model.txt`. scikit-learn
//! estimators have no file format; `compat::sklearn` takes their tree arrays
//! as borrowed slices.
//!
//! # Inference
//!
//! [`predict`] returns an output cube of shape
//! `(num_row, num_target, max_num_class)`. Wrap calls in [`run_with_threads`]
//! to control the rayon pool, or pass [`Parallelism::Sequential`] directly.

// Re-export approx traits for users who want to compare predictions
pub use approx;

pub mod compat;
pub mod error;
pub mod inference;
pub mod model;
pub mod repr;
pub mod serializer;
pub mod utils;

// =============================================================================
// Convenience Re-exports
// =============================================================================

pub use model::{Model, PostProcessor, TaskType};

pub use inference::{predict, predict_leaf};

pub use error::{
    CorruptModelError, InvalidInputError, LoadError, ParseError, PredictError,
    UnknownFieldError, UnsupportedFeatureError,
};

// Shared utilities
pub use utils::{run_with_threads, Parallelism};
