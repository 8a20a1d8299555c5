//! LightGBM text model loader.
//!
//! Parses the line-oriented `model.txt` format written by `save_model()` and
//! converts it into the native [`Model`](crate::model::Model). Parsing and
//! conversion are split: [`text`] mirrors the file structure, [`convert`]
//! maps it onto the shared representation.

mod convert;
mod text;

use std::path::Path;

use crate::error::{LoadError, ParseError};
use crate::model::Model;

/// Load a model from LightGBM model text.
pub fn from_str(content: &str) -> Result<Model, LoadError> {
    let parsed = text::LgbModel::parse(content)?;
    convert::model_from_lgb(&parsed)
}

/// Load a model from a LightGBM `model.txt` file.
pub fn from_file(path: impl AsRef<Path>) -> Result<Model, LoadError> {
    let content = std::fs::read_to_string(path).map_err(ParseError::from)?;
    from_str(&content)
}
