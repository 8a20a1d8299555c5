//! Format parsers: each translates one serialized model format (or in-memory
//! estimator export) into the native [`crate::model::Model`].

pub mod lightgbm;
pub mod sklearn;
pub mod xgboost;
