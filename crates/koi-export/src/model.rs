//! Price model persistence (JSON).
//!
//! The model file is the serde form of [`RegressionModel`]: schema
//! version, feature names, coefficients and intercept. Loading validates
//! it against the current feature schema so a stale model is refused
//! before it can be installed.

use koi_metrics::RegressionModel;

use crate::ExportError;

/// Pretty-printed model JSON.
///
/// # Errors
///
/// Returns [`ExportError::Json`] if serialization fails.
pub fn model_to_json(model: &RegressionModel) -> Result<String, ExportError> {
    Ok(serde_json::to_string_pretty(model)?)
}

/// Parse and validate a model file.
///
/// # Errors
///
/// Returns [`ExportError::Json`] for malformed JSON and
/// [`ExportError::Appraisal`] when the model does not match the current
/// feature schema.
pub fn model_from_json(json: &str) -> Result<RegressionModel, ExportError> {
    let model: RegressionModel = serde_json::from_str(json)?;
    model.validate()?;
    Ok(model)
}
