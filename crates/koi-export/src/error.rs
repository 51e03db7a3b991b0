//! Export and import errors.

use koi_metrics::AppraisalError;

/// Errors from reading or writing the on-disk formats.
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    /// The label table has no header line.
    #[error("label table is empty")]
    EmptyTable,

    /// The label table header lacks a required column.
    #[error("label table has no {0} column")]
    MissingColumn(&'static str),

    /// JSON (de)serialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Loaded data failed validation.
    #[error(transparent)]
    Appraisal(#[from] AppraisalError),
}
