//! CLI error type.

use std::path::{Path, PathBuf};

use koi_export::ExportError;
use koi_metrics::AppraisalError;

/// Anything that can stop a command.
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// A file could not be read or written.
    #[error("{}: {source}", path.display())]
    Io {
        /// The file involved.
        path: PathBuf,
        /// The underlying error.
        source: std::io::Error,
    },

    /// A JSON input file is malformed.
    #[error("{}: {source}", path.display())]
    Json {
        /// The file involved.
        path: PathBuf,
        /// The underlying error.
        source: serde_json::Error,
    },

    /// A mask image could not be opened.
    #[error("{}: {source}", path.display())]
    Mask {
        /// The mask file.
        path: PathBuf,
        /// The underlying error.
        source: image::ImageError,
    },

    /// The appraisal itself failed.
    #[error(transparent)]
    Appraisal(#[from] AppraisalError),

    /// A file format could not be read or written.
    #[error(transparent)]
    Export(#[from] ExportError),
}

impl CliError {
    pub fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    pub fn json(path: &Path, source: serde_json::Error) -> Self {
        Self::Json {
            path: path.to_path_buf(),
            source,
        }
    }

    /// Short machine-readable name of the failure.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Io { .. } => "io",
            Self::Json { .. } => "json",
            Self::Mask { .. } => "mask",
            Self::Appraisal(e) | Self::Export(ExportError::Appraisal(e)) => e.kind(),
            Self::Export(_) => "export",
        }
    }
}
