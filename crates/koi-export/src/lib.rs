//! koi-export: Pure format serializers (sans-IO)
//!
//! Reads and writes the files around an appraisal: the history CSV, the
//! training label table, the training report and the model file. Every
//! function works on strings; callers own the filesystem.

pub mod error;
pub mod history;
pub mod labels;
pub mod model;
pub mod report;

pub use error::ExportError;
pub use history::{HISTORY_COLUMNS, HISTORY_HEADER, history_row, needs_header, to_history_csv};
pub use labels::{LabelTable, RejectedLine, parse_label_table};
pub use model::{model_from_json, model_to_json};
pub use report::TrainingReport;
