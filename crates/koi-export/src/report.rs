//! Training report (JSON).

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use koi_metrics::{RegressionMetrics, SkippedRow, TrainingOutcome};
use serde::{Deserialize, Serialize};

use crate::{ExportError, RejectedLine};

/// Summary of one training run, written next to the model file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingReport {
    /// When training finished.
    pub trained_at: DateTime<Utc>,
    /// Feature schema the model was fitted against.
    pub schema_version: u32,
    /// Data lines in the label table. Always `rows_used + rows_skipped`.
    pub rows_total: usize,
    /// Rows that produced features.
    pub rows_used: usize,
    /// Lines excluded from fitting, rejected label lines included.
    pub rows_skipped: usize,
    /// Lines of `rows_skipped` that never parsed as a row.
    pub rows_rejected: usize,
    /// Rows used for fitting.
    pub training_rows: usize,
    /// Rows held out for validation.
    pub validation_rows: usize,
    /// `metrics` describe the training rows because nothing was held out.
    pub evaluated_on_training: bool,
    /// Fit quality on the validation rows.
    pub metrics: RegressionMetrics,
    /// Fit quality on the training rows.
    pub training_metrics: RegressionMetrics,
    /// Column order of the model.
    pub feature_names: Vec<String>,
    /// Coefficient per feature.
    pub coefficients: BTreeMap<String, f64>,
    /// Model intercept.
    pub intercept: f64,
    /// Why each skipped row was excluded. Rejected label lines are
    /// listed as `line N`.
    pub skipped: Vec<SkippedRow>,
}

impl TrainingReport {
    /// Summarise `outcome`, counting `rejected` label lines as skipped.
    #[must_use]
    pub fn new(
        outcome: &TrainingOutcome,
        rejected: &[RejectedLine],
        trained_at: DateTime<Utc>,
    ) -> Self {
        let model = &outcome.model;
        let skipped: Vec<SkippedRow> = rejected
            .iter()
            .map(|r| SkippedRow {
                reference: format!("line {}", r.line),
                reason: r.reason.clone(),
            })
            .chain(outcome.skipped.iter().cloned())
            .collect();
        Self {
            trained_at,
            schema_version: model.schema_version,
            rows_total: outcome.rows_used + skipped.len(),
            rows_used: outcome.rows_used,
            rows_skipped: skipped.len(),
            rows_rejected: rejected.len(),
            training_rows: outcome.training_rows,
            validation_rows: outcome.validation_rows,
            evaluated_on_training: outcome.evaluated_on_training,
            metrics: outcome.metrics,
            training_metrics: outcome.training_metrics,
            feature_names: model.feature_names.clone(),
            coefficients: model
                .coefficients_by_name()
                .into_iter()
                .map(|(name, value)| (name.to_owned(), value))
                .collect(),
            intercept: model.intercept,
            skipped,
        }
    }

    /// Pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Returns [`ExportError::Json`] if serialization fails.
    pub fn to_json(&self) -> Result<String, ExportError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::TimeZone;
    use koi_metrics::{FEATURE_COUNT, RegressionModel};

    use super::*;

    fn outcome() -> TrainingOutcome {
        let mut coefficients = [0.0; FEATURE_COUNT];
        coefficients[0] = 150.0;
        coefficients[8] = 900.0;
        let metrics = RegressionMetrics {
            r2: 0.8,
            mae: 120.0,
            mse: 20_000.0,
            rmse: 141.4,
        };
        TrainingOutcome {
            model: RegressionModel::new(coefficients, 300.0),
            metrics,
            training_metrics: metrics,
            rows_used: 10,
            training_rows: 8,
            validation_rows: 2,
            skipped: vec![SkippedRow {
                reference: "koi_007.jpg".into(),
                reason: "no reference coin detected".into(),
            }],
            evaluated_on_training: false,
        }
    }

    #[test]
    fn report_names_coefficients() {
        let at = Utc.with_ymd_and_hms(2026, 10, 18, 12, 0, 0).unwrap();
        let report = TrainingReport::new(&outcome(), &[], at);
        assert_eq!(report.rows_total, 11);
        assert_eq!(report.rows_skipped, 1);
        assert_eq!(report.rows_rejected, 0);
        assert_eq!(report.feature_names.len(), FEATURE_COUNT);
        assert!((report.coefficients["size_cm"] - 150.0).abs() < f64::EPSILON);
        assert!((report.coefficients["symmetry_score"] - 900.0).abs() < f64::EPSILON);
        assert!((report.intercept - 300.0).abs() < f64::EPSILON);
    }

    #[test]
    fn json_carries_timestamp_and_reasons() {
        let at = Utc.with_ymd_and_hms(2026, 10, 18, 12, 0, 0).unwrap();
        let json = TrainingReport::new(&outcome(), &[], at).to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["trained_at"], "2026-10-18T12:00:00Z");
        assert_eq!(value["skipped"][0]["reference"], "koi_007.jpg");
        assert_eq!(value["metrics"]["r2"], 0.8);
        let back: TrainingReport = serde_json::from_str(&json).unwrap();
        assert_eq!(back.trained_at, at);
    }

    #[test]
    fn rejected_lines_count_as_skipped() {
        let at = Utc.with_ymd_and_hms(2026, 10, 18, 12, 0, 0).unwrap();
        let rejected = [RejectedLine {
            line: 4,
            reason: "price \"n/a\" is not a number".into(),
        }];
        let report = TrainingReport::new(&outcome(), &rejected, at);
        assert_eq!(report.rows_total, 12);
        assert_eq!(report.rows_skipped, 2);
        assert_eq!(report.rows_rejected, 1);
        assert_eq!(report.rows_used + report.rows_skipped, report.rows_total);
        assert_eq!(report.skipped[0].reference, "line 4");
        assert_eq!(report.skipped[1].reference, "koi_007.jpg");
    }
}
