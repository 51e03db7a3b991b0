//! Fitting the price model from labeled photographs.
//!
//! Rows are turned into feature vectors by a caller-supplied extractor,
//! which must run the same code path as inference. Rows that fail
//! extraction are logged and skipped. The remaining rows are split
//! deterministically into training and validation sets, the columns are
//! standardized, and coefficients are solved by SVD least squares with an
//! optional ridge penalty. The fitted model is expressed in raw feature
//! units.

use std::hash::Hasher;

use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use siphasher::sip::SipHasher13;

use crate::config::TrainingConfig;
use crate::features::{FEATURE_COUNT, FeatureVector};
use crate::model::RegressionModel;
use crate::types::AppraisalError;

/// Columns whose standard deviation is below this are treated as
/// constant and get a zero coefficient.
const CONSTANT_COLUMN_STD: f64 = 1e-12;

/// Singular values below this are treated as zero by the solver.
const SVD_EPSILON: f64 = 1e-10;

/// One labeled photograph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingRow {
    /// Where the photograph (and its detections) can be found.
    pub reference: String,
    /// Observed market price.
    pub price: f64,
}

impl TrainingRow {
    /// Create a row.
    #[must_use]
    pub fn new(reference: impl Into<String>, price: f64) -> Self {
        Self {
            reference: reference.into(),
            price,
        }
    }
}

/// A row excluded from fitting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedRow {
    /// Image reference of the row.
    pub reference: String,
    /// Why it was skipped.
    pub reason: String,
}

/// Goodness of fit on the evaluation rows.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegressionMetrics {
    /// Coefficient of determination.
    pub r2: f64,
    /// Mean absolute error.
    pub mae: f64,
    /// Mean squared error.
    pub mse: f64,
    /// Root mean squared error.
    pub rmse: f64,
}

impl RegressionMetrics {
    /// Compare predictions against observed values.
    ///
    /// R² is 1 for a perfect fit. When the observed values have no
    /// variance and the fit is not perfect, R² is 0.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn evaluate(observed: &[f64], predicted: &[f64]) -> Self {
        let n = observed.len().min(predicted.len());
        if n == 0 {
            return Self {
                r2: 0.0,
                mae: 0.0,
                mse: 0.0,
                rmse: 0.0,
            };
        }
        let count = n as f64;
        let mean = observed[..n].iter().sum::<f64>() / count;
        let (mut abs, mut ss_res, mut ss_tot) = (0.0, 0.0, 0.0);
        for (y, p) in observed.iter().zip(predicted) {
            let err = y - p;
            abs += err.abs();
            ss_res = err.mul_add(err, ss_res);
            ss_tot = (y - mean).mul_add(y - mean, ss_tot);
        }
        let r2 = if ss_tot > 0.0 {
            1.0 - ss_res / ss_tot
        } else if ss_res == 0.0 {
            1.0
        } else {
            0.0
        };
        let mse = ss_res / count;
        Self {
            r2,
            mae: abs / count,
            mse,
            rmse: mse.sqrt(),
        }
    }
}

/// Everything a training run produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingOutcome {
    /// The fitted model.
    pub model: RegressionModel,
    /// Fit quality on the validation rows (or the training rows, see
    /// [`evaluated_on_training`](Self::evaluated_on_training)).
    pub metrics: RegressionMetrics,
    /// Fit quality on the training rows.
    pub training_metrics: RegressionMetrics,
    /// Rows that produced a feature vector.
    pub rows_used: usize,
    /// Rows used for fitting.
    pub training_rows: usize,
    /// Rows held out for validation.
    pub validation_rows: usize,
    /// Rows excluded, with reasons.
    pub skipped: Vec<SkippedRow>,
    /// No rows were held out, so [`metrics`](Self::metrics) describe the
    /// training rows.
    pub evaluated_on_training: bool,
}

struct Sample<'a> {
    reference: &'a str,
    values: [f64; FEATURE_COUNT],
    price: f64,
}

/// Fit a price model.
///
/// `extract` is called once per row, in parallel, and must be the same
/// feature extraction used for live appraisals. Its failures are
/// recorded as [`SkippedRow`]s.
///
/// # Errors
///
/// Returns [`AppraisalError::InvalidConfig`] for an invalid `config`, and
/// [`AppraisalError::InsufficientData`] when fewer than
/// [`min_rows`](TrainingConfig::min_rows) rows survive extraction.
pub fn train<F>(
    rows: &[TrainingRow],
    config: &TrainingConfig,
    extract: F,
) -> Result<TrainingOutcome, AppraisalError>
where
    F: Fn(&TrainingRow) -> Result<FeatureVector, AppraisalError> + Sync,
{
    if !(0.0..1.0).contains(&config.validation_split) || config.min_rows < 2 {
        return Err(AppraisalError::InvalidConfig(format!(
            "training config out of range: {config:?}"
        )));
    }

    let extracted: Vec<Result<Sample<'_>, AppraisalError>> = rows
        .par_iter()
        .map(|row| extract_row(row, &extract))
        .collect();

    let mut samples = Vec::with_capacity(rows.len());
    let mut skipped = Vec::new();
    for result in extracted {
        match result {
            Ok(sample) => samples.push(sample),
            Err(AppraisalError::RowExtraction { reference, reason }) => {
                tracing::warn!(%reference, %reason, "skipping training row");
                skipped.push(SkippedRow { reference, reason });
            }
            Err(other) => return Err(other),
        }
    }

    if samples.len() < config.min_rows {
        return Err(AppraisalError::InsufficientData {
            usable: samples.len(),
            required: config.min_rows,
        });
    }

    let rows_used = samples.len();
    let (training, validation) = split(samples, config);
    let model = fit(&training, config.ridge_lambda);

    let score = |set: &[Sample<'_>]| {
        let observed: Vec<f64> = set.iter().map(|s| s.price).collect();
        let predicted: Vec<f64> = set
            .iter()
            .map(|s| model.predict_unchecked(&s.values))
            .collect();
        RegressionMetrics::evaluate(&observed, &predicted)
    };
    let training_metrics = score(&training);
    let evaluated_on_training = validation.is_empty();
    let metrics = if evaluated_on_training {
        training_metrics
    } else {
        score(&validation)
    };

    tracing::info!(
        rows_used,
        skipped = skipped.len(),
        training_rows = training.len(),
        validation_rows = validation.len(),
        r2 = metrics.r2,
        rmse = metrics.rmse,
        "trained price model",
    );
    Ok(TrainingOutcome {
        model,
        metrics,
        training_metrics,
        rows_used,
        training_rows: training.len(),
        validation_rows: validation.len(),
        skipped,
        evaluated_on_training,
    })
}

fn extract_row<'a, F>(row: &'a TrainingRow, extract: &F) -> Result<Sample<'a>, AppraisalError>
where
    F: Fn(&TrainingRow) -> Result<FeatureVector, AppraisalError>,
{
    let failed = |reason: String| AppraisalError::RowExtraction {
        reference: row.reference.clone(),
        reason,
    };
    if !row.price.is_finite() {
        return Err(failed(format!("price is {}", row.price)));
    }
    let features = match extract(row) {
        Ok(features) => features,
        Err(AppraisalError::RowExtraction { reason, .. }) => return Err(failed(reason)),
        Err(e) => return Err(failed(e.to_string())),
    };
    Ok(Sample {
        reference: &row.reference,
        values: features.values(),
        price: row.price,
    })
}

/// Stable per-row shuffle key.
fn split_key(seed: u64, reference: &str) -> u64 {
    let mut hasher = SipHasher13::new_with_keys(seed, 0);
    hasher.write(reference.as_bytes());
    hasher.finish()
}

/// Number of rows held out from `n` usable rows. At least `min_train`
/// rows are always kept for fitting.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn holdout_count(n: usize, fraction: f64, min_train: usize) -> usize {
    let wanted = (n as f64 * fraction).ceil() as usize;
    wanted.min(n.saturating_sub(min_train))
}

fn split<'a>(
    mut samples: Vec<Sample<'a>>,
    config: &TrainingConfig,
) -> (Vec<Sample<'a>>, Vec<Sample<'a>>) {
    samples.sort_by_cached_key(|s| (split_key(config.split_seed, s.reference), s.reference));
    let holdout = holdout_count(samples.len(), config.validation_split, config.min_rows);
    let validation = samples.split_off(samples.len() - holdout);
    (samples, validation)
}

/// Least squares on standardized columns, folded back to raw units.
#[allow(clippy::cast_precision_loss)]
fn fit(samples: &[Sample<'_>], ridge_lambda: f64) -> RegressionModel {
    let n = samples.len() as f64;
    let y_mean = samples.iter().map(|s| s.price).sum::<f64>() / n;

    let mut means = [0.0; FEATURE_COUNT];
    let mut stds = [0.0; FEATURE_COUNT];
    for j in 0..FEATURE_COUNT {
        let mean = samples.iter().map(|s| s.values[j]).sum::<f64>() / n;
        let var = samples
            .iter()
            .map(|s| (s.values[j] - mean).powi(2))
            .sum::<f64>()
            / n;
        means[j] = mean;
        stds[j] = var.sqrt();
    }
    let active: Vec<usize> = (0..FEATURE_COUNT)
        .filter(|&j| stds[j] > CONSTANT_COLUMN_STD)
        .collect();

    let mut coefficients = [0.0; FEATURE_COUNT];
    if !active.is_empty() {
        let ridge_rows = if ridge_lambda > 0.0 { active.len() } else { 0 };
        let rows = samples.len() + ridge_rows;
        let mut a = DMatrix::<f64>::zeros(rows, active.len());
        let mut b = DVector::<f64>::zeros(rows);
        for (i, s) in samples.iter().enumerate() {
            for (k, &j) in active.iter().enumerate() {
                a[(i, k)] = (s.values[j] - means[j]) / stds[j];
            }
            b[i] = s.price - y_mean;
        }
        let penalty = ridge_lambda.sqrt();
        for k in 0..ridge_rows {
            a[(samples.len() + k, k)] = penalty;
        }

        match a.svd(true, true).solve(&b, SVD_EPSILON) {
            Ok(beta) => {
                for (k, &j) in active.iter().enumerate() {
                    coefficients[j] = beta[k] / stds[j];
                }
            }
            // Only fails when U or Vᵀ were not requested.
            Err(reason) => tracing::warn!(reason, "least squares solve failed"),
        }
    }

    let intercept = coefficients
        .iter()
        .zip(&means)
        .fold(y_mean, |acc, (c, m)| (-c).mul_add(*m, acc));
    RegressionModel::new(coefficients, intercept)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn vector(size_cm: f64, red_pct: f64, symmetry: f64) -> FeatureVector {
        FeatureVector::from_values(
            [size_cm, 0.0, 0.0, 1.0, 90.0 - red_pct, red_pct, 5.0, 0.6, symmetry],
            false,
        )
        .unwrap()
    }

    /// Rows priced by an exact linear rule, with a lookup extractor.
    fn linear_dataset(
        n: usize,
    ) -> (Vec<TrainingRow>, HashMap<String, FeatureVector>) {
        let mut rows = Vec::new();
        let mut table = HashMap::new();
        for i in 0..n {
            let f = i as f64;
            let size = 20.0 + 3.0 * f;
            let red = 10.0 + (f * 7.0) % 60.0;
            let symmetry = 0.5 + (f * 0.037) % 0.5;
            let price = 100.0 + 12.0 * size + 4.0 * red + 300.0 * symmetry;
            let reference = format!("koi_{i:03}.jpg");
            rows.push(TrainingRow::new(reference.clone(), price));
            table.insert(reference, vector(size, red, symmetry));
        }
        (rows, table)
    }

    fn lookup(
        table: &HashMap<String, FeatureVector>,
    ) -> impl Fn(&TrainingRow) -> Result<FeatureVector, AppraisalError> + Sync + '_ {
        move |row| {
            table
                .get(&row.reference)
                .copied()
                .ok_or(AppraisalError::NoFishDetected)
        }
    }

    #[test]
    fn recovers_exact_linear_rule() {
        let (rows, table) = linear_dataset(30);
        let outcome = train(&rows, &TrainingConfig::default(), lookup(&table)).unwrap();
        let named = outcome.model.coefficients_by_name();
        let coef = |name: &str| named.iter().find(|(n, _)| *n == name).unwrap().1;
        assert!((coef("size_cm") - 12.0).abs() < 1e-6);
        // White and red always sum to 90, so only their difference is
        // identifiable.
        assert!((coef("color_red_pct") - coef("color_white_pct") - 4.0).abs() < 1e-6);
        assert!((coef("symmetry_score") - 300.0).abs() < 1e-6);
        assert!(outcome.metrics.r2 > 0.999_999);
        assert!(outcome.metrics.rmse < 1e-6);
        assert_eq!(outcome.rows_used, 30);
        assert_eq!(outcome.validation_rows, 6);
        assert_eq!(outcome.training_rows, 24);
        assert!(!outcome.evaluated_on_training);
    }

    #[test]
    fn constant_columns_get_zero_coefficients() {
        let (rows, table) = linear_dataset(10);
        let outcome = train(&rows, &TrainingConfig::default(), lookup(&table)).unwrap();
        // Every row is kohaku with the same black share and quality.
        for name in ["pattern_ogon", "pattern_kohaku", "color_black_pct", "color_quality"] {
            let c = outcome
                .model
                .coefficients_by_name()
                .into_iter()
                .find(|(n, _)| *n == name)
                .unwrap()
                .1;
            assert!(c.abs() < f64::EPSILON, "{name} = {c}");
        }
    }

    #[test]
    fn failed_rows_are_skipped() {
        let (mut rows, table) = linear_dataset(8);
        rows.push(TrainingRow::new("missing.jpg", 500.0));
        rows.push(TrainingRow::new("koi_000.jpg", f64::NAN));
        let outcome = train(&rows, &TrainingConfig::default(), lookup(&table)).unwrap();
        assert_eq!(outcome.rows_used, 8);
        assert_eq!(outcome.skipped.len(), 2);
        assert_eq!(outcome.skipped[0].reference, "missing.jpg");
        assert!(outcome.skipped[0].reason.contains("no koi detected"));
    }

    #[test]
    fn one_usable_row_is_insufficient() {
        let (mut rows, table) = linear_dataset(1);
        rows.push(TrainingRow::new("missing.jpg", 500.0));
        let err = train(&rows, &TrainingConfig::default(), lookup(&table)).unwrap_err();
        assert!(matches!(
            err,
            AppraisalError::InsufficientData {
                usable: 1,
                required: 2
            }
        ));
    }

    #[test]
    fn minimum_rows_all_train() {
        let (rows, table) = linear_dataset(2);
        let outcome = train(&rows, &TrainingConfig::default(), lookup(&table)).unwrap();
        assert_eq!(outcome.training_rows, 2);
        assert_eq!(outcome.validation_rows, 0);
        assert!(outcome.evaluated_on_training);
        assert!(outcome.training_metrics.rmse < 1e-6);
        let size = outcome
            .model
            .coefficients_by_name()
            .into_iter()
            .find(|(n, _)| *n == "size_cm")
            .unwrap()
            .1;
        assert!(size > 0.0, "size signal dropped: {size}");
    }

    #[test]
    fn small_sets_hold_out_only_above_minimum() {
        let (rows, table) = linear_dataset(3);
        let outcome = train(&rows, &TrainingConfig::default(), lookup(&table)).unwrap();
        assert_eq!(outcome.training_rows, 2);
        assert_eq!(outcome.validation_rows, 1);
    }

    #[test]
    fn zero_split_evaluates_on_training_rows() {
        let (rows, table) = linear_dataset(5);
        let config = TrainingConfig {
            validation_split: 0.0,
            ..TrainingConfig::default()
        };
        let outcome = train(&rows, &config, lookup(&table)).unwrap();
        assert!(outcome.evaluated_on_training);
        assert_eq!(outcome.validation_rows, 0);
        assert_eq!(outcome.metrics, outcome.training_metrics);
    }

    #[test]
    fn split_is_deterministic_and_order_independent() {
        let (rows, table) = linear_dataset(20);
        let a = train(&rows, &TrainingConfig::default(), lookup(&table)).unwrap();
        let mut reversed = rows.clone();
        reversed.reverse();
        let b = train(&reversed, &TrainingConfig::default(), lookup(&table)).unwrap();
        assert_eq!(a.metrics, b.metrics);
        assert_eq!(a.validation_rows, b.validation_rows);
    }

    #[test]
    fn ridge_trades_fit_for_shrinkage() {
        let (rows, table) = linear_dataset(20);
        let ols = train(&rows, &TrainingConfig::default(), lookup(&table)).unwrap();
        let config = TrainingConfig {
            ridge_lambda: 50.0,
            ..TrainingConfig::default()
        };
        let ridge = train(&rows, &config, lookup(&table)).unwrap();
        assert!(ols.training_metrics.rmse < 1e-6);
        assert!(ridge.training_metrics.rmse > 1.0);
    }

    #[test]
    fn holdout_keeps_minimum_training_rows() {
        assert_eq!(holdout_count(2, 0.2, 2), 0);
        assert_eq!(holdout_count(3, 0.2, 2), 1);
        assert_eq!(holdout_count(10, 0.2, 2), 2);
        assert_eq!(holdout_count(11, 0.2, 2), 3);
        assert_eq!(holdout_count(3, 0.9, 2), 1);
        assert_eq!(holdout_count(10, 0.9, 5), 5);
        assert_eq!(holdout_count(10, 0.0, 2), 0);
    }

    #[test]
    fn metrics_of_known_residuals() {
        let m = RegressionMetrics::evaluate(&[1.0, 2.0, 3.0], &[1.0, 2.0, 5.0]);
        assert!((m.mae - 2.0 / 3.0).abs() < 1e-12);
        assert!((m.mse - 4.0 / 3.0).abs() < 1e-12);
        assert!((m.rmse - (4.0_f64 / 3.0).sqrt()).abs() < 1e-12);
        assert!((m.r2 - (1.0 - 4.0 / 2.0)).abs() < 1e-12);
    }
}
