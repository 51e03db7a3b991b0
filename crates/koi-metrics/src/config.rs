//! Tunable parameters for every pipeline stage.
//!
//! All values have defaults that reproduce the historical appraisal
//! behavior. The same [`AppraisalConfig`] must be used for training and
//! inference; a model fitted under one configuration is not comparable
//! with features extracted under another.

use serde::{Deserialize, Serialize};

use crate::types::AppraisalError;

/// Color quality parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColorConfig {
    /// Saturation that maps to a saturation sub-score of 1.0.
    pub max_expected_saturation: f64,

    /// Weights for the saturation, edge-sharpness and evenness
    /// sub-scores, in that order. Normalized by their sum.
    pub quality_weights: [f64; 3],

    /// Normalized boundary gradient that earns a full edge-sharpness
    /// sub-score. A step across the whole channel range is 1.0.
    pub edge_gradient_reference: f64,
}

impl ColorConfig {
    /// Default for [`max_expected_saturation`](Self::max_expected_saturation).
    pub const DEFAULT_MAX_EXPECTED_SATURATION: f64 = 1.0;
    /// Default for [`quality_weights`](Self::quality_weights).
    pub const DEFAULT_QUALITY_WEIGHTS: [f64; 3] = [1.0 / 3.0, 1.0 / 3.0, 1.0 / 3.0];
    /// Default for [`edge_gradient_reference`](Self::edge_gradient_reference).
    pub const DEFAULT_EDGE_GRADIENT_REFERENCE: f64 = 0.5;
}

impl Default for ColorConfig {
    fn default() -> Self {
        Self {
            max_expected_saturation: Self::DEFAULT_MAX_EXPECTED_SATURATION,
            quality_weights: Self::DEFAULT_QUALITY_WEIGHTS,
            edge_gradient_reference: Self::DEFAULT_EDGE_GRADIENT_REFERENCE,
        }
    }
}

/// Symmetry scoring parameters.
///
/// `chi_square_scale` is the `N` in `score = 1 / (1 + chi2 / N)`. It is
/// a calibration constant, not a law; keep it fixed between training and
/// inference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SymmetryConfig {
    /// Number of luma bins per histogram row.
    pub intensity_bins: usize,
    /// Number of bands the body length is divided into.
    pub length_bands: usize,
    /// Added to every expected frequency before dividing.
    pub chi_square_epsilon: f64,
    /// Normalization constant `N`.
    pub chi_square_scale: f64,
    /// Minimum pixels each half must contain.
    pub min_half_pixels: u64,
}

impl SymmetryConfig {
    /// Default for [`intensity_bins`](Self::intensity_bins).
    pub const DEFAULT_INTENSITY_BINS: usize = 16;
    /// Default for [`length_bands`](Self::length_bands).
    pub const DEFAULT_LENGTH_BANDS: usize = 8;
    /// Default for [`chi_square_epsilon`](Self::chi_square_epsilon).
    pub const DEFAULT_CHI_SQUARE_EPSILON: f64 = 0.01;
    /// Default for [`chi_square_scale`](Self::chi_square_scale).
    pub const DEFAULT_CHI_SQUARE_SCALE: f64 = 1.0;
    /// Default for [`min_half_pixels`](Self::min_half_pixels).
    pub const DEFAULT_MIN_HALF_PIXELS: u64 = 10;
}

impl Default for SymmetryConfig {
    fn default() -> Self {
        Self {
            intensity_bins: Self::DEFAULT_INTENSITY_BINS,
            length_bands: Self::DEFAULT_LENGTH_BANDS,
            chi_square_epsilon: Self::DEFAULT_CHI_SQUARE_EPSILON,
            chi_square_scale: Self::DEFAULT_CHI_SQUARE_SCALE,
            min_half_pixels: Self::DEFAULT_MIN_HALF_PIXELS,
        }
    }
}

impl SymmetryConfig {
    /// Check the histogram layout and χ² constants.
    ///
    /// # Errors
    ///
    /// Returns [`AppraisalError::InvalidConfig`] naming the offending
    /// field.
    pub fn validate(&self) -> Result<(), AppraisalError> {
        if self.intensity_bins == 0 || self.intensity_bins > 256 {
            return Err(invalid("symmetry.intensity_bins must be in 1..=256".into()));
        }
        if self.length_bands == 0 {
            return Err(invalid("symmetry.length_bands must be >= 1".into()));
        }
        if !positive(self.chi_square_epsilon) || !positive(self.chi_square_scale) {
            return Err(invalid(
                "symmetry.chi_square_epsilon and chi_square_scale must be > 0".into(),
            ));
        }
        Ok(())
    }
}

/// Price model fitting parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// Fraction of usable rows held out for validation, in `[0, 1)`.
    pub validation_split: f64,
    /// Minimum usable rows; below this training aborts.
    pub min_rows: usize,
    /// Ridge penalty on standardized coefficients. `0.0` is ordinary
    /// least squares.
    pub ridge_lambda: f64,
    /// Key for the deterministic row shuffle.
    pub split_seed: u64,
}

impl TrainingConfig {
    /// Default for [`validation_split`](Self::validation_split).
    pub const DEFAULT_VALIDATION_SPLIT: f64 = 0.2;
    /// Default for [`min_rows`](Self::min_rows).
    pub const DEFAULT_MIN_ROWS: usize = 2;
    /// Default for [`ridge_lambda`](Self::ridge_lambda).
    pub const DEFAULT_RIDGE_LAMBDA: f64 = 0.0;
    /// Default for [`split_seed`](Self::split_seed).
    pub const DEFAULT_SPLIT_SEED: u64 = 42;
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            validation_split: Self::DEFAULT_VALIDATION_SPLIT,
            min_rows: Self::DEFAULT_MIN_ROWS,
            ridge_lambda: Self::DEFAULT_RIDGE_LAMBDA,
            split_seed: Self::DEFAULT_SPLIT_SEED,
        }
    }
}

/// Configuration for the whole appraisal pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppraisalConfig {
    /// Coin candidates below this confidence are ignored.
    pub min_coin_confidence: f32,
    /// Fish detections below this confidence are ignored.
    pub min_fish_confidence: f32,
    /// Pattern predictions below this confidence become `unknown`.
    pub pattern_confidence_floor: f32,
    /// Relative eigenvalue gap below which the principal axis is
    /// considered undefined.
    pub axis_degeneracy_tolerance: f64,
    /// Color quantifier parameters.
    pub color: ColorConfig,
    /// Symmetry scorer parameters.
    pub symmetry: SymmetryConfig,
    /// Trainer parameters.
    pub training: TrainingConfig,
}

impl AppraisalConfig {
    /// Default for [`min_coin_confidence`](Self::min_coin_confidence).
    pub const DEFAULT_MIN_COIN_CONFIDENCE: f32 = 0.5;
    /// Default for [`min_fish_confidence`](Self::min_fish_confidence).
    pub const DEFAULT_MIN_FISH_CONFIDENCE: f32 = 0.25;
    /// Default for [`pattern_confidence_floor`](Self::pattern_confidence_floor).
    pub const DEFAULT_PATTERN_CONFIDENCE_FLOOR: f32 = 0.4;
    /// Default for [`axis_degeneracy_tolerance`](Self::axis_degeneracy_tolerance).
    pub const DEFAULT_AXIS_DEGENERACY_TOLERANCE: f64 = 1e-6;

    /// Check every invariant the stages rely on.
    ///
    /// # Errors
    ///
    /// Returns [`AppraisalError::InvalidConfig`] naming the first
    /// offending field.
    pub fn validate(&self) -> Result<(), AppraisalError> {
        let unit = |name: &str, v: f32| {
            if (0.0..=1.0).contains(&v) {
                Ok(())
            } else {
                Err(invalid(format!("{name} must be in [0, 1], got {v}")))
            }
        };
        unit("min_coin_confidence", self.min_coin_confidence)?;
        unit("min_fish_confidence", self.min_fish_confidence)?;
        unit("pattern_confidence_floor", self.pattern_confidence_floor)?;

        if !non_negative(self.axis_degeneracy_tolerance) {
            return Err(invalid("axis_degeneracy_tolerance must be >= 0".into()));
        }

        let c = &self.color;
        if !positive(c.max_expected_saturation) || c.max_expected_saturation > 1.0 {
            return Err(invalid("color.max_expected_saturation must be in (0, 1]".into()));
        }
        if !c.quality_weights.iter().copied().all(non_negative)
            || !positive(c.quality_weights.iter().sum())
        {
            return Err(invalid(
                "color.quality_weights must be non-negative with a positive sum".into(),
            ));
        }
        if !positive(c.edge_gradient_reference) {
            return Err(invalid("color.edge_gradient_reference must be > 0".into()));
        }

        self.symmetry.validate()?;

        let t = &self.training;
        if !(0.0..1.0).contains(&t.validation_split) {
            return Err(invalid("training.validation_split must be in [0, 1)".into()));
        }
        if t.min_rows < 2 {
            return Err(invalid("training.min_rows must be >= 2".into()));
        }
        if !non_negative(t.ridge_lambda) {
            return Err(invalid("training.ridge_lambda must be >= 0".into()));
        }
        Ok(())
    }
}

impl Default for AppraisalConfig {
    fn default() -> Self {
        Self {
            min_coin_confidence: Self::DEFAULT_MIN_COIN_CONFIDENCE,
            min_fish_confidence: Self::DEFAULT_MIN_FISH_CONFIDENCE,
            pattern_confidence_floor: Self::DEFAULT_PATTERN_CONFIDENCE_FLOOR,
            axis_degeneracy_tolerance: Self::DEFAULT_AXIS_DEGENERACY_TOLERANCE,
            color: ColorConfig::default(),
            symmetry: SymmetryConfig::default(),
            training: TrainingConfig::default(),
        }
    }
}

fn invalid(msg: String) -> AppraisalError {
    AppraisalError::InvalidConfig(msg)
}

// NaN fails both.
fn positive(v: f64) -> bool {
    v > 0.0
}

fn non_negative(v: f64) -> bool {
    v >= 0.0
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn default_is_valid() {
        AppraisalConfig::default().validate().unwrap();
    }

    #[test]
    fn rejects_out_of_range_floor() {
        let config = AppraisalConfig {
            pattern_confidence_floor: 1.5,
            ..AppraisalConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("pattern_confidence_floor"));
    }

    #[test]
    fn rejects_nan_scale() {
        let mut config = AppraisalConfig::default();
        config.symmetry.chi_square_scale = f64::NAN;
        assert!(matches!(
            config.validate(),
            Err(AppraisalError::InvalidConfig(_))
        ));
    }

    #[test]
    fn rejects_single_row_minimum() {
        let mut config = AppraisalConfig::default();
        config.training.min_rows = 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config: AppraisalConfig =
            serde_json::from_str(r#"{"min_coin_confidence": 0.7, "symmetry": {"length_bands": 4}}"#)
                .unwrap();
        assert!((config.min_coin_confidence - 0.7).abs() < f32::EPSILON);
        assert_eq!(config.symmetry.length_bands, 4);
        assert_eq!(
            config.symmetry.intensity_bins,
            SymmetryConfig::DEFAULT_INTENSITY_BINS
        );
        assert_eq!(config.training, TrainingConfig::default());
    }
}
