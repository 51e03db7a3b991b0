//! The fixed-order feature vector shared by training and prediction.
//!
//! Column order is part of the model contract: a [`RegressionModel`]
//! stores the names it was fitted against and refuses vectors from a
//! different schema.
//!
//! [`RegressionModel`]: crate::model::RegressionModel

use serde::{Deserialize, Serialize};

use crate::color::ColorMetrics;
use crate::pattern::PatternResult;
use crate::size::SizeEstimate;
use crate::symmetry::SymmetryMetrics;
use crate::types::AppraisalError;

/// Version of [`FEATURE_NAMES`]. Bump on any change to the columns.
pub const SCHEMA_VERSION: u32 = 1;

/// Number of regression columns.
pub const FEATURE_COUNT: usize = 9;

/// Column names in regression order.
pub const FEATURE_NAMES: [&str; FEATURE_COUNT] = [
    "size_cm",
    "pattern_ogon",
    "pattern_showa",
    "pattern_kohaku",
    "color_white_pct",
    "color_red_pct",
    "color_black_pct",
    "color_quality",
    "symmetry_score",
];

/// Slack allowed on the color percentage sum.
const PCT_SUM_TOLERANCE: f64 = 1e-6;

/// Numeric encoding of one fish.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    /// Body length in centimetres.
    pub size_cm: f64,
    /// One-hot: ogon.
    pub pattern_ogon: f64,
    /// One-hot: showa.
    pub pattern_showa: f64,
    /// One-hot: kohaku.
    pub pattern_kohaku: f64,
    /// White share, percent.
    pub color_white_pct: f64,
    /// Red share, percent.
    pub color_red_pct: f64,
    /// Black share, percent.
    pub color_black_pct: f64,
    /// Color quality, `[0, 1]`.
    pub color_quality: f64,
    /// Symmetry score, `[0, 1]`.
    pub symmetry_score: f64,
    /// The pattern one-hot is all zero because the classifier was not
    /// confident. Metadata, not a regression column.
    #[serde(default)]
    pub pattern_low_confidence: bool,
}

impl FeatureVector {
    /// Join the stage outputs into a validated vector.
    ///
    /// # Errors
    ///
    /// Returns [`AppraisalError::FeatureSchemaMismatch`] when any field
    /// is NaN or out of range.
    pub fn assemble(
        size: &SizeEstimate,
        pattern: &PatternResult,
        color: &ColorMetrics,
        symmetry: &SymmetryMetrics,
    ) -> Result<Self, AppraisalError> {
        let [ogon, showa, kohaku] = pattern.class.one_hot();
        let features = Self {
            size_cm: size.size_cm,
            pattern_ogon: ogon,
            pattern_showa: showa,
            pattern_kohaku: kohaku,
            color_white_pct: color.composition.white_pct,
            color_red_pct: color.composition.red_pct,
            color_black_pct: color.composition.black_pct,
            color_quality: color.quality,
            symmetry_score: symmetry.score,
            pattern_low_confidence: pattern.low_confidence,
        };
        features.validate()?;
        Ok(features)
    }

    /// Build from raw column values in [`FEATURE_NAMES`] order.
    ///
    /// # Errors
    ///
    /// Returns [`AppraisalError::FeatureSchemaMismatch`] when the values
    /// fail [`validate`](Self::validate).
    pub fn from_values(
        values: [f64; FEATURE_COUNT],
        pattern_low_confidence: bool,
    ) -> Result<Self, AppraisalError> {
        let [
            size_cm,
            pattern_ogon,
            pattern_showa,
            pattern_kohaku,
            color_white_pct,
            color_red_pct,
            color_black_pct,
            color_quality,
            symmetry_score,
        ] = values;
        let features = Self {
            size_cm,
            pattern_ogon,
            pattern_showa,
            pattern_kohaku,
            color_white_pct,
            color_red_pct,
            color_black_pct,
            color_quality,
            symmetry_score,
            pattern_low_confidence,
        };
        features.validate()?;
        Ok(features)
    }

    /// Column values in [`FEATURE_NAMES`] order.
    #[must_use]
    pub const fn values(&self) -> [f64; FEATURE_COUNT] {
        [
            self.size_cm,
            self.pattern_ogon,
            self.pattern_showa,
            self.pattern_kohaku,
            self.color_white_pct,
            self.color_red_pct,
            self.color_black_pct,
            self.color_quality,
            self.symmetry_score,
        ]
    }

    /// Value of a column by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<f64> {
        FEATURE_NAMES
            .iter()
            .position(|&n| n == name)
            .map(|i| self.values()[i])
    }

    /// Check every field against its domain.
    ///
    /// # Errors
    ///
    /// Returns [`AppraisalError::FeatureSchemaMismatch`] naming the first
    /// bad field.
    #[allow(clippy::float_cmp)]
    pub fn validate(&self) -> Result<(), AppraisalError> {
        let mismatch = |msg: String| Err(AppraisalError::FeatureSchemaMismatch(msg));
        let values = self.values();
        if let Some((name, v)) = FEATURE_NAMES
            .iter()
            .zip(values)
            .find(|(_, v)| !v.is_finite())
        {
            return mismatch(format!("{name} is {v}"));
        }
        if self.size_cm <= 0.0 {
            return mismatch(format!("size_cm must be positive, got {}", self.size_cm));
        }
        let one_hot = [self.pattern_ogon, self.pattern_showa, self.pattern_kohaku];
        if one_hot.iter().any(|&v| v != 0.0 && v != 1.0) || one_hot.iter().sum::<f64>() > 1.0 {
            return mismatch(format!("pattern one-hot is not an indicator: {one_hot:?}"));
        }
        let pct = [
            ("color_white_pct", self.color_white_pct),
            ("color_red_pct", self.color_red_pct),
            ("color_black_pct", self.color_black_pct),
        ];
        if let Some((name, v)) = pct.iter().find(|(_, v)| !(0.0..=100.0).contains(v)) {
            return mismatch(format!("{name} must be in [0, 100], got {v}"));
        }
        let sum: f64 = pct.iter().map(|(_, v)| v).sum();
        if sum > 100.0 + PCT_SUM_TOLERANCE {
            return mismatch(format!("color percentages sum to {sum}"));
        }
        for (name, v) in [
            ("color_quality", self.color_quality),
            ("symmetry_score", self.symmetry_score),
        ] {
            if !(0.0..=1.0).contains(&v) {
                return mismatch(format!("{name} must be in [0, 1], got {v}"));
            }
        }
        Ok(())
    }
}
