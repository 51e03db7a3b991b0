//! The per-request appraisal record.

use serde::{Deserialize, Serialize};

use crate::color::{ColorComposition, QualityBreakdown};
use crate::features::FeatureVector;
use crate::pattern::PatternClass;

/// Everything computed for one photograph, including the predicted
/// price. Built once at the end of a pipeline run and never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppraisalMetrics {
    /// Body length in centimetres.
    pub size_cm: f64,
    /// Body length along the principal axis in pixels.
    pub length_px: f64,
    /// Calibration from the reference coin.
    pub cm_per_px: f64,
    /// Denomination of the coin used for calibration.
    pub coin_label: String,
    /// Segmentation confidence of the appraised fish.
    pub fish_confidence: f32,
    /// Pattern class after the confidence floor.
    pub pattern: PatternClass,
    /// Label as reported by the classifier.
    pub pattern_label: String,
    /// Classifier confidence.
    pub pattern_confidence: f32,
    /// The classifier's label was discarded for low confidence.
    pub pattern_low_confidence: bool,
    /// Color percentages.
    pub color: ColorComposition,
    /// Overall color quality, `[0, 1]`.
    pub color_quality: f64,
    /// Sub-scores behind `color_quality`.
    pub color_breakdown: QualityBreakdown,
    /// Bilateral symmetry, `[0, 1]`.
    pub symmetry_score: f64,
    /// The regression input.
    pub features: FeatureVector,
    /// Model output. Not clamped.
    pub predicted_price: f64,
}
