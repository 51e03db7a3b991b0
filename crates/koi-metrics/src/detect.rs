//! Contracts of the external vision models.
//!
//! The segmentation model, coin detector and pattern classifier are not
//! part of this crate. They are plugged in through these traits and
//! shared read-only across requests, so implementations must be
//! `Send + Sync` and hold no per-request state.

use crate::types::{AppraisalError, Detection, PatternPrediction, RgbImage};

/// Instance segmentation of koi.
pub trait FishSegmenter: Send + Sync {
    /// Zero or more fish masks at image resolution, label `"koi"`.
    ///
    /// # Errors
    ///
    /// Returns [`AppraisalError::Detector`] when inference fails.
    fn segment(&self, image: &RgbImage) -> Result<Vec<Detection>, AppraisalError>;
}

/// Reference coin detection.
pub trait CoinDetector: Send + Sync {
    /// Zero or more coin masks, labeled by denomination.
    ///
    /// # Errors
    ///
    /// Returns [`AppraisalError::Detector`] when inference fails.
    fn detect(&self, image: &RgbImage) -> Result<Vec<Detection>, AppraisalError>;
}

/// Koi variety classification.
pub trait PatternClassifier: Send + Sync {
    /// Top-1 label and confidence.
    ///
    /// # Errors
    ///
    /// Returns [`AppraisalError::Detector`] when inference fails.
    fn classify(&self, image: &RgbImage) -> Result<PatternPrediction, AppraisalError>;
}

/// The most confident detection at or above `min_confidence` with a
/// non-empty mask. Equal confidences fall back to the larger area.
pub(crate) fn most_confident(
    detections: &[Detection],
    min_confidence: f32,
) -> Option<&Detection> {
    detections
        .iter()
        .filter(|d| d.confidence >= min_confidence)
        .map(|d| (d, d.mask.area()))
        .filter(|&(_, area)| area > 0)
        .max_by(|(a, area_a), (b, area_b)| {
            a.confidence
                .total_cmp(&b.confidence)
                .then(area_a.cmp(area_b))
        })
        .map(|(d, _)| d)
}

/// Pick the fish to appraise: the most confident detection at or above
/// `min_confidence`, ties broken by larger area.
///
/// # Errors
///
/// Returns [`AppraisalError::NoFishDetected`] when no detection
/// qualifies.
pub fn select_fish(fish: &[Detection], min_confidence: f32) -> Result<&Detection, AppraisalError> {
    most_confident(fish, min_confidence).ok_or(AppraisalError::NoFishDetected)
}
