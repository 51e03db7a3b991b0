//! Adapter from the external pattern classifier to a one-hot pattern
//! class.

use serde::{Deserialize, Serialize};

use crate::types::PatternPrediction;

/// Koi variety recognized by the price model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatternClass {
    /// Single metallic color.
    Ogon,
    /// Black base with red and white.
    Showa,
    /// White base with red.
    Kohaku,
    /// Unrecognized label or confidence below the floor.
    Unknown,
}

impl PatternClass {
    /// Classes with a one-hot column, in feature order.
    pub const ENCODED: [Self; 3] = [Self::Ogon, Self::Showa, Self::Kohaku];

    /// Parse a classifier label, case-insensitively. Anything else is
    /// [`Unknown`](Self::Unknown).
    #[must_use]
    pub fn from_label(label: &str) -> Self {
        let label = label.trim();
        Self::ENCODED
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(label))
            .unwrap_or(Self::Unknown)
    }

    /// Lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ogon => "ogon",
            Self::Showa => "showa",
            Self::Kohaku => "kohaku",
            Self::Unknown => "unknown",
        }
    }

    /// `[ogon, showa, kohaku]` indicator values. All zero for
    /// [`Unknown`](Self::Unknown).
    #[must_use]
    pub fn one_hot(self) -> [f64; 3] {
        Self::ENCODED.map(|c| if c == self { 1.0 } else { 0.0 })
    }
}

impl std::fmt::Display for PatternClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output of the pattern stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternResult {
    /// Class used for the feature vector.
    pub class: PatternClass,
    /// Classifier confidence, unchanged.
    pub confidence: f32,
    /// Label as reported by the classifier.
    pub raw_label: String,
    /// Set when the classifier's confidence fell below the floor and the
    /// class was downgraded to `unknown`.
    pub low_confidence: bool,
}

/// Apply the confidence floor to a classifier prediction.
///
/// A confidence below `floor` (or NaN) yields
/// [`PatternClass::Unknown`] with `low_confidence` set.
#[must_use]
pub fn adapt_pattern(prediction: &PatternPrediction, floor: f32) -> PatternResult {
    let confidence = prediction.confidence;
    let low_confidence = confidence.is_nan() || confidence < floor;
    let class = if low_confidence {
        tracing::warn!(
            label = %prediction.label,
            confidence,
            floor,
            "pattern confidence below floor, treating as unknown",
        );
        PatternClass::Unknown
    } else {
        let class = PatternClass::from_label(&prediction.label);
        if class == PatternClass::Unknown {
            tracing::warn!(label = %prediction.label, "unrecognized pattern label");
        }
        class
    };
    PatternResult {
        class,
        confidence,
        raw_label: prediction.label.clone(),
        low_confidence,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn predict(label: &str, confidence: f32) -> PatternPrediction {
        PatternPrediction {
            label: label.to_owned(),
            confidence,
        }
    }

    #[test]
    fn confident_prediction_passes_through() {
        let result = adapt_pattern(&predict("kohaku", 0.92), 0.4);
        assert_eq!(result.class, PatternClass::Kohaku);
        assert!(!result.low_confidence);
        assert_eq!(result.class.one_hot(), [0.0, 0.0, 1.0]);
    }

    #[test]
    fn below_floor_becomes_unknown() {
        let result = adapt_pattern(&predict("showa", 0.3), 0.4);
        assert_eq!(result.class, PatternClass::Unknown);
        assert!(result.low_confidence);
        assert_eq!(result.class.one_hot(), [0.0; 3]);
        assert_eq!(result.raw_label, "showa");
    }

    #[test]
    fn floor_is_inclusive() {
        let result = adapt_pattern(&predict("ogon", 0.4), 0.4);
        assert_eq!(result.class, PatternClass::Ogon);
    }

    #[test]
    fn nan_confidence_is_low() {
        assert!(adapt_pattern(&predict("ogon", f32::NAN), 0.4).low_confidence);
    }

    #[test]
    fn labels_are_case_insensitive() {
        assert_eq!(PatternClass::from_label(" Showa "), PatternClass::Showa);
        assert_eq!(PatternClass::from_label("sanke"), PatternClass::Unknown);
    }

    #[test]
    fn unrecognized_label_is_unknown_but_not_low_confidence() {
        let result = adapt_pattern(&predict("asagi", 0.9), 0.4);
        assert_eq!(result.class, PatternClass::Unknown);
        assert!(!result.low_confidence);
    }
}
