//! Scale calibration from a reference coin and fish length estimation.
//!
//! The coin mask is treated as a near-circular region: its equivalent
//! diameter `2·sqrt(area/π)` is matched against the denomination's real
//! diameter to obtain centimetres per pixel. Fish length is the extent of
//! the fish mask along its principal axis, converted with that ratio.

use std::collections::BTreeMap;
use std::f64::consts::PI;

use serde::{Deserialize, Serialize};

use crate::detect::most_confident;
use crate::geometry::MaskGeometry;
use crate::types::{AppraisalError, Detection, Mask};

/// Denomination label to real-world diameter in centimetres.
///
/// Serialized as a flat JSON object, e.g. `{"1peso_new": 2.3}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CoinReference(BTreeMap<String, f64>);

impl CoinReference {
    /// Philippine peso coins the stock coin detector is trained on.
    pub const PESO_DIAMETERS_CM: [(&'static str, f64); 8] = [
        ("1peso", 2.3),
        ("1peso_new", 2.3),
        ("1peso_old", 2.4),
        ("5peso_new", 2.5),
        ("5peso_old", 2.7),
        ("10peso_new", 2.7),
        ("10peso_old", 2.7),
        ("20peso", 3.0),
    ];

    /// Build a table from `(label, diameter_cm)` pairs.
    #[must_use]
    pub fn new(entries: impl IntoIterator<Item = (String, f64)>) -> Self {
        Self(entries.into_iter().collect())
    }

    /// Diameter of `label` in centimetres.
    ///
    /// # Errors
    ///
    /// Returns [`AppraisalError::UnknownDenomination`] when the table has
    /// no entry for `label`.
    pub fn diameter_cm(&self, label: &str) -> Result<f64, AppraisalError> {
        self.0
            .get(label)
            .copied()
            .ok_or_else(|| AppraisalError::UnknownDenomination(label.to_owned()))
    }

    /// Known denomination labels, sorted.
    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Check that the table is non-empty and every diameter is a
    /// positive finite number.
    ///
    /// # Errors
    ///
    /// Returns [`AppraisalError::InvalidConfig`] naming the first bad
    /// entry.
    pub fn validate(&self) -> Result<(), AppraisalError> {
        if self.0.is_empty() {
            return Err(AppraisalError::InvalidConfig(
                "coin reference table is empty".into(),
            ));
        }
        match self
            .0
            .iter()
            .find(|(_, d)| !(d.is_finite() && **d > 0.0))
        {
            Some((label, d)) => Err(AppraisalError::InvalidConfig(format!(
                "coin {label} has invalid diameter {d}"
            ))),
            None => Ok(()),
        }
    }
}

impl Default for CoinReference {
    fn default() -> Self {
        Self::new(
            Self::PESO_DIAMETERS_CM
                .iter()
                .map(|&(label, d)| (label.to_owned(), d)),
        )
    }
}

/// Pick the reference coin among the detector's candidates.
///
/// Candidates below `min_confidence` or with empty masks are discarded.
/// The highest confidence wins; equal confidences fall back to the
/// larger mask area.
///
/// # Errors
///
/// Returns [`AppraisalError::NoCoinDetected`] when no candidate
/// survives.
pub fn select_coin(coins: &[Detection], min_confidence: f32) -> Result<&Detection, AppraisalError> {
    most_confident(coins, min_confidence).ok_or(AppraisalError::NoCoinDetected)
}

/// Pixel-to-centimetre calibration derived from one coin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoinScale {
    /// Denomination label of the coin used.
    pub label: String,
    /// Real diameter from the reference table.
    pub diameter_cm: f64,
    /// Equivalent-circle diameter of the coin mask.
    pub diameter_px: f64,
    /// Centimetres per image pixel.
    pub cm_per_px: f64,
}

impl CoinScale {
    /// Calibrate from a selected coin.
    ///
    /// # Errors
    ///
    /// Returns [`AppraisalError::UnknownDenomination`] for labels missing
    /// from `reference`, and [`AppraisalError::NoCoinDetected`] for an
    /// empty coin mask.
    #[allow(clippy::cast_precision_loss)]
    pub fn from_coin(coin: &Detection, reference: &CoinReference) -> Result<Self, AppraisalError> {
        let diameter_cm = reference.diameter_cm(&coin.label)?;
        let area = coin.mask.area();
        if area == 0 {
            return Err(AppraisalError::NoCoinDetected);
        }
        let diameter_px = equivalent_diameter(area as f64);
        Ok(Self {
            label: coin.label.clone(),
            diameter_cm,
            diameter_px,
            cm_per_px: diameter_cm / diameter_px,
        })
    }
}

/// Diameter of the circle with the given area.
#[must_use]
pub fn equivalent_diameter(area: f64) -> f64 {
    2.0 * (area / PI).sqrt()
}

/// Result of the size stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SizeEstimate {
    /// Fish length along its principal axis in pixels.
    pub length_px: f64,
    /// Calibration used for the conversion.
    pub scale: CoinScale,
    /// Fish length in centimetres. Always positive.
    pub size_cm: f64,
}

/// Estimate fish length in centimetres.
///
/// `geometry` must have been computed from `fish`.
///
/// # Errors
///
/// Returns [`AppraisalError::NoFishDetected`] for an empty fish mask,
/// [`AppraisalError::NoCoinDetected`] when no coin clears
/// `min_coin_confidence`, and [`AppraisalError::UnknownDenomination`]
/// when the selected coin is not in `reference`.
pub fn estimate_size(
    fish: &Mask,
    geometry: &MaskGeometry,
    coins: &[Detection],
    reference: &CoinReference,
    min_coin_confidence: f32,
) -> Result<SizeEstimate, AppraisalError> {
    if geometry.area == 0 {
        return Err(AppraisalError::NoFishDetected);
    }
    let coin = select_coin(coins, min_coin_confidence)?;
    let scale = CoinScale::from_coin(coin, reference)?;
    let length_px = geometry.major_axis_extent(fish);
    if length_px <= 0.0 {
        return Err(AppraisalError::NoFishDetected);
    }
    let size_cm = length_px * scale.cm_per_px;
    tracing::debug!(
        coin = %scale.label,
        coin_diameter_px = scale.diameter_px,
        cm_per_px = scale.cm_per_px,
        length_px,
        size_cm,
        "estimated fish size",
    );
    Ok(SizeEstimate {
        length_px,
        scale,
        size_cm,
    })
}
