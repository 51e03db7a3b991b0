//! Perceptual color space and the calibration table that buckets pixels
//! into koi color categories.
//!
//! Hue is in degrees `[0, 360)`; saturation and value are in `[0, 1]`.

use image::Rgb;
use serde::{Deserialize, Serialize};

use crate::types::AppraisalError;

/// A color in hue/saturation/value form.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Hsv {
    /// Hue in degrees, `[0, 360)`. Zero for achromatic colors.
    pub h: f64,
    /// Saturation, `[0, 1]`.
    pub s: f64,
    /// Value (brightness), `[0, 1]`.
    pub v: f64,
}

impl Hsv {
    /// Convert an 8-bit RGB pixel.
    #[must_use]
    pub fn from_rgb(Rgb([r, g, b]): Rgb<u8>) -> Self {
        let max = r.max(g).max(b);
        let min = r.min(g).min(b);
        let delta = f64::from(max - min);
        let v = f64::from(max) / 255.0;
        if max == 0 {
            return Self { h: 0.0, s: 0.0, v };
        }
        let s = delta / f64::from(max);
        if max == min {
            return Self { h: 0.0, s, v };
        }
        let (rf, gf, bf) = (f64::from(r), f64::from(g), f64::from(b));
        let sector = if max == r {
            (gf - bf) / delta
        } else if max == g {
            (bf - rf) / delta + 2.0
        } else {
            (rf - gf) / delta + 4.0
        };
        Self {
            h: (sector * 60.0).rem_euclid(360.0),
            s,
            v,
        }
    }
}

/// One box in HSV space. Bounds are inclusive.
///
/// When `hue_min > hue_max` the hue band wraps through 0°.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HsvRange {
    /// Lower hue bound in degrees.
    pub hue_min: f64,
    /// Upper hue bound in degrees.
    pub hue_max: f64,
    /// Lower saturation bound.
    pub saturation_min: f64,
    /// Upper saturation bound.
    pub saturation_max: f64,
    /// Lower value bound.
    pub value_min: f64,
    /// Upper value bound.
    pub value_max: f64,
}

impl HsvRange {
    /// The whole color space.
    pub const ALL: Self = Self {
        hue_min: 0.0,
        hue_max: 360.0,
        saturation_min: 0.0,
        saturation_max: 1.0,
        value_min: 0.0,
        value_max: 1.0,
    };

    /// Whether `hsv` falls inside this range.
    #[must_use]
    pub fn contains(&self, hsv: Hsv) -> bool {
        let hue = if self.hue_min <= self.hue_max {
            (self.hue_min..=self.hue_max).contains(&hsv.h)
        } else {
            hsv.h >= self.hue_min || hsv.h <= self.hue_max
        };
        hue && (self.saturation_min..=self.saturation_max).contains(&hsv.s)
            && (self.value_min..=self.value_max).contains(&hsv.v)
    }

    fn validate(&self, category: ColorCategory) -> Result<(), AppraisalError> {
        let hue_ok = [self.hue_min, self.hue_max]
            .iter()
            .all(|h| (0.0..=360.0).contains(h));
        let unit_ok = [
            self.saturation_min,
            self.saturation_max,
            self.value_min,
            self.value_max,
        ]
        .iter()
        .all(|x| (0.0..=1.0).contains(x));
        if hue_ok
            && unit_ok
            && self.saturation_min <= self.saturation_max
            && self.value_min <= self.value_max
        {
            Ok(())
        } else {
            Err(AppraisalError::InvalidConfig(format!(
                "calibration range for {} is out of bounds: {self:?}",
                category.as_str()
            )))
        }
    }
}

/// Named koi color categories, in classification priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorCategory {
    /// Sumi.
    Black,
    /// Shiroji.
    White,
    /// Hi, including orange tones.
    Red,
}

impl ColorCategory {
    /// Categories in the order they are tested.
    pub const PRIORITY: [Self; 3] = [Self::Black, Self::White, Self::Red];

    /// Lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Black => "black",
            Self::White => "white",
            Self::Red => "red",
        }
    }
}

/// Category name to HSV boundary predicates.
///
/// A pixel belongs to a category when it falls inside any of that
/// category's ranges. Categories are tested black, white, red; the first
/// match wins so every pixel gets at most one category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationTable {
    /// Dark pixels regardless of hue.
    pub black: Vec<HsvRange>,
    /// Low-saturation bright pixels.
    pub white: Vec<HsvRange>,
    /// Saturated red/orange hues.
    pub red: Vec<HsvRange>,
}

impl CalibrationTable {
    /// Ranges for one category.
    #[must_use]
    pub fn ranges(&self, category: ColorCategory) -> &[HsvRange] {
        match category {
            ColorCategory::Black => &self.black,
            ColorCategory::White => &self.white,
            ColorCategory::Red => &self.red,
        }
    }

    /// Category of `hsv`, or `None` when no category matches.
    #[must_use]
    pub fn classify(&self, hsv: Hsv) -> Option<ColorCategory> {
        ColorCategory::PRIORITY
            .into_iter()
            .find(|&c| self.ranges(c).iter().any(|r| r.contains(hsv)))
    }

    /// Check every range lies inside the color space.
    ///
    /// # Errors
    ///
    /// Returns [`AppraisalError::InvalidConfig`] for the first range out
    /// of bounds.
    pub fn validate(&self) -> Result<(), AppraisalError> {
        for category in ColorCategory::PRIORITY {
            for range in self.ranges(category) {
                range.validate(category)?;
            }
        }
        Ok(())
    }
}

impl Default for CalibrationTable {
    fn default() -> Self {
        let dark = 50.0 / 255.0;
        let pale = 50.0 / 255.0;
        let bright = 180.0 / 255.0;
        let vivid = 100.0 / 255.0;
        let red_band = |hue_min, hue_max| HsvRange {
            hue_min,
            hue_max,
            saturation_min: vivid,
            value_min: vivid,
            ..HsvRange::ALL
        };
        Self {
            black: vec![HsvRange {
                value_max: dark,
                ..HsvRange::ALL
            }],
            white: vec![HsvRange {
                saturation_max: pale,
                value_min: bright,
                ..HsvRange::ALL
            }],
            red: vec![red_band(0.0, 20.0), red_band(320.0, 360.0)],
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn classify(r: u8, g: u8, b: u8) -> Option<ColorCategory> {
        CalibrationTable::default().classify(Hsv::from_rgb(Rgb([r, g, b])))
    }

    #[test]
    fn hsv_of_primaries() {
        let red = Hsv::from_rgb(Rgb([255, 0, 0]));
        assert!(red.h.abs() < 1e-9 && (red.s - 1.0).abs() < 1e-9);
        let green = Hsv::from_rgb(Rgb([0, 255, 0]));
        assert!((green.h - 120.0).abs() < 1e-9);
        let blue = Hsv::from_rgb(Rgb([0, 0, 255]));
        assert!((blue.h - 240.0).abs() < 1e-9);
        let magenta = Hsv::from_rgb(Rgb([255, 0, 255]));
        assert!((magenta.h - 300.0).abs() < 1e-9);
    }

    #[test]
    fn hsv_of_gray_is_achromatic() {
        let gray = Hsv::from_rgb(Rgb([128, 128, 128]));
        assert!(gray.s.abs() < 1e-9);
        assert!((gray.v - 128.0 / 255.0).abs() < 1e-9);
        let black = Hsv::from_rgb(Rgb([0, 0, 0]));
        assert!(black.v.abs() < 1e-9);
    }

    #[test]
    fn default_thresholds() {
        assert_eq!(classify(250, 250, 245), Some(ColorCategory::White));
        assert_eq!(classify(220, 30, 20), Some(ColorCategory::Red));
        assert_eq!(classify(240, 70, 10), Some(ColorCategory::Red));
        assert_eq!(classify(20, 20, 25), Some(ColorCategory::Black));
        assert_eq!(classify(30, 160, 40), None);
        assert_eq!(classify(128, 128, 128), None);
    }

    #[test]
    fn black_wins_over_red_hue() {
        // Dark red: hue in the red band, but value below the black cut.
        assert_eq!(classify(45, 0, 0), Some(ColorCategory::Black));
    }

    #[test]
    fn wrapping_hue_band() {
        let range = HsvRange {
            hue_min: 340.0,
            hue_max: 10.0,
            ..HsvRange::ALL
        };
        assert!(range.contains(Hsv { h: 350.0, s: 0.5, v: 0.5 }));
        assert!(range.contains(Hsv { h: 5.0, s: 0.5, v: 0.5 }));
        assert!(!range.contains(Hsv { h: 180.0, s: 0.5, v: 0.5 }));
    }

    #[test]
    fn table_from_json() {
        let json = r#"{"red": [{"hue_min": 0, "hue_max": 30, "saturation_min": 0.2,
            "saturation_max": 1, "value_min": 0.2, "value_max": 1}]}"#;
        let table: CalibrationTable = serde_json::from_str(json).unwrap();
        table.validate().unwrap();
        assert_eq!(table.red.len(), 1);
        // Missing categories fall back to the stock thresholds.
        assert_eq!(table.black, CalibrationTable::default().black);
    }

    #[test]
    fn out_of_bounds_range_is_rejected() {
        let mut table = CalibrationTable::default();
        table.white[0].saturation_max = 2.0;
        let err = table.validate().unwrap_err();
        assert!(err.to_string().contains("white"));
    }
}
