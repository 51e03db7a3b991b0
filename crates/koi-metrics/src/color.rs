//! Color composition and color quality of the fish region.
//!
//! Every fish pixel is converted to HSV and bucketed with the
//! [`CalibrationTable`]. Composition is the percentage of fish pixels in
//! each category. Quality is the weighted mean of three sub-scores:
//!
//! - **saturation**: mean saturation of pixels that are neither white nor
//!   black, relative to the maximum expected saturation
//! - **edge sharpness**: Sobel gradient of the saturation and value
//!   channels at pixels that touch a different category, relative to a
//!   reference gradient
//! - **evenness**: one minus the coefficient of variation of each
//!   category's density across the four quadrants of the fish bounding
//!   box, weighted by category share
//!
//! A sub-score with nothing to measure (no colored pixels, no category
//! boundaries) is neutral at 0.5.

use image::{GrayImage, Luma};
use serde::{Deserialize, Serialize};

use crate::calibration::{CalibrationTable, ColorCategory, Hsv};
use crate::config::ColorConfig;
use crate::types::{AppraisalError, BoundingBox, Mask, RgbImage, check_dimensions};

/// Score used when a sub-score has no pixels to measure.
const NEUTRAL: f64 = 0.5;

/// Largest Sobel response on one axis for an 8-bit step edge.
const SOBEL_FULL_SCALE: f64 = 4.0 * 255.0;

/// Share of fish pixels per category, in percent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ColorComposition {
    /// White pixels, `[0, 100]`.
    pub white_pct: f64,
    /// Red pixels, `[0, 100]`.
    pub red_pct: f64,
    /// Black pixels, `[0, 100]`.
    pub black_pct: f64,
    /// Pixels no category claimed, `[0, 100]`.
    pub unclassified_pct: f64,
}

impl ColorComposition {
    /// Percentage for one category.
    #[must_use]
    pub const fn pct(&self, category: ColorCategory) -> f64 {
        match category {
            ColorCategory::Black => self.black_pct,
            ColorCategory::White => self.white_pct,
            ColorCategory::Red => self.red_pct,
        }
    }
}

/// The three quality sub-scores, each in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualityBreakdown {
    /// Normalized mean saturation of colored pixels.
    pub saturation: f64,
    /// Normalized boundary gradient.
    pub edge_sharpness: f64,
    /// Spatial evenness of category density.
    pub evenness: f64,
}

impl QualityBreakdown {
    /// Weighted mean of the sub-scores, clamped to `[0, 1]`.
    ///
    /// Weights are normalized by their sum.
    #[must_use]
    pub fn combine(&self, weights: [f64; 3]) -> f64 {
        let total: f64 = weights.iter().sum();
        if total <= 0.0 {
            return 0.0;
        }
        let scores = [self.saturation, self.edge_sharpness, self.evenness];
        let weighted: f64 = scores.iter().zip(weights).map(|(s, w)| s * w).sum();
        (weighted / total).clamp(0.0, 1.0)
    }
}

/// Output of the color stage.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ColorMetrics {
    /// Category percentages.
    pub composition: ColorComposition,
    /// Sub-scores behind [`quality`](Self::quality).
    pub breakdown: QualityBreakdown,
    /// Overall color quality, `[0, 1]`.
    pub quality: f64,
    /// Number of fish pixels measured.
    pub pixel_count: u64,
}

/// Per-pixel classification of the fish bounding box.
struct Region {
    bbox: BoundingBox,
    /// `None` outside the mask, `Some(None)` for unclassified fish pixels.
    labels: Vec<Option<Option<ColorCategory>>>,
    saturation: GrayImage,
    value: GrayImage,
    counts: [u64; 3],
    total: u64,
    colored_saturation_sum: f64,
    colored_count: u64,
}

const fn slot(category: ColorCategory) -> usize {
    match category {
        ColorCategory::Black => 0,
        ColorCategory::White => 1,
        ColorCategory::Red => 2,
    }
}

impl Region {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn classify(image: &RgbImage, mask: &Mask, table: &CalibrationTable, bbox: BoundingBox) -> Self {
        let (w, h) = (bbox.width(), bbox.height());
        let mut region = Self {
            bbox,
            labels: vec![None; w as usize * h as usize],
            saturation: GrayImage::new(w, h),
            value: GrayImage::new(w, h),
            counts: [0; 3],
            total: 0,
            colored_saturation_sum: 0.0,
            colored_count: 0,
        };
        for ly in 0..h {
            for lx in 0..w {
                let (x, y) = (bbox.min_x + lx, bbox.min_y + ly);
                let hsv = Hsv::from_rgb(*image.get_pixel(x, y));
                region
                    .saturation
                    .put_pixel(lx, ly, Luma([(hsv.s * 255.0).round() as u8]));
                region
                    .value
                    .put_pixel(lx, ly, Luma([(hsv.v * 255.0).round() as u8]));
                if !mask.contains(x, y) {
                    continue;
                }
                let category = table.classify(hsv);
                region.total += 1;
                if let Some(c) = category {
                    region.counts[slot(c)] += 1;
                }
                if !matches!(category, Some(ColorCategory::White | ColorCategory::Black)) {
                    region.colored_saturation_sum += hsv.s;
                    region.colored_count += 1;
                }
                let idx = region.index(lx, ly);
                region.labels[idx] = Some(category);
            }
        }
        region
    }

    const fn index(&self, lx: u32, ly: u32) -> usize {
        ly as usize * self.bbox.width() as usize + lx as usize
    }

    fn label(&self, lx: i64, ly: i64) -> Option<Option<ColorCategory>> {
        let (Ok(lx), Ok(ly)) = (u32::try_from(lx), u32::try_from(ly)) else {
            return None;
        };
        if lx >= self.bbox.width() || ly >= self.bbox.height() {
            return None;
        }
        self.labels[self.index(lx, ly)]
    }

    #[allow(clippy::cast_precision_loss)]
    fn pct(&self, count: u64) -> f64 {
        count as f64 / self.total as f64 * 100.0
    }

    fn composition(&self) -> ColorComposition {
        let classified: u64 = self.counts.iter().sum();
        ColorComposition {
            white_pct: self.pct(self.counts[slot(ColorCategory::White)]),
            red_pct: self.pct(self.counts[slot(ColorCategory::Red)]),
            black_pct: self.pct(self.counts[slot(ColorCategory::Black)]),
            unclassified_pct: self.pct(self.total - classified),
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn saturation_score(&self, config: &ColorConfig) -> f64 {
        if self.colored_count == 0 {
            return NEUTRAL;
        }
        let mean = self.colored_saturation_sum / self.colored_count as f64;
        (mean / config.max_expected_saturation).clamp(0.0, 1.0)
    }

    #[allow(clippy::cast_precision_loss)]
    fn edge_sharpness_score(&self, config: &ColorConfig) -> f64 {
        let grad_s = imageproc::gradients::sobel_gradients(&self.saturation);
        let grad_v = imageproc::gradients::sobel_gradients(&self.value);
        let mut sum = 0.0;
        let mut count = 0_u64;
        for ly in 0..self.bbox.height() {
            for lx in 0..self.bbox.width() {
                let Some(here) = self.labels[self.index(lx, ly)] else {
                    continue;
                };
                let (sx, sy) = (i64::from(lx), i64::from(ly));
                let boundary = [(1, 0), (-1, 0), (0, 1), (0, -1)]
                    .iter()
                    .filter_map(|(dx, dy)| self.label(sx + dx, sy + dy))
                    .any(|other| other != here);
                if !boundary {
                    continue;
                }
                let g = grad_s.get_pixel(lx, ly).0[0].max(grad_v.get_pixel(lx, ly).0[0]);
                sum += (f64::from(g) / SOBEL_FULL_SCALE).min(1.0);
                count += 1;
            }
        }
        if count == 0 {
            return NEUTRAL;
        }
        (sum / count as f64 / config.edge_gradient_reference).clamp(0.0, 1.0)
    }

    #[allow(clippy::cast_precision_loss)]
    fn evenness_score(&self) -> f64 {
        let classified: u64 = self.counts.iter().sum();
        if classified == 0 {
            return NEUTRAL;
        }
        let mid_x = self.bbox.width() / 2;
        let mid_y = self.bbox.height() / 2;
        let mut fish = [0_u64; 4];
        let mut per_category = [[0_u64; 4]; 3];
        for ly in 0..self.bbox.height() {
            for lx in 0..self.bbox.width() {
                let Some(label) = self.labels[self.index(lx, ly)] else {
                    continue;
                };
                let q = usize::from(lx >= mid_x) + 2 * usize::from(ly >= mid_y);
                fish[q] += 1;
                if let Some(c) = label {
                    per_category[slot(c)][q] += 1;
                }
            }
        }

        let mut score = 0.0;
        for (slot_counts, &total) in per_category.iter().zip(&self.counts) {
            if total == 0 {
                continue;
            }
            let densities: Vec<f64> = slot_counts
                .iter()
                .zip(&fish)
                .filter(|&(_, &n)| n > 0)
                .map(|(&c, &n)| c as f64 / n as f64)
                .collect();
            let evenness = 1.0 - coefficient_of_variation(&densities);
            let share = total as f64 / classified as f64;
            score += share * evenness.clamp(0.0, 1.0);
        }
        score
    }
}

/// Population standard deviation over mean; zero for an empty or
/// all-zero sample.
#[allow(clippy::cast_precision_loss)]
fn coefficient_of_variation(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    if mean <= 0.0 {
        return 0.0;
    }
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    variance.sqrt() / mean
}

/// Measure color composition and quality of the masked fish.
///
/// # Errors
///
/// Returns [`AppraisalError::DimensionMismatch`] when `mask` does not
/// match `image`, and [`AppraisalError::EmptyMask`] when the mask has no
/// pixels.
pub fn quantify_color(
    image: &RgbImage,
    mask: &Mask,
    table: &CalibrationTable,
    config: &ColorConfig,
) -> Result<ColorMetrics, AppraisalError> {
    check_dimensions(mask, image)?;
    let bbox = mask.bounding_box().ok_or(AppraisalError::EmptyMask)?;
    let region = Region::classify(image, mask, table, bbox);

    let composition = region.composition();
    let breakdown = QualityBreakdown {
        saturation: region.saturation_score(config),
        edge_sharpness: region.edge_sharpness_score(config),
        evenness: region.evenness_score(),
    };
    let quality = breakdown.combine(config.quality_weights);
    tracing::debug!(
        white_pct = composition.white_pct,
        red_pct = composition.red_pct,
        black_pct = composition.black_pct,
        saturation = breakdown.saturation,
        edge_sharpness = breakdown.edge_sharpness,
        evenness = breakdown.evenness,
        quality,
        "quantified color",
    );
    Ok(ColorMetrics {
        composition,
        breakdown,
        quality,
        pixel_count: region.total,
    })
}
