//! Bilateral symmetry of the fish about its principal axis.
//!
//! Pixels are expressed in the frame of the principal axis: `w` runs
//! along the body (major axis) and `u` across it (minor axis), both
//! relative to the centroid. This is the coordinate form of rotating the
//! fish upright about its centroid, without resampling. Pixels with
//! `u < 0` form the left half and `u > 0` the right half; mirroring the
//! right half flips the sign of `u`, which leaves its `w` coordinates
//! unchanged.
//!
//! Each half is summarized by a 2-D histogram (body band along `w` ×
//! luma bin) normalized to frequencies, and the halves are compared with
//! a chi-squared statistic mapped to `[0, 1]` by `1 / (1 + χ² / N)`.

use std::collections::HashSet;

use image::Pixel;
use serde::{Deserialize, Serialize};

use crate::config::SymmetryConfig;
use crate::geometry::MaskGeometry;
use crate::types::{AppraisalError, Mask, RgbImage, check_dimensions};

/// Pixels closer than this to the axis belong to neither half.
const AXIS_EPSILON: f64 = 1e-6;

/// Output of the symmetry stage.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SymmetryMetrics {
    /// Symmetry score, `[0, 1]`; 1 is perfectly symmetric.
    pub score: f64,
    /// Chi-squared distance between the half histograms.
    pub chi_square: f64,
    /// Pixels in the left half.
    pub left_pixels: u64,
    /// Pixels in the (mirrored) right half.
    pub right_pixels: u64,
    /// Intersection over union of the two half silhouettes after
    /// mirroring. Diagnostic only; not part of the score.
    pub mask_overlap: f64,
}

/// Chi-squared distance `Σ (observed − expected)² / (expected + ε)`.
#[must_use]
pub fn chi_square(observed: &[f64], expected: &[f64], epsilon: f64) -> f64 {
    observed
        .iter()
        .zip(expected)
        .map(|(o, e)| (o - e).powi(2) / (e + epsilon))
        .sum()
}

/// Map a chi-squared distance to `[0, 1]`.
#[must_use]
pub fn chi_square_to_score(chi_square: f64, scale: f64) -> f64 {
    1.0 / (1.0 + chi_square / scale)
}

struct Half {
    histogram: Vec<f64>,
    pixels: u64,
    silhouette: HashSet<(i64, i64)>,
}

impl Half {
    fn new(cells: usize) -> Self {
        Self {
            histogram: vec![0.0; cells],
            pixels: 0,
            silhouette: HashSet::new(),
        }
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
    fn add(&mut self, cell: usize, u: f64, w: f64) {
        self.histogram[cell] += 1.0;
        self.pixels += 1;
        self.silhouette.insert((u.abs().round() as i64, w.round() as i64));
    }

    #[allow(clippy::cast_precision_loss)]
    fn normalize(&mut self) {
        let total = self.pixels as f64;
        for v in &mut self.histogram {
            *v /= total;
        }
    }
}

#[allow(clippy::cast_precision_loss)]
fn overlap(a: &HashSet<(i64, i64)>, b: &HashSet<(i64, i64)>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f64 / union as f64
}

/// Score the bilateral symmetry of the masked fish.
///
/// `geometry` must have been computed from `mask`.
///
/// # Errors
///
/// Returns [`AppraisalError::InvalidConfig`] when `config` fails
/// [`SymmetryConfig::validate`],
/// [`AppraisalError::DimensionMismatch`] when `mask` does not
/// match `image`, [`AppraisalError::EmptyMask`] for an empty mask, and
/// [`AppraisalError::DegenerateAxis`] when the principal axis is
/// undefined or either half has fewer than
/// [`min_half_pixels`](SymmetryConfig::min_half_pixels).
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
pub fn score_symmetry(
    image: &RgbImage,
    mask: &Mask,
    geometry: &MaskGeometry,
    config: &SymmetryConfig,
    axis_tolerance: f64,
) -> Result<SymmetryMetrics, AppraisalError> {
    config.validate()?;
    check_dimensions(mask, image)?;
    if geometry.area == 0 {
        return Err(AppraisalError::EmptyMask);
    }
    geometry.require_axis(axis_tolerance)?;

    let major = geometry.major_axis();
    let minor = geometry.minor_axis();
    let c = geometry.centroid;
    let aligned: Vec<(f64, f64, u8)> = mask
        .pixels()
        .map(|(x, y)| {
            let dx = f64::from(x) - c.x;
            let dy = f64::from(y) - c.y;
            let u = dx.mul_add(minor.x, dy * minor.y);
            let w = dx.mul_add(major.x, dy * major.y);
            (u, w, image.get_pixel(x, y).to_luma().0[0])
        })
        .collect();

    let (w_min, w_max) = aligned
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &(_, w, _)| {
            (lo.min(w), hi.max(w))
        });
    let span = w_max - w_min;
    let bands = config.length_bands;
    let bins = config.intensity_bins;
    let band_of = |w: f64| {
        if span <= 0.0 {
            0
        } else {
            (((w - w_min) / span * bands as f64) as usize).min(bands - 1)
        }
    };

    let mut left = Half::new(bands * bins);
    let mut right = Half::new(bands * bins);
    for &(u, w, luma) in &aligned {
        let cell = band_of(w) * bins + usize::from(luma) * bins / 256;
        if u < -AXIS_EPSILON {
            left.add(cell, u, w);
        } else if u > AXIS_EPSILON {
            right.add(cell, u, w);
        }
    }
    if left.pixels < config.min_half_pixels || right.pixels < config.min_half_pixels {
        tracing::debug!(
            left = left.pixels,
            right = right.pixels,
            min = config.min_half_pixels,
            "symmetry halves too small",
        );
        return Err(AppraisalError::DegenerateAxis);
    }
    left.normalize();
    right.normalize();

    let chi2 = chi_square(&left.histogram, &right.histogram, config.chi_square_epsilon);
    let score = chi_square_to_score(chi2, config.chi_square_scale);
    let mask_overlap = overlap(&left.silhouette, &right.silhouette);
    tracing::debug!(
        angle = geometry.principal_angle,
        left = left.pixels,
        right = right.pixels,
        chi2,
        score,
        mask_overlap,
        "scored symmetry",
    );
    Ok(SymmetryMetrics {
        score,
        chi_square: chi2,
        left_pixels: left.pixels,
        right_pixels: right.pixels,
        mask_overlap,
    })
}
