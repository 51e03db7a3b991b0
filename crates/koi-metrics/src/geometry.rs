//! Pixel-level measurements over a mask: area, centroid and principal
//! axis.
//!
//! The principal axis is the eigenvector of the larger eigenvalue of the
//! pixel-coordinate covariance matrix. Angles are measured in image
//! coordinates (x right, y down) from the +x axis towards +y and
//! normalized to `[0, π)`, since an axis has no direction.

use std::f64::consts::PI;

use serde::{Deserialize, Serialize};

use crate::types::{AppraisalError, Mask, Point};

/// Population covariance of mask pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Covariance {
    /// Variance along x.
    pub xx: f64,
    /// Covariance of x and y.
    pub xy: f64,
    /// Variance along y.
    pub yy: f64,
}

impl Covariance {
    /// Eigenvalues `(larger, smaller)` of the symmetric 2x2 matrix.
    #[must_use]
    pub fn eigenvalues(&self) -> (f64, f64) {
        let mean = 0.5 * (self.xx + self.yy);
        let half_diff = 0.5 * (self.xx - self.yy);
        let radius = half_diff.hypot(self.xy);
        (mean + radius, mean - radius)
    }

    /// Angle of the eigenvector belonging to the larger eigenvalue,
    /// normalized to `[0, π)`.
    #[must_use]
    pub fn major_angle(&self) -> f64 {
        let theta = 0.5 * (2.0 * self.xy).atan2(self.xx - self.yy);
        normalize_axis_angle(theta)
    }
}

/// Fold an angle into `[0, π)`.
#[must_use]
pub fn normalize_axis_angle(theta: f64) -> f64 {
    let folded = theta.rem_euclid(PI);
    // rem_euclid can round up to exactly PI for tiny negative inputs.
    if folded >= PI { 0.0 } else { folded }
}

/// Area, centroid and principal axis of a non-empty mask.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MaskGeometry {
    /// Number of inside pixels.
    pub area: u64,
    /// Mean pixel position.
    pub centroid: Point,
    /// Pixel-coordinate covariance.
    pub covariance: Covariance,
    /// Variance along the major axis (larger eigenvalue).
    pub major_variance: f64,
    /// Variance along the minor axis (smaller eigenvalue).
    pub minor_variance: f64,
    /// Major axis angle in `[0, π)`.
    pub principal_angle: f64,
}

impl MaskGeometry {
    /// Measure a mask.
    ///
    /// # Errors
    ///
    /// Returns [`AppraisalError::EmptyMask`] when the mask has no pixels.
    #[allow(clippy::cast_precision_loss)]
    pub fn compute(mask: &Mask) -> Result<Self, AppraisalError> {
        let mut area = 0_u64;
        let mut sum_x = 0.0;
        let mut sum_y = 0.0;
        for (x, y) in mask.pixels() {
            area += 1;
            sum_x += f64::from(x);
            sum_y += f64::from(y);
        }
        if area == 0 {
            return Err(AppraisalError::EmptyMask);
        }

        let n = area as f64;
        let centroid = Point::new(sum_x / n, sum_y / n);

        // Central moments in a second pass for numerical stability on
        // large photographs.
        let (mut xx, mut xy, mut yy) = (0.0, 0.0, 0.0);
        for (x, y) in mask.pixels() {
            let dx = f64::from(x) - centroid.x;
            let dy = f64::from(y) - centroid.y;
            xx = dx.mul_add(dx, xx);
            xy = dx.mul_add(dy, xy);
            yy = dy.mul_add(dy, yy);
        }
        let covariance = Covariance {
            xx: xx / n,
            xy: xy / n,
            yy: yy / n,
        };
        let (major_variance, minor_variance) = covariance.eigenvalues();

        Ok(Self {
            area,
            centroid,
            covariance,
            major_variance,
            minor_variance,
            principal_angle: covariance.major_angle(),
        })
    }

    /// Unit vector along the major axis.
    #[must_use]
    pub fn major_axis(&self) -> Point {
        let (sin, cos) = self.principal_angle.sin_cos();
        Point::new(cos, sin)
    }

    /// Unit vector along the minor axis (major rotated by +90°).
    #[must_use]
    pub fn minor_axis(&self) -> Point {
        let (sin, cos) = self.principal_angle.sin_cos();
        Point::new(-sin, cos)
    }

    /// Whether the principal axis is undefined: a single pixel, or an
    /// isotropic mask whose eigenvalues agree within `tolerance`
    /// (relative to the larger one).
    #[must_use]
    pub fn is_axis_degenerate(&self, tolerance: f64) -> bool {
        if self.area <= 1 || self.major_variance <= 0.0 {
            return true;
        }
        (self.major_variance - self.minor_variance) <= tolerance * self.major_variance
    }

    /// Fail when the principal axis is undefined.
    ///
    /// # Errors
    ///
    /// Returns [`AppraisalError::DegenerateAxis`] when
    /// [`is_axis_degenerate`](Self::is_axis_degenerate) holds.
    pub fn require_axis(&self, tolerance: f64) -> Result<(), AppraisalError> {
        if self.is_axis_degenerate(tolerance) {
            Err(AppraisalError::DegenerateAxis)
        } else {
            Ok(())
        }
    }

    /// Extent of `mask` along the major axis in pixels.
    ///
    /// This is the spread of pixel-centre projections plus one pixel, so
    /// an axis-aligned run of `n` pixels measures exactly `n`. `mask`
    /// should be the mask this geometry was computed from.
    #[must_use]
    pub fn major_axis_extent(&self, mask: &Mask) -> f64 {
        let axis = self.major_axis();
        let (min, max) = mask.pixels().fold(
            (f64::INFINITY, f64::NEG_INFINITY),
            |(min, max), (x, y)| {
                let t = (f64::from(x) - self.centroid.x)
                    .mul_add(axis.x, (f64::from(y) - self.centroid.y) * axis.y);
                (min.min(t), max.max(t))
            },
        );
        if min.is_finite() { max - min + 1.0 } else { 0.0 }
    }
}
