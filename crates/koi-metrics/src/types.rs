//! Shared types for the koi appraisal pipeline.

use serde::{Deserialize, Serialize};

/// Re-export `RgbImage` so downstream crates can hand photographs to the
/// pipeline without depending on `image` directly.
pub use image::RgbImage;

/// Re-export `GrayImage`, the raster form masks are built from.
pub use image::GrayImage;

/// A 2D point in image coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    /// Horizontal position (pixels from left edge).
    pub x: f64,
    /// Vertical position (pixels from top edge).
    pub y: f64,
}

impl Point {
    /// Create a new point.
    #[must_use]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Squared Euclidean distance to another point.
    #[must_use]
    pub fn distance_squared(self, other: Self) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        dx.mul_add(dx, dy * dy)
    }

    /// Euclidean distance to another point.
    #[must_use]
    pub fn distance(self, other: Self) -> f64 {
        self.distance_squared(other).sqrt()
    }
}

/// Image dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Dimensions {
    /// Dimensions of an RGB photograph.
    #[must_use]
    pub fn of(image: &RgbImage) -> Self {
        Self {
            width: image.width(),
            height: image.height(),
        }
    }
}

/// Inclusive pixel bounding box of a mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    /// Leftmost column.
    pub min_x: u32,
    /// Topmost row.
    pub min_y: u32,
    /// Rightmost column (inclusive).
    pub max_x: u32,
    /// Bottom row (inclusive).
    pub max_y: u32,
}

impl BoundingBox {
    /// Width in pixels (inclusive bounds).
    #[must_use]
    pub const fn width(&self) -> u32 {
        self.max_x - self.min_x + 1
    }

    /// Height in pixels (inclusive bounds).
    #[must_use]
    pub const fn height(&self) -> u32 {
        self.max_y - self.min_y + 1
    }
}

/// Binary indicator of one object instance over image pixels.
///
/// Any non-zero luma value counts as "inside". Masks are immutable once
/// built; every stage borrows them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mask(GrayImage);

impl Mask {
    /// Wrap a grayscale raster as a mask (non-zero = inside).
    #[must_use]
    pub const fn from_gray(raster: GrayImage) -> Self {
        Self(raster)
    }

    /// Build a mask by evaluating `inside` at every pixel.
    #[must_use]
    pub fn from_fn(width: u32, height: u32, mut inside: impl FnMut(u32, u32) -> bool) -> Self {
        Self(GrayImage::from_fn(width, height, |x, y| {
            image::Luma([if inside(x, y) { 255 } else { 0 }])
        }))
    }

    /// Raster dimensions.
    #[must_use]
    pub fn dimensions(&self) -> Dimensions {
        Dimensions {
            width: self.0.width(),
            height: self.0.height(),
        }
    }

    /// Whether `(x, y)` lies inside the mask. Out-of-range coordinates
    /// are outside.
    #[must_use]
    pub fn contains(&self, x: u32, y: u32) -> bool {
        x < self.0.width() && y < self.0.height() && self.0.get_pixel(x, y).0[0] != 0
    }

    /// Signed-coordinate variant of [`contains`](Self::contains).
    #[must_use]
    pub fn contains_signed(&self, x: i64, y: i64) -> bool {
        match (u32::try_from(x), u32::try_from(y)) {
            (Ok(x), Ok(y)) => self.contains(x, y),
            _ => false,
        }
    }

    /// Iterate over the coordinates of every inside pixel, row-major.
    pub fn pixels(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        self.0
            .enumerate_pixels()
            .filter(|(_, _, p)| p.0[0] != 0)
            .map(|(x, y, _)| (x, y))
    }

    /// Number of inside pixels.
    #[must_use]
    pub fn area(&self) -> u64 {
        self.0.pixels().map(|p| u64::from(p.0[0] != 0)).sum()
    }

    /// Tight bounding box, or `None` for an empty mask.
    #[must_use]
    pub fn bounding_box(&self) -> Option<BoundingBox> {
        self.pixels().fold(None, |acc, (x, y)| {
            Some(match acc {
                None => BoundingBox {
                    min_x: x,
                    min_y: y,
                    max_x: x,
                    max_y: y,
                },
                Some(b) => BoundingBox {
                    min_x: b.min_x.min(x),
                    min_y: b.min_y.min(y),
                    max_x: b.max_x.max(x),
                    max_y: b.max_y.max(y),
                },
            })
        })
    }

    /// The underlying raster.
    #[must_use]
    pub const fn as_gray(&self) -> &GrayImage {
        &self.0
    }
}

/// One instance reported by an external detector: a mask, a confidence
/// score and a class label.
///
/// For the coin detector the label is the denomination; for the fish
/// segmenter it is `"koi"`.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    /// Instance mask at image resolution.
    pub mask: Mask,
    /// Detector confidence in `[0, 1]`.
    pub confidence: f32,
    /// Class label.
    pub label: String,
}

impl Detection {
    /// Create a detection.
    #[must_use]
    pub fn new(mask: Mask, confidence: f32, label: impl Into<String>) -> Self {
        Self {
            mask,
            confidence,
            label: label.into(),
        }
    }
}

/// Raw output of the external pattern classifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternPrediction {
    /// Predicted class name (e.g. `"kohaku"`).
    pub label: String,
    /// Classifier confidence in `[0, 1]`.
    pub confidence: f32,
}

/// Everything the external vision models reported for one photograph.
#[derive(Debug, Clone, PartialEq)]
pub struct Detections {
    /// Fish instances from the segmentation detector.
    pub fish: Vec<Detection>,
    /// Coin candidates from the coin detector.
    pub coins: Vec<Detection>,
    /// Top-1 output of the pattern classifier.
    pub pattern: PatternPrediction,
}

/// Errors that can occur while appraising a photograph or training the
/// price model.
///
/// Uses custom `Serialize`/`Deserialize` because `image::ImageError`
/// does not implement serde traits. The `ImageDecode` variant is
/// serialized as its `Display` string and comes back as a decoding error
/// carrying that message.
#[derive(Debug, thiserror::Error)]
pub enum AppraisalError {
    /// Failed to decode the input image.
    #[error("failed to decode image: {0}")]
    ImageDecode(#[from] image::ImageError),

    /// The input image bytes were empty.
    #[error("input image data is empty")]
    EmptyInput,

    /// A mask (or the masked fish region) contains no pixels.
    #[error("mask contains no pixels")]
    EmptyMask,

    /// The segmentation detector found no usable fish.
    #[error("no koi detected in the image")]
    NoFishDetected,

    /// No coin candidate cleared the confidence threshold.
    #[error("no reference coin detected")]
    NoCoinDetected,

    /// The selected coin's label has no entry in the coin reference table.
    #[error("unknown coin denomination: {0}")]
    UnknownDenomination(String),

    /// The principal axis is undefined (single pixel or isotropic mask).
    #[error("principal axis is undefined for this mask")]
    DegenerateAxis,

    /// A mask does not cover the same pixel grid as the image.
    #[error("mask is {mask_width}x{mask_height} but image is {image_width}x{image_height}")]
    DimensionMismatch {
        /// Mask width.
        mask_width: u32,
        /// Mask height.
        mask_height: u32,
        /// Image width.
        image_width: u32,
        /// Image height.
        image_height: u32,
    },

    /// A stage produced a missing or out-of-range feature, or a model was
    /// trained against a different feature schema.
    #[error("feature schema mismatch: {0}")]
    FeatureSchemaMismatch(String),

    /// Prediction was requested before any model was installed.
    #[error("no regression model is loaded")]
    ModelNotLoaded,

    /// One training row could not be turned into a feature vector.
    #[error("row {reference}: {reason}")]
    RowExtraction {
        /// Image reference of the failed row.
        reference: String,
        /// Why extraction failed.
        reason: String,
    },

    /// Too few rows survived extraction to fit a model.
    #[error("insufficient training data: {usable} usable rows, at least {required} required")]
    InsufficientData {
        /// Rows that produced a feature vector.
        usable: usize,
        /// Configured minimum.
        required: usize,
    },

    /// An external detector failed.
    #[error("detector failed: {0}")]
    Detector(String),

    /// Configuration, calibration or reference data is invalid.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl AppraisalError {
    /// Stable machine-readable name of the error kind.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::ImageDecode(_) => "image_decode",
            Self::EmptyInput => "empty_input",
            Self::EmptyMask => "empty_mask",
            Self::NoFishDetected => "no_fish_detected",
            Self::NoCoinDetected => "no_coin_detected",
            Self::UnknownDenomination(_) => "unknown_denomination",
            Self::DegenerateAxis => "degenerate_axis",
            Self::DimensionMismatch { .. } => "dimension_mismatch",
            Self::FeatureSchemaMismatch(_) => "feature_schema_mismatch",
            Self::ModelNotLoaded => "model_not_loaded",
            Self::RowExtraction { .. } => "row_extraction",
            Self::InsufficientData { .. } => "insufficient_data",
            Self::Detector(_) => "detector",
            Self::InvalidConfig(_) => "invalid_config",
        }
    }
}

/// Serde-compatible proxy for `AppraisalError`.
///
/// `image::ImageError` does not implement serde, so the `ImageDecode`
/// variant stores its `Display` string instead.
#[derive(Serialize, Deserialize)]
enum AppraisalErrorProxy {
    ImageDecode(String),
    EmptyInput,
    EmptyMask,
    NoFishDetected,
    NoCoinDetected,
    UnknownDenomination(String),
    DegenerateAxis,
    DimensionMismatch {
        mask_width: u32,
        mask_height: u32,
        image_width: u32,
        image_height: u32,
    },
    FeatureSchemaMismatch(String),
    ModelNotLoaded,
    RowExtraction {
        reference: String,
        reason: String,
    },
    InsufficientData {
        usable: usize,
        required: usize,
    },
    Detector(String),
    InvalidConfig(String),
}

impl Serialize for AppraisalError {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let proxy = match self {
            Self::ImageDecode(e) => AppraisalErrorProxy::ImageDecode(e.to_string()),
            Self::EmptyInput => AppraisalErrorProxy::EmptyInput,
            Self::EmptyMask => AppraisalErrorProxy::EmptyMask,
            Self::NoFishDetected => AppraisalErrorProxy::NoFishDetected,
            Self::NoCoinDetected => AppraisalErrorProxy::NoCoinDetected,
            Self::UnknownDenomination(s) => AppraisalErrorProxy::UnknownDenomination(s.clone()),
            Self::DegenerateAxis => AppraisalErrorProxy::DegenerateAxis,
            Self::DimensionMismatch {
                mask_width,
                mask_height,
                image_width,
                image_height,
            } => AppraisalErrorProxy::DimensionMismatch {
                mask_width: *mask_width,
                mask_height: *mask_height,
                image_width: *image_width,
                image_height: *image_height,
            },
            Self::FeatureSchemaMismatch(s) => AppraisalErrorProxy::FeatureSchemaMismatch(s.clone()),
            Self::ModelNotLoaded => AppraisalErrorProxy::ModelNotLoaded,
            Self::RowExtraction { reference, reason } => AppraisalErrorProxy::RowExtraction {
                reference: reference.clone(),
                reason: reason.clone(),
            },
            Self::InsufficientData { usable, required } => AppraisalErrorProxy::InsufficientData {
                usable: *usable,
                required: *required,
            },
            Self::Detector(s) => AppraisalErrorProxy::Detector(s.clone()),
            Self::InvalidConfig(s) => AppraisalErrorProxy::InvalidConfig(s.clone()),
        };
        proxy.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for AppraisalError {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let proxy = AppraisalErrorProxy::deserialize(deserializer)?;
        Ok(match proxy {
            // Only the message survives; the format hint is lost.
            AppraisalErrorProxy::ImageDecode(msg) => {
                Self::ImageDecode(image::ImageError::Decoding(
                    image::error::DecodingError::new(image::error::ImageFormatHint::Unknown, msg),
                ))
            }
            AppraisalErrorProxy::EmptyInput => Self::EmptyInput,
            AppraisalErrorProxy::EmptyMask => Self::EmptyMask,
            AppraisalErrorProxy::NoFishDetected => Self::NoFishDetected,
            AppraisalErrorProxy::NoCoinDetected => Self::NoCoinDetected,
            AppraisalErrorProxy::UnknownDenomination(s) => Self::UnknownDenomination(s),
            AppraisalErrorProxy::DegenerateAxis => Self::DegenerateAxis,
            AppraisalErrorProxy::DimensionMismatch {
                mask_width,
                mask_height,
                image_width,
                image_height,
            } => Self::DimensionMismatch {
                mask_width,
                mask_height,
                image_width,
                image_height,
            },
            AppraisalErrorProxy::FeatureSchemaMismatch(s) => Self::FeatureSchemaMismatch(s),
            AppraisalErrorProxy::ModelNotLoaded => Self::ModelNotLoaded,
            AppraisalErrorProxy::RowExtraction { reference, reason } => {
                Self::RowExtraction { reference, reason }
            }
            AppraisalErrorProxy::InsufficientData { usable, required } => {
                Self::InsufficientData { usable, required }
            }
            AppraisalErrorProxy::Detector(s) => Self::Detector(s),
            AppraisalErrorProxy::InvalidConfig(s) => Self::InvalidConfig(s),
        })
    }
}

/// Fail with [`AppraisalError::DimensionMismatch`] unless `mask` covers
/// the same pixel grid as `image`.
pub(crate) fn check_dimensions(mask: &Mask, image: &RgbImage) -> Result<(), AppraisalError> {
    let m = mask.dimensions();
    let i = Dimensions::of(image);
    if m == i {
        Ok(())
    } else {
        Err(AppraisalError::DimensionMismatch {
            mask_width: m.width,
            mask_height: m.height,
            image_width: i.width,
            image_height: i.height,
        })
    }
}
