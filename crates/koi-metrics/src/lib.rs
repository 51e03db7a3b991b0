//! koi-metrics: Koi appraisal pipeline (sans-IO).
//!
//! Turns a photograph and the outputs of three external vision models
//! (fish segmentation, reference coin detection, variety classification)
//! into a fixed-order feature vector and a predicted price:
//! fish selection -> size -> color -> symmetry -> pattern -> features ->
//! price.
//!
//! This crate has **no I/O dependencies** -- it operates on in-memory
//! images and byte slices and returns structured data. Files, model
//! persistence and report formats live in `koi-export` and the
//! `koi-appraise` binary.
//!
//! The entry points are [`appraise`] and [`extract_features`] for single
//! photographs, [`Pipeline`] for stage-by-stage access, [`Appraiser`] for
//! shared resources and batches, and [`train`] for fitting a new model.

pub mod appraiser;
pub mod calibration;
pub mod color;
pub mod config;
pub mod decode;
pub mod detect;
pub mod features;
pub mod geometry;
pub mod metrics;
pub mod model;
pub mod pattern;
pub mod pipeline;
pub mod size;
pub mod symmetry;
pub mod train;
pub mod types;

pub use appraiser::{Appraiser, Detectors};
pub use calibration::{CalibrationTable, ColorCategory, Hsv, HsvRange};
pub use color::{ColorComposition, ColorMetrics, QualityBreakdown};
pub use config::{AppraisalConfig, ColorConfig, SymmetryConfig, TrainingConfig};
pub use decode::decode;
pub use detect::{CoinDetector, FishSegmenter, PatternClassifier};
pub use features::{FEATURE_COUNT, FEATURE_NAMES, FeatureVector, SCHEMA_VERSION};
pub use geometry::MaskGeometry;
pub use metrics::AppraisalMetrics;
pub use model::{ModelSlot, RegressionModel};
pub use pattern::{PatternClass, PatternResult};
pub use pipeline::{AppraisalContext, Pipeline, appraise, extract_features};
pub use size::{CoinReference, CoinScale, SizeEstimate};
pub use symmetry::SymmetryMetrics;
pub use train::{RegressionMetrics, SkippedRow, TrainingOutcome, TrainingRow, train};
pub use types::{
    AppraisalError, BoundingBox, Detection, Detections, Dimensions, GrayImage, Mask,
    PatternPrediction, Point, RgbImage,
};
