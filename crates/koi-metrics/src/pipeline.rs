//! Stage-by-stage appraisal of one photograph.
//!
//! [`Pipeline`] drives the stages in order, each consuming the previous
//! state and returning the next one (or a `Result` for fallible stages):
//!
//! ```rust
//! # use koi_metrics::{AppraisalContext, AppraisalError, Detections, Pipeline, RegressionModel, RgbImage};
//! # fn run(image: &RgbImage, detections: &Detections, model: &RegressionModel) -> Result<(), AppraisalError> {
//! let context = AppraisalContext::default();
//! let metrics = Pipeline::new(image, detections, &context)
//!     .select_fish()?
//!     .estimate_size()?
//!     .quantify_color()?
//!     .score_symmetry()?
//!     .adapt_pattern()
//!     .assemble()?
//!     .predict(model)?;
//! # Ok(())
//! # }
//! ```
//!
//! Every state exposes the intermediates computed so far. Training and
//! inference share [`extract_features`], which stops after
//! [`PatternAdapted::assemble`].

use crate::calibration::CalibrationTable;
use crate::color::{ColorMetrics, quantify_color};
use crate::config::AppraisalConfig;
use crate::detect::select_fish;
use crate::features::FeatureVector;
use crate::geometry::MaskGeometry;
use crate::metrics::AppraisalMetrics;
use crate::model::RegressionModel;
use crate::pattern::{PatternResult, adapt_pattern};
use crate::size::{CoinReference, SizeEstimate, estimate_size};
use crate::symmetry::{SymmetryMetrics, score_symmetry};
use crate::types::{
    AppraisalError, Detection, Detections, PatternPrediction, RgbImage, check_dimensions,
};

/// Read-only reference data every appraisal needs.
///
/// Loaded once per process and shared by all requests; training must use
/// the same context as inference.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AppraisalContext {
    /// Stage parameters.
    pub config: AppraisalConfig,
    /// Color category boundaries.
    pub calibration: CalibrationTable,
    /// Coin diameters.
    pub coins: CoinReference,
}

impl AppraisalContext {
    /// Bundle and validate reference data.
    ///
    /// # Errors
    ///
    /// Returns [`AppraisalError::InvalidConfig`] when any part fails its
    /// own validation.
    pub fn new(
        config: AppraisalConfig,
        calibration: CalibrationTable,
        coins: CoinReference,
    ) -> Result<Self, AppraisalError> {
        config.validate()?;
        calibration.validate()?;
        coins.validate()?;
        Ok(Self {
            config,
            calibration,
            coins,
        })
    }
}

/// Entry point for a staged appraisal.
pub struct Pipeline;

impl Pipeline {
    /// Start a pipeline over a decoded photograph and its detections.
    pub const fn new<'a>(
        image: &'a RgbImage,
        detections: &'a Detections,
        context: &'a AppraisalContext,
    ) -> Pending<'a> {
        Pending {
            inputs: Inputs {
                image,
                detections,
                context,
            },
        }
    }
}

#[derive(Clone, Copy)]
struct Inputs<'a> {
    image: &'a RgbImage,
    detections: &'a Detections,
    context: &'a AppraisalContext,
}

impl Inputs<'_> {
    const fn config(&self) -> &AppraisalConfig {
        &self.context.config
    }
}

/// Inputs received, nothing computed yet.
#[must_use = "pipeline stages are consumed by advancing; call .select_fish() to continue"]
pub struct Pending<'a> {
    inputs: Inputs<'a>,
}

impl<'a> Pending<'a> {
    /// The photograph.
    #[must_use]
    pub const fn image(&self) -> &'a RgbImage {
        self.inputs.image
    }

    /// Choose the fish to appraise and measure its mask.
    ///
    /// # Errors
    ///
    /// Returns [`AppraisalError::NoFishDetected`] when no fish clears the
    /// confidence threshold, and [`AppraisalError::DimensionMismatch`]
    /// when the fish or any coin mask does not match the image.
    pub fn select_fish(self) -> Result<FishSelected<'a>, AppraisalError> {
        let inputs = self.inputs;
        let fish = select_fish(&inputs.detections.fish, inputs.config().min_fish_confidence)?;
        check_dimensions(&fish.mask, inputs.image)?;
        for coin in &inputs.detections.coins {
            check_dimensions(&coin.mask, inputs.image)?;
        }
        let geometry = MaskGeometry::compute(&fish.mask)?;
        tracing::debug!(
            confidence = fish.confidence,
            area = geometry.area,
            angle = geometry.principal_angle,
            "selected fish",
        );
        Ok(FishSelected {
            inputs,
            fish,
            geometry,
        })
    }
}

/// A fish has been chosen and its geometry measured.
#[must_use = "pipeline stages are consumed by advancing; call .estimate_size() to continue"]
pub struct FishSelected<'a> {
    inputs: Inputs<'a>,
    fish: &'a Detection,
    geometry: MaskGeometry,
}

impl<'a> FishSelected<'a> {
    /// The chosen fish detection.
    #[must_use]
    pub const fn fish(&self) -> &'a Detection {
        self.fish
    }

    /// Area, centroid and principal axis of the fish mask.
    #[must_use]
    pub const fn geometry(&self) -> &MaskGeometry {
        &self.geometry
    }

    /// Calibrate against the reference coin and measure the fish.
    ///
    /// # Errors
    ///
    /// As [`estimate_size`].
    pub fn estimate_size(self) -> Result<SizeEstimated<'a>, AppraisalError> {
        let inputs = self.inputs;
        let size = estimate_size(
            &self.fish.mask,
            &self.geometry,
            &inputs.detections.coins,
            &inputs.context.coins,
            inputs.config().min_coin_confidence,
        )?;
        Ok(SizeEstimated {
            inputs,
            fish: self.fish,
            geometry: self.geometry,
            size,
        })
    }
}

/// Fish length is known.
#[must_use = "pipeline stages are consumed by advancing; call .quantify_color() to continue"]
pub struct SizeEstimated<'a> {
    inputs: Inputs<'a>,
    fish: &'a Detection,
    geometry: MaskGeometry,
    size: SizeEstimate,
}

impl<'a> SizeEstimated<'a> {
    /// Size stage output.
    #[must_use]
    pub const fn size(&self) -> &SizeEstimate {
        &self.size
    }

    /// Measure color composition and quality.
    ///
    /// # Errors
    ///
    /// As [`quantify_color`].
    pub fn quantify_color(self) -> Result<ColorQuantified<'a>, AppraisalError> {
        let inputs = self.inputs;
        let color = quantify_color(
            inputs.image,
            &self.fish.mask,
            &inputs.context.calibration,
            &inputs.config().color,
        )?;
        Ok(ColorQuantified {
            inputs,
            fish: self.fish,
            geometry: self.geometry,
            size: self.size,
            color,
        })
    }
}

/// Color has been measured.
#[must_use = "pipeline stages are consumed by advancing; call .score_symmetry() to continue"]
pub struct ColorQuantified<'a> {
    inputs: Inputs<'a>,
    fish: &'a Detection,
    geometry: MaskGeometry,
    size: SizeEstimate,
    color: ColorMetrics,
}

impl ColorQuantified<'_> {
    /// Color stage output.
    #[must_use]
    pub const fn color(&self) -> &ColorMetrics {
        &self.color
    }

    /// Score bilateral symmetry.
    ///
    /// # Errors
    ///
    /// As [`score_symmetry`].
    pub fn score_symmetry(self) -> Result<SymmetryScored, AppraisalError> {
        let inputs = self.inputs;
        let symmetry = score_symmetry(
            inputs.image,
            &self.fish.mask,
            &self.geometry,
            &inputs.config().symmetry,
            inputs.config().axis_degeneracy_tolerance,
        )?;
        Ok(SymmetryScored {
            prediction: inputs.detections.pattern.clone(),
            floor: inputs.config().pattern_confidence_floor,
            fish_confidence: self.fish.confidence,
            size: self.size,
            color: self.color,
            symmetry,
        })
    }
}

/// Symmetry has been scored. The image is no longer needed.
#[must_use = "pipeline stages are consumed by advancing; call .adapt_pattern() to continue"]
pub struct SymmetryScored {
    prediction: PatternPrediction,
    floor: f32,
    fish_confidence: f32,
    size: SizeEstimate,
    color: ColorMetrics,
    symmetry: SymmetryMetrics,
}

impl SymmetryScored {
    /// Symmetry stage output.
    #[must_use]
    pub const fn symmetry(&self) -> &SymmetryMetrics {
        &self.symmetry
    }

    /// Apply the confidence floor to the classifier output.
    pub fn adapt_pattern(self) -> PatternAdapted {
        let pattern = adapt_pattern(&self.prediction, self.floor);
        PatternAdapted {
            fish_confidence: self.fish_confidence,
            size: self.size,
            color: self.color,
            symmetry: self.symmetry,
            pattern,
        }
    }
}

/// All stage outputs are available.
#[must_use = "pipeline stages are consumed by advancing; call .assemble() to continue"]
pub struct PatternAdapted {
    fish_confidence: f32,
    size: SizeEstimate,
    color: ColorMetrics,
    symmetry: SymmetryMetrics,
    pattern: PatternResult,
}

impl PatternAdapted {
    /// Pattern stage output.
    #[must_use]
    pub const fn pattern(&self) -> &PatternResult {
        &self.pattern
    }

    /// Build the feature vector.
    ///
    /// # Errors
    ///
    /// Returns [`AppraisalError::FeatureSchemaMismatch`] when any stage
    /// produced an invalid value.
    pub fn assemble(self) -> Result<Assembled, AppraisalError> {
        let features =
            FeatureVector::assemble(&self.size, &self.pattern, &self.color, &self.symmetry)?;
        Ok(Assembled {
            stages: self,
            features,
        })
    }
}

/// The feature vector is ready for prediction.
#[must_use = "call .predict() or .into_features() to finish"]
pub struct Assembled {
    stages: PatternAdapted,
    features: FeatureVector,
}

impl Assembled {
    /// The regression input.
    #[must_use]
    pub const fn features(&self) -> &FeatureVector {
        &self.features
    }

    /// Stop here and keep only the features.
    #[must_use]
    pub fn into_features(self) -> FeatureVector {
        self.features
    }

    /// Predict the price and build the final record.
    ///
    /// # Errors
    ///
    /// As [`RegressionModel::predict`].
    pub fn predict(self, model: &RegressionModel) -> Result<AppraisalMetrics, AppraisalError> {
        let predicted_price = model.predict(&self.features)?;
        let PatternAdapted {
            fish_confidence,
            size,
            color,
            symmetry,
            pattern,
        } = self.stages;
        tracing::debug!(predicted_price, "appraisal complete");
        Ok(AppraisalMetrics {
            size_cm: size.size_cm,
            length_px: size.length_px,
            cm_per_px: size.scale.cm_per_px,
            coin_label: size.scale.label,
            fish_confidence,
            pattern: pattern.class,
            pattern_label: pattern.raw_label,
            pattern_confidence: pattern.confidence,
            pattern_low_confidence: pattern.low_confidence,
            color: color.composition,
            color_quality: color.quality,
            color_breakdown: color.breakdown,
            symmetry_score: symmetry.score,
            features: self.features,
            predicted_price,
        })
    }
}

/// Run every stage up to feature assembly.
///
/// This is the only extraction path; appraisal and training both use it.
///
/// # Errors
///
/// Any stage error, see the individual stages.
pub fn extract_features(
    image: &RgbImage,
    detections: &Detections,
    context: &AppraisalContext,
) -> Result<FeatureVector, AppraisalError> {
    Ok(assemble(image, detections, context)?.into_features())
}

/// Run the full pipeline and predict a price.
///
/// # Errors
///
/// Any stage error, see the individual stages.
pub fn appraise(
    image: &RgbImage,
    detections: &Detections,
    context: &AppraisalContext,
    model: &RegressionModel,
) -> Result<AppraisalMetrics, AppraisalError> {
    assemble(image, detections, context)?.predict(model)
}

fn assemble(
    image: &RgbImage,
    detections: &Detections,
    context: &AppraisalContext,
) -> Result<Assembled, AppraisalError> {
    Pipeline::new(image, detections, context)
        .select_fish()?
        .estimate_size()?
        .quantify_color()?
        .score_symmetry()?
        .adapt_pattern()
        .assemble()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use image::Rgb;

    use super::*;
    use crate::features::FEATURE_COUNT;
    use crate::pattern::PatternClass;
    use crate::types::Mask;

    const W: u32 = 500;
    const H: u32 = 200;

    /// A 300x40 kohaku with red saddles and a 60 px coin.
    fn scene() -> (RgbImage, Detections) {
        let in_fish = |x: u32, y: u32| (100..400).contains(&x) && (60..100).contains(&y);
        let image = RgbImage::from_fn(W, H, |x, y| {
            if in_fish(x, y) {
                if (x / 50) % 2 == 0 {
                    Rgb([220, 30, 20])
                } else {
                    Rgb([250, 250, 245])
                }
            } else {
                Rgb([40, 90, 60])
            }
        });
        let fish = Mask::from_fn(W, H, in_fish);
        let coin = Mask::from_fn(W, H, |x, y| {
            (f64::from(x) - 450.0).hypot(f64::from(y) - 160.0) <= 30.0
        });
        let detections = Detections {
            fish: vec![Detection::new(fish, 0.97, "koi")],
            coins: vec![Detection::new(coin, 0.9, "1peso")],
            pattern: PatternPrediction {
                label: "kohaku".into(),
                confidence: 0.88,
            },
        };
        (image, detections)
    }

    fn model() -> RegressionModel {
        let mut coefficients = [0.0; FEATURE_COUNT];
        coefficients[0] = 100.0;
        coefficients[3] = 250.0;
        RegressionModel::new(coefficients, 50.0)
    }

    #[test]
    fn stages_expose_intermediates() {
        let (image, detections) = scene();
        let context = AppraisalContext::default();
        let selected = Pipeline::new(&image, &detections, &context)
            .select_fish()
            .unwrap();
        assert_eq!(selected.geometry().area, 12_000);
        let sized = selected.estimate_size().unwrap();
        assert!((sized.size().size_cm - 11.5).abs() < 0.2);
        let colored = sized.quantify_color().unwrap();
        let c = colored.color().composition;
        assert!((c.red_pct + c.white_pct - 100.0).abs() < 1e-9);
        let scored = colored.score_symmetry().unwrap();
        assert!(scored.symmetry().score > 0.99);
        let adapted = scored.adapt_pattern();
        assert_eq!(adapted.pattern().class, PatternClass::Kohaku);
        let assembled = adapted.assemble().unwrap();
        assert!((assembled.features().pattern_kohaku - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn appraise_predicts_from_features() {
        let (image, detections) = scene();
        let context = AppraisalContext::default();
        let metrics = appraise(&image, &detections, &context, &model()).unwrap();
        let expected = 50.0 + 100.0 * metrics.size_cm + 250.0;
        assert!((metrics.predicted_price - expected).abs() < 1e-9);
        assert_eq!(metrics.coin_label, "1peso");
        assert_eq!(metrics.features.values()[0], metrics.size_cm);
    }

    #[test]
    fn extraction_is_deterministic() {
        let (image, detections) = scene();
        let context = AppraisalContext::default();
        let a = extract_features(&image, &detections, &context).unwrap();
        let b = extract_features(&image, &detections, &context).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn low_confidence_pattern_zeroes_one_hot() {
        let (image, mut detections) = scene();
        detections.pattern.confidence = 0.3;
        let context = AppraisalContext::default();
        let features = extract_features(&image, &detections, &context).unwrap();
        assert!(features.pattern_low_confidence);
        assert_eq!(&features.values()[1..4], &[0.0, 0.0, 0.0]);
    }

    #[test]
    fn missing_coin_is_reported() {
        let (image, mut detections) = scene();
        detections.coins.clear();
        let err = extract_features(&image, &detections, &AppraisalContext::default());
        assert!(matches!(err, Err(AppraisalError::NoCoinDetected)));
    }

    #[test]
    fn missing_fish_is_reported() {
        let (image, mut detections) = scene();
        detections.fish.clear();
        let err = extract_features(&image, &detections, &AppraisalContext::default());
        assert!(matches!(err, Err(AppraisalError::NoFishDetected)));
    }

    #[test]
    fn coin_mask_of_wrong_size_is_rejected() {
        let (image, mut detections) = scene();
        detections.coins[0].mask = Mask::from_fn(W + 1, H, |_, _| true);
        let err = extract_features(&image, &detections, &AppraisalContext::default());
        assert!(matches!(err, Err(AppraisalError::DimensionMismatch { .. })));
    }

    #[test]
    fn context_validates_parts() {
        let mut config = AppraisalConfig::default();
        config.symmetry.length_bands = 0;
        let err = AppraisalContext::new(config, CalibrationTable::default(), CoinReference::default());
        assert!(matches!(err, Err(AppraisalError::InvalidConfig(_))));
    }
}
