//! Request-level orchestration over the shared, read-only resources.
//!
//! An [`Appraiser`] owns the process-wide pieces (reference data, the
//! live price model and optionally the vision models) and runs
//! independent requests against them. It is `Send + Sync`; share it
//! behind an `Arc` or by reference across threads.

use std::fmt;
use std::sync::Arc;

use rayon::prelude::*;

use crate::decode::decode;
use crate::detect::{CoinDetector, FishSegmenter, PatternClassifier};
use crate::features::FeatureVector;
use crate::metrics::AppraisalMetrics;
use crate::model::ModelSlot;
use crate::pipeline::{self, AppraisalContext};
use crate::train::{self, TrainingOutcome, TrainingRow};
use crate::types::{AppraisalError, Detections, RgbImage};

/// The three external vision models.
#[derive(Clone)]
pub struct Detectors {
    /// Koi instance segmentation.
    pub segmenter: Arc<dyn FishSegmenter>,
    /// Reference coin detection.
    pub coins: Arc<dyn CoinDetector>,
    /// Variety classification.
    pub classifier: Arc<dyn PatternClassifier>,
}

impl fmt::Debug for Detectors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Detectors").finish_non_exhaustive()
    }
}

impl Detectors {
    /// Run all three models over `image`.
    ///
    /// # Errors
    ///
    /// Propagates the first detector failure.
    pub fn detect(&self, image: &RgbImage) -> Result<Detections, AppraisalError> {
        Ok(Detections {
            fish: self.segmenter.segment(image)?,
            coins: self.coins.detect(image)?,
            pattern: self.classifier.classify(image)?,
        })
    }
}

/// Runs appraisals and retraining against shared resources.
#[derive(Debug, Clone)]
pub struct Appraiser {
    context: Arc<AppraisalContext>,
    model: Arc<ModelSlot>,
    detectors: Option<Detectors>,
}

impl Appraiser {
    /// An appraiser without vision models. Requests must supply their
    /// own [`Detections`].
    #[must_use]
    pub fn new(context: AppraisalContext, model: Arc<ModelSlot>) -> Self {
        Self {
            context: Arc::new(context),
            model,
            detectors: None,
        }
    }

    /// Attach the vision models used by [`appraise_image`](Self::appraise_image).
    #[must_use]
    pub fn with_detectors(mut self, detectors: Detectors) -> Self {
        self.detectors = Some(detectors);
        self
    }

    /// Reference data shared by every request.
    #[must_use]
    pub fn context(&self) -> &AppraisalContext {
        &self.context
    }

    /// The live model slot.
    #[must_use]
    pub fn model_slot(&self) -> &Arc<ModelSlot> {
        &self.model
    }

    /// Run the configured vision models.
    ///
    /// # Errors
    ///
    /// Returns [`AppraisalError::Detector`] when no models are attached
    /// or one of them fails.
    pub fn detect(&self, image: &RgbImage) -> Result<Detections, AppraisalError> {
        self.detectors
            .as_ref()
            .ok_or_else(|| AppraisalError::Detector("no vision models configured".into()))?
            .detect(image)
    }

    /// Full request: detect, then appraise.
    ///
    /// # Errors
    ///
    /// [`AppraisalError::ModelNotLoaded`] before any work is done when
    /// the slot is empty, otherwise any detector or stage error.
    pub fn appraise_image(&self, image: &RgbImage) -> Result<AppraisalMetrics, AppraisalError> {
        let model = self.model.current()?;
        let detections = self.detect(image)?;
        pipeline::appraise(image, &detections, &self.context, &model)
    }

    /// Decode and appraise raw image bytes.
    ///
    /// # Errors
    ///
    /// Decode errors, then as [`appraise_image`](Self::appraise_image).
    pub fn appraise_bytes(&self, bytes: &[u8]) -> Result<AppraisalMetrics, AppraisalError> {
        self.appraise_image(&decode(bytes)?)
    }

    /// Appraise with detections produced elsewhere.
    ///
    /// The model is read once up front, so a concurrent retrain never
    /// affects a request already in flight.
    ///
    /// # Errors
    ///
    /// [`AppraisalError::ModelNotLoaded`] or any stage error.
    pub fn appraise_detected(
        &self,
        image: &RgbImage,
        detections: &Detections,
    ) -> Result<AppraisalMetrics, AppraisalError> {
        let model = self.model.current()?;
        pipeline::appraise(image, detections, &self.context, &model)
    }

    /// Features only; no model needed.
    ///
    /// # Errors
    ///
    /// Any stage error.
    pub fn extract_features(
        &self,
        image: &RgbImage,
        detections: &Detections,
    ) -> Result<FeatureVector, AppraisalError> {
        pipeline::extract_features(image, detections, &self.context)
    }

    /// Appraise many photographs on the rayon pool.
    ///
    /// `load` turns a job into an image plus detections; its errors are
    /// reported for that job only. Results are in job order.
    pub fn appraise_batch<T, L, E>(&self, jobs: &[T], load: L) -> Vec<Result<AppraisalMetrics, E>>
    where
        T: Sync,
        L: Fn(&T) -> Result<(RgbImage, Detections), E> + Sync,
        E: From<AppraisalError> + Send,
    {
        jobs.par_iter()
            .map(|job| {
                let (image, detections) = load(job)?;
                Ok(self.appraise_detected(&image, &detections)?)
            })
            .collect()
    }

    /// Fit a new model through the same extraction path as inference.
    /// The live model is not touched.
    ///
    /// `load` fetches the image and detections for one labeled row; a
    /// failure skips that row with the error's message as the reason.
    ///
    /// # Errors
    ///
    /// As [`train::train`].
    pub fn train<L, E>(&self, rows: &[TrainingRow], load: L) -> Result<TrainingOutcome, AppraisalError>
    where
        L: Fn(&TrainingRow) -> Result<(RgbImage, Detections), E> + Sync,
        E: fmt::Display,
    {
        let context = &*self.context;
        train::train(rows, &context.config.training, |row| {
            let (image, detections) = load(row).map_err(|e| AppraisalError::RowExtraction {
                reference: row.reference.clone(),
                reason: e.to_string(),
            })?;
            pipeline::extract_features(&image, &detections, context)
        })
    }

    /// [`train`](Self::train), then install the result as the live model.
    ///
    /// # Errors
    ///
    /// Training errors leave the live model in place, as does a fitted
    /// model that fails validation.
    pub fn retrain<L, E>(
        &self,
        rows: &[TrainingRow],
        load: L,
    ) -> Result<TrainingOutcome, AppraisalError>
    where
        L: Fn(&TrainingRow) -> Result<(RgbImage, Detections), E> + Sync,
        E: fmt::Display,
    {
        let outcome = self.train(rows, load)?;
        self.model.install(outcome.model.clone())?;
        Ok(outcome)
    }
}
