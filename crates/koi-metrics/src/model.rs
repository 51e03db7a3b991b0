//! Linear price model and the shared slot it is served from.

use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};

use crate::features::{FEATURE_COUNT, FEATURE_NAMES, FeatureVector, SCHEMA_VERSION};
use crate::types::AppraisalError;

/// Trained coefficients keyed to a feature schema.
///
/// `price = intercept + Σ coefficients[i] · features[i]`, with no
/// clamping: a negative price points at a model or feature problem and
/// is reported as is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionModel {
    /// [`SCHEMA_VERSION`] the model was fitted under.
    pub schema_version: u32,
    /// Column names in coefficient order.
    pub feature_names: Vec<String>,
    /// One coefficient per column.
    pub coefficients: Vec<f64>,
    /// Constant term.
    pub intercept: f64,
}

impl RegressionModel {
    /// A model for the current schema.
    #[must_use]
    pub fn new(coefficients: [f64; FEATURE_COUNT], intercept: f64) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            feature_names: FEATURE_NAMES.iter().map(|&n| n.to_owned()).collect(),
            coefficients: coefficients.to_vec(),
            intercept,
        }
    }

    /// Check the model matches the current feature schema and holds only
    /// finite numbers.
    ///
    /// # Errors
    ///
    /// Returns [`AppraisalError::FeatureSchemaMismatch`] describing the
    /// first discrepancy.
    pub fn validate(&self) -> Result<(), AppraisalError> {
        let mismatch = |msg: String| Err(AppraisalError::FeatureSchemaMismatch(msg));
        if self.schema_version != SCHEMA_VERSION {
            return mismatch(format!(
                "model schema version {} but features are version {SCHEMA_VERSION}",
                self.schema_version
            ));
        }
        if !self.feature_names.iter().map(String::as_str).eq(FEATURE_NAMES) {
            return mismatch(format!(
                "model columns {:?} do not match {FEATURE_NAMES:?}",
                self.feature_names
            ));
        }
        if self.coefficients.len() != FEATURE_COUNT {
            return mismatch(format!(
                "model has {} coefficients, expected {FEATURE_COUNT}",
                self.coefficients.len()
            ));
        }
        if !self.intercept.is_finite() || self.coefficients.iter().any(|c| !c.is_finite()) {
            return mismatch("model contains non-finite parameters".into());
        }
        Ok(())
    }

    /// Predict a price.
    ///
    /// # Errors
    ///
    /// Returns [`AppraisalError::FeatureSchemaMismatch`] when the model
    /// fails [`validate`](Self::validate) or `features` fails
    /// [`FeatureVector::validate`].
    pub fn predict(&self, features: &FeatureVector) -> Result<f64, AppraisalError> {
        self.validate()?;
        features.validate()?;
        Ok(self.predict_unchecked(&features.values()))
    }

    /// `intercept + Σ coefficients[i] · values[i]` without schema checks.
    #[must_use]
    pub(crate) fn predict_unchecked(&self, values: &[f64]) -> f64 {
        self.coefficients
            .iter()
            .zip(values)
            .fold(self.intercept, |acc, (c, x)| c.mul_add(*x, acc))
    }

    /// Coefficients paired with their column names, in schema order.
    #[must_use]
    pub fn coefficients_by_name(&self) -> Vec<(&str, f64)> {
        self.feature_names
            .iter()
            .map(String::as_str)
            .zip(self.coefficients.iter().copied())
            .collect()
    }
}

/// Process-wide holder of the live price model.
///
/// Readers take a cheap `Arc` clone and release the lock before
/// predicting. [`install`](Self::install) validates the new model first
/// and then replaces the pointer in a single write, so a request sees
/// either the old model or the new one, never a partial update.
#[derive(Debug, Default)]
pub struct ModelSlot {
    current: RwLock<Option<Arc<RegressionModel>>>,
}

impl ModelSlot {
    /// An empty slot.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A slot holding `model`.
    ///
    /// # Errors
    ///
    /// Returns [`AppraisalError::FeatureSchemaMismatch`] when the model
    /// does not match the current schema.
    pub fn with_model(model: RegressionModel) -> Result<Self, AppraisalError> {
        let slot = Self::new();
        slot.install(model)?;
        Ok(slot)
    }

    /// Validate `model` and make it the live model, returning the model
    /// it replaced. On error the live model is left untouched.
    ///
    /// # Errors
    ///
    /// Returns [`AppraisalError::FeatureSchemaMismatch`] when the model
    /// does not match the current schema.
    pub fn install(
        &self,
        model: RegressionModel,
    ) -> Result<Option<Arc<RegressionModel>>, AppraisalError> {
        model.validate()?;
        let model = Arc::new(model);
        let previous = self
            .current
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(model);
        tracing::info!(replaced = previous.is_some(), "installed price model");
        Ok(previous)
    }

    /// The live model.
    ///
    /// # Errors
    ///
    /// Returns [`AppraisalError::ModelNotLoaded`] when the slot is empty.
    pub fn current(&self) -> Result<Arc<RegressionModel>, AppraisalError> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(AppraisalError::ModelNotLoaded)
    }

    /// Whether a model is installed.
    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Predict with the live model.
    ///
    /// # Errors
    ///
    /// Returns [`AppraisalError::ModelNotLoaded`] when the slot is empty,
    /// otherwise as [`RegressionModel::predict`].
    pub fn predict(&self, features: &FeatureVector) -> Result<f64, AppraisalError> {
        self.current()?.predict(features)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::thread;

    use super::*;

    fn features() -> FeatureVector {
        FeatureVector::from_values([40.0, 0.0, 0.0, 1.0, 50.0, 40.0, 5.0, 0.8, 0.9], false)
            .unwrap()
    }

    #[test]
    fn linear_prediction() {
        let mut coefficients = [0.0; FEATURE_COUNT];
        coefficients[0] = 100.0;
        coefficients[3] = 500.0;
        let model = RegressionModel::new(coefficients, 250.0);
        let price = model.predict(&features()).unwrap();
        assert!((price - (250.0 + 4000.0 + 500.0)).abs() < 1e-9);
    }

    #[test]
    fn negative_prices_are_not_clamped() {
        let model = RegressionModel::new([0.0; FEATURE_COUNT], -10.0);
        assert!((model.predict(&features()).unwrap() + 10.0).abs() < 1e-9);
    }

    #[test]
    fn schema_version_mismatch() {
        let mut model = RegressionModel::new([0.0; FEATURE_COUNT], 0.0);
        model.schema_version = 0;
        assert!(matches!(
            model.predict(&features()),
            Err(AppraisalError::FeatureSchemaMismatch(_))
        ));
    }

    #[test]
    fn reordered_columns_mismatch() {
        let mut model = RegressionModel::new([0.0; FEATURE_COUNT], 0.0);
        model.feature_names.swap(0, 1);
        assert!(model.validate().is_err());
        model.feature_names.swap(0, 1);
        model.coefficients.pop();
        assert!(model.validate().is_err());
    }

    #[test]
    fn coefficients_by_name_pairs_in_order() {
        let model = RegressionModel::new([1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0], 0.0);
        let named = model.coefficients_by_name();
        assert_eq!(named[0], ("size_cm", 1.0));
        assert_eq!(named[8], ("symmetry_score", 9.0));
    }

    #[test]
    fn model_json_round_trip() {
        let model = RegressionModel::new([0.5; FEATURE_COUNT], 12.0);
        let json = serde_json::to_string(&model).unwrap();
        let back: RegressionModel = serde_json::from_str(&json).unwrap();
        assert_eq!(back, model);
    }

    #[test]
    fn empty_slot_reports_not_loaded() {
        let slot = ModelSlot::new();
        assert!(!slot.is_loaded());
        assert!(matches!(
            slot.predict(&features()),
            Err(AppraisalError::ModelNotLoaded)
        ));
    }

    #[test]
    fn invalid_install_keeps_old_model() {
        let slot = ModelSlot::with_model(RegressionModel::new([0.0; FEATURE_COUNT], 1.0)).unwrap();
        let mut bad = RegressionModel::new([0.0; FEATURE_COUNT], 2.0);
        bad.intercept = f64::NAN;
        assert!(slot.install(bad).is_err());
        assert!((slot.predict(&features()).unwrap() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn install_swaps_and_returns_previous() {
        let slot = ModelSlot::with_model(RegressionModel::new([0.0; FEATURE_COUNT], 1.0)).unwrap();
        let held = slot.current().unwrap();
        let previous = slot
            .install(RegressionModel::new([0.0; FEATURE_COUNT], 2.0))
            .unwrap()
            .unwrap();
        assert!(Arc::ptr_eq(&held, &previous));
        // A reader holding the old Arc keeps predicting with it.
        assert!((held.predict(&features()).unwrap() - 1.0).abs() < 1e-9);
        assert!((slot.predict(&features()).unwrap() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn concurrent_readers_see_whole_models() {
        let slot = Arc::new(
            ModelSlot::with_model(RegressionModel::new([0.0; FEATURE_COUNT], 1.0)).unwrap(),
        );
        let readers: Vec<_> = (0..4)
            .map(|_| {
                let slot = Arc::clone(&slot);
                thread::spawn(move || {
                    for _ in 0..200 {
                        let price = slot.predict(&features()).unwrap();
                        assert!(price == 1.0 || price == 2.0, "torn model: {price}");
                    }
                })
            })
            .collect();
        for i in 0..50 {
            let intercept = if i % 2 == 0 { 2.0 } else { 1.0 };
            slot.install(RegressionModel::new([0.0; FEATURE_COUNT], intercept))
                .unwrap();
        }
        for reader in readers {
            reader.join().unwrap();
        }
    }
}
