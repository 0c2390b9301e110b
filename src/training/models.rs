//! Model traits and the fitted-model union

use super::boosting::BoostingModel;
use super::config::{HyperparameterConfig, ModelFamily};
use super::logistic::LogisticModel;
use crate::contract::FeatureMatrix;
use crate::error::{ChurnError, Result};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

pub(crate) fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

/// Cooperative wall-clock limit checked by fitting loops
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline(Option<Instant>);

impl Deadline {
    pub fn none() -> Self {
        Deadline(None)
    }

    pub fn after(timeout: Duration) -> Self {
        Deadline(Instant::now().checked_add(timeout))
    }

    pub fn from_timeout(timeout: Option<Duration>) -> Self {
        timeout.map_or_else(Self::none, Self::after)
    }

    /// A deadline that has already passed
    pub fn expired() -> Self {
        Deadline(Some(Instant::now()))
    }

    pub fn check(&self) -> Result<()> {
        match self.0 {
            Some(at) if Instant::now() >= at => Err(ChurnError::TrainingFailure("timeout".to_string())),
            _ => Ok(()),
        }
    }
}

/// Anything that scores contract records with a churn probability
pub trait Classifier: Send + Sync {
    fn name(&self) -> &str;

    /// Wall-clock seconds spent fitting, if known
    fn train_time_s(&self) -> Option<f64> {
        None
    }

    /// Probability of churn per record
    fn predict_proba(&self, features: &FeatureMatrix) -> Result<Array1<f64>> {
        let _ = features;
        Err(ChurnError::UnsupportedModelError(format!(
            "{} does not produce probability scores",
            self.name()
        )))
    }
}

/// Fitted estimator of any supported family
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "family", rename_all = "snake_case")]
pub enum FittedModel {
    LogisticRegression(LogisticModel),
    GradientBoosting(BoostingModel),
}

impl FittedModel {
    pub fn fit(
        config: &HyperparameterConfig,
        x: &Array2<f64>,
        y: &Array1<f64>,
        seed: u64,
        deadline: &Deadline,
    ) -> Result<Self> {
        match config {
            HyperparameterConfig::LogisticRegression(p) => {
                LogisticModel::fit(p, x, y, deadline).map(FittedModel::LogisticRegression)
            }
            HyperparameterConfig::GradientBoosting(p) => {
                BoostingModel::fit(p, x, y, seed, deadline).map(FittedModel::GradientBoosting)
            }
        }
    }

    pub fn family(&self) -> ModelFamily {
        match self {
            FittedModel::LogisticRegression(_) => ModelFamily::LogisticRegression,
            FittedModel::GradientBoosting(_) => ModelFamily::GradientBoosting,
        }
    }

    pub fn predict_proba(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        match self {
            FittedModel::LogisticRegression(m) => m.predict_proba(x),
            FittedModel::GradientBoosting(m) => m.predict_proba(x),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_deadline() {
        assert!(Deadline::none().check().is_ok());
        assert!(Deadline::after(Duration::from_secs(60)).check().is_ok());
        assert!(Deadline::expired().check().is_err());
    }

    #[test]
    fn test_fitted_model_dispatch_and_serde() {
        let x = array![[-1.0], [-0.5], [0.5], [1.0]];
        let y = array![0.0, 0.0, 1.0, 1.0];
        let config = HyperparameterConfig::LogisticRegression(Default::default());
        let model = FittedModel::fit(&config, &x, &y, 42, &Deadline::none()).unwrap();
        assert_eq!(model.family(), ModelFamily::LogisticRegression);

        let json = serde_json::to_string(&model).unwrap();
        assert!(json.contains("\"family\":\"logistic_regression\""));
        let restored: FittedModel = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.predict_proba(&x).unwrap(), model.predict_proba(&x).unwrap());
    }
}
