//! Serialized model artifact: contract, fitted encoder and estimator

use super::config::HyperparameterConfig;
use super::models::{Classifier, FittedModel};
use crate::contract::{FeatureContract, FeatureEncoder, FeatureMatrix, Record};
use crate::error::{ChurnError, Result};
use crate::tracking::RunId;
use chrono::{DateTime, Utc};
use ndarray::Array1;
use serde::{Deserialize, Serialize};

/// Everything needed to score records exactly as at training time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub run_id: RunId,
    pub contract: FeatureContract,
    pub encoder: FeatureEncoder,
    pub model: FittedModel,
    pub config: HyperparameterConfig,
    pub trained_at: DateTime<Utc>,
    pub n_train: usize,
    pub train_time_s: f64,
    /// Classification threshold the run was scored with; serving applies the same cut
    #[serde(default = "default_threshold")]
    pub threshold: f64,
}

fn default_threshold() -> f64 {
    0.5
}

impl ModelArtifact {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let artifact: ModelArtifact = serde_json::from_slice(bytes)
            .map_err(|e| ChurnError::ArtifactError(format!("cannot decode artifact: {}", e)))?;
        artifact.contract.validate()?;
        if !(0.0..=1.0).contains(&artifact.threshold) {
            return Err(ChurnError::ArtifactError(format!(
                "artifact for {} has threshold {} outside [0, 1]",
                artifact.run_id, artifact.threshold
            )));
        }
        if artifact.encoder.n_outputs() == 0 {
            return Err(ChurnError::ArtifactError(format!(
                "artifact for {} has an empty encoder",
                artifact.run_id
            )));
        }
        Ok(artifact)
    }

    /// Churn probability for raw serving records
    ///
    /// Every record is checked against the contract first; nothing is
    /// coerced. Violations of record `i` are reported as `records[i].<field>`
    /// for batches.
    pub fn predict_records(&self, records: &[Record]) -> Result<Array1<f64>> {
        let mut violations = Vec::new();
        for (i, record) in records.iter().enumerate() {
            for mut v in self.contract.violations(record) {
                if records.len() > 1 {
                    v.field = format!("records[{}].{}", i, v.field);
                }
                violations.push(v);
            }
        }
        if !violations.is_empty() {
            return Err(ChurnError::ValidationError(violations));
        }

        let x = self.encoder.transform(records)?;
        self.model.predict_proba(&x)
    }
}

impl Classifier for ModelArtifact {
    fn name(&self) -> &str {
        self.model.family().as_str()
    }

    fn train_time_s(&self) -> Option<f64> {
        Some(self.train_time_s)
    }

    fn predict_proba(&self, features: &FeatureMatrix) -> Result<Array1<f64>> {
        let x = self.encoder.transform_matrix(features)?;
        self.model.predict_proba(&x)
    }
}
