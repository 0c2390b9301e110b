//! Inference service lifecycle and request handling

use super::stats::{ServiceStats, ServiceStatsSummary};
use crate::contract::Record;
use crate::error::{ChurnError, Result};
use crate::registry::{ActiveModel, ModelPointer};
use crate::tracking::{ArtifactStore, RunId};
use crate::training::{ModelArtifact, ModelFamily};
use crate::validation::Violation;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

/// Lifecycle of the service; `Failed` is terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceState {
    Unloaded,
    Loaded,
    Serving,
    Failed,
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ServiceState::Unloaded => "unloaded",
            ServiceState::Loaded => "loaded",
            ServiceState::Serving => "serving",
            ServiceState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// One record or a batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PredictionRequest {
    Batch(Vec<Record>),
    Single(Record),
}

impl PredictionRequest {
    pub fn records(&self) -> &[Record] {
        match self {
            PredictionRequest::Batch(records) => records,
            PredictionRequest::Single(record) => std::slice::from_ref(record),
        }
    }
}

/// Churn label for a single record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChurnLabel {
    Churn,
    NoChurn,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResponse {
    pub prediction: ChurnLabel,
    pub probability: f64,
    /// Version of the active model that produced this answer
    pub model_version: u64,
}

/// Description of the loaded model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub run_id: RunId,
    pub version: u64,
    pub family: ModelFamily,
    pub metric: String,
    pub score: f64,
    pub contract: String,
    pub contract_version: u32,
    pub n_features: usize,
    /// Threshold applied to this model's probabilities
    pub threshold: f64,
    pub promoted_at: DateTime<Utc>,
    pub trained_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub state: ServiceState,
    pub model_version: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

struct LoadedModel {
    active: Arc<ActiveModel>,
    artifact: ModelArtifact,
}

/// Serves churn predictions from the active model
///
/// The hot path takes one short read lock to clone the model `Arc`. A
/// reload builds the new model without holding any lock and swaps it in;
/// requests already running finish on the model they started with.
pub struct InferenceService {
    pointer: Arc<ModelPointer>,
    store: Arc<dyn ArtifactStore>,
    threshold_override: Option<f64>,
    state: RwLock<ServiceState>,
    failure: RwLock<Option<String>>,
    model: RwLock<Option<Arc<LoadedModel>>>,
    reload_lock: Mutex<()>,
    stats: ServiceStats,
}

impl InferenceService {
    pub fn new(pointer: Arc<ModelPointer>, store: Arc<dyn ArtifactStore>) -> Self {
        Self {
            pointer,
            store,
            threshold_override: None,
            state: RwLock::new(ServiceState::Unloaded),
            failure: RwLock::new(None),
            model: RwLock::new(None),
            reload_lock: Mutex::new(()),
            stats: ServiceStats::default(),
        }
    }

    /// Label with `threshold` instead of the one stored in the artifact
    pub fn with_threshold(mut self, threshold: f64) -> Result<Self> {
        if !(0.0..=1.0).contains(&threshold) {
            return Err(ChurnError::ConfigError(format!(
                "classification threshold must be in [0, 1], got {}",
                threshold
            )));
        }
        self.threshold_override = Some(threshold);
        Ok(self)
    }

    /// Threshold in effect: the override, else the loaded model's, else 0.5
    pub fn threshold(&self) -> f64 {
        match self.model.read().as_ref() {
            Some(loaded) => self.threshold_for(loaded),
            None => self.threshold_override.unwrap_or(0.5),
        }
    }

    fn threshold_for(&self, loaded: &LoadedModel) -> f64 {
        self.threshold_override.unwrap_or(loaded.artifact.threshold)
    }

    pub fn state(&self) -> ServiceState {
        *self.state.read()
    }

    /// Load the active artifact: `Unloaded -> Loaded`
    ///
    /// Without an active model the service stays `Unloaded`. An active
    /// model whose artifact cannot be read or decoded moves it to `Failed`.
    pub fn load(&self) -> Result<()> {
        let _reload = self.reload_lock.lock();
        match self.state() {
            ServiceState::Unloaded => {}
            ServiceState::Failed => return Err(self.failed_error()),
            _ => return Ok(()),
        }

        let active = self
            .pointer
            .current()
            .ok_or_else(|| ChurnError::InvalidState("no model has been promoted yet".to_string()))?;

        match self.load_artifact(&active) {
            Ok(loaded) => {
                info!(run_id = %active.run_id, version = active.version, "Loaded active model");
                *self.model.write() = Some(Arc::new(loaded));
                *self.state.write() = ServiceState::Loaded;
                Ok(())
            }
            Err(err) => {
                error!(run_id = %active.run_id, error = %err, "Failed to load active model");
                *self.failure.write() = Some(err.to_string());
                *self.state.write() = ServiceState::Failed;
                Err(err)
            }
        }
    }

    /// Load if needed and start answering requests: `Loaded -> Serving`
    pub fn start(&self) -> Result<()> {
        self.load()?;
        let mut state = self.state.write();
        match *state {
            ServiceState::Loaded | ServiceState::Serving => {
                *state = ServiceState::Serving;
                Ok(())
            }
            ServiceState::Failed => Err(self.failed_error()),
            ServiceState::Unloaded => Err(ChurnError::InvalidState("service has no model loaded".to_string())),
        }
    }

    /// Score a request
    ///
    /// Records that break the feature contract yield a `ValidationError`;
    /// the service keeps serving.
    pub fn predict(&self, request: &PredictionRequest) -> Result<Vec<PredictionResponse>> {
        let state = self.state();
        if state != ServiceState::Serving {
            return Err(ChurnError::InvalidState(format!("service is {}, not serving", state)));
        }

        let records = request.records();
        if records.is_empty() {
            self.stats.record_validation_error();
            return Err(ChurnError::ValidationError(vec![Violation::new(
                "empty_request",
                "records",
                "request contains no records",
            )]));
        }

        let Some(loaded) = self.model.read().clone() else {
            self.stats.record_error();
            return Err(ChurnError::InvalidState("no model loaded".to_string()));
        };

        let start = Instant::now();
        match loaded.artifact.predict_records(records) {
            Ok(probabilities) => {
                let version = loaded.active.version;
                let threshold = self.threshold_for(&loaded);
                let responses = probabilities
                    .iter()
                    .map(|&p| {
                        let probability = p.clamp(0.0, 1.0);
                        PredictionResponse {
                            prediction: if probability >= threshold {
                                ChurnLabel::Churn
                            } else {
                                ChurnLabel::NoChurn
                            },
                            probability,
                            model_version: version,
                        }
                    })
                    .collect();
                self.stats
                    .record_success(records.len(), start.elapsed().as_secs_f64() * 1000.0);
                Ok(responses)
            }
            Err(err @ ChurnError::ValidationError(_)) => {
                self.stats.record_validation_error();
                Err(err)
            }
            Err(err) => {
                warn!(error = %err, "Prediction failed");
                self.stats.record_error();
                Err(err)
            }
        }
    }

    pub fn predict_one(&self, record: &Record) -> Result<PredictionResponse> {
        let mut responses = self.predict(&PredictionRequest::Single(record.clone()))?;
        responses
            .pop()
            .ok_or_else(|| ChurnError::InvalidState("empty prediction".to_string()))
    }

    /// Swap in a newly promoted model, if any
    ///
    /// Returns whether the model changed. A failed load keeps the current
    /// model serving.
    pub fn reload(&self) -> Result<bool> {
        match self.state() {
            ServiceState::Unloaded => {
                self.start()?;
                return Ok(true);
            }
            ServiceState::Failed => return Err(self.failed_error()),
            _ => {}
        }

        let _reload = self.reload_lock.lock();
        let Some(active) = self.pointer.refresh()? else {
            return Ok(false);
        };
        let loaded_version = self.model.read().as_ref().map(|m| m.active.version);
        if loaded_version == Some(active.version) {
            return Ok(false);
        }

        let next = self.load_artifact(&active).map_err(|err| {
            warn!(run_id = %active.run_id, error = %err, "Reload failed, keeping current model");
            err
        })?;
        *self.model.write() = Some(Arc::new(next));
        self.stats.record_reload();
        info!(run_id = %active.run_id, version = active.version, "Reloaded active model");
        Ok(true)
    }

    pub fn model_info(&self) -> Option<ModelInfo> {
        let loaded = self.model.read().clone()?;
        let artifact = &loaded.artifact;
        Some(ModelInfo {
            run_id: loaded.active.run_id,
            version: loaded.active.version,
            family: artifact.model.family(),
            metric: loaded.active.metric.as_str().to_string(),
            score: loaded.active.score,
            contract: artifact.contract.name.clone(),
            contract_version: artifact.contract.version,
            n_features: artifact.contract.len(),
            threshold: self.threshold_for(&loaded),
            promoted_at: loaded.active.promoted_at,
            trained_at: artifact.trained_at,
        })
    }

    pub fn health(&self) -> HealthStatus {
        HealthStatus {
            state: self.state(),
            model_version: self.model.read().as_ref().map(|m| m.active.version),
            failure: self.failure.read().clone(),
        }
    }

    pub fn stats(&self) -> ServiceStatsSummary {
        self.stats.summary()
    }

    fn load_artifact(&self, active: &Arc<ActiveModel>) -> Result<LoadedModel> {
        let bytes = self.store.get(&active.artifact)?;
        let artifact = ModelArtifact::from_bytes(&bytes)?;
        if artifact.run_id != active.run_id {
            return Err(ChurnError::ArtifactError(format!(
                "artifact at {} belongs to {}, not {}",
                active.artifact.location, artifact.run_id, active.run_id
            )));
        }
        Ok(LoadedModel {
            active: Arc::clone(active),
            artifact,
        })
    }

    fn failed_error(&self) -> ChurnError {
        let reason = self.failure.read().clone().unwrap_or_else(|| "unknown".to_string());
        ChurnError::InvalidState(format!("service failed: {}", reason))
    }
}
