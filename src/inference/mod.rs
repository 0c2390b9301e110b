//! Inference service
//!
//! Loads the promoted artifact once, validates requests against the
//! artifact's feature contract, and applies the training-time encoder
//! before scoring. Latency and error counters are kept per service.

mod service;
mod stats;

pub use service::{
    ChurnLabel, HealthStatus, InferenceService, ModelInfo, PredictionRequest, PredictionResponse, ServiceState,
};
pub use stats::{ServiceStats, ServiceStatsSummary};
