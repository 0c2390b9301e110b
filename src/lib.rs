//! churnflow - Churn model training, search, tracking and serving
//!
//! This crate provides the full lifecycle of a customer churn classifier:
//! - Feature contracts and a rule-based data quality gate
//! - Model training with logistic regression and gradient boosting
//! - Hyperparameter search over a declared space with a bounded budget
//! - An append-only experiment ledger with deterministic best-run ranking
//! - Promotion of the best run to an explicitly owned active model
//! - An inference service and HTTP server for the active model
//!
//! # Modules
//!
//! ## Data
//! - [`contract`] - Feature schema, records and encoding
//! - [`data`] - CSV loading
//! - [`validation`] - Data quality gate
//!
//! ## Modelling
//! - [`training`] - Classifiers, the trainer and model artifacts
//! - [`evaluation`] - Fixed metric suite
//! - [`optimizer`] - Search spaces, samplers and the tuner
//!
//! ## Lifecycle
//! - [`tracking`] - Experiment ledger and artifact stores
//! - [`registry`] - Active model pointer and promotion
//! - [`inference`] - Serving lifecycle and predictions
//!
//! ## Services
//! - [`server`] - HTTP server with REST API
//! - [`cli`] - Command-line interface

// Core error handling
pub mod error;
pub mod config;

// Data
pub mod contract;
pub mod data;
pub mod validation;

// Modelling
pub mod training;
pub mod evaluation;
pub mod optimizer;

// Lifecycle
pub mod tracking;
pub mod registry;
pub mod inference;

// Services
pub mod server;
pub mod cli;

pub use config::{PipelineConfig, Workspace};
pub use error::{ChurnError, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{PipelineConfig, Workspace};
    pub use crate::error::{ChurnError, Result};

    pub use crate::contract::{FeatureContract, FeatureMatrix, FeatureValue, Labels, Record};
    pub use crate::data::DataLoader;
    pub use crate::validation::{DataValidator, Rule, RuleSetValidator, ValidationReport, Violation};

    pub use crate::evaluation::{Evaluator, Metric, Metrics};
    pub use crate::optimizer::{SearchBudget, SearchSpace, TrialParams, Tuner, TunerConfig};
    pub use crate::training::{HyperparameterConfig, ModelArtifact, Trainer};

    pub use crate::inference::{InferenceService, PredictionRequest, PredictionResponse, ServiceState};
    pub use crate::registry::{ModelPointer, Promoter, PromotionOutcome};
    pub use crate::tracking::{ExperimentLedger, FsArtifactStore, MemoryArtifactStore, RankingKey, RunId, TrainingRun};
}
