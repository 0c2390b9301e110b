//! Model training
//!
//! Two model families are supported:
//! - Logistic regression (batch gradient descent, L2 penalty)
//! - Gradient boosted trees on the log-odds
//!
//! The [`Trainer`] fits the feature encoder and the estimator for one
//! hyperparameter configuration, scores it, and stores the resulting
//! [`ModelArtifact`] under the run id.

mod artifact;
mod boosting;
mod config;
mod logistic;
mod models;
mod trainer;
mod tree;
pub mod cross_validation;

pub use artifact::ModelArtifact;
pub use boosting::BoostingModel;
pub use config::{
    validate_search_space, BoostingParams, HyperparameterConfig, LogisticParams, ModelFamily, ParamKind,
    ParamSchema, MODEL_KEY,
};
pub use cross_validation::{CVSplit, CrossValidator};
pub use logistic::LogisticModel;
pub use models::{Classifier, Deadline, FittedModel};
pub use trainer::{Trainer, Validation};
pub use tree::{RegressionTree, TreeNode, TreeParams};
