//! Error types for the churn pipeline

use thiserror::Error;

use crate::tracking::RunId;
use crate::validation::Violation;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, ChurnError>;

/// Main error type for the pipeline
#[derive(Error, Debug)]
pub enum ChurnError {
    /// Invalid hyperparameter or pipeline configuration, raised before any work starts
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// The data validator rejected the dataset
    #[error("Data quality gate failed with {} violation(s)", .0.len())]
    DataQualityError(Vec<Violation>),

    /// Numerical or fitting failure inside a single trial
    #[error("Training failure: {0}")]
    TrainingFailure(String),

    #[error("Incomplete metrics: {0}")]
    IncompleteMetricsError(String),

    #[error("Unsupported model: {0}")]
    UnsupportedModelError(String),

    #[error("Duplicate run: {0}")]
    DuplicateRunError(RunId),

    #[error("No successful run available")]
    NoSuccessfulRunError,

    /// A serving request does not conform to the feature contract
    #[error("Validation error: {}", summarize(.0))]
    ValidationError(Vec<Violation>),

    #[error("Run not found: {0}")]
    RunNotFound(RunId),

    #[error("Artifact error: {0}")]
    ArtifactError(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Data error: {0}")]
    DataError(String),

    #[error("Invalid shape: expected {expected}, got {actual}")]
    ShapeError { expected: String, actual: String },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

fn summarize(violations: &[Violation]) -> String {
    match violations {
        [] => "no details".to_string(),
        [only] => only.to_string(),
        [first, rest @ ..] => format!("{} (and {} more)", first, rest.len()),
    }
}

impl ChurnError {
    /// Violations carried by data-quality and request-validation errors
    pub fn violations(&self) -> &[Violation] {
        match self {
            ChurnError::DataQualityError(v) | ChurnError::ValidationError(v) => v,
            _ => &[],
        }
    }
}

impl From<polars::error::PolarsError> for ChurnError {
    fn from(err: polars::error::PolarsError) -> Self {
        ChurnError::DataError(err.to_string())
    }
}

impl From<serde_json::Error> for ChurnError {
    fn from(err: serde_json::Error) -> Self {
        ChurnError::SerializationError(err.to_string())
    }
}

impl From<ndarray::ShapeError> for ChurnError {
    fn from(err: ndarray::ShapeError) -> Self {
        ChurnError::ShapeError {
            expected: "valid shape".to_string(),
            actual: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ChurnError::ConfigError("unknown key `depth`".to_string());
        assert_eq!(err.to_string(), "Configuration error: unknown key `depth`");
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: ChurnError = io_err.into();
        assert!(matches!(err, ChurnError::IoError(_)));
    }

    #[test]
    fn test_validation_error_lists_first_violation() {
        let err = ChurnError::ValidationError(vec![
            Violation::new("missing_field", "tenure", "required feature is absent"),
            Violation::new("unexpected_field", "foo", "feature is not part of the contract"),
        ]);
        let msg = err.to_string();
        assert!(msg.contains("tenure"));
        assert!(msg.contains("1 more"));
        assert_eq!(err.violations().len(), 2);
    }
}
