//! Error types for the server

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::error::ChurnError;
use crate::validation::Violation;

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Request does not conform to the feature contract
    #[error("Request failed validation with {} violation(s)", .0.len())]
    Validation(Vec<Violation>),

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<ChurnError> for ServerError {
    fn from(err: ChurnError) -> Self {
        match err {
            ChurnError::ValidationError(violations) => ServerError::Validation(violations),
            ChurnError::InvalidState(msg) => ServerError::Unavailable(msg),
            ChurnError::NoSuccessfulRunError => ServerError::Unavailable(err.to_string()),
            ChurnError::ConfigError(msg) => ServerError::BadRequest(msg),
            ChurnError::RunNotFound(_) => ServerError::NotFound(err.to_string()),
            other => ServerError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, kind, message) = match &self {
            ServerError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg.clone()),
            ServerError::Validation(_) => (StatusCode::BAD_REQUEST, "validation_error", self.to_string()),
            ServerError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, "unavailable", msg.clone()),
            ServerError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg.clone()),
            ServerError::Internal(msg) => {
                tracing::error!(detail = %msg, "Internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal",
                    "An internal error occurred".to_string(),
                )
            }
        };

        let mut body = json!({
            "error": true,
            "kind": kind,
            "message": message,
        });
        if let ServerError::Validation(violations) = &self {
            body["violations"] = json!(violations);
        }

        (status, Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, ServerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_churn_error_mapping() {
        let err: ServerError = ChurnError::ValidationError(vec![Violation::new("missing_field", "tenure", "absent")]).into();
        assert!(matches!(err, ServerError::Validation(ref v) if v.len() == 1));

        let err: ServerError = ChurnError::InvalidState("service is unloaded".into()).into();
        assert_eq!(err.into_response().status(), StatusCode::SERVICE_UNAVAILABLE);

        let err: ServerError = ChurnError::ArtifactError("checksum mismatch".into()).into();
        assert_eq!(err.into_response().status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
