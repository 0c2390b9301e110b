//! API request handlers

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde_json::json;
use tracing::debug;

use super::error::{Result, ServerError};
use super::state::AppState;
use crate::inference::{PredictionRequest, ServiceState};

// ============================================================================
// Inference
// ============================================================================

/// `POST /api/predict` with one record (object) or a batch (array)
pub async fn predict(
    State(state): State<Arc<AppState>>,
    payload: std::result::Result<Json<PredictionRequest>, JsonRejection>,
) -> Result<Json<serde_json::Value>> {
    let Json(request) = payload.map_err(|rejection| ServerError::BadRequest(rejection.body_text()))?;

    let responses = state.service.predict(&request)?;
    debug!(n = responses.len(), "Served prediction");

    let body = match (&request, responses.as_slice()) {
        (PredictionRequest::Single(_), [only]) => json!(only),
        _ => json!({ "predictions": responses }),
    };
    Ok(Json(body))
}

// ============================================================================
// Model & service status
// ============================================================================

/// `GET /api/health`: 200 while serving, 503 otherwise
pub async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.service.health();
    let status = if health.state == ServiceState::Serving {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(json!({
            "status": health.state,
            "model_version": health.model_version,
            "failure": health.failure,
            "version": env!("CARGO_PKG_VERSION"),
        })),
    )
}

/// `GET /api/model`
pub async fn get_model(State(state): State<Arc<AppState>>) -> Result<Json<serde_json::Value>> {
    let info = state
        .service
        .model_info()
        .ok_or_else(|| ServerError::NotFound("No model is loaded".to_string()))?;
    Ok(Json(json!(info)))
}

/// `POST /api/model/reload`: pick up a newer promotion
pub async fn reload_model(State(state): State<Arc<AppState>>) -> Result<Json<serde_json::Value>> {
    let service = Arc::clone(&state.service);
    let changed = tokio::task::spawn_blocking(move || service.reload())
        .await
        .map_err(|e| ServerError::Internal(format!("reload task failed: {}", e)))??;
    Ok(Json(json!({
        "reloaded": changed,
        "model_version": state.service.health().model_version,
    })))
}

/// `GET /api/stats`
pub async fn get_stats(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let uptime = chrono::Utc::now().signed_duration_since(state.started_at);
    Json(json!({
        "service": state.service.stats(),
        "threshold": state.service.threshold(),
        "server_uptime_secs": uptime.num_seconds(),
    }))
}
