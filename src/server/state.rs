//! Application state management

use std::sync::Arc;

use crate::inference::InferenceService;

use super::ServerConfig;

/// Application state shared across handlers
pub struct AppState {
    pub config: ServerConfig,
    pub service: Arc<InferenceService>,
    pub started_at: chrono::DateTime<chrono::Utc>,
}

impl AppState {
    pub fn new(config: ServerConfig, service: Arc<InferenceService>) -> Self {
        Self {
            config,
            service,
            started_at: chrono::Utc::now(),
        }
    }
}
