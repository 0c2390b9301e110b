//! HTTP serving for the active churn model
//!
//! Exposes the inference service as a small REST API and keeps it in sync
//! with promotions made by other processes.

mod api;
mod error;
mod handlers;
mod state;

pub use api::create_router;
pub use error::ServerError;
pub use state::AppState;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::inference::InferenceService;
use crate::registry::ModelPointer;
use crate::tracking::FsArtifactStore;
use crate::Workspace;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Pipeline home holding the ledger, artifacts and active pointer
    pub home: PathBuf,
    /// Overrides the threshold stored with the active model
    pub threshold: Option<f64>,
    /// How often to check the active pointer for a new promotion; 0 disables
    pub reload_interval_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: std::env::var("API_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: std::env::var("API_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8080),
            home: std::env::var("CHURNFLOW_HOME")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./churnflow")),
            threshold: None,
            reload_interval_secs: std::env::var("RELOAD_INTERVAL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(30),
        }
    }
}

/// Start the server with the given configuration
pub async fn run_server(config: ServerConfig) -> anyhow::Result<()> {
    let start_time = chrono::Utc::now();
    let workspace = Workspace::new(&config.home);
    info!(home = %config.home.display(), "Opening pipeline workspace");

    let pointer = Arc::new(ModelPointer::open(workspace.active_path())?);
    let store = Arc::new(FsArtifactStore::new(workspace.artifacts_dir())?);
    let mut service = InferenceService::new(pointer, store);
    if let Some(threshold) = config.threshold {
        service = service.with_threshold(threshold)?;
    }
    let service = Arc::new(service);

    if let Err(e) = service.start() {
        warn!(error = %e, state = %service.state(), "Inference service not serving yet");
    }

    if config.reload_interval_secs > 0 {
        let service = Arc::clone(&service);
        let period = Duration::from_secs(config.reload_interval_secs);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let service = Arc::clone(&service);
                match tokio::task::spawn_blocking(move || service.reload()).await {
                    Ok(Ok(true)) => info!("Picked up newly promoted model"),
                    Ok(Ok(false)) => {}
                    Ok(Err(e)) => warn!(error = %e, "Model reload failed"),
                    Err(e) => warn!(error = %e, "Model reload task panicked"),
                }
            }
        });
    }

    let state = Arc::new(AppState::new(config.clone(), Arc::clone(&service)));
    let app = create_router(state);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!(
        address = %addr,
        state = %service.state(),
        threshold = service.threshold(),
        started_at = %start_time.to_rfc3339(),
        "churnflow server starting"
    );
    info!(url = %format!("http://{}/api/predict", addr), "Prediction endpoint available");
    info!(url = %format!("http://{}/api/health", addr), "Health endpoint available");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(address = %addr, pid = std::process::id(), "Server listening and ready to accept connections");

    let shutdown_signal = async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for ctrl+c");
            std::future::pending::<()>().await;
        }
        let stop_time = chrono::Utc::now();
        let uptime = stop_time.signed_duration_since(start_time);
        info!(
            stopped_at = %stop_time.to_rfc3339(),
            uptime_secs = uptime.num_seconds(),
            "Shutdown signal received, stopping server gracefully"
        );
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await?;

    info!("Server shut down cleanly");
    Ok(())
}
