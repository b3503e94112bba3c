//! Local HTTP status/control API

use axum::{
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

use crate::audio::recorder::Recording;
use crate::client::{ClientCommand, ClientSnapshot};
use crate::config::UiConfig;
use crate::error::{Error, Result};
use crate::network::health::HealthSnapshot;
use crate::ui::handlers;

/// Shared handler state. Reads come from published snapshots only.
pub struct AppState {
    pub snapshot: watch::Receiver<ClientSnapshot>,
    pub health: watch::Receiver<HealthSnapshot>,
    /// Last finished recording
    pub recording: watch::Receiver<Option<Arc<Recording>>>,
    pub commands: mpsc::UnboundedSender<ClientCommand>,
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/status", get(handlers::get_status))
        .route("/api/connections", get(handlers::get_connections))
        .route("/api/devices", get(handlers::get_devices))
        .route("/api/settings", post(handlers::update_settings))
        .route("/api/receiver", post(handlers::select_receiver))
        .route("/api/tune", post(handlers::tune))
        .route("/api/resume", post(handlers::resume))
        .route("/api/recording", get(handlers::download_recording))
        .route("/api/recording/start", post(handlers::start_recording))
        .route("/api/recording/stop", post(handlers::stop_recording))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub struct WebServer {
    config: UiConfig,
    state: Arc<AppState>,
}

impl WebServer {
    pub fn new(config: UiConfig, state: AppState) -> Self {
        Self {
            config,
            state: Arc::new(state),
        }
    }

    fn addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.config.bind_address, self.config.http_port)
            .parse()
            .map_err(|e| Error::Config(format!("bad UI bind address: {}", e)))
    }

    /// Serve until the task is aborted
    pub async fn run(self) -> Result<()> {
        let addr = self.addr()?;
        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!("HTTP API listening on http://{}", addr);
        axum::serve(listener, create_router(self.state)).await?;
        Ok(())
    }

    /// Spawn onto the current runtime
    pub fn start_background(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            if let Err(e) = self.run().await {
                error!("HTTP API stopped: {}", e);
            }
        })
    }
}
