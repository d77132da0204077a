use axum::{
    routing::{get, post},
    Router,
};
use parking_lot::RwLock;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::config::Config;
use crate::handlers;
use crate::observer::JobBoard;
use crate::orchestrator::Orchestrator;
use crate::update;

pub type ConfigState = Arc<RwLock<Config>>;

#[derive(Clone)]
pub struct AppState {
    pub config: ConfigState,
    /// Where `POST /config` persists changes.
    pub config_path: PathBuf,
    pub orchestrator: Arc<Orchestrator>,
    pub board: Arc<JobBoard>,
    pub http: reqwest::Client,
}

impl AppState {
    pub fn new(config: Config, config_path: PathBuf) -> anyhow::Result<Self> {
        Ok(AppState {
            orchestrator: Arc::new(Orchestrator::from_config(&config)),
            config: Arc::new(RwLock::new(config)),
            config_path,
            board: Arc::new(JobBoard::new()),
            http: update::http_client()?,
        })
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/download", post(handlers::start_download))
        .route("/cancel", post(handlers::cancel_download))
        .route("/status", get(handlers::get_status))
        .route("/config", get(handlers::get_config).post(handlers::update_config))
        .route("/update", get(handlers::check_update))
        .layer(CorsLayer::new().allow_origin(Any).allow_headers(Any).allow_methods(Any))
        .with_state(state)
}

/// Runs the HTTP front end in the foreground until the process is stopped.
pub async fn run_server(config: Config, config_path: PathBuf, addr: &str) -> anyhow::Result<()> {
    let state = AppState::new(config, config_path)?;
    let app = router(state);

    tracing::info!("Starting server in foreground, listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
