use crate::{
    config::{self, Config},
    error::AppError,
    models::{DownloadRequest, DownloadResponse, StartDownload},
    observer::JobObserver,
    orchestrator::CancelRequest,
    server::AppState,
    update,
};
use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;

// ===================================================================
//                          CONFIG HANDLERS
// ===================================================================

/// # GET /config - Returns the current application configuration.
pub async fn get_config(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let config = state.config.read().clone();
    Ok((StatusCode::OK, Json(config)))
}

/// # POST /config - Updates the configuration, applies its switches and saves it to disk.
pub async fn update_config(
    State(state): State<AppState>,
    Json(payload): Json<Config>,
) -> Result<impl IntoResponse, AppError> {
    // Nothing is applied unless it reached the disk.
    config::save_config_to(&state.config_path, &payload).await?;
    *state.config.write() = payload.clone();
    state.orchestrator.set_features(payload.features);
    tracing::info!("Configuration updated and saved.");
    Ok((StatusCode::OK, Json(payload)))
}

// ===================================================================
//                          DOWNLOAD HANDLERS
// ===================================================================

/// # POST /download - Starts a download-and-convert job in the background.
pub async fn start_download(
    State(state): State<AppState>,
    Json(payload): Json<StartDownload>,
) -> Result<impl IntoResponse, AppError> {
    let destination = payload
        .destination
        .unwrap_or_else(|| state.config.read().download_directory.clone());

    let request = DownloadRequest {
        url: payload.url,
        destination: PathBuf::from(destination),
        playlist: payload.playlist,
        audio_only: payload.audio_only,
    };

    let observer: Arc<dyn JobObserver> = state.board.clone();
    let handle = state
        .orchestrator
        .submit(request, observer)
        .await
        .map_err(AppError::from_submit)?;

    tracing::info!("Started download job {}", handle.id());
    Ok((
        StatusCode::ACCEPTED,
        Json(DownloadResponse {
            message: "Download started successfully".to_string(),
            job_id: handle.id(),
        }),
    ))
}

/// # POST /cancel - Asks the running job to stop at its next checkpoint.
pub async fn cancel_download(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    match state.orchestrator.cancel_active() {
        CancelRequest::Requested(job_id) => {
            tracing::info!("Cancellation requested for job {}", job_id);
            Ok((
                StatusCode::ACCEPTED,
                Json(json!({ "message": "Cancellation requested", "job_id": job_id })),
            ))
        }
        CancelRequest::NoActiveJob => Err(AppError::NotFound("No download is in progress.".to_string())),
        CancelRequest::Disabled => Err(AppError::BadRequest(
            "Cancellation is disabled in the configuration.".to_string(),
        )),
    }
}

/// # GET /status - Returns the status line, the log and the last job report.
pub async fn get_status(State(state): State<AppState>) -> impl IntoResponse {
    (StatusCode::OK, Json(state.board.snapshot()))
}

// ===================================================================
//                          UPDATE HANDLER
// ===================================================================

/// # GET /update - Compares the latest GitHub release with this build.
pub async fn check_update(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let repository = update::configured_repository(&state.config.read())
        .map(str::to_string)
        .map_err(|e| AppError::BadRequest(e.to_string()))?;

    let status = update::check_for_update(&state.http, &repository, update::CURRENT_VERSION)
        .await
        .map_err(|e| AppError::Upstream(format!("Update check failed: {e}")))?;
    Ok((StatusCode::OK, Json(status)))
}

#[cfg(test)]
mod tests {
    use crate::config::{Config, Features};
    use crate::error::FetchError;
    use crate::fetch::{FetchEvent, FetchOutcome, FetchPlan, Fetcher};
    use crate::observer::JobBoard;
    use crate::orchestrator::Orchestrator;
    use crate::server::{router, AppState};
    use crate::transcode::FfmpegTranscoder;
    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use parking_lot::RwLock;
    use serde_json::{json, Value};
    use std::ops::ControlFlow;
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;
    use tower::ServiceExt;

    /// Holds every job open until it is cancelled.
    struct StallingFetcher;

    #[async_trait]
    impl Fetcher for StallingFetcher {
        async fn fetch(
            &self,
            _plan: &FetchPlan,
            _on_progress: &mut (dyn FnMut(FetchEvent) -> ControlFlow<()> + Send),
            cancel: &CancellationToken,
        ) -> Result<FetchOutcome, FetchError> {
            cancel.cancelled().await;
            Err(FetchError::Cancelled)
        }
    }

    fn state(dir: &std::path::Path) -> AppState {
        let config = Config {
            download_directory: dir.join("downloads").to_string_lossy().into_owned(),
            ..Config::default()
        };
        let orchestrator = Orchestrator::new(
            Arc::new(StallingFetcher),
            Arc::new(FfmpegTranscoder::new("ffmpeg")),
            config.features,
        );
        AppState {
            config: Arc::new(RwLock::new(config)),
            config_path: dir.join("config.toml"),
            orchestrator: Arc::new(orchestrator),
            board: Arc::new(JobBoard::new()),
            http: reqwest::Client::new(),
        }
    }

    fn post(uri: &str, body: Value) -> Request<Body> {
        Request::post(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn json_body(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn empty_url_is_a_bad_request() {
        let dir = tempfile::tempdir().unwrap();
        let app = router(state(dir.path()));

        let response = app.oneshot(post("/download", json!({ "url": "  " }))).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["error"], "a URL is required");
    }

    #[tokio::test]
    async fn start_uses_configured_directory_then_cancel_and_busy() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(dir.path());
        let app = router(state.clone());

        let response = app
            .clone()
            .oneshot(post("/download", json!({ "url": "https://example.com/v" })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(json_body(response).await["job_id"], 1);
        assert!(dir.path().join("downloads").is_dir());

        let busy = app
            .clone()
            .oneshot(post("/download", json!({ "url": "https://example.com/w" })))
            .await
            .unwrap();
        assert_eq!(busy.status(), StatusCode::CONFLICT);

        let cancel = app.clone().oneshot(post("/cancel", json!({}))).await.unwrap();
        assert_eq!(cancel.status(), StatusCode::ACCEPTED);

        // Let the job observe the cancellation and publish its report.
        for _ in 0..200 {
            if state.board.snapshot().last_report.is_some() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(state.orchestrator.active_job(), None);

        let status = app
            .oneshot(Request::get("/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = json_body(status).await;
        assert_eq!(body["status_line"], "Cancelled");
        assert_eq!(body["last_report"]["status"], "cancelled");
        assert_eq!(body["log"][0], "Starting download: https://example.com/v");
    }

    #[tokio::test]
    async fn cancel_without_job_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let app = router(state(dir.path()));

        let response = app.oneshot(post("/cancel", json!({}))).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn config_update_is_saved_and_applied() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(dir.path());
        let app = router(state.clone());

        let mut config = state.config.read().clone();
        config.features = Features { cancellation: false, update_check: false, ..Features::default() };
        let response = app
            .clone()
            .oneshot(post("/config", serde_json::to_value(&config).unwrap()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(!state.orchestrator.features().cancellation);
        assert!(dir.path().join("config.toml").exists());

        let cancel = app.clone().oneshot(post("/cancel", json!({}))).await.unwrap();
        assert_eq!(cancel.status(), StatusCode::BAD_REQUEST);

        let update = app
            .oneshot(Request::get("/update").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(update.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn config_that_cannot_be_saved_is_not_applied() {
        let dir = tempfile::tempdir().unwrap();
        let mut state = state(dir.path());
        // A directory cannot be written as a file.
        state.config_path = dir.path().to_path_buf();
        let app = router(state.clone());

        let mut config = state.config.read().clone();
        config.features.cancellation = false;
        config.ytdlp_path = "/opt/yt-dlp".to_string();
        let response = app
            .oneshot(post("/config", serde_json::to_value(&config).unwrap()))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(state.orchestrator.features().cancellation);
        assert_eq!(state.config.read().ytdlp_path, "yt-dlp");
    }

    #[tokio::test]
    async fn update_without_repository_is_a_bad_request() {
        let dir = tempfile::tempdir().unwrap();
        let app = router(state(dir.path()));

        let response = app
            .oneshot(Request::get("/update").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
