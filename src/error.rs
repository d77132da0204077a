use axum::{http::StatusCode, response::{IntoResponse, Response}, Json};
use serde_json::json;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

// === Job Errors ===

/// Problems with a request that are caught before any work starts.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("a URL is required")]
    UrlRequired,
    #[error("a destination folder is required")]
    DestinationRequired,
    #[error("destination {} is not writable: {reason}", path.display())]
    DestinationNotWritable { path: PathBuf, reason: String },
    #[error("{0} downloads are disabled in the configuration")]
    FeatureDisabled(&'static str),
}

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error(transparent)]
    Invalid(#[from] ValidationError),
    #[error("a download is already in progress")]
    Busy,
}

/// Failures of the fetch step. `Cancelled` is an outcome, not a failure.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("download cancelled by user")]
    Cancelled,
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("{0}")]
    Failed(String),
}

/// Failures of a single item's conversion. `Cancelled` is an outcome, not a failure.
#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("conversion cancelled by user")]
    Cancelled,
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("{0}")]
    Failed(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid version `{0}`")]
pub struct VersionError(pub String);

/// Why the release check is not run at all.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum UpdateCheckError {
    #[error("update checks are disabled in the configuration")]
    Disabled,
    #[error("no release repository is configured")]
    NotConfigured,
}

// === HTTP Errors ===

pub enum AppError {
    Internal(anyhow::Error),
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    Upstream(String),
}

impl AppError {
    pub fn from_submit(err: SubmitError) -> Self {
        match err {
            SubmitError::Invalid(e) => AppError::BadRequest(e.to_string()),
            SubmitError::Busy => AppError::Conflict(err.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::Internal(e) => {
                tracing::error!("Internal server error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "An internal server error occurred".to_string(),
                )
            }
            AppError::BadRequest(e) => (StatusCode::BAD_REQUEST, e),
            AppError::NotFound(e) => (StatusCode::NOT_FOUND, e),
            AppError::Conflict(e) => (StatusCode::CONFLICT, e),
            AppError::Upstream(e) => (StatusCode::BAD_GATEWAY, e),
        };

        let body = Json(json!({ "error": error_message }));
        (status, body).into_response()
    }
}

// Lets handlers use `?` on anything anyhow understands.
impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self::Internal(err.into())
    }
}
