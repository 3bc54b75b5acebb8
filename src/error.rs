//! Common error types for the illustration pipeline

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] config::ConfigError),

    #[error("I/O failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP request failed: {0}")]
    HttpClient(#[from] reqwest::Error),

    /// The WebUI answered with an error or an unusable response
    #[error("Stable Diffusion error: {0}")]
    Backend(String),

    #[error("Backend process error: {0}")]
    Process(String),

    #[error("Image upload failed: {0}")]
    Upload(String),

    #[error("Translation failed: {0}")]
    Translation(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// HTTP status, error type and optional machine-readable code
    fn classify(&self) -> (StatusCode, &'static str, Option<&'static str>) {
        match self {
            Self::Json(_) => (StatusCode::BAD_REQUEST, "invalid_request_error", Some("invalid_json")),
            Self::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "invalid_request_error", None),
            Self::AuthenticationFailed(_) => {
                (StatusCode::UNAUTHORIZED, "authentication_error", Some("invalid_api_key"))
            }
            Self::HttpClient(_) | Self::Backend(_) => (StatusCode::BAD_GATEWAY, "backend_error", None),
            Self::Upload(_) => (StatusCode::BAD_GATEWAY, "backend_error", Some("upload_failed")),
            Self::Translation(_) => (StatusCode::BAD_GATEWAY, "backend_error", Some("translation_failed")),
            Self::Timeout(_) => (StatusCode::GATEWAY_TIMEOUT, "timeout_error", None),
            Self::Process(_) => (StatusCode::INTERNAL_SERVER_ERROR, "server_error", Some("process_error")),
            Self::Config(_) | Self::Io(_) | Self::Internal(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "server_error", None)
            }
        }
    }
}

/// JSON body of an error response
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub message: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub code: Option<&'static str>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, kind, code) = self.classify();
        if status.is_server_error() {
            error!(status = %status, "{}", self);
        }

        let body = Json(ErrorBody {
            error: ErrorDetail {
                message: self.to_string(),
                kind,
                code,
            },
        });

        (status, body).into_response()
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, AppError>;
