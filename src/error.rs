//! Error types for the medalze service.
//!
//! Every failure is caught at the request boundary and rendered as a JSON
//! body (`{"error": ...}`) with the status code returned by
//! [`Error::status_code`]. Nothing here is allowed to take the process down.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use std::path::PathBuf;
use std::result;

/// A specialized Result type for medalze operations.
pub type Result<T> = result::Result<T, Error>;

/// The error type for medalze operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed or missing request data
    #[error("{0}")]
    InvalidInput(String),

    /// Missing resource
    #[error("{0}")]
    NotFound(String),

    /// A file the operation depends on does not exist
    #[error("File not found at: {}", .0.display())]
    FileNotFound(PathBuf),

    /// The classifier failed to initialize at startup
    #[error("{0}")]
    ModelUnavailable(String),

    /// The report generator failed to initialize at startup
    #[error("{0}")]
    ServiceUnavailable(String),

    /// An operation was invoked without the state it requires
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Checkpoint could not be turned into a working model
    #[error("Failed to load AI model: {kind}: {message}")]
    ModelLoad { kind: String, message: String },

    /// A required key is absent from caller-supplied data
    #[error("missing key '{0}'")]
    KeyError(String),

    /// The generation API failed or returned no usable text
    #[error("Report generation failed: {0}")]
    Generation(String),

    /// The generated reply did not contain a parseable report
    #[error("Failed to parse AI generated report: {detail} (reply length {raw_len})")]
    ReportParse { detail: String, raw_len: usize },

    /// Anything else
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Tensor error: {0}")]
    Tensor(#[from] candle_core::Error),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

impl Error {
    /// Create a `ModelLoad` error from any displayable cause
    pub fn model_load(kind: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::ModelLoad {
            kind: kind.into(),
            message: message.to_string(),
        }
    }

    /// Create an `InvalidInput` error from a message
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// HTTP status for this error at the request boundary
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Error::NotFound(_) | Error::FileNotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(serde_json::json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}
