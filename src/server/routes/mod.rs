//! HTTP route handlers

pub mod predict;
pub mod report;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

/// `{"error": message}` with the given status
pub(crate) fn json_error(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(serde_json::json!({ "error": message.into() })),
    )
        .into_response()
}
