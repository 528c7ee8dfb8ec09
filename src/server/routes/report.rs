//! Report generation endpoint

use crate::error::Error;
use crate::report::ReportRequest;
use crate::server::state::ServerState;
use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde_json::Value;
use tracing::{debug, error};

use super::json_error;

pub const GENERATOR_UNAVAILABLE_MESSAGE: &str =
    "Gemini AI model not initialized. Please check server logs and GEMINI_API_KEY.";
pub const PARSE_FAILURE_MESSAGE: &str =
    "Failed to parse AI generated report. Unexpected response format.";

/// Create the report router
pub fn create_router() -> Router<ServerState> {
    Router::new().route("/generate_report", post(generate_report))
}

/// Generate a narrative report for an analysis result
async fn generate_report(State(state): State<ServerState>, body: Bytes) -> Response {
    let parsed = if body.is_empty() {
        None
    } else {
        serde_json::from_slice::<Value>(&body).ok()
    };

    let request = match ReportRequest::from_body(parsed) {
        Ok(request) => request,
        Err(e) => return e.into_response(),
    };

    let Some(composer) = state.composer.as_ref() else {
        return Error::ServiceUnavailable(GENERATOR_UNAVAILABLE_MESSAGE.to_string()).into_response();
    };

    match composer.compose(&request).await {
        Ok(report) => {
            debug!("Report generated with {}", composer.model_name());
            (StatusCode::OK, Json(serde_json::json!({ "report": report }))).into_response()
        }
        Err(Error::ReportParse { detail, raw_len }) => {
            error!(
                "Failed to parse AI generated report: {} (reply length {})",
                detail, raw_len
            );
            json_error(StatusCode::INTERNAL_SERVER_ERROR, PARSE_FAILURE_MESSAGE)
        }
        Err(e) => {
            error!("Error generating report: {}", e);
            json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to generate report: {}", e),
            )
        }
    }
}
