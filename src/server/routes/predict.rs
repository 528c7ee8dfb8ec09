//! Image classification endpoint

use crate::constants::{allowed_file, file_extension, uploads::FILE_FIELD};
use crate::error::{Error, Result};
use crate::runtime::{preprocess_image, predict_image, ChexNetClassifier, ImagePreprocessConfig, PredictionResult};
use crate::server::{state::ServerState, upload::TempUpload};
use axum::{
    body::Bytes,
    extract::{multipart::MultipartRejection, Multipart, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde::Serialize;
use std::path::Path;
use tracing::{debug, error, info};

use super::json_error;

pub const NO_FILE_PART_MESSAGE: &str = "No file part in the request";
pub const NO_SELECTED_FILE_MESSAGE: &str = "No selected file";
pub const EMPTY_FILE_MESSAGE: &str = "Uploaded file is empty";
pub const INVALID_TYPE_MESSAGE: &str = "Invalid file type. Allowed types: png, jpg, jpeg, gif";
pub const MODEL_UNAVAILABLE_MESSAGE: &str = "AI model not loaded. Please check server logs.";

/// Create the prediction router
pub fn create_router() -> Router<ServerState> {
    Router::new().route("/predict", post(predict))
}

#[derive(Debug, Serialize)]
struct PredictResponse {
    status: &'static str,
    #[serde(flatten)]
    result: PredictionResult,
}

/// A validated upload, still in memory
#[derive(Debug)]
struct Upload {
    extension: String,
    contents: Bytes,
}

/// Classify an uploaded chest X-ray
async fn predict(
    State(state): State<ServerState>,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> Response {
    let upload = match read_upload(multipart).await {
        Ok(upload) => upload,
        Err(response) => return response,
    };

    let Some(classifier) = state.classifier.clone() else {
        return Error::ModelUnavailable(MODEL_UNAVAILABLE_MESSAGE.to_string()).into_response();
    };

    let preprocess = state.preprocess.clone();
    let upload_dir = state.config.upload_dir.clone();
    let outcome = tokio::task::spawn_blocking(move || {
        run_prediction(&classifier, &preprocess, &upload_dir, &upload)
    })
    .await;

    match outcome {
        Ok(Ok(result)) => {
            let (condition, confidence) = result.top();
            info!(
                "Top prediction: {} with confidence {:.4}. No significant finding flag: {}",
                condition,
                confidence,
                result.no_significant_finding()
            );
            (
                StatusCode::OK,
                Json(PredictResponse {
                    status: "success",
                    result,
                }),
            )
                .into_response()
        }
        Ok(Err(e)) if e.status_code() == StatusCode::NOT_FOUND => e.into_response(),
        Ok(Err(e)) => {
            error!("Prediction error: {}", e);
            json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Error during prediction: {}", e),
            )
        }
        Err(e) => {
            error!("Prediction task failed: {}", e);
            json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Error during prediction: {}", e),
            )
        }
    }
}

/// Pull the `file` field out of the form and validate it
async fn read_upload(
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> std::result::Result<Upload, Response> {
    let Ok(mut multipart) = multipart else {
        return Err(json_error(StatusCode::BAD_REQUEST, NO_FILE_PART_MESSAGE));
    };

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => return Err(json_error(StatusCode::BAD_REQUEST, NO_FILE_PART_MESSAGE)),
            Err(e) => return Err(json_error(e.status(), e.body_text())),
        };

        if field.name() != Some(FILE_FIELD) {
            continue;
        }

        let filename = field.file_name().unwrap_or_default().to_string();
        if filename.is_empty() {
            return Err(json_error(StatusCode::BAD_REQUEST, NO_SELECTED_FILE_MESSAGE));
        }
        let extension = match file_extension(&filename) {
            Some(ext) if allowed_file(&filename) => ext,
            _ => return Err(json_error(StatusCode::BAD_REQUEST, INVALID_TYPE_MESSAGE)),
        };

        let contents = field
            .bytes()
            .await
            .map_err(|e| json_error(e.status(), e.body_text()))?;
        if contents.is_empty() {
            return Err(json_error(StatusCode::BAD_REQUEST, EMPTY_FILE_MESSAGE));
        }

        debug!("Received upload '{}' ({} bytes)", filename, contents.len());
        return Ok(Upload { extension, contents });
    }
}

/// Save, preprocess and classify; the temporary file is gone on return
fn run_prediction(
    classifier: &ChexNetClassifier,
    preprocess: &ImagePreprocessConfig,
    upload_dir: &Path,
    upload: &Upload,
) -> Result<PredictionResult> {
    let saved = TempUpload::create(upload_dir, &upload.extension, &upload.contents)?;
    if !saved.path().exists() {
        return Err(Error::NotFound(format!(
            "Uploaded file disappeared: {}",
            saved.path().display()
        )));
    }

    let tensor = preprocess_image(saved.path(), preprocess, &candle_core::Device::Cpu)?;
    debug!("Image preprocessed. Shape: {:?}, Dtype: {:?}", tensor.dims(), tensor.dtype());

    predict_image(Some(classifier), &tensor)
}
