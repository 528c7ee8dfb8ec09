//! End-to-end tests for the HTTP routes

mod common;

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
};
use common::*;
use medalze_core::{constants::CONDITIONS, create_app};
use serde_json::{json, Value};
use tower::ServiceExt;

fn predict_request(field: &str, filename: &str, contents: &[u8]) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri("/predict")
        .header(header::CONTENT_TYPE, multipart_content_type())
        .body(Body::from(multipart_body(field, filename, contents)))
        .expect("test: request")
}

fn report_request(body: Option<Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(Method::POST)
        .uri("/generate_report")
        .header(header::CONTENT_TYPE, "application/json");
    let body = match body {
        Some(value) => Body::from(value.to_string()),
        None => Body::empty(),
    };
    builder.body(body).expect("test: request")
}

fn report_payload() -> Value {
    json!({
        "analysisResults": {"condition": "cardiomegaly", "confidence": 0.81},
        "patientInfo": {"id": "P-100", "age": 63},
        "conditionsMetadata": {
            "cardiomegaly": {
                "label": "Cardiomegaly",
                "description": "Enlarged cardiac silhouette",
                "severity": "moderate"
            }
        }
    })
}

const FENCED_REPORT: &str = "Here you go:\n```json\n{\"summary\": \"Enlarged heart\", \"findings\": \"CTR 0.6\", \"impression\": \"Cardiomegaly\", \"recommendations\": \"Echo\"}\n```";

#[tokio::test]
async fn test_health_reports_component_status() {
    let dir = tempfile::tempdir().expect("test: tempdir");
    let state = bare_state(dir.path()).with_classifier(tiny_classifier());

    for path in ["/", "/health"] {
        let response = create_app(state.clone())
            .oneshot(Request::get(path).body(Body::empty()).expect("test: request"))
            .await
            .expect("test: response");
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert_eq!(body["model_loaded"], true);
        assert_eq!(body["gemini_initialized"], false);
        assert!(body["status"].is_string());
    }
}

#[tokio::test]
async fn test_predict_rejects_disallowed_extension() {
    let dir = tempfile::tempdir().expect("test: tempdir");
    let app = create_app(bare_state(dir.path()));

    let response = app
        .oneshot(predict_request("file", "notes.txt", b"hello"))
        .await
        .expect("test: response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        body_json(response).await["error"],
        "Invalid file type. Allowed types: png, jpg, jpeg, gif"
    );
    assert_eq!(file_count(dir.path()), 0);
}

#[tokio::test]
async fn test_predict_rejects_empty_upload() {
    let dir = tempfile::tempdir().expect("test: tempdir");
    let app = create_app(bare_state(dir.path()).with_classifier(tiny_classifier()));

    let response = app
        .oneshot(predict_request("file", "chest.png", b""))
        .await
        .expect("test: response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"], "Uploaded file is empty");
    assert_eq!(file_count(dir.path()), 0);
}

#[tokio::test]
async fn test_predict_requires_file_field() {
    let dir = tempfile::tempdir().expect("test: tempdir");
    let app = create_app(bare_state(dir.path()));

    let response = app
        .oneshot(predict_request("image", "chest.png", &png_bytes(32, 32)))
        .await
        .expect("test: response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"], "No file part in the request");
}

#[tokio::test]
async fn test_predict_rejects_non_multipart_body() {
    let dir = tempfile::tempdir().expect("test: tempdir");
    let app = create_app(bare_state(dir.path()));

    let request = Request::post("/predict")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{}"))
        .expect("test: request");
    let response = app.oneshot(request).await.expect("test: response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_predict_rejects_empty_filename() {
    let dir = tempfile::tempdir().expect("test: tempdir");
    let app = create_app(bare_state(dir.path()));

    let response = app
        .oneshot(predict_request("file", "", b"data"))
        .await
        .expect("test: response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"], "No selected file");
}

#[tokio::test]
async fn test_predict_without_model_is_500() {
    let dir = tempfile::tempdir().expect("test: tempdir");
    let app = create_app(bare_state(dir.path()));

    let response = app
        .oneshot(predict_request("file", "chest.png", &png_bytes(64, 64)))
        .await
        .expect("test: response");
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        body_json(response).await["error"],
        "AI model not loaded. Please check server logs."
    );
}

#[tokio::test]
async fn test_predict_success_returns_ordered_predictions() {
    let dir = tempfile::tempdir().expect("test: tempdir");
    let app = create_app(bare_state(dir.path()).with_classifier(tiny_classifier()));

    let response = app
        .oneshot(predict_request("file", "Chest.PNG", &png_bytes(300, 260)))
        .await
        .expect("test: response");
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["status"], "success");

    let predictions = body["predictions"].as_object().expect("test: predictions object");
    assert_eq!(predictions.len(), CONDITIONS.len());
    for condition in CONDITIONS {
        let p = predictions[condition].as_f64().expect("test: probability");
        assert!((0.0..=1.0).contains(&p));
    }

    let order: Vec<&str> = body["conditions_order"]
        .as_array()
        .expect("test: order")
        .iter()
        .filter_map(Value::as_str)
        .collect();
    assert_eq!(order, CONDITIONS);

    let max = predictions.values().filter_map(Value::as_f64).fold(0.0, f64::max);
    assert_eq!(body["no_significant_finding"], json!(max < 0.35));

    assert_eq!(file_count(dir.path()), 0, "temporary upload was not removed");
}

#[tokio::test]
async fn test_predict_corrupt_image_cleans_up() {
    let dir = tempfile::tempdir().expect("test: tempdir");
    let app = create_app(bare_state(dir.path()).with_classifier(tiny_classifier()));

    let response = app
        .oneshot(predict_request("file", "broken.jpg", b"definitely not a jpeg"))
        .await
        .expect("test: response");
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let body = body_json(response).await;
    let message = body["error"].as_str().expect("test: message");
    assert!(message.starts_with("Error during prediction:"), "{}", message);
    assert_eq!(file_count(dir.path()), 0, "temporary upload was not removed");
}

#[tokio::test]
async fn test_predict_extreme_aspect_ratio_is_refused() {
    let dir = tempfile::tempdir().expect("test: tempdir");
    let app = create_app(bare_state(dir.path()).with_classifier(tiny_classifier()));

    let response = app
        .oneshot(predict_request("file", "strip.png", &png_bytes(1, 40_000)))
        .await
        .expect("test: response");
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = body_json(response).await;
    let message = body["error"].as_str().expect("test: error message");
    assert!(message.starts_with("Error during prediction:"), "{}", message);
    assert!(message.contains("aspect ratio"), "{}", message);
    assert_eq!(file_count(dir.path()), 0);
}

#[tokio::test]
async fn test_report_without_body() {
    let dir = tempfile::tempdir().expect("test: tempdir");
    let app = create_app(bare_state(dir.path()).with_generator(MockGenerator::replying("{}")));

    let response = app.oneshot(report_request(None)).await.expect("test: response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"], "No JSON data provided");
}

#[tokio::test]
async fn test_report_missing_field() {
    let dir = tempfile::tempdir().expect("test: tempdir");
    let app = create_app(bare_state(dir.path()).with_generator(MockGenerator::replying("{}")));

    let mut payload = report_payload();
    payload["patientInfo"] = json!({});
    let response = app
        .oneshot(report_request(Some(payload)))
        .await
        .expect("test: response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        body_json(response).await["error"],
        "Missing analysisResults, patientInfo, or conditionsMetadata in request body"
    );
}

#[tokio::test]
async fn test_report_without_generator_is_500() {
    let dir = tempfile::tempdir().expect("test: tempdir");
    let app = create_app(bare_state(dir.path()));

    let response = app
        .oneshot(report_request(Some(report_payload())))
        .await
        .expect("test: response");
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = body_json(response).await;
    assert!(body["error"]
        .as_str()
        .expect("test: message")
        .contains("not initialized"));
}

#[tokio::test]
async fn test_report_success() {
    let dir = tempfile::tempdir().expect("test: tempdir");
    let app = create_app(bare_state(dir.path()).with_generator(MockGenerator::replying(FENCED_REPORT)));

    let response = app
        .oneshot(report_request(Some(report_payload())))
        .await
        .expect("test: response");
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(
        body["report"],
        json!({
            "summary": "Enlarged heart",
            "findings": "CTR 0.6",
            "impression": "Cardiomegaly",
            "recommendations": "Echo"
        })
    );
}

#[tokio::test]
async fn test_report_unknown_condition() {
    let dir = tempfile::tempdir().expect("test: tempdir");
    let app = create_app(bare_state(dir.path()).with_generator(MockGenerator::replying(FENCED_REPORT)));

    let mut payload = report_payload();
    payload["analysisResults"]["condition"] = json!("hernia");
    let response = app
        .oneshot(report_request(Some(payload)))
        .await
        .expect("test: response");
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let body = body_json(response).await;
    let message = body["error"].as_str().expect("test: message");
    assert!(message.starts_with("Failed to generate report:"), "{}", message);
    assert!(message.contains("hernia"));
}

#[tokio::test]
async fn test_report_unparseable_reply_is_generic() {
    let dir = tempfile::tempdir().expect("test: tempdir");
    let app = create_app(
        bare_state(dir.path()).with_generator(MockGenerator::replying("Sorry, I can't do that.")),
    );

    let response = app
        .oneshot(report_request(Some(report_payload())))
        .await
        .expect("test: response");
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        body_json(response).await["error"],
        "Failed to parse AI generated report. Unexpected response format."
    );
}

#[tokio::test]
async fn test_report_generator_failure() {
    let dir = tempfile::tempdir().expect("test: tempdir");
    let app = create_app(bare_state(dir.path()).with_generator(MockGenerator::failing("quota exceeded")));

    let response = app
        .oneshot(report_request(Some(report_payload())))
        .await
        .expect("test: response");
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let body = body_json(response).await;
    let message = body["error"].as_str().expect("test: message");
    assert!(message.starts_with("Failed to generate report:"));
    assert!(message.contains("quota exceeded"));
}

#[tokio::test]
async fn test_unknown_route_is_json_404() {
    let dir = tempfile::tempdir().expect("test: tempdir");
    let app = create_app(bare_state(dir.path()));

    let response = app
        .oneshot(Request::get("/nope").body(Body::empty()).expect("test: request"))
        .await
        .expect("test: response");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = body_json(response).await;
    assert_eq!(body["error"], "Not Found");
    assert!(body["message"].is_string());
}

#[tokio::test]
async fn test_cors_preflight_allows_vercel_preview() {
    let dir = tempfile::tempdir().expect("test: tempdir");
    let app = create_app(bare_state(dir.path()));

    let origin = "https://medalze-git-feature.vercel.app";
    let request = Request::builder()
        .method(Method::OPTIONS)
        .uri("/predict")
        .header(header::ORIGIN, origin)
        .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
        .body(Body::empty())
        .expect("test: request");
    let response = app.oneshot(request).await.expect("test: response");

    assert_eq!(
        response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
        origin
    );
    assert_eq!(
        response.headers()[header::ACCESS_CONTROL_ALLOW_CREDENTIALS],
        "true"
    );
}

#[tokio::test]
async fn test_cors_rejects_unknown_origin() {
    let dir = tempfile::tempdir().expect("test: tempdir");
    let app = create_app(bare_state(dir.path()));

    let request = Request::get("/health")
        .header(header::ORIGIN, "https://evil.example.com")
        .body(Body::empty())
        .expect("test: request");
    let response = app.oneshot(request).await.expect("test: response");

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response
        .headers()
        .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
        .is_none());
}
