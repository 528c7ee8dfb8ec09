//! HTTP server for chest X-ray classification and report generation
//!
//! Routes:
//! - `GET /` and `GET /health`: service status
//! - `POST /predict`: multipart image upload, returns per-condition probabilities
//! - `POST /generate_report`: JSON analysis results, returns a narrative report

use anyhow::{Context, Result};
use axum::{
    extract::{DefaultBodyLimit, State},
    http::{StatusCode, Uri},
    middleware::from_fn,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::{catch_panic::CatchPanicLayer, timeout::TimeoutLayer, trace::TraceLayer};
use tracing::info;

pub mod middleware;
pub mod routes;
pub mod state;
pub mod upload;

use state::ServerState;

/// Create the main application router
pub fn create_app(state: ServerState) -> Router {
    let server_config = state.config.server.clone();
    let timeout_duration = Duration::from_secs(server_config.request_timeout_secs);

    let mut app = Router::new()
        .route("/", get(health_check))
        .route("/health", get(health_check))
        .merge(routes::predict::create_router())
        .merge(routes::report::create_router())
        .fallback(not_found)
        .layer(DefaultBodyLimit::max(server_config.max_body_bytes))
        .layer(TimeoutLayer::new(timeout_duration))
        .layer(from_fn(middleware::logging_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(CatchPanicLayer::custom(middleware::handle_panic))
        .with_state(state);

    // CORS is outermost so preflights never reach the handlers
    if server_config.cors.enabled {
        app = app.layer(middleware::cors_layer(&server_config.cors));
    }

    app
}

/// Service status
async fn health_check(State(state): State<ServerState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "MedAlze API is running!",
        "model_loaded": state.model_loaded(),
        "gemini_initialized": state.gemini_initialized(),
    }))
}

async fn not_found(uri: Uri) -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({
            "error": "Not Found",
            "message": format!("The requested URL {} was not found on the server.", uri.path()),
        })),
    )
}

/// Start the HTTP server and run until SIGINT/SIGTERM
pub async fn start_server(addr: SocketAddr, state: ServerState) -> Result<()> {
    let app = create_app(state);

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Starting MedAlze server on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let (mut sigterm, mut sigint) = match (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
    ) {
        (Ok(term), Ok(int)) => (term, int),
        _ => {
            tracing::warn!("Failed to register signal handlers, falling back to Ctrl+C");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = sigterm.recv() => info!("Received SIGTERM"),
        _ = sigint.recv() => info!("Received SIGINT"),
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("Received Ctrl+C");
    }
}
