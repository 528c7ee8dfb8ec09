//! Command handlers

use crate::cli::commands::{PredictArgs, ServeArgs};
use crate::config::AppConfig;
use crate::constants::allowed_file;
use crate::runtime::{preprocess_image, ChexNetClassifier, ImagePreprocessConfig, LoadOptions};
use crate::server::{start_server, state::ServerState};
use anyhow::{bail, Context, Result};
use candle_core::Device;
use tracing::{info, warn};

/// Load the model, connect the report generator and serve until shutdown
pub async fn handle_serve(mut config: AppConfig, args: ServeArgs) -> Result<()> {
    config.server = args.apply(config.server.clone().to_builder()).build();

    let bind = config.server.bind_address();
    let addr = tokio::net::lookup_host(bind.as_str())
        .await
        .with_context(|| format!("Failed to resolve bind address {}", bind))?
        .next()
        .with_context(|| format!("No address found for {}", bind))?;

    info!("Upload folder: {}", config.upload_dir.display());
    info!("Model path: {}", config.model.path.display());

    let state = ServerState::initialize(config).await;
    start_server(addr, state).await
}

/// Classify one image and return the prediction as pretty JSON
pub fn handle_predict(config: &AppConfig, args: &PredictArgs) -> Result<String> {
    let name = args.image.to_string_lossy();
    if !allowed_file(&name) {
        bail!("Invalid file type. Allowed types: png, jpg, jpeg, gif");
    }

    let model_path = args.model.as_ref().unwrap_or(&config.model.path);
    let options = LoadOptions {
        strict: args.strict || config.model.strict,
        ..LoadOptions::from_config(&config.model)
    };

    let (classifier, report) = ChexNetClassifier::load_with_report(model_path, &options)
        .with_context(|| format!("Failed to load model from {}", model_path.display()))?;
    if !report.missing.is_empty() {
        warn!(
            "{} parameters missing from {} ({} schema), predictions use initial values for them",
            report.missing.len(),
            model_path.display(),
            report.schema.map(|s| s.to_string()).unwrap_or_default()
        );
    }
    let tensor = preprocess_image(&args.image, &ImagePreprocessConfig::chexnet(), &Device::Cpu)
        .with_context(|| format!("Failed to preprocess {}", args.image.display()))?;
    let result = classifier.predict(&tensor)?;

    let (condition, confidence) = result.top();
    info!("Top prediction: {} ({:.4})", condition, confidence);

    Ok(serde_json::to_string_pretty(&result)?)
}
