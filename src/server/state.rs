//! Server state management

use crate::config::AppConfig;
use crate::report::{GeminiClient, ReportComposer, ReportGenerator};
use crate::runtime::{ChexNetClassifier, ImagePreprocessConfig, LoadOptions};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Shared server state, built once at startup
///
/// A component that failed to initialize is `None`; the endpoints that need
/// it answer with an error while the rest of the service keeps working.
#[derive(Clone, Debug)]
pub struct ServerState {
    /// Loaded classifier, immutable after startup
    pub classifier: Option<Arc<ChexNetClassifier>>,

    /// Report composer backed by the configured generator
    pub composer: Option<ReportComposer>,

    /// Preprocessing applied to uploads before inference
    pub preprocess: Arc<ImagePreprocessConfig>,

    pub config: Arc<AppConfig>,
}

impl ServerState {
    /// State with no classifier and no report generator
    pub fn new(config: AppConfig) -> Self {
        Self {
            classifier: None,
            composer: None,
            preprocess: Arc::new(ImagePreprocessConfig::chexnet()),
            config: Arc::new(config),
        }
    }

    pub fn with_classifier(mut self, classifier: Arc<ChexNetClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub fn with_generator(mut self, generator: Arc<dyn ReportGenerator>) -> Self {
        self.composer = Some(ReportComposer::new(generator));
        self
    }

    /// Load the model and connect the report generator
    ///
    /// Failures are logged and leave the corresponding component unset.
    pub async fn initialize(config: AppConfig) -> Self {
        if let Err(e) = config.ensure_directories() {
            warn!(
                "Failed to create upload directory {}: {}",
                config.upload_dir.display(),
                e
            );
        }
        if config.uses_default_secret() {
            warn!("SECRET_KEY is not set, using the built-in default");
        }

        let mut state = Self::new(config);

        let path = state.config.model.path.clone();
        let options = LoadOptions::from_config(&state.config.model);
        let loaded =
            tokio::task::spawn_blocking(move || ChexNetClassifier::load(&path, &options)).await;
        match loaded {
            Ok(Ok(classifier)) => {
                info!("CheXNet model loaded successfully");
                state.classifier = Some(Arc::new(classifier));
            }
            Ok(Err(e)) => error!("Failed to load AI model on startup: {}", e),
            Err(e) => error!("Model loading task failed: {}", e),
        }

        if state.config.report.api_key.is_none() {
            warn!("GEMINI_API_KEY not found in environment variables. Report generation will not work.");
        } else {
            let connected = GeminiClient::connect(&state.config.report).await;
            match connected {
                Ok(client) => {
                    state = state.with_generator(Arc::new(client));
                }
                Err(e) => error!(
                    "Failed to initialize Gemini AI model with provided API key: {}",
                    e
                ),
            }
        }

        state
    }

    pub fn model_loaded(&self) -> bool {
        self.classifier.is_some()
    }

    pub fn gemini_initialized(&self) -> bool {
        self.composer.is_some()
    }
}
