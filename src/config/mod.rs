//! Unified configuration system for medalze
//!
//! Sources, in increasing precedence:
//! - compiled-in defaults
//! - an optional TOML file (`--config` / `MEDALZE_CONFIG`)
//! - `MEDALZE__*` environment variables (`__` separates nesting levels)
//! - the plain variables the service has always honoured:
//!   `UPLOAD_FOLDER`, `MODEL_PATH`, `SECRET_KEY`, `GEMINI_API_KEY`, `HOST`, `PORT`

pub mod server;

pub use server::{CorsConfig, ServerConfig, ServerConfigBuilder};

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Component, Path, PathBuf};

/// Secret used when none is configured; a warning is logged at startup
pub const DEFAULT_SECRET_KEY: &str = "supersecretkey";

/// Root configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub model: ModelConfig,

    #[serde(default)]
    pub report: ReportConfig,

    /// Directory receiving temporary uploads
    #[serde(default = "default_upload_dir")]
    pub upload_dir: PathBuf,

    /// Session secret
    #[serde(default = "default_secret_key")]
    pub secret_key: String,
}

fn default_upload_dir() -> PathBuf {
    PathBuf::from("static/uploads")
}
fn default_secret_key() -> String {
    DEFAULT_SECRET_KEY.to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            model: ModelConfig::default(),
            report: ReportConfig::default(),
            upload_dir: default_upload_dir(),
            secret_key: default_secret_key(),
        }
    }
}

/// Checkpoint loading
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Checkpoint path; relative paths are resolved against the base directory
    #[serde(default = "default_model_path")]
    pub path: PathBuf,

    /// Fail on missing or unexpected parameter keys instead of logging them
    #[serde(default)]
    pub strict: bool,

    /// Key under which a pickled checkpoint nests its parameters, if any
    #[serde(default)]
    pub state_dict_key: Option<String>,
}

fn default_model_path() -> PathBuf {
    PathBuf::from("model/chexnet.pth")
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            path: default_model_path(),
            strict: false,
            state_dict_key: None,
        }
    }
}

/// Report generation API settings
#[derive(Clone, Serialize, Deserialize)]
pub struct ReportConfig {
    /// API credential; report generation is disabled without it
    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_report_model")]
    pub model: String,

    #[serde(default = "default_report_base_url")]
    pub base_url: String,

    #[serde(default = "default_report_timeout_secs")]
    pub timeout_secs: u64,

    /// List the models visible to the credential when starting up
    #[serde(default = "default_true")]
    pub list_models_on_startup: bool,
}

fn default_report_model() -> String {
    "gemini-pro-latest".to_string()
}
fn default_report_base_url() -> String {
    "https://generativelanguage.googleapis.com".to_string()
}
fn default_report_timeout_secs() -> u64 {
    120
}
fn default_true() -> bool {
    true
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: default_report_model(),
            base_url: default_report_base_url(),
            timeout_secs: default_report_timeout_secs(),
            list_models_on_startup: true,
        }
    }
}

// The credential never reaches logs.
impl fmt::Debug for ReportConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReportConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("timeout_secs", &self.timeout_secs)
            .field("list_models_on_startup", &self.list_models_on_startup)
            .finish()
    }
}

impl AppConfig {
    /// Load configuration from defaults, an optional file and the environment.
    ///
    /// Relative paths are resolved against the config file's directory when a
    /// file is given, otherwise against the current working directory.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder().add_source(Config::try_from(&AppConfig::default())?);

        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        } else {
            builder = builder.add_source(File::with_name("medalze").required(false));
        }

        let settings = builder
            .add_source(
                Environment::with_prefix("MEDALZE")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("server.cors.allowed_origins"),
            )
            .build()?;

        let mut config: AppConfig = settings.try_deserialize()?;
        config.apply_env_overrides_with(|key| std::env::var(key).ok());

        let base_dir = match path.and_then(Path::parent) {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => std::env::current_dir()
                .map_err(|e| ConfigError::Message(format!("Failed to read current dir: {}", e)))?,
        };
        config.resolve_paths(&base_dir);

        Ok(config)
    }

    /// Apply the plain environment variables on top of the layered sources
    pub fn apply_env_overrides_with<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        self.server = self.server.clone().to_builder().from_env_with(&lookup).build();

        if let Some(dir) = lookup("UPLOAD_FOLDER") {
            self.upload_dir = PathBuf::from(dir);
        }
        if let Some(model_path) = lookup("MODEL_PATH") {
            self.model.path = PathBuf::from(model_path);
        }
        if let Some(secret) = lookup("SECRET_KEY") {
            self.secret_key = secret;
        }
        if let Some(api_key) = lookup("GEMINI_API_KEY").filter(|k| !k.trim().is_empty()) {
            self.report.api_key = Some(api_key);
        }
    }

    /// Make the checkpoint path absolute and normalized
    pub fn resolve_paths(&mut self, base_dir: &Path) {
        let model_path = if self.model.path.is_absolute() {
            self.model.path.clone()
        } else {
            base_dir.join(&self.model.path)
        };
        self.model.path = normalize_path(&model_path);
    }

    /// True when the secret was never overridden
    pub fn uses_default_secret(&self) -> bool {
        self.secret_key == DEFAULT_SECRET_KEY
    }

    /// Ensure runtime directories exist
    pub fn ensure_directories(&self) -> Result<(), std::io::Error> {
        std::fs::create_dir_all(&self.upload_dir)
    }
}

/// Lexically normalize a path: drop `.` components and fold `..` into the
/// preceding component. Does not touch the filesystem.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match normalized.components().next_back() {
                Some(Component::Normal(_)) => {
                    normalized.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => normalized.push(".."),
            },
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_normalize_path() {
        assert_eq!(
            normalize_path(Path::new("/srv/backend/./model/../model/chexnet.pth")),
            PathBuf::from("/srv/backend/model/chexnet.pth")
        );
        assert_eq!(
            normalize_path(Path::new("../weights/./a.pth")),
            PathBuf::from("../weights/a.pth")
        );
        assert_eq!(normalize_path(Path::new("/../x")), PathBuf::from("/x"));
    }

    #[test]
    fn test_relative_model_path_is_resolved() {
        let mut config = AppConfig::default();
        config.model.path = PathBuf::from("./model/chexnet.pth");
        config.resolve_paths(Path::new("/srv/backend"));
        assert_eq!(config.model.path, PathBuf::from("/srv/backend/model/chexnet.pth"));
    }

    #[test]
    fn test_absolute_model_path_is_kept() {
        let mut config = AppConfig::default();
        config.model.path = PathBuf::from("/opt/models/chexnet.safetensors");
        config.resolve_paths(Path::new("/srv/backend"));
        assert_eq!(config.model.path, PathBuf::from("/opt/models/chexnet.safetensors"));
    }

    #[test]
    fn test_legacy_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("UPLOAD_FOLDER", "/tmp/uploads"),
            ("MODEL_PATH", "weights/model.safetensors"),
            ("SECRET_KEY", "s3cr3t"),
            ("GEMINI_API_KEY", "key-123"),
            ("PORT", "5000"),
        ]
        .into_iter()
        .collect();

        let mut config = AppConfig::default();
        config.apply_env_overrides_with(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.upload_dir, PathBuf::from("/tmp/uploads"));
        assert_eq!(config.model.path, PathBuf::from("weights/model.safetensors"));
        assert_eq!(config.secret_key, "s3cr3t");
        assert_eq!(config.report.api_key.as_deref(), Some("key-123"));
        assert_eq!(config.server.port, 5000);
        assert!(!config.uses_default_secret());
    }

    #[test]
    fn test_blank_api_key_is_ignored() {
        let mut config = AppConfig::default();
        config.apply_env_overrides_with(|key| (key == "GEMINI_API_KEY").then(|| "  ".to_string()));
        assert!(config.report.api_key.is_none());
    }

    #[test]
    fn test_report_config_debug_redacts_key() {
        let config = ReportConfig {
            api_key: Some("very-secret".to_string()),
            ..ReportConfig::default()
        };
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("very-secret"));
        assert!(rendered.contains("<redacted>"));
    }
}
