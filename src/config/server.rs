//! Server configuration with builder pattern
//!
//! Network settings, request limits and the CORS allow-list for the HTTP
//! service.

use crate::constants::uploads::DEFAULT_BODY_LIMIT_BYTES;
use serde::{Deserialize, Serialize};

/// CORS configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CorsConfig {
    /// Enable CORS middleware
    #[serde(default = "default_cors_enabled")]
    pub enabled: bool,

    /// Allowed origins. Entries may use a `*.` wildcard for the left-most
    /// host label, e.g. `https://*.vercel.app`.
    #[serde(default = "default_cors_origins")]
    pub allowed_origins: Vec<String>,

    /// Allow credentials in CORS requests
    #[serde(default = "default_cors_credentials")]
    pub allow_credentials: bool,

    /// Max age for preflight cache (in seconds)
    #[serde(default = "default_cors_max_age")]
    pub max_age: u64,
}

fn default_cors_enabled() -> bool {
    true
}
fn default_cors_origins() -> Vec<String> {
    vec![
        "https://medalze.vercel.app".to_string(),
        "https://*.vercel.app".to_string(),
        "http://localhost:5173".to_string(),
        "http://localhost:3000".to_string(),
        "http://127.0.0.1:5173".to_string(),
    ]
}
fn default_cors_credentials() -> bool {
    true
}
fn default_cors_max_age() -> u64 {
    3600
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            enabled: default_cors_enabled(),
            allowed_origins: default_cors_origins(),
            allow_credentials: default_cors_credentials(),
            max_age: default_cors_max_age(),
        }
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Upper bound on a whole request, inference and report calls included
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Maximum accepted request body (uploads)
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,

    #[serde(default)]
    pub cors: CorsConfig,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    10000
}
fn default_request_timeout_secs() -> u64 {
    300
}
fn default_max_body_bytes() -> usize {
    DEFAULT_BODY_LIMIT_BYTES
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_secs: default_request_timeout_secs(),
            max_body_bytes: default_max_body_bytes(),
            cors: CorsConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Create a builder for this config
    pub fn builder() -> ServerConfigBuilder {
        ServerConfigBuilder::new()
    }

    /// Create a builder from existing config
    pub fn to_builder(self) -> ServerConfigBuilder {
        ServerConfigBuilder::from_config(self)
    }

    /// `host:port` string suitable for binding
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Builder for ServerConfig with chainable methods
#[derive(Debug, Default)]
pub struct ServerConfigBuilder {
    config: ServerConfig,
}

impl ServerConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: ServerConfig::default(),
        }
    }

    pub fn from_config(config: ServerConfig) -> Self {
        Self { config }
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    /// Apply the plain `HOST` / `PORT` variables used by hosting platforms
    pub fn from_env_with<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("HOST") {
            self.config.host = host;
        }
        if let Some(port) = lookup("PORT") {
            match port.parse() {
                Ok(p) => self.config.port = p,
                Err(_) => tracing::warn!("Ignoring invalid PORT value '{}'", port),
            }
        }
        self
    }

    pub fn build(self) -> ServerConfig {
        self.config
    }
}
