//! Server CLI commands and arguments
//!
//! Configuration logic is in crate::config module.

use crate::config::ServerConfigBuilder;
use clap::Args;

/// CLI arguments for the `serve` command
#[derive(Debug, Default, Clone, Args)]
pub struct ServeArgs {
    /// Server host address
    #[arg(long)]
    pub host: Option<String>,

    /// Server port
    #[arg(long)]
    pub port: Option<u16>,
}

impl ServeArgs {
    /// Apply the flags on top of the loaded server configuration
    pub fn apply(&self, mut builder: ServerConfigBuilder) -> ServerConfigBuilder {
        if let Some(host) = &self.host {
            builder = builder.host(host.clone());
        }
        if let Some(port) = self.port {
            builder = builder.port(port);
        }
        builder
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;

    #[test]
    fn test_flags_override_config() {
        let args = ServeArgs {
            host: Some("127.0.0.1".to_string()),
            port: None,
        };
        let config = args.apply(ServerConfig::builder().port(5000)).build();
        assert_eq!(config.bind_address(), "127.0.0.1:5000");
    }
}
