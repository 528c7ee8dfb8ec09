//! MedAlze binary - chest X-ray classification server
//!
//! This binary provides the main entry point for the MedAlze service.

use anyhow::{Context as _, Result};
use clap::Parser;
use tracing::info;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::EnvFilter;

use medalze_core::cli::commands::Commands;
use medalze_core::cli::{handle_predict, handle_serve};
use medalze_core::config::AppConfig;

const DEFAULT_LOG_FILTER: &str = "medalze=info,medalze_core=info,tower_http=info";

#[derive(Parser)]
#[command(
    name = "medalze",
    version,
    about = "Chest X-ray classification with AI-assisted report generation",
    long_about = None
)]
struct Cli {
    /// Path to configuration file (overrides default config locations)
    #[arg(long, global = true, env = "MEDALZE_CONFIG")]
    config: Option<std::path::PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Install the global subscriber; the guard must live until exit
fn init_logging() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = || {
        EnvFilter::builder().parse_lossy(
            std::env::var("RUST_LOG").unwrap_or_else(|_| DEFAULT_LOG_FILTER.to_string()),
        )
    };

    match std::env::var("MEDALZE_LOG_DIR") {
        Ok(log_dir) => {
            let file_appender = RollingFileAppender::new(Rotation::DAILY, log_dir, "medalze.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter())
                .with_target(true)
                .with_file(true)
                .with_line_number(true)
                .with_ansi(false)
                .with_writer(non_blocking)
                .init();
            Some(guard)
        }
        Err(_) => {
            tracing_subscriber::fmt()
                .with_env_filter(filter())
                .with_target(true)
                .with_file(true)
                .with_line_number(true)
                .init();
            None
        }
    }
}

fn main() -> Result<()> {
    // A missing .env file is normal in deployments
    let dotenv_path = dotenv::dotenv().ok();

    let _log_guard = init_logging();
    if let Some(path) = dotenv_path {
        info!("Loaded environment from {}", path.display());
    }

    let cli = Cli::parse();

    let config = AppConfig::load(cli.config.as_deref()).with_context(|| match &cli.config {
        Some(path) => format!("Failed to load config from {}", path.display()),
        None => "Failed to load configuration".to_string(),
    })?;

    match cli.command {
        Commands::Serve(args) => {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .context("Failed to start async runtime")?;
            runtime.block_on(handle_serve(config, args))
        }
        Commands::Predict(args) => {
            let output = handle_predict(&config, &args)?;
            println!("{}", output);
            Ok(())
        }
    }
}
