//! MedAlze: chest X-ray classification with AI-assisted report generation
//!
//! - [`runtime`]: image preprocessing, the CheXNet network and checkpoint loading
//! - [`report`]: prompt construction, the Gemini client and report extraction
//! - [`server`]: the axum HTTP service
//! - [`config`]: layered configuration

pub mod cli;
pub mod config;
pub mod constants;
pub mod error;
pub mod report;
pub mod runtime;
pub mod server;

pub use config::AppConfig;
pub use error::{Error, Result};
pub use report::{GeneratedReport, ReportComposer, ReportGenerator};
pub use runtime::{ChexNetClassifier, PredictionResult};
pub use server::{create_app, start_server, state::ServerState};
