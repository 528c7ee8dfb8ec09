pub mod predict;
pub mod server;

pub use predict::PredictArgs;
pub use server::ServeArgs;

use clap::Subcommand;

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP API server
    Serve(ServeArgs),

    /// Classify a single chest X-ray and print the result as JSON
    Predict(PredictArgs),
}
