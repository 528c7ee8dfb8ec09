use clap::Args;
use std::path::PathBuf;

/// CLI arguments for the `predict` command
#[derive(Debug, Clone, Args)]
pub struct PredictArgs {
    /// Image to classify (png, jpg, jpeg or gif)
    pub image: PathBuf,

    /// Checkpoint to load instead of the configured one
    #[arg(long)]
    pub model: Option<PathBuf>,

    /// Fail on missing or unexpected checkpoint parameters
    #[arg(long)]
    pub strict: bool,
}
