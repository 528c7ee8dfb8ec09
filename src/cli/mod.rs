//! Command-line interface module.
//!
//! This module provides the CLI functionality for:
//! - Running the HTTP server
//! - One-off classification of a local image

pub mod commands;
pub mod handlers;

pub use handlers::{handle_predict, handle_serve};
