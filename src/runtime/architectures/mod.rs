//! Architecture-specific model implementations

pub mod densenet;

pub use densenet::{ChexNet, DenseNet, DenseNetConfig};
