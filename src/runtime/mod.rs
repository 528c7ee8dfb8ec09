//! Inference runtime: image preprocessing, network definition, checkpoint
//! loading and the classifier built from them

pub mod architectures;
pub mod checkpoint;
pub mod classifier;
pub mod image_utils;

pub use checkpoint::{Checkpoint, KeySchema};
pub use classifier::{
    no_significant_finding, predict_image, ChexNetClassifier, LoadOptions, LoadReport,
    PredictionResult,
};
pub use image_utils::{preprocess_image, ImagePreprocessConfig};
