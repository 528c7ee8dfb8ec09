//! Shared constants for the medalze application
//!
//! Centralizes the condition set, decision thresholds and preprocessing
//! statistics so the classifier, the HTTP layer and the CLI agree on them.

/// The 14 findings predicted by the classifier.
///
/// Order matters: index `i` of the model output vector is the probability of
/// `CONDITIONS[i]` (NIH ChestX-ray14 training order).
pub const CONDITIONS: [&str; NUM_CONDITIONS] = [
    "Atelectasis",
    "Cardiomegaly",
    "Effusion",
    "Infiltration",
    "Mass",
    "Nodule",
    "Pneumonia",
    "Pneumothorax",
    "Consolidation",
    "Edema",
    "Emphysema",
    "Fibrosis",
    "Pleural_Thickening",
    "Hernia",
];

/// Number of output classes of the classifier head
pub const NUM_CONDITIONS: usize = 14;

/// Highest probability below which a study is flagged as having no
/// significant finding (strict `<` comparison)
pub const NO_FINDING_THRESHOLD: f32 = 0.35;

/// Preprocessing parameters shared by training and inference
pub mod preprocessing {
    /// Length of the shorter edge after the first resize
    pub const RESIZE_SHORTER_EDGE: u32 = 256;

    /// Side of the square center crop fed to the network
    pub const CROP_SIZE: u32 = 224;

    /// Upper bound on the longer edge after the first resize; images with a
    /// more extreme aspect ratio (over 16:1) are rejected
    pub const MAX_RESIZED_LONG_EDGE: u32 = 4096;

    /// ImageNet channel means [R, G, B]
    pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];

    /// ImageNet channel standard deviations [R, G, B]
    pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];
}

/// Upload handling
pub mod uploads {
    /// Accepted image extensions (compared case-insensitively)
    pub const ALLOWED_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "gif"];

    /// Multipart field carrying the image
    pub const FILE_FIELD: &str = "file";

    /// Default request body limit for uploads (16 MiB)
    pub const DEFAULT_BODY_LIMIT_BYTES: usize = 16 * 1024 * 1024;
}

/// Returns true when `filename` has an extension in [`uploads::ALLOWED_EXTENSIONS`].
///
/// The extension is whatever follows the last `.`; names without a dot are rejected.
pub fn allowed_file(filename: &str) -> bool {
    file_extension(filename)
        .map(|ext| uploads::ALLOWED_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}

/// Lowercased extension after the last `.`, if any
pub fn file_extension(filename: &str) -> Option<String> {
    filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
}
