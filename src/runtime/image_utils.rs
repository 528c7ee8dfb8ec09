//! Image loading and preprocessing for the chest X-ray classifier
//!
//! This module provides:
//! - Loading images from disk (PNG, JPEG, GIF)
//! - The resize → center crop → normalize pipeline the classifier was trained with
//! - Tensor statistics used for debug logging

use crate::constants::preprocessing::{
    CROP_SIZE, IMAGENET_MEAN, IMAGENET_STD, MAX_RESIZED_LONG_EDGE, RESIZE_SHORTER_EDGE,
};
use crate::error::{Error, Result};
use candle_core::{DType, Device, Tensor};
use image::imageops::{self, FilterType};
use image::{DynamicImage, RgbImage};
use std::path::Path;
use tracing::debug;

/// Image preprocessing configuration
#[derive(Debug, Clone)]
pub struct ImagePreprocessConfig {
    /// Target length of the shorter edge after the first resize
    pub resize_shorter: u32,
    /// Side of the square center crop
    pub crop_size: u32,
    /// Largest longer edge the first resize may produce
    pub max_long_edge: u32,
    /// Mean values for normalization [R, G, B]
    pub mean: [f32; 3],
    /// Std values for normalization [R, G, B]
    pub std: [f32; 3],
    /// Resampling filter for the resize step
    pub filter: FilterType,
}

impl Default for ImagePreprocessConfig {
    fn default() -> Self {
        Self::chexnet()
    }
}

impl ImagePreprocessConfig {
    /// Resize(256) → CenterCrop(224) → ImageNet normalization, bilinear resampling
    pub fn chexnet() -> Self {
        Self {
            resize_shorter: RESIZE_SHORTER_EDGE,
            crop_size: CROP_SIZE,
            max_long_edge: MAX_RESIZED_LONG_EDGE,
            mean: IMAGENET_MEAN,
            std: IMAGENET_STD,
            filter: FilterType::Triangle,
        }
    }
}

/// Load an image from disk and preprocess it for the classifier
///
/// # Returns
/// Tensor of shape [1, 3, crop, crop], dtype f32
pub fn preprocess_image(
    path: &Path,
    config: &ImagePreprocessConfig,
    device: &Device,
) -> Result<Tensor> {
    if !path.exists() {
        return Err(Error::FileNotFound(path.to_path_buf()));
    }

    let img = image::open(path)?;
    debug!(
        "Original image loaded from {}: {:?}, {}x{}",
        path.display(),
        img.color(),
        img.width(),
        img.height()
    );

    preprocess_dynamic_image(img, config, device)
}

/// Preprocess an already decoded image
pub fn preprocess_dynamic_image(
    img: DynamicImage,
    config: &ImagePreprocessConfig,
    device: &Device,
) -> Result<Tensor> {
    if img.width() == 0 || img.height() == 0 {
        return Err(Error::invalid_input("Image has no pixels"));
    }

    let (width, height) = resized_dimensions(img.width(), img.height(), config.resize_shorter)?;
    if width.max(height) > config.max_long_edge {
        return Err(Error::invalid_input(format!(
            "Image aspect ratio too extreme: {}x{} would resize to {}x{}",
            img.width(),
            img.height(),
            width,
            height
        )));
    }

    // Always 3 channels, whatever the source mode
    let img = img.to_rgb8();

    let img = imageops::resize(&img, width, height, config.filter);

    let img = center_crop(&img, config.crop_size);

    let tensor = to_chw_tensor(&img, device)?;
    let tensor = normalize_tensor(&tensor, &config.mean, &config.std)?;

    if tracing::enabled!(tracing::Level::DEBUG) {
        if let Ok(stats) = TensorStats::of(&tensor) {
            debug!(
                "Image normalized. Min: {:.4}, Max: {:.4}, Mean: {:.4}",
                stats.min, stats.max, stats.mean
            );
        }
    }

    // Add batch dimension [1, C, H, W]
    let tensor = tensor.unsqueeze(0)?.contiguous()?;
    debug!("Preprocessed tensor shape: {:?}", tensor.dims());
    Ok(tensor)
}

/// Output size of a shorter-edge resize, longer edge truncated
pub fn resized_dimensions(width: u32, height: u32, shorter: u32) -> Result<(u32, u32)> {
    if width == 0 || height == 0 {
        return Err(Error::invalid_input("Image has no pixels"));
    }
    let (short, long) = if width <= height {
        (width, height)
    } else {
        (height, width)
    };
    let scaled = u64::from(shorter) * u64::from(long) / u64::from(short);
    let scaled = u32::try_from(scaled).map_err(|_| {
        Error::invalid_input(format!("Image of {}x{} is too large to resize", width, height))
    })?;
    if width <= height {
        Ok((shorter, scaled))
    } else {
        Ok((scaled, shorter))
    }
}

/// Top-left offset of a centered crop, halves rounded to even
pub fn center_crop_offset(dim: u32, crop: u32) -> u32 {
    let excess = f64::from(dim.saturating_sub(crop));
    (excess / 2.0).round_ties_even() as u32
}

fn center_crop(img: &RgbImage, crop: u32) -> RgbImage {
    let left = center_crop_offset(img.width(), crop);
    let top = center_crop_offset(img.height(), crop);
    imageops::crop_imm(img, left, top, crop, crop).to_image()
}

/// [H, W, C] u8 pixels → [C, H, W] f32 in [0, 1]
fn to_chw_tensor(img: &RgbImage, device: &Device) -> Result<Tensor> {
    let (width, height) = img.dimensions();
    let data: Vec<f32> = img.as_raw().iter().map(|&x| f32::from(x) / 255.0).collect();

    let tensor = Tensor::from_vec(data, (height as usize, width as usize, 3), device)?;
    Ok(tensor.permute((2, 0, 1))?)
}

/// Normalize a [C, H, W] tensor using per-channel mean and std
///
/// Formula: (x - mean) / std
fn normalize_tensor(tensor: &Tensor, mean: &[f32; 3], std: &[f32; 3]) -> Result<Tensor> {
    let device = tensor.device();
    let mean = Tensor::new(mean, device)?.reshape((3, 1, 1))?;
    let std = Tensor::new(std, device)?.reshape((3, 1, 1))?;

    Ok(tensor.broadcast_sub(&mean)?.broadcast_div(&std)?)
}

/// Summary statistics of a tensor
#[derive(Debug, Clone, Copy)]
pub struct TensorStats {
    pub min: f32,
    pub max: f32,
    pub mean: f32,
}

impl TensorStats {
    pub fn of(tensor: &Tensor) -> Result<Self> {
        let flat = tensor.to_dtype(DType::F32)?.flatten_all()?;
        Ok(Self {
            min: flat.min(0)?.to_scalar::<f32>()?,
            max: flat.max(0)?.to_scalar::<f32>()?,
            mean: flat.mean(0)?.to_scalar::<f32>()?,
        })
    }
}
