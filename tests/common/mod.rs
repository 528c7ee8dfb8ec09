//! Common test utilities for the HTTP service

#![allow(dead_code)]

use async_trait::async_trait;
use axum::{body::Body, http::Response};
use candle_core::Device;
use candle_nn::VarMap;
use http_body_util::BodyExt;
use image::{DynamicImage, ImageBuffer, ImageFormat, Rgb};
use medalze_core::{
    config::AppConfig,
    constants::NUM_CONDITIONS,
    runtime::{architectures::DenseNetConfig, ChexNetClassifier},
    Error, ReportGenerator, Result, ServerState,
};
use serde_json::Value;
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

pub const BOUNDARY: &str = "medalze-test-boundary";

/// A small DenseNet with the real 14-way head
pub fn tiny_config() -> DenseNetConfig {
    DenseNetConfig {
        growth_rate: 4,
        block_config: vec![2, 2],
        num_init_features: 8,
        bn_size: 2,
        num_classes: NUM_CONDITIONS,
        bn_eps: 1e-5,
    }
}

pub fn tiny_classifier() -> Arc<ChexNetClassifier> {
    let varmap = VarMap::new();
    let classifier = ChexNetClassifier::from_varmap(&tiny_config(), &varmap, &Device::Cpu)
        .expect("test: build classifier");
    Arc::new(classifier)
}

/// Generator returning a canned reply or failing with a canned message
pub struct MockGenerator {
    reply: std::result::Result<String, String>,
}

impl MockGenerator {
    pub fn replying(reply: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            reply: Ok(reply.into()),
        })
    }

    pub fn failing(message: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            reply: Err(message.into()),
        })
    }
}

#[async_trait]
impl ReportGenerator for MockGenerator {
    fn model_name(&self) -> &str {
        "mock"
    }

    async fn generate(&self, _prompt: &str) -> Result<String> {
        self.reply.clone().map_err(Error::Generation)
    }
}

/// State with nothing loaded, uploading into `upload_dir`
pub fn bare_state(upload_dir: &Path) -> ServerState {
    let mut config = AppConfig::default();
    config.upload_dir = upload_dir.to_path_buf();
    ServerState::new(config)
}

pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = ImageBuffer::from_fn(width, height, |x, y| {
        Rgb([(x % 256) as u8, (y % 256) as u8, ((x * y) % 256) as u8])
    });
    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(img)
        .write_to(&mut out, ImageFormat::Png)
        .expect("test: encode png");
    out.into_inner()
}

/// A `multipart/form-data` body with a single file field
pub fn multipart_body(field: &str, filename: &str, contents: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
    body.extend_from_slice(
        format!(
            "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
            field, filename
        )
        .as_bytes(),
    );
    body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
    body.extend_from_slice(contents);
    body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());
    body
}

pub fn multipart_content_type() -> String {
    format!("multipart/form-data; boundary={}", BOUNDARY)
}

pub async fn body_json(response: Response<Body>) -> Value {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("test: read body")
        .to_bytes();
    serde_json::from_slice(&bytes).expect("test: body is JSON")
}

/// Number of entries left in a directory
pub fn file_count(dir: &Path) -> usize {
    std::fs::read_dir(dir).map(|d| d.count()).unwrap_or(0)
}
