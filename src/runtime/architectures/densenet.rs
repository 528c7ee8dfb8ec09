//! DenseNet implementation with the CheXNet classification head
//!
//! Parameter names follow torchvision's `densenet121` layout
//! (`features.denseblock1.denselayer1.norm1.weight`, ...), nested under the
//! `model.` namespace with a sequential `classifier.0` linear layer followed
//! by a sigmoid.

use candle_core::{Result, Tensor, D};
use candle_nn::{
    batch_norm, conv2d_no_bias, linear, BatchNorm, Conv2d, Conv2dConfig, Linear, Module, VarBuilder,
};

/// DenseNet configuration
#[derive(Debug, Clone, PartialEq)]
pub struct DenseNetConfig {
    /// Channels added by every dense layer
    pub growth_rate: usize,
    /// Number of dense layers per block
    pub block_config: Vec<usize>,
    /// Channels produced by the stem convolution
    pub num_init_features: usize,
    /// Bottleneck width multiplier (bottleneck = bn_size * growth_rate)
    pub bn_size: usize,
    /// Output classes of the head
    pub num_classes: usize,
    /// BatchNorm epsilon
    pub bn_eps: f64,
}

impl DenseNetConfig {
    /// DenseNet-121 (growth 32, blocks 6/12/24/16)
    pub fn densenet121(num_classes: usize) -> Self {
        Self {
            growth_rate: 32,
            block_config: vec![6, 12, 24, 16],
            num_init_features: 64,
            bn_size: 4,
            num_classes,
            bn_eps: 1e-5,
        }
    }

    /// Channels entering the classifier
    pub fn num_features(&self) -> usize {
        let mut features = self.num_init_features;
        for (i, &layers) in self.block_config.iter().enumerate() {
            features += layers * self.growth_rate;
            if i + 1 != self.block_config.len() {
                features /= 2;
            }
        }
        features
    }
}

impl Default for DenseNetConfig {
    fn default() -> Self {
        Self::densenet121(crate::constants::NUM_CONDITIONS)
    }
}

fn conv(
    c_in: usize,
    c_out: usize,
    kernel: usize,
    stride: usize,
    padding: usize,
    vb: VarBuilder,
) -> Result<Conv2d> {
    let cfg = Conv2dConfig {
        stride,
        padding,
        ..Default::default()
    };
    conv2d_no_bias(c_in, c_out, kernel, cfg, vb)
}

#[derive(Debug)]
struct DenseLayer {
    norm1: BatchNorm,
    conv1: Conv2d,
    norm2: BatchNorm,
    conv2: Conv2d,
}

impl DenseLayer {
    fn load(c_in: usize, cfg: &DenseNetConfig, vb: VarBuilder) -> Result<Self> {
        let c_inter = cfg.bn_size * cfg.growth_rate;
        Ok(Self {
            norm1: batch_norm(c_in, cfg.bn_eps, vb.pp("norm1"))?,
            conv1: conv(c_in, c_inter, 1, 1, 0, vb.pp("conv1"))?,
            norm2: batch_norm(c_inter, cfg.bn_eps, vb.pp("norm2"))?,
            conv2: conv(c_inter, cfg.growth_rate, 3, 1, 1, vb.pp("conv2"))?,
        })
    }

    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let ys = xs
            .apply_t(&self.norm1, false)?
            .relu()?
            .apply(&self.conv1)?
            .apply_t(&self.norm2, false)?
            .relu()?
            .apply(&self.conv2)?;
        Tensor::cat(&[xs, &ys], 1)
    }
}

#[derive(Debug)]
struct Transition {
    norm: BatchNorm,
    conv: Conv2d,
}

impl Transition {
    fn load(c_in: usize, c_out: usize, eps: f64, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            norm: batch_norm(c_in, eps, vb.pp("norm"))?,
            conv: conv(c_in, c_out, 1, 1, 0, vb.pp("conv"))?,
        })
    }

    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        xs.apply_t(&self.norm, false)?
            .relu()?
            .apply(&self.conv)?
            .avg_pool2d(2)
    }
}

#[derive(Debug)]
struct DenseBlock {
    layers: Vec<DenseLayer>,
    transition: Option<Transition>,
}

impl DenseBlock {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let mut xs = xs.clone();
        for layer in &self.layers {
            xs = layer.forward(&xs)?;
        }
        match &self.transition {
            Some(transition) => transition.forward(&xs),
            None => Ok(xs),
        }
    }
}

/// DenseNet feature extractor plus a linear head (logits)
#[derive(Debug)]
pub struct DenseNet {
    conv0: Conv2d,
    norm0: BatchNorm,
    blocks: Vec<DenseBlock>,
    norm5: BatchNorm,
    classifier: Linear,
}

impl DenseNet {
    /// Build the network, fetching parameters from `vb`
    ///
    /// The head lives at `classifier.0` to match a sequential
    /// `Linear → Sigmoid` classifier.
    pub fn load(cfg: &DenseNetConfig, vb: VarBuilder) -> Result<Self> {
        let features = vb.pp("features");
        let conv0 = conv(3, cfg.num_init_features, 7, 2, 3, features.pp("conv0"))?;
        let norm0 = batch_norm(cfg.num_init_features, cfg.bn_eps, features.pp("norm0"))?;

        let mut channels = cfg.num_init_features;
        let mut blocks = Vec::with_capacity(cfg.block_config.len());
        for (i, &num_layers) in cfg.block_config.iter().enumerate() {
            let block_vb = features.pp(format!("denseblock{}", i + 1));
            let mut layers = Vec::with_capacity(num_layers);
            for j in 0..num_layers {
                let layer_vb = block_vb.pp(format!("denselayer{}", j + 1));
                layers.push(DenseLayer::load(channels + j * cfg.growth_rate, cfg, layer_vb)?);
            }
            channels += num_layers * cfg.growth_rate;

            let transition = if i + 1 != cfg.block_config.len() {
                let out = channels / 2;
                let t = Transition::load(
                    channels,
                    out,
                    cfg.bn_eps,
                    features.pp(format!("transition{}", i + 1)),
                )?;
                channels = out;
                Some(t)
            } else {
                None
            };
            blocks.push(DenseBlock { layers, transition });
        }

        let norm5 = batch_norm(channels, cfg.bn_eps, features.pp("norm5"))?;
        let classifier = linear(channels, cfg.num_classes, vb.pp("classifier").pp("0"))?;

        Ok(Self {
            conv0,
            norm0,
            blocks,
            norm5,
            classifier,
        })
    }
}

impl Module for DenseNet {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        // Stem; zero padding is equivalent to -inf padding after the ReLU
        let mut xs = xs
            .apply(&self.conv0)?
            .apply_t(&self.norm0, false)?
            .relu()?
            .pad_with_zeros(2, 1, 1)?
            .pad_with_zeros(3, 1, 1)?
            .max_pool2d_with_stride(3, 2)?;

        for block in &self.blocks {
            xs = block.forward(&xs)?;
        }

        // Global average pool over H, W → [N, C]
        xs.apply_t(&self.norm5, false)?
            .relu()?
            .mean(D::Minus1)?
            .mean(D::Minus1)?
            .apply(&self.classifier)
    }
}

/// CheXNet: a DenseNet whose parameters live under `model.`, with a sigmoid
/// applied to the head so the output is per-condition probabilities.
#[derive(Debug)]
pub struct ChexNet {
    model: DenseNet,
}

impl ChexNet {
    pub fn load(cfg: &DenseNetConfig, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            model: DenseNet::load(cfg, vb.pp("model"))?,
        })
    }
}

impl Module for ChexNet {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        candle_nn::ops::sigmoid(&self.model.forward(xs)?)
    }
}
