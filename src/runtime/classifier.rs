//! Chest X-ray classifier: checkpoint loading and inference

use crate::constants::{CONDITIONS, NO_FINDING_THRESHOLD, NUM_CONDITIONS};
use crate::error::{Error, Result};
use crate::runtime::architectures::{ChexNet, DenseNetConfig};
use crate::runtime::checkpoint::{Checkpoint, KeySchema};
use candle_core::{DType, Device, Tensor};
use candle_nn::{Module, VarBuilder, VarMap};
use serde::ser::{SerializeMap, SerializeStruct};
use serde::{Serialize, Serializer};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info, warn};

/// Options controlling checkpoint loading
#[derive(Debug, Clone)]
pub struct LoadOptions {
    pub architecture: DenseNetConfig,
    /// Fail on missing or unexpected parameters instead of skipping them
    pub strict: bool,
    /// Key nesting the parameters inside a pickled checkpoint
    pub state_dict_key: Option<String>,
    pub device: Device,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            architecture: DenseNetConfig::default(),
            strict: false,
            state_dict_key: None,
            device: Device::Cpu,
        }
    }
}

impl LoadOptions {
    pub fn from_config(config: &crate::config::ModelConfig) -> Self {
        Self {
            strict: config.strict,
            state_dict_key: config.state_dict_key.clone(),
            ..Self::default()
        }
    }
}

/// What happened while applying a state dict
#[derive(Debug, Clone, Default)]
pub struct LoadReport {
    pub schema: Option<KeySchema>,
    pub loaded: usize,
    pub missing: Vec<String>,
    pub unexpected: Vec<String>,
}

/// A loaded CheXNet model, immutable after construction
#[derive(Debug)]
pub struct ChexNetClassifier {
    model: ChexNet,
    config: DenseNetConfig,
    device: Device,
}

impl ChexNetClassifier {
    /// Load a checkpoint from disk into a freshly built network
    pub fn load(path: &Path, options: &LoadOptions) -> Result<Self> {
        Self::load_with_report(path, options).map(|(classifier, _)| classifier)
    }

    /// Like [`load`](Self::load), also returning what was applied
    pub fn load_with_report(path: &Path, options: &LoadOptions) -> Result<(Self, LoadReport)> {
        info!("Loading model from {}", path.display());
        if !path.exists() {
            return Err(Error::FileNotFound(path.to_path_buf()));
        }

        let checkpoint = Checkpoint::read(path, options.state_dict_key.as_deref())?;
        let schema = checkpoint.schema();
        info!("Checkpoint key schema: {}", schema);

        let (classifier, mut report) =
            Self::from_state_dict(checkpoint.into_module_tensors(), options)?;
        report.schema = Some(schema);

        info!(
            "Model loaded: {} parameters set, {} missing, {} unexpected",
            report.loaded,
            report.missing.len(),
            report.unexpected.len()
        );
        Ok((classifier, report))
    }

    /// Build the network and copy module-named tensors into it
    pub fn from_state_dict(
        tensors: HashMap<String, Tensor>,
        options: &LoadOptions,
    ) -> Result<(Self, LoadReport)> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &options.device);
        let model = ChexNet::load(&options.architecture, vb)
            .map_err(|e| Error::model_load("ArchitectureError", e))?;

        let report = apply_state_dict(&varmap, tensors, options.strict)?;

        Ok((
            Self {
                model,
                config: options.architecture.clone(),
                device: options.device.clone(),
            },
            report,
        ))
    }

    /// Build a network whose parameters come from an existing `VarMap`
    pub fn from_varmap(config: &DenseNetConfig, varmap: &VarMap, device: &Device) -> Result<Self> {
        let vb = VarBuilder::from_varmap(varmap, DType::F32, device);
        let model =
            ChexNet::load(config, vb).map_err(|e| Error::model_load("ArchitectureError", e))?;
        Ok(Self {
            model,
            config: config.clone(),
            device: device.clone(),
        })
    }

    pub fn config(&self) -> &DenseNetConfig {
        &self.config
    }

    /// Run one forward pass over a preprocessed `[1, 3, H, W]` image
    pub fn predict(&self, input: &Tensor) -> Result<PredictionResult> {
        let dims = input.dims();
        if dims.len() != 4 || dims[0] != 1 || dims[1] != 3 {
            return Err(Error::invalid_input(format!(
                "expected an input of shape [1, 3, H, W], got {:?}",
                dims
            )));
        }

        let input = input.to_dtype(DType::F32)?.to_device(&self.device)?;
        let output = self.model.forward(&input)?;
        let probabilities: Vec<f32> = output.squeeze(0)?.to_vec1()?;
        debug!("Raw probabilities: {:?}", probabilities);

        PredictionResult::from_probabilities(probabilities)
    }
}

/// Classify an image with the loaded model, if there is one
pub fn predict_image(model: Option<&ChexNetClassifier>, input: &Tensor) -> Result<PredictionResult> {
    match model {
        Some(model) => model.predict(input),
        None => Err(Error::InvalidState("Model not loaded".to_string())),
    }
}

fn apply_state_dict(
    varmap: &VarMap,
    mut tensors: HashMap<String, Tensor>,
    strict: bool,
) -> Result<LoadReport> {
    tensors.retain(|key, _| !key.ends_with("num_batches_tracked"));

    let data = varmap
        .data()
        .lock()
        .map_err(|_| Error::Internal("parameter store lock poisoned".to_string()))?;

    let mut names: Vec<&String> = data.keys().collect();
    names.sort();

    let mut report = LoadReport::default();
    for name in names {
        let var = &data[name];
        let Some(tensor) = tensors.remove(name) else {
            report.missing.push(name.clone());
            continue;
        };

        if tensor.dims() != var.dims() {
            return Err(Error::model_load(
                "ShapeMismatch",
                format!(
                    "{}: checkpoint has {:?}, model expects {:?}",
                    name,
                    tensor.dims(),
                    var.dims()
                ),
            ));
        }

        let tensor = tensor
            .to_dtype(DType::F32)
            .and_then(|t| t.to_device(var.device()))
            .map_err(|e| Error::model_load("TensorConversion", e))?;
        var.set(&tensor)
            .map_err(|e| Error::model_load("TensorConversion", format!("{}: {}", name, e)))?;
        report.loaded += 1;
    }

    report.unexpected = tensors.into_keys().collect();
    report.unexpected.sort();

    if !report.missing.is_empty() {
        if strict {
            return Err(Error::model_load(
                "MissingKeys",
                report.missing.join(", "),
            ));
        }
        warn!(
            "{} parameters missing from checkpoint, keeping initial values: {:?}",
            report.missing.len(),
            report.missing
        );
    }
    if !report.unexpected.is_empty() {
        if strict {
            return Err(Error::model_load(
                "UnexpectedKeys",
                report.unexpected.join(", "),
            ));
        }
        warn!(
            "{} unexpected checkpoint entries skipped: {:?}",
            report.unexpected.len(),
            report.unexpected
        );
    }

    Ok(report)
}

/// True when no condition reaches the significance threshold
pub fn no_significant_finding(probabilities: &[f32]) -> bool {
    probabilities
        .iter()
        .copied()
        .fold(f32::NEG_INFINITY, f32::max)
        < NO_FINDING_THRESHOLD
}

/// Per-condition probabilities for one image
#[derive(Debug, Clone, PartialEq)]
pub struct PredictionResult {
    probabilities: Vec<f32>,
    no_significant_finding: bool,
}

impl PredictionResult {
    /// One probability per condition, in condition order
    pub fn from_probabilities(probabilities: Vec<f32>) -> Result<Self> {
        if probabilities.len() != NUM_CONDITIONS {
            return Err(Error::Internal(format!(
                "model produced {} outputs, expected {}",
                probabilities.len(),
                NUM_CONDITIONS
            )));
        }
        let no_significant_finding = no_significant_finding(&probabilities);
        Ok(Self {
            probabilities,
            no_significant_finding,
        })
    }

    pub fn probabilities(&self) -> &[f32] {
        &self.probabilities
    }

    pub fn no_significant_finding(&self) -> bool {
        self.no_significant_finding
    }

    /// `(condition, probability)` pairs in condition order
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, f32)> + '_ {
        CONDITIONS.iter().copied().zip(self.probabilities.iter().copied())
    }

    pub fn get(&self, condition: &str) -> Option<f32> {
        self.iter().find(|(name, _)| *name == condition).map(|(_, p)| p)
    }

    /// Most likely condition; the first one wins ties
    pub fn top(&self) -> (&'static str, f32) {
        self.iter().fold(("", f32::NEG_INFINITY), |best, cur| {
            if cur.1 > best.1 {
                cur
            } else {
                best
            }
        })
    }
}

/// Serializes as a JSON object whose keys follow the condition order
struct OrderedPredictions<'a>(&'a PredictionResult);

impl Serialize for OrderedPredictions<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(NUM_CONDITIONS))?;
        for (condition, probability) in self.0.iter() {
            map.serialize_entry(condition, &probability)?;
        }
        map.end()
    }
}

impl Serialize for PredictionResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("PredictionResult", 3)?;
        state.serialize_field("predictions", &OrderedPredictions(self))?;
        state.serialize_field("conditions_order", &CONDITIONS)?;
        state.serialize_field("no_significant_finding", &self.no_significant_finding)?;
        state.end()
    }
}
