//! Checkpoint reading and parameter-name schemas
//!
//! Checkpoints for the classifier come from several training setups and do
//! not agree on parameter names. Every checkpoint is classified into a
//! [`KeySchema`] and each schema has one explicit mapping onto the module
//! layout used by
//! [`ChexNet`](super::architectures::ChexNet) (`model.features.*`,
//! `model.classifier.0.*`).

use crate::error::{Error, Result};
use candle_core::{Device, Tensor};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

/// Namespace of the wrapped network in module parameter names
pub const MODULE_PREFIX: &str = "model.";

/// Prefix added by `torch.nn.DataParallel`
const DATA_PARALLEL_PREFIX: &str = "module.";

/// Attribute name used by early CheXNet reproductions for the backbone
const LEGACY_BACKBONE_PREFIX: &str = "densenet121.";

/// Key under which training scripts commonly nest the parameters
pub const DEFAULT_STATE_DICT_KEY: &str = "state_dict";

/// Naming convention of a checkpoint's parameter keys
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySchema {
    /// Early CheXNet reproductions: `densenet121.features.*`, with
    /// torchvision < 0.3 layer names (`norm.1`, `conv.2`)
    LegacyChexNet,
    /// A bare torchvision DenseNet: `features.*`, `classifier.*`
    Torchvision,
    /// Already nested under the wrapping module: `model.features.*`
    Wrapped,
}

impl KeySchema {
    /// Schema version, increasing with each naming convention we support
    pub fn version(&self) -> u32 {
        match self {
            KeySchema::LegacyChexNet => 0,
            KeySchema::Torchvision => 1,
            KeySchema::Wrapped => 2,
        }
    }

    /// Classify a checkpoint from its (DataParallel-stripped) keys
    pub fn detect<'a>(keys: impl IntoIterator<Item = &'a str>) -> Self {
        let mut schema = KeySchema::Torchvision;
        for key in keys {
            if key.starts_with(LEGACY_BACKBONE_PREFIX) {
                return KeySchema::LegacyChexNet;
            }
            if key.starts_with(MODULE_PREFIX) {
                schema = KeySchema::Wrapped;
            }
        }
        schema
    }

    /// Map a checkpoint key onto the module's parameter name
    pub fn to_module_key(&self, key: &str) -> String {
        let key = normalize_legacy_layer_names(strip_data_parallel(key));
        let mapped = match self {
            KeySchema::LegacyChexNet => match key.strip_prefix(LEGACY_BACKBONE_PREFIX) {
                Some(rest) => format!("{}{}", MODULE_PREFIX, rest),
                None => key,
            },
            KeySchema::Torchvision => {
                if key.starts_with("features.") || key.starts_with("classifier.") {
                    format!("{}{}", MODULE_PREFIX, key)
                } else {
                    key
                }
            }
            KeySchema::Wrapped => key,
        };
        sequential_head(mapped)
    }
}

impl std::fmt::Display for KeySchema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            KeySchema::LegacyChexNet => "legacy-chexnet",
            KeySchema::Torchvision => "torchvision",
            KeySchema::Wrapped => "wrapped",
        };
        write!(f, "{} (v{})", name, self.version())
    }
}

fn strip_data_parallel(key: &str) -> &str {
    key.strip_prefix(DATA_PARALLEL_PREFIX).unwrap_or(key)
}

/// `denselayer1.norm.1.weight` → `denselayer1.norm1.weight`
fn normalize_legacy_layer_names(key: &str) -> String {
    let mut out = key.to_string();
    for layer in ["norm", "relu", "conv"] {
        for index in ["1", "2"] {
            out = out.replace(
                &format!(".{}.{}.", layer, index),
                &format!(".{}{}.", layer, index),
            );
        }
    }
    out
}

/// A single linear head is loaded into the first slot of the sequential
/// classifier (`Linear → Sigmoid`)
fn sequential_head(key: String) -> String {
    let head = format!("{}classifier.", MODULE_PREFIX);
    match key.strip_prefix(&head) {
        Some("weight") | Some("bias") => format!("{}0.{}", head, &key[head.len()..]),
        _ => key,
    }
}

/// Parameters read from a checkpoint file, with their original names
#[derive(Debug)]
pub struct Checkpoint {
    tensors: Vec<(String, Tensor)>,
    schema: KeySchema,
}

impl Checkpoint {
    /// Read a checkpoint from disk
    ///
    /// `.safetensors` files are read directly; anything else is treated as a
    /// PyTorch pickle (`torch.save`), optionally nested under
    /// `state_dict_key`. When no key is given and the top level holds no
    /// tensors, the conventional `state_dict` key is tried.
    pub fn read(path: &Path, state_dict_key: Option<&str>) -> Result<Self> {
        if !path.exists() {
            return Err(Error::FileNotFound(path.to_path_buf()));
        }

        let is_safetensors = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case("safetensors"))
            .unwrap_or(false);

        let tensors = if is_safetensors {
            candle_core::safetensors::load(path, &Device::Cpu)
                .map_err(|e| Error::model_load("SafetensorsError", e))?
                .into_iter()
                .collect()
        } else {
            read_pickle(path, state_dict_key)?
        };

        if tensors.is_empty() {
            return Err(Error::model_load(
                "EmptyCheckpoint",
                format!("no tensors found in {}", path.display()),
            ));
        }

        info!("Read {} tensors from {}", tensors.len(), path.display());
        Ok(Self::from_tensors(tensors))
    }

    /// Wrap tensors that are already in memory
    pub fn from_tensors(mut tensors: Vec<(String, Tensor)>) -> Self {
        tensors.sort_by(|a, b| a.0.cmp(&b.0));
        let schema = KeySchema::detect(tensors.iter().map(|(k, _)| strip_data_parallel(k)));
        Self { tensors, schema }
    }

    pub fn schema(&self) -> KeySchema {
        self.schema
    }

    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    /// Consume the checkpoint, renaming every key to the module layout
    pub fn into_module_tensors(self) -> HashMap<String, Tensor> {
        let schema = self.schema;
        debug!("Remapping checkpoint keys with schema {}", schema);
        self.tensors
            .into_iter()
            .map(|(key, tensor)| (schema.to_module_key(&key), tensor))
            .collect()
    }
}

fn read_pickle(path: &Path, state_dict_key: Option<&str>) -> Result<Vec<(String, Tensor)>> {
    let read = |key: Option<&str>| {
        candle_core::pickle::read_all_with_key(path, key)
            .map_err(|e| Error::model_load("PickleError", e))
    };

    match state_dict_key {
        Some(key) => read(Some(key)),
        None => {
            let tensors = read(None)?;
            if tensors.is_empty() {
                debug!("No top-level tensors, trying '{}' key", DEFAULT_STATE_DICT_KEY);
                read(Some(DEFAULT_STATE_DICT_KEY))
            } else {
                Ok(tensors)
            }
        }
    }
}
