// src/model/state.rs
//! Named parameter snapshots used for checkpoints.
//!
//! A `StateDict` maps dotted parameter paths (`model.blocks.0.ffn_up.weight`,
//! `attribution_head.projection.weight`) to flat `f32` values plus their shape.
//! Values are copied out of the backend verbatim, so a save/load cycle through
//! [`StateDict::save_file`] reproduces every parameter bit for bit.

use burn::{
    module::Param,
    tensor::{backend::Backend, Tensor, TensorData},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use crate::error::{AttributionError, Result};

/// One stored parameter tensor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamEntry {
    pub shape: Vec<usize>,
    pub values: Vec<f32>,
}

impl ParamEntry {
    pub fn from_tensor<B: Backend, const D: usize>(tensor: &Tensor<B, D>) -> Result<Self> {
        let data = tensor.to_data().convert::<f32>();
        let shape = data.shape.clone();
        let values = data.to_vec::<f32>()?;
        Ok(Self { shape, values })
    }

    pub fn to_tensor<B: Backend, const D: usize>(
        &self,
        key: &str,
        device: &B::Device,
    ) -> Result<Tensor<B, D>> {
        let expected: usize = self.shape.iter().product();
        if self.shape.len() != D || expected != self.values.len() {
            return Err(AttributionError::CheckpointLoad(format!(
                "entry `{}` is malformed: rank {} shape {:?} with {} values (wanted rank {})",
                key,
                self.shape.len(),
                self.shape,
                self.values.len(),
                D
            )));
        }
        let data = TensorData::new(self.values.clone(), self.shape.clone());
        Ok(Tensor::from_data(data, device))
    }

    pub fn num_elements(&self) -> usize {
        self.values.len()
    }
}

/// Keys that were absent from, or not consumed out of, a loaded state dict.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub missing: Vec<String>,
    pub unexpected: Vec<String>,
}

impl LoadReport {
    pub fn is_clean(&self) -> bool {
        self.missing.is_empty() && self.unexpected.is_empty()
    }

    /// Re-roots the report under a partition prefix, e.g. `model.`.
    pub fn prefixed(self, prefix: &str) -> Self {
        Self {
            missing: self.missing.into_iter().map(|k| format!("{prefix}{k}")).collect(),
            unexpected: self.unexpected.into_iter().map(|k| format!("{prefix}{k}")).collect(),
        }
    }

    pub fn extend(&mut self, other: LoadReport) {
        self.missing.extend(other.missing);
        self.unexpected.extend(other.unexpected);
    }

    /// Emits one warning per ignored key.
    pub fn warn_unexpected(&self) {
        for key in &self.unexpected {
            tracing::warn!(key = %key, "ignoring unexpected checkpoint key");
        }
    }
}

/// Base-model partition of a combined checkpoint.
pub const MODEL_PREFIX: &str = "model.";
/// Attribution-head partition of a combined checkpoint.
pub const HEAD_PREFIX: &str = "attribution_head.";

/// Ordered map of parameter path to stored tensor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateDict {
    entries: BTreeMap<String, ParamEntry>,
}

impl StateDict {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, entry: ParamEntry) {
        self.entries.insert(key.into(), entry);
    }

    pub fn get(&self, key: &str) -> Option<&ParamEntry> {
        self.entries.get(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<ParamEntry> {
        self.entries.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.entries.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ParamEntry)> {
        self.entries.iter()
    }

    pub fn num_parameters(&self) -> usize {
        self.entries.values().map(ParamEntry::num_elements).sum()
    }

    /// Returns a copy with every key prefixed, e.g. `weight` -> `model.weight`.
    pub fn with_prefix(&self, prefix: &str) -> StateDict {
        let entries = self
            .entries
            .iter()
            .map(|(k, v)| (format!("{prefix}{k}"), v.clone()))
            .collect();
        StateDict { entries }
    }

    /// Splits off every entry under `prefix` (prefix stripped), leaving the rest.
    pub fn split_prefix(self, prefix: &str) -> (StateDict, StateDict) {
        let mut matched = BTreeMap::new();
        let mut rest = BTreeMap::new();
        for (key, entry) in self.entries {
            match key.strip_prefix(prefix) {
                Some(stripped) => {
                    matched.insert(stripped.to_string(), entry);
                }
                None => {
                    rest.insert(key, entry);
                }
            }
        }
        (StateDict { entries: matched }, StateDict { entries: rest })
    }

    /// Moves all entries of `other` into `self`, overwriting duplicates.
    pub fn merge(&mut self, other: StateDict) {
        self.entries.extend(other.entries);
    }

    pub fn save_file(&self, path: &Path) -> Result<()> {
        let file = File::create(path).map_err(|source| AttributionError::FileWrite {
            path: path.to_path_buf(),
            source,
        })?;
        bincode::serialize_into(BufWriter::new(file), self)?;
        Ok(())
    }

    pub fn load_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(AttributionError::FileNotFound(path.to_path_buf()));
        }
        let file = File::open(path).map_err(|source| AttributionError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;
        let state: StateDict = bincode::deserialize_from(BufReader::new(file))?;
        Ok(state)
    }
}

/// Splits a checkpoint into `(base, head)` partitions, prefixes stripped.
///
/// Keys outside both partitions are treated as base-model keys so a plain
/// base-model state dict loads as-is. A `model.`-prefixed key wins over an
/// unprefixed duplicate.
pub fn partition_checkpoint(state: &StateDict) -> (StateDict, StateDict) {
    let (head, rest) = state.clone().split_prefix(HEAD_PREFIX);
    let (prefixed, mut base) = rest.split_prefix(MODEL_PREFIX);
    base.merge(prefixed);
    (base, head)
}

// ============================================================
// PARAM HELPERS
// ============================================================

/// Copies a module parameter into `state` under `key`.
pub fn put_param<B: Backend, const D: usize>(
    state: &mut StateDict,
    key: &str,
    param: &Param<Tensor<B, D>>,
) -> Result<()> {
    state.insert(key, ParamEntry::from_tensor(&param.val())?);
    Ok(())
}

/// Replaces `param` with the stored value under `key`, keeping its `ParamId`
/// so optimizer state stays attached. A missing key keeps the current value
/// and is recorded in `report`; the consumed entry is removed from `state`.
pub fn take_param<B: Backend, const D: usize>(
    state: &mut StateDict,
    key: &str,
    param: Param<Tensor<B, D>>,
    report: &mut LoadReport,
) -> Result<Param<Tensor<B, D>>> {
    let Some(entry) = state.remove(key) else {
        report.missing.push(key.to_string());
        return Ok(param);
    };

    let current = param.val();
    let expected = current.dims().to_vec();
    if entry.shape != expected {
        return Err(AttributionError::CheckpointShape {
            key: key.to_string(),
            expected,
            got: entry.shape,
        });
    }

    let tensor = entry.to_tensor::<B, D>(key, &current.device())?;
    Ok(Param::initialized(param.id, tensor.require_grad()))
}
