use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AttributionError {
    // --- I/O ---
    #[error("Failed to read file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to write file {path}: {source}")]
    FileWrite {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),

    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    // --- Config ---
    #[error("Invalid config: {0}")]
    ConfigError(String),

    #[error("Base model cannot return hidden states, attribution requires them")]
    HiddenStatesUnsupported,

    #[error("Hidden width mismatch: attribution head expects {expected}, base model produces {got}")]
    HiddenWidthMismatch { expected: usize, got: usize },

    // --- Data ---
    #[error("Shape mismatch in `{tensor}` at dim {dim}: expected {expected}, got {got}")]
    ShapeMismatch {
        tensor: &'static str,
        dim: usize,
        expected: usize,
        got: usize,
    },

    #[error("Invalid rollout batch: {0}")]
    InvalidBatch(String),

    #[error("Tensor data conversion failed: {0}")]
    TensorData(String),

    // --- Numerics ---
    #[error("Loss diverged (NaN/Inf) at step {step}")]
    NonFiniteLoss { step: usize },

    // --- Checkpoint ---
    #[error("Checkpoint load failed: {0}")]
    CheckpointLoad(String),

    #[error("Checkpoint entry `{key}` has shape {got:?}, expected {expected:?}")]
    CheckpointShape {
        key: String,
        expected: Vec<usize>,
        got: Vec<usize>,
    },

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl AttributionError {
    /// Shorthand for the common "tensor X, dim D" validation failure.
    pub fn shape(tensor: &'static str, dim: usize, expected: usize, got: usize) -> Self {
        Self::ShapeMismatch {
            tensor,
            dim,
            expected,
            got,
        }
    }
}

impl From<burn::tensor::DataError> for AttributionError {
    fn from(err: burn::tensor::DataError) -> Self {
        Self::TensorData(format!("{:?}", err))
    }
}

impl From<bincode::Error> for AttributionError {
    fn from(err: bincode::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for AttributionError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AttributionError>;
