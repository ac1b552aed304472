//! Common test utilities and helpers
//!
//! Shared helpers for integration tests.
#![allow(dead_code)]

use burn::backend::ndarray::{NdArray, NdArrayDevice};
use burn::backend::Autodiff;
use burn::tensor::{backend::Backend, Bool, Tensor, TensorData};
use grpo_attribution::{RolloutBatch, RolloutSample, TinyLmConfig};

pub type TestBackend = NdArray;
pub type TestAutodiffBackend = Autodiff<NdArray>;

pub fn test_device() -> NdArrayDevice {
    NdArrayDevice::Cpu
}

/// Minimal reference model for fast tests
pub fn test_model_config() -> TinyLmConfig {
    TinyLmConfig::tiny()
}

/// `[rows, cols]` float tensor from nested rows
pub fn float_rows<B: Backend>(rows: &[&[f32]], device: &B::Device) -> Tensor<B, 2> {
    let cols = rows[0].len();
    let flat: Vec<f32> = rows.iter().flat_map(|r| r.iter().copied()).collect();
    Tensor::from_data(TensorData::new(flat, [rows.len(), cols]), device)
}

/// `[rows, cols]` bool mask from 0/1 rows
pub fn mask_rows<B: Backend>(rows: &[&[u8]], device: &B::Device) -> Tensor<B, 2, Bool> {
    let cols = rows[0].len();
    let flat: Vec<f32> = rows
        .iter()
        .flat_map(|r| r.iter().map(|&v| v as f32))
        .collect();
    Tensor::<B, 2>::from_data(TensorData::new(flat, [rows.len(), cols]), device).greater_elem(0.5)
}

pub fn to_vec<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> Vec<f32> {
    tensor.to_data().convert::<f32>().to_vec::<f32>().unwrap()
}

/// Two samples with different prompt/completion splits
pub fn small_batch<B: Backend>(device: &B::Device) -> RolloutBatch<B> {
    let samples = vec![
        RolloutSample {
            prompt: vec![3, 4, 5],
            completion: vec![6, 7, 8, 9],
            reward: 1.0,
            advantage: 1.0,
        },
        RolloutSample {
            prompt: vec![3, 4, 5],
            completion: vec![10, 11],
            reward: 0.0,
            advantage: -1.0,
        },
    ];
    RolloutBatch::from_samples(&samples, 0, device).unwrap()
}
