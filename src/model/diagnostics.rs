// src/model/diagnostics.rs
//! Attribution statistics handed to the metrics sink once per step

use burn::tensor::{backend::Backend, Bool, Tensor};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::Result;

/// Batch-averaged statistics of the attribution distribution.
///
/// Every statistic is computed per sequence over valid positions only, then
/// averaged over the sequences that have at least one valid token.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AttributionDiagnostics {
    pub entropy: f32,
    pub max_weight: f32,
    pub min_weight: f32,
    pub std_weight: f32,
    pub valid_sequences: usize,
}

impl std::fmt::Display for AttributionDiagnostics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "H: {:.3} | max: {:.4} | min: {:.4} | std: {:.4} | seqs: {}",
            self.entropy, self.max_weight, self.min_weight, self.std_weight, self.valid_sequences
        )
    }
}

impl AttributionDiagnostics {
    pub const PREFIX: &'static str = "attribution/";

    /// Computes statistics from host-side row-major `[batch, seq]` buffers.
    pub fn from_rows(weights: &[f32], mask: &[bool], seq_len: usize) -> Self {
        if seq_len == 0 {
            return Self::default();
        }

        let mut sums = [0.0f64; 4];
        let mut contributing = 0usize;

        for (row_w, row_m) in weights.chunks(seq_len).zip(mask.chunks(seq_len)) {
            let valid: Vec<f64> = row_w
                .iter()
                .zip(row_m)
                .filter(|(_, &m)| m)
                .map(|(&w, _)| w as f64)
                .collect();

            if valid.is_empty() {
                continue;
            }
            let n = valid.len() as f64;

            let entropy: f64 = valid
                .iter()
                .filter(|&&w| w > 0.0)
                .map(|&w| -w * w.ln())
                .sum();
            let max = valid.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
            let min = valid.iter().cloned().fold(f64::INFINITY, f64::min);
            let mean = valid.iter().sum::<f64>() / n;
            let var = valid.iter().map(|w| (w - mean) * (w - mean)).sum::<f64>() / n;

            sums[0] += entropy;
            sums[1] += max;
            sums[2] += min;
            sums[3] += var.sqrt();
            contributing += 1;
        }

        if contributing == 0 {
            return Self::default();
        }

        let n = contributing as f64;
        Self {
            entropy: (sums[0] / n) as f32,
            max_weight: (sums[1] / n) as f32,
            min_weight: (sums[2] / n) as f32,
            std_weight: (sums[3] / n) as f32,
            valid_sequences: contributing,
        }
    }

    /// Pulls `[batch, seq]` weights and mask to the host; does not touch the graph.
    pub fn from_tensors<B: Backend>(
        weights: &Tensor<B, 2>,
        loss_mask: &Tensor<B, 2, Bool>,
    ) -> Result<Self> {
        let [_, seq_len] = weights.dims();
        let w = weights.clone().detach().to_data().convert::<f32>().to_vec::<f32>()?;
        let m: Vec<bool> = loss_mask
            .clone()
            .float()
            .to_data()
            .convert::<f32>()
            .to_vec::<f32>()?
            .into_iter()
            .map(|v| v > 0.5)
            .collect();
        Ok(Self::from_rows(&w, &m, seq_len))
    }

    /// Namespaced scalars for a [`MetricsSink`](crate::logger::MetricsSink).
    pub fn scalars(&self) -> BTreeMap<String, f64> {
        let p = Self::PREFIX;
        BTreeMap::from([
            (format!("{p}entropy"), self.entropy as f64),
            (format!("{p}max_weight"), self.max_weight as f64),
            (format!("{p}min_weight"), self.min_weight as f64),
            (format!("{p}std_weight"), self.std_weight as f64),
            (format!("{p}valid_sequences"), self.valid_sequences as f64),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniform_rows() {
        // Two rows: 4 valid uniform, 2 valid uniform
        let weights = [0.25, 0.25, 0.25, 0.25, 0.5, 0.5, 0.0, 0.0];
        let mask = [true, true, true, true, true, true, false, false];
        let d = AttributionDiagnostics::from_rows(&weights, &mask, 4);

        let expected_h = ((4.0f64).ln() + (2.0f64).ln()) / 2.0;
        assert!((d.entropy as f64 - expected_h).abs() < 1e-6);
        assert!((d.max_weight - 0.375).abs() < 1e-6);
        assert!((d.min_weight - 0.375).abs() < 1e-6);
        assert!(d.std_weight.abs() < 1e-7);
        assert_eq!(d.valid_sequences, 2);
    }

    #[test]
    fn test_empty_rows_are_skipped() {
        let weights = [1.0, 0.0, 0.0, 0.0];
        let mask = [true, false, false, false];
        let d = AttributionDiagnostics::from_rows(&[weights, [0.0; 4]].concat(), &[mask, [false; 4]].concat(), 4);

        assert_eq!(d.valid_sequences, 1);
        assert_eq!(d.entropy, 0.0);
        assert_eq!(d.max_weight, 1.0);
        assert_eq!(d.min_weight, 1.0);
    }

    #[test]
    fn test_all_empty_is_default() {
        let d = AttributionDiagnostics::from_rows(&[0.0; 6], &[false; 6], 3);
        assert_eq!(d, AttributionDiagnostics::default());
        assert!(d.scalars().values().all(|v| v.is_finite()));
    }

    #[test]
    fn test_scalar_keys_are_namespaced() {
        let keys: Vec<String> = AttributionDiagnostics::default().scalars().into_keys().collect();
        assert_eq!(keys.len(), 5);
        assert!(keys.iter().all(|k| k.starts_with("attribution/")));
        assert!(keys.contains(&"attribution/entropy".to_string()));
    }
}
