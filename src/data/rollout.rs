// src/data/rollout.rs
//! Rollout samples and the padded tensor batch the trainer consumes

use burn::tensor::{backend::Backend, Bool, Int, Tensor, TensorData};

use crate::error::{AttributionError, Result};

/// One generated completion with its scalar feedback.
#[derive(Debug, Clone, PartialEq)]
pub struct RolloutSample {
    pub prompt: Vec<u32>,
    pub completion: Vec<u32>,
    pub reward: f32,
    pub advantage: f32,
}

impl RolloutSample {
    /// Prompt and completion back to back.
    pub fn tokens(&self) -> Vec<u32> {
        self.prompt.iter().chain(self.completion.iter()).copied().collect()
    }

    /// Length after the next-token shift.
    pub fn shifted_len(&self) -> usize {
        (self.prompt.len() + self.completion.len()).saturating_sub(1)
    }
}

/// Group-relative advantages: each reward minus its group mean, optionally
/// divided by the group's standard deviation (`+ 1e-8`).
pub fn group_advantages(rewards: &[f32], group_size: usize, scale: bool) -> Result<Vec<f32>> {
    if group_size == 0 || rewards.len() % group_size != 0 {
        return Err(AttributionError::InvalidBatch(format!(
            "{} rewards cannot be split into groups of {}",
            rewards.len(),
            group_size
        )));
    }

    let mut advantages = Vec::with_capacity(rewards.len());
    for group in rewards.chunks(group_size) {
        let n = group.len() as f32;
        let mean = group.iter().sum::<f32>() / n;
        let std = (group.iter().map(|r| (r - mean) * (r - mean)).sum::<f32>() / n).sqrt();

        advantages.extend(group.iter().map(|r| {
            let centered = r - mean;
            if scale {
                centered / (std + 1e-8)
            } else {
                centered
            }
        }));
    }
    Ok(advantages)
}

// ============================================================
// TENSOR BATCH
// ============================================================

#[derive(Debug, Clone)]
pub struct RolloutBatch<B: Backend> {
    /// `[batch, seq]`
    pub input_ids: Tensor<B, 2, Int>,
    /// `[batch, seq]`, next token of each input position
    pub target_ids: Tensor<B, 2, Int>,
    /// `[batch, seq]`, true where the target is a completion token
    pub loss_mask: Tensor<B, 2, Bool>,
    /// `[batch]`
    pub advantages: Tensor<B, 1>,
}

impl<B: Backend> RolloutBatch<B> {
    /// Pads, shifts and masks `samples` into one batch.
    ///
    /// Position `t` predicts token `t + 1`; it is valid when that token belongs
    /// to the completion. Padding uses `pad_id` and is never valid. A sample
    /// with an empty completion yields an all-invalid row.
    pub fn from_samples(samples: &[RolloutSample], pad_id: u32, device: &B::Device) -> Result<Self> {
        if samples.is_empty() {
            return Err(AttributionError::InvalidBatch("no samples".to_string()));
        }

        let seq_len = samples.iter().map(RolloutSample::shifted_len).max().unwrap_or(0);
        if seq_len == 0 {
            return Err(AttributionError::InvalidBatch(
                "every sample has fewer than 2 tokens".to_string(),
            ));
        }

        let batch = samples.len();
        let mut inputs = Vec::with_capacity(batch * seq_len);
        let mut targets = Vec::with_capacity(batch * seq_len);
        let mut mask = Vec::with_capacity(batch * seq_len);

        for sample in samples {
            let tokens = sample.tokens();
            let len = sample.shifted_len();
            for t in 0..seq_len {
                if t < len {
                    inputs.push(tokens[t] as i32);
                    targets.push(tokens[t + 1] as i32);
                    mask.push(if t + 1 >= sample.prompt.len() { 1.0f32 } else { 0.0 });
                } else {
                    inputs.push(pad_id as i32);
                    targets.push(pad_id as i32);
                    mask.push(0.0);
                }
            }
        }

        let advantages: Vec<f32> = samples.iter().map(|s| s.advantage).collect();

        Ok(Self {
            input_ids: Tensor::from_data(TensorData::new(inputs, [batch, seq_len]), device),
            target_ids: Tensor::from_data(TensorData::new(targets, [batch, seq_len]), device),
            loss_mask: Tensor::<B, 2>::from_data(TensorData::new(mask, [batch, seq_len]), device)
                .greater_elem(0.5),
            advantages: Tensor::from_data(TensorData::new(advantages, [batch]), device),
        })
    }

    pub fn dims(&self) -> [usize; 2] {
        self.input_ids.dims()
    }

    pub fn validate(&self) -> Result<()> {
        let [batch, seq] = self.input_ids.dims();
        for (name, dims) in [
            ("target_ids", self.target_ids.dims()),
            ("loss_mask", self.loss_mask.dims()),
        ] {
            if dims[0] != batch {
                return Err(AttributionError::shape(name, 0, batch, dims[0]));
            }
            if dims[1] != seq {
                return Err(AttributionError::shape(name, 1, seq, dims[1]));
            }
        }
        let [adv] = self.advantages.dims();
        if adv != batch {
            return Err(AttributionError::shape("advantages", 0, batch, adv));
        }
        Ok(())
    }

    pub fn num_valid_tokens(&self) -> Result<usize> {
        let counts = self.loss_mask.clone().int().sum().to_data().convert::<i64>().to_vec::<i64>()?;
        Ok(counts.first().copied().unwrap_or(0).max(0) as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::ndarray::{NdArray, NdArrayDevice};

    type TB = NdArray;

    fn sample(prompt: &[u32], completion: &[u32], advantage: f32) -> RolloutSample {
        RolloutSample {
            prompt: prompt.to_vec(),
            completion: completion.to_vec(),
            reward: 0.0,
            advantage,
        }
    }

    #[test]
    fn test_group_advantages_centered() {
        let adv = group_advantages(&[1.0, 0.0, 1.0, 0.0, 0.5, 0.5], 2, false).unwrap();
        assert_eq!(adv, vec![0.5, -0.5, 0.5, -0.5, 0.0, 0.0]);
    }

    #[test]
    fn test_group_advantages_scaled() {
        let adv = group_advantages(&[1.0, 0.0], 2, true).unwrap();
        assert!((adv[0] - 1.0).abs() < 1e-5);
        assert!((adv[1] + 1.0).abs() < 1e-5);

        // Identical rewards: no signal, no NaN
        let flat = group_advantages(&[0.3, 0.3, 0.3], 3, true).unwrap();
        assert!(flat.iter().all(|a| *a == 0.0));
    }

    #[test]
    fn test_group_advantages_rejects_ragged() {
        assert!(group_advantages(&[1.0, 2.0, 3.0], 2, false).is_err());
        assert!(group_advantages(&[1.0], 0, false).is_err());
    }

    #[test]
    fn test_from_samples_shift_and_mask() {
        let device = NdArrayDevice::Cpu;
        let batch = RolloutBatch::<TB>::from_samples(
            &[sample(&[1, 2], &[3, 4, 5], 1.0), sample(&[7, 8, 9], &[], -1.0)],
            0,
            &device,
        )
        .unwrap();

        assert_eq!(batch.dims(), [2, 4]);
        batch.validate().unwrap();

        let inputs = batch.input_ids.to_data().convert::<i64>().to_vec::<i64>().unwrap();
        let targets = batch.target_ids.to_data().convert::<i64>().to_vec::<i64>().unwrap();
        let mask = batch.loss_mask.clone().float().to_data().to_vec::<f32>().unwrap();

        assert_eq!(inputs, vec![1, 2, 3, 4, 7, 8, 0, 0]);
        assert_eq!(targets, vec![2, 3, 4, 5, 8, 9, 0, 0]);
        // Row 0: targets 3, 4, 5 are completion; row 1 has no completion
        assert_eq!(mask, vec![0.0, 1.0, 1.0, 1.0, 0.0, 0.0, 0.0, 0.0]);
        assert_eq!(batch.num_valid_tokens().unwrap(), 3);
    }

    #[test]
    fn test_from_samples_rejects_empty() {
        let device = NdArrayDevice::Cpu;
        assert!(RolloutBatch::<TB>::from_samples(&[], 0, &device).is_err());
        assert!(RolloutBatch::<TB>::from_samples(&[sample(&[1], &[], 0.0)], 0, &device).is_err());
    }
}
