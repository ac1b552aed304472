// src/data/synthetic.rs
//! Seeded toy rollout source for the demo loop and smoke tests.
//!
//! Each group shares one random prompt; completions are random tokens where a
//! per-sample fraction is replaced by `target_token`. The reward is the
//! fraction of completion tokens equal to `target_token`, so some positions
//! matter and some don't, which is what attribution is supposed to find.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use super::rollout::{group_advantages, RolloutSample};
use crate::error::{AttributionError, Result};

/// Token id reserved for padding.
pub const PAD_ID: u32 = 0;

#[derive(Debug, Clone)]
pub struct SyntheticRollouts {
    rng: ChaCha8Rng,
    vocab_size: usize,
    prompt_len: usize,
    completion_len: usize,
    group_size: usize,
    target_token: u32,
}

impl SyntheticRollouts {
    pub fn new(
        seed: u64,
        vocab_size: usize,
        prompt_len: usize,
        completion_len: usize,
        group_size: usize,
    ) -> Result<Self> {
        if vocab_size < 3 {
            return Err(AttributionError::ConfigError(format!(
                "synthetic rollouts need vocab_size >= 3, got {}",
                vocab_size
            )));
        }
        if prompt_len == 0 || completion_len == 0 || group_size == 0 {
            return Err(AttributionError::ConfigError(
                "prompt_len, completion_len and group_size must be > 0".to_string(),
            ));
        }

        Ok(Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
            vocab_size,
            prompt_len,
            completion_len,
            group_size,
            target_token: 1,
        })
    }

    pub fn with_target_token(mut self, token: u32) -> Self {
        self.target_token = token;
        self
    }

    pub fn target_token(&self) -> u32 {
        self.target_token
    }

    pub fn group_size(&self) -> usize {
        self.group_size
    }

    fn random_token(&mut self) -> u32 {
        // 0 is padding
        self.rng.gen_range(1..self.vocab_size as u32)
    }

    /// `n_groups × group_size` samples with group-relative advantages filled in.
    pub fn next_batch(&mut self, n_groups: usize) -> Result<Vec<RolloutSample>> {
        let mut samples = Vec::with_capacity(n_groups * self.group_size);

        for _ in 0..n_groups {
            let prompt: Vec<u32> = (0..self.prompt_len).map(|_| self.random_token()).collect();

            for _ in 0..self.group_size {
                let hit_rate: f64 = self.rng.gen_range(0.0..0.6);
                let completion: Vec<u32> = (0..self.completion_len)
                    .map(|_| {
                        if self.rng.gen_bool(hit_rate) {
                            self.target_token
                        } else {
                            self.random_token()
                        }
                    })
                    .collect();

                let hits = completion.iter().filter(|&&t| t == self.target_token).count();
                samples.push(RolloutSample {
                    prompt: prompt.clone(),
                    reward: hits as f32 / self.completion_len as f32,
                    completion,
                    advantage: 0.0,
                });
            }
        }

        let rewards: Vec<f32> = samples.iter().map(|s| s.reward).collect();
        let advantages = group_advantages(&rewards, self.group_size, true)?;
        for (sample, advantage) in samples.iter_mut().zip(advantages) {
            sample.advantage = advantage;
        }

        Ok(samples)
    }
}
