// src/data/mod.rs

mod rollout;
mod synthetic;

pub use rollout::{group_advantages, RolloutBatch, RolloutSample};
pub use synthetic::{SyntheticRollouts, PAD_ID};
