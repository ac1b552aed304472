//! GRPO with learned per-token advantage attribution.
//!
//! A small head over the policy model's hidden states learns how to spread
//! each sequence-level advantage across that sequence's tokens.

pub mod data;
pub mod error;
pub mod logger;
pub mod model;

pub use data::{group_advantages, RolloutBatch, RolloutSample, SyntheticRollouts, PAD_ID};
pub use error::{AttributionError, Result};
pub use logger::{
    read_attribution_log, AttributionLogWriter, AttributionRecord, MemorySink, MetricsCsv,
    MetricsSink, TokenAttribution, TrainLogger,
};
pub use model::{
    grpo_loss, grpo_loss_with_attribution, masked_softmax, partition_checkpoint, AttributionConfig,
    AttributionDiagnostics, AttributionHead, AttributionHeadConfig, AttributionOutput,
    AttributionWrapper, BaseModel, BaseOutput, GrpoTrainer, LoadReport, Policy, StateDict,
    TinyLm, TinyLmConfig, TrainStats, TrainingConfig, UniformPolicy, HEAD_PREFIX, MODEL_PREFIX,
};
