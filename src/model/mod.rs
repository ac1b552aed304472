mod attribution;
mod config;
mod diagnostics;
mod loss;
mod policy;
mod state;
mod tiny_lm;
mod traits;
mod trainer;
mod wrapper;

pub use attribution::{AttributionHead, AttributionHeadConfig};
pub use config::{AttributionConfig, TinyLmConfig, TrainingConfig};
pub use diagnostics::AttributionDiagnostics;
pub use loss::{
    attributed_token_advantages, grpo_loss, grpo_loss_with_attribution, masked_softmax,
    policy_gradient_loss, uniform_token_advantages, valid_token_counts, validate_loss_inputs,
    AttributedAdvantage, LossCombiner, LossOutput, UniformAdvantage,
};
pub use policy::{AttributionOptimizer, Policy, StepLoss, UniformPolicy};
pub use state::{
    partition_checkpoint, put_param, take_param, LoadReport, ParamEntry, StateDict, HEAD_PREFIX,
    MODEL_PREFIX,
};
pub use tiny_lm::{MixerBlock, TinyLm};
pub use traits::{BaseModel, BaseOutput};
pub use trainer::{GrpoTrainer, TrainStats};
pub use wrapper::{AttributionOutput, AttributionWrapper, BufferLease, HiddenStateBuffer};
