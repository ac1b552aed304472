// src/model/policy.rs
//! Trainable policies: plain GRPO or GRPO with attribution.
//!
//! The trainer is generic over [`Policy`], so whether attribution is on is
//! decided once by the type handed to it, never per step.

use burn::{
    grad_clipping::GradientClippingConfig,
    module::AutodiffModule,
    optim::{adaptor::OptimizerAdaptor, AdamW, AdamWConfig, GradientsParams, Optimizer},
    tensor::{backend::AutodiffBackend, Tensor},
};
use std::marker::PhantomData;

use super::attribution::AttributionHead;
use super::config::TrainingConfig;
use super::diagnostics::AttributionDiagnostics;
use super::loss::{AttributedAdvantage, LossCombiner, LossOutput, UniformAdvantage};
use super::state::{partition_checkpoint, LoadReport, StateDict, HEAD_PREFIX, MODEL_PREFIX};
use super::traits::BaseModel;
use super::wrapper::AttributionWrapper;
use crate::data::RolloutBatch;
use crate::error::Result;

type AdamWAdaptor<B, M> = OptimizerAdaptor<AdamW, M, B>;

/// Loss for one step plus what the loggers want to see.
pub struct StepLoss<B: AutodiffBackend> {
    pub loss: Tensor<B, 1>,
    pub diagnostics: Option<AttributionDiagnostics>,
    /// `[batch, seq]`, detached; only set when attribution is on.
    pub attribution_weights: Option<Tensor<B, 2>>,
}

pub trait Policy<B: AutodiffBackend>: Clone + Sized {
    type Optimizer;

    fn init_optimizer(&self, config: &TrainingConfig) -> Self::Optimizer;

    fn compute_loss(&self, batch: &RolloutBatch<B>) -> Result<StepLoss<B>>;

    /// One optimizer update for every parameter group.
    fn apply_gradients(self, optimizer: &mut Self::Optimizer, lr: f64, grads: B::Gradients) -> Self;

    /// Full training state in checkpoint layout.
    fn state_dict(&self) -> Result<StateDict>;

    fn load_state_dict(self, state: &StateDict) -> Result<(Self, LoadReport)>;

    /// Base-model weights only, unprefixed, for inference workers.
    fn rollout_state_dict(&self) -> Result<StateDict>;

    fn num_parameters(&self) -> usize;

    fn uses_attribution(&self) -> bool;
}

fn adamw_config(config: &TrainingConfig) -> AdamWConfig {
    let adamw = AdamWConfig::new().with_weight_decay(config.weight_decay as f32);
    if config.gradient_clip > 0.0 {
        adamw.with_grad_clipping(Some(GradientClippingConfig::Norm(config.gradient_clip as f32)))
    } else {
        adamw
    }
}

// ============================================================
// UNIFORM
// ============================================================

/// Standard GRPO over a bare base model.
#[derive(Debug, Clone)]
pub struct UniformPolicy<B: AutodiffBackend, M: BaseModel<B>> {
    pub model: M,
    _backend: PhantomData<B>,
}

impl<B: AutodiffBackend, M: BaseModel<B>> UniformPolicy<B, M> {
    pub fn new(model: M) -> Self {
        Self {
            model,
            _backend: PhantomData,
        }
    }

    pub fn into_model(self) -> M {
        self.model
    }
}

impl<B, M> Policy<B> for UniformPolicy<B, M>
where
    B: AutodiffBackend,
    M: BaseModel<B> + AutodiffModule<B>,
{
    type Optimizer = AdamWAdaptor<B, M>;

    fn init_optimizer(&self, config: &TrainingConfig) -> Self::Optimizer {
        adamw_config(config).init()
    }

    fn compute_loss(&self, batch: &RolloutBatch<B>) -> Result<StepLoss<B>> {
        let out = self
            .model
            .forward_policy(batch.input_ids.clone(), batch.target_ids.clone(), false);

        let LossOutput { loss, diagnostics } =
            UniformAdvantage.combine(out.log_probs, batch.loss_mask.clone(), batch.advantages.clone())?;

        Ok(StepLoss {
            loss,
            diagnostics,
            attribution_weights: None,
        })
    }

    fn apply_gradients(self, optimizer: &mut Self::Optimizer, lr: f64, grads: B::Gradients) -> Self {
        let grads = GradientsParams::from_grads(grads, &self.model);
        Self::new(optimizer.step(lr, self.model, grads))
    }

    fn state_dict(&self) -> Result<StateDict> {
        Ok(self.model.state_dict()?.with_prefix(MODEL_PREFIX))
    }

    /// The attribution partition, if any, is ignored with a warning.
    fn load_state_dict(self, state: &StateDict) -> Result<(Self, LoadReport)> {
        let (base_state, head_state) = partition_checkpoint(state);
        let (model, report) = self.model.load_state_dict(&base_state)?;

        let mut report = report.prefixed(MODEL_PREFIX);
        report
            .unexpected
            .extend(head_state.keys().map(|k| format!("{HEAD_PREFIX}{k}")));
        report.warn_unexpected();

        Ok((Self::new(model), report))
    }

    fn rollout_state_dict(&self) -> Result<StateDict> {
        self.model.state_dict()
    }

    fn num_parameters(&self) -> usize {
        self.model.num_parameters()
    }

    fn uses_attribution(&self) -> bool {
        false
    }
}

// ============================================================
// ATTRIBUTION
// ============================================================

/// Separate AdamW state for the base model and the head.
pub struct AttributionOptimizer<B: AutodiffBackend, M: AutodiffModule<B>> {
    base: AdamWAdaptor<B, M>,
    head: AdamWAdaptor<B, AttributionHead<B>>,
}

impl<B, M> Policy<B> for AttributionWrapper<B, M>
where
    B: AutodiffBackend,
    M: BaseModel<B> + AutodiffModule<B>,
{
    type Optimizer = AttributionOptimizer<B, M>;

    fn init_optimizer(&self, config: &TrainingConfig) -> Self::Optimizer {
        AttributionOptimizer {
            base: adamw_config(config).init(),
            head: adamw_config(config).init(),
        }
    }

    fn compute_loss(&self, batch: &RolloutBatch<B>) -> Result<StepLoss<B>> {
        let out = self.forward(
            batch.input_ids.clone(),
            batch.target_ids.clone(),
            batch.loss_mask.clone(),
        )?;
        debug_assert!(out.hidden_lease.is_released());

        // Diagnostics were already pulled to the host by `forward`
        let combiner =
            AttributedAdvantage::new(out.attribution_weights).with_diagnostics(out.diagnostics);
        let LossOutput { loss, diagnostics } =
            combiner.combine(out.log_probs, batch.loss_mask.clone(), batch.advantages.clone())?;

        Ok(StepLoss {
            loss,
            diagnostics,
            attribution_weights: Some(combiner.weights.detach()),
        })
    }

    fn apply_gradients(self, optimizer: &mut Self::Optimizer, lr: f64, mut grads: B::Gradients) -> Self {
        let base_grads = GradientsParams::from_module(&mut grads, &self.model);
        let head_grads = GradientsParams::from_module(&mut grads, &self.attribution_head);

        let (model, head) = self.into_parts();
        Self {
            model: optimizer.base.step(lr, model, base_grads),
            attribution_head: optimizer.head.step(lr, head, head_grads),
        }
    }

    fn state_dict(&self) -> Result<StateDict> {
        AttributionWrapper::state_dict(self)
    }

    fn load_state_dict(self, state: &StateDict) -> Result<(Self, LoadReport)> {
        AttributionWrapper::load_state_dict(self, state)
    }

    fn rollout_state_dict(&self) -> Result<StateDict> {
        self.model.state_dict()
    }

    fn num_parameters(&self) -> usize {
        AttributionWrapper::num_parameters(self)
    }

    fn uses_attribution(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::RolloutSample;
    use crate::model::config::{AttributionConfig, TinyLmConfig};
    use crate::model::tiny_lm::TinyLm;
    use burn::backend::ndarray::{NdArray, NdArrayDevice};
    use burn::backend::Autodiff;

    type TB = Autodiff<NdArray>;

    fn batch(device: &NdArrayDevice) -> RolloutBatch<TB> {
        let samples = vec![
            RolloutSample { prompt: vec![3, 4], completion: vec![5, 6, 7], reward: 1.0, advantage: 1.0 },
            RolloutSample { prompt: vec![3, 4], completion: vec![8, 9], reward: 0.0, advantage: -1.0 },
        ];
        RolloutBatch::from_samples(&samples, 0, device).unwrap()
    }

    #[test]
    fn test_uniform_policy_ignores_head_partition() {
        let device = NdArrayDevice::Cpu;
        let model = TinyLm::<TB>::new(&TinyLmConfig::tiny(), &device);
        let wrapper = AttributionWrapper::new(model.clone(), &AttributionConfig::enabled(), &device).unwrap();
        let state = Policy::state_dict(&wrapper).unwrap();

        let (_, report) = UniformPolicy::new(model).load_state_dict(&state).unwrap();
        assert!(report.missing.is_empty());
        assert_eq!(report.unexpected, vec!["attribution_head.projection.weight".to_string()]);
    }

    #[test]
    fn test_attribution_loss_reports_weights() {
        let device = NdArrayDevice::Cpu;
        let model = TinyLm::<TB>::new(&TinyLmConfig::tiny(), &device);
        let wrapper = AttributionWrapper::new(model, &AttributionConfig::enabled(), &device).unwrap();

        let batch = batch(&device);
        let step = wrapper.compute_loss(&batch).unwrap();
        let weights = step.attribution_weights.expect("weights when attribution is on");
        assert_eq!(weights.dims(), [2, 4]);
        assert_eq!(step.diagnostics.map(|d| d.valid_sequences), Some(2));

        // Same statistics as the forward pass reports
        let out = wrapper
            .forward(batch.input_ids.clone(), batch.target_ids.clone(), batch.loss_mask.clone())
            .unwrap();
        assert_eq!(step.diagnostics, Some(out.diagnostics));
        let loss: f32 = step.loss.into_scalar();
        assert!(loss.is_finite());
    }

    #[test]
    fn test_rollout_state_is_base_only() {
        let device = NdArrayDevice::Cpu;
        let model = TinyLm::<TB>::new(&TinyLmConfig::tiny(), &device);
        let wrapper = AttributionWrapper::new(model.clone(), &AttributionConfig::enabled(), &device).unwrap();

        let rollout = wrapper.rollout_state_dict().unwrap();
        assert_eq!(rollout, model.state_dict().unwrap());
        assert!(rollout.keys().all(|k| !k.starts_with(HEAD_PREFIX)));
    }
}
