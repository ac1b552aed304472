// src/model/attribution.rs
//! Attribution head: hidden state -> scalar logit per token.
//!
//! The head is a bias-free linear projection `d_model -> 1`. It produces raw
//! logits only; turning them into per-token weights is the job of
//! [`masked_softmax`](super::loss::masked_softmax), so the head stays a pure
//! per-position function.

use burn::{
    config::Config,
    module::Module,
    nn::{Initializer, Linear, LinearConfig},
    tensor::{backend::Backend, Tensor},
};

use super::state::{put_param, take_param, LoadReport, StateDict};
use crate::error::{self, AttributionError};

#[derive(Config, Debug)]
pub struct AttributionHeadConfig {
    /// Must equal the base model's hidden width.
    pub d_model: usize,

    #[config(default = "0.01")]
    pub init_std: f64,
}

impl AttributionHeadConfig {
    pub fn validate(&self) -> error::Result<()> {
        if self.d_model == 0 {
            return Err(AttributionError::ConfigError(
                "attribution head needs d_model > 0".to_string(),
            ));
        }
        if !self.init_std.is_finite() || self.init_std < 0.0 {
            return Err(AttributionError::ConfigError(format!(
                "init_std must be finite and >= 0, got {}",
                self.init_std
            )));
        }
        Ok(())
    }

    /// Weights ~ N(0, init_std), no bias: near-uniform attribution at step 0.
    pub fn init<B: Backend>(&self, device: &B::Device) -> AttributionHead<B> {
        let projection = LinearConfig::new(self.d_model, 1)
            .with_bias(false)
            .with_initializer(Initializer::Normal {
                mean: 0.0,
                std: self.init_std,
            })
            .init(device);

        AttributionHead {
            projection,
            d_model: self.d_model,
        }
    }
}

#[derive(Module, Debug)]
pub struct AttributionHead<B: Backend> {
    projection: Linear<B>,
    #[module(skip)]
    d_model: usize,
}

impl<B: Backend> AttributionHead<B> {
    /// `[batch, seq, d_model]` -> `[batch, seq]` raw logits.
    pub fn forward(&self, hidden_states: Tensor<B, 3>) -> Tensor<B, 2> {
        let [b, s, _] = hidden_states.dims();
        self.projection.forward(hidden_states).reshape([b, s])
    }

    /// Single hidden-state vector `[d_model]` -> logit `[1]`.
    pub fn score(&self, hidden_state: Tensor<B, 1>) -> Tensor<B, 1> {
        self.projection
            .forward(hidden_state.unsqueeze::<2>())
            .reshape([1])
    }

    pub fn d_model(&self) -> usize {
        self.d_model
    }

    /// Projection weight, `[d_model, 1]`.
    pub fn projection_weight(&self) -> Tensor<B, 2> {
        self.projection.weight.val()
    }

    pub fn state_dict(&self) -> error::Result<StateDict> {
        let mut state = StateDict::new();
        put_param(&mut state, "projection.weight", &self.projection.weight)?;
        Ok(state)
    }

    pub fn load_state_dict(self, state: &StateDict) -> error::Result<(Self, LoadReport)> {
        let mut remaining = state.clone();
        let mut report = LoadReport::default();
        let mut head = self;

        head.projection.weight = take_param(
            &mut remaining,
            "projection.weight",
            head.projection.weight,
            &mut report,
        )?;

        report.unexpected.extend(remaining.keys().cloned());
        Ok((head, report))
    }
}
