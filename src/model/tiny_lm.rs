// src/model/tiny_lm.rs
//! Reference base model: a small token-shift causal LM.
//!
//! Stands in for the production policy model in tests and the demo command.
//! It satisfies the full `BaseModel` contract, including the hidden-state
//! output the attribution wrapper depends on.

use burn::{
    module::Module,
    nn::{Embedding, EmbeddingConfig, Linear, LinearConfig},
    tensor::{activation, backend::Backend, Int, Tensor},
};

use super::config::TinyLmConfig;
use super::state::{put_param, take_param, LoadReport, StateDict};
use super::traits::{BaseModel, BaseOutput};
use crate::error::Result;

// ============================================================
// MODEL
// ============================================================

#[derive(Module, Debug)]
pub struct TinyLm<B: Backend> {
    embedding: Embedding<B>,
    blocks: Vec<MixerBlock<B>>,
    head: Linear<B>,
    #[module(skip)]
    vocab_size: usize,
    #[module(skip)]
    d_model: usize,
    #[module(skip)]
    layer_norm_eps: f64,
    #[module(skip)]
    expose_hidden_states: bool,
}

impl<B: Backend> TinyLm<B> {
    pub fn new(config: &TinyLmConfig, device: &B::Device) -> Self {
        let embedding = EmbeddingConfig::new(config.vocab_size, config.d_model).init(device);

        let blocks = (0..config.n_layers)
            .map(|_| MixerBlock::new(config.d_model, config.d_ffn, device))
            .collect();

        let head = LinearConfig::new(config.d_model, config.vocab_size)
            .with_bias(false)
            .init(device);

        Self {
            embedding,
            blocks,
            head,
            vocab_size: config.vocab_size,
            d_model: config.d_model,
            layer_norm_eps: config.layer_norm_eps,
            expose_hidden_states: config.expose_hidden_states,
        }
    }

    /// `[batch, seq]` tokens -> `([batch, seq, vocab]` logits, `[batch, seq, d_model]` hidden).
    pub fn forward_hidden(&self, input_ids: Tensor<B, 2, Int>) -> (Tensor<B, 3>, Tensor<B, 3>) {
        let mut x = self.embedding.forward(input_ids);

        for block in &self.blocks {
            x = block.forward(x, self.layer_norm_eps);
        }

        let hidden = layer_norm(x, self.layer_norm_eps);
        let logits = self.head.forward(hidden.clone());
        (logits, hidden)
    }

    /// Output projection weight, `[d_model, vocab]`.
    pub fn output_projection(&self) -> Tensor<B, 2> {
        self.head.weight.val()
    }

    pub fn vocab_size(&self) -> usize {
        self.vocab_size
    }

    pub fn d_model(&self) -> usize {
        self.d_model
    }
}

impl<B: Backend> BaseModel<B> for TinyLm<B> {
    fn forward_policy(
        &self,
        input_ids: Tensor<B, 2, Int>,
        target_ids: Tensor<B, 2, Int>,
        output_hidden_states: bool,
    ) -> BaseOutput<B> {
        let (logits, hidden) = self.forward_hidden(input_ids);

        // Gather: pega o log-prob do token realizado
        let log_probs = activation::log_softmax(logits, 2)
            .gather(2, target_ids.unsqueeze_dim::<3>(2))
            .squeeze::<2>(2);

        let hidden_states = (output_hidden_states && self.expose_hidden_states).then_some(hidden);

        BaseOutput {
            log_probs,
            hidden_states,
        }
    }

    fn hidden_size(&self) -> usize {
        self.d_model
    }

    fn supports_hidden_states(&self) -> bool {
        self.expose_hidden_states
    }

    fn num_parameters(&self) -> usize {
        self.num_params()
    }

    fn state_dict(&self) -> Result<StateDict> {
        let mut state = StateDict::new();
        put_param(&mut state, "embedding.weight", &self.embedding.weight)?;
        for (i, block) in self.blocks.iter().enumerate() {
            block.put_params(&mut state, &format!("blocks.{i}."))?;
        }
        put_param(&mut state, "head.weight", &self.head.weight)?;
        Ok(state)
    }

    fn load_state_dict(self, state: &StateDict) -> Result<(Self, LoadReport)> {
        let mut remaining = state.clone();
        let mut report = LoadReport::default();
        let mut model = self;

        model.embedding.weight =
            take_param(&mut remaining, "embedding.weight", model.embedding.weight, &mut report)?;

        model.blocks = model
            .blocks
            .into_iter()
            .enumerate()
            .map(|(i, block)| block.take_params(&mut remaining, &format!("blocks.{i}."), &mut report))
            .collect::<Result<Vec<_>>>()?;

        model.head.weight = take_param(&mut remaining, "head.weight", model.head.weight, &mut report)?;

        report.unexpected.extend(remaining.keys().cloned());
        Ok((model, report))
    }
}

// ============================================================
// MIXER BLOCK
// ============================================================

#[derive(Module, Debug)]
pub struct MixerBlock<B: Backend> {
    token_mix: Linear<B>,
    ffn_up: Linear<B>,
    ffn_down: Linear<B>,
}

impl<B: Backend> MixerBlock<B> {
    pub fn new(d_model: usize, d_ffn: usize, device: &B::Device) -> Self {
        Self {
            token_mix: LinearConfig::new(d_model, d_model).with_bias(false).init(device),
            ffn_up: LinearConfig::new(d_model, d_ffn).with_bias(false).init(device),
            ffn_down: LinearConfig::new(d_ffn, d_model).with_bias(false).init(device),
        }
    }

    pub fn forward(&self, x: Tensor<B, 3>, eps: f64) -> Tensor<B, 3> {
        let [b, t, c] = x.dims();

        // Mistura cada posição com a anterior
        let xn = layer_norm(x.clone(), eps);
        let mixed = (xn.clone() + token_shift(&xn, b, t, c)) * 0.5;
        let x = x + self.token_mix.forward(mixed);

        // Squared-ReLU FFN
        let k = activation::relu(self.ffn_up.forward(layer_norm(x.clone(), eps)));
        x + self.ffn_down.forward(k.clone() * k)
    }

    fn put_params(&self, state: &mut StateDict, prefix: &str) -> Result<()> {
        put_param(state, &format!("{prefix}token_mix.weight"), &self.token_mix.weight)?;
        put_param(state, &format!("{prefix}ffn_up.weight"), &self.ffn_up.weight)?;
        put_param(state, &format!("{prefix}ffn_down.weight"), &self.ffn_down.weight)?;
        Ok(())
    }

    fn take_params(
        mut self,
        state: &mut StateDict,
        prefix: &str,
        report: &mut LoadReport,
    ) -> Result<Self> {
        self.token_mix.weight =
            take_param(state, &format!("{prefix}token_mix.weight"), self.token_mix.weight, report)?;
        self.ffn_up.weight =
            take_param(state, &format!("{prefix}ffn_up.weight"), self.ffn_up.weight, report)?;
        self.ffn_down.weight =
            take_param(state, &format!("{prefix}ffn_down.weight"), self.ffn_down.weight, report)?;
        Ok(self)
    }
}

fn token_shift<B: Backend>(x: &Tensor<B, 3>, b: usize, t: usize, c: usize) -> Tensor<B, 3> {
    if t <= 1 {
        return Tensor::zeros([b, t, c], &x.device());
    }
    let zeros = Tensor::zeros([b, 1, c], &x.device());
    let shifted = x.clone().slice([0..b, 0..t - 1, 0..c]);
    Tensor::cat(vec![zeros, shifted], 1)
}

/// Layer norm sem parâmetros na última dimensão
fn layer_norm<B: Backend>(x: Tensor<B, 3>, eps: f64) -> Tensor<B, 3> {
    let mean = x.clone().mean_dim(2);
    let centered = x - mean;
    let var = (centered.clone() * centered.clone()).mean_dim(2);
    centered / (var + eps).sqrt()
}
