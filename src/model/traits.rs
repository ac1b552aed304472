//! BaseModel trait: the contract a policy language model must meet
//!
//! The attribution machinery never looks inside the model. It only needs
//! per-token log-probabilities, optionally the last hidden states, and a
//! state dict it can extend with its own partition.

use burn::{
    module::Module,
    tensor::{backend::Backend, Int, Tensor},
};

use super::state::{LoadReport, StateDict};
use crate::error::Result;

/// Output of one base-model forward pass.
#[derive(Debug)]
pub struct BaseOutput<B: Backend> {
    /// `[batch, seq]` log-probability of each target token.
    pub log_probs: Tensor<B, 2>,
    /// `[batch, seq, hidden]` final hidden states, when requested and supported.
    pub hidden_states: Option<Tensor<B, 3>>,
}

/// Trait every base policy model must implement.
///
/// Bounds: `Module<B>` (optimizer, valid()), `Clone`, `Send`, `Sized`.
pub trait BaseModel<B: Backend>: Module<B> + Clone + Send + Sized + 'static {
    /// Forward pass over `[batch, seq]` inputs, scoring `[batch, seq]` targets.
    fn forward_policy(
        &self,
        input_ids: Tensor<B, 2, Int>,
        target_ids: Tensor<B, 2, Int>,
        output_hidden_states: bool,
    ) -> BaseOutput<B>;

    /// Width of the hidden states returned by `forward_policy`.
    fn hidden_size(&self) -> usize;

    /// Whether `forward_policy` can return hidden states at all.
    fn supports_hidden_states(&self) -> bool;

    /// Number of trainable parameters.
    fn num_parameters(&self) -> usize;

    /// Snapshot of every parameter under the model's own (unprefixed) names.
    fn state_dict(&self) -> Result<StateDict>;

    /// Restores parameters from `state`. Keys the model does not know are
    /// reported as unexpected, absent keys as missing; neither is an error.
    fn load_state_dict(self, state: &StateDict) -> Result<(Self, LoadReport)>;
}
