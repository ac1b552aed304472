// src/model/wrapper.rs
//! Base model + attribution head behind one forward/checkpoint surface.
//!
//! ```text
//! tokens ──► base model ──► log_probs ─────────────────────────► loss
//!                 │
//!                 └─► hidden (detached) ──► head ──► masked softmax ──► weights
//! ```
//!
//! Hidden states live in a [`HiddenStateBuffer`] for the duration of one
//! forward call. The buffer is consumed by the head and dropped before
//! `forward` returns; the returned [`BufferLease`] lets callers confirm that.

use burn::tensor::{backend::Backend, Bool, Int, Tensor};
use std::sync::{Arc, Weak};

use super::attribution::{AttributionHead, AttributionHeadConfig};
use super::config::AttributionConfig;
use super::diagnostics::AttributionDiagnostics;
use super::loss::masked_softmax;
use super::state::{partition_checkpoint, LoadReport, StateDict, HEAD_PREFIX, MODEL_PREFIX};
use super::traits::{BaseModel, BaseOutput};
use crate::error::{AttributionError, Result};

// ============================================================
// HIDDEN STATE BUFFER
// ============================================================

/// Exclusive owner of one forward pass's `[batch, seq, hidden]` states.
pub struct HiddenStateBuffer<B: Backend> {
    states: Arc<Tensor<B, 3>>,
}

/// Weak view of a buffer's states. Released once no strong handle to them
/// remains, inside or outside the buffer.
#[derive(Debug, Clone)]
pub struct BufferLease<B: Backend>(Weak<Tensor<B, 3>>);

impl<B: Backend> BufferLease<B> {
    pub fn is_released(&self) -> bool {
        self.0.strong_count() == 0
    }
}

impl<B: Backend> HiddenStateBuffer<B> {
    pub fn new(states: Tensor<B, 3>) -> Self {
        Self {
            states: Arc::new(states),
        }
    }

    pub fn lease(&self) -> BufferLease<B> {
        BufferLease(Arc::downgrade(&self.states))
    }

    pub fn dims(&self) -> [usize; 3] {
        self.states.dims()
    }

    /// Hands the shared states to `f`.
    ///
    /// The lease stays unreleased for as long as `f` (or whatever it returns)
    /// holds on to the handle. Unwrap it with [`Arc::unwrap_or_clone`] to move
    /// the tensor out and release the buffer in the same step.
    pub fn consume<R>(self, f: impl FnOnce(Arc<Tensor<B, 3>>) -> R) -> R {
        f(self.states)
    }
}

// ============================================================
// WRAPPER
// ============================================================

#[derive(Debug)]
pub struct AttributionOutput<B: Backend> {
    /// `[batch, seq]` from the base model, attached to its graph.
    pub log_probs: Tensor<B, 2>,
    /// `[batch, seq]`, rows sum to 1 over valid positions, attached to the head's graph.
    pub attribution_weights: Tensor<B, 2>,
    pub diagnostics: AttributionDiagnostics,
    pub hidden_lease: BufferLease<B>,
}

#[derive(Debug, Clone)]
pub struct AttributionWrapper<B: Backend, M: BaseModel<B>> {
    pub model: M,
    pub attribution_head: AttributionHead<B>,
}

impl<B: Backend, M: BaseModel<B>> AttributionWrapper<B, M> {
    /// Builds a fresh head sized to `model.hidden_size()`.
    pub fn new(model: M, config: &AttributionConfig, device: &B::Device) -> Result<Self> {
        config.validate()?;
        if !model.supports_hidden_states() {
            return Err(AttributionError::HiddenStatesUnsupported);
        }

        let head_config = AttributionHeadConfig::new(model.hidden_size()).with_init_std(config.init_std);
        head_config.validate()?;
        let attribution_head = head_config.init(device);

        tracing::debug!(
            d_model = model.hidden_size(),
            init_std = config.init_std,
            "attribution head initialized"
        );

        Ok(Self {
            model,
            attribution_head,
        })
    }

    /// Pairs `model` with an existing head.
    pub fn with_head(model: M, attribution_head: AttributionHead<B>) -> Result<Self> {
        if !model.supports_hidden_states() {
            return Err(AttributionError::HiddenStatesUnsupported);
        }
        if attribution_head.d_model() != model.hidden_size() {
            return Err(AttributionError::HiddenWidthMismatch {
                expected: attribution_head.d_model(),
                got: model.hidden_size(),
            });
        }
        Ok(Self {
            model,
            attribution_head,
        })
    }

    pub fn into_parts(self) -> (M, AttributionHead<B>) {
        (self.model, self.attribution_head)
    }

    pub fn forward(
        &self,
        input_ids: Tensor<B, 2, Int>,
        target_ids: Tensor<B, 2, Int>,
        loss_mask: Tensor<B, 2, Bool>,
    ) -> Result<AttributionOutput<B>> {
        let BaseOutput {
            log_probs,
            hidden_states,
        } = self.model.forward_policy(input_ids, target_ids, true);
        let hidden = hidden_states.ok_or(AttributionError::HiddenStatesUnsupported)?;

        // Head gradients only; the base model learns through log_probs.
        let buffer = HiddenStateBuffer::new(hidden.detach());
        let hidden_lease = buffer.lease();

        let [batch, seq] = log_probs.dims();
        let [mask_b, mask_s] = loss_mask.dims();
        if mask_b != batch {
            return Err(AttributionError::shape("loss_mask", 0, batch, mask_b));
        }
        if mask_s != seq {
            return Err(AttributionError::shape("loss_mask", 1, seq, mask_s));
        }

        let [hb, hs, hh] = buffer.dims();
        if hb != batch {
            return Err(AttributionError::shape("hidden_states", 0, batch, hb));
        }
        if hs != seq {
            return Err(AttributionError::shape("hidden_states", 1, seq, hs));
        }
        if hh != self.attribution_head.d_model() {
            return Err(AttributionError::HiddenWidthMismatch {
                expected: self.attribution_head.d_model(),
                got: hh,
            });
        }

        // Moving the tensor out drops the buffer's handle before the head runs
        let logits =
            buffer.consume(|states| self.attribution_head.forward(Arc::unwrap_or_clone(states)));
        let attribution_weights = masked_softmax(logits, loss_mask.clone());
        let diagnostics = AttributionDiagnostics::from_tensors(&attribution_weights, &loss_mask)?;

        Ok(AttributionOutput {
            log_probs,
            attribution_weights,
            diagnostics,
            hidden_lease,
        })
    }

    pub fn num_parameters(&self) -> usize {
        self.model.num_parameters() + self.attribution_head.d_model()
    }

    /// `model.*` ∪ `attribution_head.*`.
    pub fn state_dict(&self) -> Result<StateDict> {
        let mut state = self.model.state_dict()?.with_prefix(MODEL_PREFIX);
        state.merge(self.attribution_head.state_dict()?.with_prefix(HEAD_PREFIX));
        Ok(state)
    }

    /// Restores both partitions. Without an attribution partition the head
    /// keeps its current values; unexpected keys are logged and skipped.
    pub fn load_state_dict(self, state: &StateDict) -> Result<(Self, LoadReport)> {
        let (base_state, head_state) = partition_checkpoint(state);
        let Self {
            model,
            attribution_head,
        } = self;

        let (model, base_report) = model.load_state_dict(&base_state)?;
        let mut report = base_report.prefixed(MODEL_PREFIX);

        if head_state.is_empty() {
            tracing::info!("checkpoint has no attribution partition, keeping head initialization");
        }
        let (attribution_head, head_report) = attribution_head.load_state_dict(&head_state)?;
        report.extend(head_report.prefixed(HEAD_PREFIX));

        report.warn_unexpected();
        Ok((
            Self {
                model,
                attribution_head,
            },
            report,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::config::TinyLmConfig;
    use crate::model::tiny_lm::TinyLm;
    use burn::backend::ndarray::{NdArray, NdArrayDevice};

    type TB = NdArray;

    #[test]
    fn test_lease_tracks_consume() {
        let device = NdArrayDevice::Cpu;
        let buffer = HiddenStateBuffer::new(Tensor::<TB, 3>::zeros([1, 2, 3], &device));
        let lease = buffer.lease();
        assert!(!lease.is_released());

        let dims = buffer.consume(|states| {
            assert!(!lease.is_released());
            Arc::unwrap_or_clone(states).dims()
        });
        assert_eq!(dims, [1, 2, 3]);
        assert!(lease.is_released());
    }

    #[test]
    fn test_lease_sees_handle_kept_by_consumer() {
        let device = NdArrayDevice::Cpu;
        let buffer = HiddenStateBuffer::new(Tensor::<TB, 3>::zeros([2, 3, 4], &device));
        let lease = buffer.lease();

        let kept = buffer.consume(|states| states);
        assert!(!lease.is_released(), "states still held by the caller");
        assert_eq!(kept.dims(), [2, 3, 4]);

        drop(kept);
        assert!(lease.is_released());
    }

    #[test]
    fn test_rejects_model_without_hidden_states() {
        let device = NdArrayDevice::Cpu;
        let blind = TinyLm::<TB>::new(&TinyLmConfig::tiny().with_expose_hidden_states(false), &device);
        let err = AttributionWrapper::new(blind, &AttributionConfig::enabled(), &device).unwrap_err();
        assert!(matches!(err, AttributionError::HiddenStatesUnsupported));
    }

    #[test]
    fn test_with_head_checks_width() {
        let device = NdArrayDevice::Cpu;
        let model = TinyLm::<TB>::new(&TinyLmConfig::tiny(), &device);
        let head = AttributionHeadConfig::new(7).init::<TB>(&device);
        let err = AttributionWrapper::with_head(model, head).unwrap_err();
        assert!(matches!(err, AttributionError::HiddenWidthMismatch { expected: 7, got: 32 }));
    }

    #[test]
    fn test_state_dict_partitions() {
        let device = NdArrayDevice::Cpu;
        let model = TinyLm::<TB>::new(&TinyLmConfig::tiny(), &device);
        let wrapper = AttributionWrapper::new(model, &AttributionConfig::enabled(), &device).unwrap();
        let state = wrapper.state_dict().unwrap();

        assert!(state.contains_key("model.embedding.weight"));
        assert!(state.contains_key("attribution_head.projection.weight"));
        assert!(state.keys().all(|k| k.starts_with(MODEL_PREFIX) || k.starts_with(HEAD_PREFIX)));
        assert_eq!(state.num_parameters(), wrapper.num_parameters());
    }
}
