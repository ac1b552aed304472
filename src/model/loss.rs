// src/model/loss.rs
//! GRPO policy-gradient loss with optional learned per-token attribution.
//!
//! Two ways of spreading a sequence advantage `A` over its valid tokens:
//!
//! ```text
//! uniform:     eff[t] = A
//! attributed:  eff[t] = A · w[t] · n_valid        (Σ_t w[t] = 1)
//! ```
//!
//! The attributed form is sum-preserving: `Σ_t eff[t] = A · n_valid` in both
//! cases, so with near-uniform weights the two losses coincide. The loss is
//!
//! ```text
//! L = −Σ_{i,t valid} eff[i,t] · logp[i,t] / max(1, Σ_i n_valid[i])
//! ```
//!
//! Ratio clipping and KL penalties belong to the surrounding GRPO algorithm
//! and are not computed here.

use burn::tensor::{backend::Backend, Bool, Tensor};

use super::diagnostics::AttributionDiagnostics;
use crate::error::{AttributionError, Result};

// ============================================================
// VALIDATION
// ============================================================

fn check_dims<const D: usize>(
    tensor: &'static str,
    got: [usize; D],
    expected: [usize; D],
) -> Result<()> {
    for (dim, (g, e)) in got.iter().zip(expected.iter()).enumerate() {
        if g != e {
            return Err(AttributionError::shape(tensor, dim, *e, *g));
        }
    }
    Ok(())
}

/// Checks every loss input against the `[batch, seq]` shape of `log_probs`.
pub fn validate_loss_inputs<B: Backend>(
    log_probs: &Tensor<B, 2>,
    loss_mask: &Tensor<B, 2, Bool>,
    advantages: &Tensor<B, 1>,
    attribution_weights: Option<&Tensor<B, 2>>,
) -> Result<()> {
    let [batch, seq] = log_probs.dims();
    check_dims("loss_mask", loss_mask.dims(), [batch, seq])?;
    check_dims("advantages", advantages.dims(), [batch])?;
    if let Some(weights) = attribution_weights {
        check_dims("attribution_weights", weights.dims(), [batch, seq])?;
    }
    Ok(())
}

// ============================================================
// NORMALIZATION
// ============================================================

/// Softmax over the valid positions of each row.
///
/// Invalid positions get exactly zero weight and never enter the denominator.
/// A row without valid positions comes out all zeros with zero gradient.
/// With a single valid position that position gets exactly `1.0`.
pub fn masked_softmax<B: Backend>(logits: Tensor<B, 2>, loss_mask: Tensor<B, 2, Bool>) -> Tensor<B, 2> {
    let invalid = loss_mask.clone().bool_not();
    let empty_rows = loss_mask.int().sum_dim(1).equal_elem(0);

    // Shift by the max over valid positions; a constant per row, so detached.
    let row_max = logits
        .clone()
        .mask_fill(invalid.clone(), f32::NEG_INFINITY)
        .max_dim(1)
        .mask_fill(empty_rows.clone(), 0.0)
        .detach();

    let exps = (logits - row_max).mask_fill(invalid, f32::NEG_INFINITY).exp();

    // Empty rows: 0 / 1 instead of 0 / 0
    let denom = exps.clone().sum_dim(1).mask_fill(empty_rows, 1.0);
    exps / denom
}

/// `[batch, 1]` number of valid tokens per row.
pub fn valid_token_counts<B: Backend>(loss_mask: Tensor<B, 2, Bool>) -> Tensor<B, 2> {
    loss_mask.float().sum_dim(1)
}

// ============================================================
// TOKEN ADVANTAGES
// ============================================================

/// Baseline GRPO: every valid token carries the sequence advantage.
pub fn uniform_token_advantages<B: Backend>(
    advantages: Tensor<B, 1>,
    loss_mask: Tensor<B, 2, Bool>,
) -> Tensor<B, 2> {
    let [batch, seq] = loss_mask.dims();
    let ones = Tensor::<B, 2>::ones([batch, seq], &advantages.device());
    (ones * advantages.unsqueeze_dim::<2>(1)).mask_fill(loss_mask.bool_not(), 0.0)
}

/// Sum-preserving redistribution: `A · w[t] · n_valid`.
pub fn attributed_token_advantages<B: Backend>(
    advantages: Tensor<B, 1>,
    attribution_weights: Tensor<B, 2>,
    loss_mask: Tensor<B, 2, Bool>,
) -> Tensor<B, 2> {
    let counts = valid_token_counts(loss_mask.clone());
    let budget = advantages.unsqueeze_dim::<2>(1) * counts;
    (attribution_weights * budget).mask_fill(loss_mask.bool_not(), 0.0)
}

// ============================================================
// LOSS
// ============================================================

/// Token-mean policy-gradient loss over valid positions.
///
/// Both factors are masked before multiplying so `-inf` log-probs on padding
/// cannot turn into NaN in the forward or the backward pass.
pub fn policy_gradient_loss<B: Backend>(
    log_probs: Tensor<B, 2>,
    token_advantages: Tensor<B, 2>,
    loss_mask: Tensor<B, 2, Bool>,
) -> Tensor<B, 1> {
    let invalid = loss_mask.clone().bool_not();
    let total_valid = loss_mask.float().sum().clamp_min(1.0);

    let log_probs = log_probs.mask_fill(invalid.clone(), 0.0);
    let token_advantages = token_advantages.mask_fill(invalid, 0.0);

    (token_advantages * log_probs).sum().neg() / total_valid
}

/// Uniform-advantage GRPO loss.
pub fn grpo_loss<B: Backend>(
    log_probs: Tensor<B, 2>,
    loss_mask: Tensor<B, 2, Bool>,
    advantages: Tensor<B, 1>,
) -> Result<Tensor<B, 1>> {
    validate_loss_inputs(&log_probs, &loss_mask, &advantages, None)?;
    let token_advantages = uniform_token_advantages(advantages, loss_mask.clone());
    Ok(policy_gradient_loss(log_probs, token_advantages, loss_mask))
}

/// GRPO loss with attribution weights replacing the uniform per-token advantage.
///
/// Gradients reach the base model through `log_probs` and the attribution head
/// through `attribution_weights`.
pub fn grpo_loss_with_attribution<B: Backend>(
    log_probs: Tensor<B, 2>,
    loss_mask: Tensor<B, 2, Bool>,
    advantages: Tensor<B, 1>,
    attribution_weights: Tensor<B, 2>,
) -> Result<(Tensor<B, 1>, AttributionDiagnostics)> {
    validate_loss_inputs(&log_probs, &loss_mask, &advantages, Some(&attribution_weights))?;

    let diagnostics = AttributionDiagnostics::from_tensors(&attribution_weights, &loss_mask)?;
    let loss = attributed_loss(log_probs, loss_mask, advantages, attribution_weights);

    Ok((loss, diagnostics))
}

/// Attributed loss only; no host round trip for diagnostics.
fn attributed_loss<B: Backend>(
    log_probs: Tensor<B, 2>,
    loss_mask: Tensor<B, 2, Bool>,
    advantages: Tensor<B, 1>,
    attribution_weights: Tensor<B, 2>,
) -> Tensor<B, 1> {
    let token_advantages =
        attributed_token_advantages(advantages, attribution_weights, loss_mask.clone());
    policy_gradient_loss(log_probs, token_advantages, loss_mask)
}

// ============================================================
// COMBINERS
// ============================================================

#[derive(Debug)]
pub struct LossOutput<B: Backend> {
    pub loss: Tensor<B, 1>,
    pub diagnostics: Option<AttributionDiagnostics>,
}

/// Turns per-token log-probs into the scalar training loss.
///
/// Implemented once per advantage-assignment strategy; the strategy is fixed
/// when the policy is built, so the per-step path does not branch on config.
pub trait LossCombiner<B: Backend> {
    fn combine(
        &self,
        log_probs: Tensor<B, 2>,
        loss_mask: Tensor<B, 2, Bool>,
        advantages: Tensor<B, 1>,
    ) -> Result<LossOutput<B>>;
}

/// Standard GRPO: one advantage for every token.
#[derive(Debug, Clone, Copy, Default)]
pub struct UniformAdvantage;

impl<B: Backend> LossCombiner<B> for UniformAdvantage {
    fn combine(
        &self,
        log_probs: Tensor<B, 2>,
        loss_mask: Tensor<B, 2, Bool>,
        advantages: Tensor<B, 1>,
    ) -> Result<LossOutput<B>> {
        Ok(LossOutput {
            loss: grpo_loss(log_probs, loss_mask, advantages)?,
            diagnostics: None,
        })
    }
}

/// Advantage redistributed by learned attribution weights.
#[derive(Debug, Clone)]
pub struct AttributedAdvantage<B: Backend> {
    pub weights: Tensor<B, 2>,
    /// Statistics of `weights` if the caller already has them.
    pub diagnostics: Option<AttributionDiagnostics>,
}

impl<B: Backend> AttributedAdvantage<B> {
    pub fn new(weights: Tensor<B, 2>) -> Self {
        Self {
            weights,
            diagnostics: None,
        }
    }

    pub fn with_diagnostics(mut self, diagnostics: AttributionDiagnostics) -> Self {
        self.diagnostics = Some(diagnostics);
        self
    }
}

impl<B: Backend> LossCombiner<B> for AttributedAdvantage<B> {
    fn combine(
        &self,
        log_probs: Tensor<B, 2>,
        loss_mask: Tensor<B, 2, Bool>,
        advantages: Tensor<B, 1>,
    ) -> Result<LossOutput<B>> {
        let Some(diagnostics) = self.diagnostics else {
            let (loss, diagnostics) =
                grpo_loss_with_attribution(log_probs, loss_mask, advantages, self.weights.clone())?;
            return Ok(LossOutput {
                loss,
                diagnostics: Some(diagnostics),
            });
        };

        validate_loss_inputs(&log_probs, &loss_mask, &advantages, Some(&self.weights))?;
        Ok(LossOutput {
            loss: attributed_loss(log_probs, loss_mask, advantages, self.weights.clone()),
            diagnostics: Some(diagnostics),
        })
    }
}
