//! Attribution Wrapper Tests
//!
//! Construction errors, hidden-state release and where gradients go.

mod common;

use burn::tensor::{Int, Tensor};
use common::{to_vec, TestAutodiffBackend, TestBackend};
use grpo_attribution::model::HiddenStateBuffer;
use grpo_attribution::{
    grpo_loss_with_attribution, AttributionConfig, AttributionError, AttributionHeadConfig,
    AttributionWrapper, TinyLm,
};
use std::sync::Arc;

#[test]
fn test_wrapper_builds_head_of_model_width() {
    let device = common::test_device();
    let config = common::test_model_config();
    let model = TinyLm::<TestBackend>::new(&config, &device);
    let wrapper = AttributionWrapper::new(model, &AttributionConfig::enabled(), &device).unwrap();

    assert_eq!(wrapper.attribution_head.d_model(), config.d_model);

    let weights = to_vec(wrapper.attribution_head.projection_weight());
    let n = weights.len() as f32;
    let mean = weights.iter().sum::<f32>() / n;
    let std = (weights.iter().map(|w| (w - mean) * (w - mean)).sum::<f32>() / n).sqrt();
    assert!(mean.abs() < 0.01, "mean {}", mean);
    assert!(std > 0.002 && std < 0.03, "std {}", std);
}

#[test]
fn test_construction_errors() {
    let device = common::test_device();
    let config = common::test_model_config();

    let model = TinyLm::<TestBackend>::new(&config, &device);
    let bad_std = AttributionConfig::enabled().with_init_std(-0.5);
    assert!(matches!(
        AttributionWrapper::new(model, &bad_std, &device),
        Err(AttributionError::ConfigError(_))
    ));

    let blind = TinyLm::<TestBackend>::new(&config.clone().with_expose_hidden_states(false), &device);
    assert!(matches!(
        AttributionWrapper::new(blind, &AttributionConfig::enabled(), &device),
        Err(AttributionError::HiddenStatesUnsupported)
    ));

    let model = TinyLm::<TestBackend>::new(&config, &device);
    let head = AttributionHeadConfig::new(config.d_model + 1).init::<TestBackend>(&device);
    assert!(matches!(
        AttributionWrapper::with_head(model, head),
        Err(AttributionError::HiddenWidthMismatch { .. })
    ));
}

#[test]
fn test_forward_releases_hidden_states() {
    let device = common::test_device();
    let model = TinyLm::<TestAutodiffBackend>::new(&common::test_model_config(), &device);
    let wrapper = AttributionWrapper::new(model, &AttributionConfig::enabled(), &device).unwrap();
    let batch = common::small_batch::<TestAutodiffBackend>(&device);

    let out = wrapper
        .forward(batch.input_ids.clone(), batch.target_ids.clone(), batch.loss_mask.clone())
        .unwrap();

    // Released before any backward pass runs
    assert!(out.hidden_lease.is_released());
    assert_eq!(out.attribution_weights.dims(), batch.dims());
    assert_eq!(out.diagnostics.valid_sequences, 2);
}

#[test]
fn test_hidden_buffer_lease_follows_the_states() {
    let device = common::test_device();
    let buffer = HiddenStateBuffer::new(Tensor::<TestBackend, 3>::ones([2, 3, 4], &device));
    let lease = buffer.lease();

    // A consumer that holds on to the states keeps the buffer alive
    let kept = buffer.consume(|states| states);
    assert!(!lease.is_released());

    let head = AttributionHeadConfig::new(4).init::<TestBackend>(&device);
    let logits = head.forward(Arc::unwrap_or_clone(kept));
    assert_eq!(logits.dims(), [2, 3]);
    assert!(lease.is_released());
}

#[test]
fn test_forward_rejects_mismatched_mask() {
    let device = common::test_device();
    let model = TinyLm::<TestBackend>::new(&common::test_model_config(), &device);
    let wrapper = AttributionWrapper::new(model, &AttributionConfig::enabled(), &device).unwrap();
    let batch = common::small_batch::<TestBackend>(&device);
    let [b, s] = batch.dims();

    let short_mask = batch.loss_mask.clone().slice([0..b, 0..s - 1]);
    let err = wrapper
        .forward(batch.input_ids.clone(), batch.target_ids.clone(), short_mask)
        .unwrap_err();
    assert!(matches!(
        err,
        AttributionError::ShapeMismatch { tensor: "loss_mask", dim: 1, .. }
    ));
}

#[test]
fn test_gradients_reach_head_and_base() {
    let device = common::test_device();
    let model = TinyLm::<TestAutodiffBackend>::new(&common::test_model_config(), &device);
    let wrapper = AttributionWrapper::new(model, &AttributionConfig::enabled(), &device).unwrap();
    let batch = common::small_batch::<TestAutodiffBackend>(&device);

    let out = wrapper
        .forward(batch.input_ids.clone(), batch.target_ids.clone(), batch.loss_mask.clone())
        .unwrap();
    let (loss, _) = grpo_loss_with_attribution(
        out.log_probs,
        batch.loss_mask.clone(),
        batch.advantages.clone(),
        out.attribution_weights,
    )
    .unwrap();

    let grads = loss.backward();
    let head_grad = wrapper
        .attribution_head
        .projection_weight()
        .grad(&grads)
        .expect("head receives a gradient");
    let base_grad = wrapper
        .model
        .output_projection()
        .grad(&grads)
        .expect("base receives a gradient");

    assert!(to_vec(head_grad).iter().any(|g| *g != 0.0));
    assert!(to_vec(base_grad).iter().any(|g| *g != 0.0));
}

#[test]
fn test_attribution_branch_does_not_reach_base() {
    let device = common::test_device();
    let model = TinyLm::<TestAutodiffBackend>::new(&common::test_model_config(), &device);
    let wrapper = AttributionWrapper::new(model, &AttributionConfig::enabled(), &device).unwrap();
    let batch = common::small_batch::<TestAutodiffBackend>(&device);

    let out = wrapper
        .forward(batch.input_ids.clone(), batch.target_ids.clone(), batch.loss_mask.clone())
        .unwrap();

    // Loss that depends on the weights only
    let [b, s] = batch.dims();
    let ramp = Tensor::<TestAutodiffBackend, 1, Int>::arange(0..(b * s) as i64, &device)
        .float()
        .reshape([b, s]);
    let loss = (out.attribution_weights * ramp).sum();
    let grads = loss.backward();

    assert!(wrapper.attribution_head.projection_weight().grad(&grads).is_some());
    let base_grad = wrapper.model.output_projection().grad(&grads);
    assert!(base_grad.map_or(true, |g| to_vec(g).iter().all(|v| *v == 0.0)));
}
