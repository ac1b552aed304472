//! Loss and Normalization Tests
//!
//! Masked softmax edge cases, sum-preserving advantages and gradient hygiene.

mod common;

use burn::tensor::Tensor;
use common::{float_rows, mask_rows, to_vec, TestAutodiffBackend, TestBackend};
use grpo_attribution::model::{attributed_token_advantages, uniform_token_advantages};
use grpo_attribution::{
    grpo_loss, grpo_loss_with_attribution, masked_softmax, AttributionConfig, AttributionWrapper,
    BaseModel, TinyLm,
};

fn assert_close(got: &[f32], expected: &[f32], tol: f32) {
    assert_eq!(got.len(), expected.len());
    for (i, (g, e)) in got.iter().zip(expected).enumerate() {
        assert!((g - e).abs() <= tol, "index {}: got {}, expected {}", i, g, e);
    }
}

#[test]
fn test_weights_sum_to_one_over_valid_positions() {
    let device = common::test_device();
    let logits = float_rows::<TestBackend>(
        &[
            &[80.0, -80.0, 100.0, 3.0, 0.0],
            &[0.1, 0.2, 0.3, 0.4, 0.5],
            &[-5.0, 7.0, 1e4, -1e4, 2.0],
        ],
        &device,
    );
    let mask = mask_rows::<TestBackend>(
        &[&[1, 1, 1, 0, 0], &[0, 1, 1, 1, 1], &[1, 1, 0, 1, 1]],
        &device,
    );

    let weights = to_vec(masked_softmax(logits, mask));
    let masks: [[u8; 5]; 3] = [[1, 1, 1, 0, 0], [0, 1, 1, 1, 1], [1, 1, 0, 1, 1]];

    for (row, m) in weights.chunks(5).zip(masks.iter()) {
        let mut sum = 0.0;
        for (w, &valid) in row.iter().zip(m.iter()) {
            assert!(w.is_finite());
            if valid == 1 {
                sum += w;
            } else {
                assert_eq!(*w, 0.0, "invalid position must be exactly zero");
            }
        }
        assert!((sum - 1.0).abs() < 1e-5, "row sum {}", sum);
    }
}

#[test]
fn test_single_valid_token_gets_full_weight() {
    let device = common::test_device();
    for extreme in [1e30f32, -1e30, 88.0, -104.0, 0.0] {
        let logits = float_rows::<TestBackend>(&[&[f32::INFINITY, extreme, -3.0, f32::NAN]], &device);
        let mask = mask_rows::<TestBackend>(&[&[0, 1, 0, 0]], &device);

        let weights = to_vec(masked_softmax(logits, mask));
        assert_eq!(weights, vec![0.0, 1.0, 0.0, 0.0], "logit {}", extreme);
    }
}

#[test]
fn test_empty_row_is_zero_with_zero_gradient() {
    let device = common::test_device();

    let logits = float_rows::<TestAutodiffBackend>(&[&[1.0, 2.0, 3.0], &[0.5, -0.5, 4.0]], &device)
        .require_grad();
    let log_probs = float_rows::<TestAutodiffBackend>(
        &[&[-1.0, -2.0, -3.0], &[f32::NEG_INFINITY, -1.0, -1.0]],
        &device,
    )
    .require_grad();
    let mask = mask_rows::<TestAutodiffBackend>(&[&[1, 1, 0], &[0, 0, 0]], &device);
    let advantages = Tensor::<TestAutodiffBackend, 1>::from_floats([1.0, 5.0], &device);

    let weights = masked_softmax(logits.clone(), mask.clone());
    let weight_values = to_vec(weights.clone());
    assert_eq!(&weight_values[3..], &[0.0, 0.0, 0.0]);

    let (loss, diagnostics) =
        grpo_loss_with_attribution(log_probs.clone(), mask, advantages, weights).unwrap();
    assert_eq!(diagnostics.valid_sequences, 1);
    let loss_value: f32 = loss.clone().into_scalar();
    assert!(loss_value.is_finite());

    let grads = loss.backward();
    let logit_grad = to_vec(logits.grad(&grads).expect("logits are tracked"));
    let logp_grad = to_vec(log_probs.grad(&grads).expect("log-probs are tracked"));

    assert!(logit_grad.iter().chain(logp_grad.iter()).all(|g| g.is_finite()));
    assert_eq!(&logit_grad[3..], &[0.0, 0.0, 0.0]);
    assert_eq!(&logp_grad[3..], &[0.0, 0.0, 0.0]);
    // Valid row still learns
    assert!(logp_grad[..2].iter().any(|g| *g != 0.0));
}

#[test]
fn test_all_empty_batch_contributes_nothing() {
    let device = common::test_device();
    let log_probs = float_rows::<TestBackend>(&[&[-1.0, f32::NEG_INFINITY]], &device);
    let mask = mask_rows::<TestBackend>(&[&[0, 0]], &device);
    let advantages = Tensor::<TestBackend, 1>::from_floats([3.0], &device);
    let weights = masked_softmax(float_rows::<TestBackend>(&[&[0.0, 0.0]], &device), mask.clone());

    let uniform: f32 = grpo_loss(log_probs.clone(), mask.clone(), advantages.clone())
        .unwrap()
        .into_scalar();
    let (attributed, _) = grpo_loss_with_attribution(log_probs, mask, advantages, weights).unwrap();
    let attributed: f32 = attributed.into_scalar();

    assert_eq!(uniform.abs(), 0.0);
    assert_eq!(attributed.abs(), 0.0);
}

#[test]
fn test_hand_computed_scenario() {
    let device = common::test_device();
    let logits = float_rows::<TestBackend>(
        &[&[0.5, 1.0, -0.5, 3.0], &[2.0, -1.0, 0.0, 5.0]],
        &device,
    );
    let mask = mask_rows::<TestBackend>(&[&[1, 1, 1, 0], &[1, 0, 0, 0]], &device);
    let advantages = Tensor::<TestBackend, 1>::from_floats([2.0, -1.0], &device);

    let weights = masked_softmax(logits, mask.clone());
    assert_close(
        &to_vec(weights.clone()),
        &[0.331499, 0.546549, 0.121952, 0.0, 1.0, 0.0, 0.0, 0.0],
        1e-5,
    );

    // Sum-preserving: A · w · n_valid
    let effective = attributed_token_advantages(advantages.clone(), weights.clone(), mask.clone());
    assert_close(
        &to_vec(effective.clone()),
        &[1.988994, 3.279296, 0.731710, 0.0, -1.0, 0.0, 0.0, 0.0],
        1e-4,
    );
    let row_sums = to_vec(effective.sum_dim(1));
    assert_close(&row_sums, &[6.0, -1.0], 1e-4);

    let uniform = to_vec(uniform_token_advantages(advantages.clone(), mask.clone()));
    assert_eq!(uniform, vec![2.0, 2.0, 2.0, 0.0, -1.0, 0.0, 0.0, 0.0]);

    // -Σ eff·logp / Σ n_valid, position 3 of row 0 and padding of row 1 ignored
    let log_probs = float_rows::<TestBackend>(
        &[&[-1.0, -2.0, -0.5, -3.0], &[-0.25, -9.0, -9.0, -9.0]],
        &device,
    );
    let (loss, _) = grpo_loss_with_attribution(log_probs.clone(), mask.clone(), advantages.clone(), weights).unwrap();
    let loss: f32 = loss.into_scalar();
    assert!((loss - 2.165860).abs() < 1e-4, "attributed loss {}", loss);

    let baseline: f32 = grpo_loss(log_probs, mask, advantages).unwrap().into_scalar();
    assert!((baseline - 1.6875).abs() < 1e-6, "uniform loss {}", baseline);
}

#[test]
fn test_init_is_near_uniform_and_matches_baseline() {
    let device = common::test_device();
    let model = TinyLm::<TestBackend>::new(&common::test_model_config(), &device);
    let wrapper = AttributionWrapper::new(model.clone(), &AttributionConfig::enabled(), &device).unwrap();
    let batch = common::small_batch::<TestBackend>(&device);

    let out = wrapper
        .forward(batch.input_ids.clone(), batch.target_ids.clone(), batch.loss_mask.clone())
        .unwrap();

    // Row 0: 4 completion tokens, row 1: 2 completion tokens
    let weights = to_vec(out.attribution_weights.clone());
    let mask = to_vec(batch.loss_mask.clone().float());
    let [_, seq] = batch.dims();
    for (row, (w, m)) in weights.chunks(seq).zip(mask.chunks(seq)).enumerate() {
        let n = m.iter().filter(|v| **v > 0.5).count() as f32;
        for (wi, mi) in w.iter().zip(m) {
            if *mi > 0.5 {
                assert!((wi - 1.0 / n).abs() < 0.2 / n, "row {} weight {} vs 1/{}", row, wi, n);
            }
        }
    }

    let (attributed, _) = grpo_loss_with_attribution(
        out.log_probs.clone(),
        batch.loss_mask.clone(),
        batch.advantages.clone(),
        out.attribution_weights,
    )
    .unwrap();
    let baseline_logp = model
        .forward_policy(batch.input_ids.clone(), batch.target_ids.clone(), false)
        .log_probs;
    let uniform = grpo_loss(baseline_logp, batch.loss_mask.clone(), batch.advantages.clone()).unwrap();

    let attributed: f32 = attributed.into_scalar();
    let uniform: f32 = uniform.into_scalar();
    assert!(
        (attributed - uniform).abs() <= 0.03 * uniform.abs() + 1e-4,
        "attributed {} vs uniform {}",
        attributed,
        uniform
    );
}
