// src/model/trainer.rs
use burn::tensor::{backend::AutodiffBackend, ElementConversion};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use super::config::TrainingConfig;
use super::diagnostics::AttributionDiagnostics;
use super::policy::{Policy, StepLoss};
use super::state::{LoadReport, StateDict};
use crate::data::RolloutBatch;
use crate::error::{AttributionError, Result};

/// Números de cada step entregues aos loggers
#[derive(Debug, Clone)]
pub struct TrainStats {
    pub step: usize,
    pub loss: f32,
    pub lr: f64,
    pub valid_tokens: usize,
    pub diagnostics: Option<AttributionDiagnostics>,
    /// Pesos de atribuição `[batch, seq]` (row-major), quando a atribuição está ligada
    pub attribution_weights: Option<Vec<f32>>,
    pub seq_len: usize,
}

impl TrainStats {
    pub fn scalars(&self) -> BTreeMap<String, f64> {
        let mut scalars = BTreeMap::from([
            ("train/loss".to_string(), self.loss as f64),
            ("train/lr".to_string(), self.lr),
            ("train/valid_tokens".to_string(), self.valid_tokens as f64),
        ]);
        if let Some(diagnostics) = &self.diagnostics {
            scalars.extend(diagnostics.scalars());
        }
        scalars
    }

    /// Pesos de atribuição da linha `index`, se houver
    pub fn row_weights(&self, index: usize) -> Option<&[f32]> {
        let weights = self.attribution_weights.as_ref()?;
        let start = index * self.seq_len;
        weights.get(start..start + self.seq_len)
    }
}

pub struct GrpoTrainer<B: AutodiffBackend, P: Policy<B>> {
    policy: P,
    optimizer: P::Optimizer,
    config: TrainingConfig,
    step: usize,
    device: B::Device,
}

impl<B: AutodiffBackend, P: Policy<B>> GrpoTrainer<B, P> {
    pub fn new(policy: P, config: TrainingConfig, device: B::Device) -> Self {
        let optimizer = policy.init_optimizer(&config);

        tracing::info!(
            parameters = policy.num_parameters(),
            attribution = policy.uses_attribution(),
            "trainer initialized"
        );

        Self {
            policy,
            optimizer,
            config,
            step: 0,
            device,
        }
    }

    /// Forward, loss, backward e um update do otimizador.
    ///
    /// Loss NaN/Inf pula o update e retorna `NonFiniteLoss`; parâmetros e
    /// contador de steps ficam intactos.
    pub fn train_step(&mut self, batch: &RolloutBatch<B>) -> Result<TrainStats> {
        batch.validate()?;
        let [_, seq_len] = batch.dims();
        let valid_tokens = batch.num_valid_tokens()?;

        let StepLoss {
            loss,
            diagnostics,
            attribution_weights,
        } = self.policy.compute_loss(batch)?;

        let loss_value: f32 = loss.clone().into_scalar().elem();
        if !loss_value.is_finite() {
            tracing::warn!(step = self.step, loss = loss_value, "skipping update on non-finite loss");
            return Err(AttributionError::NonFiniteLoss { step: self.step });
        }

        let attribution_weights = attribution_weights
            .map(|w| w.to_data().convert::<f32>().to_vec::<f32>())
            .transpose()?;

        let lr = self.current_lr();
        let grads = loss.backward();
        self.policy = self.policy.clone().apply_gradients(&mut self.optimizer, lr, grads);
        self.step += 1;

        Ok(TrainStats {
            step: self.step,
            loss: loss_value,
            lr,
            valid_tokens,
            diagnostics,
            attribution_weights,
            seq_len,
        })
    }

    /// Cosine annealing com warmup linear, decaindo até `min_lr_ratio · learning_rate`
    fn get_learning_rate(&self) -> f64 {
        let base = self.config.learning_rate;
        let warmup = self.config.warmup_steps as f64;
        let max_steps = self.config.max_steps as f64;
        let step = self.step as f64;
        let min_lr = base * self.config.min_lr_ratio;

        if step < warmup {
            return base * (step + 1.0) / warmup;
        }
        if max_steps <= warmup {
            return base;
        }

        let progress = ((step - warmup) / (max_steps - warmup)).min(1.0);
        let cosine = 0.5 * (1.0 + (std::f64::consts::PI * progress).cos());
        min_lr + (base - min_lr) * cosine
    }

    /// Salva `<path>.bin` (state dict combinado) e `<path>.meta`
    pub fn save_checkpoint(&self, path: &Path) -> Result<PathBuf> {
        let stem = checkpoint_stem(path);
        let bin = with_suffix(&stem, "bin");

        self.policy.state_dict()?.save_file(&bin)?;

        let meta = format!(
            "step={}\nlr={:.2e}\nattribution={}\n",
            self.step,
            self.get_learning_rate(),
            self.policy.uses_attribution()
        );
        let meta_path = with_suffix(&stem, "meta");
        std::fs::write(&meta_path, meta).map_err(|source| AttributionError::FileWrite {
            path: meta_path,
            source,
        })?;

        tracing::info!(step = self.step, path = %bin.display(), "checkpoint saved");
        Ok(bin)
    }

    /// Restaura parâmetros de `<path>.bin` e o step de `<path>.meta`.
    ///
    /// `.meta` malformado é erro e não altera o trainer. Sem `.meta`, apenas
    /// loga um aviso e mantém o contador de steps.
    pub fn load_checkpoint(&mut self, path: &Path) -> Result<LoadReport> {
        let stem = checkpoint_stem(path);
        let state = StateDict::load_file(&with_suffix(&stem, "bin"))?;

        let meta_path = with_suffix(&stem, "meta");
        let step = match std::fs::read_to_string(&meta_path) {
            Ok(meta) => Some(parse_meta_step(&meta, &meta_path)?),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(
                    path = %meta_path.display(),
                    step = self.step,
                    "checkpoint has no .meta, step counter not restored"
                );
                None
            }
            Err(source) => {
                return Err(AttributionError::FileRead {
                    path: meta_path,
                    source,
                })
            }
        };

        let (policy, report) = self.policy.clone().load_state_dict(&state)?;
        self.policy = policy;
        if let Some(step) = step {
            self.step = step;
        }

        tracing::info!(
            step = self.step,
            missing = report.missing.len(),
            unexpected = report.unexpected.len(),
            "checkpoint loaded"
        );
        Ok(report)
    }

    /// Exporta só o modelo base para `<dir>/model.bin`, depois o marcador `stable`
    pub fn export_rollout_weights(&self, dir: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(dir)?;
        let model_path = dir.join("model.bin");
        self.policy.rollout_state_dict()?.save_file(&model_path)?;

        let marker = dir.join("stable");
        std::fs::write(&marker, format!("{}\n", self.step)).map_err(|source| {
            AttributionError::FileWrite {
                path: marker,
                source,
            }
        })?;

        tracing::debug!(step = self.step, path = %model_path.display(), "rollout weights exported");
        Ok(model_path)
    }

    pub fn policy(&self) -> &P {
        &self.policy
    }
    pub fn into_policy(self) -> P {
        self.policy
    }
    pub fn step(&self) -> usize {
        self.step
    }
    pub fn current_lr(&self) -> f64 {
        self.get_learning_rate()
    }
    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }
    pub fn device(&self) -> &B::Device {
        &self.device
    }
}

/// Remove `.bin`/`.meta` do final; qualquer outra extensão faz parte do nome
fn checkpoint_stem(path: &Path) -> PathBuf {
    match path.extension().and_then(|e| e.to_str()) {
        Some("bin") | Some("meta") => path.with_extension(""),
        _ => path.to_path_buf(),
    }
}

/// `run.v2` + `bin` -> `run.v2.bin`
fn with_suffix(stem: &Path, ext: &str) -> PathBuf {
    let mut name = stem.as_os_str().to_os_string();
    name.push(".");
    name.push(ext);
    PathBuf::from(name)
}

fn parse_meta_step(meta: &str, meta_path: &Path) -> Result<usize> {
    let value = meta
        .lines()
        .find_map(|line| line.strip_prefix("step="))
        .ok_or_else(|| {
            AttributionError::CheckpointLoad(format!("{}: no step= line", meta_path.display()))
        })?;

    value.trim().parse().map_err(|_| {
        AttributionError::CheckpointLoad(format!(
            "{}: invalid step value {:?}",
            meta_path.display(),
            value.trim()
        ))
    })
}
