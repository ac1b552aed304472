// src/model/config.rs
//! Configurações: atribuição, modelo de referência e treino GRPO

use burn::config::Config;

use crate::error::{self, AttributionError};

/// Liga/desliga a atribuição. Lido uma vez, na construção do trainer.
#[derive(Config, Debug)]
pub struct AttributionConfig {
    #[config(default = "false")]
    pub use_attribution: bool,

    /// Desvio padrão do init normal da cabeça; valores pequenos mantêm o step 0 quase uniforme
    #[config(default = "0.01")]
    pub init_std: f64,
}

impl AttributionConfig {
    pub fn enabled() -> Self {
        Self::new().with_use_attribution(true)
    }

    pub fn validate(&self) -> error::Result<()> {
        if !self.init_std.is_finite() || self.init_std < 0.0 {
            return Err(AttributionError::ConfigError(format!(
                "init_std must be finite and >= 0, got {}",
                self.init_std
            )));
        }
        Ok(())
    }
}

#[derive(Config, Debug)]
pub struct TinyLmConfig {
    #[config(default = "256")]
    pub vocab_size: usize,

    #[config(default = "64")]
    pub d_model: usize,

    #[config(default = "2")]
    pub n_layers: usize,

    #[config(default = "128")]
    pub d_ffn: usize,

    #[config(default = "1e-5")]
    pub layer_norm_eps: f64,

    /// Desligado simula um modelo base sem hidden states
    #[config(default = "true")]
    pub expose_hidden_states: bool,
}

impl TinyLmConfig {
    /// Modelo mínimo para testes
    pub fn tiny() -> Self {
        Self {
            vocab_size: 64,
            d_model: 32,
            n_layers: 1,
            d_ffn: 64,
            layer_norm_eps: 1e-5,
            expose_hidden_states: true,
        }
    }

    /// Tamanho padrão do comando `train`
    pub fn small() -> Self {
        Self {
            vocab_size: 256,
            d_model: 128,
            n_layers: 4,
            d_ffn: 448, // 128 × 3.5
            layer_norm_eps: 1e-5,
            expose_hidden_states: true,
        }
    }

    pub fn num_parameters(&self) -> usize {
        let embed = self.vocab_size * self.d_model;
        // token_mix (d²) + ffn up/down (2 · d · d_ffn)
        let per_layer = self.d_model * self.d_model + 2 * self.d_model * self.d_ffn;
        let head = self.d_model * self.vocab_size;
        embed + self.n_layers * per_layer + head
    }

    pub fn validate(&self) -> error::Result<()> {
        if self.vocab_size == 0 || self.d_model == 0 || self.d_ffn == 0 {
            return Err(AttributionError::ConfigError(format!(
                "vocab_size, d_model and d_ffn must be > 0 (got {}, {}, {})",
                self.vocab_size, self.d_model, self.d_ffn
            )));
        }
        Ok(())
    }
}

#[derive(Config, Debug)]
pub struct TrainingConfig {
    #[config(default = "1e-4")]
    pub learning_rate: f64,

    #[config(default = "20")]
    pub warmup_steps: usize,

    #[config(default = "500")]
    pub max_steps: usize,

    #[config(default = "0.0")]
    pub weight_decay: f64,

    #[config(default = "1.0")]
    pub gradient_clip: f64,

    #[config(default = "100")]
    pub save_every: usize,

    #[config(default = "10")]
    pub log_every: usize,

    #[config(default = "0.1")]
    pub min_lr_ratio: f64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            learning_rate: 1e-4,
            warmup_steps: 20,
            max_steps: 500,
            weight_decay: 0.0,
            gradient_clip: 1.0,
            save_every: 100,
            log_every: 10,
            min_lr_ratio: 0.1,
        }
    }
}

impl TrainingConfig {
    /// Treino curto com LR alto para smoke tests e demo
    pub fn quick(max_steps: usize) -> Self {
        Self {
            learning_rate: 1e-3,
            warmup_steps: 0,
            max_steps,
            log_every: 1,
            ..Default::default()
        }
    }
}
