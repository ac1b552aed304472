// src/logger/attribution_log.rs
//! Periodic JSON dumps of per-token attribution for later inspection
//!
//! File layout: `<dir>/step_<N>_attribution.json`, a JSON array of
//! [`AttributionRecord`], one per logged sample.

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use crate::data::RolloutSample;
use crate::error::{AttributionError, Result};
use crate::model::TrainStats;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenAttribution {
    pub position: usize,
    pub token_id: u32,
    pub token: String,
    pub attribution: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributionRecord {
    pub step: usize,
    pub sample_idx: usize,
    pub reward: f32,
    pub advantage: f32,
    pub prompt: Vec<u32>,
    /// Completion tokens only, in order.
    pub tokens: Vec<TokenAttribution>,
}

/// Display label for a token id: printable ASCII as itself, else `<id>`.
pub fn token_label(id: u32) -> String {
    match char::from_u32(id) {
        Some(c) if c.is_ascii_graphic() => c.to_string(),
        Some(' ') => "␣".to_string(),
        _ => format!("<{}>", id),
    }
}

/// Pairs each completion token of `sample` with its attribution weight.
///
/// `row_weights` is the sample's row of the `[batch, seq]` weight matrix, in
/// shifted (next-token) positions.
pub fn record_for_sample(
    step: usize,
    sample_idx: usize,
    sample: &RolloutSample,
    row_weights: &[f32],
) -> AttributionRecord {
    let tokens = sample.tokens();
    let first_valid = sample.prompt.len().saturating_sub(1);

    let attributed = (first_valid..sample.shifted_len())
        .filter_map(|t| {
            let weight = row_weights.get(t)?;
            let token_id = tokens[t + 1];
            Some(TokenAttribution {
                position: t + 1 - sample.prompt.len(),
                token_id,
                token: token_label(token_id),
                attribution: *weight,
            })
        })
        .collect();

    AttributionRecord {
        step,
        sample_idx,
        reward: sample.reward,
        advantage: sample.advantage,
        prompt: sample.prompt.clone(),
        tokens: attributed,
    }
}

pub struct AttributionLogWriter {
    dir: PathBuf,
    every: usize,
    max_samples: usize,
}

impl AttributionLogWriter {
    pub fn new(dir: &Path, every: usize, max_samples: usize) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
            every: every.max(1),
            max_samples,
        })
    }

    pub fn should_log(&self, step: usize) -> bool {
        step % self.every == 0
    }

    pub fn path_for(&self, step: usize) -> PathBuf {
        self.dir.join(format!("step_{}_attribution.json", step))
    }

    /// Writes the first `max_samples` samples of a step, if the step is due
    /// and the stats carry attribution weights.
    pub fn log_step(&self, samples: &[RolloutSample], stats: &TrainStats) -> Result<Option<PathBuf>> {
        if !self.should_log(stats.step) || stats.attribution_weights.is_none() {
            return Ok(None);
        }

        let records: Vec<AttributionRecord> = samples
            .iter()
            .take(self.max_samples)
            .enumerate()
            .filter_map(|(i, sample)| {
                let row = stats.row_weights(i)?;
                Some(record_for_sample(stats.step, i, sample, row))
            })
            .collect();

        let path = self.path_for(stats.step);
        write_attribution_log(&path, &records)?;
        tracing::debug!(step = stats.step, samples = records.len(), path = %path.display(), "attribution log written");
        Ok(Some(path))
    }
}

pub fn write_attribution_log(path: &Path, records: &[AttributionRecord]) -> Result<()> {
    let file = File::create(path).map_err(|source| AttributionError::FileWrite {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::to_writer_pretty(BufWriter::new(file), records)?;
    Ok(())
}

pub fn read_attribution_log(path: &Path) -> Result<Vec<AttributionRecord>> {
    if !path.exists() {
        return Err(AttributionError::FileNotFound(path.to_path_buf()));
    }
    let file = File::open(path).map_err(|source| AttributionError::FileRead {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(serde_json::from_reader(BufReader::new(file))?)
}
