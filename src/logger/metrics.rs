// src/logger/metrics.rs
//! Logging de treino: arquivo de texto, métricas CSV e memória

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::time::Instant;

use crate::error::{AttributionError, Result};

/// Recebe um mapa de escalares por step de treino
pub trait MetricsSink {
    fn record(&mut self, step: usize, scalars: &BTreeMap<String, f64>) -> Result<()>;

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

fn open_write(path: &Path, append: bool) -> Result<File> {
    OpenOptions::new()
        .create(true)
        .write(true)
        .append(append)
        .truncate(!append)
        .open(path)
        .map_err(|source| AttributionError::FileWrite {
            path: path.to_path_buf(),
            source,
        })
}

// ============================================================
// LOG DE TEXTO
// ============================================================

/// Logger de treino para arquivo de texto (`training.log`)
pub struct TrainLogger {
    file: File,
    start_time: Instant,
    log_every: usize,
}

impl TrainLogger {
    pub fn new(output_dir: &Path, log_every: usize) -> Result<Self> {
        std::fs::create_dir_all(output_dir)?;
        let file = open_write(&output_dir.join("training.log"), true)?;

        Ok(Self {
            file,
            start_time: Instant::now(),
            log_every: log_every.max(1),
        })
    }

    fn write_line(&mut self, body: &str) -> Result<()> {
        let elapsed = self.start_time.elapsed().as_secs();
        writeln!(self.file, "[{:>6}s] {}", elapsed, body)?;
        self.file.flush()?;
        Ok(())
    }

    pub fn log_checkpoint(&mut self, step: usize, path: &Path) -> Result<()> {
        self.write_line(&format!("CHECKPOINT Step {} -> {}", step, path.display()))
    }

    pub fn log_message(&mut self, msg: &str) -> Result<()> {
        self.write_line(msg)
    }

    pub fn elapsed_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl MetricsSink for TrainLogger {
    fn record(&mut self, step: usize, scalars: &BTreeMap<String, f64>) -> Result<()> {
        if step % self.log_every != 0 {
            return Ok(());
        }

        let get = |key: &str| scalars.get(key).copied().unwrap_or(f64::NAN);
        let mut line = format!(
            "Step {:>6} | Loss: {:.4} | LR: {:.2e}",
            step,
            get("train/loss"),
            get("train/lr")
        );
        if scalars.contains_key("attribution/entropy") {
            line.push_str(&format!(
                " | H: {:.3} | max: {:.4} | min: {:.4} | std: {:.4}",
                get("attribution/entropy"),
                get("attribution/max_weight"),
                get("attribution/min_weight"),
                get("attribution/std_weight")
            ));
        }
        self.write_line(&line)
    }

    fn flush(&mut self) -> Result<()> {
        self.file.flush()?;
        Ok(())
    }
}

// ============================================================
// CSV
// ============================================================

/// `metrics.csv` com colunas fixadas pelo primeiro registro.
///
/// Chave ausente num registro posterior vira célula vazia; chaves novas são
/// descartadas.
pub struct MetricsCsv {
    file: File,
    columns: Option<Vec<String>>,
}

impl MetricsCsv {
    pub fn new(output_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(output_dir)?;
        let file = open_write(&output_dir.join("metrics.csv"), false)?;
        Ok(Self { file, columns: None })
    }

    pub fn columns(&self) -> Option<&[String]> {
        self.columns.as_deref()
    }
}

impl MetricsSink for MetricsCsv {
    fn record(&mut self, step: usize, scalars: &BTreeMap<String, f64>) -> Result<()> {
        if self.columns.is_none() {
            let columns: Vec<String> = scalars.keys().cloned().collect();
            writeln!(self.file, "step,{}", columns.join(","))?;
            self.columns = Some(columns);
        }

        let cells: Vec<String> = self
            .columns
            .iter()
            .flatten()
            .map(|key| scalars.get(key).map(|v| format!("{}", v)).unwrap_or_default())
            .collect();

        writeln!(self.file, "{},{}", step, cells.join(","))?;
        self.file.flush()?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.file.flush()?;
        Ok(())
    }
}

// ============================================================
// MEMÓRIA
// ============================================================

/// Guarda todos os registros (testes e resumos de execução)
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    pub records: Vec<(usize, BTreeMap<String, f64>)>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Todos os valores de `key`, na ordem dos steps
    pub fn series(&self, key: &str) -> Vec<f64> {
        self.records
            .iter()
            .filter_map(|(_, scalars)| scalars.get(key).copied())
            .collect()
    }

    pub fn last(&self) -> Option<&BTreeMap<String, f64>> {
        self.records.last().map(|(_, scalars)| scalars)
    }
}

impl MetricsSink for MemorySink {
    fn record(&mut self, step: usize, scalars: &BTreeMap<String, f64>) -> Result<()> {
        self.records.push((step, scalars.clone()));
        Ok(())
    }
}
