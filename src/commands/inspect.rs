//! Inspect Command
//!
//! Lista partições, chaves e contagem de parâmetros de um checkpoint.

use std::path::Path;

use crate::helpers::{banner, format_params};
use grpo_attribution::{partition_checkpoint, Result, StateDict, HEAD_PREFIX};

pub fn execute(checkpoint: &Path, show_keys: bool) -> Result<()> {
    let state = StateDict::load_file(checkpoint)?;
    let (base, head) = partition_checkpoint(&state);

    banner(&format!("🔍 Checkpoint {:?}", checkpoint));
    println!("  Chaves: {} | Parâmetros: {}", state.len(), format_params(state.num_parameters()));
    println!(
        "  model.*:            {:>4} chaves, {} parâmetros",
        base.len(),
        format_params(base.num_parameters())
    );
    if head.is_empty() {
        println!("  {}*: ausente (checkpoint só do modelo base)", HEAD_PREFIX);
    } else {
        println!(
            "  {}*: {:>4} chaves, {} parâmetros",
            HEAD_PREFIX,
            head.len(),
            format_params(head.num_parameters())
        );
    }

    if let Ok(meta) = std::fs::read_to_string(checkpoint.with_extension("meta")) {
        println!();
        for line in meta.lines() {
            println!("  {}", line);
        }
    }

    if show_keys {
        println!();
        for (key, entry) in state.iter() {
            println!("  {:<48} {:?}", key, entry.shape);
        }
    }
    println!("═══════════════════════════════════════════════════════════");
    Ok(())
}
