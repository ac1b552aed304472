//! Common Helper Functions
//!
//! Shared utilities used across multiple commands.

use grpo_attribution::TinyLmConfig;

/// Returns the reference model configuration for a size string
pub fn get_model_config(model_size: &str) -> TinyLmConfig {
    match model_size {
        "tiny" => TinyLmConfig::tiny(),
        "small" => TinyLmConfig::small(),
        _ => {
            println!("  ⚠️ Tamanho '{}' não reconhecido, usando small", model_size);
            TinyLmConfig::small()
        }
    }
}

/// Formats a parameter count (85M, 1.5B, ...)
pub fn format_params(n: usize) -> String {
    if n >= 1_000_000_000 {
        format!("{:.2}B", n as f64 / 1e9)
    } else if n >= 1_000_000 {
        format!("{:.1}M", n as f64 / 1e6)
    } else if n >= 1_000 {
        format!("{:.1}K", n as f64 / 1e3)
    } else {
        n.to_string()
    }
}

pub fn format_duration(secs: u64) -> String {
    let h = secs / 3600;
    let m = (secs % 3600) / 60;
    let s = secs % 60;

    if h > 0 {
        format!("{}h{}m{}s", h, m, s)
    } else if m > 0 {
        format!("{}m{}s", m, s)
    } else {
        format!("{}s", s)
    }
}

pub fn banner(title: &str) {
    println!("═══════════════════════════════════════════════════════════");
    println!("  {}", title);
    println!("═══════════════════════════════════════════════════════════");
}
