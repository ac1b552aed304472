//! Visualize Command
//!
//! Mostra os pesos de atribuição logados numa escala azul → branco → vermelho.

use std::path::PathBuf;

use grpo_attribution::{read_attribution_log, AttributionError, AttributionRecord, Result, TokenAttribution};

const RESET: &str = "\x1b[0m";
const LINE_WIDTH: usize = 80;

fn fg(r: u8, g: u8, b: u8) -> String {
    format!("\x1b[38;2;{};{};{}m", r, g, b)
}

/// Maps `value` within `[min, max]` onto the ramp. A flat range sits on white.
pub fn attribution_color(value: f32, min: f32, max: f32) -> (u8, u8, u8) {
    let normalized = if max > min {
        ((value - min) / (max - min)).clamp(0.0, 1.0)
    } else {
        0.5
    };

    if normalized < 0.5 {
        let t = normalized * 2.0;
        let c = (255.0 * t) as u8;
        (c, c, 255)
    } else {
        let t = (normalized - 0.5) * 2.0;
        let c = (255.0 * (1.0 - t)) as u8;
        (255, c, c)
    }
}

/// Splits tokens into lines of at most `max_width` visible chars (label + space).
fn wrap_tokens(tokens: &[TokenAttribution], max_width: usize) -> Vec<Vec<&TokenAttribution>> {
    let mut lines = Vec::new();
    let mut current = Vec::new();
    let mut width = 0;

    for token in tokens {
        let label_width = token.token.chars().count() + 1;
        if width + label_width > max_width && width > 0 {
            lines.push(std::mem::take(&mut current));
            width = 0;
        }
        width += label_width;
        current.push(token);
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

fn render_sequence(record: &AttributionRecord) {
    println!();
    println!("═══════════════════════════════════════════════════════════");
    println!(
        "  📊 Step {}, Amostra {} | recompensa {:.3} | vantagem {:+.3}",
        record.step, record.sample_idx, record.reward, record.advantage
    );

    let tokens: &[TokenAttribution] = &record.tokens;
    if tokens.is_empty() {
        println!("  (sem tokens de completion)");
        return;
    }

    let min = tokens.iter().map(|t| t.attribution).fold(f32::INFINITY, f32::min);
    let max = tokens.iter().map(|t| t.attribution).fold(f32::NEG_INFINITY, f32::max);
    println!("  Faixa de atribuição: {:.4} a {:.4}", min, max);
    println!("═══════════════════════════════════════════════════════════");

    // Legenda
    print!("  ");
    for i in 0..5 {
        let value = min + (i as f32 / 4.0) * (max - min);
        let (r, g, b) = attribution_color(value, min, max);
        print!("{}■{} {:.4}  ", fg(r, g, b), RESET, value);
    }
    println!();
    println!();

    for row in wrap_tokens(tokens, LINE_WIDTH) {
        let mut line = String::from("  ");
        for token in row {
            let (r, g, b) = attribution_color(token.attribution, min, max);
            line.push_str(&format!("{}{} {}", fg(r, g, b), token.token, RESET));
        }
        println!("{}", line);
    }
    println!();

    println!("  {:>4}  {:<10} {:>8} {:>10}", "pos", "token", "id", "peso");
    let mid = (min + max) / 2.0;
    for token in tokens {
        let bg = if token.attribution > mid {
            "\x1b[48;2;255;200;200m"
        } else {
            "\x1b[48;2;200;200;255m"
        };
        println!(
            "  {:>4}  {}{:<10}{} {:>8} {:>10.4}",
            token.position, bg, token.token, RESET, token.token_id, token.attribution
        );
    }
}

pub fn execute(files: &[PathBuf], sample: Option<usize>, max_samples: usize) -> Result<()> {
    let mut records = Vec::new();
    for file in files {
        match read_attribution_log(file) {
            Ok(mut r) => records.append(&mut r),
            Err(AttributionError::FileNotFound(path)) => {
                println!("  ❌ Arquivo {:?} não existe", path);
            }
            Err(e) => return Err(e),
        }
    }

    if records.is_empty() {
        return Err(AttributionError::InvalidBatch("no attribution records found".to_string()));
    }
    println!("  📈 {} amostras de atribuição encontradas", records.len());

    let selected: Vec<&AttributionRecord> = match sample {
        Some(idx) => {
            let record = records.get(idx).ok_or_else(|| {
                AttributionError::InvalidBatch(format!(
                    "sample index {} out of range (0-{})",
                    idx,
                    records.len() - 1
                ))
            })?;
            vec![record]
        }
        None => records.iter().take(max_samples).collect(),
    };

    for record in selected {
        render_sequence(record);
    }
    Ok(())
}
