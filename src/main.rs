mod backend;
mod commands;
mod helpers;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use commands::train::TrainArgs;

// ============ CLI ============
#[derive(Parser)]
#[command(name = "grpo-attribution")]
#[command(version)]
#[command(about = "GRPO with learned per-token advantage attribution")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Treina com GRPO sobre rollouts sintéticos
    Train {
        #[arg(short, long)]
        output: PathBuf,
        #[arg(long, default_value = "small")]
        model_size: String,
        /// Redistribui a vantagem com a cabeça de atribuição
        #[arg(long)]
        use_attribution: bool,
        #[arg(long, default_value = "0.01")]
        init_std: f64,
        #[arg(long, default_value = "200")]
        max_steps: usize,
        #[arg(long, default_value = "1e-3")]
        learning_rate: f64,
        #[arg(long, default_value = "10")]
        warmup_steps: usize,
        #[arg(long, default_value = "4")]
        groups: usize,
        #[arg(long, default_value = "4")]
        group_size: usize,
        #[arg(long, default_value = "8")]
        prompt_len: usize,
        #[arg(long, default_value = "16")]
        completion_len: usize,
        #[arg(long, default_value = "100")]
        save_every: usize,
        #[arg(long, default_value = "10")]
        log_every: usize,
        #[arg(long, default_value = "50")]
        attribution_log_every: usize,
        #[arg(long, default_value = "42")]
        seed: u64,
        /// Checkpoint para retomar (`.bin`, com `.meta` ao lado)
        #[arg(long)]
        resume: Option<PathBuf>,
    },

    /// Mostra pesos de atribuição como tokens coloridos
    Visualize {
        #[arg(required = true)]
        files: Vec<PathBuf>,
        #[arg(long)]
        sample: Option<usize>,
        #[arg(long, default_value = "5")]
        max_samples: usize,
    },

    /// Mostra partições, chaves e shapes de um checkpoint
    Inspect {
        #[arg(short, long)]
        checkpoint: PathBuf,
        #[arg(long)]
        keys: bool,
    },
}

fn main() {
    // Inicializa logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Train {
            output,
            model_size,
            use_attribution,
            init_std,
            max_steps,
            learning_rate,
            warmup_steps,
            groups,
            group_size,
            prompt_len,
            completion_len,
            save_every,
            log_every,
            attribution_log_every,
            seed,
            resume,
        } => commands::train::execute(TrainArgs {
            output,
            model_size,
            use_attribution,
            init_std,
            max_steps,
            learning_rate,
            warmup_steps,
            groups,
            group_size,
            prompt_len,
            completion_len,
            save_every,
            log_every,
            attribution_log_every,
            seed,
            resume,
        }),
        Commands::Visualize {
            files,
            sample,
            max_samples,
        } => commands::visualize::execute(&files, sample, max_samples),
        Commands::Inspect { checkpoint, keys } => commands::inspect::execute(&checkpoint, keys),
    };

    if let Err(e) = result {
        eprintln!("  ❌ {}", e);
        std::process::exit(1);
    }
}
