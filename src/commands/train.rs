//! Train Command
//!
//! Loop GRPO de demonstração sobre rollouts sintéticos, com ou sem atribuição.

use burn::tensor::backend::Backend;
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::backend::{get_device, MyBackend, TrainBackend, BACKEND_NAME};
use crate::helpers::{banner, format_duration, format_params, get_model_config};
use grpo_attribution::{
    AttributionConfig, AttributionError, AttributionLogWriter, AttributionWrapper, GrpoTrainer,
    MetricsCsv, MetricsSink, Policy, Result, RolloutBatch, SyntheticRollouts, TinyLm,
    TrainLogger, TrainingConfig, UniformPolicy, PAD_ID,
};

pub struct TrainArgs {
    pub output: PathBuf,
    pub model_size: String,
    pub use_attribution: bool,
    pub init_std: f64,
    pub max_steps: usize,
    pub learning_rate: f64,
    pub warmup_steps: usize,
    pub groups: usize,
    pub group_size: usize,
    pub prompt_len: usize,
    pub completion_len: usize,
    pub save_every: usize,
    pub log_every: usize,
    pub attribution_log_every: usize,
    pub seed: u64,
    pub resume: Option<PathBuf>,
}

pub fn execute(args: TrainArgs) -> Result<()> {
    let device = get_device();
    <MyBackend as Backend>::seed(args.seed);

    let model_config = get_model_config(&args.model_size);
    model_config.validate()?;

    let train_config = TrainingConfig {
        learning_rate: args.learning_rate,
        warmup_steps: args.warmup_steps,
        max_steps: args.max_steps,
        save_every: args.save_every,
        log_every: args.log_every.max(1),
        ..Default::default()
    };

    banner("🎯 Treino GRPO");
    println!("  Backend: {}", BACKEND_NAME);
    println!("  Modelo: {} ({} parâmetros)", args.model_size, format_params(model_config.num_parameters()));
    println!("  Atribuição: {}", if args.use_attribution { "ligada" } else { "desligada" });
    println!("  Steps: {} | LR: {:.1e} | warmup: {}", args.max_steps, args.learning_rate, args.warmup_steps);
    println!(
        "  Batch: {} grupos × {} amostras | prompt {} + completion {}",
        args.groups, args.group_size, args.prompt_len, args.completion_len
    );
    println!("  Saída: {:?}", args.output);
    println!();

    std::fs::create_dir_all(&args.output)?;
    let model = TinyLm::<TrainBackend>::new(&model_config, &device);

    // Tipo de policy decidido aqui; o loop abaixo é o mesmo para ambos
    if args.use_attribution {
        let attribution = AttributionConfig::enabled().with_init_std(args.init_std);
        let policy = AttributionWrapper::new(model, &attribution, &device)?;
        let trainer = GrpoTrainer::new(policy, train_config, device);
        run_training_loop(trainer, &args)
    } else {
        let trainer = GrpoTrainer::new(UniformPolicy::new(model), train_config, device);
        run_training_loop(trainer, &args)
    }
}

pub(crate) fn run_training_loop<P: Policy<TrainBackend>>(
    mut trainer: GrpoTrainer<TrainBackend, P>,
    args: &TrainArgs,
) -> Result<()> {
    if let Some(checkpoint) = &args.resume {
        let report = trainer.load_checkpoint(checkpoint)?;
        println!("  ✅ Checkpoint carregado: step {}", trainer.step());
        if !report.missing.is_empty() {
            println!("  ⚠️ {} chaves ausentes, mantidas na inicialização", report.missing.len());
        }
    }

    let vocab_size = get_model_config(&args.model_size).vocab_size;
    let mut source = SyntheticRollouts::new(
        args.seed,
        vocab_size,
        args.prompt_len,
        args.completion_len,
        args.group_size,
    )?;

    let mut csv = MetricsCsv::new(&args.output)?;
    let mut logger = TrainLogger::new(&args.output, args.log_every)?;
    let attribution_log = AttributionLogWriter::new(
        &args.output.join("attribution_logs"),
        args.attribution_log_every,
        args.group_size,
    )?;

    let start = Instant::now();
    let initial_step = trainer.step();
    let device = trainer.device().clone();

    for _ in initial_step..args.max_steps {
        let samples = source.next_batch(args.groups)?;
        let batch = RolloutBatch::<TrainBackend>::from_samples(&samples, PAD_ID, &device)?;

        let stats = match trainer.train_step(&batch) {
            Ok(stats) => stats,
            Err(AttributionError::NonFiniteLoss { step }) => {
                println!("  ⚠️ Loss não finita no step {}, batch pulado", step);
                logger.log_message(&format!("SKIP Step {} non-finite loss", step))?;
                continue;
            }
            Err(e) => return Err(e),
        };

        let mut scalars = stats.scalars();
        let mean_reward = samples.iter().map(|s| s.reward as f64).sum::<f64>() / samples.len() as f64;
        scalars.insert("train/reward_mean".to_string(), mean_reward);

        csv.record(stats.step, &scalars)?;
        logger.record(stats.step, &scalars)?;
        attribution_log.log_step(&samples, &stats)?;

        if stats.step % args.log_every.max(1) == 0 {
            let elapsed = start.elapsed().as_secs();
            let mut line = format!(
                "  Step {:>5}/{} | Loss: {:>8.4} | Recompensa: {:.3} | LR: {:.2e} | {}",
                stats.step,
                args.max_steps,
                stats.loss,
                mean_reward,
                stats.lr,
                format_duration(elapsed)
            );
            if let Some(diagnostics) = &stats.diagnostics {
                line.push_str(&format!(" | {}", diagnostics));
            }
            println!("{}", line);
        }

        if args.save_every > 0 && stats.step % args.save_every == 0 {
            save(&trainer, &args.output, &mut logger)?;
        }
    }

    let path = save(&trainer, &args.output, &mut logger)?;
    csv.flush()?;
    logger.flush()?;

    println!();
    banner("✅ Treinamento concluído!");
    println!("  Steps: {} | Tempo: {}", trainer.step(), format_duration(start.elapsed().as_secs()));
    println!("  Modelo: {:?}", path);
    Ok(())
}

fn save<P: Policy<TrainBackend>>(
    trainer: &GrpoTrainer<TrainBackend, P>,
    output: &Path,
    logger: &mut TrainLogger,
) -> Result<PathBuf> {
    let step = trainer.step();
    let checkpoints = output.join("checkpoints");
    std::fs::create_dir_all(&checkpoints)?;

    let path = trainer.save_checkpoint(&checkpoints.join(format!("step_{}", step)))?;
    trainer.export_rollout_weights(&output.join("rollout").join(format!("step_{}", step)))?;
    logger.log_checkpoint(step, &path)?;
    println!("  💾 Checkpoint salvo: {:?}", path);
    Ok(path)
}
