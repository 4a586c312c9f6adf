// photopix: parallel block pixelation with a thread-scaling benchmark.
//
// Subcommands:
//   process  load an image, pixelate it once, save the result
//   bench    sweep thread counts x variants x algorithms, append timings to a log

use std::path::PathBuf;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use log::{info, warn};

use photopix::benchmark::{CancelToken, finish_sweep};
use photopix::{KernelVariant, PipelineConfig, PixelationAlgorithm, PixelationSession, SweepPlan};

#[derive(Parser)]
#[command(name = "photopix", about = "Parallel image pixelation and thread-scaling benchmark")]
struct Cli {
    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Pixelate one image and save the result (format follows the output extension)
    Process {
        input: PathBuf,
        output: PathBuf,
        /// Worker threads; defaults to the number of logical cores
        #[arg(long)]
        threads: Option<usize>,
        /// Blocks across the image width
        #[arg(long, default_value_t = 100)]
        blocks: usize,
        /// Kernel backend: native, tuned
        #[arg(long, default_value = "native")]
        variant: KernelVariant,
        /// Block reduction: average, median, random
        #[arg(long, default_value = "average")]
        algorithm: PixelationAlgorithm,
        /// Fixed seed for the random algorithm
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Time every combination and append the averages to the result log
    Bench {
        input: PathBuf,
        /// Result log, appended to
        #[arg(long, default_value = "test.txt")]
        log: PathBuf,
        /// Blocks across the image width
        #[arg(long, default_value_t = 100)]
        blocks: usize,
        /// Thread counts to sweep, comma separated
        #[arg(long, value_delimiter = ',')]
        threads: Vec<usize>,
        /// Kernel backends to sweep, comma separated
        #[arg(long, value_delimiter = ',')]
        variants: Vec<KernelVariant>,
        /// Algorithms to sweep, comma separated
        #[arg(long, value_delimiter = ',')]
        algorithms: Vec<PixelationAlgorithm>,
        /// Trials per combination
        #[arg(long, default_value_t = SweepPlan::DEFAULT_ITERATIONS)]
        iterations: usize,
        /// Fixed seed for the random algorithm
        #[arg(long)]
        seed: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match Cli::parse().command {
        Cmd::Process {
            input,
            output,
            threads,
            blocks,
            variant,
            algorithm,
            seed,
        } => {
            let defaults = PipelineConfig::default();
            let config = PipelineConfig {
                thread_count: threads.unwrap_or(defaults.thread_count),
                block_count: blocks,
                variant,
                algorithm,
                random_seed: seed,
            };

            let mut session = PixelationSession::with_defaults();
            session
                .load(&input)
                .with_context(|| format!("could not load {}", input.display()))?;
            let outcome = session.process(&config).context("pixelation failed")?;
            session
                .save(&output)
                .with_context(|| format!("could not save {}", output.display()))?;
            println!("{outcome}");
        }
        Cmd::Bench {
            input,
            log,
            blocks,
            threads,
            variants,
            algorithms,
            iterations,
            seed,
        } => {
            let config = PipelineConfig {
                block_count: blocks,
                random_seed: seed,
                ..PipelineConfig::default()
            };

            let mut session = PixelationSession::with_defaults();
            session
                .load(&input)
                .with_context(|| format!("could not load {}", input.display()))?;

            let mut plan = session.benchmark_plan(&config)?;
            if !threads.is_empty() {
                plan.thread_counts = threads;
            }
            if !variants.is_empty() {
                plan.variants = variants;
            }
            if !algorithms.is_empty() {
                plan.algorithms = algorithms;
            }
            plan.iterations = iterations;

            let cancel = CancelToken::new();
            let on_interrupt = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("interrupt received, stopping after the current combination");
                    on_interrupt.cancel();
                }
            });

            let (handle, mut progress) = session
                .spawn_benchmark(plan, &log, cancel)
                .context("could not start benchmark")?;
            while let Some(update) = progress.recv().await {
                println!("{update}");
            }
            let summary = finish_sweep(handle).await.context("benchmark failed")?;

            if summary.cancelled {
                info!("benchmark cancelled");
            }
            if summary.records.is_empty() && !summary.cancelled {
                bail!(
                    "no combination produced a result ({} trials failed)",
                    summary.failed_trials
                );
            }

            let log_path = std::fs::canonicalize(&log).unwrap_or(log);
            println!("Results appended to {}", log_path.display());
        }
    }

    Ok(())
}
