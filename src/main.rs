//! hit-autoencoder CLI: train and evaluate the hit-map anomaly detector.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use hit_autoencoder::{evaluate_run, train_pipeline, PipelineConfig, PipelineOutcome};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "hit-autoencoder")]
#[command(author, version, about = "Autoencoder anomaly detection for detector hit maps", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Train a new model and evaluate it on the validation split
    Train {
        /// TOML configuration (defaults apply when omitted)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Evaluate a saved run on the validation split
    Evaluate {
        /// Run directory written by `train`
        #[arg(short, long)]
        run: PathBuf,

        /// TOML configuration (defaults apply when omitted)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Validation event to render, overriding `shown_event`
        #[arg(short, long)]
        event: Option<usize>,

        /// Save the full diagnostics into the run instead of previewing
        #[arg(short, long)]
        save: bool,
    },
}

fn load_config(path: Option<&Path>) -> Result<PipelineConfig> {
    match path {
        Some(path) => PipelineConfig::from_file(path)
            .with_context(|| format!("failed to load configuration from {}", path.display())),
        None => Ok(PipelineConfig::default()),
    }
}

fn report(outcome: &PipelineOutcome) {
    let evaluation = &outcome.evaluation;
    if let (Some(mean), Some(std)) = (evaluation.statistic.mean(), evaluation.statistic.std()) {
        println!("reconstruction error: mean {mean}, std {std}");
    }
    println!("threshold: {}", evaluation.threshold);
    println!(
        "anomalous events: {} of {}",
        evaluation.anomaly_count(),
        evaluation.len()
    );
    if let Some(run) = &outcome.run {
        println!("run: {}", run.path.display());
    }
    for plot in &outcome.plots {
        println!("  {}", plot.display());
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .init();

    let outcome = match cli.command {
        Commands::Train { config } => {
            let config = load_config(config.as_deref())?;
            train_pipeline(&config).context("training failed")?
        }
        Commands::Evaluate {
            run,
            config,
            event,
            save,
        } => {
            let config = load_config(config.as_deref())?;
            evaluate_run(&run, &config, event, save)
                .with_context(|| format!("failed to evaluate {}", run.display()))?
        }
    };
    report(&outcome);
    Ok(())
}
