//! digi: run, check and inspect digitization pipelines.
#![allow(clippy::uninlined_format_args)]

use clap::{Parser, Subcommand};
use digi_actions::{ActionRegistry, Pipeline, PipelineConfig};
use digi_core::BitFieldCoder;
use digi_io::{
    run_events, EventSink, EventSource, JsonLinesDump, JsonLinesSource, NullSink, SyntheticSource,
};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Result type for CLI operations.
type Result<T> = std::result::Result<T, CliError>;

/// CLI error types.
#[derive(Error, Debug)]
enum CliError {
    #[error("I/O error: {0}")]
    Io(#[from] digi_io::Error),

    #[error("{0}")]
    Core(#[from] digi_core::Error),

    #[error("no event input: pass --input or --synthetic")]
    NoInput,
}

/// Detector digitization pipeline driver.
#[derive(Parser)]
#[command(name = "digi")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace); RUST_LOG overrides
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Process events through a configured pipeline
    Run {
        /// Pipeline configuration (JSON)
        #[arg(short, long)]
        config: PathBuf,

        /// Input events, one JSON record per line
        #[arg(short, long, conflicts_with = "synthetic")]
        input: Option<PathBuf>,

        /// Generate deposits per readout instead of reading input
        #[arg(long, value_name = "DEPOSITS")]
        synthetic: Option<usize>,

        /// Seed of the synthetic generator
        #[arg(long, default_value = "0")]
        seed: u64,

        /// Per-event summary output (JSON lines)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Override the configured worker count
        #[arg(short, long)]
        workers: Option<usize>,

        /// Stop after this many events
        #[arg(short = 'n', long)]
        max_events: Option<u64>,
    },

    /// Build a pipeline and report configuration errors
    Validate {
        /// Pipeline configuration (JSON)
        #[arg(short, long)]
        config: PathBuf,
    },

    /// Print the action tree of a pipeline
    Tree {
        /// Pipeline configuration (JSON)
        #[arg(short, long)]
        config: PathBuf,
    },

    /// List the registered action and processor kinds
    Kinds,
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

fn build(config: &PipelineConfig) -> Result<Pipeline> {
    Ok(Pipeline::from_config(config, &ActionRegistry::with_builtins())?)
}

fn synthetic_source(config: &PipelineConfig, deposits: usize, seed: u64) -> Result<SyntheticSource> {
    let mut source = SyntheticSource::new(seed, deposits);
    for readout in &config.readouts {
        let coder = BitFieldCoder::parse(&readout.id_spec)?;
        source = source.with_container(format!("{}.deposits", readout.subdetector), coder);
    }
    Ok(source)
}

fn open_source(
    config: &PipelineConfig,
    input: Option<&Path>,
    synthetic: Option<usize>,
    seed: u64,
) -> Result<Box<dyn EventSource>> {
    match (input, synthetic) {
        (Some(path), _) => Ok(Box::new(JsonLinesSource::open(path)?)),
        (None, Some(deposits)) => Ok(Box::new(synthetic_source(config, deposits, seed)?)),
        (None, None) => Err(CliError::NoInput),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Run {
            config,
            input,
            synthetic,
            seed,
            output,
            workers,
            max_events,
        } => {
            let mut config = PipelineConfig::from_file(&config)?;
            if let Some(workers) = workers {
                config.workers = workers;
            }
            let pipeline = build(&config)?;
            let mut source = open_source(&config, input.as_deref(), synthetic, seed)?;
            let mut sink: Box<dyn EventSink> = match &output {
                Some(path) => Box::new(JsonLinesDump::create(path)?),
                None => Box::new(NullSink),
            };

            let summary = run_events(&pipeline, source.as_mut(), sink.as_mut(), max_events)?;
            println!(
                "{} events processed, {} failed, {:.3}s",
                summary.processed,
                summary.failed,
                summary.elapsed.as_secs_f64()
            );
            for failure in &summary.failures {
                println!(
                    "  event {}: {:?} ({} failures) {}",
                    failure.event_number, failure.kind, failure.count, failure.first
                );
                for sequence in &failure.sequences {
                    println!("    in '{}': {} failed", sequence.sequence, sequence.count);
                }
            }
            if let Some(path) = output {
                println!("summaries written to {}", path.display());
            }
        }

        Commands::Validate { config } => {
            let config = PipelineConfig::from_file(&config)?;
            let pipeline = build(&config)?;
            println!(
                "ok: '{}' with {} readouts, {} workers, {:?} guards",
                pipeline.root().name(),
                config.readouts.len(),
                pipeline.pool().threads(),
                pipeline.guard_scope()
            );
        }

        Commands::Tree { config } => {
            let pipeline = build(&PipelineConfig::from_file(&config)?)?;
            print!("{}", pipeline.describe());
        }

        Commands::Kinds => {
            let registry = ActionRegistry::with_builtins();
            println!("actions:");
            for kind in registry.kinds() {
                println!("  {}", kind);
            }
            println!("processors:");
            for kind in registry.processors().kinds() {
                println!("  {}", kind);
            }
        }
    }

    Ok(())
}
