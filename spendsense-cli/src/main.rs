use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use spendsense_engine::{
    run_until_drained, Categorizer, ConfidenceCalibrator, DecisionFusion, FileCalibrationStore,
    MemoryStore, MerchantResolver, NaiveBayesClassifier, Pipeline,
};
use spendsense_ingest::TextNormalizer;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod input;
mod state;

use config::Config;

const LONG_VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("SPENDSENSE_BUILD_SHA"),
    ")"
);

#[derive(Parser, Debug)]
#[command(
    name = "spendsense",
    version,
    long_version = LONG_VERSION,
    about = "Categorize bank/payment SMS into spending categories"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Categorize a CSV of messages (id,user_id,raw_text) and print the results as JSON
    Categorize {
        #[arg(long)]
        input: PathBuf,

        /// Registry snapshot (JSON array); overrides the configured one
        #[arg(long)]
        registry: Option<PathBuf>,

        /// Write results here instead of stdout
        #[arg(long)]
        out: Option<PathBuf>,

        /// Messages per batch (default: from config)
        #[arg(long)]
        batch_size: Option<usize>,

        /// Disable merchant rule boosting for this run
        #[arg(long)]
        no_boost: bool,
    },

    /// Calibration curve commands
    Calibrate {
        #[command(subcommand)]
        command: CalibrateCommand,
    },

    /// Print the parsed fields for one message
    Normalize { text: String },

    /// Resolve a merchant candidate against the builtin aliases and a registry
    Resolve {
        candidate: String,

        #[arg(long)]
        registry: Option<PathBuf>,
    },

    /// Configuration commands
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[derive(Subcommand, Debug)]
enum CalibrateCommand {
    /// Fit and persist a new curve from predicted_confidence,correct rows
    Fit {
        #[arg(long)]
        csv: PathBuf,
    },

    /// Map a raw probability through the current curve
    Apply { probability: f64 },

    /// Print the current curve
    Show,
}

#[derive(Subcommand, Debug)]
enum ConfigCommand {
    /// Write a default config.toml if none exists
    Init,

    /// Print the effective configuration
    Show,
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "spendsense=info,spendsense_engine=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Categorize {
            input,
            registry,
            out,
            batch_size,
            no_boost,
        } => {
            let mut cfg = config::load_config()?;
            if no_boost {
                cfg.pipeline.boosting_enabled = false;
            }
            categorize(&cfg, &input, registry, out, batch_size)?;
        }

        Command::Calibrate { command } => {
            let cfg = config::load_config()?;
            let calibrator = calibrator(&cfg)?;
            match command {
                CalibrateCommand::Fit { csv } => {
                    if !csv.exists() {
                        bail!("CSV not found: {}", csv.display());
                    }
                    let curve = calibrator
                        .fit_from_csv(&csv)
                        .with_context(|| format!("fitting from {}", csv.display()))?;
                    println!(
                        "Calibrator trained and saved to {} ({} points)",
                        cfg.calibrator_path()?.display(),
                        curve.x_thresholds.len()
                    );
                }
                CalibrateCommand::Apply { probability } => {
                    println!("{:.6}", calibrator.calibrate(probability));
                }
                CalibrateCommand::Show => match calibrator.current_curve()? {
                    Some(curve) => println!("{}", serde_json::to_string_pretty(&curve)?),
                    None => println!("No calibration curve at {}", cfg.calibrator_path()?.display()),
                },
            }
        }

        Command::Normalize { text } => {
            let (_, record) = TextNormalizer::new()?.normalize(&text);
            println!("{}", serde_json::to_string_pretty(&record)?);
        }

        Command::Resolve { candidate, registry } => {
            let registry = match registry {
                Some(p) => input::read_registry_json(&p)?,
                None => Vec::new(),
            };
            let m = MerchantResolver::new()?.resolve(&candidate, &registry);
            println!("{}", serde_json::to_string_pretty(&m)?);
        }

        Command::Config { command } => match command {
            ConfigCommand::Init => match config::init_config()? {
                (p, true) => println!("Wrote {}", p.display()),
                (p, false) => println!("Config already exists: {}", p.display()),
            },
            ConfigCommand::Show => {
                let cfg = config::load_config()?;
                println!("# {}", config::config_path()?.display());
                println!("{}", toml::to_string_pretty(&cfg)?);
            }
        },
    }

    Ok(())
}

fn calibrator(cfg: &Config) -> Result<ConfidenceCalibrator> {
    let store = FileCalibrationStore::new(cfg.calibrator_path()?);
    Ok(ConfidenceCalibrator::new(Arc::new(store)))
}

/// Wire the pipeline. A missing or unreadable model is fatal.
fn build_pipeline(cfg: &Config) -> Result<Pipeline> {
    let model_path = cfg.model_path()?;
    let classifier = NaiveBayesClassifier::load(&model_path)
        .with_context(|| format!("loading classifier {}", model_path.display()))?;

    let categorizer =
        Categorizer::new(Arc::new(classifier)).with_threshold(cfg.pipeline.auto_threshold);
    info!(
        model = %model_path.display(),
        labels = categorizer.labels().len(),
        "classifier loaded"
    );
    let fusion = DecisionFusion::new(cfg.pipeline.boosting_enabled)
        .with_override_threshold(cfg.pipeline.override_threshold);

    Ok(Pipeline::new(categorizer, calibrator(cfg)?, fusion)?
        .with_model_version(&cfg.pipeline.model_version))
}

fn categorize(
    cfg: &Config,
    input_path: &Path,
    registry: Option<PathBuf>,
    out: Option<PathBuf>,
    batch_size: Option<usize>,
) -> Result<()> {
    if !input_path.exists() {
        bail!("input not found: {} (pass --input <csv>)", input_path.display());
    }

    let pipeline = build_pipeline(cfg)?;
    info!(
        version = LONG_VERSION,
        boosting = cfg.pipeline.boosting_enabled,
        "pipeline ready"
    );

    let messages = input::read_messages_csv(input_path)?;
    let registry = match registry.or(cfg.registry_path()?) {
        Some(p) => input::read_registry_json(&p)?,
        None => Vec::new(),
    };
    let batch_size = batch_size.unwrap_or(cfg.pipeline.batch_size).max(1);

    let mut store = MemoryStore::new(messages, registry);
    let summary = run_until_drained(&mut store, &pipeline, batch_size)?;
    info!(
        processed = summary.processed,
        overridden = summary.overridden,
        failed = summary.failed,
        "run complete"
    );

    let json = serde_json::to_string_pretty(&store)?;
    match out {
        Some(p) => {
            std::fs::write(&p, json).with_context(|| format!("write {}", p.display()))?;
            eprintln!(
                "Wrote {} categorizations ({} audits, {} unprocessed) to {}",
                store.categorizations.len(),
                store.audits.len(),
                store.unprocessed_count(),
                p.display()
            );
        }
        None => println!("{}", json),
    }

    Ok(())
}
