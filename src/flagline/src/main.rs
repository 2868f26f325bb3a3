//! Flagline: operator CLI for targeting rules and experiments.
//!
//! Builds the store once from configuration and hands it to the engines.

mod commands;

use clap::{Parser, Subcommand};
use flagline_core::config::{AppConfig, StoreBackend};
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "flagline")]
#[command(about = "Targeting rules, sticky experiment assignment and results")]
#[command(version)]
struct Cli {
    /// TOML configuration file
    #[arg(long, env = "FLAGLINE_CONFIG")]
    config: Option<PathBuf>,

    /// Store backend (overrides config): memory or redis
    #[arg(long, value_parser = ["memory", "redis"])]
    backend: Option<String>,

    /// Redis URL (overrides config)
    #[arg(long)]
    redis_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Evaluate rules from a JSON file against a context
    Evaluate {
        #[arg(long)]
        rules: PathBuf,
        /// Context as a JSON object
        #[arg(long, default_value = "{}")]
        context: String,
    },
    /// Load rules, segments and experiments from a JSON file
    Import {
        #[arg(long)]
        file: PathBuf,
    },
    /// Assign (or look up) a user's variant
    Assign {
        experiment: String,
        user_id: String,
        #[arg(long, default_value = "{}")]
        context: String,
    },
    /// Record one metric observation
    Record {
        experiment: String,
        variant: String,
        metric: String,
        #[arg(allow_negative_numbers = true)]
        value: f64,
    },
    /// Print per-variant results
    Results { experiment: String },
    /// Print the value served for a feature flag (null when missing or disabled)
    Flag { key: String },
    /// Record one sample of a catalogue metric
    Sample {
        metric: String,
        #[arg(allow_negative_numbers = true)]
        value: f64,
        /// Label as key=value; repeatable
        #[arg(long = "label")]
        labels: Vec<String>,
    },
    /// Aggregate a catalogue metric over a recent range
    Aggregate {
        metric: String,
        #[arg(long, value_parser = ["hour", "day", "week", "month"], default_value = "day")]
        range: String,
        /// Label filter as key=value; repeatable
        #[arg(long = "label")]
        labels: Vec<String>,
    },
}

impl Command {
    /// Everything but `evaluate` reads or writes state that must outlive the process.
    fn needs_persistent_store(&self) -> bool {
        !matches!(self, Command::Evaluate { .. })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr so stdout stays machine-readable.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "flagline=info".into()),
        )
        .with_writer(std::io::stderr)
        .json()
        .init();

    let cli = Cli::parse();

    let mut config = AppConfig::load_from(cli.config.as_deref()).unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        AppConfig::default()
    });

    // Apply CLI overrides
    match cli.backend.as_deref() {
        Some("redis") => config.store.backend = StoreBackend::Redis,
        Some("memory") => config.store.backend = StoreBackend::Memory,
        _ => {}
    }
    if let Some(url) = cli.redis_url {
        config.store.urls = vec![url];
    }

    info!(backend = ?config.store.backend, "Configuration loaded");

    commands::ensure_backend(&cli.command, config.store.backend)?;
    let store = flagline_store::connect(&config.store).await?;
    commands::run(cli.command, store, &config).await
}
