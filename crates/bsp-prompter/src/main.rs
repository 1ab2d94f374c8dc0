//! BSP Prompter - timed finger prompt broadcaster
//!
//! Generates the configured stimulus sequence, broadcasts one prompt per
//! interval until Ctrl+C, then stops the loop and waits for it to exit.

use anyhow::{Context, Result};
use bsp_stimulus::{BroadcastChannel, PromptConfig, PromptMode, PromptSample};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "bsp-prompter",
    about = "Broadcast a deterministic finger prompt sequence at a fixed interval",
    version
)]
struct Cli {
    /// JSON prompt configuration (defaults to the built-in hand session)
    #[arg(long, short, env = "BSP_PROMPT_CONFIG")]
    config: Option<PathBuf>,

    /// Sequence generation mode, overriding the configuration
    #[arg(long, value_enum)]
    mode: Option<ModeArg>,

    /// Seconds between prompts, overriding the configuration
    #[arg(long)]
    interval: Option<f64>,

    /// Print the generated sequence and exit
    #[arg(long)]
    print_sequence: bool,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[derive(Clone, Copy, ValueEnum)]
enum ModeArg {
    Combinatorial,
    Custom,
}

impl From<ModeArg> for PromptMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Combinatorial => PromptMode::Combinatorial,
            ModeArg::Custom => PromptMode::Custom,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cli.log_level))
        .context("invalid log filter")?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = resolve_config(&cli)?;

    if cli.print_sequence {
        print_sequence(&config)?;
        return Ok(());
    }

    run(config).await
}

fn resolve_config(cli: &Cli) -> Result<PromptConfig> {
    let mut config = match &cli.config {
        Some(path) => PromptConfig::load(path)
            .with_context(|| format!("failed to load prompt configuration {}", path.display()))?,
        None => PromptConfig::for_mode(cli.mode.map(Into::into).unwrap_or_default()),
    };

    if let Some(mode) = cli.mode {
        config.mode = mode.into();
    }
    if let Some(interval) = cli.interval {
        config.interval_secs = interval;
    }

    config.validate().context("invalid prompt configuration")?;
    Ok(config)
}

fn print_sequence(config: &PromptConfig) -> Result<()> {
    let sequence = config.build_sequence()?;
    println!("{}", config.labels.join("\t"));
    for state in sequence.iter() {
        let row: Vec<String> = state.to_channel_values().iter().map(i8::to_string).collect();
        println!("{}", row.join("\t"));
    }
    Ok(())
}

async fn run(config: PromptConfig) -> Result<()> {
    let outlet = Arc::new(config.build_outlet()?);
    let mut scheduler = config
        .build_scheduler(outlet.clone())
        .context("failed to build prompt scheduler")?;

    info!(
        stream = %outlet.info().name,
        mode = ?config.mode,
        labels = ?config.labels,
        states = scheduler.sequence().len(),
        interval_secs = config.interval_secs,
        "Starting prompt broadcast"
    );

    let recorder = tokio::spawn(log_recorder(
        outlet.subscribe(),
        outlet.info().channel_labels.clone(),
    ));

    scheduler.start()?;
    info!(recorders = outlet.subscriber_count(), "Prompt loop running");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl+C")?;
    info!("Stopping prompt broadcast...");

    scheduler.stop();
    scheduler.join().await?;

    let stats = scheduler.stats();
    info!(
        ticks = stats.ticks,
        publish_failures = stats.publish_failures,
        "Prompt broadcast stopped"
    );

    // Closing the last sender ends the recorder
    drop(scheduler);
    drop(outlet);
    recorder.await.context("prompt recorder task failed")?;

    Ok(())
}

/// Local recorder that logs every prompt it receives
async fn log_recorder(mut receiver: broadcast::Receiver<PromptSample>, labels: Vec<String>) {
    loop {
        match receiver.recv().await {
            Ok(sample) => {
                let active: Vec<&str> = labels
                    .iter()
                    .zip(&sample.values)
                    .filter(|&(_, &value)| value != 0)
                    .map(|(label, _)| label.as_str())
                    .collect();
                info!(
                    sample = sample.sample_index,
                    values = ?sample.values,
                    active = ?active,
                    timestamp = %sample.timestamp,
                    "Sent prompt list"
                );
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "Prompt recorder lagged behind");
            }
            Err(RecvError::Closed) => break,
        }
    }
}
