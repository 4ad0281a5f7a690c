//! CLI Entry Point for tunelink
//!
//! Provides command-line access to a tunable laser controller:
//! - Checking that the controller accepts a link
//! - Reading the current wavelength
//! - Tuning to a wavelength (Ctrl+C cancels between polls)
//! - Running the one-shot beam alignment
//!
//! # Usage
//!
//! ```bash
//! tunelink --config config/tunelink.toml ping
//! tunelink tune 780nm
//! tunelink --host 10.0.0.5 align --mode 4
//! ```

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tunelink::config::Config;
use tunelink::laser::TunableLaser;
use tunelink::protocol::AlignmentStatus;
use tunelink::quantity::Quantity;
use tunelink::telemetry::{self, TracingConfig};
use tunelink::tuning::TuningOutcome;

#[derive(Parser)]
#[command(name = "tunelink")]
#[command(about = "Client for JSON-over-TCP tunable laser controllers", long_about = None)]
struct Cli {
    /// Configuration file (TOML); TUNELINK_* environment variables override it
    #[arg(long, global = true, default_value = "config/tunelink.toml")]
    config: PathBuf,

    /// Controller host, overriding the configuration
    #[arg(long, global = true)]
    host: Option<String>,

    /// Controller port, overriding the configuration
    #[arg(long, global = true)]
    port: Option<u16>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Log format (pretty, compact, json)
    #[arg(long, global = true)]
    log_format: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Open a link and close it again
    Ping,

    /// Read the current wavelength
    Read,

    /// Tune to a wavelength such as `780`, `780nm` or `0.78um`
    Tune {
        /// Target wavelength; a bare number is nanometers
        wavelength: Quantity,
    },

    /// Tune to the alignment wavelength and run beam alignment
    Align {
        /// Alignment mode, overriding the configuration
        #[arg(long)]
        mode: Option<u32>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load_from(&cli.config)
        .with_context(|| format!("Failed to load configuration from {}", cli.config.display()))?;
    if let Some(host) = cli.host.clone() {
        config.link.host = host;
    }
    if let Some(port) = cli.port {
        config.link.port = port;
    }
    if let Some(level) = cli.log_level.clone() {
        config.logging.level = level;
    }
    if let Some(format) = cli.log_format.clone() {
        config.logging.format = format;
    }
    config.validate().map_err(anyhow::Error::msg)?;

    let tracing_config = TracingConfig::from_config(&config).map_err(anyhow::Error::msg)?;
    telemetry::init(tracing_config).map_err(anyhow::Error::msg)?;

    let laser = TunableLaser::connect(&config)
        .await
        .with_context(|| format!("Failed to link with {}", config.link.endpoint()))?;
    println!("🔗 Linked with {}", config.link.endpoint());

    let result = run(&laser, &config, cli.command).await;
    laser.close().await;
    result
}

async fn run(laser: &TunableLaser, config: &Config, command: Commands) -> Result<()> {
    match command {
        Commands::Ping => {
            println!("✅ Controller accepted the link");
            Ok(())
        }
        Commands::Read => {
            let reading = laser.read_wavelength().await?;
            match reading.wavelength {
                Some(wavelength) => println!("📏 {} ({:?})", wavelength, reading.state),
                None => println!("📏 No wavelength reported ({:?}, status {})", reading.state, reading.status),
            }
            Ok(())
        }
        Commands::Tune { wavelength } => {
            let cancel = cancel_on_ctrl_c();
            println!(
                "🎯 Tuning to {} (up to {} polls every {:?})",
                wavelength, config.tuning.poll_budget, config.tuning.poll_interval
            );
            let outcome = laser.tune(wavelength, &cancel).await?;
            report(&outcome)
        }
        Commands::Align { mode } => {
            let cancel = cancel_on_ctrl_c();
            let mode = mode.unwrap_or(config.tuning.alignment_mode);
            println!(
                "🎯 Aligning at {} nm (mode {})",
                config.tuning.alignment_wavelength_nm, mode
            );
            match laser.one_shot_in_mode(mode, &cancel).await? {
                AlignmentStatus::Succeeded => {
                    println!("✅ Beam alignment succeeded (mode {})", mode);
                    Ok(())
                }
                AlignmentStatus::Failed => bail!("Beam alignment failed (mode {})", mode),
                AlignmentStatus::Unrecognized(status) => {
                    bail!("Beam alignment returned unexpected status {}", status)
                }
            }
        }
    }
}

fn report(outcome: &TuningOutcome) -> Result<()> {
    match outcome {
        TuningOutcome::Converged(wavelength) => {
            println!("✅ Converged at {}", wavelength);
            Ok(())
        }
        other => bail!("Tuning {}", other),
    }
}

fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\n🛑 Cancelling after the current poll...");
            trigger.cancel();
        }
    });
    cancel
}
