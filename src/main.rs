//! CLI Entry Point for chamber-daq
//!
//! Provides command-line access to the scan engine:
//! - `validate`: check a configuration and print the grid it describes
//! - `run`: execute the configured scan against simulated hardware
//!
//! # Usage
//!
//! ```bash
//! chamber-daq validate config/chamber.toml
//! chamber-daq run config/chamber.toml --summary-json scan-summary.json
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use chamber_daq::config::ChamberConfig;
use chamber_daq::experiment::{FaultDescriptor, ScanEngine, ScanOutcome, ScanPlan, SessionState};
use chamber_daq::logging;
use chamber_daq::units::format_frequency;

#[derive(Parser)]
#[command(name = "chamber-daq")]
#[command(about = "Antenna pattern acquisition for anechoic chambers", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a configuration file and print the scan grid
    Validate {
        /// Path to the chamber TOML configuration
        config: PathBuf,
    },

    /// Run the configured scan against simulated hardware
    Run {
        /// Path to the chamber TOML configuration
        config: PathBuf,

        /// Write a JSON summary of the outcome to this file
        #[arg(long)]
        summary_json: Option<PathBuf>,
    },
}

/// Outcome summary written by `run --summary-json`.
#[derive(Serialize)]
struct RunSummary<'a> {
    session_id: uuid::Uuid,
    state: SessionState,
    fault: Option<&'a FaultDescriptor>,
    total_points: usize,
    points_processed: usize,
    samples: usize,
    faulted_points: Vec<&'a FaultDescriptor>,
    started_at: chrono::DateTime<chrono::Utc>,
    finished_at: Option<chrono::DateTime<chrono::Utc>>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Validate { config } => validate(&config),
        Commands::Run {
            config,
            summary_json,
        } => run(&config, summary_json.as_deref()).await,
    }
}

fn load(path: &Path) -> Result<(ChamberConfig, ScanPlan)> {
    let config = ChamberConfig::load_from(path)
        .with_context(|| format!("Failed to load configuration from {}", path.display()))?;
    config.validate().context("Invalid configuration")?;
    let plan = config.plan().context("Invalid scan plan")?;
    Ok((config, plan))
}

fn validate(path: &Path) -> Result<()> {
    let (config, plan) = load(path)?;

    println!("Configuration: {}", config.application.name);
    print_plan(&plan);
    println!("Plan is valid.");
    Ok(())
}

fn print_plan(plan: &ScanPlan) {
    let az = plan.azimuth().range();
    let el = plan.elevation().range();
    let frequencies = plan.frequencies();

    println!(
        "  Azimuth:       {}° to {}° step {}° ({} positions)",
        az.start,
        az.stop,
        az.step,
        plan.azimuth_count()
    );
    println!(
        "  Elevation:     {}° to {}° step {}° ({} positions)",
        el.start,
        el.stop,
        el.step,
        plan.elevation_count()
    );
    if let (Some(first), Some(last)) = (frequencies.first(), frequencies.last()) {
        println!(
            "  Frequencies:   {} points, {} to {}",
            frequencies.len(),
            format_frequency(*first),
            format_frequency(*last)
        );
    }
    let polarizations: Vec<String> = plan.polarizations().iter().map(ToString::to_string).collect();
    println!("  Polarizations: {}", polarizations.join(", "));
    println!("  Raster order:  {:?}", plan.raster_order());
    println!("  Settle time:   {:?}", plan.settle_time());
    println!("  Averages:      {}", plan.averages());
    println!(
        "  Grid points:   {} ({} samples)",
        plan.total_points(),
        plan.total_points() * plan.samples_per_point()
    );
}

async fn run(path: &Path, summary_json: Option<&Path>) -> Result<()> {
    let (config, plan) = load(path)?;
    logging::init_from_config(&config)
        .map_err(anyhow::Error::msg)
        .context("Failed to initialize logging")?;

    info!(name = %config.application.name, "Chamber DAQ starting with simulated hardware");
    print_plan(&plan);

    let engine = ScanEngine::new(config.engine.clone());
    let hardware = config.simulation.build();
    let session = engine.start_plan(plan, hardware, config.fault_policy.clone());
    let mut events = session.subscribe();

    let mut ctrl_c = std::pin::pin!(tokio::signal::ctrl_c());
    let mut interrupted = false;
    // The final event may precede the subscription
    let mut finished = session.state().await.is_terminal();
    while !finished {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => {
                    info!(
                        state = %event.state,
                        completed = event.completed_points,
                        total = event.total_points,
                        angle = ?event.current_angle,
                        "Progress"
                    );
                    finished = event.state.is_terminal();
                }
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Progress events dropped"),
                Err(RecvError::Closed) => finished = true,
            },
            _ = &mut ctrl_c, if !interrupted => {
                interrupted = true;
                warn!("Interrupted, cancelling scan");
                if let Err(err) = session.cancel().await {
                    warn!(error = %err, "Cancel rejected");
                }
            }
        }
    }

    let outcome = session.wait().await.context("Scan session failed")?;
    print_outcome(&outcome);

    if let Some(summary_path) = summary_json {
        write_summary(&outcome, summary_path)?;
        println!("Summary written to {}", summary_path.display());
    }
    Ok(())
}

fn print_outcome(outcome: &ScanOutcome) {
    let dataset = &outcome.dataset;
    println!();
    println!("Session {} finished: {}", outcome.session_id, outcome.state);
    println!(
        "  Points processed: {}/{}",
        dataset.points_processed(),
        dataset.plan().total_points()
    );
    println!("  Samples:          {}", dataset.len());
    println!("  Faulted points:   {}", dataset.faulted_points().len());
    if let Some(fault) = &outcome.fault {
        println!("  Cause:            {}", fault);
    }
}

fn write_summary(outcome: &ScanOutcome, path: &Path) -> Result<()> {
    let dataset = &outcome.dataset;
    let metadata = dataset.metadata();
    let summary = RunSummary {
        session_id: outcome.session_id,
        state: outcome.state,
        fault: outcome.fault.as_ref(),
        total_points: dataset.plan().total_points(),
        points_processed: dataset.points_processed(),
        samples: dataset.len(),
        faulted_points: dataset.faulted_points(),
        started_at: metadata.started_at,
        finished_at: metadata.finished_at,
    };
    let json = serde_json::to_string_pretty(&summary)?;
    std::fs::write(path, json)
        .with_context(|| format!("Failed to write summary to {}", path.display()))?;
    Ok(())
}
