//! CLI Entry Point for fieldbus-scope
//!
//! Provides command-line interface for:
//! - Running the engine against a synthetic bus and printing a JSON summary
//! - Validating a configuration file
//!
//! # Usage
//!
//! ```bash
//! fieldbus-scope simulate --slaves 4 --cycle 1ms --duration 5s --memory-budget 2000000
//! fieldbus-scope check-config config/fieldbus-scope.toml
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use fieldbus_scope::config::ScopeConfig;
use fieldbus_scope::simulator::{BusSimulator, SimulationConfig};
use fieldbus_scope::tracing_setup::{self, OutputFormat, TracingConfig};
use fieldbus_scope::{
    acquisition_channel, BackgroundTasks, BatchDrain, BusLayout, IngestRates, StorageWriter,
    TaskSummary, TelemetryStore, WriterReport,
};
use scope_core::{StatisticCategory, StatisticKind, StatisticScope, Timestamp};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::info;

#[derive(Parser)]
#[command(name = "fieldbus-scope")]
#[command(about = "Concurrent time-series storage for fieldbus telemetry", long_about = None)]
struct Cli {
    /// Configuration file (TOML); FIELDBUS_SCOPE_* variables override it
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Compact)]
    log_format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Drive the engine with a synthetic bus
    Simulate {
        /// Number of slaves
        #[arg(long, default_value = "4")]
        slaves: u16,

        /// Bus cycle time
        #[arg(long, default_value = "1ms", value_parser = humantime_serde::re::humantime::parse_duration)]
        cycle: Duration,

        /// How long to run
        #[arg(long, default_value = "2s", value_parser = humantime_serde::re::humantime::parse_duration)]
        duration: Duration,

        /// Process image bytes per cycle
        #[arg(long, default_value = "64")]
        process_image: usize,

        /// Memory ceiling in bytes, overrides the configuration
        #[arg(long)]
        memory_budget: Option<usize>,

        /// Probability per cycle that an error counter increments
        #[arg(long, default_value = "0.01")]
        error_rate: f64,

        /// Seed for a reproducible run
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Load and validate a configuration file, then print it
    CheckConfig {
        /// Path to the TOML file
        path: PathBuf,
    },
}

#[derive(Serialize)]
struct SimulationSummary {
    cycles: u64,
    series: usize,
    memory_usage: usize,
    memory_budget: usize,
    nodes_reclaimed: u64,
    ingest: IngestRates,
    writer: WriterReport,
    tasks: TaskSummary,
    global_totals: Vec<(String, f64)>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::CheckConfig { path } => check_config(&path),
        Commands::Simulate {
            slaves,
            cycle,
            duration,
            process_image,
            memory_budget,
            error_rate,
            seed,
        } => {
            let config = load_config(cli.config.as_deref())?;
            tracing_setup::init(
                TracingConfig::from_scope_config(&config)?.with_format(cli.log_format),
            )?;
            let layout = BusLayout {
                slave_count: slaves,
                process_image_len: process_image,
            };
            let sim = SimulationConfig {
                cycle,
                process_image_len: process_image,
                error_rate,
                seed,
            };
            simulate(config, layout, sim, duration, memory_budget).await
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<ScopeConfig> {
    let config = match path {
        Some(path) => ScopeConfig::load_from(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => ScopeConfig::from_env().context("loading configuration from environment")?,
    };
    Ok(config)
}

fn check_config(path: &Path) -> Result<()> {
    let config = load_config(Some(path))?;
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

async fn simulate(
    config: ScopeConfig,
    layout: BusLayout,
    sim: SimulationConfig,
    duration: Duration,
    memory_budget: Option<usize>,
) -> Result<()> {
    let store = Arc::new(TelemetryStore::new(&config, layout)?);
    if let Some(bytes) = memory_budget {
        store.set_memory_budget(bytes);
    }
    let engine = store.statistics_engine(config.statistics.engine_config())?;

    let (mut producer, consumer) = acquisition_channel(config.acquisition.batch_capacity_bytes);
    let writer = StorageWriter::spawn(
        BatchDrain::new(Arc::clone(&store), consumer),
        config.acquisition.writer_idle,
    )
    .context("starting storage writer")?;
    let tasks = BackgroundTasks::spawn(Arc::clone(&store), engine, &config);

    info!(
        slaves = layout.slave_count,
        cycle_us = sim.cycle.as_micros() as u64,
        duration_ms = duration.as_millis() as u64,
        "simulation started"
    );
    let mut bus = BusSimulator::new(store.catalog(), sim.clone(), Timestamp::now());
    let mut ticker = tokio::time::interval(sim.cycle);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let deadline = tokio::time::sleep(duration);
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                bus.cycle(&mut producer);
            }
            _ = &mut deadline => break,
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break;
            }
        }
    }

    let writer = writer.shutdown();
    let tasks = tasks.shutdown().await;

    let mut global_totals = Vec::new();
    for kind in StatisticKind::ALL {
        let key = store.get_statistic(kind, StatisticCategory::Total, StatisticScope::Global)?;
        let total = store
            .registry()
            .reals(&key)?
            .latest()
            .map_or(0.0, |point| point.value);
        global_totals.push((kind.name().to_string(), total));
    }

    let summary = SimulationSummary {
        cycles: bus.cycles(),
        series: store.registry().len(),
        memory_usage: store.memory_usage(),
        memory_budget: store.memory_budget(),
        nodes_reclaimed: store.reclaimer().total_nodes_freed(),
        ingest: store.ingest_rates(),
        writer,
        tasks,
        global_totals,
    };
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
