//! CLI entry point for chrom-daq
//!
//! # Usage
//!
//! Run one experiment record against the simulated rig:
//! ```bash
//! chrom_daq run --record demos/experiment.toml --config demos/chrom-daq.toml
//! ```
//!
//! Show the effective run-time parameters after overrides:
//! ```bash
//! chrom_daq params --config demos/chrom-daq.toml --set running_interval=2s
//! ```

use anyhow::{anyhow, Context, Result};
use chrom_core::SensorKind;
use chrom_daq::{config::DEFAULT_CONFIG_PATH, load_record, logging, AppConfig};
use chrom_driver_mock::{MockRig, MockSensorProbe, MockSpectrometer, SignalProfile};
use chrom_experiment::{ExperimentOrchestrator, ExperimentSettings, ParameterUpdate, RunOutcome};
use chrom_storage::MemoryStore;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "chrom_daq")]
#[command(about = "Chromatography column controller", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one experiment on simulated hardware
    Run {
        /// Experiment record (TOML)
        #[arg(long)]
        record: PathBuf,

        /// Add seeded noise to the simulated probe and spectrometers
        #[arg(long)]
        seed: Option<u64>,

        /// Parameter override, `key=value`; repeatable
        #[arg(long = "set", value_name = "KEY=VALUE")]
        overrides: Vec<String>,
    },

    /// Print the effective run-time parameters as TOML
    Params {
        /// Parameter override, `key=value`; repeatable
        #[arg(long = "set", value_name = "KEY=VALUE")]
        overrides: Vec<String>,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = AppConfig::load_from(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    config.validate()?;

    match cli.command {
        Commands::Run {
            record,
            seed,
            overrides,
        } => {
            logging::init_from_config(&config)?;
            run_experiment(config, record, seed, &overrides).await
        }
        Commands::Params { overrides } => {
            let settings = apply_overrides(config.settings(), &overrides)?;
            print!("{}", toml::to_string_pretty(&settings)?);
            Ok(())
        }
    }
}

fn apply_overrides(mut settings: ExperimentSettings, overrides: &[String]) -> Result<ExperimentSettings> {
    for item in overrides {
        let (key, value) = item
            .split_once('=')
            .ok_or_else(|| anyhow!("override '{item}' is not key=value"))?;
        let update = ParameterUpdate::parse(key.trim(), value.trim())?;
        update.check()?;
        settings = settings.with_update(&update)?;
    }
    Ok(settings)
}

fn simulated_rig(config: &AppConfig, seed: Option<u64>) -> MockRig {
    let rig = MockRig::new(
        config.hardware.pump_addresses.clone(),
        config.hardware.valve_channels.clone(),
    );
    let Some(seed) = seed else {
        return rig;
    };

    let probe = MockSensorProbe::new()
        .with_seed(seed)
        .with_profile(SensorKind::Ph, SignalProfile::Noisy { mean: 6.5, std: 0.005 })
        .with_profile(SensorKind::Orp, SignalProfile::Noisy { mean: 220.0, std: 0.5 })
        .with_profile(
            SensorKind::Conductivity,
            SignalProfile::Noisy { mean: 0.4, std: 0.002 },
        )
        .with_profile(SensorKind::Level, SignalProfile::Noisy { mean: 250.0, std: 0.5 });
    rig.with_probe(probe).with_spectrometers(
        MockSpectrometer::uv().with_noise(2.0).with_seed(seed),
        MockSpectrometer::nir().with_noise(2.0).with_seed(seed.wrapping_add(1)),
    )
}

async fn run_experiment(
    config: AppConfig,
    record_path: PathBuf,
    seed: Option<u64>,
    overrides: &[String],
) -> Result<()> {
    let record = load_record(&record_path)?;
    let experiment_id = record.id;
    let rig = simulated_rig(&config, seed);

    let (settings, hardware) = config.into_settings();
    let settings = apply_overrides(settings, overrides)?;

    let store = Arc::new(MemoryStore::new());
    store.insert_record(record);

    let orchestrator = ExperimentOrchestrator::new(
        rig.device_set(),
        hardware,
        settings,
        store.clone(),
        store.clone(),
    )?;

    tracing::info!(experiment_id, record = %record_path.display(), "Starting experiment");
    orchestrator.start(experiment_id).await?;

    tokio::select! {
        result = orchestrator.wait_idle() => result?,
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("Interrupted, stopping experiment");
            orchestrator.stop().await?;
        }
    }

    let state = orchestrator.state();
    orchestrator.shutdown().await?;

    for line in store.logs(Some(experiment_id)) {
        println!("{line}");
    }
    println!("{}", serde_json::to_string_pretty(&state)?);

    match state.last_outcome {
        Some(RunOutcome::Failed(message)) => Err(anyhow!("experiment {experiment_id} failed: {message}")),
        _ => Ok(()),
    }
}
