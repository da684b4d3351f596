//! CLI Entry Point for station_daq
//!
//! Headless front end of the acquisition engine:
//! - `run` starts the configured stations and logs their events until Ctrl-C
//! - `check` reads both devices of one station once and prints the decoded values
//!
//! # Usage
//!
//! ```bash
//! station_daq run --config config/station_daq.toml --station 1 --station 3
//! station_daq check --station 2
//! ```

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use station_daq::channels::ChannelSet;
use station_daq::config::{Settings, StationConfig, DEFAULT_CONFIG_PATH};
use station_daq::hardware::{PowerMeterClient, TemperatureClient};
use station_daq::station::{
    format_temperature, BroadcastEventSink, StationEvent, StationId, Supervisor,
};
use station_daq::tracing_setup::{self, OutputFormat, TracingConfig};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;

#[derive(Parser)]
#[command(name = "station_daq")]
#[command(about = "Multi-station temperature and power acquisition", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Log format: pretty, compact or json
    #[arg(long, global = true, default_value = "compact")]
    log_format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start stations and collect until Ctrl-C
    Run {
        /// Station numbers to start (default: every configured station)
        #[arg(long = "station")]
        stations: Vec<u8>,
    },

    /// Read both devices of one station once
    Check {
        #[arg(long)]
        station: u8,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings = Settings::load_from(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    settings.validate()?;

    let tracing_config = TracingConfig::from_settings(&settings)?.with_format(cli.log_format);
    tracing_setup::init(tracing_config)?;
    tracing::info!("{} starting", settings.application.name);

    match cli.command {
        Commands::Run { stations } => run(&settings, &stations).await,
        Commands::Check { station } => check(&settings, station).await,
    }
}

async fn run(settings: &Settings, requested: &[u8]) -> Result<()> {
    let configs = select_stations(settings, requested)?;
    if configs.is_empty() {
        bail!("No stations configured in the settings file");
    }

    let events = Arc::new(BroadcastEventSink::new(256));
    let mut rx = events.subscribe();
    let supervisor = Supervisor::new(&settings.acquisition, events);

    for config in &configs {
        if let Err(e) = supervisor.start(config).await {
            tracing::error!("{} failed to start: {}", config.id, e);
        }
    }
    if supervisor.active_stations().is_empty() {
        bail!("No station could be started");
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Ctrl-C received, stopping stations");
                break;
            }
            event = rx.recv() => match event {
                Ok(event) => log_event(&event),
                Err(RecvError::Lagged(missed)) => {
                    tracing::warn!("Event log fell behind, {} events skipped", missed);
                }
                Err(RecvError::Closed) => break,
            }
        }
    }

    supervisor.stop_all().await;
    supervisor.shutdown().await?;
    Ok(())
}

fn select_stations(settings: &Settings, requested: &[u8]) -> Result<Vec<StationConfig>> {
    if requested.is_empty() {
        return Ok(settings.stations.clone());
    }
    requested
        .iter()
        .map(|&n| {
            let id = StationId::new(n)?;
            settings
                .station(id)
                .cloned()
                .with_context(|| format!("{} is not configured", id))
        })
        .collect()
}

fn log_event(event: &StationEvent) {
    match event {
        StationEvent::SampleReady { station, sample } => {
            let temperatures: Vec<String> = sample
                .temperatures
                .iter()
                .map(|t| format_temperature(*t))
                .collect();
            tracing::info!(
                "{}: [{}] {} V {} A {} W {} Wh",
                station,
                temperatures.join(", "),
                sample.voltage,
                sample.current,
                sample.power,
                sample.accumulated_energy
            );
        }
        StationEvent::Error { station, kind, message } => {
            tracing::warn!("{} ({}): {}", station, kind, message);
        }
        StationEvent::StateChanged { station, active } => {
            tracing::info!(
                "{} is now {}",
                station,
                if *active { "collecting" } else { "idle" }
            );
        }
    }
}

async fn check(settings: &Settings, number: u8) -> Result<()> {
    let id = StationId::new(number)?;
    let config = settings
        .station(id)
        .cloned()
        .unwrap_or_else(|| StationConfig::new(id, "."));
    let channels = ChannelSet::parse(&config.channels)?;
    let addresses = config.addresses();
    let timeouts = settings.acquisition.timeouts();

    let mut recorder = TemperatureClient::new(timeouts);
    recorder
        .connect(&addresses.temperature)
        .await
        .with_context(|| format!("{} temperature recorder", id))?;
    let bank = recorder.read_bank().await;
    recorder.disconnect().await;

    let mut meter = PowerMeterClient::new(timeouts);
    meter
        .connect(&addresses.power_meter)
        .await
        .with_context(|| format!("{} power meter", id))?;
    let reading = meter.query().await;
    meter.disconnect().await;

    println!("{} ({} / {})", id, addresses.temperature, addresses.power_meter);
    match bank {
        Ok(bank) => {
            for (channel, value) in channels.iter().zip(channels.select(&bank)) {
                println!("  CH{:02}: {} °C", channel, format_temperature(Some(value)));
            }
        }
        Err(e) => println!("  temperature read failed: {}", e),
    }
    match reading {
        Ok(r) => println!(
            "  U {} V  I {} A  P {} W  WP {} Wh",
            r.voltage, r.current, r.power, r.energy
        ),
        Err(e) => println!("  power meter read failed: {}", e),
    }
    Ok(())
}
