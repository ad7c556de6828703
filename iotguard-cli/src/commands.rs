use std::io;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use tracing::info;

use iotguard_config::IotGuardConfig;
use iotguard_core::prelude::MacAddr;
use iotguard_engine::{run_manual_capture, run_production_mode};
use iotguard_store::SqliteStore;
use iotguard_telemetry::EventLogger;

use crate::admin;

#[derive(Parser, Debug)]
#[command(name = "iotguard", version, about)]
pub struct Cli {
    /// Configuration file; defaults to config/iotguard.yaml plus environment overlays
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the anomaly monitor until Ctrl-C
    Run,
    /// Capture one device's traffic on request
    Capture(CaptureArgs),
    /// List recent IPS events, newest first
    Events(EventsArgs),
    /// Per-device rate thresholds
    #[command(subcommand)]
    Threshold(ThresholdCommand),
    /// Live IPS settings
    #[command(subcommand)]
    Ips(IpsCommand),
    /// Device records
    #[command(subcommand)]
    Device(DeviceCommand),
    /// Recorded data rates of one device, oldest first
    History(HistoryArgs),
    /// Delete rate history older than the retention window
    Prune(PruneArgs),
}

#[derive(Args, Debug, Clone)]
pub struct CaptureArgs {
    pub mac: MacAddr,
    /// Capture length in seconds; 0 runs until Ctrl-C
    #[arg(short, long, default_value_t = 0)]
    pub duration: u64,
}

#[derive(Args, Debug, Clone)]
pub struct EventsArgs {
    #[arg(short, long, default_value_t = 50)]
    pub limit: usize,
}

#[derive(Subcommand, Debug, Clone)]
pub enum ThresholdCommand {
    /// Create or replace the threshold of a device
    Set {
        mac: MacAddr,
        /// Violation ceiling in KB/s
        #[arg(long)]
        max: f64,
        /// Throttle target in KB/s
        #[arg(long)]
        min: f64,
    },
    List,
}

#[derive(Subcommand, Debug, Clone)]
pub enum IpsCommand {
    Show,
    /// Update the given fields, keeping the others
    Set(IpsSetArgs),
}

#[derive(Args, Debug, Clone, Default)]
pub struct IpsSetArgs {
    #[arg(long)]
    pub enabled: Option<bool>,
    #[arg(long)]
    pub throttle_minutes: Option<u32>,
    /// Alert address; an empty value disables email alerts
    #[arg(long)]
    pub email: Option<String>,
    #[arg(long)]
    pub phone: Option<String>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum DeviceCommand {
    Add {
        mac: MacAddr,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        ipv4: Option<Ipv4Addr>,
        #[arg(long)]
        vendor: Option<String>,
    },
    List,
}

#[derive(Args, Debug, Clone)]
pub struct HistoryArgs {
    pub mac: MacAddr,
    #[arg(long, default_value_t = 1)]
    pub days: u32,
}

#[derive(Args, Debug, Clone)]
pub struct PruneArgs {
    /// Retention in days; defaults to store.rate_retention_days
    #[arg(long)]
    pub days: Option<u32>,
}

fn load_config(path: Option<&PathBuf>) -> Result<IotGuardConfig, iotguard_config::ConfigError> {
    match path {
        Some(path) => IotGuardConfig::load_from_path(path),
        None => IotGuardConfig::load(),
    }
}

fn open_store(config: &IotGuardConfig) -> Result<SqliteStore, iotguard_core::IpsError> {
    SqliteStore::open(&config.store.path)
}

pub async fn run_command(cli: Cli) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let config = load_config(cli.config.as_ref())?;
    EventLogger::init(&config.telemetry.log_level);
    let mut out = io::stdout();

    match cli.command {
        Commands::Run => run_production_mode(config).await?,
        Commands::Capture(args) => {
            let report =
                run_manual_capture(config, args.mac, Duration::from_secs(args.duration)).await?;
            info!(outcome = ?report.outcome, "Capture finished");
            admin::print_capture(&report, &mut out)?;
        }
        Commands::Events(args) => admin::list_events(&open_store(&config)?, args.limit, &mut out)?,
        Commands::Threshold(ThresholdCommand::Set { mac, max, min }) => {
            admin::set_threshold(&open_store(&config)?, mac, max, min, &mut out)?
        }
        Commands::Threshold(ThresholdCommand::List) => {
            admin::list_thresholds(&open_store(&config)?, &mut out)?
        }
        Commands::Ips(IpsCommand::Show) => admin::show_settings(&open_store(&config)?, &mut out)?,
        Commands::Ips(IpsCommand::Set(args)) => {
            admin::update_settings(&open_store(&config)?, args, &mut out)?
        }
        Commands::Device(DeviceCommand::Add {
            mac,
            name,
            ipv4,
            vendor,
        }) => admin::add_device(&open_store(&config)?, mac, name, ipv4, vendor, &mut out)?,
        Commands::Device(DeviceCommand::List) => admin::list_devices(&open_store(&config)?, &mut out)?,
        Commands::History(args) => {
            admin::history(&open_store(&config)?, &args.mac, args.days, &mut out)?
        }
        Commands::Prune(args) => {
            let days = args.days.unwrap_or(config.store.rate_retention_days);
            admin::prune(&open_store(&config)?, days, &mut out)?
        }
    }
    Ok(())
}
