//! ## iotguard-cli
//! **Operator interface for the IoT Guardian IPS**
//!
//! Runs the anomaly monitor, takes manual captures and edits the device
//! registry (thresholds, IPS settings, device records) in the SQLite store.

use clap::Parser;

mod admin;
mod commands;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let cli = Cli::parse();
    commands::run_command(cli).await
}
