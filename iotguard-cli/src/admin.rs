//! Registry and history commands run directly against the SQLite store.

use std::io::Write;
use std::net::Ipv4Addr;

use tracing::info;

use iotguard_capture::CaptureReport;
use iotguard_core::prelude::{Device, DeviceRegistry, EventStore, MacAddr, Threshold};
use iotguard_store::SqliteStore;

use crate::commands::IpsSetArgs;

type CliResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

pub fn list_events<W: Write>(store: &SqliteStore, limit: usize, out: &mut W) -> CliResult {
    let events = store.recent(limit)?;
    if events.is_empty() {
        writeln!(out, "No IPS events recorded")?;
    }
    for event in events {
        writeln!(
            out,
            "{}  {}  {:>10.2} KB/s  {}",
            event.timestamp.format("%Y-%m-%d %H:%M:%S"),
            event.mac,
            event.rate,
            event.action
        )?;
    }
    Ok(())
}

pub fn set_threshold<W: Write>(
    store: &SqliteStore,
    mac: MacAddr,
    max: f64,
    min: f64,
    out: &mut W,
) -> CliResult {
    if !(max.is_finite() && min.is_finite()) || min < 0.0 || max <= 0.0 {
        return Err(format!("invalid rates: max {max}, min {min}").into());
    }
    if min >= max {
        return Err(format!("throttle rate {min} must be below the ceiling {max}").into());
    }
    let threshold = Threshold::new(mac, max, min);
    store.set_threshold(&threshold)?;
    info!(mac = %threshold.mac, max, min, "Threshold updated");
    writeln!(out, "{}: max {} KB/s, min {} KB/s", threshold.mac, max, min)?;
    Ok(())
}

pub fn list_thresholds<W: Write>(store: &SqliteStore, out: &mut W) -> CliResult {
    let thresholds = store.list_thresholds()?;
    if thresholds.is_empty() {
        writeln!(out, "No thresholds configured")?;
    }
    for threshold in thresholds {
        writeln!(
            out,
            "{}  max {:>8} KB/s  min {:>8} KB/s",
            threshold.mac, threshold.max_rate, threshold.min_rate
        )?;
    }
    Ok(())
}

pub fn show_settings<W: Write>(store: &SqliteStore, out: &mut W) -> CliResult {
    let settings = store.ips_config()?;
    write!(out, "{}", serde_yaml::to_string(&settings)?)?;
    Ok(())
}

pub fn update_settings<W: Write>(store: &SqliteStore, args: IpsSetArgs, out: &mut W) -> CliResult {
    let mut settings = store.ips_config()?;
    if let Some(enabled) = args.enabled {
        settings.enabled = enabled;
    }
    if let Some(minutes) = args.throttle_minutes {
        if minutes == 0 {
            return Err("throttle duration must be at least one minute".into());
        }
        settings.throttle_minutes = minutes;
    }
    if let Some(email) = args.email {
        settings.notification_email = Some(email);
    }
    if let Some(phone) = args.phone {
        settings.notification_phone = Some(phone);
    }
    store.update_ips_config(&settings)?;
    info!(enabled = settings.enabled, minutes = settings.throttle_minutes, "IPS settings updated");
    write!(out, "{}", serde_yaml::to_string(&settings)?)?;
    Ok(())
}

pub fn add_device<W: Write>(
    store: &SqliteStore,
    mac: MacAddr,
    name: Option<String>,
    ipv4: Option<Ipv4Addr>,
    vendor: Option<String>,
    out: &mut W,
) -> CliResult {
    let mut device = store.device(&mac)?.unwrap_or_else(|| Device::new(mac));
    if name.is_some() {
        device.name = name;
    }
    if ipv4.is_some() {
        device.ipv4 = ipv4;
    }
    if vendor.is_some() {
        device.vendor = vendor;
    }
    store.save_device(&device)?;
    writeln!(out, "{} ({})", device.mac, device.display_name())?;
    Ok(())
}

pub fn list_devices<W: Write>(store: &SqliteStore, out: &mut W) -> CliResult {
    for device in store.list_devices()? {
        let ipv4 = device.ipv4.map(|ip| ip.to_string()).unwrap_or_else(|| "-".into());
        writeln!(
            out,
            "{}  {:<15}  {:<20}  {}",
            device.mac,
            ipv4,
            device.display_name(),
            device.vendor.as_deref().unwrap_or("-")
        )?;
    }
    Ok(())
}

pub fn history<W: Write>(store: &SqliteStore, mac: &MacAddr, days: u32, out: &mut W) -> CliResult {
    for sample in store.history(mac, days)? {
        writeln!(
            out,
            "{}  {:>10.2} KB/s",
            sample.taken_at.format("%Y-%m-%d %H:%M:%S"),
            sample.kbps
        )?;
    }
    Ok(())
}

pub fn prune<W: Write>(store: &SqliteStore, days: u32, out: &mut W) -> CliResult {
    let removed = store.prune_rates(days)?;
    writeln!(out, "Removed {removed} rate samples older than {days} days")?;
    Ok(())
}

pub fn print_capture<W: Write>(report: &CaptureReport, out: &mut W) -> CliResult {
    writeln!(out, "Capture saved to {}", report.output.display())?;
    let bytes = match report.bytes {
        Some(bytes) => bytes.to_string(),
        None => "unknown".to_string(),
    };
    writeln!(
        out,
        "{bytes} bytes in {:.1}s ({:?})",
        report.elapsed.as_secs_f64(),
        report.outcome
    )?;
    match report.rate_kbps {
        Some(rate) => writeln!(out, "Data rate: {rate:.2} KB/s")?,
        None => writeln!(out, "Data rate: unavailable")?,
    }
    Ok(())
}
