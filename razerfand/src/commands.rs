//! One-shot subcommands: list, info, set

use crate::devices::{self, Session};
use anyhow::{bail, Result};
use razer_pwm_core::{validate_channel, HidDeviceInfo, SessionState, SpeedSensor, StaticConfig};
use serde::Serialize;
use tracing::warn;

/// Print the controllers that are plugged in
pub fn list(mock: bool, json: bool) -> Result<()> {
    let devices = devices::list_devices(mock)?;
    println!("{}", format_device_list(&devices, json)?);
    Ok(())
}

fn format_device_list(devices: &[HidDeviceInfo], json: bool) -> Result<String> {
    if json {
        return Ok(serde_json::to_string_pretty(devices)?);
    }
    if devices.is_empty() {
        return Ok("No fan controllers found".to_string());
    }
    Ok(devices
        .iter()
        .map(|d| {
            format!(
                "{}  {:04x}:{:04x}  {}",
                d.display_name(),
                d.vendor_id,
                d.product_id,
                d.path
            )
        })
        .collect::<Vec<_>>()
        .join("\n"))
}

#[derive(Debug, Serialize)]
struct DeviceReport {
    name: String,
    state: SessionState,
    firmware: String,
    sensors: Vec<SpeedSensor>,
}

fn format_report(report: &DeviceReport) -> String {
    let mut out = format!(
        "{} [{}]\n  Firmware: {}",
        report.name,
        report.state.as_str(),
        report.firmware
    );
    for sensor in &report.sensors {
        out.push_str(&format!("\n  {}: {} RPM", sensor.name, sensor.rpm));
    }
    out
}

/// Connect, sample once and report firmware plus fan speeds
///
/// Blocking. Connecting switches every channel to manual mode, but no power
/// is written, so fans keep whatever another process last set.
pub fn info(sessions: &[Session], json: bool) -> Result<()> {
    let mut reports = Vec::new();
    for session in sessions {
        if !session.connect() {
            warn!("{}: Not connected", session.name());
            continue;
        }
        if let Err(e) = session.read_speeds() {
            warn!("{}: Failed to read fan speeds: {}", session.name(), e);
        }
        reports.push(report(session));
        session.disconnect();
    }
    if reports.is_empty() {
        bail!("No controller could be connected");
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    } else {
        for report in &reports {
            println!("{}", format_report(report));
        }
    }
    Ok(())
}

/// Set one channel on every controller and report the result
///
/// Blocking.
pub fn set(sessions: &[Session], config: &StaticConfig, channel: u8, percent: u8) -> Result<()> {
    validate_channel(channel)?;
    if devices::connect_all(sessions, config) == 0 {
        bail!("No controller could be connected");
    }

    let mut failed = 0;
    for session in sessions.iter().filter(|s| s.is_connected()) {
        session.set_channel_power(channel, percent as i32)?;
        match session.refresh() {
            Ok(()) => println!("{}", format_report(&report(session))),
            Err(e) => {
                warn!("{}: Failed to apply power: {}", session.name(), e);
                failed += 1;
            }
        }
        session.disconnect();
    }

    if failed > 0 {
        bail!("{} controller(s) failed to apply the new power", failed);
    }
    Ok(())
}

fn report(session: &Session) -> DeviceReport {
    DeviceReport {
        name: session.name().to_string(),
        state: session.state(),
        firmware: session.get_firmware_version(),
        sensors: session.speed_sensors(),
    }
}
