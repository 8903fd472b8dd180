//! Device session setup
//!
//! Builds one session per discovered controller (or one simulated controller
//! in mock mode) and brings them up.

use anyhow::{bail, Context, Result};
use razer_pwm_core::{HidDeviceInfo, StaticConfig, CHANNEL_COUNT};
use razer_pwm_hardware::{
    find_fan_controllers, hid_api, system_guard, AccessGuard, HidTransport, LocalGuard,
    MockTransport, PwmFanControllerDevice,
};
use std::sync::Arc;
use tracing::{info, warn};

/// Serial number of the simulated controller used by `--mock`
pub const MOCK_SERIAL: &str = "MOCK00000001";

pub type Session = Arc<PwmFanControllerDevice>;

/// Create a (disconnected) session for every controller
pub fn open_sessions(config: &StaticConfig, mock: bool) -> Result<Vec<Session>> {
    if mock {
        info!("Mock mode: simulating one controller");
        // Nobody outside this process can see a simulated device
        let guard: Arc<dyn AccessGuard> = Arc::new(LocalGuard::new());
        let transport = MockTransport::new(MOCK_SERIAL);
        return Ok(vec![Arc::new(PwmFanControllerDevice::new(
            Box::new(transport),
            guard,
            config.protocol.clone(),
        ))]);
    }

    let guard: Arc<dyn AccessGuard> = system_guard(&config.guard)
        .with_context(|| format!("Failed to open access guard '{}'", config.guard.name))?;
    let api = hid_api()?;
    let drivers = find_fan_controllers(&api)?;
    if drivers.is_empty() {
        bail!("No Razer PWM fan controllers found. Use --mock for testing without hardware.");
    }

    Ok(drivers
        .into_iter()
        .map(|driver| {
            let transport: Box<dyn HidTransport> = Box::new(driver);
            Arc::new(PwmFanControllerDevice::new(
                transport,
                Arc::clone(&guard),
                config.protocol.clone(),
            ))
        })
        .collect())
}

/// Device metadata without opening anything
pub fn list_devices(mock: bool) -> Result<Vec<HidDeviceInfo>> {
    if mock {
        return Ok(vec![MockTransport::new(MOCK_SERIAL).device_info().clone()]);
    }
    let api = hid_api()?;
    Ok(razer_pwm_hardware::enumerate_devices(&api)?)
}

/// Connect every session and queue the configured startup power
///
/// Blocking. Returns the number of sessions that came up.
pub fn connect_all(sessions: &[Session], config: &StaticConfig) -> usize {
    let mut connected = 0;
    for session in sessions {
        if !session.connect() {
            warn!(
                "{}: Not connected, will retry on the next tick",
                session.name()
            );
            continue;
        }
        connected += 1;

        apply_startup_power(session, config);
        info!(
            "{}: Firmware {}",
            session.name(),
            session.get_firmware_version()
        );
    }
    connected
}

/// Queue the configured startup power on every channel
///
/// Channels missing from `[channels]` get the board default.
pub fn apply_startup_power(session: &Session, config: &StaticConfig) {
    for channel in 0..CHANNEL_COUNT as u8 {
        let percent = config.startup_power(channel);
        if let Err(e) = session.set_channel_power(channel, percent as i32) {
            warn!("{}: Ignoring startup power for channel {}: {}", session.name(), channel, e);
        }
    }
}
