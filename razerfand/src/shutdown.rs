//! Shutdown handling for graceful daemon termination
//!
//! Leaves every fan at a safe power before the daemon lets go of the devices,
//! so fans keep spinning while the system finishes shutting down.

use crate::devices::Session;
use razer_pwm_core::{ShutdownConfig, CHANNEL_COUNT};
use tracing::{info, warn};

/// Apply the shutdown power to every connected device, then disconnect all
///
/// Blocking. Failures are logged per device and never stop the others.
pub fn apply_shutdown_power(config: &ShutdownConfig, sessions: &[Session]) {
    if !config.enabled {
        info!("Shutdown power disabled in config");
    }

    for session in sessions {
        if config.enabled && session.is_connected() {
            info!(
                "{}: Setting all channels to {}% before exit",
                session.name(),
                config.power_percent
            );
            for channel in 0..CHANNEL_COUNT as u8 {
                if let Err(e) = session.set_channel_power(channel, config.power_percent as i32) {
                    warn!("{}: Failed to set channel {}: {}", session.name(), channel, e);
                }
            }
            if let Err(e) = session.refresh() {
                warn!("{}: Failed to apply shutdown power: {}", session.name(), e);
            }
        } else if config.enabled {
            warn!(
                "{}: Not connected, cannot apply shutdown power",
                session.name()
            );
        }

        session.disconnect();
    }
}
