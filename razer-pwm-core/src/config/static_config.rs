//! Static configuration loaded once at startup
//!
//! This configuration is read-only after the daemon starts.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::board::{validate_channel, BoardConfig, DefaultBoard};
use crate::types::PERCENT_MAX;
use crate::{RazerPwmError, Result};

/// Host polling configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollerConfig {
    /// Refresh tick period in milliseconds
    pub interval_ms: u64,
    /// Reopen a device on the next tick after a disconnect-class failure
    pub reconnect: bool,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval_ms: 1000,
            reconnect: true,
        }
    }
}

impl PollerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// Transaction timing for the feature-report protocol
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// Delay between a write and its read, and between busy re-reads
    pub read_delay_ms: u64,
    /// Give up on a busy device after this long
    pub read_timeout_ms: u64,
    /// Resend every channel's power at least this often
    pub force_write_interval_ms: u64,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            read_delay_ms: 5,
            read_timeout_ms: 500,
            force_write_interval_ms: 2500,
        }
    }
}

impl ProtocolConfig {
    pub fn read_delay(&self) -> Duration {
        Duration::from_millis(self.read_delay_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn force_write_interval(&self) -> Duration {
        Duration::from_millis(self.force_write_interval_ms)
    }
}

/// Identity of the system-wide access guard
///
/// Every process that talks to these controllers must agree on the name,
/// otherwise their transactions interleave.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    /// Mutex name (Windows: `Global\<name>`, Unix: `<lock_dir>/<name>.lock`)
    pub name: String,
    /// Directory holding the Unix lock file
    pub lock_dir: PathBuf,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            name: "RazerReadWriteGuardMutex".to_string(),
            lock_dir: PathBuf::from("/tmp"),
        }
    }
}

/// Shutdown behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShutdownConfig {
    /// Apply `power_percent` to every channel before exiting
    pub enabled: bool,
    /// Power left on the fans once the daemon is gone
    pub power_percent: u8,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            power_percent: 100,
        }
    }
}

/// Static configuration for the razer-pwm daemon.
///
/// Located at `~/.config/razer-pwm/config.toml` by default.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StaticConfig {
    #[serde(default)]
    pub poller: PollerConfig,

    #[serde(default)]
    pub protocol: ProtocolConfig,

    #[serde(default)]
    pub guard: GuardConfig,

    #[serde(default)]
    pub shutdown: ShutdownConfig,

    /// Startup power per channel, applied after connecting
    ///
    /// Keys are stringified channel indices ("0", "1", etc.) for TOML compatibility.
    #[serde(
        serialize_with = "serialize_channels",
        deserialize_with = "deserialize_channels",
        default
    )]
    pub channels: BTreeMap<u8, u8>,
}

impl StaticConfig {
    /// Parse StaticConfig from TOML string.
    pub fn from_toml(content: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Serialize StaticConfig to TOML string.
    pub fn to_toml(&self) -> std::result::Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    /// Check values the type system cannot
    pub fn validate(&self) -> Result<()> {
        if self.poller.interval_ms == 0 {
            return Err(RazerPwmError::Config(
                "poller.interval_ms must be greater than 0".to_string(),
            ));
        }
        if self.protocol.read_timeout_ms < self.protocol.read_delay_ms {
            return Err(RazerPwmError::Config(format!(
                "protocol.read_timeout_ms ({}) must not be shorter than protocol.read_delay_ms ({})",
                self.protocol.read_timeout_ms, self.protocol.read_delay_ms
            )));
        }
        if self.guard.name.is_empty() || self.guard.name.contains(['/', '\\']) {
            return Err(RazerPwmError::Config(format!(
                "guard.name '{}' must be non-empty and contain no path separators",
                self.guard.name
            )));
        }
        if self.shutdown.power_percent > PERCENT_MAX {
            return Err(RazerPwmError::Config(format!(
                "shutdown.power_percent must be 0-{}, got {}",
                PERCENT_MAX, self.shutdown.power_percent
            )));
        }
        for (&channel, &percent) in &self.channels {
            validate_channel(channel).map_err(|e| RazerPwmError::Config(e.to_string()))?;
            if percent > PERCENT_MAX {
                return Err(RazerPwmError::Config(format!(
                    "channels.{} must be 0-{}, got {}",
                    channel, PERCENT_MAX, percent
                )));
            }
        }
        Ok(())
    }

    /// Startup power for a channel, falling back to the board default
    pub fn startup_power(&self, channel: u8) -> u8 {
        self.channels
            .get(&channel)
            .copied()
            .unwrap_or(DefaultBoard::DEFAULT_POWER_PERCENT)
    }
}

// Custom serialization: BTreeMap<u8, u8> -> map with string keys for TOML
fn serialize_channels<S>(
    channels: &BTreeMap<u8, u8>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    use serde::ser::SerializeMap;
    let mut map = serializer.serialize_map(Some(channels.len()))?;
    for (k, v) in channels {
        map.serialize_entry(&k.to_string(), v)?;
    }
    map.end()
}

// Custom deserialization: string keys -> BTreeMap<u8, u8>
fn deserialize_channels<'de, D>(deserializer: D) -> std::result::Result<BTreeMap<u8, u8>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error;
    let string_map: BTreeMap<String, u8> = BTreeMap::deserialize(deserializer)?;

    string_map
        .into_iter()
        .map(|(k, v)| {
            k.parse::<u8>()
                .map(|channel| (channel, v))
                .map_err(|_| D::Error::custom(format!("invalid channel index: {}", k)))
        })
        .collect()
}
