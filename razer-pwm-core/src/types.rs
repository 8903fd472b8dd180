//! Core types and data structures shared across the workspace

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lowest requested power percentage
pub const PERCENT_MIN: u8 = 0;

/// Highest requested power percentage
pub const PERCENT_MAX: u8 = 100;

/// Device status byte carried at offset 1 of every response frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceStatus {
    /// 0x00, also the value every request carries
    Default,
    /// 0x01, previous command still processing
    Busy,
    /// 0x02
    Success,
    /// 0x03
    Error,
    /// Any byte the firmware is not known to send
    Unknown(u8),
}

impl DeviceStatus {
    /// Wire representation
    pub fn as_byte(self) -> u8 {
        match self {
            DeviceStatus::Default => 0x00,
            DeviceStatus::Busy => 0x01,
            DeviceStatus::Success => 0x02,
            DeviceStatus::Error => 0x03,
            DeviceStatus::Unknown(b) => b,
        }
    }
}

impl From<u8> for DeviceStatus {
    fn from(b: u8) -> Self {
        match b {
            0x00 => DeviceStatus::Default,
            0x01 => DeviceStatus::Busy,
            0x02 => DeviceStatus::Success,
            0x03 => DeviceStatus::Error,
            other => DeviceStatus::Unknown(other),
        }
    }
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceStatus::Unknown(b) => write!(f, "Unknown(0x{:02X})", b),
            other => write!(f, "{:?}", other),
        }
    }
}

/// Metadata describing one HID device interface
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HidDeviceInfo {
    /// Platform-specific device path
    pub path: String,
    pub vendor_id: u16,
    pub product_id: u16,
    pub product_name: String,
    pub serial_number: String,
}

impl HidDeviceInfo {
    /// Display name used to key log messages: `"<product> (<serial>)"`
    pub fn display_name(&self) -> String {
        format!("{} ({})", self.product_name, self.serial_number)
    }
}

/// Per-channel fan speed reading
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpeedSensor {
    /// Human-readable name, e.g. "Fan #1"
    pub name: String,
    /// Channel index (0-based)
    pub channel: u8,
    /// Last observed RPM
    pub rpm: i32,
    /// Whether the channel accepts power control
    pub supports_control: bool,
}

impl SpeedSensor {
    /// Create a controllable sensor for a channel with RPM defaulted to zero
    pub fn for_channel(channel: u8) -> Self {
        Self {
            name: format!("Fan #{}", channel as u16 + 1),
            channel,
            rpm: 0,
            supports_control: true,
        }
    }
}

/// Firmware version reported by the Info/GetVersion command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirmwareVersion {
    pub major: u8,
    pub minor: u8,
}

impl fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Connectivity state of a device session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// Transport closed
    Disconnected,
    /// Transport opening, channels being initialized
    Connecting,
    /// Transport open, channels initialized
    Ready,
}

impl SessionState {
    /// Get a string representation for logs and CLI output
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::Ready => "ready",
        }
    }
}

/// Clamp an arbitrary requested power into 0..=100
#[inline]
pub fn clamp_percent(percent: i32) -> u8 {
    percent.clamp(PERCENT_MIN as i32, PERCENT_MAX as i32) as u8
}

/// Convert a power percentage (0-100) to the device's fractional byte
///
/// `floor((percent * 255 + 50) / 100)`:
/// - 0% → 0
/// - 50% → 128
/// - 100% → 255
#[inline]
pub fn to_fractional_byte(percent: u8) -> u8 {
    let percent = percent.min(PERCENT_MAX) as u32;
    ((percent * 255 + 50) / 100) as u8
}

/// Convert a fractional byte back to a power percentage
///
/// `floor((100 * fractional + 127) / 255)`
#[inline]
pub fn from_fractional_byte(fractional: u8) -> u8 {
    ((100 * fractional as u32 + 127) / 255) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_status_from_byte() {
        assert_eq!(DeviceStatus::from(0x00), DeviceStatus::Default);
        assert_eq!(DeviceStatus::from(0x01), DeviceStatus::Busy);
        assert_eq!(DeviceStatus::from(0x02), DeviceStatus::Success);
        assert_eq!(DeviceStatus::from(0x03), DeviceStatus::Error);
        assert_eq!(DeviceStatus::from(0x7F), DeviceStatus::Unknown(0x7F));
    }

    #[test]
    fn test_device_status_byte_roundtrip() {
        for b in 0..=u8::MAX {
            assert_eq!(DeviceStatus::from(b).as_byte(), b);
        }
    }

    #[test]
    fn test_device_status_display() {
        assert_eq!(DeviceStatus::Busy.to_string(), "Busy");
        assert_eq!(DeviceStatus::Unknown(0x10).to_string(), "Unknown(0x10)");
    }

    #[test]
    fn test_speed_sensor_for_channel() {
        let sensor = SpeedSensor::for_channel(0);
        assert_eq!(sensor.name, "Fan #1");
        assert_eq!(sensor.rpm, 0);
        assert!(sensor.supports_control);

        assert_eq!(SpeedSensor::for_channel(7).name, "Fan #8");
    }

    #[test]
    fn test_display_name() {
        let info = HidDeviceInfo {
            path: "/dev/hidraw3".to_string(),
            vendor_id: 0x1532,
            product_id: 0x0F3C,
            product_name: "Razer PWM PC Fan Controller".to_string(),
            serial_number: "PM2134H00001234".to_string(),
        };
        assert_eq!(
            info.display_name(),
            "Razer PWM PC Fan Controller (PM2134H00001234)"
        );
    }

    #[test]
    fn test_firmware_version_display() {
        let version = FirmwareVersion { major: 1, minor: 7 };
        assert_eq!(version.to_string(), "1.7");
    }

    #[test]
    fn test_clamp_percent() {
        assert_eq!(clamp_percent(-5), 0);
        assert_eq!(clamp_percent(0), 0);
        assert_eq!(clamp_percent(57), 57);
        assert_eq!(clamp_percent(100), 100);
        assert_eq!(clamp_percent(150), 100);
        assert_eq!(clamp_percent(i32::MIN), 0);
        assert_eq!(clamp_percent(i32::MAX), 100);
    }

    #[test]
    fn test_fractional_boundaries() {
        assert_eq!(to_fractional_byte(0), 0);
        assert_eq!(to_fractional_byte(1), 3);
        assert_eq!(to_fractional_byte(50), 128);
        assert_eq!(to_fractional_byte(57), 145);
        assert_eq!(to_fractional_byte(100), 255);

        assert_eq!(from_fractional_byte(0), 0);
        assert_eq!(from_fractional_byte(128), 50);
        assert_eq!(from_fractional_byte(255), 100);
    }

    #[test]
    fn test_fractional_roundtrip() {
        for percent in PERCENT_MIN..=PERCENT_MAX {
            assert_eq!(
                from_fractional_byte(to_fractional_byte(percent)),
                percent,
                "Roundtrip failed for {}%",
                percent
            );
        }
    }

    #[test]
    fn test_fractional_monotonic() {
        for percent in 1..=PERCENT_MAX {
            assert!(to_fractional_byte(percent) >= to_fractional_byte(percent - 1));
        }
        for fractional in 1..=u8::MAX {
            assert!(from_fractional_byte(fractional) >= from_fractional_byte(fractional - 1));
        }
    }

    #[test]
    fn test_session_state_as_str() {
        assert_eq!(SessionState::Disconnected.as_str(), "disconnected");
        assert_eq!(SessionState::Connecting.as_str(), "connecting");
        assert_eq!(SessionState::Ready.as_str(), "ready");
    }
}
