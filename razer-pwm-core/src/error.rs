//! Error types for the Razer PWM workspace

use crate::types::DeviceStatus;
use thiserror::Error;

/// Core error type for fan controller operations
#[derive(Error, Debug)]
pub enum RazerPwmError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// HID transport errors (open, read, write at the OS/driver level)
    #[error("Transport error: {0}")]
    Transport(String),

    /// The device answered with a status other than `Success`
    #[error("Device status not OK after write ({status})")]
    DeviceStatus { status: DeviceStatus },

    /// The device kept reporting `Busy` past the polling deadline
    #[error("Wait expired for successful device status after write ({waited_ms} ms)")]
    BusyTimeout { waited_ms: u64 },

    /// Invalid input or arguments
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Channel index out of range
    #[error("Channel out of range: {channel} (must be 0-{max})", max = channel_count - 1)]
    InvalidChannel { channel: u8, channel_count: usize },

    /// Transport used before it was opened
    #[error("The device is not ready")]
    NotOpen,

    /// Cross-process access guard could not be created or locked
    #[error("Access guard error: {0}")]
    Guard(String),
}

/// Result type alias for fan controller operations
pub type Result<T> = std::result::Result<T, RazerPwmError>;

impl RazerPwmError {
    /// Whether this error means the physical device went away
    ///
    /// Device-level failures (`DeviceStatus`, `BusyTimeout`) are not
    /// disconnections: the device answered, it just did not like the request.
    pub fn is_disconnect(&self) -> bool {
        match self {
            RazerPwmError::NotOpen => true,
            RazerPwmError::Transport(msg) => {
                let msg_lower = msg.to_lowercase();
                msg_lower.contains("broken pipe")
                    || msg_lower.contains("no such device")
                    || msg_lower.contains("device not configured")
                    || msg_lower.contains("input/output error")
                    || msg_lower.contains("disconnected")
                    || msg_lower.contains("not connected")
            }
            _ => false,
        }
    }
}
