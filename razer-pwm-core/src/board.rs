//! Board definitions
//!
//! Each supported controller implements the `BoardConfig` trait with its
//! hardware characteristics. Only the Razer PWM PC Fan Controller exists
//! today; the trait keeps protocol code free of magic numbers.
//!
//! Note: actual hardware I/O is in the `razer-pwm-hardware` crate. This
//! module only contains board specifications.

/// Hardware board configuration trait
///
/// # Example
///
/// ```
/// use razer_pwm_core::board::{BoardConfig, RazerPwmFanController};
///
/// const CHANNELS: usize = RazerPwmFanController::CHANNEL_COUNT;
/// const NAME: &str = RazerPwmFanController::NAME;
/// ```
pub trait BoardConfig: Send + Sync + 'static {
    /// Human-readable board name
    const NAME: &'static str;

    /// Number of independently controllable fan channels
    const CHANNEL_COUNT: usize;

    /// USB Vendor ID for device detection
    const USB_VID: u16;

    /// USB Product ID for device detection
    const USB_PID: u16;

    /// Size of a feature report in bytes, report ID included
    const REPORT_LEN: usize;

    /// Wire address of channel 0; channel `n` is `CHANNEL_BASE + n`
    const CHANNEL_BASE: u8;

    /// Requested power applied to every channel on initialization
    const DEFAULT_POWER_PERCENT: u8;
}

/// Razer PWM PC Fan Controller
///
/// - 8 PWM fan channels, addressed on the wire as 0x05..=0x0C
/// - USB VID: 0x1532 (Razer)
/// - USB PID: 0x0F3C
/// - 91-byte feature reports
pub struct RazerPwmFanController;

impl BoardConfig for RazerPwmFanController {
    const NAME: &'static str = "Razer PWM PC Fan Controller";
    const CHANNEL_COUNT: usize = 8;
    const USB_VID: u16 = 0x1532;
    const USB_PID: u16 = 0x0F3C;
    const REPORT_LEN: usize = 91;
    const CHANNEL_BASE: u8 = 0x05;
    const DEFAULT_POWER_PERCENT: u8 = 50;
}

/// Default board type used throughout the codebase
pub type DefaultBoard = RazerPwmFanController;

/// Number of channels on the default board
pub const CHANNEL_COUNT: usize = DefaultBoard::CHANNEL_COUNT;

/// Razer USB vendor ID
pub const RAZER_VENDOR_ID: u16 = 0x1532;

/// Product IDs handled by the PWM fan controller driver
pub const SUPPORTED_PRODUCT_IDS: &[u16] = &[RazerPwmFanController::USB_PID];

/// Whether a VID/PID pair belongs to a supported controller
pub fn is_supported_device(vendor_id: u16, product_id: u16) -> bool {
    vendor_id == RAZER_VENDOR_ID && SUPPORTED_PRODUCT_IDS.contains(&product_id)
}

/// Validate a channel index against the default board's channel count
///
/// # Errors
///
/// Returns `InvalidChannel` if the index is out of range (>= CHANNEL_COUNT)
pub fn validate_channel(channel: u8) -> crate::Result<()> {
    if channel as usize >= CHANNEL_COUNT {
        return Err(crate::RazerPwmError::InvalidChannel {
            channel,
            channel_count: CHANNEL_COUNT,
        });
    }
    Ok(())
}

/// Wire address of a channel index
#[inline]
pub fn channel_wire_address(channel: u8) -> u8 {
    DefaultBoard::CHANNEL_BASE + channel
}
