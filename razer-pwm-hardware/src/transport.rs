//! Feature-report transport abstraction

use razer_pwm_core::{HidDeviceInfo, Result};

/// Trait for feature-report I/O, allowing mock implementations for testing
///
/// Buffers include the report ID at index 0.
pub trait HidTransport: Send {
    /// Open the device
    ///
    /// `Ok(false)` means the device could not be opened without a specific
    /// error to report.
    fn open(&mut self) -> Result<bool>;

    /// Close the device; safe to call when already closed
    fn close(&mut self);

    /// Check if the device is open
    fn is_open(&self) -> bool;

    /// Send one feature report
    fn write_feature(&mut self, report: &[u8]) -> Result<()>;

    /// Read one feature report into `report`, returning the byte count
    fn read_feature(&mut self, report: &mut [u8]) -> Result<usize>;

    /// Metadata of the underlying device
    fn device_info(&self) -> &HidDeviceInfo;
}
