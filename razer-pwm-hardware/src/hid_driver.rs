//! hidapi transport and device discovery

use crate::transport::HidTransport;
use hidapi::{DeviceInfo, HidApi, HidDevice, HidError};
use razer_pwm_core::{
    is_supported_device, BoardConfig, DefaultBoard, HidDeviceInfo, RazerPwmError, Result,
};
use std::collections::HashSet;
use std::ffi::CString;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

/// Shared hidapi context
///
/// hidapi keeps global library state, so one context serves every device.
pub type SharedHidApi = Arc<Mutex<HidApi>>;

fn transport_error(context: &str, err: HidError) -> RazerPwmError {
    RazerPwmError::Transport(format!("{}: {}", context, err))
}

fn lock_api(api: &Mutex<HidApi>) -> MutexGuard<'_, HidApi> {
    api.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Initialize hidapi
pub fn hid_api() -> Result<SharedHidApi> {
    let api = HidApi::new().map_err(|e| transport_error("Failed to initialize hidapi", e))?;
    Ok(Arc::new(Mutex::new(api)))
}

/// Product string as reported, or the board name when the OS hides it
fn product_name(reported: Option<&str>) -> String {
    reported
        .filter(|name| !name.is_empty())
        .unwrap_or(DefaultBoard::NAME)
        .to_string()
}

fn to_device_info(info: &DeviceInfo) -> HidDeviceInfo {
    HidDeviceInfo {
        path: info.path().to_string_lossy().into_owned(),
        vendor_id: info.vendor_id(),
        product_id: info.product_id(),
        product_name: product_name(info.product_string()),
        serial_number: info.serial_number().unwrap_or_default().to_string(),
    }
}

/// Enumerate supported controllers
///
/// A device exposing several interfaces is listed once per path.
pub fn enumerate_devices(api: &Mutex<HidApi>) -> Result<Vec<HidDeviceInfo>> {
    let mut api = lock_api(api);
    api.refresh_devices()
        .map_err(|e| transport_error("Failed to enumerate HID devices", e))?;

    let mut seen = HashSet::new();
    let devices: Vec<HidDeviceInfo> = api
        .device_list()
        .filter(|d| is_supported_device(d.vendor_id(), d.product_id()))
        .map(to_device_info)
        .filter(|d| seen.insert(d.path.clone()))
        .collect();

    for device in &devices {
        debug!(
            "Found {} at {} ({:04x}:{:04x})",
            device.display_name(),
            device.path,
            device.vendor_id,
            device.product_id
        );
    }
    Ok(devices)
}

/// Wrap every supported controller in a (closed) transport
pub fn find_fan_controllers(api: &SharedHidApi) -> Result<Vec<HidDriver>> {
    let devices = enumerate_devices(api)?;
    info!("Found {} fan controller(s)", devices.len());
    Ok(devices
        .into_iter()
        .map(|info| HidDriver::new(Arc::clone(api), info))
        .collect())
}

/// hidapi-backed transport for one device path
pub struct HidDriver {
    api: SharedHidApi,
    info: HidDeviceInfo,
    device: Option<HidDevice>,
}

impl HidDriver {
    /// Create a driver for a discovered device; the device is not opened yet
    pub fn new(api: SharedHidApi, info: HidDeviceInfo) -> Self {
        Self {
            api,
            info,
            device: None,
        }
    }

    fn device(&self) -> Result<&HidDevice> {
        self.device.as_ref().ok_or(RazerPwmError::NotOpen)
    }
}

impl HidTransport for HidDriver {
    fn open(&mut self) -> Result<bool> {
        self.close();

        let path = CString::new(self.info.path.as_str()).map_err(|_| {
            RazerPwmError::InvalidInput(format!("Device path contains NUL: {}", self.info.path))
        })?;
        debug!("Opening HID device: {}", self.info.path);

        let device = lock_api(&self.api)
            .open_path(&path)
            .map_err(|e| transport_error(&format!("Failed to open {}", self.info.path), e))?;
        self.device = Some(device);
        Ok(true)
    }

    fn close(&mut self) {
        if self.device.take().is_some() {
            debug!("Closed HID device: {}", self.info.path);
        }
    }

    fn is_open(&self) -> bool {
        self.device.is_some()
    }

    fn write_feature(&mut self, report: &[u8]) -> Result<()> {
        self.device()?
            .send_feature_report(report)
            .map_err(|e| transport_error("Feature report write failed", e))
    }

    fn read_feature(&mut self, report: &mut [u8]) -> Result<usize> {
        let len = self
            .device()?
            .get_feature_report(report)
            .map_err(|e| transport_error("Feature report read failed", e))?;
        if len != report.len() {
            warn!(
                "Short feature report from {}: {} of {} bytes",
                self.info.path,
                len,
                report.len()
            );
        }
        Ok(len)
    }

    fn device_info(&self) -> &HidDeviceInfo {
        &self.info
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_product_name_fallback() {
        assert_eq!(product_name(None), "Razer PWM PC Fan Controller");
        assert_eq!(product_name(Some("")), "Razer PWM PC Fan Controller");
        assert_eq!(product_name(Some("Fan Hub")), "Fan Hub");
    }

    #[test]
    fn test_transport_error_keeps_context() {
        let err = transport_error(
            "Failed to open /dev/hidraw3",
            HidError::HidApiError {
                message: "No such device".to_string(),
            },
        );
        assert!(err.is_disconnect());
        assert!(err.to_string().contains("/dev/hidraw3"));
    }
}
