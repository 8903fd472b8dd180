//! razer-pwm-hardware
//!
//! Protocol and session layer for the Razer PWM PC Fan Controller: the
//! feature-report codec, the system-wide access guard, the hidapi transport
//! and the device session used by the daemon.
//
//! Public API:
//! - `device::PwmFanControllerDevice` — session: connect, refresh, set power, read speeds
//! - `guard::system_guard` — process-wide handle on the named cross-process lock
//! - `hid_driver::find_fan_controllers` — enumerate supported devices via hidapi
//! - `mock::MockTransport` — simulated controller for tests and `--mock` runs

pub mod device;
pub mod guard;
pub mod hid_driver;
pub mod mock;
pub mod packet;
pub mod power_store;
pub mod sequence;
pub mod transport;

pub use device::{PwmFanControllerDevice, FIRMWARE_VERSION_ERROR};
pub use guard::{system_guard, AccessGuard, ExclusiveAccess, LocalGuard, SystemGuard};
pub use hid_driver::{enumerate_devices, find_fan_controllers, hid_api, HidDriver, SharedHidApi};
pub use mock::{MockHandle, MockTransport};
pub use packet::{Packet, Request};
pub use power_store::ChannelPowerStore;
pub use sequence::SequenceCounter;
pub use transport::HidTransport;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exports_present() {
        let _ = std::any::TypeId::of::<PwmFanControllerDevice>();
        let _ = std::any::TypeId::of::<HidDriver>();
        let _ = std::any::TypeId::of::<MockTransport>();
    }

    #[test]
    fn session_is_shareable() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<PwmFanControllerDevice>();
        assert_send_sync::<PwmFanControllerDevice<MockTransport>>();
    }
}
