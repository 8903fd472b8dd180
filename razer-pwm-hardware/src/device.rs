//! Device session for one PWM fan controller
//!
//! Implements the transaction protocol (write, short delay, read, re-read
//! while the device reports `Busy`) and the periodic refresh that flushes
//! requested power and samples fan speeds.
//!
//! Every batch of transactions runs under the shared [`AccessGuard`], so a
//! refresh (8 power writes and 8 speed reads) is never interleaved with
//! another process talking to the same device.

use crate::guard::{AccessGuard, ExclusiveAccess};
use crate::packet::{to_hex, Packet, Request, CHANNEL_MODE_MANUAL, PACKET_LEN};
use crate::power_store::ChannelPowerStore;
use crate::sequence::SequenceCounter;
use crate::transport::HidTransport;
use razer_pwm_core::{
    validate_channel, BoardConfig, DefaultBoard, DeviceStatus, FirmwareVersion, HidDeviceInfo,
    ProtocolConfig, RazerPwmError, Result, SessionState, SpeedSensor, CHANNEL_COUNT,
};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::thread;
use std::time::Instant;
use tracing::{debug, error, info, trace, warn};

/// Returned by [`PwmFanControllerDevice::get_firmware_version`] on failure
pub const FIRMWARE_VERSION_ERROR: &str = "ERROR";

fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Transport plus the sequence counter tagging its transactions
struct Link<T: ?Sized> {
    sequence: SequenceCounter,
    transport: Box<T>,
}

/// Session with one controller
///
/// Generic over the transport type, allowing real hardware (`HidDriver`) or
/// mock transports for testing. The session is `Sync`: `set_channel_power`
/// may be called from a control thread while another thread refreshes.
pub struct PwmFanControllerDevice<T: HidTransport + ?Sized = dyn HidTransport> {
    name: String,
    info: HidDeviceInfo,
    guard: Arc<dyn AccessGuard>,
    timing: ProtocolConfig,
    store: ChannelPowerStore,
    sensors: RwLock<Vec<SpeedSensor>>,
    state: Mutex<SessionState>,
    last_error: Mutex<Option<String>>,
    link: Mutex<Link<T>>,
}

impl PwmFanControllerDevice {
    /// Create a session over any boxed transport
    pub fn new(
        transport: Box<dyn HidTransport>,
        guard: Arc<dyn AccessGuard>,
        timing: ProtocolConfig,
    ) -> Self {
        Self::with_transport(transport, guard, timing)
    }
}

impl<T: HidTransport + ?Sized> PwmFanControllerDevice<T> {
    /// Create a session with a specific transport type
    pub fn with_transport(
        transport: Box<T>,
        guard: Arc<dyn AccessGuard>,
        timing: ProtocolConfig,
    ) -> Self {
        let info = transport.device_info().clone();
        Self {
            name: info.display_name(),
            info,
            guard,
            store: ChannelPowerStore::new(timing.force_write_interval()),
            timing,
            sensors: RwLock::new(Vec::new()),
            state: Mutex::new(SessionState::Disconnected),
            last_error: Mutex::new(None),
            link: Mutex::new(Link {
                sequence: SequenceCounter::new(),
                transport,
            }),
        }
    }

    /// Display name, `"<product> (<serial>)"`
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Identifier of this session: the HID device path
    pub fn unique_id(&self) -> &str {
        &self.info.path
    }

    pub fn device_info(&self) -> &HidDeviceInfo {
        &self.info
    }

    pub fn state(&self) -> SessionState {
        *lock(&self.state)
    }

    pub fn is_connected(&self) -> bool {
        self.state() == SessionState::Ready
    }

    /// Cause of the last failed connect, refresh or query
    pub fn last_error(&self) -> Option<String> {
        lock(&self.last_error).clone()
    }

    fn set_state(&self, state: SessionState) {
        *lock(&self.state) = state;
    }

    fn record_error(&self, err: &RazerPwmError) {
        *lock(&self.last_error) = Some(err.to_string());
    }

    /// Open the transport and initialize every channel
    ///
    /// Closes first if already open. Failures are logged and recorded in
    /// [`last_error`](Self::last_error); the return value says whether the
    /// session is ready.
    pub fn connect(&self) -> bool {
        self.set_state(SessionState::Connecting);

        let opened = {
            let mut link = lock(&self.link);
            if link.transport.is_open() {
                debug!("{}: Closing before reconnect", self.name);
                link.transport.close();
            }
            link.transport.open()
        };

        match opened {
            Ok(true) => {}
            Ok(false) => {
                let err = RazerPwmError::Transport("Device could not be opened".to_string());
                error!("{}: {}", self.name, err);
                self.record_error(&err);
                self.set_state(SessionState::Disconnected);
                return false;
            }
            Err(e) => {
                error!("{}: Failed to open device: {}", self.name, e);
                self.record_error(&e);
                self.set_state(SessionState::Disconnected);
                return false;
            }
        }

        if let Err(e) = self.initialize() {
            error!("{}: Failed to initialize channels: {}", self.name, e);
            self.record_error(&e);
            lock(&self.link).transport.close();
            self.set_state(SessionState::Disconnected);
            return false;
        }

        *lock(&self.last_error) = None;
        self.set_state(SessionState::Ready);
        info!("{}: Connected ({})", self.name, self.info.path);
        true
    }

    /// Put every channel in manual mode and queue the default power
    ///
    /// The default power reaches the device on the next refresh.
    pub fn initialize(&self) -> Result<()> {
        self.store.clear();
        let mut sensors = Vec::with_capacity(CHANNEL_COUNT);

        for channel in 0..CHANNEL_COUNT as u8 {
            {
                let _access = ExclusiveAccess::acquire(self.guard.as_ref())?;
                let mut link = lock(&self.link);
                self.write_and_read(
                    &mut link,
                    Request::SetChannelMode {
                        channel,
                        mode: CHANNEL_MODE_MANUAL,
                    },
                )?;
            }

            self.store
                .set(channel, DefaultBoard::DEFAULT_POWER_PERCENT as i32);
            sensors.push(SpeedSensor::for_channel(channel));
        }

        *self
            .sensors
            .write()
            .unwrap_or_else(PoisonError::into_inner) = sensors;
        debug!("{}: Initialized {} channels", self.name, CHANNEL_COUNT);
        Ok(())
    }

    /// Close the transport; safe to call repeatedly
    pub fn disconnect(&self) {
        let mut link = lock(&self.link);
        if link.transport.is_open() {
            link.transport.close();
            info!("{}: Disconnected", self.name);
        }
        drop(link);
        self.set_state(SessionState::Disconnected);
    }

    /// Firmware version as `"major.minor"`, or `"ERROR"` on failure
    pub fn get_firmware_version(&self) -> String {
        match self.try_firmware_version() {
            Ok(version) => version.to_string(),
            Err(e) => {
                error!("{}: Failed to read firmware version: {}", self.name, e);
                self.record_error(&e);
                FIRMWARE_VERSION_ERROR.to_string()
            }
        }
    }

    /// Query the firmware version
    pub fn try_firmware_version(&self) -> Result<FirmwareVersion> {
        let _access = ExclusiveAccess::acquire(self.guard.as_ref())?;
        let mut link = lock(&self.link);
        let response = self.write_and_read(&mut link, Request::GetFirmwareVersion)?;
        Ok(FirmwareVersion {
            major: response.data[0],
            minor: response.data[1],
        })
    }

    /// Flush requested power if needed, then sample every channel's speed
    ///
    /// Power is written when the store is dirty or the force-rewrite interval
    /// has elapsed. Both batches run under one guard acquisition.
    pub fn refresh(&self) -> Result<()> {
        let result = self.refresh_locked();
        if let Err(e) = &result {
            self.record_error(e);
        }
        result
    }

    fn refresh_locked(&self) -> Result<()> {
        let _access = ExclusiveAccess::acquire(self.guard.as_ref())?;
        let mut link = lock(&self.link);

        if self.store.needs_write(Instant::now()) {
            let snapshot = self.store.snapshot();
            for (channel, &fractional) in snapshot.fractional.iter().enumerate() {
                self.write_and_read(
                    &mut link,
                    Request::SetChannelPercent {
                        channel: channel as u8,
                        fractional,
                    },
                )?;
            }
            self.store.reset_dirty_at(snapshot.revision, Instant::now());
            trace!("{}: Wrote power for {} channels", self.name, CHANNEL_COUNT);
        }

        self.sample_speeds(&mut link)
    }

    /// Sample every channel's speed without writing any power
    ///
    /// For observers that must not override whoever drives the fans.
    pub fn read_speeds(&self) -> Result<()> {
        let result = self.read_speeds_locked();
        if let Err(e) = &result {
            self.record_error(e);
        }
        result
    }

    fn read_speeds_locked(&self) -> Result<()> {
        let _access = ExclusiveAccess::acquire(self.guard.as_ref())?;
        let mut link = lock(&self.link);
        self.sample_speeds(&mut link)
    }

    fn sample_speeds(&self, link: &mut Link<T>) -> Result<()> {
        for channel in 0..CHANNEL_COUNT as u8 {
            let rpm = self.speed_transaction(link, channel)?;
            self.update_sensor(channel, rpm);
        }
        Ok(())
    }

    /// Record requested power (clamped to 0-100); written by the next refresh
    pub fn set_channel_power(&self, channel: u8, percent: i32) -> Result<()> {
        validate_channel(channel)?;
        self.store.set(channel, percent);
        Ok(())
    }

    /// Requested power of a channel in percent
    pub fn requested_power(&self, channel: u8) -> Result<u8> {
        validate_channel(channel)?;
        Ok(self.store.percent(channel))
    }

    /// Read one channel's speed right now, outside the refresh cycle
    ///
    /// Takes the guard for the single transaction. The sensor table is left
    /// untouched.
    pub fn get_channel_speed(&self, channel: u8) -> Result<i32> {
        validate_channel(channel)?;
        let _access = ExclusiveAccess::acquire(self.guard.as_ref())?;
        let mut link = lock(&self.link);
        self.speed_transaction(&mut link, channel)
    }

    /// Snapshot of every channel's sensor, empty before initialization
    pub fn speed_sensors(&self) -> Vec<SpeedSensor> {
        self.sensors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn update_sensor(&self, channel: u8, rpm: i32) {
        let mut sensors = self.sensors.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(sensor) = sensors.get_mut(channel as usize) {
            sensor.rpm = rpm;
        }
    }

    fn speed_transaction(&self, link: &mut Link<T>, channel: u8) -> Result<i32> {
        let response = self.write_and_read(link, Request::GetChannelSpeed { channel })?;
        Ok(response.rpm())
    }

    /// One transaction: tag, write, wait, read, re-read while busy
    ///
    /// The request is never resent; a busy device is still working on it.
    fn write_and_read(&self, link: &mut Link<T>, request: Request) -> Result<Packet> {
        let mut packet = request.to_packet();
        packet.sequence_number = link.sequence.next();
        let buf = packet.encode();

        trace!("{}: WRITE {}", self.name, to_hex(&buf));
        let started = Instant::now();
        link.transport.write_feature(&buf)?;

        let delay = self.timing.read_delay();
        let timeout = self.timing.read_timeout();

        thread::sleep(delay);
        let mut response = self.read_response(link)?;
        while response.status == DeviceStatus::Busy {
            if started.elapsed() >= timeout {
                return Err(RazerPwmError::BusyTimeout {
                    waited_ms: started.elapsed().as_millis() as u64,
                });
            }
            thread::sleep(delay);
            response = self.read_response(link)?;
        }

        if response.status != DeviceStatus::Success {
            return Err(RazerPwmError::DeviceStatus {
                status: response.status,
            });
        }

        if response.sequence_number != packet.sequence_number {
            debug!(
                "{}: Response sequence 0x{:02X} does not echo request 0x{:02X}",
                self.name, response.sequence_number, packet.sequence_number
            );
        }
        Ok(response)
    }

    fn read_response(&self, link: &mut Link<T>) -> Result<Packet> {
        let mut buf = [0u8; PACKET_LEN];
        let len = link.transport.read_feature(&mut buf)?;
        trace!("{}: READ {}", self.name, to_hex(&buf[..len.min(PACKET_LEN)]));

        let response = Packet::decode(&buf)?;
        if !response.has_valid_checksum() {
            warn!(
                "{}: Response checksum 0x{:02X} does not match contents",
                self.name, response.checksum
            );
        }
        Ok(response)
    }
}

impl<T: HidTransport + ?Sized> std::fmt::Debug for PwmFanControllerDevice<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PwmFanControllerDevice")
            .field("name", &self.name)
            .field("path", &self.info.path)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guard::LocalGuard;
    use crate::mock::{MockHandle, MockTransport};
    use crate::packet::pwm_command;

    fn fast_timing() -> ProtocolConfig {
        ProtocolConfig {
            read_delay_ms: 1,
            read_timeout_ms: 50,
            force_write_interval_ms: 2500,
        }
    }

    fn mock_device() -> (PwmFanControllerDevice<MockTransport>, MockHandle) {
        let transport = MockTransport::new("PM0000TEST");
        let handle = transport.handle();
        let device = PwmFanControllerDevice::with_transport(
            Box::new(transport),
            Arc::new(LocalGuard::new()),
            fast_timing(),
        );
        (device, handle)
    }

    #[test]
    fn test_name_and_unique_id() {
        let (device, _) = mock_device();
        assert_eq!(device.name(), "Razer PWM PC Fan Controller (PM0000TEST)");
        assert_eq!(device.unique_id(), "mock://PM0000TEST");
        assert_eq!(device.state(), SessionState::Disconnected);
    }

    #[test]
    fn test_connect_initializes_channels() {
        let (device, handle) = mock_device();
        assert!(device.connect());
        assert!(device.is_connected());
        assert!(device.last_error().is_none());

        let requests = handle.requests();
        assert_eq!(requests.len(), CHANNEL_COUNT);
        for (channel, request) in requests.iter().enumerate() {
            assert_eq!(request.command, pwm_command::SET_CHANNEL_MODE);
            assert_eq!(request.data[1], 0x05 + channel as u8);
            assert_eq!(request.data[2], CHANNEL_MODE_MANUAL);
            assert_eq!(handle.channel_mode(channel as u8), CHANNEL_MODE_MANUAL);
        }

        let sensors = device.speed_sensors();
        assert_eq!(sensors.len(), CHANNEL_COUNT);
        assert_eq!(sensors[0].name, "Fan #1");
        assert!(sensors.iter().all(|s| s.rpm == 0 && s.supports_control));

        for channel in 0..CHANNEL_COUNT as u8 {
            assert_eq!(device.requested_power(channel).unwrap(), 50);
        }
    }

    #[test]
    fn test_sequence_numbers_advance() {
        let (device, handle) = mock_device();
        assert!(device.connect());

        let sequences: Vec<u8> = handle.requests().iter().map(|r| r.sequence_number).collect();
        assert_eq!(sequences, vec![0x08, 0x10, 0x18, 0x20, 0x28, 0x30, 0x38, 0x40]);
    }

    #[test]
    fn test_reconnect_closes_first() {
        let (device, handle) = mock_device();
        assert!(device.connect());
        device.set_channel_power(0, 90).unwrap();

        assert!(device.connect());
        assert_eq!(handle.open_count(), 2);
        // Initialization cleared the previous request
        assert_eq!(device.requested_power(0).unwrap(), 50);
    }

    #[test]
    fn test_connect_open_failure_returns_false() {
        let (device, handle) = mock_device();
        handle.fail_open(Some("No such device"));

        assert!(!device.connect());
        assert_eq!(device.state(), SessionState::Disconnected);
        assert!(device.last_error().unwrap().contains("No such device"));
        assert!(handle.requests().is_empty());
    }

    #[test]
    fn test_connect_refused_returns_false() {
        let (device, handle) = mock_device();
        handle.refuse_open(true);
        assert!(!device.connect());
        assert!(device.last_error().is_some());
    }

    #[test]
    fn test_connect_initialize_failure_closes() {
        let (device, handle) = mock_device();
        handle.push_statuses([DeviceStatus::Error]);

        assert!(!device.connect());
        assert_eq!(device.state(), SessionState::Disconnected);
        assert!(device.last_error().unwrap().contains("Error"));
        // Later calls see a closed transport
        assert!(matches!(device.refresh(), Err(RazerPwmError::NotOpen)));
    }

    #[test]
    fn test_disconnect_is_idempotent() {
        let (device, _) = mock_device();
        assert!(device.connect());
        device.disconnect();
        device.disconnect();
        assert_eq!(device.state(), SessionState::Disconnected);
        assert!(matches!(
            device.get_channel_speed(0),
            Err(RazerPwmError::NotOpen)
        ));
    }

    #[test]
    fn test_set_channel_power_does_no_io() {
        let (device, handle) = mock_device();
        assert!(device.connect());
        handle.clear_requests();

        device.set_channel_power(2, 150).unwrap();
        device.set_channel_power(3, -5).unwrap();
        assert!(handle.requests().is_empty());
        assert_eq!(device.requested_power(2).unwrap(), 100);
        assert_eq!(device.requested_power(3).unwrap(), 0);
    }

    #[test]
    fn test_set_channel_power_rejects_bad_channel() {
        let (device, _) = mock_device();
        assert!(matches!(
            device.set_channel_power(8, 50),
            Err(RazerPwmError::InvalidChannel { channel: 8, .. })
        ));
        assert!(device.requested_power(8).is_err());
    }

    #[test]
    fn test_refresh_skips_power_when_clean() {
        let (device, handle) = mock_device();
        assert!(device.connect());

        device.refresh().unwrap();
        handle.clear_requests();

        // Nothing changed and the force interval has not elapsed
        device.refresh().unwrap();
        let requests = handle.requests();
        assert_eq!(requests.len(), CHANNEL_COUNT);
        assert!(requests
            .iter()
            .all(|r| r.command == pwm_command::GET_CHANNEL_SPEED));
    }

    #[test]
    fn test_refresh_forces_rewrite_after_interval() {
        let transport = MockTransport::new("PM0000TEST");
        let handle = transport.handle();
        let device = PwmFanControllerDevice::with_transport(
            Box::new(transport),
            Arc::new(LocalGuard::new()),
            ProtocolConfig {
                read_delay_ms: 1,
                read_timeout_ms: 50,
                force_write_interval_ms: 20,
            },
        );
        assert!(device.connect());
        device.refresh().unwrap();
        handle.clear_requests();

        thread::sleep(std::time::Duration::from_millis(30));
        device.refresh().unwrap();
        let writes = handle
            .requests()
            .iter()
            .filter(|r| r.command == pwm_command::SET_CHANNEL_PERCENT)
            .count();
        assert_eq!(writes, CHANNEL_COUNT);
    }

    #[test]
    fn test_refresh_updates_sensors() {
        let (device, _) = mock_device();
        assert!(device.connect());
        device.set_channel_power(1, 100).unwrap();
        device.refresh().unwrap();

        let sensors = device.speed_sensors();
        assert_eq!(sensors[1].rpm, crate::mock::MOCK_MAX_RPM);
        assert_eq!(sensors[0].rpm, 128 * crate::mock::MOCK_MAX_RPM / 255);
    }

    #[test]
    fn test_read_speeds_writes_no_power() {
        let (device, handle) = mock_device();
        assert!(device.connect());
        handle.clear_requests();

        device.read_speeds().unwrap();
        let requests = handle.requests();
        assert_eq!(requests.len(), CHANNEL_COUNT);
        assert!(requests
            .iter()
            .all(|r| r.command == pwm_command::GET_CHANNEL_SPEED));
        assert_eq!(
            device.speed_sensors()[0].rpm,
            128 * crate::mock::MOCK_MAX_RPM / 255
        );
        // Still owed to the device
        assert!(device.store.is_dirty());
    }

    #[test]
    fn test_get_channel_speed_immediate() {
        let (device, handle) = mock_device();
        assert!(device.connect());
        device.set_channel_power(4, 0).unwrap();
        device.refresh().unwrap();
        handle.clear_requests();

        assert_eq!(device.get_channel_speed(4).unwrap(), 0);
        let requests = handle.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(&requests[0].data[..2], &[0x01, 0x09]);
    }

    #[test]
    fn test_firmware_version() {
        let (device, handle) = mock_device();
        assert!(device.connect());
        handle.set_firmware(3, 14);

        assert_eq!(device.get_firmware_version(), "3.14");
        assert_eq!(
            device.try_firmware_version().unwrap(),
            FirmwareVersion { major: 3, minor: 14 }
        );
    }

    #[test]
    fn test_firmware_version_sentinel_on_failure() {
        let (device, handle) = mock_device();
        assert!(device.connect());
        handle.push_statuses([DeviceStatus::Error]);

        assert_eq!(device.get_firmware_version(), FIRMWARE_VERSION_ERROR);
        assert!(device.last_error().is_some());
        // The session stays usable
        assert!(device.is_connected());
        assert_eq!(device.get_firmware_version(), "1.2");
    }

    #[test]
    fn test_busy_then_success() {
        let (device, handle) = mock_device();
        assert!(device.connect());
        handle.clear_requests();
        let reads_before = handle.read_count();
        handle.push_statuses(std::iter::repeat(DeviceStatus::Busy).take(3));

        assert_eq!(device.get_firmware_version(), "1.2");
        // One write, four reads
        assert_eq!(handle.requests().len(), 1);
        assert_eq!(handle.read_count() - reads_before, 4);
    }

    #[test]
    fn test_busy_timeout() {
        let (device, handle) = mock_device();
        assert!(device.connect());
        handle.push_statuses(std::iter::repeat(DeviceStatus::Busy).take(10_000));

        let err = device.try_firmware_version().unwrap_err();
        match err {
            RazerPwmError::BusyTimeout { waited_ms } => assert!(waited_ms >= 50),
            other => panic!("Expected BusyTimeout, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_status_is_failure() {
        let (device, handle) = mock_device();
        assert!(device.connect());
        handle.push_statuses([DeviceStatus::Unknown(0x09)]);

        assert!(matches!(
            device.try_firmware_version(),
            Err(RazerPwmError::DeviceStatus {
                status: DeviceStatus::Unknown(0x09)
            })
        ));
    }

    #[test]
    fn test_refresh_transport_error_is_disconnect() {
        let (device, handle) = mock_device();
        assert!(device.connect());
        handle.fail_io(Some("hid_error: No such device"));

        let err = device.refresh().unwrap_err();
        assert!(err.is_disconnect());
        assert!(device.last_error().is_some());
    }
}
