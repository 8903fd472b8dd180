//! Simulated fan controller
//!
//! Answers every request the way the firmware does: the response echoes the
//! request header and sequence number with status `Success`, speed queries
//! report an RPM proportional to the last power written to the channel.
//! Tests script busy/error statuses and transport failures through a
//! [`MockHandle`] that stays valid after the transport moves into a session.

use crate::packet::{command_class, info_command, pwm_command, Packet, PACKET_LEN, RPM_DATA_OFFSET};
use crate::transport::HidTransport;
use razer_pwm_core::{
    to_fractional_byte, BoardConfig, DefaultBoard, DeviceStatus, HidDeviceInfo, RazerPwmError,
    Result, CHANNEL_COUNT,
};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// RPM reported at 100% power
pub const MOCK_MAX_RPM: i32 = 2200;

#[derive(Debug)]
struct MockState {
    requests: Vec<Packet>,
    pending: Option<Packet>,
    statuses: VecDeque<DeviceStatus>,
    reads: usize,
    opens: usize,
    refuse_open: bool,
    open_error: Option<String>,
    io_error: Option<String>,
    firmware: (u8, u8),
    power: [u8; CHANNEL_COUNT],
    modes: [u8; CHANNEL_COUNT],
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            requests: Vec::new(),
            pending: None,
            statuses: VecDeque::new(),
            reads: 0,
            opens: 0,
            refuse_open: false,
            open_error: None,
            io_error: None,
            firmware: (1, 2),
            power: [to_fractional_byte(DefaultBoard::DEFAULT_POWER_PERCENT); CHANNEL_COUNT],
            modes: [0; CHANNEL_COUNT],
        }
    }
}

impl MockState {
    fn channel_index(wire: u8) -> Option<usize> {
        let index = wire.checked_sub(DefaultBoard::CHANNEL_BASE)? as usize;
        (index < CHANNEL_COUNT).then_some(index)
    }

    fn apply(&mut self, request: &Packet) {
        if request.command_class != command_class::PWM {
            return;
        }
        let Some(channel) = Self::channel_index(request.data[1]) else {
            return;
        };
        match request.command {
            pwm_command::SET_CHANNEL_MODE => self.modes[channel] = request.data[2],
            pwm_command::SET_CHANNEL_PERCENT => self.power[channel] = request.data[2],
            _ => {}
        }
    }

    fn respond(&mut self) -> Packet {
        let Some(request) = self.pending else {
            return Packet::default();
        };

        let mut response = request;
        response.status = self.statuses.pop_front().unwrap_or(DeviceStatus::Success);
        if response.status == DeviceStatus::Busy {
            return response;
        }

        match (request.command_class, request.command) {
            (command_class::INFO, info_command::GET_VERSION) => {
                response.data[0] = self.firmware.0;
                response.data[1] = self.firmware.1;
            }
            (command_class::PWM, pwm_command::GET_CHANNEL_SPEED) => {
                if let Some(channel) = Self::channel_index(request.data[1]) {
                    let rpm = self.power[channel] as i32 * MOCK_MAX_RPM / 255;
                    response.data[RPM_DATA_OFFSET..RPM_DATA_OFFSET + 2]
                        .copy_from_slice(&(rpm as i16).to_be_bytes());
                }
            }
            _ => {}
        }
        response
    }
}

/// Test-side view of a [`MockTransport`]
#[derive(Debug, Clone)]
pub struct MockHandle {
    state: Arc<Mutex<MockState>>,
}

impl MockHandle {
    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Every request written so far, decoded
    pub fn requests(&self) -> Vec<Packet> {
        self.state().requests.clone()
    }

    pub fn clear_requests(&self) {
        self.state().requests.clear();
    }

    /// Number of feature-report reads served
    pub fn read_count(&self) -> usize {
        self.state().reads
    }

    /// Number of successful opens
    pub fn open_count(&self) -> usize {
        self.state().opens
    }

    /// Statuses reported by the next reads, in order, before `Success` resumes
    pub fn push_statuses(&self, statuses: impl IntoIterator<Item = DeviceStatus>) {
        self.state().statuses.extend(statuses);
    }

    /// Make `open` return `Ok(false)`
    pub fn refuse_open(&self, refuse: bool) {
        self.state().refuse_open = refuse;
    }

    /// Make `open` fail with a transport error
    pub fn fail_open(&self, message: Option<&str>) {
        self.state().open_error = message.map(str::to_string);
    }

    /// Make reads and writes fail with a transport error
    pub fn fail_io(&self, message: Option<&str>) {
        self.state().io_error = message.map(str::to_string);
    }

    pub fn set_firmware(&self, major: u8, minor: u8) {
        self.state().firmware = (major, minor);
    }

    /// Last fractional power written to a channel
    pub fn channel_power(&self, channel: u8) -> u8 {
        self.state().power[channel as usize]
    }

    /// Last mode written to a channel
    pub fn channel_mode(&self, channel: u8) -> u8 {
        self.state().modes[channel as usize]
    }
}

/// In-memory transport emulating one controller
#[derive(Debug)]
pub struct MockTransport {
    info: HidDeviceInfo,
    open: bool,
    handle: MockHandle,
}

impl MockTransport {
    pub fn new(serial_number: &str) -> Self {
        Self {
            info: HidDeviceInfo {
                path: format!("mock://{}", serial_number),
                vendor_id: DefaultBoard::USB_VID,
                product_id: DefaultBoard::USB_PID,
                product_name: DefaultBoard::NAME.to_string(),
                serial_number: serial_number.to_string(),
            },
            open: false,
            handle: MockHandle {
                state: Arc::new(Mutex::new(MockState::default())),
            },
        }
    }

    pub fn handle(&self) -> MockHandle {
        self.handle.clone()
    }

    fn check_io(&self) -> Result<()> {
        if !self.open {
            return Err(RazerPwmError::NotOpen);
        }
        match &self.handle.state().io_error {
            Some(message) => Err(RazerPwmError::Transport(message.clone())),
            None => Ok(()),
        }
    }
}

impl HidTransport for MockTransport {
    fn open(&mut self) -> Result<bool> {
        let mut state = self.handle.state();
        if let Some(message) = &state.open_error {
            return Err(RazerPwmError::Transport(message.clone()));
        }
        if state.refuse_open {
            return Ok(false);
        }
        state.opens += 1;
        state.pending = None;
        drop(state);

        self.open = true;
        Ok(true)
    }

    fn close(&mut self) {
        self.open = false;
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn write_feature(&mut self, report: &[u8]) -> Result<()> {
        self.check_io()?;
        let request = Packet::decode(report)?;

        let mut state = self.handle.state();
        state.apply(&request);
        state.requests.push(request);
        state.pending = Some(request);
        Ok(())
    }

    fn read_feature(&mut self, report: &mut [u8]) -> Result<usize> {
        self.check_io()?;
        if report.len() != PACKET_LEN {
            return Err(RazerPwmError::InvalidInput(format!(
                "Feature report buffer must be {} bytes, got {}",
                PACKET_LEN,
                report.len()
            )));
        }

        let mut state = self.handle.state();
        state.reads += 1;
        let response = state.respond();
        report.copy_from_slice(&response.encode());
        Ok(PACKET_LEN)
    }

    fn device_info(&self) -> &HidDeviceInfo {
        &self.info
    }
}
