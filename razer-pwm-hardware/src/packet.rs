//! Feature-report packet codec
//!
//! Every request and response is a fixed 91-byte frame:
//!
//! ```text
//! 0      report id (always 0 on requests)
//! 1      status
//! 2      sequence number
//! 3..5   remaining count (i16, big-endian)
//! 5      protocol type
//! 6      data length
//! 7      command class
//! 8      command
//! 9..89  data (80 bytes)
//! 89     checksum (XOR of bytes 3..=88)
//! 90     reserved
//! ```

use razer_pwm_core::{
    channel_wire_address, BoardConfig, DefaultBoard, DeviceStatus, RazerPwmError, Result,
};
use std::fmt::Write;

/// Size of a feature report, report ID included
pub const PACKET_LEN: usize = DefaultBoard::REPORT_LEN;

/// Size of the payload area
pub const DATA_LEN: usize = 80;

const DATA_OFFSET: usize = 9;
const CHECKSUM_START: usize = 3;
const CHECKSUM_OFFSET: usize = 89;
const RESERVED_OFFSET: usize = 90;

/// Command classes (subsystem selectors)
pub mod command_class {
    pub const INFO: u8 = 0x00;
    pub const PWM: u8 = 0x0d;
}

/// Commands of the Info class
pub mod info_command {
    pub const GET_VERSION: u8 = 0x81;
}

/// Commands of the Pwm class
pub mod pwm_command {
    pub const SET_CHANNEL_MODE: u8 = 0x02;
    pub const SET_CHANNEL_PERCENT: u8 = 0x0d;
    pub const GET_CHANNEL_SPEED: u8 = 0x81;
}

/// Channel mode accepting host-supplied power
pub const CHANNEL_MODE_MANUAL: u8 = 0x04;

/// First payload byte of every Pwm command
const PWM_TARGET: u8 = 0x01;

/// Offset of the big-endian RPM inside a GetChannelSpeed response payload
pub const RPM_DATA_OFFSET: usize = 4;

/// One decoded feature-report frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Packet {
    pub report_id: u8,
    pub status: DeviceStatus,
    pub sequence_number: u8,
    pub remaining_count: i16,
    pub protocol_type: u8,
    pub data_length: u8,
    pub command_class: u8,
    pub command: u8,
    pub data: [u8; DATA_LEN],
    pub checksum: u8,
    pub reserved: u8,
}

impl Default for Packet {
    fn default() -> Self {
        Self {
            report_id: 0,
            status: DeviceStatus::Default,
            sequence_number: 0,
            remaining_count: 0,
            protocol_type: 0,
            data_length: 0,
            command_class: 0,
            command: 0,
            data: [0; DATA_LEN],
            checksum: 0,
            reserved: 0,
        }
    }
}

impl Packet {
    /// Build a request frame
    ///
    /// `data_length` is what the firmware expects for the command and may
    /// differ from `payload.len()`.
    pub fn new(command_class: u8, command: u8, data_length: u8, payload: &[u8]) -> Self {
        let mut packet = Self {
            command_class,
            command,
            data_length,
            ..Self::default()
        };
        let len = payload.len().min(DATA_LEN);
        packet.data[..len].copy_from_slice(&payload[..len]);
        packet
    }

    /// Serialize into a feature-report buffer, recomputing the checksum
    pub fn encode(&self) -> [u8; PACKET_LEN] {
        let mut buf = [0u8; PACKET_LEN];
        buf[0] = self.report_id;
        buf[1] = self.status.as_byte();
        buf[2] = self.sequence_number;
        buf[3..5].copy_from_slice(&self.remaining_count.to_be_bytes());
        buf[5] = self.protocol_type;
        buf[6] = self.data_length;
        buf[7] = self.command_class;
        buf[8] = self.command;
        buf[DATA_OFFSET..CHECKSUM_OFFSET].copy_from_slice(&self.data);
        buf[CHECKSUM_OFFSET] = checksum(&buf);
        buf[RESERVED_OFFSET] = self.reserved;
        buf
    }

    /// Parse a feature-report buffer
    ///
    /// The checksum is stored as received, not verified.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if the buffer is not exactly `PACKET_LEN` bytes.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() != PACKET_LEN {
            return Err(RazerPwmError::InvalidInput(format!(
                "Packet buffer must be {} bytes, got {}",
                PACKET_LEN,
                buf.len()
            )));
        }

        let mut data = [0u8; DATA_LEN];
        data.copy_from_slice(&buf[DATA_OFFSET..CHECKSUM_OFFSET]);

        Ok(Self {
            report_id: buf[0],
            status: DeviceStatus::from(buf[1]),
            sequence_number: buf[2],
            remaining_count: i16::from_be_bytes([buf[3], buf[4]]),
            protocol_type: buf[5],
            data_length: buf[6],
            command_class: buf[7],
            command: buf[8],
            data,
            checksum: buf[CHECKSUM_OFFSET],
            reserved: buf[RESERVED_OFFSET],
        })
    }

    /// Whether the stored checksum matches the frame contents
    pub fn has_valid_checksum(&self) -> bool {
        self.encode()[CHECKSUM_OFFSET] == self.checksum
    }

    /// RPM carried by a GetChannelSpeed response
    pub fn rpm(&self) -> i32 {
        i16::from_be_bytes([
            self.data[RPM_DATA_OFFSET],
            self.data[RPM_DATA_OFFSET + 1],
        ]) as i32
    }
}

/// XOR of bytes 3 through 88 inclusive
pub fn checksum(buf: &[u8; PACKET_LEN]) -> u8 {
    buf[CHECKSUM_START..CHECKSUM_OFFSET]
        .iter()
        .fold(0u8, |acc, b| acc ^ b)
}

/// Commands understood by the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request {
    /// Info/GetVersion, empty payload
    GetFirmwareVersion,
    /// Pwm/SetChannelMode `[0x01, channel, mode]`
    SetChannelMode { channel: u8, mode: u8 },
    /// Pwm/SetChannelPercent `[0x01, channel, fractional]`
    SetChannelPercent { channel: u8, fractional: u8 },
    /// Pwm/GetChannelSpeed `[0x01, channel]`
    GetChannelSpeed { channel: u8 },
}

impl Request {
    /// Build the request frame (sequence number left at zero)
    pub fn to_packet(self) -> Packet {
        match self {
            Request::GetFirmwareVersion => {
                Packet::new(command_class::INFO, info_command::GET_VERSION, 0, &[])
            }
            Request::SetChannelMode { channel, mode } => Packet::new(
                command_class::PWM,
                pwm_command::SET_CHANNEL_MODE,
                3,
                &[PWM_TARGET, channel_wire_address(channel), mode],
            ),
            Request::SetChannelPercent {
                channel,
                fractional,
            } => Packet::new(
                command_class::PWM,
                pwm_command::SET_CHANNEL_PERCENT,
                3,
                &[PWM_TARGET, channel_wire_address(channel), fractional],
            ),
            Request::GetChannelSpeed { channel } => Packet::new(
                command_class::PWM,
                pwm_command::GET_CHANNEL_SPEED,
                6,
                &[PWM_TARGET, channel_wire_address(channel)],
            ),
        }
    }
}

/// Uppercase hex dump without separators, as used in packet logs
pub fn to_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        // write! to String is infallible
        let _ = write!(out, "{:02X}", b);
    }
    out
}
