//! The 20 byte settings frame which configures the USB-CAN adapter
//!
//! Layout:
//!
//! | offset  | content                         |
//! |---------|---------------------------------|
//! | 0       | sync byte `0xAA`                |
//! | 1       | command marker `0x55`           |
//! | 2       | command type `0x12`             |
//! | 3       | bit rate code                   |
//! | 4       | [`FrameType`]                   |
//! | 5..=12  | acceptance filter and mask      |
//! | 13      | [`Mode`]                        |
//! | 14      | `0x01`                          |
//! | 15..=18 | reserved                        |
//! | 19      | checksum of bytes 2..=18        |
use crate::bitrate::{bit_rate_for_code, map_bit_rate, UnsupportedBitRateError, DEFAULT_BIT_RATE};

use super::codec::{COMMAND_FRAME_LEN, COMMAND_MARKER, SYNC_BYTE};

/// Command type byte of a settings frame
pub const SETTINGS_COMMAND: u8 = 0x12;

const BIT_RATE_OFFSET: usize = 3;
const FRAME_TYPE_OFFSET: usize = 4;
const MODE_OFFSET: usize = 13;
// Vendor tooling always sends 0x01 here
const FLAG_OFFSET: usize = 14;
const FLAG_VALUE: u8 = 0x01;
const CHECKSUM_OFFSET: usize = 19;

/// Adapter operating mode
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum Mode {
    /// Send and receive on the bus
    #[default]
    Normal = 0,
    /// Transmitted frames are looped back to the host
    Loopback = 1,
    /// Listen only
    Silent = 2,
    /// Loopback without driving the bus
    LoopbackSilent = 3,
}

impl Mode {
    fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(Mode::Normal),
            1 => Some(Mode::Loopback),
            2 => Some(Mode::Silent),
            3 => Some(Mode::LoopbackSilent),
            _ => None,
        }
    }
}

/// The identifier format the adapter filter applies to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum FrameType {
    /// 11-bit identifiers
    #[default]
    Standard = 1,
    /// 29-bit identifiers
    Extended = 2,
}

impl FrameType {
    fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(FrameType::Standard),
            2 => Some(FrameType::Extended),
            _ => None,
        }
    }
}

/// Adapter settings carried by a settings frame
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Settings {
    /// CAN bus bit rate
    pub bit_rate: u32,
    /// Filter frame type
    pub frame_type: FrameType,
    /// Operating mode
    pub mode: Mode,
}

impl Default for Settings {
    fn default() -> Self {
        Self::new(DEFAULT_BIT_RATE)
    }
}

impl Settings {
    /// Settings for the given bit rate, with a standard frame filter in normal mode
    pub fn new(bit_rate: u32) -> Self {
        Self {
            bit_rate,
            frame_type: FrameType::default(),
            mode: Mode::default(),
        }
    }

    /// Serialize to a settings frame
    ///
    /// Fails if the bit rate is not one the adapter supports.
    pub fn to_bytes(&self) -> Result<[u8; COMMAND_FRAME_LEN], UnsupportedBitRateError> {
        let mut buf = [0u8; COMMAND_FRAME_LEN];
        buf[0] = SYNC_BYTE;
        buf[1] = COMMAND_MARKER;
        buf[2] = SETTINGS_COMMAND;
        buf[BIT_RATE_OFFSET] = map_bit_rate(self.bit_rate)?;
        buf[FRAME_TYPE_OFFSET] = self.frame_type as u8;
        buf[MODE_OFFSET] = self.mode as u8;
        buf[FLAG_OFFSET] = FLAG_VALUE;
        buf[CHECKSUM_OFFSET] = checksum(&buf[2..CHECKSUM_OFFSET]);
        Ok(buf)
    }

    /// Interpret a command frame as a settings frame
    ///
    /// Returns None if the frame is some other command, carries an unknown field value, or fails
    /// its checksum.
    pub fn parse(frame: &[u8; COMMAND_FRAME_LEN]) -> Option<Self> {
        if frame[0] != SYNC_BYTE || frame[1] != COMMAND_MARKER || frame[2] != SETTINGS_COMMAND {
            return None;
        }
        if frame[CHECKSUM_OFFSET] != checksum(&frame[2..CHECKSUM_OFFSET]) {
            return None;
        }
        Some(Self {
            bit_rate: bit_rate_for_code(frame[BIT_RATE_OFFSET])?,
            frame_type: FrameType::from_byte(frame[FRAME_TYPE_OFFSET])?,
            mode: Mode::from_byte(frame[MODE_OFFSET])?,
        })
    }
}

/// Sum of the bytes, modulo 256
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
}
