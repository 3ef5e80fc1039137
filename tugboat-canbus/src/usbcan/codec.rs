//! Byte framing used by the USB-CAN adapter
//!
//! Data frames have the form:
//!
//! ```text
//! 0xAA | control | ID (2 or 4 bytes, little endian) | payload (0..=8 bytes) | 0x55
//! ```
//!
//! The control byte carries `0b11` in its top two bits, the extended flag in bit 5, the remote
//! flag in bit 4 and the payload length in the low nibble. Frames beginning `0xAA 0x55` are fixed
//! length command frames, which the adapter echoes back and which are recognized but ignored.
//!
//! There is no length prefix, so the frame length has to be derived from the control byte, and the
//! decoder must be able to resynchronize on the next sync byte after line noise.
use snafu::Snafu;

use crate::frame::{Frame, MAX_DATA_LENGTH};

/// First byte of every frame
pub const SYNC_BYTE: u8 = 0xAA;
/// Second byte of a command frame
pub const COMMAND_MARKER: u8 = 0x55;
/// Last byte of a data frame
pub const TERMINATOR: u8 = 0x55;
/// Total length of a command frame
pub const COMMAND_FRAME_LEN: usize = 20;

/// IDs above this are sent as extended frames
pub const STD_FRAME_ID_MAX: u32 = 0xFFFF;

const DATA_FRAME_MASK: u8 = 0xC0;
const DATA_FRAME_MARKER: u8 = 0xC0;
const EXTENDED_FLAG: u8 = 0x20;
const REMOTE_FLAG: u8 = 0x10;
const LENGTH_MASK: u8 = 0x0F;

/// A malformed run of bytes which was dropped from the receive buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Snafu)]
pub enum DecodeError {
    /// No sync byte anywhere in the buffer
    #[snafu(display("No sync byte in {discarded} buffered bytes"))]
    NoSync {
        /// Number of bytes dropped
        discarded: usize,
    },
    /// A data frame control byte declared more than 8 payload bytes
    #[snafu(display("Data frame declares invalid length {dlc}, dropped {discarded} bytes"))]
    InvalidLength {
        /// The declared length
        dlc: u8,
        /// Number of bytes dropped
        discarded: usize,
    },
    /// A data frame did not end with the terminator byte
    #[snafu(display(
        "Data frame 0x{id:X} has bad end byte 0x{end_byte:02X}, dropped {discarded} bytes"
    ))]
    BadTerminator {
        /// The ID parsed from the frame header
        id: u32,
        /// The byte found where the terminator should be
        end_byte: u8,
        /// Number of bytes dropped
        discarded: usize,
    },
    /// The byte following a sync byte is neither a command marker nor a data frame control byte
    #[snafu(display("Unknown control byte 0x{control:02X}, dropped {discarded} bytes"))]
    UnknownControl {
        /// The control byte
        control: u8,
        /// Number of bytes dropped
        discarded: usize,
    },
}

/// One step of progress through the receive buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// A complete data frame
    Frame(Frame),
    /// A complete command frame
    Command([u8; COMMAND_FRAME_LEN]),
    /// Bytes preceding the next sync byte were skipped
    Skipped(usize),
    /// The buffer held malformed data and was emptied
    Malformed(DecodeError),
}

/// Header fields of a data frame, taken from its control byte
#[derive(Debug, Clone, Copy)]
struct DataHeader {
    extended: bool,
    remote: bool,
    dlc: u8,
}

impl DataHeader {
    fn from_control(control: u8) -> Self {
        Self {
            extended: control & EXTENDED_FLAG != 0,
            remote: control & REMOTE_FLAG != 0,
            dlc: control & LENGTH_MASK,
        }
    }

    fn id_len(&self) -> usize {
        if self.extended {
            4
        } else {
            2
        }
    }

    /// Total frame length, including sync, control and terminator bytes
    fn frame_len(&self) -> usize {
        2 + self.id_len() + self.dlc as usize + 1
    }
}

/// Accumulates bytes read from the adapter and splits them into frames
///
/// Bytes are appended with [`ReceiveBuffer::extend`] and consumed from the front as complete frames
/// or garbage are recognized. An incomplete frame at the end of the buffer is left in place until
/// more bytes arrive.
#[derive(Debug, Default, Clone)]
pub struct ReceiveBuffer {
    pending: Vec<u8>,
}

impl ReceiveBuffer {
    /// Create an empty buffer
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes received from the device
    pub fn extend(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);
    }

    /// The bytes not yet consumed
    pub fn as_bytes(&self) -> &[u8] {
        &self.pending
    }

    /// Number of bytes not yet consumed
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// True if all bytes have been consumed
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Iterate over everything which can be decoded from the bytes buffered so far
    pub fn decode(&mut self) -> Decode<'_> {
        Decode { buffer: self }
    }

    /// Attempt to consume one item from the front of the buffer
    ///
    /// Returns None when more bytes are needed before progress can be made.
    pub fn decode_next(&mut self) -> Option<Decoded> {
        let first = *self.pending.first()?;
        if first != SYNC_BYTE {
            return Some(match self.pending.iter().position(|b| *b == SYNC_BYTE) {
                Some(idx) => {
                    self.pending.drain(..idx);
                    Decoded::Skipped(idx)
                }
                None => Decoded::Malformed(DecodeError::NoSync {
                    discarded: self.discard_all(),
                }),
            });
        }

        let control = *self.pending.get(1)?;
        if control == COMMAND_MARKER {
            if self.pending.len() < COMMAND_FRAME_LEN {
                return None;
            }
            let mut command = [0u8; COMMAND_FRAME_LEN];
            command.copy_from_slice(&self.pending[..COMMAND_FRAME_LEN]);
            self.pending.drain(..COMMAND_FRAME_LEN);
            return Some(Decoded::Command(command));
        }

        if control & DATA_FRAME_MASK != DATA_FRAME_MARKER {
            return Some(Decoded::Malformed(DecodeError::UnknownControl {
                control,
                discarded: self.discard_all(),
            }));
        }

        let header = DataHeader::from_control(control);
        if header.dlc as usize > MAX_DATA_LENGTH {
            return Some(Decoded::Malformed(DecodeError::InvalidLength {
                dlc: header.dlc,
                discarded: self.discard_all(),
            }));
        }

        let frame_len = header.frame_len();
        if self.pending.len() < frame_len {
            return None;
        }

        let frame = &self.pending[..frame_len];
        let id_bytes = &frame[2..2 + header.id_len()];
        let id = id_bytes
            .iter()
            .rev()
            .fold(0u32, |acc, b| (acc << 8) | *b as u32);

        let end_byte = frame[frame_len - 1];
        if end_byte != TERMINATOR {
            return Some(Decoded::Malformed(DecodeError::BadTerminator {
                id,
                end_byte,
                discarded: self.discard_all(),
            }));
        }

        if header.remote {
            log::trace!("Remote frame 0x{id:X}");
        }
        let payload = &frame[frame_len - 1 - header.dlc as usize..frame_len - 1];
        let decoded = Frame::new(id, payload);
        self.pending.drain(..frame_len);
        Some(Decoded::Frame(decoded))
    }

    fn discard_all(&mut self) -> usize {
        let discarded = self.pending.len();
        self.pending.clear();
        discarded
    }
}

/// Iterator returned by [`ReceiveBuffer::decode`]
#[derive(Debug)]
pub struct Decode<'a> {
    buffer: &'a mut ReceiveBuffer,
}

impl Iterator for Decode<'_> {
    type Item = Decoded;

    fn next(&mut self) -> Option<Self::Item> {
        self.buffer.decode_next()
    }
}

/// Encode a frame for transmission to the adapter
///
/// IDs above [`STD_FRAME_ID_MAX`] are sent as extended frames with 4 ID bytes.
///
/// # Panics
/// If `frame.dlc` is larger than 8
pub fn encode_frame(frame: &Frame) -> Vec<u8> {
    let data = frame.data();
    let extended = frame.id > STD_FRAME_ID_MAX;
    let mut buf = Vec::with_capacity(2 + 4 + data.len() + 1);

    let mut control = DATA_FRAME_MARKER | frame.dlc;
    if extended {
        control |= EXTENDED_FLAG;
    }
    buf.push(SYNC_BYTE);
    buf.push(control);
    let id = frame.id.to_le_bytes();
    buf.extend_from_slice(&id[..2]);
    if extended {
        buf.extend_from_slice(&id[2..]);
    }
    buf.extend_from_slice(data);
    buf.push(TERMINATOR);
    buf
}
