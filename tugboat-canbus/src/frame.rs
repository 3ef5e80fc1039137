//! The CAN frame shared by every transport

/// Maximum number of payload bytes in a classic CAN frame
pub const MAX_DATA_LENGTH: usize = 8;

/// Largest ID which fits in an 11-bit standard identifier
pub const STD_ID_MAX: u32 = 0x7FF;

/// Largest ID which fits in a 29-bit extended identifier
pub const EXT_ID_MAX: u32 = 0x1FFF_FFFF;

/// One CAN bus message
///
/// Only the first `dlc` bytes of `data` are meaningful. The remainder are ignored when comparing
/// frames and are never transmitted.
///
/// A `dlc` larger than [`MAX_DATA_LENGTH`] is a programming error, and accessing [`Frame::data`]
/// on such a frame panics.
#[derive(Clone, Copy, Debug, Default)]
pub struct Frame {
    /// The arbitration ID
    pub id: u32,
    /// Number of valid bytes in `data`
    pub dlc: u8,
    /// Payload buffer
    pub data: [u8; MAX_DATA_LENGTH],
}

impl Frame {
    /// Create a frame from an ID and a payload slice
    ///
    /// # Panics
    /// If `data` is longer than [`MAX_DATA_LENGTH`]
    pub fn new(id: u32, data: &[u8]) -> Self {
        let dlc = data.len();
        if dlc > MAX_DATA_LENGTH {
            panic!("Data length exceeds maximum size of {} bytes", MAX_DATA_LENGTH);
        }
        let mut buf = [0u8; MAX_DATA_LENGTH];
        buf[0..dlc].copy_from_slice(data);

        Self {
            id,
            dlc: dlc as u8,
            data: buf,
        }
    }

    /// The valid portion of the payload
    pub fn data(&self) -> &[u8] {
        &self.data[0..self.dlc as usize]
    }

    /// True if the ID does not fit in an 11-bit standard identifier
    pub fn is_extended(&self) -> bool {
        self.id > STD_ID_MAX
    }
}

impl PartialEq for Frame {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.data() == other.data()
    }
}

impl Eq for Frame {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_pads_payload() {
        let frame = Frame::new(0x1234, &[0xDE, 0xAD]);
        assert_eq!(2, frame.dlc);
        assert_eq!([0xDE, 0xAD, 0, 0, 0, 0, 0, 0], frame.data);
        assert_eq!(&[0xDE, 0xAD], frame.data());
    }

    #[test]
    fn test_equality_ignores_unused_bytes() {
        let a = Frame::new(0x10, &[1, 2]);
        let mut b = a;
        b.data[5] = 0xFF;
        assert_eq!(a, b);

        b.dlc = 3;
        assert_ne!(a, b);
    }

    #[test]
    fn test_is_extended() {
        assert!(!Frame::new(STD_ID_MAX, &[]).is_extended());
        assert!(Frame::new(STD_ID_MAX + 1, &[]).is_extended());
    }

    #[test]
    #[should_panic]
    fn test_new_rejects_long_payload() {
        Frame::new(0, &[0; 9]);
    }
}
