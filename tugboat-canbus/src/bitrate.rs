//! Supported CAN bit rates and their USB-CAN adapter setting codes
use snafu::Snafu;

/// Bit rate used when a channel configuration does not name one
pub const DEFAULT_BIT_RATE: u32 = 250_000;

/// Bit rates understood by the USB-CAN adapter, paired with the code written into its settings
/// frame
pub const USBCAN_BIT_RATES: [(u32, u8); 12] = [
    (1_000_000, 0x01),
    (800_000, 0x02),
    (500_000, 0x03),
    (400_000, 0x04),
    (250_000, 0x05),
    (200_000, 0x06),
    (125_000, 0x07),
    (100_000, 0x08),
    (50_000, 0x09),
    (20_000, 0x0a),
    (10_000, 0x0b),
    (5_000, 0x0c),
];

/// Error returned when a bit rate has no adapter setting code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Snafu)]
#[snafu(display("No matching bit rate setting for {bit_rate}"))]
pub struct UnsupportedBitRateError {
    /// The rejected bit rate
    pub bit_rate: u32,
}

/// Map a numeric bit rate to its adapter setting code
pub fn map_bit_rate(bit_rate: u32) -> Result<u8, UnsupportedBitRateError> {
    USBCAN_BIT_RATES
        .iter()
        .find(|(rate, _)| *rate == bit_rate)
        .map(|(_, code)| *code)
        .ok_or(UnsupportedBitRateError { bit_rate })
}

/// Map an adapter setting code back to its numeric bit rate
pub fn bit_rate_for_code(code: u8) -> Option<u32> {
    USBCAN_BIT_RATES
        .iter()
        .find(|(_, c)| *c == code)
        .map(|(rate, _)| *rate)
}
