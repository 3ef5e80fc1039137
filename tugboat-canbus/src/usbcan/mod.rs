//! USB-CAN serial adapters
//!
//! These adapters bridge a CAN bus to a USB serial port and speak a vendor byte protocol, which is
//! implemented in [`codec`] and [`settings`].
mod channel;
pub mod codec;
pub mod settings;

pub use channel::{SerialCanChannel, SerialChannelError};
