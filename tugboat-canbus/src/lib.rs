//! CAN frame transport over two kinds of hardware
//!
//! - Kernel CAN interfaces, via SocketCAN. The interface is brought up at the configured bit rate
//!   with the `ip` tool before the socket is opened. See [`KernelCanChannel`].
//! - USB-CAN serial adapters which speak a vendor byte protocol over a USB serial port. See
//!   [`SerialCanChannel`].
//!
//! Both implement the [`Channel`] trait: `run` opens the medium and delivers received frames to a
//! handler callback until failure or until `close` is called from another task, while
//! `write_frame` transmits.
//!
//! ```no_run
//! use std::sync::Arc;
//! use tugboat_canbus::{Channel, SerialCanChannel, SerialChannelOptions};
//!
//! # async fn example() {
//! let options = SerialChannelOptions::new("/dev/ttyUSB0");
//! let channel = Arc::new(SerialCanChannel::new(options, |frame| {
//!     println!("Received {frame:?}");
//! }));
//!
//! let runner = channel.clone();
//! let task = tokio::spawn(async move { runner.run().await });
//!
//! channel.write_frame(tugboat_canbus::Frame::new(0x123, &[1, 2])).await.unwrap();
//! channel.close().await.unwrap();
//! let _ = task.await;
//! # }
//! ```
//!
//! This library is based on tokio/async.
#![warn(
    missing_docs,
    missing_debug_implementations,
    missing_copy_implementations
)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod bitrate;
mod channel;
pub mod config;
pub mod frame;
pub mod kernel;
mod session;
pub mod usbcan;

pub use bitrate::{map_bit_rate, UnsupportedBitRateError, DEFAULT_BIT_RATE};
pub use channel::{AnyChannel, Channel, ChannelError, FrameHandler};
pub use config::{ChannelConfig, ConfigError, KernelChannelOptions, SerialChannelOptions};
pub use frame::Frame;
#[cfg(all(feature = "socketcan", target_os = "linux"))]
#[cfg_attr(docsrs, doc(cfg(feature = "socketcan")))]
pub use kernel::{KernelCanChannel, KernelChannelError};
pub use usbcan::{SerialCanChannel, SerialChannelError};
