//! The transport-independent channel interface
use core::future::Future;
use std::error;

use snafu::Snafu;

use crate::{
    config::ChannelConfig,
    frame::Frame,
    usbcan::{SerialCanChannel, SerialChannelError},
};

#[cfg(all(feature = "socketcan", target_os = "linux"))]
use crate::kernel::{KernelCanChannel, KernelChannelError};

/// Callback invoked, in receive order, with every frame read from a channel
pub type FrameHandler = Box<dyn Fn(Frame) + Send + Sync>;

/// A bidirectional CAN frame transport
///
/// A channel is shared between the task driving [`Channel::run`] and any number of tasks calling
/// [`Channel::write_frame`], typically behind an `Arc`. Calling [`Channel::close`] releases the
/// underlying medium, and causes a pending `run` to return promptly with an error.
///
/// There is no reconnect logic at this level: when `run` returns, the caller decides whether to
/// call it again.
pub trait Channel: Send + Sync {
    /// The error type returned by channel operations
    type Error: error::Error + Send + 'static;

    /// Open the medium and deliver received frames to the handler until failure or close
    fn run(&self) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Release the medium
    ///
    /// A no-op if the channel is not open.
    fn close(&self) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Transmit one frame
    fn write_frame(&self, frame: Frame) -> impl Future<Output = Result<(), Self::Error>> + Send;
}

/// Error returned by [`AnyChannel`]
#[derive(Debug, Snafu)]
pub enum ChannelError {
    /// Error from a kernel CAN channel
    #[cfg(all(feature = "socketcan", target_os = "linux"))]
    #[snafu(context(false), display("{source}"))]
    Kernel {
        /// The underlying error
        source: KernelChannelError,
    },
    /// Error from a USB-CAN channel
    #[snafu(context(false), display("{source}"))]
    Serial {
        /// The underlying error
        source: SerialChannelError,
    },
}

/// A channel of either kind, selected at runtime from a [`ChannelConfig`]
#[derive(Debug)]
pub enum AnyChannel {
    /// A kernel CAN interface
    #[cfg(all(feature = "socketcan", target_os = "linux"))]
    Kernel(KernelCanChannel),
    /// A USB-CAN serial adapter
    Serial(SerialCanChannel),
}

impl AnyChannel {
    /// Build the channel described by `config`
    ///
    /// Kernel CAN configurations are only supported on Linux with the `socketcan` feature; on other
    /// builds this returns None for them.
    pub fn from_config(
        config: ChannelConfig,
        handler: impl Fn(Frame) + Send + Sync + 'static,
    ) -> Option<Self> {
        match config {
            #[cfg(all(feature = "socketcan", target_os = "linux"))]
            ChannelConfig::Socketcan(options) => {
                Some(AnyChannel::Kernel(KernelCanChannel::new(options, handler)))
            }
            #[cfg(not(all(feature = "socketcan", target_os = "linux")))]
            ChannelConfig::Socketcan(_) => None,
            ChannelConfig::Usbcan(options) => {
                Some(AnyChannel::Serial(SerialCanChannel::new(options, handler)))
            }
        }
    }
}

impl Channel for AnyChannel {
    type Error = ChannelError;

    async fn run(&self) -> Result<(), ChannelError> {
        match self {
            #[cfg(all(feature = "socketcan", target_os = "linux"))]
            AnyChannel::Kernel(c) => Ok(c.run().await?),
            AnyChannel::Serial(c) => Ok(c.run().await?),
        }
    }

    async fn close(&self) -> Result<(), ChannelError> {
        match self {
            #[cfg(all(feature = "socketcan", target_os = "linux"))]
            AnyChannel::Kernel(c) => Ok(c.close().await?),
            AnyChannel::Serial(c) => Ok(c.close().await?),
        }
    }

    async fn write_frame(&self, frame: Frame) -> Result<(), ChannelError> {
        match self {
            #[cfg(all(feature = "socketcan", target_os = "linux"))]
            AnyChannel::Kernel(c) => Ok(c.write_frame(frame).await?),
            AnyChannel::Serial(c) => Ok(c.write_frame(frame).await?),
        }
    }
}
