use std::sync::Arc;

use snafu::{OptionExt, ResultExt, Snafu};
use socketcan::{
    tokio::CanSocket, CanFrame, EmbeddedFrame, ExtendedId, Id, ShouldRetry, StandardId,
};
use tokio::sync::oneshot;

use crate::{
    channel::{Channel, FrameHandler},
    config::KernelChannelOptions,
    frame::{Frame, EXT_ID_MAX, MAX_DATA_LENGTH, STD_ID_MAX},
    session::{Reservation, SessionSlot},
};

use super::link::{bring_up, IpLink, LinkControl, LinkError};

/// Error returned by [`KernelCanChannel`]
#[derive(Debug, Snafu)]
pub enum KernelChannelError {
    /// The link could not be brought up
    #[snafu(display("Failed to bring up {interface}: {source}"))]
    Link {
        /// Interface name
        interface: String,
        /// The underlying error
        source: LinkError,
    },
    /// The CAN socket could not be opened
    #[snafu(display("Failed to open SocketCAN {interface}: {source}"))]
    Open {
        /// Interface name
        interface: String,
        /// The underlying error
        source: std::io::Error,
    },
    /// Reading from the socket failed
    #[snafu(display("Failed reading from {interface}: {source}"))]
    Receive {
        /// Interface name
        interface: String,
        /// The underlying error
        source: std::io::Error,
    },
    /// Writing to the socket failed
    #[snafu(display("Failed writing to {interface}: {source}"))]
    Write {
        /// Interface name
        interface: String,
        /// The underlying error
        source: std::io::Error,
    },
    /// The frame ID does not fit in a 29-bit identifier
    #[snafu(display("Invalid CAN ID 0x{id:X}"))]
    InvalidId {
        /// The rejected ID
        id: u32,
    },
    /// The channel was closed while running
    #[snafu(display("Channel closed"))]
    Closed,
    /// The channel is not running
    #[snafu(display("Channel is not open"))]
    NotOpen,
    /// `run` was called while the channel was already running
    #[snafu(display("Channel is already running"))]
    AlreadyRunning,
}

type Result<T> = std::result::Result<T, KernelChannelError>;

/// Convert a socketcan frame, returning None for error frames
pub(crate) fn frame_from_socketcan(frame: &CanFrame) -> Option<Frame> {
    let id = match frame.id() {
        Id::Standard(id) => id.as_raw() as u32,
        Id::Extended(id) => id.as_raw(),
    };

    match frame {
        CanFrame::Data(frame) => Some(Frame::new(id, frame.data())),
        CanFrame::Remote(frame) => Some(Frame {
            id,
            dlc: frame.dlc().min(MAX_DATA_LENGTH) as u8,
            ..Default::default()
        }),
        CanFrame::Error(_) => None,
    }
}

/// Convert to a socketcan frame, using a standard ID where the ID allows it
pub(crate) fn frame_to_socketcan(frame: &Frame) -> Option<CanFrame> {
    let id: Id = if frame.id <= STD_ID_MAX {
        StandardId::new(frame.id as u16)?.into()
    } else if frame.id <= EXT_ID_MAX {
        ExtendedId::new(frame.id)?.into()
    } else {
        return None;
    };
    CanFrame::new(id, frame.data())
}

/// A channel on a kernel (SocketCAN) CAN interface
///
/// [`Channel::run`] first makes sure the interface is up at the configured bit rate, bouncing it
/// through the [`LinkControl`] if needed, then opens a CAN socket on it and hands every received
/// frame to the handler.
pub struct KernelCanChannel<L = IpLink> {
    options: KernelChannelOptions,
    link: L,
    handler: FrameHandler,
    session: SessionSlot<CanSocket>,
}

impl<L> core::fmt::Debug for KernelCanChannel<L> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("KernelCanChannel")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl KernelCanChannel {
    /// Create a channel which controls the link with the `ip` tool
    pub fn new(
        options: KernelChannelOptions,
        handler: impl Fn(Frame) + Send + Sync + 'static,
    ) -> Self {
        Self::with_link_control(options, IpLink::new(), handler)
    }
}

impl<L: LinkControl> KernelCanChannel<L> {
    /// Create a channel with a custom link controller
    pub fn with_link_control(
        options: KernelChannelOptions,
        link: L,
        handler: impl Fn(Frame) + Send + Sync + 'static,
    ) -> Self {
        Self {
            options,
            link,
            handler: Box::new(handler),
            session: SessionSlot::new(),
        }
    }

    /// The options this channel was created with
    pub fn options(&self) -> &KernelChannelOptions {
        &self.options
    }

    async fn serve(&self, reservation: &mut Reservation<'_, CanSocket>) -> Result<()> {
        let interface = &self.options.interface_name;

        let link_up = bring_up(
            &self.link,
            interface,
            self.options.bit_rate,
            self.options.force_bounce,
        );
        let transition = tokio::select! {
            result = link_up => result.context(LinkSnafu { interface })?,
            _ = &mut reservation.shutdown => return ClosedSnafu.fail(),
        };
        log::debug!("Link {interface}: {transition:?}");

        let socket = Arc::new(CanSocket::open(interface).context(OpenSnafu { interface })?);
        if !reservation.attach(socket.clone()) {
            return ClosedSnafu.fail();
        }

        log::info!("Opened SocketCAN {interface} and listening");
        self.receive_loop(&socket, &mut reservation.shutdown).await
    }

    async fn receive_loop(
        &self,
        socket: &CanSocket,
        shutdown: &mut oneshot::Receiver<()>,
    ) -> Result<()> {
        let interface = &self.options.interface_name;
        loop {
            let result = tokio::select! {
                result = socket.read_frame() => result,
                _ = &mut *shutdown => return ClosedSnafu.fail(),
            };
            match result {
                Ok(frame) => match frame_from_socketcan(&frame) {
                    Some(frame) => (self.handler)(frame),
                    None => log::warn!("Error frame received on {interface}: {frame:?}"),
                },
                Err(e) if e.should_retry() => continue,
                Err(e) => return Err(e).context(ReceiveSnafu { interface }),
            }
        }
    }
}

impl<L: LinkControl> Channel for KernelCanChannel<L> {
    type Error = KernelChannelError;

    async fn run(&self) -> Result<()> {
        // Claimed before the link is touched
        let mut reservation = self.session.reserve().context(AlreadyRunningSnafu)?;
        self.serve(&mut reservation).await
    }

    async fn close(&self) -> Result<()> {
        self.session.close();
        Ok(())
    }

    async fn write_frame(&self, frame: Frame) -> Result<()> {
        let socket = self.session.handle().context(NotOpenSnafu)?;
        let can_frame = frame_to_socketcan(&frame).context(InvalidIdSnafu { id: frame.id })?;
        socket
            .write_frame(can_frame)
            .await
            .context(WriteSnafu {
                interface: &self.options.interface_name,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_frame_conversion() {
        let frame = Frame::new(0x123, &[1, 2, 3]);
        let can_frame = frame_to_socketcan(&frame).unwrap();
        assert_eq!(Id::Standard(StandardId::new(0x123).unwrap()), can_frame.id());
        assert_eq!(Some(frame), frame_from_socketcan(&can_frame));
    }

    #[test]
    fn test_extended_frame_conversion() {
        let frame = Frame::new(0x18EEFF01, &[0xFF; 8]);
        let can_frame = frame_to_socketcan(&frame).unwrap();
        assert_eq!(
            Id::Extended(ExtendedId::new(0x18EEFF01).unwrap()),
            can_frame.id()
        );
        assert_eq!(Some(frame), frame_from_socketcan(&can_frame));
    }

    #[test]
    fn test_id_out_of_range() {
        assert!(frame_to_socketcan(&Frame::new(EXT_ID_MAX + 1, &[])).is_none());
    }

    #[test]
    fn test_remote_frame_conversion() {
        let id = StandardId::new(0x42).unwrap();
        let can_frame = CanFrame::new_remote(id, 4).unwrap();
        let frame = frame_from_socketcan(&can_frame).unwrap();
        assert_eq!(0x42, frame.id);
        assert_eq!(4, frame.dlc);
        assert_eq!([0; 8], frame.data);
    }

    #[tokio::test]
    async fn test_write_before_run() {
        let channel = KernelCanChannel::new(KernelChannelOptions::new("can0"), |_| {});
        let err = channel.write_frame(Frame::new(1, &[])).await.unwrap_err();
        assert!(matches!(err, KernelChannelError::NotOpen));
        assert!(channel.close().await.is_ok());
    }
}
