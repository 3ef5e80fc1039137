use std::sync::Arc;

use snafu::{OptionExt, ResultExt, Snafu};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf},
    sync::{oneshot, Mutex},
};
use tokio_serial::SerialPortBuilderExt;

use crate::{
    bitrate::UnsupportedBitRateError,
    channel::{Channel, FrameHandler},
    config::SerialChannelOptions,
    frame::Frame,
    session::{Reservation, SessionSlot},
};

use super::{
    codec::{encode_frame, Decoded, ReceiveBuffer, COMMAND_FRAME_LEN},
    settings::Settings,
};

/// Maximum number of bytes taken from the device per read
const READ_CHUNK_SIZE: usize = 32;

/// Error returned by [`SerialCanChannel`]
#[derive(Debug, Snafu)]
pub enum SerialChannelError {
    /// The configured bit rate cannot be set on the adapter
    #[snafu(display("Cannot configure USB-CAN adapter: {source}"))]
    BitRate {
        /// The lookup failure
        source: UnsupportedBitRateError,
    },
    /// The serial device could not be opened
    #[snafu(display("Failed to open serial port {port_name}: {source}"))]
    Open {
        /// Path of the serial device
        port_name: String,
        /// The underlying error
        source: tokio_serial::Error,
    },
    /// Reading from the device failed
    #[snafu(display("Failed reading from {port_name}: {source}"))]
    Read {
        /// Path of the serial device
        port_name: String,
        /// The underlying error
        source: std::io::Error,
    },
    /// The device reported end of stream
    #[snafu(display("Serial port {port_name} disconnected"))]
    Disconnected {
        /// Path of the serial device
        port_name: String,
    },
    /// Writing to the device failed
    #[snafu(display("Failed writing to {port_name}: {source}"))]
    Write {
        /// Path of the serial device
        port_name: String,
        /// The underlying error
        source: std::io::Error,
    },
    /// The device accepted only part of a frame
    #[snafu(display("Sent {written} of {expected} bytes to {port_name}"))]
    ShortWrite {
        /// Path of the serial device
        port_name: String,
        /// Bytes accepted by the device
        written: usize,
        /// Length of the encoded frame
        expected: usize,
    },
    /// Releasing the device failed
    #[snafu(display("Failed closing {port_name}: {source}"))]
    Close {
        /// Path of the serial device
        port_name: String,
        /// The underlying error
        source: std::io::Error,
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

type Result<T> = std::result::Result<T, SerialChannelError>;

type Writer = Mutex<Box<dyn AsyncWrite + Send + Unpin>>;

/// Write a complete buffer with a single write, treating a partial write as an error
async fn send_bytes<W>(writer: &mut W, port_name: &str, bytes: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let written = writer
        .write(bytes)
        .await
        .context(WriteSnafu { port_name })?;
    if written != bytes.len() {
        return ShortWriteSnafu {
            port_name,
            written,
            expected: bytes.len(),
        }
        .fail();
    }
    writer.flush().await.context(WriteSnafu { port_name })
}

/// A channel on a USB-CAN serial adapter
///
/// [`Channel::run`] opens the serial port, configures the adapter bit rate, and then reads and
/// decodes the adapter byte stream, handing each complete frame to the handler in the order it was
/// received. Malformed input is dropped and the decoder resynchronizes on the next frame.
///
/// Writes and close are serialized against each other by a lock on the open device; the receive
/// state is owned by the read loop alone.
pub struct SerialCanChannel {
    options: SerialChannelOptions,
    handler: FrameHandler,
    session: SessionSlot<Writer>,
}

impl core::fmt::Debug for SerialCanChannel {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SerialCanChannel")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl SerialCanChannel {
    /// Create a channel
    ///
    /// Nothing is opened until [`Channel::run`] is called.
    pub fn new(
        options: SerialChannelOptions,
        handler: impl Fn(Frame) + Send + Sync + 'static,
    ) -> Self {
        Self {
            options,
            handler: Box::new(handler),
            session: SessionSlot::new(),
        }
    }

    /// The options this channel was created with
    pub fn options(&self) -> &SerialChannelOptions {
        &self.options
    }

    /// Run the channel on an already open byte stream instead of the configured serial port
    ///
    /// Behaves exactly like [`Channel::run`] once the device is open.
    pub async fn run_with_device<D>(&self, device: D) -> Result<()>
    where
        D: AsyncRead + AsyncWrite + Send + 'static,
    {
        let settings = self.settings_frame()?;
        let mut reservation = self.session.reserve().context(AlreadyRunningSnafu)?;
        self.serve(device, &settings, &mut reservation).await
    }

    fn settings_frame(&self) -> Result<[u8; COMMAND_FRAME_LEN]> {
        Settings::new(self.options.bit_rate)
            .to_bytes()
            .context(BitRateSnafu)
    }

    async fn serve<D>(
        &self,
        device: D,
        settings: &[u8],
        reservation: &mut Reservation<'_, Writer>,
    ) -> Result<()>
    where
        D: AsyncRead + AsyncWrite + Send + 'static,
    {
        let port_name = &self.options.port_name;
        let (reader, mut writer) = tokio::io::split(device);

        tokio::select! {
            result = send_bytes(&mut writer, port_name, settings) => result?,
            _ = &mut reservation.shutdown => return ClosedSnafu.fail(),
        }
        let writer: Box<dyn AsyncWrite + Send + Unpin> = Box::new(writer);
        if !reservation.attach(Arc::new(Mutex::new(writer))) {
            return ClosedSnafu.fail();
        }

        log::info!("Opened USB-CAN adapter on {port_name} and listening");
        self.receive_loop(reader, &mut reservation.shutdown).await
    }

    async fn receive_loop<R>(
        &self,
        mut reader: ReadHalf<R>,
        shutdown: &mut oneshot::Receiver<()>,
    ) -> Result<()>
    where
        R: AsyncRead,
    {
        let mut pending = ReceiveBuffer::new();
        let mut chunk = [0u8; READ_CHUNK_SIZE];
        loop {
            let n = tokio::select! {
                result = reader.read(&mut chunk) => result.context(ReadSnafu {
                    port_name: &self.options.port_name,
                })?,
                _ = &mut *shutdown => return ClosedSnafu.fail(),
            };
            if n == 0 {
                return DisconnectedSnafu {
                    port_name: &self.options.port_name,
                }
                .fail();
            }

            pending.extend(&chunk[..n]);
            for decoded in pending.decode() {
                match decoded {
                    Decoded::Frame(frame) => (self.handler)(frame),
                    Decoded::Command(command) => match Settings::parse(&command) {
                        Some(settings) => log::debug!("Settings frame: {settings:?}"),
                        None => log::debug!("Command frame: {command:02X?}"),
                    },
                    Decoded::Skipped(count) => log::debug!("Error frame, skipped {count} bytes"),
                    Decoded::Malformed(e) => log::debug!("Error frame: {e}"),
                }
            }
        }
    }
}

impl Channel for SerialCanChannel {
    type Error = SerialChannelError;

    async fn run(&self) -> Result<()> {
        // Reject an unsupported bit rate before touching the device
        let settings = self.settings_frame()?;
        let mut reservation = self.session.reserve().context(AlreadyRunningSnafu)?;
        let port = tokio_serial::new(&self.options.port_name, self.options.serial_baud_rate)
            .open_native_async()
            .context(OpenSnafu {
                port_name: &self.options.port_name,
            })?;
        self.serve(port, &settings, &mut reservation).await
    }

    async fn close(&self) -> Result<()> {
        let Some(writer) = self.session.close() else {
            return Ok(());
        };
        let mut writer = writer.lock().await;
        writer.shutdown().await.context(CloseSnafu {
            port_name: &self.options.port_name,
        })
    }

    async fn write_frame(&self, frame: Frame) -> Result<()> {
        let writer = self.session.handle().context(NotOpenSnafu)?;
        let mut writer = writer.lock().await;
        send_bytes(&mut **writer, &self.options.port_name, &encode_frame(&frame)).await
    }
}
