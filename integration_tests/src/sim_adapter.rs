use std::{
    pin::Pin,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    task::{Context, Poll},
    time::Duration,
};

use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream, ReadBuf},
    sync::mpsc::{unbounded_channel, UnboundedReceiver},
};
use tugboat_canbus::Frame;

const TIMEOUT: Duration = Duration::from_secs(2);

/// The adapter end of a simulated USB-CAN serial link
#[derive(Debug)]
pub struct SimAdapter {
    stream: DuplexStream,
}

/// Create a connected pair of host device and simulated adapter
pub fn sim_adapter() -> (DuplexStream, SimAdapter) {
    let (host, adapter) = tokio::io::duplex(1024);
    (host, SimAdapter { stream: adapter })
}

impl SimAdapter {
    /// Send raw bytes from the adapter to the host
    pub async fn send(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).await.unwrap();
        self.stream.flush().await.unwrap();
    }

    /// Wait for exactly `len` bytes written by the host
    pub async fn receive(&mut self, len: usize) -> Vec<u8> {
        let mut buf = vec![0; len];
        tokio::time::timeout(TIMEOUT, self.stream.read_exact(&mut buf))
            .await
            .expect("Timed out waiting for bytes from host")
            .unwrap();
        buf
    }

    /// Wait for the host to close its end, returning anything it wrote first
    pub async fn receive_to_end(&mut self) -> Vec<u8> {
        let mut buf = Vec::new();
        tokio::time::timeout(TIMEOUT, self.stream.read_to_end(&mut buf))
            .await
            .expect("Timed out waiting for host to close")
            .unwrap();
        buf
    }
}

/// Collects frames delivered to a channel handler
#[derive(Debug)]
pub struct FrameRecorder {
    rx: UnboundedReceiver<Frame>,
}

/// Create a handler which forwards frames to the returned recorder
pub fn frame_recorder() -> (impl Fn(Frame) + Send + Sync + 'static, FrameRecorder) {
    let (tx, rx) = unbounded_channel();
    let handler = move |frame| {
        // The recorder may have been dropped by a test which is finished with it
        let _ = tx.send(frame);
    };
    (handler, FrameRecorder { rx })
}

impl FrameRecorder {
    /// Wait for the next frame
    pub async fn next(&mut self) -> Frame {
        tokio::time::timeout(TIMEOUT, self.rx.recv())
            .await
            .expect("Timed out waiting for frame")
            .expect("Handler dropped")
    }

    /// Return a frame if one has already been delivered
    pub fn try_next(&mut self) -> Option<Frame> {
        self.rx.try_recv().ok()
    }
}

const NO_LIMIT: usize = usize::MAX;

/// Controls the faults injected by a [`FaultyWriter`]
#[derive(Debug, Clone)]
pub struct WriteFaults {
    limit: Arc<AtomicUsize>,
    fail: Arc<AtomicBool>,
}

impl WriteFaults {
    /// Accept at most `limit` bytes per write from now on
    pub fn limit_writes(&self, limit: usize) {
        self.limit.store(limit, Ordering::Relaxed);
    }

    /// Fail every write from now on
    pub fn fail_writes(&self) {
        self.fail.store(true, Ordering::Relaxed);
    }
}

/// A device wrapper whose writes can be truncated or failed while it is in use
#[derive(Debug)]
pub struct FaultyWriter<D> {
    inner: D,
    faults: WriteFaults,
}

impl<D> FaultyWriter<D> {
    /// Wrap a device which initially behaves normally
    pub fn new(inner: D) -> Self {
        Self {
            inner,
            faults: WriteFaults {
                limit: Arc::new(AtomicUsize::new(NO_LIMIT)),
                fail: Arc::new(AtomicBool::new(false)),
            },
        }
    }

    /// Wrap a device which accepts at most `limit` bytes per write
    pub fn with_limit(inner: D, limit: usize) -> Self {
        let writer = Self::new(inner);
        writer.faults.limit_writes(limit);
        writer
    }

    pub fn faults(&self) -> WriteFaults {
        self.faults.clone()
    }
}

impl<D: AsyncRead + Unpin> AsyncRead for FaultyWriter<D> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl<D: AsyncWrite + Unpin> AsyncWrite for FaultyWriter<D> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        if self.faults.fail.load(Ordering::Relaxed) {
            return Poll::Ready(Err(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "simulated write failure",
            )));
        }
        let len = buf.len().min(self.faults.limit.load(Ordering::Relaxed));
        Pin::new(&mut self.inner).poll_write(cx, &buf[..len])
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}
