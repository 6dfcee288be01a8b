//! # Transport Abstraction
//!
//! A minimal, async interface for moving whole frames between two peers.
//!
//! ## Philosophy
//!
//! - **Byte-Oriented**: The Transport knows nothing about Calls, Returns or
//!   values. It moves opaque frames.
//! - **Full Duplex**: `send` and `recv` are independent; one task may block
//!   in `recv` while any number of tasks send.

use std::fmt;
use std::pin::Pin;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use tokio::io::AsyncRead;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWrite;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tokio::sync::mpsc;

/// Largest frame accepted by default, in bytes.
pub const DEFAULT_MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Errors that occur at the network/transport layer.
#[derive(Debug, Clone)]
pub enum Error {
    /// The peer is unreachable or the stream was dropped.
    ConnectionLost(String),
    /// A frame exceeded the configured size limit.
    FrameTooLarge { len: usize, max: usize },
    /// Generic I/O error or internal transport failure.
    Io(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionLost(msg) => write!(f, "Connection lost: {}", msg),
            Self::FrameTooLarge { len, max } => {
                write!(f, "Frame of {} bytes exceeds limit of {}", len, max)
            }
            Self::Io(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// A full-duplex frame pipe.
///
/// This trait is designed to be object-safe (`Arc<dyn Transport>`).
///
/// # Invariants
/// - `recv` returns frames in the order the peer sent them.
/// - `recv` returns `Ok(None)` exactly when the peer ended the stream cleanly.
/// - `send` never interleaves the bytes of two frames.
/// - Only one task calls `recv` at a time.
#[async_trait::async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn send(&self, frame: &[u8]) -> Result<()>;

    async fn recv(&self) -> Result<Option<Vec<u8>>>;

    /// Ends the outbound direction. Idempotent.
    async fn close(&self) -> Result<()>;
}

type BoxedReader = Pin<Box<dyn AsyncRead + Send>>;
type BoxedWriter = Pin<Box<dyn AsyncWrite + Send>>;

/// Length-prefixed framing over any byte stream.
///
/// Each frame is a `u32` little-endian length followed by that many bytes.
pub struct StreamTransport {
    reader: Mutex<BoxedReader>,
    writer: Mutex<BoxedWriter>,
    max_frame_len: usize,
    closed: AtomicBool,
}

impl StreamTransport {
    pub fn new<S>(stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        Self::from_halves(reader, writer)
    }

    /// Builds a transport from already split halves, e.g. `TcpStream::into_split`.
    pub fn from_halves<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + 'static,
        W: AsyncWrite + Send + 'static,
    {
        Self {
            reader: Mutex::new(Box::pin(reader)),
            writer: Mutex::new(Box::pin(writer)),
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            closed: AtomicBool::new(false),
        }
    }

    pub fn with_max_frame_len(mut self, max_frame_len: usize) -> Self {
        self.max_frame_len = max_frame_len;
        self
    }

    /// Two transports joined by an in-memory pipe.
    pub fn pair() -> (Self, Self) {
        let (a, b) = tokio::io::duplex(65536);
        (Self::new(a), Self::new(b))
    }
}

#[async_trait::async_trait]
impl Transport for StreamTransport {
    async fn send(&self, frame: &[u8]) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::ConnectionLost("transport closed".into()));
        }
        if frame.len() > self.max_frame_len {
            return Err(Error::FrameTooLarge { len: frame.len(), max: self.max_frame_len });
        }
        let len = u32::try_from(frame.len())
            .map_err(|_| Error::FrameTooLarge { len: frame.len(), max: u32::MAX as usize })?;

        let mut writer = self.writer.lock().await;
        writer.write_all(&len.to_le_bytes()).await?;
        writer.write_all(frame).await?;
        writer.flush().await?;
        Ok(())
    }

    async fn recv(&self) -> Result<Option<Vec<u8>>> {
        let mut reader = self.reader.lock().await;

        let mut len_buf = [0u8; 4];
        match reader.read_exact(&mut len_buf).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }

        let len = u32::from_le_bytes(len_buf) as usize;
        if len > self.max_frame_len {
            return Err(Error::FrameTooLarge { len, max: self.max_frame_len });
        }

        let mut frame = vec![0u8; len];
        reader.read_exact(&mut frame).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                Error::ConnectionLost("stream ended inside a frame".into())
            } else {
                Error::from(e)
            }
        })?;
        Ok(Some(frame))
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let mut writer = self.writer.lock().await;
        writer.shutdown().await?;
        Ok(())
    }
}

/// A duplex channel transport using tokio mpsc channels.
///
/// Frames sent on one end appear on the other end's `recv`. Closing one end
/// ends the other end's stream.
pub struct ChannelTransport {
    tx: std::sync::Mutex<Option<mpsc::UnboundedSender<Vec<u8>>>>,
    rx: Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
}

impl ChannelTransport {
    pub fn new(tx: mpsc::UnboundedSender<Vec<u8>>, rx: mpsc::UnboundedReceiver<Vec<u8>>) -> Self {
        Self {
            tx: std::sync::Mutex::new(Some(tx)),
            rx: Mutex::new(rx),
        }
    }

    /// Creates a pair of transports connected to each other.
    pub fn pair() -> (Self, Self) {
        let (tx_a, rx_a) = mpsc::unbounded_channel();
        let (tx_b, rx_b) = mpsc::unbounded_channel();
        (Self::new(tx_a, rx_b), Self::new(tx_b, rx_a))
    }

    fn sender(&self) -> Option<mpsc::UnboundedSender<Vec<u8>>> {
        match self.tx.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait::async_trait]
impl Transport for ChannelTransport {
    async fn send(&self, frame: &[u8]) -> Result<()> {
        let tx = self
            .sender()
            .ok_or_else(|| Error::ConnectionLost("transport closed".into()))?;
        tx.send(frame.to_vec())
            .map_err(|_| Error::ConnectionLost("Channel closed".into()))
    }

    async fn recv(&self) -> Result<Option<Vec<u8>>> {
        let mut rx = self.rx.lock().await;
        Ok(rx.recv().await)
    }

    async fn close(&self) -> Result<()> {
        let taken = match self.tx.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        drop(taken);
        Ok(())
    }
}
