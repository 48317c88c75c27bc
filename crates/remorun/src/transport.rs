//! # Transport Abstraction
//!
//! A minimal, async interface for moving bytes between processes.
//!
//! ## Philosophy
//!
//! - **Byte-Oriented**: The Transport knows nothing about frames or messages.
//!   It moves opaque buffers; a buffer handed to `recv` may hold a partial
//!   frame or several frames. Reassembly belongs to `Connection`.
//! - **Duplex**: Sending and receiving are independent. A reader task may be
//!   parked in `recv` while writers call `send`.

use std::fmt;
use std::net::SocketAddr;

use tokio::io::AsyncReadExt;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::Mutex;

const READ_CHUNK: usize = 64 * 1024;

/// Errors that occur at the network/transport layer.
#[derive(Debug, Clone)]
pub enum Error {
    /// The peer is unreachable or the connection was dropped.
    ConnectionLost(String),
    /// The payload cannot be carried by this transport.
    PayloadTooLarge,
    /// Generic I/O error or internal transport failure.
    Io(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionLost(msg) => write!(f, "Connection lost: {}", msg),
            Self::PayloadTooLarge => write!(f, "Payload too large for transport"),
            Self::Io(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::UnexpectedEof => Self::ConnectionLost(e.to_string()),
            _ => Self::Io(e.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// A duplex byte pipe.
///
/// This trait is designed to be object-safe (`Arc<dyn Transport>`).
#[async_trait::async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Writes the whole buffer, in submission order relative to other sends.
    async fn send(&self, payload: &[u8]) -> Result<()>;

    /// Waits for the next chunk of bytes.
    ///
    /// # invariants
    /// - Returns `Ok(None)` once the peer has closed its side.
    /// - Never returns an empty buffer.
    async fn recv(&self) -> Result<Option<Vec<u8>>>;

    /// Closes the sending side; the peer observes end of stream.
    async fn close(&self) -> Result<()>;

    /// Human-readable peer description for logs.
    fn peer_label(&self) -> String {
        "channel".into()
    }
}

/// TCP transport over a split `TcpStream`.
pub struct TcpTransport {
    reader: Mutex<OwnedReadHalf>,
    writer: Mutex<OwnedWriteHalf>,
    peer: Option<SocketAddr>,
}

impl TcpTransport {
    pub async fn connect(addr: SocketAddr) -> std::io::Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        Ok(Self::from_stream(stream))
    }

    pub fn from_stream(stream: TcpStream) -> Self {
        let _ = stream.set_nodelay(true);
        let peer = stream.peer_addr().ok();
        let (reader, writer) = stream.into_split();
        Self {
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
            peer,
        }
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }
}

#[async_trait::async_trait]
impl Transport for TcpTransport {
    async fn send(&self, payload: &[u8]) -> Result<()> {
        let mut writer = self.writer.lock().await;
        writer.write_all(payload).await?;
        writer.flush().await?;
        Ok(())
    }

    async fn recv(&self) -> Result<Option<Vec<u8>>> {
        let mut reader = self.reader.lock().await;
        let mut buf = vec![0u8; READ_CHUNK];
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Ok(None);
        }
        buf.truncate(n);
        Ok(Some(buf))
    }

    async fn close(&self) -> Result<()> {
        let mut writer = self.writer.lock().await;
        writer.shutdown().await?;
        Ok(())
    }

    fn peer_label(&self) -> String {
        match self.peer {
            Some(addr) => addr.to_string(),
            None => "tcp".into(),
        }
    }
}
