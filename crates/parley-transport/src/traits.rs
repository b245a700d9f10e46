//! Transport abstraction traits for Parley.
//!
//! These traits define the interface the connection pumps are written
//! against, so the core never touches a socket type directly.

use async_trait::async_trait;
use parley_protocol::{Frame, ProtocolError};
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub String);

impl ConnectionId {
    /// Create a new connection ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a process-unique connection ID.
    #[must_use]
    pub fn generate() -> Self {
        let n = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);
        Self(format!("conn-{n}"))
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ConnectionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ConnectionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection was closed, possibly in the middle of a frame.
    #[error("Connection closed")]
    ConnectionClosed,

    /// A read or write deadline expired.
    #[error("Connection timed out")]
    Timeout,

    /// Protocol error.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl TransportError {
    /// Whether the connection is finished after this error.
    ///
    /// Terminal errors are handled exactly like a clean end-of-stream.
    /// Everything else is transient: the caller logs it and keeps going.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        match self {
            TransportError::ConnectionClosed | TransportError::Timeout => true,
            TransportError::Protocol(e) => !e.is_recoverable(),
            TransportError::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::UnexpectedEof
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::NotConnected
            ),
        }
    }
}

/// Read half of a connection, yielding whole frames.
#[async_trait]
pub trait FrameSource: Send {
    /// Receive the next frame.
    ///
    /// Returns `None` if the peer closed the stream cleanly.
    async fn recv(&mut self) -> Result<Option<Frame>, TransportError>;
}

/// Write half of a connection, accepting whole frames.
#[async_trait]
pub trait FrameSink: Send {
    /// Encode and write one frame.
    async fn send(&mut self, frame: &Frame) -> Result<(), TransportError>;

    /// Shut down the write direction.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// A listener that produces connections.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Accept a new connection.
    ///
    /// This method waits until a new connection is available or an error occurs.
    async fn accept(&self) -> Result<Connection, TransportError>;

    /// Get the transport name (e.g., "tcp").
    fn name(&self) -> &'static str;
}

/// An accepted or established connection, ready to be split into halves.
pub struct Connection {
    id: ConnectionId,
    remote_addr: Option<SocketAddr>,
    source: Box<dyn FrameSource>,
    sink: Box<dyn FrameSink>,
}

impl Connection {
    /// Assemble a connection from its halves.
    #[must_use]
    pub fn new(
        id: ConnectionId,
        remote_addr: Option<SocketAddr>,
        source: Box<dyn FrameSource>,
        sink: Box<dyn FrameSink>,
    ) -> Self {
        Self {
            id,
            remote_addr,
            source,
            sink,
        }
    }

    /// Get the connection's unique identifier.
    #[must_use]
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// Get the remote address of the connection, if known.
    #[must_use]
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    /// Split into id, remote address, read half and write half.
    #[must_use]
    pub fn into_parts(
        self,
    ) -> (
        ConnectionId,
        Option<SocketAddr>,
        Box<dyn FrameSource>,
        Box<dyn FrameSink>,
    ) {
        (self.id, self.remote_addr, self.source, self.sink)
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("remote_addr", &self.remote_addr)
            .finish_non_exhaustive()
    }
}
