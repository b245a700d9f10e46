//! # parley-transport
//!
//! Transport layer for the Parley chat service.
//!
//! A connection is split into a [`FrameSource`] (read half) and a
//! [`FrameSink`] (write half) so each direction can be driven by its own
//! task. Both halves speak whole frames: the length-prefixed framing from
//! `parley-protocol` is applied here, on top of any byte stream.
//!
//! ```rust,ignore
//! use parley_transport::{TcpTransport, Transport};
//!
//! let transport = TcpTransport::bind("127.0.0.1:8080".parse()?, codec).await?;
//! let connection = transport.accept().await?;
//! let (id, remote_addr, mut source, mut sink) = connection.into_parts();
//! while let Some(frame) = source.recv().await? {
//!     sink.send(&frame).await?;
//! }
//! ```

pub mod framed;
pub mod tcp;
pub mod traits;

pub use framed::{FramedReader, FramedWriter};
pub use tcp::{connect, TcpTransport};
pub use traits::{Connection, ConnectionId, FrameSink, FrameSource, Transport, TransportError};
