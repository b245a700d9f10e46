//! Length-prefixed framing over any async byte stream.

use async_trait::async_trait;
use bytes::BytesMut;
use parley_protocol::{Frame, FrameCodec};
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

use crate::traits::{Connection, ConnectionId, FrameSink, FrameSource, TransportError};

const INITIAL_READ_CAPACITY: usize = 4096;

impl Connection {
    /// Build a framed connection over any bidirectional byte stream.
    ///
    /// Useful for in-memory streams such as `tokio::io::duplex`.
    #[must_use]
    pub fn from_stream<S>(stream: S, remote_addr: Option<SocketAddr>, codec: FrameCodec) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        Connection::new(
            ConnectionId::generate(),
            remote_addr,
            Box::new(FramedReader::new(read_half, codec)),
            Box::new(FramedWriter::new(write_half, codec)),
        )
    }
}

/// Reads whole frames from a byte stream.
///
/// Bytes are buffered until a complete frame is available, so frame
/// boundaries never depend on how the peer's writes were split in transit.
#[derive(Debug)]
pub struct FramedReader<R> {
    inner: R,
    buffer: BytesMut,
    codec: FrameCodec,
}

impl<R> FramedReader<R> {
    /// Wrap a reader.
    #[must_use]
    pub fn new(inner: R, codec: FrameCodec) -> Self {
        Self {
            inner,
            buffer: BytesMut::with_capacity(INITIAL_READ_CAPACITY),
            codec,
        }
    }

    /// Bytes received but not yet decoded.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}

#[async_trait]
impl<R> FrameSource for FramedReader<R>
where
    R: AsyncRead + Unpin + Send,
{
    async fn recv(&mut self) -> Result<Option<Frame>, TransportError> {
        loop {
            if let Some(frame) = self.codec.decode_from(&mut self.buffer)? {
                trace!(kind = frame.kind(), "Decoded frame");
                return Ok(Some(frame));
            }

            let read = self.inner.read_buf(&mut self.buffer).await?;
            if read == 0 {
                if self.buffer.is_empty() {
                    return Ok(None);
                }
                // Peer went away in the middle of a frame
                self.buffer.clear();
                return Err(TransportError::ConnectionClosed);
            }
        }
    }
}

/// Writes whole frames to a byte stream.
#[derive(Debug)]
pub struct FramedWriter<W> {
    inner: W,
    codec: FrameCodec,
}

impl<W> FramedWriter<W> {
    /// Wrap a writer.
    #[must_use]
    pub fn new(inner: W, codec: FrameCodec) -> Self {
        Self { inner, codec }
    }
}

#[async_trait]
impl<W> FrameSink for FramedWriter<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn send(&mut self, frame: &Frame) -> Result<(), TransportError> {
        let data = self.codec.encode(frame)?;
        self.inner.write_all(&data).await?;
        self.inner.flush().await?;
        trace!(kind = frame.kind(), bytes = data.len(), "Wrote frame");
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.inner.shutdown().await?;
        Ok(())
    }
}
