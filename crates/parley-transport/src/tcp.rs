//! TCP transport implementation.

use async_trait::async_trait;
use parley_protocol::FrameCodec;
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tracing::{debug, info, warn};

use crate::framed::{FramedReader, FramedWriter};
use crate::traits::{Connection, ConnectionId, Transport, TransportError};

/// TCP transport.
pub struct TcpTransport {
    listener: TcpListener,
    codec: FrameCodec,
}

impl TcpTransport {
    /// Bind a listener.
    ///
    /// # Errors
    ///
    /// Returns an error if binding to the address fails.
    pub async fn bind(addr: SocketAddr, codec: FrameCodec) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr).await?;

        info!(
            "TCP transport listening on {}",
            listener.local_addr().unwrap_or(addr)
        );

        Ok(Self { listener, codec })
    }

    /// Get the local address this transport is bound to.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket has no local address.
    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(self.listener.local_addr()?)
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn accept(&self) -> Result<Connection, TransportError> {
        let (stream, addr) = self.listener.accept().await?;
        debug!("Accepted TCP connection from {}", addr);
        Ok(split_stream(stream, Some(addr), self.codec))
    }

    fn name(&self) -> &'static str {
        "tcp"
    }
}

/// Connect to a server.
///
/// # Errors
///
/// Returns an error if the connection cannot be established.
pub async fn connect(
    addr: impl ToSocketAddrs,
    codec: FrameCodec,
) -> Result<Connection, TransportError> {
    let stream = TcpStream::connect(addr).await?;
    let remote_addr = stream.peer_addr().ok();
    debug!(?remote_addr, "Connected");
    Ok(split_stream(stream, remote_addr, codec))
}

fn split_stream(
    stream: TcpStream,
    remote_addr: Option<SocketAddr>,
    codec: FrameCodec,
) -> Connection {
    // Chat frames are small and latency matters more than packet count
    if let Err(e) = stream.set_nodelay(true) {
        warn!(error = %e, "Failed to set TCP_NODELAY");
    }

    let (read_half, write_half) = stream.into_split();
    Connection::new(
        ConnectionId::generate(),
        remote_addr,
        Box::new(FramedReader::new(read_half, codec)),
        Box::new(FramedWriter::new(write_half, codec)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_protocol::Frame;

    #[tokio::test]
    async fn test_accept_and_connect() {
        let transport = TcpTransport::bind("127.0.0.1:0".parse().unwrap(), FrameCodec::new())
            .await
            .unwrap();
        let addr = transport.local_addr().unwrap();
        assert_eq!(transport.name(), "tcp");

        let client = tokio::spawn(async move {
            let connection = connect(addr, FrameCodec::new()).await.unwrap();
            let (_, remote, _source, mut sink) = connection.into_parts();
            assert_eq!(remote, Some(addr));
            sink.send(&Frame::identify("alice")).await.unwrap();
            sink.close().await.unwrap();
        });

        let connection = transport.accept().await.unwrap();
        assert!(connection.remote_addr().is_some());
        let (_, _, mut source, _sink) = connection.into_parts();

        assert_eq!(source.recv().await.unwrap(), Some(Frame::identify("alice")));
        assert_eq!(source.recv().await.unwrap(), None);
        client.await.unwrap();
    }
}
