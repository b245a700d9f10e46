//! Connection pumps.
//!
//! Each connection runs two pumps on their own tasks. The receiver reads
//! frames off the wire and feeds chat messages into a channel; the sender
//! drains a channel of routed messages back onto the wire.

use parley_protocol::{Frame, Message};
use parley_transport::{FrameSink, FrameSource, TransportError};
use std::fmt;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Consecutive transient read errors tolerated before giving up on a peer.
pub const MAX_CONSECUTIVE_ERRORS: usize = 16;

/// Why a receiver pump stopped.
#[derive(Debug)]
pub enum DisconnectReason {
    /// The peer closed the stream.
    PeerClosed,
    /// Nothing arrived within the idle deadline.
    IdleTimeout,
    /// The transport failed in a way the stream cannot recover from.
    Transport(TransportError),
    /// Too many transient errors in a row.
    TooManyErrors,
    /// Nobody is reading the feed any more.
    FeedClosed,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisconnectReason::PeerClosed => f.write_str("peer closed"),
            DisconnectReason::IdleTimeout => f.write_str("idle timeout"),
            DisconnectReason::Transport(e) => write!(f, "transport error: {e}"),
            DisconnectReason::TooManyErrors => f.write_str("too many errors"),
            DisconnectReason::FeedClosed => f.write_str("feed closed"),
        }
    }
}

/// Read messages from a connection into `feed` until the peer goes away.
///
/// Returning drops `feed`, which is how the rest of the system learns the
/// connection is gone. Transient errors are logged and skipped; frames other
/// than chat messages are ignored.
pub async fn run_receiver(
    mut source: Box<dyn FrameSource>,
    feed: mpsc::Sender<Message>,
    idle_timeout: Option<Duration>,
) -> DisconnectReason {
    let mut consecutive_errors = 0;

    loop {
        let next = match idle_timeout {
            Some(limit) => match tokio::time::timeout(limit, source.recv()).await {
                Ok(next) => next,
                Err(_) => return DisconnectReason::IdleTimeout,
            },
            None => source.recv().await,
        };

        match next {
            Ok(Some(Frame::Message(message))) => {
                consecutive_errors = 0;
                if feed.send(message).await.is_err() {
                    return DisconnectReason::FeedClosed;
                }
            }
            Ok(Some(frame)) => {
                consecutive_errors = 0;
                debug!(kind = frame.kind(), "Ignoring unexpected frame");
            }
            Ok(None) => return DisconnectReason::PeerClosed,
            Err(e) if e.is_terminal() => return DisconnectReason::Transport(e),
            Err(e) => {
                consecutive_errors += 1;
                warn!(error = %e, consecutive_errors, "Read error");
                if consecutive_errors >= MAX_CONSECUTIVE_ERRORS {
                    return DisconnectReason::TooManyErrors;
                }
            }
        }
    }
}

/// Write every message from `outbound` to a connection.
///
/// Stops when the channel closes or the peer is gone, then shuts down the
/// write direction.
pub async fn run_sender(mut sink: Box<dyn FrameSink>, mut outbound: mpsc::Receiver<Message>) {
    while let Some(message) = outbound.recv().await {
        match sink.send(&Frame::Message(message)).await {
            Ok(()) => {}
            Err(e) if e.is_terminal() => {
                debug!(error = %e, "Peer gone, stopping sender");
                break;
            }
            Err(e) => warn!(error = %e, "Write error"),
        }
    }

    if let Err(e) = sink.close().await {
        debug!(error = %e, "Failed to shut down write half");
    }
}
