//! Per-connection orchestration.
//!
//! A [`ConnectionHandler`] owns one accepted connection from the first byte
//! to teardown: it identifies the user, registers them with the router,
//! runs the two pumps, and turns every arriving message into a notify.

use parley_protocol::{ErrorCode, Frame, Message, UsernameError};
use parley_transport::{Connection, ConnectionId, FrameSink, FrameSource, TransportError};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::pump::{run_receiver, run_sender, DisconnectReason};
use crate::router::{RouterError, RouterHandle};
use crate::user::{SessionId, User, Username};

/// How long the sender pump may take to flush after a disconnect.
const SENDER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Connection handler configuration.
#[derive(Debug, Clone)]
pub struct HandlerConfig {
    /// Deadline for the identify frame.
    pub handshake_timeout: Duration,
    /// Deadline between frames once active; `None` waits forever.
    pub idle_timeout: Option<Duration>,
    /// Capacity of the user's inbound channel.
    pub inbound_capacity: usize,
    /// Capacity of the user's outbound channel.
    pub outbound_capacity: usize,
}

impl Default for HandlerConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(10),
            idle_timeout: None,
            inbound_capacity: 64,
            outbound_capacity: 64,
        }
    }
}

/// Errors that end a connection before it becomes active.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// No identify frame within the deadline.
    #[error("Identification timed out")]
    HandshakeTimeout,

    /// The peer left before identifying.
    #[error("Connection closed before identification")]
    ClosedBeforeIdentify,

    /// The first frame was something other than an identification.
    #[error("Expected identify frame, got {0}")]
    UnexpectedFrame(&'static str),

    /// The requested username is not acceptable.
    #[error("Invalid username: {0}")]
    InvalidUsername(#[from] UsernameError),

    /// Registration failed.
    #[error(transparent)]
    Router(#[from] RouterError),

    /// Transport error.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

impl HandlerError {
    /// The error frame to send the client, if one makes sense.
    fn client_error(&self) -> Option<Frame> {
        let code = match self {
            HandlerError::InvalidUsername(_) => ErrorCode::InvalidUsername,
            HandlerError::UnexpectedFrame(_) => ErrorCode::ExpectedIdentify,
            HandlerError::Router(RouterError::NameTaken(_)) => ErrorCode::NameTaken,
            HandlerError::Router(RouterError::Closed) => ErrorCode::Unavailable,
            HandlerError::HandshakeTimeout
            | HandlerError::ClosedBeforeIdentify
            | HandlerError::Transport(_) => return None,
        };
        Some(Frame::error(code, self.to_string()))
    }
}

/// Lifecycle of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Accepted, waiting for identification.
    Connecting,
    /// Identified and present in the router's directory.
    Registered,
    /// Pumps running.
    Active,
    /// Finished. Terminal.
    Disconnected,
}

impl ConnectionState {
    /// Whether `next` is a legal successor of this state.
    #[must_use]
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (Connecting, Registered)
                | (Connecting, Disconnected)
                | (Registered, Active)
                | (Registered, Disconnected)
                | (Active, Disconnected)
        )
    }
}

/// How a finished session ended.
#[derive(Debug)]
pub struct SessionSummary {
    /// The user the session was registered as.
    pub username: Username,
    /// Why the receiver stopped, if it stopped on its own.
    pub reason: Option<DisconnectReason>,
    /// Messages read from the client and handed to the router.
    pub forwarded: u64,
}

/// Drives one connection through its lifecycle.
pub struct ConnectionHandler {
    id: ConnectionId,
    remote_addr: Option<SocketAddr>,
    source: Box<dyn FrameSource>,
    sink: Box<dyn FrameSink>,
    router: RouterHandle,
    config: HandlerConfig,
    state: ConnectionState,
}

impl ConnectionHandler {
    /// Create a handler for an accepted connection.
    #[must_use]
    pub fn new(connection: Connection, router: RouterHandle, config: HandlerConfig) -> Self {
        let (id, remote_addr, source, sink) = connection.into_parts();
        Self {
            id,
            remote_addr,
            source,
            sink,
            router,
            config,
            state: ConnectionState::Connecting,
        }
    }

    /// Get the connection's identifier.
    #[must_use]
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// Get the current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Run the connection to completion.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection ended before it became active:
    /// identification failed, the name was taken, or the router is gone.
    pub async fn run(mut self) -> Result<SessionSummary, HandlerError> {
        let username = match self.identify().await {
            Ok(username) => username,
            Err(e) => return Err(self.reject(e).await),
        };

        let (user, endpoints) = User::new(
            username.clone(),
            self.config.inbound_capacity,
            self.config.outbound_capacity,
        );
        if let Err(e) = self.router.register(user).await {
            return Err(self.reject(e.into()).await);
        }
        self.transition(ConnectionState::Registered);

        if let Err(e) = self.sink.send(&Frame::welcome(username.as_str())).await {
            leave(&self.router, &self.id, &username, endpoints.session).await;
            self.transition(ConnectionState::Disconnected);
            return Err(e.into());
        }

        info!(
            connection = %self.id,
            peer = ?self.remote_addr,
            user = %username,
            "User joined"
        );
        self.transition(ConnectionState::Active);

        let ConnectionHandler {
            id,
            source,
            sink,
            router,
            config,
            ..
        } = self;
        let span = info_span!("session", connection = %id, user = %username);

        let (feed_tx, mut feed_rx) = mpsc::channel(config.inbound_capacity.max(1));
        let mut receiver = tokio::spawn(
            run_receiver(source, feed_tx, config.idle_timeout).instrument(span.clone()),
        );
        let mut sender =
            tokio::spawn(run_sender(sink, endpoints.outbound).instrument(span.clone()));
        debug!(connection = %id, "Connection active");

        let forwarded = dispatch(&router, &username, &mut feed_rx, &endpoints.inbound)
            .instrument(span)
            .await;

        // Either the receiver closed its feed or the router went away
        drop(feed_rx);
        if !receiver.is_finished() {
            receiver.abort();
        }
        let reason = (&mut receiver).await.ok();

        leave(&router, &id, &username, endpoints.session).await;
        drop(endpoints.inbound);

        // Deregistration dropped the router's end of the outbound channel,
        // so the sender finishes once it has flushed what is queued
        if tokio::time::timeout(SENDER_DRAIN_TIMEOUT, &mut sender)
            .await
            .is_err()
        {
            warn!(connection = %id, "Sender did not drain in time");
            sender.abort();
        }

        match &reason {
            Some(reason) => {
                info!(connection = %id, user = %username, %reason, forwarded, "User left")
            }
            None => info!(connection = %id, user = %username, forwarded, "User left"),
        }

        Ok(SessionSummary {
            username,
            reason,
            forwarded,
        })
    }

    async fn identify(&mut self) -> Result<Username, HandlerError> {
        let deadline = self.config.handshake_timeout;
        let frame = match tokio::time::timeout(deadline, self.source.recv()).await {
            Err(_) => return Err(HandlerError::HandshakeTimeout),
            Ok(Err(e)) => return Err(e.into()),
            Ok(Ok(None)) => return Err(HandlerError::ClosedBeforeIdentify),
            Ok(Ok(Some(frame))) => frame,
        };

        match frame {
            Frame::Identify { username } => Ok(Username::parse(username)?),
            other => Err(HandlerError::UnexpectedFrame(other.kind())),
        }
    }

    /// Tell the client why, close the connection, and hand the error back.
    async fn reject(&mut self, error: HandlerError) -> HandlerError {
        warn!(
            connection = %self.id,
            peer = ?self.remote_addr,
            error = %error,
            "Identification failed"
        );

        if let Some(frame) = error.client_error() {
            if let Err(e) = self.sink.send(&frame).await {
                debug!(connection = %self.id, error = %e, "Failed to send error frame");
            }
        }
        if let Err(e) = self.sink.close().await {
            debug!(connection = %self.id, error = %e, "Failed to close connection");
        }

        self.transition(ConnectionState::Disconnected);
        error
    }

    fn transition(&mut self, next: ConnectionState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "invalid transition {:?} -> {:?}",
            self.state,
            next
        );
        debug!(connection = %self.id, from = ?self.state, to = ?next, "State change");
        self.state = next;
    }
}

/// Remove this session's registration.
async fn leave(
    router: &RouterHandle,
    id: &ConnectionId,
    username: &Username,
    session: SessionId,
) {
    if let Err(e) = router.deregister(username, session).await {
        debug!(connection = %id, error = %e, "Router already stopped");
    }
}

/// Forward each message from the receiver to the router.
///
/// Returns the number of messages forwarded once the feed closes or the
/// router stops accepting this user's messages.
async fn dispatch(
    router: &RouterHandle,
    username: &Username,
    feed: &mut mpsc::Receiver<Message>,
    inbound: &mpsc::Sender<Message>,
) -> u64 {
    let mut forwarded = 0;

    while let Some(message) = feed.recv().await {
        if message.source() != username.as_str() {
            warn!(claimed = message.source(), "Dropping message with mismatched source");
            continue;
        }

        // Queue first, then notify: the router expects the message to be there
        if inbound.send(message).await.is_err() {
            warn!("Router released this session");
            break;
        }
        if router.notify(username).await.is_err() {
            warn!("Router unavailable");
            break;
        }
        forwarded += 1;
    }

    forwarded
}
