//! User registration records.
//!
//! A [`User`] is what a connection handler hands to the router: the routing
//! key plus the router's ends of the two per-user channels. The handler keeps
//! the opposite ends in [`UserEndpoints`].

use parley_protocol::{validate_username, Message, UsernameError};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

/// A validated username, the routing key for a session.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Username(String);

impl Username {
    /// Validate and wrap a username.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is empty, too long, or contains
    /// characters that cannot be addressed.
    pub fn parse(name: impl Into<String>) -> Result<Self, UsernameError> {
        let name = name.into();
        validate_username(&name)?;
        Ok(Self(name))
    }

    /// Get the name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Username {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Username {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Identifies one registration of a name.
///
/// A name can be registered again after its previous session went stale,
/// so teardown events carry this to avoid removing the newer session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(u64);

impl SessionId {
    fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// One live participant, as seen by the router.
#[derive(Debug)]
pub struct User {
    name: Username,
    session: SessionId,
    /// Messages from the network waiting to be routed.
    inbound: mpsc::Receiver<Message>,
    /// Messages routed to this user, drained by its sender pump.
    outbound: mpsc::Sender<Message>,
}

/// The connection handler's ends of a user's channels.
#[derive(Debug)]
pub struct UserEndpoints {
    /// The registration these channels belong to.
    pub session: SessionId,
    /// Write end of the inbound channel.
    pub inbound: mpsc::Sender<Message>,
    /// Read end of the outbound channel.
    pub outbound: mpsc::Receiver<Message>,
}

impl User {
    /// Create a user with two fresh bounded channels.
    ///
    /// Capacities below one are raised to one.
    #[must_use]
    pub fn new(
        name: Username,
        inbound_capacity: usize,
        outbound_capacity: usize,
    ) -> (Self, UserEndpoints) {
        let (inbound_tx, inbound_rx) = mpsc::channel(inbound_capacity.max(1));
        let (outbound_tx, outbound_rx) = mpsc::channel(outbound_capacity.max(1));
        let session = SessionId::next();

        let user = Self {
            name,
            session,
            inbound: inbound_rx,
            outbound: outbound_tx,
        };
        let endpoints = UserEndpoints {
            session,
            inbound: inbound_tx,
            outbound: outbound_rx,
        };
        (user, endpoints)
    }

    /// The routing key.
    #[must_use]
    pub fn name(&self) -> &Username {
        &self.name
    }

    /// The registration this record belongs to.
    #[must_use]
    pub fn session(&self) -> SessionId {
        self.session
    }

    /// Split into name, inbound read end, and outbound write end.
    #[must_use]
    pub fn into_parts(self) -> (Username, mpsc::Receiver<Message>, mpsc::Sender<Message>) {
        (self.name, self.inbound, self.outbound)
    }
}
