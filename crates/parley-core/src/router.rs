//! The message router.
//!
//! One task owns the [`Directory`] of live users and processes
//! [`RouterEvent`]s strictly one at a time. Connection handlers only ever
//! talk to it through a cloneable [`RouterHandle`], so the directory needs
//! no lock: nothing else can reach it.
//!
//! The loop never waits on a user's channels. A notify is only sent after
//! the message is already queued on the sender's inbound channel, and
//! delivery uses a non-blocking send into the destination's bounded
//! outbound channel. A full outbound channel drops the message; a closed one
//! removes the destination.

use parley_protocol::Message;
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::mpsc::error::{TryRecvError, TrySendError};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::user::{SessionId, User, Username};

/// Router errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RouterError {
    /// Another live session is registered under the name.
    #[error("Username '{0}' is already in use")]
    NameTaken(String),

    /// The router task has stopped.
    #[error("Router is not running")]
    Closed,
}

/// Router configuration.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Capacity of the event queue shared by all handlers.
    pub event_capacity: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            event_capacity: 1024,
        }
    }
}

/// Router statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouterStats {
    /// Number of registered users.
    pub users: usize,
    /// Messages handed to a destination's outbound channel.
    pub delivered: u64,
    /// Messages dropped: unknown destination, full or closed outbound channel.
    pub dropped: u64,
}

/// Events processed by the router loop.
#[derive(Debug)]
pub enum RouterEvent {
    /// Add a user to the directory.
    Register {
        user: User,
        reply: oneshot::Sender<Result<(), RouterError>>,
    },
    /// The named user has exactly one message ready on its inbound channel.
    Notify { name: Username },
    /// The named user's connection has ended. Ignored unless `session` is
    /// the registration currently holding the name.
    Deregister { name: Username, session: SessionId },
    /// Report statistics.
    Stats { reply: oneshot::Sender<RouterStats> },
}

/// Name to channel mappings. A name is in all three maps or in none.
#[derive(Debug, Default)]
struct Directory {
    inbound: HashMap<String, mpsc::Receiver<Message>>,
    outbound: HashMap<String, mpsc::Sender<Message>>,
    sessions: HashMap<String, SessionId>,
}

impl Directory {
    fn insert(&mut self, user: User) {
        let session = user.session();
        let (name, inbound, outbound) = user.into_parts();
        self.inbound.insert(name.as_str().to_string(), inbound);
        self.outbound.insert(name.as_str().to_string(), outbound);
        self.sessions.insert(name.as_str().to_string(), session);
    }

    fn remove(&mut self, name: &str) -> bool {
        let had_inbound = self.inbound.remove(name).is_some();
        let had_outbound = self.outbound.remove(name).is_some();
        self.sessions.remove(name);
        had_inbound || had_outbound
    }

    fn session(&self, name: &str) -> Option<SessionId> {
        self.sessions.get(name).copied()
    }

    /// Whether the name belongs to a session that can still receive.
    fn is_live(&self, name: &str) -> bool {
        self.outbound.get(name).is_some_and(|tx| !tx.is_closed())
    }

    fn len(&self) -> usize {
        self.outbound.len()
    }
}

/// The central message router.
pub struct Router {
    directory: Directory,
    events: mpsc::Receiver<RouterEvent>,
    stats: RouterStats,
}

impl Router {
    /// Create a router and the handle used to reach it.
    #[must_use]
    pub fn new(config: RouterConfig) -> (Self, RouterHandle) {
        info!("Creating router with config: {:?}", config);
        let (tx, rx) = mpsc::channel(config.event_capacity.max(1));
        let router = Self {
            directory: Directory::default(),
            events: rx,
            stats: RouterStats::default(),
        };
        (router, RouterHandle { events: tx })
    }

    /// Create a router and run it on its own task.
    #[must_use]
    pub fn spawn(config: RouterConfig) -> (RouterHandle, JoinHandle<()>) {
        let (router, handle) = Self::new(config);
        let task = tokio::spawn(router.run());
        (handle, task)
    }

    /// Run the router loop until every handle has been dropped.
    pub async fn run(mut self) {
        info!("Router started");
        while let Some(event) = self.events.recv().await {
            self.handle_event(event);
        }
        info!(
            delivered = self.stats.delivered,
            dropped = self.stats.dropped,
            "Router stopped"
        );
    }

    fn handle_event(&mut self, event: RouterEvent) {
        match event {
            RouterEvent::Register { user, reply } => {
                let result = self.register(user);
                if reply.send(result).is_err() {
                    debug!("Registration reply receiver dropped");
                }
            }
            RouterEvent::Notify { name } => self.notify(&name),
            RouterEvent::Deregister { name, session } => self.deregister(&name, session),
            RouterEvent::Stats { reply } => {
                if reply.send(self.stats()).is_err() {
                    debug!("Stats reply receiver dropped");
                }
            }
        }
    }

    fn register(&mut self, user: User) -> Result<(), RouterError> {
        let name = user.name().as_str().to_string();

        if self.directory.is_live(&name) {
            warn!(user = %name, "Rejecting duplicate registration");
            return Err(RouterError::NameTaken(name));
        }

        // Anything still under this name belongs to a session whose sender is gone
        if self.directory.remove(&name) {
            debug!(user = %name, "Replacing stale registration");
        }

        self.directory.insert(user);
        info!(user = %name, users = self.directory.len(), "User registered");
        Ok(())
    }

    fn notify(&mut self, name: &Username) {
        let Some(inbound) = self.directory.inbound.get_mut(name.as_str()) else {
            warn!(user = %name, "Notify for unregistered user");
            return;
        };

        let message = match inbound.try_recv() {
            Ok(message) => message,
            Err(TryRecvError::Empty) => {
                warn!(user = %name, "Notify without a pending message");
                return;
            }
            Err(TryRecvError::Disconnected) => {
                debug!(user = %name, "Inbound channel closed, removing user");
                self.directory.remove(name.as_str());
                return;
            }
        };

        self.deliver(message);
    }

    fn deliver(&mut self, message: Message) {
        let destination = message.destination().to_string();

        let result = self
            .directory
            .outbound
            .get(&destination)
            .map(|outbound| outbound.try_send(message));

        match result {
            Some(Ok(())) => {
                self.stats.delivered += 1;
                trace!(destination = %destination, "Delivered message");
            }
            Some(Err(TrySendError::Full(message))) => {
                self.stats.dropped += 1;
                warn!(
                    source = message.source(),
                    destination = %destination,
                    "Outbound queue full, dropping message"
                );
            }
            Some(Err(TrySendError::Closed(message))) => {
                self.stats.dropped += 1;
                debug!(
                    source = message.source(),
                    destination = %destination,
                    "Destination disconnected, dropping message"
                );
                self.directory.remove(&destination);
            }
            None => {
                self.stats.dropped += 1;
                debug!(destination = %destination, "Unknown destination, dropping message");
            }
        }
    }

    fn deregister(&mut self, name: &Username, session: SessionId) {
        match self.directory.session(name.as_str()) {
            Some(current) if current == session => {
                self.directory.remove(name.as_str());
                info!(user = %name, %session, users = self.directory.len(), "User deregistered");
            }
            Some(current) => {
                debug!(
                    user = %name,
                    %session,
                    %current,
                    "Ignoring deregister for replaced session"
                );
            }
            None => debug!(user = %name, %session, "Deregister for unknown user"),
        }
    }

    fn stats(&self) -> RouterStats {
        RouterStats {
            users: self.directory.len(),
            ..self.stats
        }
    }
}

/// Cloneable handle for sending events to the router.
#[derive(Debug, Clone)]
pub struct RouterHandle {
    events: mpsc::Sender<RouterEvent>,
}

impl RouterHandle {
    /// Register a user.
    ///
    /// # Errors
    ///
    /// Returns [`RouterError::NameTaken`] if a live session already uses the
    /// name, or [`RouterError::Closed`] if the router has stopped.
    pub async fn register(&self, user: User) -> Result<(), RouterError> {
        let (reply, response) = oneshot::channel();
        self.send(RouterEvent::Register { user, reply }).await?;
        response.await.map_err(|_| RouterError::Closed)?
    }

    /// Tell the router the named user has one message ready.
    ///
    /// # Errors
    ///
    /// Returns [`RouterError::Closed`] if the router has stopped.
    pub async fn notify(&self, name: &Username) -> Result<(), RouterError> {
        self.send(RouterEvent::Notify { name: name.clone() }).await
    }

    /// Remove the named user from the directory, provided `session` still
    /// holds the name.
    ///
    /// # Errors
    ///
    /// Returns [`RouterError::Closed`] if the router has stopped.
    pub async fn deregister(
        &self,
        name: &Username,
        session: SessionId,
    ) -> Result<(), RouterError> {
        self.send(RouterEvent::Deregister {
            name: name.clone(),
            session,
        })
        .await
    }

    /// Get router statistics.
    ///
    /// # Errors
    ///
    /// Returns [`RouterError::Closed`] if the router has stopped.
    pub async fn stats(&self) -> Result<RouterStats, RouterError> {
        let (reply, response) = oneshot::channel();
        self.send(RouterEvent::Stats { reply }).await?;
        response.await.map_err(|_| RouterError::Closed)
    }

    async fn send(&self, event: RouterEvent) -> Result<(), RouterError> {
        self.events.send(event).await.map_err(|_| RouterError::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::user::UserEndpoints;

    fn name(s: &str) -> Username {
        Username::parse(s).unwrap()
    }

    async fn join(router: &RouterHandle, user: &str) -> UserEndpoints {
        join_with_capacity(router, user, 8).await
    }

    async fn join_with_capacity(
        router: &RouterHandle,
        user: &str,
        capacity: usize,
    ) -> UserEndpoints {
        let (user, endpoints) = User::new(name(user), 8, capacity);
        router.register(user).await.unwrap();
        endpoints
    }

    async fn send(router: &RouterHandle, from: &UserEndpoints, message: Message) {
        let source = name(message.source());
        from.inbound.send(message).await.unwrap();
        router.notify(&source).await.unwrap();
    }

    #[tokio::test]
    async fn test_directed_delivery() {
        let (router, _task) = Router::spawn(RouterConfig::default());
        let alice = join(&router, "alice").await;
        let mut bob = join(&router, "bob").await;
        let mut carol = join(&router, "carol").await;

        let msg = Message::new("alice", "bob", "hi");
        send(&router, &alice, msg.clone()).await;

        assert_eq!(bob.outbound.recv().await, Some(msg));
        let stats = router.stats().await.unwrap();
        assert_eq!(stats.delivered, 1);
        assert!(carol.outbound.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_self_echo() {
        let (router, _task) = Router::spawn(RouterConfig::default());
        let mut alice = join(&router, "alice").await;

        let msg = Message::new("alice", "alice", "note to self");
        send(&router, &alice, msg.clone()).await;

        assert_eq!(alice.outbound.recv().await, Some(msg));
    }

    #[tokio::test]
    async fn test_unknown_destination_is_dropped() {
        let (router, _task) = Router::spawn(RouterConfig::default());
        let mut alice = join(&router, "alice").await;

        send(&router, &alice, Message::new("alice", "nobody", "hello?")).await;

        let stats = router.stats().await.unwrap();
        assert_eq!(stats.delivered, 0);
        assert_eq!(stats.dropped, 1);
        assert_eq!(stats.users, 1);
        assert!(alice.outbound.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_order_preserved() {
        let (router, _task) = Router::spawn(RouterConfig::default());
        let alice = join(&router, "alice").await;
        let mut bob = join(&router, "bob").await;

        for i in 0..5 {
            send(&router, &alice, Message::new("alice", "bob", format!("m{i}"))).await;
        }

        for i in 0..5 {
            let msg = bob.outbound.recv().await.unwrap();
            assert_eq!(msg.text(), format!("m{i}"));
        }
    }

    #[tokio::test]
    async fn test_duplicate_name_rejected() {
        let (router, _task) = Router::spawn(RouterConfig::default());
        let mut first = join(&router, "alice").await;

        let (second, _endpoints) = User::new(name("alice"), 8, 8);
        assert_eq!(
            router.register(second).await,
            Err(RouterError::NameTaken("alice".into()))
        );

        // The first session still receives
        send(&router, &first, Message::new("alice", "alice", "still here")).await;
        assert_eq!(first.outbound.recv().await.unwrap().text(), "still here");
    }

    #[tokio::test]
    async fn test_stale_registration_is_replaced() {
        let (router, _task) = Router::spawn(RouterConfig::default());
        let first = join(&router, "alice").await;
        // Sender pump gone without a deregister
        drop(first);

        let (second, _endpoints) = User::new(name("alice"), 8, 8);
        assert_eq!(router.register(second).await, Ok(()));
        assert_eq!(router.stats().await.unwrap().users, 1);
    }

    #[tokio::test]
    async fn test_deregister_from_replaced_session_is_ignored() {
        let (router, _task) = Router::spawn(RouterConfig::default());
        let first = join(&router, "alice").await;
        let first_session = first.session;
        // First session's sender is gone, its handler has not deregistered yet
        drop(first.outbound);

        let mut second = join(&router, "alice").await;
        router.deregister(&name("alice"), first_session).await.unwrap();

        assert_eq!(router.stats().await.unwrap().users, 1);
        send(&router, &second, Message::new("alice", "alice", "still mine")).await;
        assert_eq!(second.outbound.recv().await.unwrap().text(), "still mine");

        router.deregister(&name("alice"), second.session).await.unwrap();
        assert_eq!(router.stats().await.unwrap().users, 0);
    }

    #[tokio::test]
    async fn test_deregister_stops_delivery() {
        let (router, _task) = Router::spawn(RouterConfig::default());
        let alice = join(&router, "alice").await;
        let mut bob = join(&router, "bob").await;

        router.deregister(&name("bob"), bob.session).await.unwrap();
        // Router dropped the write end, so bob's feed is closed
        assert_eq!(bob.outbound.recv().await, None);

        send(&router, &alice, Message::new("alice", "bob", "anyone?")).await;
        let stats = router.stats().await.unwrap();
        assert_eq!(stats.users, 1);
        assert_eq!(stats.dropped, 1);
    }

    #[tokio::test]
    async fn test_full_outbound_drops_without_stalling() {
        let (router, _task) = Router::spawn(RouterConfig::default());
        let alice = join(&router, "alice").await;
        let _stalled = join_with_capacity(&router, "bob", 1).await;
        let mut carol = join(&router, "carol").await;

        send(&router, &alice, Message::new("alice", "bob", "fits")).await;
        send(&router, &alice, Message::new("alice", "bob", "overflows")).await;
        send(&router, &alice, Message::new("alice", "carol", "still routed")).await;

        assert_eq!(carol.outbound.recv().await.unwrap().text(), "still routed");
        let stats = router.stats().await.unwrap();
        assert_eq!(stats.delivered, 2);
        assert_eq!(stats.dropped, 1);
    }

    #[tokio::test]
    async fn test_closed_destination_is_removed() {
        let (router, _task) = Router::spawn(RouterConfig::default());
        let alice = join(&router, "alice").await;
        let bob = join(&router, "bob").await;
        drop(bob);

        send(&router, &alice, Message::new("alice", "bob", "gone")).await;

        let stats = router.stats().await.unwrap();
        assert_eq!(stats.users, 1);
        assert_eq!(stats.dropped, 1);
    }

    #[tokio::test]
    async fn test_notify_for_closed_inbound_removes_user() {
        let (router, _task) = Router::spawn(RouterConfig::default());
        let alice = join(&router, "alice").await;
        let UserEndpoints { inbound, outbound, .. } = alice;
        drop(inbound);

        router.notify(&name("alice")).await.unwrap();
        assert_eq!(router.stats().await.unwrap().users, 0);
        drop(outbound);
    }

    #[tokio::test]
    async fn test_concurrent_pairs_do_not_cross() {
        let (router, _task) = Router::spawn(RouterConfig::default());
        // Room for every message, so nothing is dropped before the drain
        let a = join(&router, "a").await;
        let mut b = join_with_capacity(&router, "b", 64).await;
        let c = join(&router, "c").await;
        let mut d = join_with_capacity(&router, "d", 64).await;

        let r1 = router.clone();
        let r2 = router.clone();
        let ab = tokio::spawn(async move {
            for i in 0..50 {
                send(&r1, &a, Message::new("a", "b", format!("ab{i}"))).await;
            }
        });
        let cd = tokio::spawn(async move {
            for i in 0..50 {
                send(&r2, &c, Message::new("c", "d", format!("cd{i}"))).await;
            }
        });
        ab.await.unwrap();
        cd.await.unwrap();

        for i in 0..50 {
            let msg = b.outbound.recv().await.unwrap();
            assert_eq!((msg.source(), msg.text()), ("a", format!("ab{i}").as_str()));
        }
        for i in 0..50 {
            let msg = d.outbound.recv().await.unwrap();
            assert_eq!((msg.source(), msg.text()), ("c", format!("cd{i}").as_str()));
        }
        assert!(b.outbound.try_recv().is_err());
        assert!(d.outbound.try_recv().is_err());

        let stats = router.stats().await.unwrap();
        assert_eq!(stats.delivered, 100);
        assert_eq!(stats.dropped, 0);
    }

    #[tokio::test]
    async fn test_router_stops_when_handles_drop() {
        let (router, task) = Router::spawn(RouterConfig::default());
        drop(router);
        task.await.unwrap();
    }
}
