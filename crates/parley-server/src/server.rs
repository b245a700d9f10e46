//! Accept loop and connection lifecycle for the Parley server.

use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard};
use anyhow::{Context, Result};
use parley_core::{
    ConnectionHandler, HandlerConfig, HandlerError, Router, RouterError, RouterHandle,
};
use parley_protocol::{ErrorCode, Frame};
use parley_transport::{Connection, TcpTransport, Transport};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn, Instrument};

/// How long open sessions get to wind down after shutdown is requested.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Pause after a failed accept.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// A bound server, ready to accept connections.
pub struct Server {
    transport: TcpTransport,
    router: RouterHandle,
    router_task: JoinHandle<()>,
    handler_config: HandlerConfig,
    limiter: Arc<Semaphore>,
    config: Config,
}

impl Server {
    /// Bind the listener and start the router.
    ///
    /// # Errors
    ///
    /// Returns an error if the address is invalid or cannot be bound.
    pub async fn bind(config: Config) -> Result<Self> {
        let addr = config.bind_addr()?;
        let transport = TcpTransport::bind(addr, config.codec())
            .await
            .with_context(|| format!("Failed to bind {addr}"))?;
        let (router, router_task) = Router::spawn(config.router_config());

        Ok(Self {
            transport,
            router,
            router_task,
            handler_config: config.handler_config(),
            limiter: Arc::new(Semaphore::new(config.limits.max_connections.max(1))),
            config,
        })
    }

    /// The address the listener is bound to.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket has no local address.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.transport.local_addr()?)
    }

    /// Serve until Ctrl-C.
    ///
    /// # Errors
    ///
    /// See [`Server::run_until`].
    pub async fn run_until_ctrl_c(self) -> Result<()> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "Failed to install Ctrl-C handler");
            }
        })
        .await
    }

    /// Serve until `shutdown` resolves, then let open sessions wind down.
    ///
    /// # Errors
    ///
    /// Returns an error if the router task panicked.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let Server {
            transport,
            router,
            router_task,
            handler_config,
            limiter,
            config,
        } = self;

        let reporter = config.metrics.enabled.then(|| {
            tokio::spawn(metrics::report_router_stats(
                router.clone(),
                Duration::from_millis(config.metrics.report_interval_ms.max(1)),
            ))
        });

        let mut sessions = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested");
                    break;
                }
                accepted = transport.accept() => match accepted {
                    Ok(connection) => {
                        let Ok(permit) = Arc::clone(&limiter).try_acquire_owned() else {
                            sessions.spawn(reject_full(connection));
                            continue;
                        };
                        let config = handler_config.clone();
                        sessions.spawn(serve(connection, router.clone(), config, permit));
                    }
                    Err(e) => {
                        // Usually out of file descriptors; back off instead of spinning
                        warn!(error = %e, "Failed to accept connection");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                },
                // Reap finished sessions so the set does not grow without bound
                Some(joined) = sessions.join_next(), if !sessions.is_empty() => {
                    if let Err(e) = joined {
                        error!(error = %e, "Session task failed");
                    }
                }
            }
        }

        drop(transport);
        drop(router);
        // The reporter holds a router handle of its own
        if let Some(reporter) = reporter {
            reporter.abort();
        }

        // Sessions hold router handles; once they end the router stops too
        if tokio::time::timeout(SHUTDOWN_GRACE, async {
            while sessions.join_next().await.is_some() {}
        })
        .await
        .is_err()
        {
            warn!(remaining = sessions.len(), "Aborting sessions still open");
            sessions.shutdown().await;
        }

        router_task.await.context("Router task failed")?;
        info!("Server stopped");
        Ok(())
    }
}

/// Run one connection, keeping its slot until it ends.
async fn serve(
    connection: Connection,
    router: RouterHandle,
    config: HandlerConfig,
    _permit: OwnedSemaphorePermit,
) {
    let _guard = ConnectionMetricsGuard::new();
    let id = connection.id().clone();
    let peer = connection.remote_addr();
    debug!(connection = %id, peer = ?peer, "Connection accepted");

    let span = tracing::info_span!("connection", connection = %id);
    let result = ConnectionHandler::new(connection, router, config)
        .run()
        .instrument(span)
        .await;

    if let Err(e) = result {
        metrics::record_identify_failure(failure_label(&e));
        debug!(connection = %id, error = %e, "Connection ended before registration");
    }
}

/// Tell a client the server is full and close the connection.
async fn reject_full(connection: Connection) {
    metrics::record_rejection();
    warn!(
        connection = %connection.id(),
        peer = ?connection.remote_addr(),
        "Connection limit reached"
    );

    let (_, _, _, mut sink) = connection.into_parts();
    let frame = Frame::error(ErrorCode::Unavailable, "Server is full");
    if let Err(e) = sink.send(&frame).await {
        debug!(error = %e, "Failed to send rejection");
    }
    if let Err(e) = sink.close().await {
        debug!(error = %e, "Failed to close rejected connection");
    }
}

fn failure_label(error: &HandlerError) -> &'static str {
    match error {
        HandlerError::HandshakeTimeout => "timeout",
        HandlerError::ClosedBeforeIdentify => "closed",
        HandlerError::UnexpectedFrame(_) => "unexpected_frame",
        HandlerError::InvalidUsername(_) => "invalid_username",
        HandlerError::Router(RouterError::NameTaken(_)) => "name_taken",
        HandlerError::Router(RouterError::Closed) => "unavailable",
        HandlerError::Transport(_) => "transport",
    }
}
