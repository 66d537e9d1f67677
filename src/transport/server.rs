//! Broker server
//!
//! `Server` binds a TCP listener and runs the accept loop. Every accepted
//! socket gets its own [`Connection`] task, cancelled through a child of the
//! server's shutdown token and tracked so shutdown can wait for it. Both
//! `serve_forever` and [`ShutdownHandle::shutdown`] return only after every
//! connection task has finished and deregistered.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, ToSocketAddrs};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::auth::Authenticator;
use crate::broker::Registry;
use crate::config::BrokerSettings;
use crate::connection::{BrokerContext, Connection};
use crate::metrics::MetricsSink;
use crate::utils::BrokerError;

pub struct Server {
    listener: TcpListener,
    context: BrokerContext,
    shutdown: CancellationToken,
    tasks: TaskTracker,
}

/// Stops a running [`Server`] from another task.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    token: CancellationToken,
    tasks: TaskTracker,
    registry: Arc<Registry>,
}

impl ShutdownHandle {
    /// Stop accepting, close every connection, and return once all of them
    /// have deregistered.
    pub async fn shutdown(&self) {
        self.cancel();
        self.tasks.close();
        self.tasks.wait().await;
        debug!(live = self.registry.len(), "connections drained");
    }

    /// Request shutdown without waiting for the drain.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Server {
    pub async fn bind(
        addr: impl ToSocketAddrs,
        authenticator: Arc<dyn Authenticator>,
        settings: BrokerSettings,
    ) -> Result<Self, BrokerError> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self::new(listener, authenticator, settings))
    }

    /// Adopt an already bound std listener.
    pub fn from_std(
        listener: std::net::TcpListener,
        authenticator: Arc<dyn Authenticator>,
        settings: BrokerSettings,
    ) -> Result<Self, BrokerError> {
        listener.set_nonblocking(true)?;
        let listener = TcpListener::from_std(listener)?;
        Ok(Self::new(listener, authenticator, settings))
    }

    pub fn new(
        listener: TcpListener,
        authenticator: Arc<dyn Authenticator>,
        settings: BrokerSettings,
    ) -> Self {
        Self {
            listener,
            context: BrokerContext::new(authenticator, settings),
            shutdown: CancellationToken::new(),
            tasks: TaskTracker::new(),
        }
    }

    /// Report events to `metrics`. Must be set before `serve_forever`.
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.context = self.context.with_metrics(metrics);
        self
    }

    pub fn local_addr(&self) -> Result<SocketAddr, BrokerError> {
        Ok(self.listener.local_addr()?)
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.context.registry
    }

    /// Number of authenticated connections.
    pub fn connections(&self) -> usize {
        self.context.registry.len()
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            token: self.shutdown.clone(),
            tasks: self.tasks.clone(),
            registry: self.context.registry.clone(),
        }
    }

    /// Accept connections until shutdown is requested, then wait for every
    /// connection task to close.
    ///
    /// Accept failures are logged and the loop keeps going. Dropping the
    /// returned future cancels every connection.
    pub async fn serve_forever(&self) -> Result<(), BrokerError> {
        let max_connections = self.context.settings.max_connections;
        let _cancel_on_drop = self.shutdown.clone().drop_guard();

        info!(addr = ?self.listener.local_addr().ok(), "broker listening");

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.cancelled() => break,

                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        if self.shutdown.is_cancelled() {
                            break;
                        }
                        if self.tasks.len() >= max_connections {
                            warn!(%peer, max_connections, "connection limit reached, refusing");
                            drop(stream);
                            continue;
                        }
                        if let Err(err) = stream.set_nodelay(true) {
                            debug!(%peer, error = %err, "failed to set TCP_NODELAY");
                        }
                        let connection = Connection::accept(
                            stream,
                            peer,
                            &self.context,
                            self.shutdown.child_token(),
                        );
                        self.tasks.spawn(connection.run());
                    }
                    Err(err) => {
                        warn!(error = %err, "accept failed");
                    }
                },
            }
        }

        info!(open = self.tasks.len(), "shutting down, closing connections");
        self.tasks.close();
        self.tasks.wait().await;
        info!("broker stopped");
        Ok(())
    }
}
