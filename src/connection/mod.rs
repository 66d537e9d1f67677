//! The `connection` module drives one peer through the protocol.
//!
//! - `session`: the socket-independent state machine
//! - `handle`: the registry's handle for pushing frames to a connection
//! - `Connection`: owns the socket and runs the session until close

pub mod handle;
pub mod session;

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

use crate::auth::Authenticator;
use crate::broker::{ConnectionId, Registry};
use crate::config::BrokerSettings;
use crate::metrics::{MetricsSink, NoopMetrics};
use crate::protocol::{FrameCodec, Message};

pub use handle::ConnectionHandle;
pub use session::{Action, ConnectionState, Session};

/// Everything a connection shares with the rest of the broker.
#[derive(Clone)]
pub struct BrokerContext {
    pub registry: Arc<Registry>,
    pub authenticator: Arc<dyn Authenticator>,
    pub metrics: Arc<dyn MetricsSink>,
    pub settings: BrokerSettings,
}

impl BrokerContext {
    pub fn new(authenticator: Arc<dyn Authenticator>, settings: BrokerSettings) -> Self {
        let metrics: Arc<dyn MetricsSink> = Arc::new(NoopMetrics);
        Self {
            registry: Arc::new(Registry::new(metrics.clone())),
            authenticator,
            metrics,
            settings,
        }
    }

    /// Replace the metrics sink. Builds a fresh registry reporting to it, so
    /// call this before any connection is accepted.
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.registry = Arc::new(Registry::new(metrics.clone()));
        self.metrics = metrics;
        self
    }
}

/// One accepted socket and its session.
pub struct Connection {
    session: Session,
    framed: Framed<TcpStream, FrameCodec>,
    outbound: mpsc::Receiver<Message>,
    closer: CancellationToken,
    peer: SocketAddr,
}

impl Connection {
    /// `closer` cancels this connection only; the server passes a child of
    /// its shutdown token.
    pub fn accept(
        stream: TcpStream,
        peer: SocketAddr,
        context: &BrokerContext,
        closer: CancellationToken,
    ) -> Self {
        let id = format!("conn-{}", Uuid::new_v4());
        let (tx, rx) = mpsc::channel(context.settings.outbound_buffer.max(1));
        let codec = FrameCodec::new(context.settings.max_frame_size);
        let session = Session::new(id, tx, closer.clone(), context.clone());

        Self {
            session,
            framed: Framed::new(stream, codec),
            outbound: rx,
            closer,
            peer,
        }
    }

    pub fn id(&self) -> &ConnectionId {
        self.session.id()
    }

    /// Run the connection until the peer leaves, the protocol fails, or the
    /// close token fires. The session is closed on return.
    pub async fn run(self) {
        let span = info_span!("connection", id = %self.session.id(), peer = %self.peer);
        self.drive().instrument(span).await
    }

    async fn drive(mut self) {
        info!("connection accepted");

        let greeting = self.session.greeting();
        if !self.send(greeting).await {
            self.session.close();
            return;
        }

        loop {
            tokio::select! {
                biased;

                _ = self.closer.cancelled() => {
                    debug!("close requested");
                    break;
                }

                Some(message) = self.outbound.recv() => {
                    if !self.send(message).await {
                        break;
                    }
                }

                frame = self.framed.next() => match frame {
                    Some(Ok(message)) => match self.session.on_message(message) {
                        Action::Continue => {}
                        Action::Close { reply } => {
                            if let Some(reply) = reply {
                                self.send(reply).await;
                            }
                            break;
                        }
                    },
                    Some(Err(err)) => {
                        warn!(error = %err, "dropping connection");
                        break;
                    }
                    None => {
                        debug!("peer closed connection");
                        break;
                    }
                },
            }
        }

        self.session.close();
        info!(identity = ?self.session.identity(), "connection closed");
    }

    /// Write one frame unless the close token fires first. Returns `false`
    /// when the connection should stop.
    async fn send(&mut self, message: Message) -> bool {
        tokio::select! {
            result = self.framed.send(message) => match result {
                Ok(()) => true,
                Err(err) => {
                    debug!(error = %err, "write failed");
                    false
                }
            },
            _ = self.closer.cancelled() => false,
        }
    }
}
