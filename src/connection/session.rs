//! Connection state machine
//!
//! `Session` implements the broker side of the protocol for one connection,
//! independent of the socket:
//!
//! ```text
//! Connected -> AwaitingAuth -> Authenticated -> Closed
//!      \______________\_______________\_________/
//! ```
//!
//! The driver feeds it decoded messages and acts on the returned [`Action`].
//! Registry registration happens on successful authentication; the matching
//! deregistration happens exactly once, in [`Session::close`], which also runs
//! on drop so an aborted task still cleans up.

use std::collections::HashSet;

use bytes::Bytes;
use tokio::sync::mpsc::Sender;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::auth::{CredentialRecord, verify_proof};
use crate::broker::ConnectionId;
use crate::connection::{BrokerContext, ConnectionHandle};
use crate::metrics::BrokerEvent;
use crate::protocol::Message;
use crate::utils::{AuthenticationError, AuthorizationDenied};

/// Bytes of randomness in the `Info` nonce.
pub const NONCE_LEN: usize = 4;

/// Reason text sent to a peer whose authentication fails.
pub const AUTH_FAILED: &str = "authentication failed";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    AwaitingAuth,
    Authenticated,
    Closed,
}

/// What the driver must do after a message has been handled.
#[derive(Debug, PartialEq, Eq)]
pub enum Action {
    Continue,
    /// Send `reply` if present, then close the socket.
    Close { reply: Option<Message> },
}

impl Action {
    fn close() -> Self {
        Action::Close { reply: None }
    }
}

pub struct Session {
    id: ConnectionId,
    nonce: [u8; NONCE_LEN],
    state: ConnectionState,
    identity: Option<String>,
    pubchans: HashSet<String>,
    subchans: HashSet<String>,
    subscriptions: HashSet<String>,
    outbound: Sender<Message>,
    closer: CancellationToken,
    context: BrokerContext,
}

impl Session {
    /// Creates a session for a freshly accepted socket with a new random nonce.
    pub fn new(
        id: ConnectionId,
        outbound: Sender<Message>,
        closer: CancellationToken,
        context: BrokerContext,
    ) -> Self {
        context.metrics.record(BrokerEvent::ConnectionAccepted);
        Self {
            id,
            nonce: rand::random(),
            state: ConnectionState::Connected,
            identity: None,
            pubchans: HashSet::new(),
            subchans: HashSet::new(),
            subscriptions: HashSet::new(),
            outbound,
            closer,
            context,
        }
    }

    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }

    pub fn nonce(&self) -> &[u8] {
        &self.nonce
    }

    pub fn subscriptions(&self) -> &HashSet<String> {
        &self.subscriptions
    }

    /// The `Info` frame to send on accept. Moves the session to `AwaitingAuth`.
    pub fn greeting(&mut self) -> Message {
        if self.state == ConnectionState::Connected {
            self.state = ConnectionState::AwaitingAuth;
        }
        Message::Info {
            banner: self.context.settings.name.clone(),
            nonce: Bytes::copy_from_slice(&self.nonce),
        }
    }

    pub fn on_message(&mut self, message: Message) -> Action {
        match (self.state, message) {
            (ConnectionState::Closed, _) => Action::close(),
            (ConnectionState::AwaitingAuth, Message::Auth { identity, proof }) => {
                self.on_auth(identity, proof)
            }
            (ConnectionState::Connected | ConnectionState::AwaitingAuth, other) => {
                warn!(opcode = ?other.opcode(), "message before authentication");
                Action::close()
            }
            (ConnectionState::Authenticated, Message::Subscribe { channel }) => {
                self.on_subscribe(channel);
                Action::Continue
            }
            (ConnectionState::Authenticated, Message::Unsubscribe { channel }) => {
                self.on_unsubscribe(&channel);
                Action::Continue
            }
            (
                ConnectionState::Authenticated,
                Message::Publish {
                    identity,
                    channel,
                    payload,
                },
            ) => {
                self.on_publish(&identity, &channel, payload);
                Action::Continue
            }
            (ConnectionState::Authenticated, Message::Error { reason }) => {
                info!(%reason, "peer reported error");
                Action::close()
            }
            (ConnectionState::Authenticated, other) => {
                warn!(opcode = ?other.opcode(), "unexpected message after authentication");
                Action::close()
            }
        }
    }

    fn on_auth(&mut self, identity: String, proof: Bytes) -> Action {
        let record = match self.authenticate(&identity, &proof) {
            Ok(record) => record,
            Err(err) => {
                info!(error = %err, "authentication failed");
                self.context
                    .metrics
                    .record(BrokerEvent::AuthFailed { identity });
                return Action::Close {
                    reply: Some(Message::error(AUTH_FAILED)),
                };
            }
        };

        let handle = ConnectionHandle::new(
            self.id.clone(),
            identity.clone(),
            self.outbound.clone(),
            self.closer.clone(),
        );
        if let Err(err) = self.context.registry.register(handle) {
            error!(error = %err, "registration aborted");
            return Action::close();
        }

        self.state = ConnectionState::Authenticated;
        self.pubchans = record.pubchans;
        self.subchans = record.subchans;
        self.identity = Some(identity.clone());
        info!(identity = %identity, "authenticated");
        self.context
            .metrics
            .record(BrokerEvent::AuthSucceeded { identity });
        Action::Continue
    }

    fn authenticate(
        &self,
        identity: &str,
        proof: &[u8],
    ) -> Result<CredentialRecord, AuthenticationError> {
        let record = self
            .context
            .authenticator
            .lookup(identity)
            .ok_or_else(|| AuthenticationError::UnknownIdentity(identity.to_string()))?;
        if !verify_proof(&self.nonce, &record.secret, proof) {
            return Err(AuthenticationError::ProofMismatch(identity.to_string()));
        }
        Ok(record)
    }

    fn authorize(
        &self,
        grants: &HashSet<String>,
        channel: &str,
        action: &'static str,
    ) -> Result<(), AuthorizationDenied> {
        if grants.contains(channel) {
            return Ok(());
        }
        Err(AuthorizationDenied {
            identity: self.identity.clone().unwrap_or_default(),
            channel: channel.to_string(),
            action,
        })
    }

    fn on_subscribe(&mut self, channel: String) {
        if let Err(denied) = self.authorize(&self.subchans, &channel, "subscribe") {
            debug!(%denied, "dropping subscribe");
            return;
        }
        self.context.registry.subscribe(&self.id, &channel);
        debug!(channel = %channel, "subscribed");
        self.subscriptions.insert(channel);
    }

    fn on_unsubscribe(&mut self, channel: &str) {
        self.subscriptions.remove(channel);
        self.context.registry.unsubscribe(&self.id, channel);
        debug!(channel = %channel, "unsubscribed");
    }

    fn on_publish(&mut self, claimed: &str, channel: &str, payload: Bytes) {
        if let Err(denied) = self.authorize(&self.pubchans, channel, "publish") {
            debug!(%denied, "dropping publish");
            return;
        }
        let Some(identity) = self.identity.as_deref() else {
            return;
        };
        if !claimed.is_empty() && claimed != identity {
            debug!(claimed = %claimed, "ignoring identity claimed in publish");
        }
        // Fan-out re-encodes with the authenticated identity, which can push
        // the frame past what subscribers' codecs accept.
        let size = Message::Publish {
            identity: identity.to_string(),
            channel: channel.to_string(),
            payload: payload.clone(),
        }
        .encoded_len();
        let max = self.context.settings.max_frame_size;
        if size > max {
            warn!(channel = %channel, size, max, "dropping publish over the frame limit");
            return;
        }
        let delivered = self.context.registry.publish(identity, channel, payload);
        debug!(channel = %channel, delivered, "published");
    }

    /// Move to `Closed`: deregister, cancel the handle, report the close.
    /// Calls after the first are no-ops.
    pub fn close(&mut self) {
        if self.state == ConnectionState::Closed {
            return;
        }
        let registered = self.state == ConnectionState::Authenticated;
        self.state = ConnectionState::Closed;

        if registered {
            self.context.registry.deregister(&self.id);
        }
        self.subscriptions.clear();
        self.closer.cancel();
        self.context.metrics.record(BrokerEvent::ConnectionClosed {
            identity: self.identity.clone(),
        });
        debug!(id = %self.id, "session closed");
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}
