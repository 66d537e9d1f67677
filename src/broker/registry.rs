//! Broker registry
//!
//! The registry is the only shared, cross-connection state in the broker:
//! - the table of authenticated, live connections
//! - the channel -> subscriber index used for fan-out
//!
//! Concurrency and usage notes:
//! - All state sits behind one `std::sync::Mutex`. Every operation takes the
//!   lock only for the map read or mutation it needs; nothing awaits or
//!   writes to a socket while holding it.
//! - `publish` snapshots the subscriber handles under the lock and delivers
//!   after releasing it. Delivery never waits: a subscriber whose outbound
//!   buffer is full, or whose task is gone, is asked to close and skipped.
//! - Invariant: a connection id is in a channel's subscriber set iff the
//!   connection is registered and has subscribed to that channel.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

use crate::broker::channel::{Channel, ConnectionId};
use crate::connection::ConnectionHandle;
use crate::metrics::{BrokerEvent, MetricsSink, NoopMetrics};
use crate::protocol::Message;
use crate::utils::RegistryError;

#[derive(Debug)]
struct ConnectionEntry {
    handle: ConnectionHandle,
    channels: HashSet<String>,
}

#[derive(Debug, Default)]
struct RegistryState {
    connections: HashMap<ConnectionId, ConnectionEntry>,
    channels: HashMap<String, Channel>,
}

#[derive(Debug)]
pub struct Registry {
    state: Mutex<RegistryState>,
    metrics: Arc<dyn MetricsSink>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new(Arc::new(NoopMetrics))
    }
}

impl Registry {
    pub fn new(metrics: Arc<dyn MetricsSink>) -> Self {
        Self {
            state: Mutex::new(RegistryState::default()),
            metrics,
        }
    }

    fn state(&self) -> MutexGuard<'_, RegistryState> {
        // A panic elsewhere must not wedge routing for every other connection.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert a connection into the table.
    ///
    /// A duplicate id leaves the existing entry untouched.
    pub fn register(&self, handle: ConnectionHandle) -> Result<(), RegistryError> {
        let mut state = self.state();
        if state.connections.contains_key(&handle.id) {
            return Err(RegistryError::DuplicateConnection(handle.id));
        }
        debug!(id = %handle.id, identity = %handle.identity, "connection registered");
        state.connections.insert(
            handle.id.clone(),
            ConnectionEntry {
                handle,
                channels: HashSet::new(),
            },
        );
        Ok(())
    }

    /// Remove a connection and all of its subscriptions.
    ///
    /// Returns `false` if the id was not registered, making repeat calls no-ops.
    pub fn deregister(&self, id: &ConnectionId) -> bool {
        let mut state = self.state();
        let Some(entry) = state.connections.remove(id) else {
            return false;
        };

        for name in &entry.channels {
            let now_empty = match state.channels.get_mut(name) {
                Some(channel) => {
                    channel.unsubscribe(id);
                    channel.is_empty()
                }
                None => false,
            };
            if now_empty {
                state.channels.remove(name);
            }
        }

        debug!(id = %id, channels = entry.channels.len(), "connection deregistered");
        true
    }

    /// Add `channel` to a registered connection's subscriptions.
    ///
    /// Unknown connections are ignored; they may have just deregistered.
    pub fn subscribe(&self, id: &ConnectionId, channel: &str) -> bool {
        let mut state = self.state();
        let RegistryState {
            connections,
            channels,
        } = &mut *state;

        let Some(entry) = connections.get_mut(id) else {
            return false;
        };
        entry.channels.insert(channel.to_string());
        channels
            .entry(channel.to_string())
            .or_insert_with(|| Channel::new(channel))
            .subscribe(id.clone())
    }

    /// Remove `channel` from a connection's subscriptions. Idempotent.
    pub fn unsubscribe(&self, id: &ConnectionId, channel: &str) -> bool {
        let mut state = self.state();
        let RegistryState {
            connections,
            channels,
        } = &mut *state;

        let Some(entry) = connections.get_mut(id) else {
            return false;
        };
        if !entry.channels.remove(channel) {
            return false;
        }
        if let Some(c) = channels.get_mut(channel) {
            c.unsubscribe(id);
            if c.is_empty() {
                channels.remove(channel);
            }
        }
        true
    }

    /// Fan `payload` out to every subscriber of `channel`, the publisher
    /// included if it is subscribed.
    ///
    /// Returns the number of subscribers the message was queued for.
    pub fn publish(&self, identity: &str, channel: &str, payload: Bytes) -> usize {
        let targets: Vec<ConnectionHandle> = {
            let state = self.state();
            match state.channels.get(channel) {
                Some(c) => c
                    .subscribers
                    .iter()
                    .filter_map(|id| state.connections.get(id))
                    .map(|entry| entry.handle.clone())
                    .collect(),
                None => Vec::new(),
            }
        };

        self.metrics.record(BrokerEvent::MessagePublished {
            identity: identity.to_string(),
            channel: channel.to_string(),
        });

        if targets.is_empty() {
            debug!(channel = %channel, "no subscribers");
            return 0;
        }

        let message = Message::Publish {
            identity: identity.to_string(),
            channel: channel.to_string(),
            payload,
        };

        let mut delivered = 0;
        for target in targets {
            match target.deliver(message.clone()) {
                Ok(()) => {
                    delivered += 1;
                    self.metrics.record(BrokerEvent::MessageDelivered {
                        channel: channel.to_string(),
                    });
                }
                Err(TrySendError::Full(_)) => {
                    warn!(id = %target.id, identity = %target.identity, "outbound buffer full, closing subscriber");
                    target.close();
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(id = %target.id, "subscriber already closing");
                    target.close();
                }
            }
        }
        delivered
    }

    pub fn len(&self) -> usize {
        self.state().connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state().connections.is_empty()
    }

    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.state().connections.contains_key(id)
    }

    /// Ids currently subscribed to `channel`.
    pub fn subscribers(&self, channel: &str) -> HashSet<ConnectionId> {
        self.state()
            .channels
            .get(channel)
            .map(|c| c.subscribers.clone())
            .unwrap_or_default()
    }

    /// Channels `id` is subscribed to, or `None` if it is not registered.
    pub fn subscriptions(&self, id: &ConnectionId) -> Option<HashSet<String>> {
        self.state()
            .connections
            .get(id)
            .map(|entry| entry.channels.clone())
    }

    /// Number of channels with at least one subscriber.
    pub fn channel_count(&self) -> usize {
        self.state().channels.len()
    }
}
