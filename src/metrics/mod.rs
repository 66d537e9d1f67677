//! Broker lifecycle events
//!
//! The broker reports what happens to connections and messages through a
//! [`MetricsSink`]. Sinks are fire-and-forget: `record` must return quickly
//! and never fail, since it is called from connection tasks and from inside
//! publish fan-out.

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::{Mutex, PoisonError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerEvent {
    ConnectionAccepted,
    /// `identity` is `None` when the connection never authenticated.
    ConnectionClosed { identity: Option<String> },
    AuthSucceeded { identity: String },
    AuthFailed { identity: String },
    MessagePublished { identity: String, channel: String },
    MessageDelivered { channel: String },
}

pub trait MetricsSink: Send + Sync + Debug {
    fn record(&self, event: BrokerEvent);
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn record(&self, _event: BrokerEvent) {}
}

/// In-memory counters for broker events.
#[derive(Debug, Default)]
pub struct BrokerCounters {
    state: Mutex<CounterSnapshot>,
}

/// Point-in-time copy of [`BrokerCounters`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CounterSnapshot {
    /// Currently open client sockets.
    pub client_connections: i64,
    pub connections_made: u64,
    pub connections_ready: HashMap<String, u64>,
    pub connections_lost: HashMap<String, u64>,
    /// Closes of connections that never authenticated.
    pub anonymous_lost: u64,
    pub auth_failures: u64,
    pub messages_published: u64,
    pub messages_delivered: u64,
}

impl CounterSnapshot {
    pub fn connections_ready(&self, identity: &str) -> u64 {
        self.connections_ready.get(identity).copied().unwrap_or(0)
    }

    pub fn connections_lost(&self, identity: &str) -> u64 {
        self.connections_lost.get(identity).copied().unwrap_or(0)
    }
}

impl BrokerCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn reset(&self) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = CounterSnapshot::default();
    }
}

impl MetricsSink for BrokerCounters {
    fn record(&self, event: BrokerEvent) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        match event {
            BrokerEvent::ConnectionAccepted => {
                state.client_connections += 1;
                state.connections_made += 1;
            }
            BrokerEvent::ConnectionClosed { identity } => {
                state.client_connections -= 1;
                match identity {
                    Some(identity) => *state.connections_lost.entry(identity).or_default() += 1,
                    None => state.anonymous_lost += 1,
                }
            }
            BrokerEvent::AuthSucceeded { identity } => {
                *state.connections_ready.entry(identity).or_default() += 1;
            }
            BrokerEvent::AuthFailed { .. } => state.auth_failures += 1,
            BrokerEvent::MessagePublished { .. } => state.messages_published += 1,
            BrokerEvent::MessageDelivered { .. } => state.messages_delivered += 1,
        }
    }
}
