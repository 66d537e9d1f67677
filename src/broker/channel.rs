//! Channel subscriber sets
//!
//! A `Channel` holds the ids of the connections subscribed to one channel
//! name. Callers synchronize access through the registry lock.

use std::collections::HashSet;

pub type ConnectionId = String;

#[derive(Debug, Default)]
pub struct Channel {
    pub name: String,
    pub subscribers: HashSet<ConnectionId>,
}

impl Channel {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            subscribers: HashSet::new(),
        }
    }

    /// Add a subscriber. Returns `false` if it was already present.
    pub fn subscribe(&mut self, id: ConnectionId) -> bool {
        self.subscribers.insert(id)
    }

    /// Remove a subscriber. Returns `false` if it was not present.
    pub fn unsubscribe(&mut self, id: &ConnectionId) -> bool {
        self.subscribers.remove(id)
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }
}
