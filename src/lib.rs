//! # Feedbroker
//!
//! `feedbroker` is an authenticated publish/subscribe broker speaking a small
//! length-prefixed binary protocol over TCP. Peers authenticate with a
//! challenge-response over a per-connection nonce, then publish to and
//! subscribe on named channels within the grants of their identity.
//!
//! ## Core Modules
//!
//! - `protocol`: The wire format: message types and the frame codec.
//! - `auth`: Credential records, the `Authenticator` lookup, and proof checks.
//! - `broker`: The shared registry of connections and channel subscriptions.
//! - `connection`: The per-connection state machine and its socket driver.
//! - `transport`: The TCP server, accept loop and graceful shutdown.
//! - `client`: An async client for the protocol.
//! - `metrics`: Broker lifecycle events and in-memory counters.
//! - `config`: Loading settings from files and the environment.
//! - `utils`: Error types and logging setup.

pub mod auth;
pub mod broker;
pub mod client;
pub mod config;
pub mod connection;
pub mod metrics;
pub mod protocol;
pub mod transport;
pub mod utils;

#[cfg(test)]
mod tests;
