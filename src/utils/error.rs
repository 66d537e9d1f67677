//! The `error` module defines the error types used within `feedbroker`.
//!
//! Errors are split by blast radius. Framing, authentication and socket errors
//! are fatal to a single connection only; authorization denials are dropped
//! silently; registry errors indicate a broken invariant and abort the
//! affected registration.

use std::io;

use thiserror::Error;

use crate::broker::ConnectionId;

/// Malformed or oversized frame on the wire. Fatal to the connection.
#[derive(Debug, Error)]
pub enum FramingError {
    #[error("oversized frame: declared {declared} bytes, limit is {max}")]
    Oversized { declared: usize, max: usize },
    #[error("unknown opcode {0}")]
    UnknownOpcode(u8),
    #[error("malformed frame: {0}")]
    Malformed(&'static str),
    #[error("field too long: {0} bytes (max 255)")]
    FieldTooLong(usize),
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

/// Unknown identity or a proof that does not match. Fatal to the connection.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthenticationError {
    #[error("unknown identity {0}")]
    UnknownIdentity(String),
    #[error("proof mismatch for identity {0}")]
    ProofMismatch(String),
}

/// A subscribe or publish outside the identity's grant.
///
/// Never surfaced to the peer.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("{identity} may not {action} on channel {channel}")]
pub struct AuthorizationDenied {
    pub identity: String,
    pub channel: String,
    pub action: &'static str,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("connection {0} is already registered")]
    DuplicateConnection(ConnectionId),
}

/// Failure loading a credential store.
#[derive(Debug, Error)]
pub enum CredentialsError {
    #[error("failed to read credentials file {path}: {source}")]
    Read { path: String, source: io::Error },
    #[error("invalid credentials document: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Errors surfaced by the client wrapper.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Framing(#[from] FramingError),
    #[error("broker reported error: {0}")]
    Broker(String),
    #[error("unexpected message from broker: {0}")]
    UnexpectedMessage(&'static str),
    #[error("connection closed by broker")]
    Closed,
}

/// Process-level errors: startup, configuration and the accept loop.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
    #[error(transparent)]
    Credentials(#[from] CredentialsError),
}
