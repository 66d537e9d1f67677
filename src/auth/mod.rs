//! Authentication
//!
//! The broker authenticates a connection with a challenge-response over the
//! per-connection nonce: the peer proves knowledge of its secret by sending
//! `SHA-256(nonce ++ secret)`. Credential storage sits behind the narrow
//! [`Authenticator`] lookup so backends can be swapped without touching the
//! proof scheme, which stays inside the broker.

pub mod memory;

use std::collections::HashSet;
use std::sync::Arc;

use sha2::{Digest, Sha256};

pub use memory::MemoryAuthenticator;

/// Length in bytes of an authentication proof.
pub const PROOF_LEN: usize = 32;

/// Credentials and grants for one identity. Read-only to the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialRecord {
    pub identity: String,
    pub secret: String,
    pub pubchans: HashSet<String>,
    pub subchans: HashSet<String>,
    pub owner: Option<String>,
}

impl CredentialRecord {
    pub fn new(identity: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            secret: secret.into(),
            pubchans: HashSet::new(),
            subchans: HashSet::new(),
            owner: None,
        }
    }

    pub fn with_pubchans<I, S>(mut self, channels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.pubchans = channels.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_subchans<I, S>(mut self, channels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.subchans = channels.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }
}

/// Credential lookup by identity. `None` means the identity is unknown.
pub trait Authenticator: Send + Sync {
    fn lookup(&self, identity: &str) -> Option<CredentialRecord>;
}

impl<T: Authenticator + ?Sized> Authenticator for Arc<T> {
    fn lookup(&self, identity: &str) -> Option<CredentialRecord> {
        (**self).lookup(identity)
    }
}

/// Compute the proof a peer must present for `nonce` and `secret`.
///
/// The proof is `SHA-256(nonce ++ secret)`, 32 bytes. Peers must use the same
/// hash; SHA-1 proofs are rejected.
pub fn compute_proof(nonce: &[u8], secret: &str) -> [u8; PROOF_LEN] {
    let mut hasher = Sha256::new();
    hasher.update(nonce);
    hasher.update(secret.as_bytes());
    hasher.finalize().into()
}

/// Compare a received proof against the expected one.
///
/// Runs over every byte regardless of where the first difference is.
pub fn verify_proof(nonce: &[u8], secret: &str, proof: &[u8]) -> bool {
    let expected = compute_proof(nonce, secret);
    if proof.len() != expected.len() {
        return false;
    }
    expected
        .iter()
        .zip(proof)
        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}
