//! In-memory credential store
//!
//! Loads identities from a JSON document keyed by identity:
//!
//! ```json
//! {
//!   "test": {
//!     "secret": "secret",
//!     "pubchans": ["test-chan"],
//!     "subchans": ["test-chan"],
//!     "owner": "some-owner"
//!   }
//! }
//! ```

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::Deserialize;
use tracing::info;

use crate::auth::{Authenticator, CredentialRecord};
use crate::config::AuthSettings;
use crate::utils::CredentialsError;

/// One identity as it appears in a credentials document or config file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CredentialEntry {
    pub secret: String,
    #[serde(default)]
    pub pubchans: Vec<String>,
    #[serde(default)]
    pub subchans: Vec<String>,
    #[serde(default)]
    pub owner: Option<String>,
}

impl CredentialEntry {
    fn into_record(self, identity: String) -> CredentialRecord {
        CredentialRecord {
            identity,
            secret: self.secret,
            pubchans: self.pubchans.into_iter().collect(),
            subchans: self.subchans.into_iter().collect(),
            owner: self.owner,
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct MemoryAuthenticator {
    records: HashMap<String, CredentialRecord>,
}

impl MemoryAuthenticator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces the record for `record.identity`.
    pub fn insert(&mut self, record: CredentialRecord) {
        self.records.insert(record.identity.clone(), record);
    }

    pub fn with_record(mut self, record: CredentialRecord) -> Self {
        self.insert(record);
        self
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn from_entries(entries: HashMap<String, CredentialEntry>) -> Self {
        let records = entries
            .into_iter()
            .map(|(identity, entry)| (identity.clone(), entry.into_record(identity)))
            .collect();
        Self { records }
    }

    pub fn from_json_str(document: &str) -> Result<Self, CredentialsError> {
        let entries: HashMap<String, CredentialEntry> = serde_json::from_str(document)?;
        Ok(Self::from_entries(entries))
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, CredentialsError> {
        let path = path.as_ref();
        let document = fs::read_to_string(path).map_err(|source| CredentialsError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&document)
    }

    /// Builds the store from the `[auth]` settings: the credentials file first,
    /// then inline users, which override file entries with the same identity.
    pub fn from_settings(settings: &AuthSettings) -> Result<Self, CredentialsError> {
        let mut store = match &settings.credentials_file {
            Some(path) => Self::from_json_file(path)?,
            None => Self::new(),
        };
        for (identity, entry) in &settings.users {
            store.insert(entry.clone().into_record(identity.clone()));
        }
        info!(identities = store.len(), "credential store loaded");
        Ok(store)
    }
}

impl Authenticator for MemoryAuthenticator {
    fn lookup(&self, identity: &str) -> Option<CredentialRecord> {
        self.records.get(identity).cloned()
    }
}
