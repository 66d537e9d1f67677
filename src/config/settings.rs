use std::collections::HashMap;

use serde::Deserialize;

use crate::auth::memory::CredentialEntry;
use crate::protocol::DEFAULT_MAX_FRAME;

/// Top-level configuration settings for the application.
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub broker: BrokerSettings,
    pub auth: AuthSettings,
    pub logging: LogSettings,
}

/// Address the broker listens on.
#[derive(Debug, Deserialize, Clone)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

impl ServerSettings {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Operational limits of the broker engine.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct BrokerSettings {
    /// Banner sent in the `Info` greeting.
    pub name: String,
    pub max_connections: usize,
    /// Largest declared frame length accepted from a peer.
    pub max_frame_size: usize,
    /// Frames queued per connection before fan-out to it is considered failed.
    pub outbound_buffer: usize,
}

/// Credential sources for the in-memory authenticator.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct AuthSettings {
    pub credentials_file: Option<String>,
    #[serde(default)]
    pub users: HashMap<String, CredentialEntry>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LogSettings {
    pub level: String,
}

/// Partial configuration settings loaded from files or environment.
///
/// Missing values are filled from `Settings::default()`.
#[derive(Debug, Deserialize)]
pub struct PartialSettings {
    pub server: Option<PartialServerSettings>,
    pub broker: Option<PartialBrokerSettings>,
    pub auth: Option<AuthSettings>,
    pub logging: Option<PartialLogSettings>,
}

#[derive(Debug, Deserialize)]
pub struct PartialServerSettings {
    pub host: Option<String>,
    pub port: Option<u16>,
}

#[derive(Debug, Deserialize)]
pub struct PartialBrokerSettings {
    pub name: Option<String>,
    pub max_connections: Option<usize>,
    pub max_frame_size: Option<usize>,
    pub outbound_buffer: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct PartialLogSettings {
    pub level: Option<String>,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            name: "feedbroker".to_string(),
            max_connections: 1000,
            max_frame_size: DEFAULT_MAX_FRAME,
            outbound_buffer: 1024,
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerSettings {
                host: "127.0.0.1".to_string(),
                port: 10000,
            },
            broker: BrokerSettings::default(),
            auth: AuthSettings::default(),
            logging: LogSettings {
                level: "info".to_string(),
            },
        }
    }
}
