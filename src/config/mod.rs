mod settings;

use config::{Config, ConfigError, Environment, File};

use settings::PartialSettings;

pub use settings::{AuthSettings, BrokerSettings, LogSettings, ServerSettings, Settings};

/// Config file consulted when no explicit path is given.
pub const DEFAULT_CONFIG_FILE: &str = "config/default";

/// Prefix for environment overrides, e.g. `FEEDBROKER_SERVER__PORT=9000`.
pub const ENV_PREFIX: &str = "FEEDBROKER";

/// Loads the configuration from the default file and environment variables.
pub fn load_config() -> Result<Settings, ConfigError> {
    load_config_from(None)
}

/// Loads `path` (or the default file when `None`), then environment
/// variables, and merges the result over `Settings::default()`.
///
/// An explicit `path` must exist; the default file is optional.
pub fn load_config_from(path: Option<&str>) -> Result<Settings, ConfigError> {
    let file = match path {
        Some(path) => File::with_name(path).required(true),
        None => File::with_name(DEFAULT_CONFIG_FILE).required(false),
    };

    let builder = Config::builder().add_source(file).add_source(
        Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true),
    );

    let config = builder.build()?;

    // Try to deserialize what is available
    let partial: PartialSettings = config.try_deserialize()?;

    Ok(merge(partial, Settings::default()))
}

fn merge(partial: PartialSettings, default: Settings) -> Settings {
    let server = partial.server;
    let broker = partial.broker;

    Settings {
        server: ServerSettings {
            host: server
                .as_ref()
                .and_then(|s| s.host.clone())
                .unwrap_or(default.server.host),
            port: server
                .as_ref()
                .and_then(|s| s.port)
                .unwrap_or(default.server.port),
        },
        broker: BrokerSettings {
            name: broker
                .as_ref()
                .and_then(|b| b.name.clone())
                .unwrap_or(default.broker.name),
            max_connections: broker
                .as_ref()
                .and_then(|b| b.max_connections)
                .unwrap_or(default.broker.max_connections),
            max_frame_size: broker
                .as_ref()
                .and_then(|b| b.max_frame_size)
                .unwrap_or(default.broker.max_frame_size),
            outbound_buffer: broker
                .as_ref()
                .and_then(|b| b.outbound_buffer)
                .unwrap_or(default.broker.outbound_buffer),
        },
        auth: partial.auth.unwrap_or(default.auth),
        logging: LogSettings {
            level: partial
                .logging
                .and_then(|l| l.level)
                .unwrap_or(default.logging.level),
        },
    }
}
