//! The `utils` module provides shared pieces used across `feedbroker`:
//! the error taxonomy and logging initialization.

pub mod error;
pub mod logging;

pub use error::{
    AuthenticationError, AuthorizationDenied, BrokerError, ClientError, CredentialsError,
    FramingError, RegistryError,
};

#[cfg(test)]
mod tests {
    use super::logging;

    #[test]
    fn logging_init_accepts_levels() {
        // Should not panic
        logging::init("info");
        logging::init("debug");
        logging::init("warn");
        logging::init("nonsense");
    }
}
