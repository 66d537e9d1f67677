//! The `client` module is a thin async client for the broker protocol.
//!
//! It performs the authentication handshake and then exposes subscribe,
//! unsubscribe, publish and a blocking `read` for deliveries. There is no
//! reconnection; a dropped connection surfaces as [`ClientError::Closed`].
//!
//! [`ClientError::Closed`]: crate::utils::ClientError::Closed

pub mod pubsub_client;
pub use pubsub_client::{Client, Delivery};
