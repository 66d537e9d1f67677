//! The `broker` module holds the routing table shared by every connection:
//! which connections are live, which channels each one subscribes to, and
//! the fan-out of published messages.

pub mod channel;
pub mod registry;

pub use channel::{Channel, ConnectionId};
pub use registry::Registry;
