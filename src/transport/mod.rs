//! The `transport` module owns the TCP side of the broker: the listener,
//! the accept loop, and the spawning of one task per connection.

pub mod server;

pub use server::{Server, ShutdownHandle};

#[cfg(test)]
mod tests;
