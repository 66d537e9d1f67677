//! The `protocol` module owns the binary wire format: the `Message` type and
//! the length-prefixed frame codec. It has no knowledge of protocol semantics
//! such as authentication order or permissions.

pub mod codec;
pub mod message;

pub use codec::{DEFAULT_MAX_FRAME, Decoded, FrameCodec, decode, encode};
pub use message::{Message, Opcode};
