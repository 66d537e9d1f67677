//! Protocol messages
//!
//! `Message` is the decoded form of a single frame. Each variant maps to one
//! opcode; see `Opcode` for the on-wire values.

use bytes::Bytes;

/// Wire opcodes. Values are protocol constants shared with every peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    Error = 0,
    Info = 1,
    Auth = 2,
    Publish = 3,
    Subscribe = 4,
    Unsubscribe = 5,
}

impl TryFrom<u8> for Opcode {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, u8> {
        match value {
            0 => Ok(Opcode::Error),
            1 => Ok(Opcode::Info),
            2 => Ok(Opcode::Auth),
            3 => Ok(Opcode::Publish),
            4 => Ok(Opcode::Subscribe),
            5 => Ok(Opcode::Unsubscribe),
            other => Err(other),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Broker greeting carrying the per-connection nonce.
    Info { banner: String, nonce: Bytes },
    Auth { identity: String, proof: Bytes },
    /// Sent by publishers and fanned out to subscribers. On fan-out `identity`
    /// is always the publisher's authenticated identity.
    Publish {
        identity: String,
        channel: String,
        payload: Bytes,
    },
    Subscribe { channel: String },
    Unsubscribe { channel: String },
    Error { reason: String },
}

impl Message {
    pub fn opcode(&self) -> Opcode {
        match self {
            Message::Info { .. } => Opcode::Info,
            Message::Auth { .. } => Opcode::Auth,
            Message::Publish { .. } => Opcode::Publish,
            Message::Subscribe { .. } => Opcode::Subscribe,
            Message::Unsubscribe { .. } => Opcode::Unsubscribe,
            Message::Error { .. } => Opcode::Error,
        }
    }

    /// Value of the frame's length field once encoded: the opcode byte plus
    /// the body.
    pub fn encoded_len(&self) -> usize {
        let body = match self {
            Message::Info { banner, nonce } => 1 + banner.len() + nonce.len(),
            Message::Auth { identity, proof } => 1 + identity.len() + proof.len(),
            Message::Publish {
                identity,
                channel,
                payload,
            } => 2 + identity.len() + channel.len() + payload.len(),
            Message::Subscribe { channel } | Message::Unsubscribe { channel } => 1 + channel.len(),
            Message::Error { reason } => reason.len(),
        };
        1 + body
    }

    pub fn error(reason: impl Into<String>) -> Self {
        Message::Error {
            reason: reason.into(),
        }
    }
}
