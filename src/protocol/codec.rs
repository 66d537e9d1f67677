//! Frame codec
//!
//! Frame layout, big-endian:
//!
//! ```text
//! u32 length | u8 opcode | body
//! ```
//!
//! `length` counts every byte after the length field itself, so the smallest
//! valid frame has `length == 1`. Identity, channel and banner fields are
//! short strings: a `u8` length followed by UTF-8 bytes. Nonces, proofs,
//! payloads and error text run to the end of the frame.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::protocol::message::{Message, Opcode};
use crate::utils::FramingError;

/// Size of the length prefix.
pub const LENGTH_FIELD: usize = 4;

/// Default upper bound on a frame's declared length.
pub const DEFAULT_MAX_FRAME: usize = 1024 * 1024;

/// Most buffer space reserved ahead of a partially received frame.
pub const RESERVE_STEP: usize = 64 * 1024;

/// Result of a single `decode` attempt.
#[derive(Debug, PartialEq, Eq)]
pub enum Decoded {
    /// A complete frame and the number of input bytes it occupied.
    Frame(Message, usize),
    /// The buffer holds a prefix of a frame. Nothing was consumed.
    NeedMoreData,
}

/// Decode the first frame in `buf`.
///
/// Does not mutate the input; callers advance their buffer by the consumed
/// count. Oversized frames are rejected as soon as the length field is
/// readable, before any of the body has to be buffered.
pub fn decode(buf: &[u8], max_frame: usize) -> Result<Decoded, FramingError> {
    if buf.len() < LENGTH_FIELD {
        return Ok(Decoded::NeedMoreData);
    }

    let declared = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    if declared > max_frame {
        return Err(FramingError::Oversized {
            declared,
            max: max_frame,
        });
    }
    if declared == 0 {
        return Err(FramingError::Malformed("frame has no opcode"));
    }

    let total = LENGTH_FIELD + declared;
    if buf.len() < total {
        return Ok(Decoded::NeedMoreData);
    }

    let mut frame = &buf[LENGTH_FIELD..total];
    let opcode = Opcode::try_from(frame.get_u8()).map_err(FramingError::UnknownOpcode)?;
    let message = decode_body(opcode, frame)?;
    Ok(Decoded::Frame(message, total))
}

fn decode_body(opcode: Opcode, mut body: &[u8]) -> Result<Message, FramingError> {
    let message = match opcode {
        Opcode::Error => Message::Error {
            reason: String::from_utf8_lossy(body).into_owned(),
        },
        Opcode::Info => {
            let banner = read_short_str(&mut body)?;
            Message::Info {
                banner,
                nonce: Bytes::copy_from_slice(body),
            }
        }
        Opcode::Auth => {
            let identity = read_short_str(&mut body)?;
            Message::Auth {
                identity,
                proof: Bytes::copy_from_slice(body),
            }
        }
        Opcode::Publish => {
            let identity = read_short_str(&mut body)?;
            let channel = read_short_str(&mut body)?;
            Message::Publish {
                identity,
                channel,
                payload: Bytes::copy_from_slice(body),
            }
        }
        Opcode::Subscribe => Message::Subscribe {
            channel: read_channel_only(body)?,
        },
        Opcode::Unsubscribe => Message::Unsubscribe {
            channel: read_channel_only(body)?,
        },
    };
    Ok(message)
}

fn read_short_str(body: &mut &[u8]) -> Result<String, FramingError> {
    if body.is_empty() {
        return Err(FramingError::Malformed("missing string length"));
    }
    let len = body.get_u8() as usize;
    if body.len() < len {
        return Err(FramingError::Malformed("string runs past end of frame"));
    }
    let (raw, rest) = body.split_at(len);
    *body = rest;
    String::from_utf8(raw.to_vec()).map_err(|_| FramingError::Malformed("string is not utf-8"))
}

fn read_channel_only(mut body: &[u8]) -> Result<String, FramingError> {
    let channel = read_short_str(&mut body)?;
    if !body.is_empty() {
        return Err(FramingError::Malformed("trailing bytes after channel"));
    }
    Ok(channel)
}

/// Encode `message` into a standalone frame.
pub fn encode(message: &Message) -> Result<Bytes, FramingError> {
    let mut dst = BytesMut::new();
    encode_into(message, &mut dst)?;
    Ok(dst.freeze())
}

fn encode_into(message: &Message, dst: &mut BytesMut) -> Result<(), FramingError> {
    let mut body = BytesMut::new();
    body.put_u8(message.opcode() as u8);
    match message {
        Message::Error { reason } => body.put_slice(reason.as_bytes()),
        Message::Info { banner, nonce } => {
            put_short_str(&mut body, banner)?;
            body.put_slice(nonce);
        }
        Message::Auth { identity, proof } => {
            put_short_str(&mut body, identity)?;
            body.put_slice(proof);
        }
        Message::Publish {
            identity,
            channel,
            payload,
        } => {
            put_short_str(&mut body, identity)?;
            put_short_str(&mut body, channel)?;
            body.put_slice(payload);
        }
        Message::Subscribe { channel } | Message::Unsubscribe { channel } => {
            put_short_str(&mut body, channel)?;
        }
    }

    let declared = u32::try_from(body.len()).map_err(|_| FramingError::Oversized {
        declared: body.len(),
        max: u32::MAX as usize,
    })?;
    dst.reserve(LENGTH_FIELD + body.len());
    dst.put_u32(declared);
    dst.put_slice(&body);
    Ok(())
}

fn put_short_str(body: &mut BytesMut, value: &str) -> Result<(), FramingError> {
    let len = u8::try_from(value.len()).map_err(|_| FramingError::FieldTooLong(value.len()))?;
    body.put_u8(len);
    body.put_slice(value.as_bytes());
    Ok(())
}

/// `tokio_util` adapter over [`decode`] and [`encode`].
#[derive(Debug, Clone)]
pub struct FrameCodec {
    max_frame: usize,
}

impl FrameCodec {
    pub fn new(max_frame: usize) -> Self {
        Self { max_frame }
    }

    pub fn max_frame(&self) -> usize {
        self.max_frame
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME)
    }
}

impl Decoder for FrameCodec {
    type Item = Message;
    type Error = FramingError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Message>, FramingError> {
        match decode(src, self.max_frame)? {
            Decoded::Frame(message, consumed) => {
                src.advance(consumed);
                Ok(Some(message))
            }
            Decoded::NeedMoreData => {
                // Grow toward the declared size in bounded steps so a header
                // alone cannot pin a whole frame's worth of memory.
                if src.len() >= LENGTH_FIELD {
                    let declared = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;
                    let remaining = (LENGTH_FIELD + declared).saturating_sub(src.len());
                    src.reserve(remaining.min(RESERVE_STEP));
                }
                Ok(None)
            }
        }
    }
}

impl Encoder<Message> for FrameCodec {
    type Error = FramingError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), FramingError> {
        encode_into(&item, dst)
    }
}
