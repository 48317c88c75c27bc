//! # Frames
//!
//! `[u32 payloadLength][payload]`, where the payload is the sequential
//! encoding of `id, type, isResponse, data, result.success, result.code,
//! result.message, result.data`.
//!
//! ## Invariants
//! - **Panic Safety**: Decoding never panics on hostile input.
//! - **No Stranding**: `FrameBuffer::next_frame` yields every complete frame
//!   already buffered before asking for more bytes.

use remopack::Decoder;
use remopack::Encoder;
use remopack::Value;
use remopack::ValueMap;
use remopack::decode_value;
use remopack::encode_value;

use crate::error::Error;
use crate::error::Result;
use crate::message::Message;
use crate::message::MessageType;
use crate::message::Outcome;

/// Width of the length prefix.
pub const LEN_PREFIX: usize = 4;

/// Encodes the message payload, without the length prefix.
pub fn encode_message(msg: &Message) -> Result<Vec<u8>> {
    let mut enc = Encoder::new();
    enc.u32(msg.id)?;
    enc.bytes(&msg.message_type.tag())?;
    enc.bool(msg.is_response)?;
    encode_value(&mut enc, &Value::Map(msg.data.clone()))?;
    enc.bool(msg.result.success)?;
    enc.str(&msg.result.code)?;
    enc.str(&msg.result.message)?;
    encode_value(&mut enc, &msg.result.data)?;
    Ok(enc.into_bytes()?)
}

/// Encodes a complete frame: length prefix followed by the payload.
pub fn encode_frame(msg: &Message) -> Result<Vec<u8>> {
    let payload = encode_message(msg)?;
    let len = u32::try_from(payload.len())
        .map_err(|_| Error::Serialization(remopack::Error::BlobTooLarge(payload.len())))?;
    let mut frame = Vec::with_capacity(LEN_PREFIX + payload.len());
    frame.extend_from_slice(&len.to_le_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// Decodes a message payload (the bytes after the length prefix).
pub fn decode_message(payload: &[u8]) -> Result<Message> {
    let mut dec = Decoder::new(payload);

    let id = dec.u32()?;
    let tag_bytes = dec.bytes()?;
    let tag: [u8; 16] = tag_bytes
        .try_into()
        .map_err(|_| Error::InvalidTypeTag(tag_bytes.len()))?;
    let message_type = MessageType::from_tag(&tag).ok_or(Error::UnknownMessageType(tag))?;
    let is_response = dec.bool()?;
    let data = match decode_value(&mut dec)? {
        Value::Map(map) => map,
        Value::Invalid => ValueMap::new(),
        other => return Err(Error::InvalidPayload(other.type_name())),
    };
    let success = dec.bool()?;
    let code = dec.str()?.to_owned();
    let message = dec.str()?.to_owned();
    let result_data = decode_value(&mut dec)?;

    if dec.remaining() != 0 {
        return Err(Error::TrailingBytes(dec.remaining()));
    }

    Ok(Message {
        id,
        message_type,
        is_response,
        data,
        result: Outcome::new(success, code, message, result_data),
    })
}

/// Incremental reassembly of length-prefixed frames from a byte stream.
///
/// The declared length is read once the 4 prefix bytes are present; the
/// frame is released once the whole body has arrived.
#[derive(Debug)]
pub struct FrameBuffer {
    buf: Vec<u8>,
    /// Declared length of the frame currently being assembled.
    incoming: Option<usize>,
    max_len: usize,
}

impl FrameBuffer {
    pub fn new(max_len: usize) -> Self {
        Self {
            buf: Vec::with_capacity(4096),
            incoming: None,
            max_len,
        }
    }

    /// Appends bytes read from the stream.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Bytes buffered but not yet released as frames.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Returns the next complete frame payload, or `None` if more bytes are needed.
    ///
    /// # Errors
    /// Returns `Error::FrameTooLarge` when the declared length exceeds the limit.
    /// The buffer is unusable afterwards.
    pub fn next_frame(&mut self) -> Result<Option<Vec<u8>>> {
        let len = match self.incoming {
            Some(len) => len,
            None => {
                if self.buf.len() < LEN_PREFIX {
                    return Ok(None);
                }
                let mut prefix = [0u8; LEN_PREFIX];
                prefix.copy_from_slice(&self.buf[..LEN_PREFIX]);
                let len = u32::from_le_bytes(prefix) as usize;
                if len > self.max_len {
                    return Err(Error::FrameTooLarge { len, max: self.max_len });
                }
                self.buf.drain(..LEN_PREFIX);
                self.incoming = Some(len);
                len
            }
        };

        if self.buf.len() < len {
            return Ok(None);
        }

        let frame: Vec<u8> = self.buf.drain(..len).collect();
        self.incoming = None;
        Ok(Some(frame))
    }
}
