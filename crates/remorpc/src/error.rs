//! # Error Definitions
//!
//! Failures of the message codec. Any of these on an inbound frame means the
//! stream is out of sync and the connection carrying it must be closed.

use remopack::Error as PackError;

/// Codec failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The underlying value serialization failed.
    Serialization(PackError),
    /// The 16-byte type tag is not one of the known message types.
    UnknownMessageType([u8; 16]),
    /// The type field was not exactly 16 bytes long.
    InvalidTypeTag(usize),
    /// A frame declared a length above the configured limit.
    FrameTooLarge { len: usize, max: usize },
    /// The data field was not a map.
    InvalidPayload(&'static str),
    /// Bytes were left over after the last message field.
    TrailingBytes(usize),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Serialization(e) => write!(f, "Serialization error: {}", e),
            Self::UnknownMessageType(tag) => write!(f, "Unknown message type {:02X?}", tag),
            Self::InvalidTypeTag(len) => write!(f, "Message type tag has {} bytes, expected 16", len),
            Self::FrameTooLarge { len, max } => {
                write!(f, "Frame of {} bytes exceeds the limit of {} bytes", len, max)
            }
            Self::InvalidPayload(found) => write!(f, "Message data must be a Map, found {}", found),
            Self::TrailingBytes(n) => write!(f, "{} trailing bytes after message", n),
        }
    }
}

impl std::error::Error for Error {}

impl From<PackError> for Error {
    fn from(e: PackError) -> Self { Self::Serialization(e) }
}

/// A specialized Result type for codec operations.
pub type Result<T> = std::result::Result<T, Error>;
