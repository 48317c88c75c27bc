//! # Remopack
//!
//! The value layer of the remote-object protocol: a dynamic `Value` type and a
//! small, bounded TLV encoding for it.
//!
//! ## Architecture
//!
//! - `tag`: the closed set of wire tags and how wide each payload is.
//! - `encoder`: a scope-checked writer that back-patches container lengths.
//! - `decoder`: a zero-copy reader over a borrowed slice.
//! - `value`: `Value`/`Kind`, conversions, and the mapping onto the tags.
//!
//! ## Format
//!
//! Every item starts with a one-byte tag. Fixed-width items follow it with
//! their payload; strings, byte blobs and containers follow it with a `u32`
//! body length. Multi-byte numbers are little-endian throughout.
//!
//! Only kinds that may cross a process boundary have a tag. Anything else is
//! rejected before it reaches the wire.

mod decoder;
mod encoder;
mod tag;
mod value;

pub use decoder::Decoder;
pub use decoder::ListIter;
pub use decoder::MapIter;
pub use decoder::StringListIter;
pub use encoder::Encoder;
pub use encoder::Scope;
pub use tag::Tag;
pub use value::Kind;
pub use value::MAX_RECURSION_DEPTH;
pub use value::Value;
pub use value::ValueMap;
pub use value::decode_value;
pub use value::encode_value;

#[cfg(test)]
mod tests;

/// Encoding and decoding failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A byte that is not one of the known tags, or a tag where another was required.
    InvalidTag(u8),
    InvalidUtf8,
    /// Closed a container other than the innermost open one.
    ScopeMismatch { expected: Scope, actual: Scope },
    /// Closed a container while none was open.
    ScopeUnderflow,
    /// Finished the buffer while a container was still open.
    ScopeStillOpen,
    /// Input ended in the middle of an item.
    UnexpectedEnd,
    /// A body longer than a `u32` length can describe.
    BlobTooLarge(usize),
    /// A second value written into a map entry.
    TooManyItems(Scope),
    /// A map entry closed before its value was written.
    EmptyEntry,
    InvalidMapEntry,
    InvalidStringListItem,
    /// Nesting deeper than `MAX_RECURSION_DEPTH`.
    RecursionLimitExceeded,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::InvalidTag(b) => write!(f, "unexpected tag byte {:#04x}", b),
            Error::InvalidUtf8 => write!(f, "string is not valid utf-8"),
            Error::ScopeMismatch { expected, actual } => {
                write!(f, "cannot close {:?} while {:?} is open", expected, actual)
            }
            Error::ScopeUnderflow => write!(f, "no open container to close"),
            Error::ScopeStillOpen => write!(f, "buffer finished with an open container"),
            Error::UnexpectedEnd => write!(f, "input ended inside an item"),
            Error::BlobTooLarge(n) => write!(f, "body of {} bytes does not fit a u32 length", n),
            Error::TooManyItems(s) => write!(f, "{:?} holds exactly one value", s),
            Error::EmptyEntry => write!(f, "map entry closed without a value"),
            Error::InvalidMapEntry => write!(f, "maps only contain entries"),
            Error::InvalidStringListItem => write!(f, "string lists only contain strings"),
            Error::RecursionLimitExceeded => {
                write!(f, "value nests deeper than {} levels", MAX_RECURSION_DEPTH)
            }
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;
