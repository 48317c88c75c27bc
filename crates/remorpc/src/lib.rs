//! # RemoRPC
//!
//! The message codec of the remote-object protocol.
//!
//! ## Architecture
//!
//! A `Message` is one request or response. On the wire it is a frame: a
//! little-endian `u32` length followed by the message fields, each encoded
//! with `remopack`. `FrameBuffer` turns an arbitrary stream of bytes back
//! into whole frames.

pub mod error;
pub mod frame;
pub mod message;

pub use error::Error;
pub use error::Result;
pub use frame::FrameBuffer;
pub use frame::LEN_PREFIX;
pub use frame::decode_message;
pub use frame::encode_frame;
pub use frame::encode_message;
pub use message::Message;
pub use message::MessageType;
pub use message::Outcome;
pub use message::keys;

#[cfg(test)]
mod tests;
