//! # Framed Connection
//!
//! Turns a byte `Transport` into a stream of `Message` events and a queue of
//! outgoing frames.
//!
//! ## Architecture
//!
//! Two tasks per connection:
//! - **Reader**: reads chunks, feeds a `FrameBuffer`, and emits one
//!   `Event::Message` per complete frame. Every frame already buffered is
//!   decoded before the next read.
//! - **Writer**: drains the outgoing queue in submission order and emits
//!   `Event::WriteBufferEmpty` when the queue runs dry.
//!
//! ## Invariants
//! - A malformed frame closes the connection; it never reaches the caller.
//! - `Event::PeerClosed` is the last event the reader emits.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::trace;
use tracing::warn;

use remorpc::FrameBuffer;
use remorpc::Message;
use remorpc::decode_message;
use remorpc::encode_frame;

use crate::transport::Transport;

#[derive(Debug, Clone)]
pub enum Error {
    Codec(remorpc::Error),
    Closed,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Codec(e) => write!(f, "Codec error: {}", e),
            Self::Closed => write!(f, "Connection closed"),
        }
    }
}

impl std::error::Error for Error {}

impl From<remorpc::Error> for Error {
    fn from(e: remorpc::Error) -> Self {
        Self::Codec(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// A complete message was decoded.
    Message(Message),
    /// Every submitted frame has been handed to the transport.
    WriteBufferEmpty,
    /// The last buffered frame was decoded; the reader is waiting for bytes.
    ReadBufferEmpty,
    /// The stream ended, failed, or carried a malformed frame.
    PeerClosed,
}

enum Outgoing {
    Frame(Vec<u8>),
    Close,
}

/// A framed duplex connection over a transport.
///
/// Dropping the connection closes it.
pub struct Connection {
    label: String,
    outgoing: mpsc::UnboundedSender<Outgoing>,
    open: Arc<AtomicBool>,
    reader: JoinHandle<()>,
}

impl Connection {
    /// Spawns the reader and writer tasks and returns the event stream.
    ///
    /// Must be called from within a tokio runtime.
    pub fn open(
        transport: Arc<dyn Transport>,
        max_frame_len: usize,
    ) -> (Self, mpsc::UnboundedReceiver<Event>) {
        let label = transport.peer_label();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let open = Arc::new(AtomicBool::new(true));

        let reader = tokio::spawn(read_loop(
            transport.clone(),
            events_tx.clone(),
            open.clone(),
            label.clone(),
            max_frame_len,
        ));
        tokio::spawn(write_loop(transport, out_rx, events_tx, open.clone(), label.clone()));

        debug!(peer = %label, "connection opened");

        let connection = Self {
            label,
            outgoing: out_tx,
            open,
            reader,
        };
        (connection, events_rx)
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Encodes and queues a message. Frames are written in submission order.
    pub fn send(&self, msg: &Message) -> Result<()> {
        if !self.is_open() {
            return Err(Error::Closed);
        }
        let frame = encode_frame(msg)?;
        trace!(
            peer = %self.label,
            id = msg.id,
            message_type = %msg.message_type,
            response = msg.is_response,
            bytes = frame.len(),
            "queue message"
        );
        self.outgoing
            .send(Outgoing::Frame(frame))
            .map_err(|_| Error::Closed)
    }

    /// Stops reading and closes the transport once queued frames are written.
    pub fn close(&self) {
        if self.open.swap(false, Ordering::AcqRel) {
            debug!(peer = %self.label, "closing connection");
        }
        self.reader.abort();
        let _ = self.outgoing.send(Outgoing::Close);
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

async fn read_loop(
    transport: Arc<dyn Transport>,
    events: mpsc::UnboundedSender<Event>,
    open: Arc<AtomicBool>,
    label: String,
    max_frame_len: usize,
) {
    let mut buffer = FrameBuffer::new(max_frame_len);

    'read: loop {
        let chunk = match transport.recv().await {
            Ok(Some(chunk)) => chunk,
            Ok(None) => {
                debug!(peer = %label, "peer closed the stream");
                break 'read;
            }
            Err(e) => {
                debug!(peer = %label, error = %e, "read failed");
                break 'read;
            }
        };
        trace!(peer = %label, bytes = chunk.len(), "read");
        buffer.extend(&chunk);

        let mut decoded = 0usize;
        loop {
            let payload = match buffer.next_frame() {
                Ok(Some(payload)) => payload,
                Ok(None) => break,
                Err(e) => {
                    warn!(peer = %label, error = %e, "malformed frame, closing connection");
                    let _ = transport.close().await;
                    break 'read;
                }
            };
            match decode_message(&payload) {
                Ok(msg) => {
                    decoded += 1;
                    trace!(peer = %label, id = msg.id, message_type = %msg.message_type, bytes = payload.len(), "received message");
                    if events.send(Event::Message(msg)).is_err() {
                        break 'read;
                    }
                }
                Err(e) => {
                    warn!(peer = %label, error = %e, "malformed message, closing connection");
                    let _ = transport.close().await;
                    break 'read;
                }
            }
        }
        if decoded > 0 && buffer.buffered() == 0 {
            let _ = events.send(Event::ReadBufferEmpty);
        }
    }

    open.store(false, Ordering::Release);
    let _ = events.send(Event::PeerClosed);
}

async fn write_loop(
    transport: Arc<dyn Transport>,
    mut outgoing: mpsc::UnboundedReceiver<Outgoing>,
    events: mpsc::UnboundedSender<Event>,
    open: Arc<AtomicBool>,
    label: String,
) {
    while let Some(item) = outgoing.recv().await {
        let mut next = Some(item);
        while let Some(item) = next.take() {
            match item {
                Outgoing::Frame(frame) => {
                    if let Err(e) = transport.send(&frame).await {
                        debug!(peer = %label, error = %e, "write failed");
                        open.store(false, Ordering::Release);
                        return;
                    }
                }
                Outgoing::Close => {
                    let _ = transport.close().await;
                    return;
                }
            }
            next = outgoing.try_recv().ok();
        }
        let _ = events.send(Event::WriteBufferEmpty);
    }
}
