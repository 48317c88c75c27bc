//! In-memory transports for tests and embedding.

use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

use tokio::sync::Mutex;
use tokio::sync::mpsc;

use crate::transport;
use crate::transport::Transport;

/// A duplex channel transport using tokio mpsc channels.
///
/// Bytes sent on one end appear on the other end's `recv()`. Closing an end
/// drops its sender, so the peer sees end of stream.
pub struct DuplexChannelTransport {
    tx: Mutex<Option<mpsc::UnboundedSender<Vec<u8>>>>,
    rx: Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
}

impl DuplexChannelTransport {
    /// Creates a new transport from separate tx and rx channels.
    pub fn new(
        tx: mpsc::UnboundedSender<Vec<u8>>,
        rx: mpsc::UnboundedReceiver<Vec<u8>>,
    ) -> Self {
        Self {
            tx: Mutex::new(Some(tx)),
            rx: Mutex::new(rx),
        }
    }

    /// Creates a pair of transports connected to each other.
    ///
    /// Bytes sent on `a` are received by `b` and vice versa.
    pub fn pair() -> (Self, Self) {
        let (tx_a, rx_a) = mpsc::unbounded_channel();
        let (tx_b, rx_b) = mpsc::unbounded_channel();
        (Self::new(tx_a, rx_b), Self::new(tx_b, rx_a))
    }
}

#[async_trait::async_trait]
impl Transport for DuplexChannelTransport {
    async fn send(&self, payload: &[u8]) -> transport::Result<()> {
        let tx = self.tx.lock().await;
        let Some(tx) = tx.as_ref() else {
            return Err(transport::Error::ConnectionLost("Channel closed".into()));
        };
        tx.send(payload.to_vec())
            .map_err(|_| transport::Error::ConnectionLost("Channel closed".into()))
    }

    async fn recv(&self) -> transport::Result<Option<Vec<u8>>> {
        let mut rx = self.rx.lock().await;
        Ok(rx.recv().await)
    }

    async fn close(&self) -> transport::Result<()> {
        self.tx.lock().await.take();
        Ok(())
    }
}

/// Wraps a transport and counts the bytes submitted to it.
pub struct CountingTransport<T> {
    inner: T,
    sent: Arc<AtomicUsize>,
}

impl<T: Transport> CountingTransport<T> {
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            sent: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// A shared counter that stays readable after the transport is moved.
    pub fn counter(&self) -> Arc<AtomicUsize> {
        self.sent.clone()
    }

    pub fn bytes_sent(&self) -> usize {
        self.sent.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl<T: Transport> Transport for CountingTransport<T> {
    async fn send(&self, payload: &[u8]) -> transport::Result<()> {
        self.sent.fetch_add(payload.len(), Ordering::SeqCst);
        self.inner.send(payload).await
    }

    async fn recv(&self) -> transport::Result<Option<Vec<u8>>> {
        self.inner.recv().await
    }

    async fn close(&self) -> transport::Result<()> {
        self.inner.close().await
    }

    fn peer_label(&self) -> String {
        self.inner.peer_label()
    }
}
