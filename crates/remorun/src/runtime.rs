//! # Runtime Context
//!
//! The explicitly constructed context shared by every component of a process:
//! the reactor handle, configuration, message id allocation, the call limiter
//! and the table of live servers.
//!
//! Uses DashMap for the server table so servers can come and go while
//! discovery reads it from its own tasks.

use std::sync::Arc;
use std::sync::atomic::AtomicU16;
use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering;

use dashmap::DashMap;
use tokio::runtime::Handle;
use tokio::sync::Semaphore;

use crate::config::Config;

#[derive(Debug)]
pub enum Error {
    /// `Runtime::new` was called outside of a tokio runtime.
    NoReactor(tokio::runtime::TryCurrentError),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoReactor(e) => write!(f, "No reactor available: {}", e),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

/// Shared state of one process-level runtime.
///
/// Cheap to share: every component holds an `Arc<Runtime>`.
pub struct Runtime {
    handle: Handle,
    config: Config,
    next_message_id: AtomicU32,
    call_permits: Arc<Semaphore>,
    /// Server id to the cell holding its current port (0 when not listening).
    servers: DashMap<String, Arc<AtomicU16>>,
}

impl Runtime {
    /// Creates a runtime bound to the tokio runtime of the calling task.
    pub fn new(config: Config) -> Result<Arc<Self>> {
        let handle = Handle::try_current().map_err(Error::NoReactor)?;
        Ok(Self::with_handle(handle, config))
    }

    /// Creates a runtime bound to an explicit reactor handle.
    pub fn with_handle(handle: Handle, config: Config) -> Arc<Self> {
        let permits = config.max_concurrent_calls.max(1);
        Arc::new(Self {
            handle,
            config,
            next_message_id: AtomicU32::new(1),
            call_permits: Arc::new(Semaphore::new(permits)),
            servers: DashMap::new(),
        })
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Allocates a message id. Ids start at 1 and are unique per runtime
    /// until the counter wraps.
    pub fn next_message_id(&self) -> u32 {
        self.next_message_id.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn call_permits(&self) -> Arc<Semaphore> {
        self.call_permits.clone()
    }

    pub(crate) fn register_server(&self, id: &str, port: Arc<AtomicU16>) {
        self.servers.insert(id.to_owned(), port);
    }

    pub(crate) fn unregister_server(&self, id: &str) {
        self.servers.remove(id);
    }

    /// `(server_id, port)` of every server created on this runtime.
    pub fn local_servers(&self) -> Vec<(String, u16)> {
        self.servers
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().load(Ordering::Acquire)))
            .collect()
    }

    /// Whether a sighting refers to one of this runtime's own servers.
    pub fn is_local_server(&self, server_id: &str, port: u16) -> bool {
        self.servers.contains_key(server_id)
            || self
                .servers
                .iter()
                .any(|entry| entry.value().load(Ordering::Acquire) == port)
    }
}
