//! # Discovery
//!
//! Announces the runtime's servers over UDP and reports servers announced by
//! other processes.
//!
//! ## Architecture
//!
//! One UDP socket per started `Discovery`, shared by two tasks. The port is
//! bound with address and port reuse, so several processes on one host
//! listen on the same discovery port.
//!
//! - **Beacon**: every `discovery_interval`, sends one datagram listing the
//!   runtime's servers to each target. Nothing is sent while the runtime has
//!   no servers.
//! - **Listener**: decodes datagrams and records each distinct
//!   `(address, port, user)` once, notifying subscribers on first sight.
//!
//! ## Datagram
//!
//! ```text
//! "remo-discovery@" | str user | u32 count | count * (u16 port, str server_id)
//! ```
//!
//! The body uses the `remopack` encoding. Servers announced with port 0 are
//! not listening and are skipped by receivers.

use std::net::IpAddr;
use std::net::Ipv4Addr;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::sync::Weak;
use std::time::SystemTime;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use socket2::Domain;
use socket2::Protocol;
use socket2::Socket;
use socket2::Type;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::info;
use tracing::trace;
use tracing::warn;

use remopack::Decoder;
use remopack::Encoder;
use remorpc::Outcome;

use crate::config::clamp_discovery_interval;
use crate::events::Emitter;
use crate::events::SubscriptionId;
use crate::runtime::Runtime;

pub const HEADER: &[u8] = b"remo-discovery@";
pub const ALREADY_STARTED_MESSAGE: &str = "Discovery has already been started";
pub const NOT_STARTED_MESSAGE: &str = "Discovery cannot be stopped as it has not yet been started";

const MAX_DATAGRAM: usize = 64 * 1024;

/// A server seen on the network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FoundServer {
    pub address: IpAddr,
    pub port: u16,
    pub user: String,
    pub server_id: String,
    pub first_seen_at: SystemTime,
}

type Key = (IpAddr, u16, String);

impl FoundServer {
    fn key(&self) -> Key {
        (self.address, self.port, self.user.clone())
    }
}

/// Contents of one beacon datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Announcement {
    pub user: String,
    /// `(port, server_id)` per server.
    pub servers: Vec<(u16, String)>,
}

impl Announcement {
    pub fn to_bytes(&self) -> remopack::Result<Vec<u8>> {
        let mut enc = Encoder::new();
        enc.str(&self.user)?;
        enc.u32(self.servers.len() as u32)?;
        for (port, id) in &self.servers {
            enc.u16(*port)?;
            enc.str(id)?;
        }
        let body = enc.into_bytes()?;

        let mut datagram = Vec::with_capacity(HEADER.len() + body.len());
        datagram.extend_from_slice(HEADER);
        datagram.extend_from_slice(&body);
        Ok(datagram)
    }

    /// Returns `None` for datagrams that are not announcements.
    pub fn from_bytes(datagram: &[u8]) -> Option<Self> {
        let body = datagram.strip_prefix(HEADER)?;
        let mut dec = Decoder::new(body);
        let user = dec.str().ok()?.to_owned();
        let count = dec.u32().ok()?;
        let mut servers = Vec::new();
        for _ in 0..count {
            let port = dec.u16().ok()?;
            let id = dec.str().ok()?.to_owned();
            servers.push((port, id));
        }
        if dec.remaining() != 0 {
            return None;
        }
        Some(Self { user, servers })
    }
}

/// `"$USER (<os> - <hostname>)"`, used to tell announcers apart.
pub fn local_user() -> String {
    let user = std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "localuser".to_owned());
    let host = std::env::var("HOSTNAME").or_else(|_| std::env::var("COMPUTERNAME"));
    match host {
        Ok(host) if !host.is_empty() => format!("{} ({} - {})", user, std::env::consts::OS, host),
        _ => format!("{} ({})", user, std::env::consts::OS),
    }
}

struct Shared {
    runtime: Arc<Runtime>,
    user: String,
    targets: Mutex<Option<Vec<SocketAddr>>>,
    found: DashMap<Key, FoundServer>,
    events: Emitter<FoundServer>,
}

struct Running {
    port: u16,
    beacon: JoinHandle<()>,
    listener: JoinHandle<()>,
}

pub struct Discovery {
    shared: Arc<Shared>,
    running: tokio::sync::Mutex<Option<Running>>,
}

impl Discovery {
    pub fn new(runtime: Arc<Runtime>) -> Self {
        Self::with_user(runtime, local_user())
    }

    /// Announces under an explicit user string.
    pub fn with_user(runtime: Arc<Runtime>, user: impl Into<String>) -> Self {
        Self {
            shared: Arc::new(Shared {
                runtime,
                user: user.into(),
                targets: Mutex::new(None),
                found: DashMap::new(),
                events: Emitter::new(),
            }),
            running: tokio::sync::Mutex::new(None),
        }
    }

    pub fn user(&self) -> &str {
        &self.shared.user
    }

    /// Replaces the beacon's destinations. `None` restores the broadcast
    /// address on the bound port.
    pub fn set_targets(&self, targets: Option<Vec<SocketAddr>>) {
        *self.shared.targets.lock().unwrap_or_else(PoisonError::into_inner) = targets;
    }

    /// Binds the discovery port and starts the beacon and listener. Port 0
    /// selects the configured default.
    pub async fn start(&self, port: u16) -> Outcome {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Outcome::failure(ALREADY_STARTED_MESSAGE);
        }

        let runtime = &self.shared.runtime;
        let port = if port == 0 { runtime.config().discovery_port } else { port };
        let socket = {
            let _context = runtime.handle().enter();
            match bind_shared(port) {
                Ok(socket) => Arc::new(socket),
                Err(e) => {
                    warn!(port, error = %e, "discovery bind failed");
                    return Outcome::failure(e.to_string());
                }
            }
        };

        let interval = runtime.config().discovery_interval;
        let beacon = runtime
            .handle()
            .spawn(beacon(Arc::downgrade(&self.shared), socket.clone(), port, interval));
        let listener = runtime
            .handle()
            .spawn(listen(Arc::downgrade(&self.shared), socket));

        info!(port, user = %self.shared.user, "discovery started");
        *running = Some(Running { port, beacon, listener });
        Outcome::ok()
    }

    pub async fn stop(&self) -> Outcome {
        let Some(running) = self.running.lock().await.take() else {
            return Outcome::failure(NOT_STARTED_MESSAGE);
        };
        running.beacon.abort();
        running.listener.abort();
        let _ = running.beacon.await;
        let _ = running.listener.await;
        info!(port = running.port, "discovery stopped");
        Outcome::ok()
    }

    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    /// The bound discovery port, if started.
    pub async fn local_port(&self) -> Option<u16> {
        self.running.lock().await.as_ref().map(|r| r.port)
    }

    /// Every recorded server, oldest first.
    pub fn found_servers(&self) -> Vec<FoundServer> {
        let mut found: Vec<FoundServer> = self.shared.found.iter().map(|e| e.value().clone()).collect();
        found.sort_by_key(|s| s.first_seen_at);
        found
    }

    /// Forgets a record; the next sighting reports it again.
    pub fn release_found_server(&self, server: &FoundServer) -> bool {
        self.shared.found.remove(&server.key()).is_some()
    }

    pub fn release_all_found_servers(&self) {
        self.shared.found.clear();
    }

    pub fn subscribe(&self, f: impl Fn(&FoundServer) + Send + Sync + 'static) -> SubscriptionId {
        self.shared.events.subscribe(f)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.shared.events.unsubscribe(id)
    }

    pub fn listen(&self) -> mpsc::UnboundedReceiver<FoundServer> {
        self.shared.events.listen()
    }
}

impl Drop for Discovery {
    fn drop(&mut self) {
        if let Some(running) = self.running.get_mut().take() {
            running.beacon.abort();
            running.listener.abort();
        }
    }
}

impl Shared {
    fn targets(&self, port: u16) -> Vec<SocketAddr> {
        self.targets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .unwrap_or_else(|| vec![SocketAddr::new(IpAddr::V4(Ipv4Addr::BROADCAST), port)])
    }

    fn sighting(&self, from: SocketAddr, announcement: Announcement) {
        for (port, server_id) in announcement.servers {
            if port == 0 || self.runtime.is_local_server(&server_id, port) {
                continue;
            }
            let server = FoundServer {
                address: from.ip(),
                port,
                user: announcement.user.clone(),
                server_id,
                first_seen_at: SystemTime::now(),
            };
            match self.found.entry(server.key()) {
                Entry::Occupied(_) => continue,
                Entry::Vacant(slot) => {
                    slot.insert(server.clone());
                }
            }
            info!(address = %server.address, port, user = %server.user, "found server");
            self.events.emit(&server);
        }
    }
}

/// Binds the discovery port so that every process on the host can share it.
/// Broadcasts reach each socket bound this way.
fn bind_shared(port: u16) -> std::io::Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    #[cfg(all(unix, not(any(target_os = "solaris", target_os = "illumos"))))]
    socket.set_reuse_port(true)?;
    socket.set_broadcast(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port).into())?;
    UdpSocket::from_std(socket.into())
}

async fn beacon(shared: Weak<Shared>, socket: Arc<UdpSocket>, port: u16, interval: std::time::Duration) {
    let mut ticker = tokio::time::interval(clamp_discovery_interval(interval));
    loop {
        ticker.tick().await;
        let Some(current) = shared.upgrade() else { break };
        let servers: Vec<(u16, String)> = current
            .runtime
            .local_servers()
            .into_iter()
            .map(|(id, port)| (port, id))
            .collect();
        if servers.is_empty() {
            continue;
        }
        let announcement = Announcement {
            user: current.user.clone(),
            servers,
        };
        let targets = current.targets(port);
        drop(current);

        let datagram = match announcement.to_bytes() {
            Ok(datagram) => datagram,
            Err(e) => {
                warn!(error = %e, "cannot encode announcement");
                continue;
            }
        };
        for target in targets {
            match socket.send_to(&datagram, target).await {
                Ok(n) => trace!(%target, bytes = n, "announcement sent"),
                Err(e) => warn!(%target, error = %e, "announcement not sent"),
            }
        }
    }
}

async fn listen(shared: Weak<Shared>, socket: Arc<UdpSocket>) {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    loop {
        let (n, from) = match socket.recv_from(&mut buf).await {
            Ok(received) => received,
            Err(e) => {
                debug!(error = %e, "discovery receive failed");
                continue;
            }
        };
        let Some(announcement) = Announcement::from_bytes(&buf[..n]) else {
            trace!(%from, bytes = n, "ignoring datagram");
            continue;
        };
        let Some(current) = shared.upgrade() else { break };
        current.sighting(from, announcement);
    }
}
