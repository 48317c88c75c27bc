//! # Dispatcher
//!
//! Accepts connections and answers requests against objects resolved through
//! a `Resolve` implementation.
//!
//! ## Architecture
//!
//! - **Accept loop**: one task per listening socket. Closing the server aborts
//!   it and waits until the listener is dropped, so the port can be bound again
//!   immediately.
//! - **Sessions**: one task per connection. A connection starts unbound; a
//!   successful handshake (RequestObject, or RequestConnection without a
//!   `signal`/`member` field) binds it to one object for its lifetime.
//!   Unbound connections are one-shot: they are closed once their response
//!   has been flushed.
//! - **Invocation**: method bodies run on the blocking pool. Within a session
//!   calls are answered as they complete, so responses may be reordered;
//!   property requests are answered in arrival order.

use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::Weak;
use std::sync::atomic::AtomicU16;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use dashmap::DashMap;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::task::AbortHandle;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use remopack::Value;
use remorpc::Message;
use remorpc::MessageType;
use remorpc::Outcome;
use remorpc::keys;

use crate::connection::Connection;
use crate::connection::Event;
use crate::events::SubscriptionId;
use crate::invoke;
use crate::invoke::InvokeError;
use crate::object::ExposedObject;
use crate::object::Visibility;
use crate::object::signature_name;
use crate::registry::Resolve;
use crate::runtime::Runtime;
use crate::transport::TcpTransport;
use crate::transport::Transport;

#[derive(Debug)]
pub enum Error {
    Bind { addr: SocketAddr, reason: String },
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bind { addr, reason } => write!(f, "Failed to bind to {}: {}", addr, reason),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

struct Shared {
    runtime: Arc<Runtime>,
    registry: Arc<dyn Resolve>,
    connections: DashMap<u64, AbortHandle>,
    next_connection: AtomicU64,
}

/// A request dispatcher bound to one registry.
pub struct Server {
    shared: Arc<Shared>,
    id: String,
    port: Arc<AtomicU16>,
    accept: Mutex<Option<JoinHandle<()>>>,
}

impl Server {
    /// Creates a server and registers it with the runtime. It does not listen yet.
    pub fn new(runtime: Arc<Runtime>, registry: Arc<dyn Resolve>) -> Self {
        let id = uuid::Uuid::new_v4().to_string();
        let port = Arc::new(AtomicU16::new(0));
        runtime.register_server(&id, port.clone());
        Self {
            shared: Arc::new(Shared {
                runtime,
                registry,
                connections: DashMap::new(),
                next_connection: AtomicU64::new(1),
            }),
            id,
            port,
            accept: Mutex::new(None),
        }
    }

    /// Identifier announced by discovery, fixed for the server's lifetime.
    pub fn server_id(&self) -> &str {
        &self.id
    }

    /// The bound port, or 0 when not listening.
    pub fn server_port(&self) -> u16 {
        self.port.load(Ordering::Acquire)
    }

    pub fn is_listening(&self) -> bool {
        self.server_port() != 0
    }

    /// Binds `addr` and starts accepting. A server that is already listening
    /// is closed first. Returns the bound port.
    pub async fn listen(&self, addr: SocketAddr) -> Result<u16> {
        self.close().await;

        let listener = TcpListener::bind(addr).await.map_err(|e| Error::Bind {
            addr,
            reason: e.to_string(),
        })?;
        let port = listener
            .local_addr()
            .map_err(|e| Error::Bind { addr, reason: e.to_string() })?
            .port();

        self.port.store(port, Ordering::Release);
        info!(server = %self.id, port, "server listening");

        let shared = self.shared.clone();
        let task = tokio::spawn(accept_loop(listener, shared));
        *self.accept.lock().await = Some(task);
        Ok(port)
    }

    /// Stops listening and drops every open connection.
    ///
    /// Returns once the listening socket has been released.
    pub async fn close(&self) {
        let task = self.accept.lock().await.take();
        if let Some(task) = task {
            task.abort();
            let _ = task.await;
            info!(server = %self.id, port = self.server_port(), "server closed");
        }
        self.port.store(0, Ordering::Release);
        self.shared.drop_connections();
    }

    /// Serves requests arriving on an already established transport.
    pub fn serve(&self, transport: Arc<dyn Transport>) {
        self.shared.spawn_session(transport);
    }

    /// Number of connections currently being served.
    pub fn connection_count(&self) -> usize {
        self.shared.connections.len()
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        if let Ok(mut accept) = self.accept.try_lock() {
            if let Some(task) = accept.take() {
                task.abort();
            }
        }
        self.shared.drop_connections();
        self.shared.runtime.unregister_server(&self.id);
    }
}

async fn accept_loop(listener: TcpListener, shared: Arc<Shared>) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                info!(%peer, "connection accepted");
                shared.spawn_session(Arc::new(TcpTransport::from_stream(stream)));
            }
            Err(e) => {
                warn!(error = %e, "accept failed");
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            }
        }
    }
}

impl Shared {
    fn spawn_session(self: &Arc<Self>, transport: Arc<dyn Transport>) {
        let id = self.next_connection.fetch_add(1, Ordering::Relaxed);
        let task = tokio::spawn(serve_connection(Arc::downgrade(self), transport, id));
        self.connections.insert(id, task.abort_handle());
        if task.is_finished() {
            self.connections.remove(&id);
        }
    }

    fn drop_connections(&self) {
        let ids: Vec<u64> = self.connections.iter().map(|e| *e.key()).collect();
        for id in ids {
            if let Some((_, handle)) = self.connections.remove(&id) {
                handle.abort();
            }
        }
    }

    /// The session object, or the object addressed by the request.
    fn target(&self, session: &Session, msg: &Message) -> std::result::Result<Arc<ExposedObject>, InvokeError> {
        if let Some(object) = &session.object {
            return Ok(object.clone());
        }
        resolve(self.registry.as_ref(), msg.get_str(keys::OBJECT))
    }
}

/// Resolves a path and applies the meta-access check.
fn resolve(registry: &dyn Resolve, path: &str) -> std::result::Result<Arc<ExposedObject>, InvokeError> {
    let (object, allowed) = registry
        .resolve(path)
        .ok_or_else(|| InvokeError::ObjectNotFound(path.to_owned()))?;
    if !allowed {
        return Err(InvokeError::AccessDenied);
    }
    Ok(object)
}

/// Per-connection dispatch state.
#[derive(Default)]
struct Session {
    object: Option<Arc<ExposedObject>>,
    path: String,
    subscribed: BTreeSet<String>,
    subscriptions: Vec<(String, SubscriptionId)>,
    close_after_flush: bool,
}

impl Drop for Session {
    fn drop(&mut self) {
        let Some(object) = &self.object else { return };
        for (signal, id) in self.subscriptions.drain(..) {
            object.unsubscribe(&signal, id);
        }
    }
}

/// Closes the connection when the session task ends, even while spawned
/// calls still hold it.
struct SessionGuard(Arc<Connection>);

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.0.close();
    }
}

async fn serve_connection(shared: Weak<Shared>, transport: Arc<dyn Transport>, id: u64) {
    let Some(max_frame_len) = shared.upgrade().map(|s| s.runtime.config().max_frame_len) else {
        return;
    };
    let (conn, mut events) = Connection::open(transport, max_frame_len);
    let conn = Arc::new(conn);
    let _guard = SessionGuard(conn.clone());
    let mut session = Session::default();

    while let Some(event) = events.recv().await {
        match event {
            Event::Message(msg) if msg.is_response => {
                debug!(peer = %conn.label(), id = msg.id, "ignoring unsolicited response");
            }
            Event::Message(msg) => {
                let Some(shared) = shared.upgrade() else { break };
                handle_request(&shared, &conn, &mut session, msg).await;
            }
            Event::WriteBufferEmpty => {
                if session.close_after_flush {
                    conn.close();
                    break;
                }
            }
            Event::ReadBufferEmpty => {}
            Event::PeerClosed => break,
        }
    }

    debug!(peer = %conn.label(), object = %session.path, "session ended");
    if let Some(shared) = shared.upgrade() {
        shared.connections.remove(&id);
    }
}

async fn handle_request(shared: &Arc<Shared>, conn: &Arc<Connection>, session: &mut Session, msg: Message) {
    debug!(
        peer = %conn.label(),
        id = msg.id,
        message_type = %msg.message_type,
        object = %msg.get_str(keys::OBJECT),
        "dispatch request"
    );

    let response = match msg.message_type {
        MessageType::RequestObject => handshake(shared, session, &msg),
        MessageType::RequestConnection
            if msg.get(keys::SIGNAL).is_none() && msg.get(keys::MEMBER).is_none() =>
        {
            handshake(shared, session, &msg)
        }
        MessageType::RequestConnection => connect_member(shared, conn, session, &msg),
        MessageType::GetPropertyValue => get_property(shared, session, &msg),
        MessageType::SetPropertyValue => set_property(shared, session, &msg),
        MessageType::IpcCall => match prepare_call(shared, session, &msg) {
            Ok((object, call)) if session.object.is_some() => {
                let conn = conn.clone();
                tokio::spawn(async move {
                    let outcome = run_call(object, call).await;
                    send(&conn, Message::response_to(&msg, outcome));
                });
                return;
            }
            Ok((object, call)) => {
                let outcome = run_call(object, call).await;
                Message::response_to(&msg, outcome)
            }
            Err(e) => Message::response_to(&msg, e.into()),
        },
        MessageType::SignalDelivery => {
            Message::response_to(&msg, Outcome::failure("Signal delivery is not accepted by the server"))
        }
    };

    if session.object.is_none() {
        session.close_after_flush = true;
    }
    send(conn, response);
}

fn send(conn: &Connection, response: Message) {
    if let Err(e) = conn.send(&response) {
        debug!(peer = %conn.label(), id = response.id, error = %e, "response dropped");
    }
}

fn handshake(shared: &Shared, session: &mut Session, msg: &Message) -> Message {
    let path = msg.get_str(keys::OBJECT);
    let object = match &session.object {
        Some(object) if path.is_empty() || path == session.path => object.clone(),
        _ => match resolve(shared.registry.as_ref(), path) {
            Ok(object) => object,
            Err(e) => {
                info!(object = %path, reason = %e, "handshake refused");
                return Message::response_to(msg, e.into());
            }
        },
    };

    let response = Message::response_to(msg, Outcome::ok())
        .with(keys::OBJECT, path)
        .with(keys::PROPERTIES, Value::Map(object.property_values()))
        .with(keys::SIGNALS, Value::StringList(object.signal_signatures()))
        .with(keys::MEMBERS, Value::StringList(object.member_signatures()));

    if session.object.is_none() {
        info!(object = %path, "session bound");
        session.object = Some(object);
        session.path = path.to_owned();
    }
    response
}

fn connect_member(shared: &Shared, conn: &Arc<Connection>, session: &mut Session, msg: &Message) -> Message {
    let object = match shared.target(session, msg) {
        Ok(object) => object,
        Err(e) => return Message::response_to(msg, e.into()),
    };

    if let Some(member) = msg.get(keys::MEMBER).and_then(Value::as_str) {
        let member = signature_name(member);
        let exists = object
            .method(member)
            .is_some_and(|m| m.visibility == Visibility::Public);
        let outcome = if exists {
            Outcome::ok()
        } else {
            InvokeError::MethodNotFound(member.to_owned()).into()
        };
        return Message::response_to(msg, outcome);
    }

    let signal = signature_name(msg.get_str(keys::SIGNAL)).to_owned();
    let Some(spec) = object.signal(&signal) else {
        return Message::response_to(msg, InvokeError::SignalNotFound(signal).into());
    };
    if session.object.is_none() {
        return Message::response_to(msg, Outcome::failure("Signal connections require an object session"));
    }
    if session.subscribed.contains(&signal) {
        return Message::response_to(msg, Outcome::ok());
    }

    let weak = Arc::downgrade(conn);
    let runtime = shared.runtime.clone();
    let signature = spec.signature();
    let slot = Arc::new(move |args: &[Value]| {
        let Some(conn) = weak.upgrade() else { return };
        let delivery = Message::request(runtime.next_message_id(), MessageType::SignalDelivery)
            .with(keys::SIGNAL, signature.as_str())
            .with(keys::ARGUMENTS, Value::List(args.to_vec()));
        send(&conn, delivery);
    });
    if let Some(id) = object.subscribe(&signal, slot) {
        debug!(peer = %conn.label(), signal = %signal, "signal subscribed");
        session.subscribed.insert(signal.clone());
        session.subscriptions.push((signal, id));
    }
    Message::response_to(msg, Outcome::ok())
}

fn get_property(shared: &Shared, session: &Session, msg: &Message) -> Message {
    let name = msg.get_str(keys::PROPERTY_NAME);
    let outcome = shared.target(session, msg).and_then(|object| {
        object
            .get_property(name)
            .ok_or_else(|| InvokeError::PropertyNotFound(name.to_owned()))
    });
    match outcome {
        Ok(value) => Message::response_to(msg, Outcome::success(value)).with(keys::PROPERTY_NAME, name),
        Err(e) => Message::response_to(msg, e.into()).with(keys::PROPERTY_NAME, name),
    }
}

fn set_property(shared: &Shared, session: &Session, msg: &Message) -> Message {
    let name = msg.get_str(keys::PROPERTY_NAME);
    let value = msg.get(keys::PROPERTY_VALUE).cloned().unwrap_or_default();
    let outcome = shared
        .target(session, msg)
        .and_then(|object| object.set_property(name, value));
    match outcome {
        Ok(stored) => Message::response_to(msg, Outcome::success(stored)).with(keys::PROPERTY_NAME, name),
        Err(e) => Message::response_to(msg, e.into()).with(keys::PROPERTY_NAME, name),
    }
}

fn prepare_call(
    shared: &Shared,
    session: &Session,
    msg: &Message,
) -> std::result::Result<(Arc<ExposedObject>, invoke::PreparedCall), InvokeError> {
    let object = shared.target(session, msg)?;
    let args = msg
        .get(keys::ARGUMENTS)
        .and_then(Value::to_list)
        .unwrap_or_default();
    let call = invoke::prepare(&object, msg.get_str(keys::METHOD), &args)?;
    Ok((object, call))
}

async fn run_call(object: Arc<ExposedObject>, call: invoke::PreparedCall) -> Outcome {
    let method = call.method().to_owned();
    match tokio::task::spawn_blocking(move || call.run(&object)).await {
        Ok(outcome) => outcome,
        Err(e) => {
            error!(method = %method, error = %e, "method body failed");
            Outcome::failure(format!("Method '{}' did not complete", method))
        }
    }
}
