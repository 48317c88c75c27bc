//! # Remote Object Proxy
//!
//! A long-lived client-side mirror of one remote object.
//!
//! ## Architecture
//!
//! - **Activation**: construction opens a connection and sends the handshake
//!   (RequestConnection without a `signal`). The response carries the remote
//!   object's properties, signal signatures and member signatures, which are
//!   cached all at once.
//! - **Pump**: one task per connection routes responses to pending requests by
//!   message id and dispatches SignalDelivery messages to local bridges.
//! - **Pending table**: `DashMap<u32, Pending>`. Each entry leaves the table
//!   exactly once: on its response, on its timeout, or when the connection is
//!   lost.
//!
//! ## Invariants
//! - The cached metadata is empty iff the proxy is not activated.
//! - Every usage error is reported before anything is written to the wire.

use std::collections::BTreeSet;
use std::net::IpAddr;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;
use std::sync::RwLock;
use std::sync::RwLockReadGuard;
use std::sync::RwLockWriteGuard;
use std::sync::Weak;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use dashmap::DashMap;
use dashmap::DashSet;
use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio::sync::watch;
use tracing::debug;
use tracing::info;
use tracing::trace;
use tracing::warn;

use remopack::Kind;
use remopack::Value;
use remopack::ValueMap;
use remorpc::Message;
use remorpc::MessageType;
use remorpc::Outcome;
use remorpc::keys;

use crate::call::CALL_TIMEOUT_MESSAGE;
use crate::call::CONNECT_TIMEOUT_MESSAGE;
use crate::config::clamp_call_timeout;
use crate::connection::Connection;
use crate::connection::Event;
use crate::events::Emitter;
use crate::events::SubscriptionId;
use crate::invoke::InvokeError;
use crate::object::ExposedObject;
use crate::object::parse_signature;
use crate::object::signature_name;
use crate::runtime::Runtime;
use crate::transport::TcpTransport;
use crate::transport::Transport;

pub const CONNECTION_LOST_MESSAGE: &str =
    "Connection with remote object was lost before any response could be received";
pub const EMPTY_NAME_MESSAGE: &str = "Cannot connect to remote object with unknown/empty name";
pub const OUT_OF_SEQUENCE_MESSAGE: &str = "Out of sequence message received";
pub const NOTIFY_SHAPE_MESSAGE: &str =
    "Receiver's member function's parameter list should be (value,bool,string)";
pub const NOTIFY_MEMBER_MESSAGE: &str = "Notification member doesn't exist in the receiver object";
pub const UNKNOWN_METHOD_MESSAGE: &str = "Method doesn't exist in the remote object";
pub const UNKNOWN_SIGNAL_MESSAGE: &str = "Signal doesn't exist in the remote object";
pub const RECEIVER_MEMBER_MESSAGE: &str = "Member doesn't exist in the receiver";
pub const REMOTE_MEMBER_MESSAGE: &str = "Member doesn't exist in remote object";
pub const SENDER_SIGNAL_MESSAGE: &str = "Signal doesn't exist in the sender";
pub const PARAMETER_MISMATCH_MESSAGE: &str =
    "Parameters accepted by the member must be same as those emitted by the signal";
pub const REMOTE_BRIDGE_ARGS_MESSAGE: &str =
    "signal, receiver and member must be provided as parameters to this function";
pub const LOCAL_BRIDGE_ARGS_MESSAGE: &str =
    "sender, signal and member must be provided as parameters to this function";

const NOTIFY_SHAPE: [Kind; 3] = [Kind::Any, Kind::Bool, Kind::String];

#[derive(Debug, Clone, PartialEq)]
pub enum ProxyEvent {
    Activated,
    Deactivated,
    CouldNotActivate(String),
    /// A request issued through the proxy completed, successfully or not.
    RequestFinished(u32),
    /// A bridged remote signal fired: `(signature, arguments)`.
    SignalOccurred(String, Vec<Value>),
    PropertyUpdated(String, Value),
    Error(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Activation {
    Activating,
    Activated,
    Failed(String),
}

/// A local member told about the result of a request, called with
/// `(value, success, message)`.
#[derive(Clone)]
pub struct Notify {
    pub receiver: Arc<ExposedObject>,
    pub member: String,
}

impl Notify {
    pub fn new(receiver: Arc<ExposedObject>, member: impl Into<String>) -> Self {
        Self {
            receiver,
            member: member.into(),
        }
    }

    fn check(&self) -> Result<(), &'static str> {
        let Some(method) = self.receiver.method(signature_name(&self.member)) else {
            return Err(NOTIFY_MEMBER_MESSAGE);
        };
        if method.params != NOTIFY_SHAPE {
            return Err(NOTIFY_SHAPE_MESSAGE);
        }
        Ok(())
    }

    fn deliver(&self, outcome: &Outcome) {
        let args = [
            outcome.data.clone(),
            Value::Bool(outcome.success),
            Value::String(outcome.message.clone()),
        ];
        let result = self.receiver.invoke(signature_name(&self.member), &args);
        if !result.success {
            warn!(member = %self.member, reason = %result.message, "notification failed");
        }
    }
}

#[derive(Clone)]
struct RemoteBridge {
    receiver: Arc<ExposedObject>,
    member: String,
}

struct LocalBridge {
    sender: Arc<ExposedObject>,
    signal: String,
    subscription: SubscriptionId,
}

enum PendingKind {
    Activate,
    Update(String),
    Change(String),
    Call,
    Subscribe(String, RemoteBridge),
    Bridge { sender: Arc<ExposedObject>, signal: String, member: String },
    /// A forwarded local emission; nobody waits for it.
    Forward,
}

struct Pending {
    kind: PendingKind,
    notify: Option<Notify>,
    waiter: Option<oneshot::Sender<Outcome>>,
}

impl Pending {
    fn new(kind: PendingKind) -> Self {
        Self { kind, notify: None, waiter: None }
    }
}

#[derive(Default)]
struct Mirror {
    activated: bool,
    properties: ValueMap,
    signal_methods: BTreeSet<String>,
    invokable_methods: BTreeSet<String>,
}

enum Target {
    Tcp(SocketAddr),
    Transport(Mutex<Option<Arc<dyn Transport>>>),
}

struct Inner {
    runtime: Arc<Runtime>,
    path: String,
    target: Target,
    mirror: RwLock<Mirror>,
    connection: Mutex<Option<Arc<Connection>>>,
    connecting: AtomicBool,
    pending: DashMap<u32, Pending>,
    expired: DashSet<u32>,
    remote_bridges: DashMap<String, Vec<RemoteBridge>>,
    local_bridges: Mutex<Vec<LocalBridge>>,
    events: Emitter<ProxyEvent>,
    activation: watch::Sender<Activation>,
}

/// Client-side mirror of a remote object. Dropping it closes the connection
/// and fails every pending request.
pub struct RemoteObjectProxy {
    inner: Arc<Inner>,
}

impl RemoteObjectProxy {
    /// Creates a proxy for `path` on `address:port` and starts activating it.
    pub fn connect(runtime: &Arc<Runtime>, address: IpAddr, port: u16, path: &str) -> Self {
        Self::new(runtime, Target::Tcp(SocketAddr::new(address, port)), path)
    }

    /// Creates a proxy that talks over an established transport.
    ///
    /// The transport is used for one activation; after it is lost the proxy
    /// cannot be reactivated.
    pub fn with_transport(runtime: &Arc<Runtime>, transport: Arc<dyn Transport>, path: &str) -> Self {
        Self::new(runtime, Target::Transport(Mutex::new(Some(transport))), path)
    }

    fn new(runtime: &Arc<Runtime>, target: Target, path: &str) -> Self {
        let (activation, _) = watch::channel(Activation::Activating);
        let inner = Arc::new(Inner {
            runtime: runtime.clone(),
            path: path.to_owned(),
            target,
            mirror: RwLock::new(Mirror::default()),
            connection: Mutex::new(None),
            connecting: AtomicBool::new(false),
            pending: DashMap::new(),
            expired: DashSet::new(),
            remote_bridges: DashMap::new(),
            local_bridges: Mutex::new(Vec::new()),
            events: Emitter::new(),
            activation,
        });
        inner.activate();
        Self { inner }
    }

    /// Repeats the activation protocol. Does nothing while activated or while
    /// a connection exists.
    pub fn reactivate(&self) {
        self.inner.activate();
    }

    /// Waits until the current activation attempt settles.
    pub async fn activation(&self) -> Outcome {
        let mut rx = self.inner.activation.subscribe();
        let state = match rx.wait_for(|a| *a != Activation::Activating).await {
            Ok(state) => state.clone(),
            Err(_) => Activation::Failed(CONNECTION_LOST_MESSAGE.into()),
        };
        match state {
            Activation::Activated => Outcome::ok(),
            Activation::Failed(reason) => Outcome::failure(reason),
            Activation::Activating => Outcome::failure(CONNECTION_LOST_MESSAGE),
        }
    }

    pub fn path(&self) -> &str {
        &self.inner.path
    }

    pub fn is_activated(&self) -> bool {
        self.inner.mirror().activated
    }

    /// Cached value of a property.
    pub fn property(&self, name: &str) -> Option<Value> {
        self.inner.mirror().properties.get(name).cloned()
    }

    pub fn properties(&self) -> ValueMap {
        self.inner.mirror().properties.clone()
    }

    pub fn signal_methods(&self) -> Vec<String> {
        self.inner.mirror().signal_methods.iter().cloned().collect()
    }

    pub fn invokable_methods(&self) -> Vec<String> {
        self.inner.mirror().invokable_methods.iter().cloned().collect()
    }

    pub fn pending_count(&self) -> usize {
        self.inner.pending.len()
    }

    pub fn events(&self) -> &Emitter<ProxyEvent> {
        &self.inner.events
    }

    pub fn subscribe(&self, f: impl Fn(&ProxyEvent) + Send + Sync + 'static) -> SubscriptionId {
        self.inner.events.subscribe(f)
    }

    pub fn listen(&self) -> mpsc::UnboundedReceiver<ProxyEvent> {
        self.inner.events.listen()
    }

    /// Fetches a property. On response the mirror is updated and `notify`, if
    /// any, is called. The outcome's data is the request id.
    pub fn update_property(&self, name: &str, notify: Option<Notify>) -> Outcome {
        if !self.inner.mirror().properties.contains_key(name) {
            return InvokeError::PropertyNotFound(name.to_owned()).into();
        }
        if let Some(Err(reason)) = notify.as_ref().map(Notify::check) {
            return Outcome::failure(reason);
        }
        let mut pending = Pending::new(PendingKind::Update(name.to_owned()));
        pending.notify = notify;
        let msg = Message::request(0, MessageType::GetPropertyValue).with(keys::PROPERTY_NAME, name);
        self.inner.request(msg, pending)
    }

    /// Changes a property. A successful change updates the mirror and emits
    /// `PropertyUpdated` once. The outcome's data is the request id.
    pub fn change_property(&self, name: &str, value: Value, notify: Option<Notify>) -> Outcome {
        if !self.inner.mirror().properties.contains_key(name) {
            return InvokeError::PropertyNotFound(name.to_owned()).into();
        }
        if let Some(Err(reason)) = notify.as_ref().map(Notify::check) {
            return Outcome::failure(reason);
        }
        let mut pending = Pending::new(PendingKind::Change(name.to_owned()));
        pending.notify = notify;
        let msg = Message::request(0, MessageType::SetPropertyValue)
            .with(keys::PROPERTY_NAME, name)
            .with(keys::PROPERTY_VALUE, value);
        self.inner.request(msg, pending)
    }

    /// Queues a call on the session connection. The outcome's data is the
    /// request id; the call's own outcome goes to `notify`.
    pub fn call(&self, method: &str, args: Vec<Value>, notify: Option<Notify>) -> Outcome {
        if !self.inner.has_method(method) {
            return Outcome::failure(UNKNOWN_METHOD_MESSAGE);
        }
        if let Some(Err(reason)) = notify.as_ref().map(Notify::check) {
            return Outcome::failure(reason);
        }
        let mut pending = Pending::new(PendingKind::Call);
        pending.notify = notify;
        self.inner.request(call_message(method, args), pending)
    }

    /// Calls a method and waits for its outcome.
    pub async fn invoke(&self, method: &str, args: Vec<Value>) -> Outcome {
        if !self.inner.has_method(method) {
            return Outcome::failure(UNKNOWN_METHOD_MESSAGE);
        }
        let (tx, rx) = oneshot::channel();
        let mut pending = Pending::new(PendingKind::Call);
        pending.waiter = Some(tx);
        let sent = self.inner.request(call_message(method, args), pending);
        if !sent.success {
            return sent;
        }
        rx.await
            .unwrap_or_else(|_| Outcome::failure(CONNECTION_LOST_MESSAGE))
    }

    /// Bridges a remote signal to a local member. Each delivery invokes the
    /// member and raises `SignalOccurred`.
    pub fn connect_remote_signal(
        &self,
        signal: &str,
        receiver: Option<&Arc<ExposedObject>>,
        member: &str,
    ) -> Outcome {
        let Some(receiver) = receiver.filter(|_| !signal.is_empty() && !member.is_empty()) else {
            return Outcome::failure(REMOTE_BRIDGE_ARGS_MESSAGE);
        };
        let name = signature_name(signal);
        let remote = self
            .inner
            .mirror()
            .signal_methods
            .iter()
            .find(|s| signature_name(s) == name)
            .cloned();
        let Some(remote) = remote else {
            return Outcome::failure(UNKNOWN_SIGNAL_MESSAGE);
        };
        let member = signature_name(member);
        let Some(local) = receiver.method(member) else {
            return Outcome::failure(RECEIVER_MEMBER_MESSAGE);
        };
        if parse_signature(&remote).map(|(_, params)| params) != Some(local.params.clone()) {
            return Outcome::failure(PARAMETER_MISMATCH_MESSAGE);
        }

        let bridge = RemoteBridge {
            receiver: receiver.clone(),
            member: member.to_owned(),
        };
        let msg = Message::request(0, MessageType::RequestConnection).with(keys::SIGNAL, name);
        self.inner
            .request(msg, Pending::new(PendingKind::Subscribe(name.to_owned(), bridge)))
    }

    /// Bridges a local signal to a remote member. Once the remote side
    /// acknowledges the member, every emission is forwarded as a call.
    pub fn connect_local_signal(
        &self,
        sender: Option<&Arc<ExposedObject>>,
        signal: &str,
        member: &str,
    ) -> Outcome {
        let Some(sender) = sender.filter(|_| !signal.is_empty() && !member.is_empty()) else {
            return Outcome::failure(LOCAL_BRIDGE_ARGS_MESSAGE);
        };
        let Some(spec) = sender.signal(signature_name(signal)) else {
            return Outcome::failure(SENDER_SIGNAL_MESSAGE);
        };
        if let Some(kind) = spec.params.iter().find(|k| !k.is_supported()) {
            return Outcome::failure(format!("Parameter type '{}' not supported", kind));
        }
        let member = signature_name(member);
        let remote = self
            .inner
            .mirror()
            .invokable_methods
            .iter()
            .find(|s| signature_name(s) == member)
            .cloned();
        let Some(remote) = remote else {
            return Outcome::failure(REMOTE_MEMBER_MESSAGE);
        };
        if parse_signature(&remote).map(|(_, params)| params) != Some(spec.params.clone()) {
            return Outcome::failure(PARAMETER_MISMATCH_MESSAGE);
        }

        let kind = PendingKind::Bridge {
            sender: sender.clone(),
            signal: spec.name.clone(),
            member: member.to_owned(),
        };
        let msg = Message::request(0, MessageType::RequestConnection).with(keys::MEMBER, member);
        self.inner.request(msg, Pending::new(kind))
    }
}

fn call_message(method: &str, args: Vec<Value>) -> Message {
    Message::request(0, MessageType::IpcCall)
        .with(keys::METHOD, method)
        .with(keys::ARGUMENTS, Value::List(args))
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn string_set(value: Option<&Value>) -> BTreeSet<String> {
    match value.and_then(|v| v.convert(Kind::StringList)) {
        Some(Value::StringList(items)) => items.into_iter().collect(),
        _ => BTreeSet::new(),
    }
}

impl Inner {
    fn mirror(&self) -> RwLockReadGuard<'_, Mirror> {
        self.mirror.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn mirror_mut(&self) -> RwLockWriteGuard<'_, Mirror> {
        self.mirror.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn has_method(&self, method: &str) -> bool {
        !method.is_empty()
            && self
                .mirror()
                .invokable_methods
                .iter()
                .any(|s| signature_name(s) == method)
    }

    fn activate(self: &Arc<Self>) {
        if self.path.is_empty() {
            self.fail_activation(EMPTY_NAME_MESSAGE.into());
            return;
        }
        if self.mirror().activated || lock(&self.connection).is_some() {
            return;
        }
        if self.connecting.swap(true, Ordering::AcqRel) {
            return;
        }
        self.activation.send_replace(Activation::Activating);

        enum Source {
            Tcp(SocketAddr),
            Ready(Arc<dyn Transport>),
        }
        let source = match &self.target {
            Target::Tcp(addr) => Source::Tcp(*addr),
            Target::Transport(slot) => match lock(slot).take() {
                Some(transport) => Source::Ready(transport),
                None => {
                    self.connecting.store(false, Ordering::Release);
                    self.fail_activation("Transport is no longer available".into());
                    return;
                }
            },
        };

        info!(object = %self.path, "activating proxy");
        let weak = Arc::downgrade(self);
        let timeout = clamp_call_timeout(self.runtime.config().call_timeout);
        self.runtime.handle().spawn(async move {
            let transport: Result<Arc<dyn Transport>, String> = match source {
                Source::Ready(transport) => Ok(transport),
                Source::Tcp(addr) => match tokio::time::timeout(timeout, TcpTransport::connect(addr)).await {
                    Ok(Ok(transport)) => Ok(Arc::new(transport)),
                    Ok(Err(e)) => Err(e.to_string()),
                    Err(_) => Err(CONNECT_TIMEOUT_MESSAGE.into()),
                },
            };
            let Some(inner) = weak.upgrade() else { return };
            inner.connecting.store(false, Ordering::Release);
            match transport {
                Ok(transport) => inner.attach(transport),
                Err(reason) => {
                    info!(object = %inner.path, reason = %reason, "proxy could not connect");
                    inner.fail_activation(reason);
                }
            }
        });
    }

    fn attach(self: &Arc<Self>, transport: Arc<dyn Transport>) {
        let (conn, events) = Connection::open(transport, self.runtime.config().max_frame_len);
        let conn = Arc::new(conn);
        *lock(&self.connection) = Some(conn.clone());
        self.runtime
            .handle()
            .spawn(pump(Arc::downgrade(self), Arc::downgrade(&conn), events));

        let handshake = Message::request(0, MessageType::RequestConnection);
        let sent = self.request(handshake, Pending::new(PendingKind::Activate));
        if !sent.success {
            self.fail_activation(sent.message);
        }
    }

    /// Assigns an id, records the pending entry, sends, and arms the timeout.
    fn request(self: &Arc<Self>, mut msg: Message, pending: Pending) -> Outcome {
        let Some(conn) = lock(&self.connection).clone() else {
            return Outcome::failure(CONNECTION_LOST_MESSAGE);
        };
        let id = self.runtime.next_message_id();
        msg.id = id;
        let msg = msg.with(keys::OBJECT, self.path.as_str());

        self.pending.insert(id, pending);
        if let Err(e) = conn.send(&msg) {
            debug!(object = %self.path, id, error = %e, "request not sent");
            self.pending.remove(&id);
            return Outcome::failure(CONNECTION_LOST_MESSAGE);
        }
        trace!(object = %self.path, id, message_type = %msg.message_type, "request sent");
        self.arm_timeout(id);
        Outcome::success(Value::Int(id as i32))
    }

    fn arm_timeout(self: &Arc<Self>, id: u32) {
        let weak = Arc::downgrade(self);
        let timeout = clamp_call_timeout(self.runtime.config().call_timeout);
        self.runtime.handle().spawn(async move {
            tokio::time::sleep(timeout).await;
            let Some(inner) = weak.upgrade() else { return };
            let Some((_, pending)) = inner.pending.remove(&id) else { return };
            info!(object = %inner.path, id, "request timed out");
            inner.expired.insert(id);
            if matches!(pending.kind, PendingKind::Activate) {
                inner.close_connection();
            }
            inner.fail(id, pending, CALL_TIMEOUT_MESSAGE);
        });
    }

    fn handle_message(self: &Arc<Self>, msg: Message) {
        if !msg.is_response {
            match msg.message_type {
                MessageType::SignalDelivery => self.deliver_signal(msg),
                other => debug!(object = %self.path, id = msg.id, message_type = %other, "ignoring request"),
            }
            return;
        }

        let Some((id, pending)) = self.pending.remove(&msg.id) else {
            if self.expired.remove(&msg.id).is_some() {
                trace!(object = %self.path, id = msg.id, "discarding late response");
            } else {
                warn!(object = %self.path, id = msg.id, "out of sequence message");
                self.events.emit(&ProxyEvent::Error(OUT_OF_SEQUENCE_MESSAGE.into()));
            }
            return;
        };
        self.complete(id, pending, msg);
    }

    fn complete(self: &Arc<Self>, id: u32, pending: Pending, msg: Message) {
        let outcome = msg.result.clone();
        match pending.kind {
            PendingKind::Activate => {
                self.finish_activation(msg);
                return;
            }
            PendingKind::Forward => {
                if !outcome.success {
                    debug!(object = %self.path, id, reason = %outcome.message, "forwarded call failed");
                }
                return;
            }
            PendingKind::Update(ref name) => {
                if outcome.success {
                    self.mirror_mut().properties.insert(name.clone(), outcome.data.clone());
                }
            }
            PendingKind::Change(ref name) => {
                if outcome.success {
                    self.mirror_mut().properties.insert(name.clone(), outcome.data.clone());
                    self.events
                        .emit(&ProxyEvent::PropertyUpdated(name.clone(), outcome.data.clone()));
                }
            }
            PendingKind::Call => {}
            PendingKind::Subscribe(ref signal, ref bridge) => {
                if outcome.success {
                    self.remote_bridges
                        .entry(signal.clone())
                        .or_default()
                        .push(bridge.clone());
                }
            }
            PendingKind::Bridge { ref sender, ref signal, ref member } => {
                if outcome.success {
                    self.install_local_bridge(sender, signal, member);
                }
            }
        }

        if let Some(notify) = &pending.notify {
            notify.deliver(&outcome);
        }
        if let Some(waiter) = pending.waiter {
            let _ = waiter.send(outcome);
        }
        self.events.emit(&ProxyEvent::RequestFinished(id));
    }

    /// Completes a pending entry with a local failure.
    fn fail(&self, id: u32, pending: Pending, reason: &str) {
        let outcome = Outcome::failure(reason);
        match pending.kind {
            PendingKind::Activate => {
                self.fail_activation(reason.to_owned());
                return;
            }
            PendingKind::Forward => return,
            _ => {}
        }
        if let Some(notify) = &pending.notify {
            notify.deliver(&outcome);
        }
        if let Some(waiter) = pending.waiter {
            let _ = waiter.send(outcome);
        }
        self.events.emit(&ProxyEvent::RequestFinished(id));
    }

    fn fail_all_pending(&self, reason: &str) {
        let mut ids: Vec<u32> = self.pending.iter().map(|e| *e.key()).collect();
        ids.sort_unstable();
        for id in ids {
            if let Some((_, pending)) = self.pending.remove(&id) {
                self.fail(id, pending, reason);
            }
        }
    }

    fn finish_activation(&self, msg: Message) {
        if !msg.result.success {
            info!(object = %self.path, reason = %msg.result.message, "activation refused");
            self.close_connection();
            self.fail_activation(msg.result.message);
            return;
        }

        {
            let mut mirror = self.mirror_mut();
            mirror.properties = msg
                .get(keys::PROPERTIES)
                .and_then(Value::as_map)
                .cloned()
                .unwrap_or_default();
            mirror.signal_methods = string_set(msg.get(keys::SIGNALS));
            mirror.invokable_methods = string_set(msg.get(keys::MEMBERS));
            mirror.activated = true;
        }
        info!(object = %self.path, "proxy activated");
        self.activation.send_replace(Activation::Activated);
        self.events.emit(&ProxyEvent::Activated);
    }

    fn fail_activation(&self, reason: String) {
        self.activation.send_replace(Activation::Failed(reason.clone()));
        self.events.emit(&ProxyEvent::CouldNotActivate(reason));
    }

    fn deliver_signal(&self, msg: Message) {
        let signature = msg.get_str(keys::SIGNAL).to_owned();
        let args = msg
            .get(keys::ARGUMENTS)
            .and_then(Value::to_list)
            .unwrap_or_default();
        debug!(object = %self.path, signal = %signature, "signal occurred");

        let bridges = self
            .remote_bridges
            .get(signature_name(&signature))
            .map(|b| b.value().clone())
            .unwrap_or_default();
        for bridge in bridges {
            let result = bridge.receiver.invoke(&bridge.member, &args);
            if !result.success {
                warn!(member = %bridge.member, reason = %result.message, "bridged slot failed");
            }
        }
        self.events.emit(&ProxyEvent::SignalOccurred(signature, args));
    }

    fn install_local_bridge(self: &Arc<Self>, sender: &Arc<ExposedObject>, signal: &str, member: &str) {
        let weak = Arc::downgrade(self);
        let target = member.to_owned();
        let slot = Arc::new(move |args: &[Value]| {
            let Some(inner) = weak.upgrade() else { return };
            let sent = inner.request(call_message(&target, args.to_vec()), Pending::new(PendingKind::Forward));
            if !sent.success {
                debug!(member = %target, reason = %sent.message, "emission not forwarded");
            }
        });
        if let Some(subscription) = sender.subscribe(signal, slot) {
            debug!(object = %self.path, signal, member, "local signal bridged");
            lock(&self.local_bridges).push(LocalBridge {
                sender: sender.clone(),
                signal: signal.to_owned(),
                subscription,
            });
        }
    }

    fn release_bridges(&self) {
        let bridges: Vec<LocalBridge> = lock(&self.local_bridges).drain(..).collect();
        for bridge in bridges {
            bridge.sender.unsubscribe(&bridge.signal, bridge.subscription);
        }
        self.remote_bridges.clear();
    }

    fn close_connection(&self) {
        if let Some(conn) = lock(&self.connection).take() {
            conn.close();
        }
    }

    /// Tears down after the peer went away.
    fn connection_lost(&self, conn: &Weak<Connection>) {
        {
            let mut current = lock(&self.connection);
            let is_current = current
                .as_ref()
                .is_some_and(|c| Weak::ptr_eq(conn, &Arc::downgrade(c)));
            if !is_current {
                return;
            }
            current.take();
        }

        let was_activated = {
            let mut mirror = self.mirror_mut();
            let was_activated = mirror.activated;
            *mirror = Mirror::default();
            was_activated
        };
        self.release_bridges();
        self.fail_all_pending(CONNECTION_LOST_MESSAGE);

        if was_activated {
            info!(object = %self.path, "proxy deactivated");
            self.activation
                .send_replace(Activation::Failed(CONNECTION_LOST_MESSAGE.into()));
            self.events.emit(&ProxyEvent::Deactivated);
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.close_connection();
        self.release_bridges();
        self.fail_all_pending(CONNECTION_LOST_MESSAGE);
    }
}

async fn pump(
    proxy: Weak<Inner>,
    conn: Weak<Connection>,
    mut events: mpsc::UnboundedReceiver<Event>,
) {
    while let Some(event) = events.recv().await {
        let Some(inner) = proxy.upgrade() else { break };
        match event {
            Event::Message(msg) => inner.handle_message(msg),
            Event::PeerClosed => {
                inner.connection_lost(&conn);
                break;
            }
            Event::WriteBufferEmpty | Event::ReadBufferEmpty => {}
        }
    }
}
