//! # One-Shot Calls
//!
//! A `Call` opens a connection, sends one IpcCall request and waits for the
//! matching response.
//!
//! ## State Machine
//!
//! `Idle -> Connecting -> Sent -> {Done, TimedOut, ConnectionRefused, ConnectionLost}`
//!
//! Requests that fail pre-flight checks go straight from `Idle` to `Done` with
//! a failed outcome and never touch the network.
//!
//! ## Invariants
//! - A call reaches exactly one terminal state, once.
//! - Once the timer fires the connection is closed; a later response is never
//!   observed.
//! - `Call::start` may be called from any thread. The socket work always runs
//!   on the runtime's reactor.

use std::net::IpAddr;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::debug;
use tracing::info;

use remopack::Value;
use remorpc::Message;
use remorpc::MessageType;
use remorpc::Outcome;
use remorpc::keys;

use crate::config::clamp_call_timeout;
use crate::connection::Connection;
use crate::connection::Event;
use crate::runtime::Runtime;
use crate::transport::TcpTransport;

pub const CONNECT_TIMEOUT_MESSAGE: &str = "A connection timeout occured";
pub const CALL_TIMEOUT_MESSAGE: &str = "A call timeout occured";
pub const CONNECTION_CUT_MESSAGE: &str = "The connection was cut before any response could be received";
pub const INVALID_RESPONSE_MESSAGE: &str = "Invalid response sent by the server";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    Idle,
    Connecting,
    Sent,
    Done,
    TimedOut,
    ConnectionRefused,
    ConnectionLost,
}

impl CallState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            CallState::Done
                | CallState::TimedOut
                | CallState::ConnectionRefused
                | CallState::ConnectionLost
        )
    }
}

/// What to call and where.
#[derive(Debug, Clone)]
pub struct CallRequest {
    pub address: IpAddr,
    pub port: u16,
    pub object: String,
    pub method: String,
    pub arguments: Vec<Value>,
    /// Overrides the runtime's call timeout. Clamped like the default.
    pub timeout: Option<Duration>,
}

impl CallRequest {
    pub fn new(address: IpAddr, port: u16, object: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            address,
            port,
            object: object.into(),
            method: method.into(),
            arguments: Vec::new(),
            timeout: None,
        }
    }

    pub fn args(mut self, arguments: Vec<Value>) -> Self {
        self.arguments = arguments;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    fn preflight(&self) -> Option<&'static str> {
        if self.address.is_unspecified() {
            Some("Invalid host address")
        } else if self.port == 0 {
            Some("Invalid port number")
        } else if self.method.is_empty() {
            Some("Method unspecified")
        } else {
            None
        }
    }
}

#[derive(Debug, Clone)]
struct Status {
    state: CallState,
    outcome: Outcome,
}

/// Handle to a call in flight. Cloning shares the same call; dropping every
/// handle does not cancel it.
#[derive(Clone)]
pub struct Call {
    status: Arc<watch::Sender<Status>>,
    message_id: Arc<AtomicU32>,
    handle: Handle,
}

impl Call {
    /// Starts a call on the runtime's reactor.
    pub fn start(runtime: &Arc<Runtime>, request: CallRequest) -> Call {
        let (status, _) = watch::channel(Status {
            state: CallState::Idle,
            outcome: Outcome::default(),
        });
        let call = Call {
            status: Arc::new(status),
            message_id: Arc::new(AtomicU32::new(0)),
            handle: runtime.handle().clone(),
        };

        if let Some(reason) = request.preflight() {
            debug!(object = %request.object, method = %request.method, reason, "call rejected");
            call.finish(CallState::Done, Outcome::failure(reason));
            return call;
        }

        let task = call.clone();
        let runtime = runtime.clone();
        runtime.handle().clone().spawn(async move {
            let (state, outcome) = task.run(&runtime, request).await;
            task.finish(state, outcome);
        });
        call
    }

    pub fn state(&self) -> CallState {
        self.status.borrow().state
    }

    /// The outcome so far; meaningful once the state is terminal.
    pub fn outcome(&self) -> Outcome {
        self.status.borrow().outcome.clone()
    }

    /// Id of the request message, or 0 before it was sent.
    pub fn message_id(&self) -> u32 {
        self.message_id.load(Ordering::Acquire)
    }

    /// Waits for the terminal state and returns the outcome.
    pub async fn done(&self) -> Outcome {
        let mut rx = self.status.subscribe();
        match rx.wait_for(|s| s.state.is_terminal()).await {
            Ok(status) => status.outcome.clone(),
            Err(_) => self.outcome(),
        }
    }

    /// Blocks the current thread until the call completes.
    ///
    /// # Panics
    /// Panics when called from within an async execution context.
    pub fn wait_for_done(&self) -> Outcome {
        self.handle.block_on(self.done())
    }

    /// Runs `f` with the outcome once the call completes.
    pub fn on_done(&self, f: impl FnOnce(&Outcome) + Send + 'static) {
        let call = self.clone();
        self.handle.spawn(async move {
            let outcome = call.done().await;
            f(&outcome);
        });
    }

    fn set_state(&self, state: CallState) {
        self.status.send_modify(|s| s.state = state);
    }

    fn finish(&self, state: CallState, outcome: Outcome) {
        self.status.send_if_modified(|s| {
            if s.state.is_terminal() {
                return false;
            }
            s.state = state;
            s.outcome = outcome;
            true
        });
    }

    async fn run(&self, runtime: &Runtime, request: CallRequest) -> (CallState, Outcome) {
        let Ok(_permit) = runtime.call_permits().acquire_owned().await else {
            return (CallState::ConnectionRefused, Outcome::failure("Runtime is shutting down"));
        };

        let timeout = clamp_call_timeout(request.timeout.unwrap_or(runtime.config().call_timeout));
        let addr = SocketAddr::new(request.address, request.port);

        self.set_state(CallState::Connecting);
        let stream = match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                info!(%addr, error = %e, "call connection refused");
                return (CallState::ConnectionRefused, Outcome::failure(e.to_string()));
            }
            Err(_) => {
                info!(%addr, "call connection timed out");
                return (CallState::ConnectionRefused, Outcome::failure(CONNECT_TIMEOUT_MESSAGE));
            }
        };

        let (conn, mut events) = Connection::open(
            Arc::new(TcpTransport::from_stream(stream)),
            runtime.config().max_frame_len,
        );

        let id = runtime.next_message_id();
        let msg = Message::request(id, MessageType::IpcCall)
            .with(keys::OBJECT, request.object.as_str())
            .with(keys::METHOD, request.method.as_str())
            .with(keys::ARGUMENTS, Value::List(request.arguments));
        if let Err(e) = conn.send(&msg) {
            debug!(%addr, id, error = %e, "call send failed");
            return (CallState::ConnectionLost, Outcome::failure(CONNECTION_CUT_MESSAGE));
        }
        self.message_id.store(id, Ordering::Release);
        self.set_state(CallState::Sent);
        debug!(%addr, id, object = %request.object, method = %request.method, "call sent");

        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);

        let result = loop {
            tokio::select! {
                _ = &mut deadline => {
                    info!(%addr, id, "call timed out");
                    break (CallState::TimedOut, Outcome::failure(CALL_TIMEOUT_MESSAGE));
                }
                event = events.recv() => match event {
                    Some(Event::Message(resp)) if resp.is_response && resp.id == id => {
                        if resp.message_type != MessageType::IpcCall {
                            break (CallState::Done, Outcome::failure(INVALID_RESPONSE_MESSAGE));
                        }
                        debug!(%addr, id, success = resp.result.success, "call finished");
                        break (CallState::Done, resp.result);
                    }
                    Some(Event::Message(other)) => {
                        debug!(%addr, id = other.id, "ignoring unrelated message");
                    }
                    Some(Event::PeerClosed) | None => {
                        info!(%addr, id, "connection cut before response");
                        break (CallState::ConnectionLost, Outcome::failure(CONNECTION_CUT_MESSAGE));
                    }
                    Some(_) => {}
                },
            }
        };

        conn.close();
        result
    }
}
