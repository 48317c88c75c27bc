//! # remorun
//!
//! Runtime for exposing objects over TCP and calling them from other
//! processes: the request dispatcher (`server`), one-shot calls (`call`),
//! long-lived remote object mirrors (`proxy`), signal bridging (`bridge`) and
//! UDP discovery (`discovery`). Every piece is driven by the tokio reactor
//! captured in a shared [`Runtime`].

pub mod bridge;
pub mod call;
pub mod config;
pub mod connection;
pub mod discovery;
pub mod events;
pub mod invoke;
pub mod mock_transport;
pub mod object;
pub mod proxy;
pub mod registry;
pub mod runtime;
pub mod server;
pub mod transport;

pub use bridge::ipc_connect;
pub use call::Call;
pub use call::CallRequest;
pub use call::CallState;
pub use config::Config;
pub use discovery::Discovery;
pub use discovery::FoundServer;
pub use object::ExposedObject;
pub use object::ObjectBuilder;
pub use object::Visibility;
pub use proxy::Notify;
pub use proxy::ProxyEvent;
pub use proxy::RemoteObjectProxy;
pub use registry::Registry;
pub use runtime::Runtime;
pub use server::Server;
