//! Shared fixtures: a test service exposed by a live server, and a local
//! receiver object used for notifications and bridging.

#![allow(dead_code)]

use std::future::Future;
use std::net::IpAddr;
use std::net::Ipv4Addr;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use remopack::Kind;
use remopack::Value;
use remorpc::Outcome;
use remorun::Config;
use remorun::ExposedObject;
use remorun::Registry;
use remorun::Runtime;
use remorun::Server;
use remorun::Visibility;

pub const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);
pub const SERVICE_PATH: &str = "Application.TestService";
pub const HIDDEN_PATH: &str = "Application.Object";

/// The object every suite talks to.
pub fn test_service() -> Arc<ExposedObject> {
    ExposedObject::builder("TestService")
        .method("integer", &[Kind::Int], Kind::Int, |_, args| args[0].clone())
        .method("sum", &[Kind::Int, Kind::Int], Kind::Int, |_, args| {
            Value::Int(args[0].to_int().unwrap_or_default() + args[1].to_int().unwrap_or_default())
        })
        .method("echo", &[Kind::Any], Kind::Any, |_, args| args[0].clone())
        .method("stamp", &[Kind::Date], Kind::Bool, |_, _| Value::Bool(true))
        .method("longFunction", &[Kind::Int], Kind::Bool, |_, args| {
            let ms = args[0].to_int().unwrap_or_default().max(0) as u64;
            std::thread::sleep(Duration::from_millis(ms));
            Value::Bool(true)
        })
        .outcome_method("testResultFunction", &[Kind::Bool], |_, args| {
            if args[0].to_bool().unwrap_or_default() {
                Outcome::new(true, "", "Result is success", Value::from("ok"))
            } else {
                Outcome::failure_with_code("TestFailure", "Result is failure")
            }
        })
        .method("setValue", &[Kind::Int], Kind::Void, |object, args| {
            let _ = object.set_property("value", args[0].clone());
            Value::Invalid
        })
        .method("record", &[Kind::Int], Kind::Void, |object, args| {
            let _ = object.set_property("recorded", args[0].clone());
            Value::Invalid
        })
        .method_with_visibility("internal", &[], Kind::Void, Visibility::Protected, |_, _| Value::Invalid)
        .property("value", Kind::Int, Value::Int(0), Some("valueChanged"))
        .property("name", Kind::String, Value::from("service"), None)
        .property("recorded", Kind::Int, Value::Int(0), None)
        .signal("pulse", &[Kind::String])
        .build()
}

pub struct Harness {
    pub runtime: Arc<Runtime>,
    pub registry: Arc<Registry>,
    pub service: Arc<ExposedObject>,
    pub server: Server,
    pub port: u16,
}

pub async fn start_server() -> Harness {
    start_server_with(Config::default()).await
}

pub async fn start_server_with(config: Config) -> Harness {
    let runtime = Runtime::new(config).expect("inside a tokio runtime");
    let registry = Arc::new(Registry::new());
    let service = test_service();
    registry
        .register(SERVICE_PATH, service.clone(), true)
        .expect("register service");
    registry
        .register(HIDDEN_PATH, test_service(), false)
        .expect("register hidden object");

    let server = Server::new(runtime.clone(), registry.clone());
    let port = server
        .listen(SocketAddr::new(LOCALHOST, 0))
        .await
        .expect("listen on an ephemeral port");

    Harness {
        runtime,
        registry,
        service,
        server,
        port,
    }
}

pub type Notification = (Value, bool, String);

/// A local object receiving notifications and bridged signals.
pub struct Receiver {
    pub object: Arc<ExposedObject>,
    pub notifications: Arc<Mutex<Vec<Notification>>>,
    pub values: Arc<Mutex<Vec<i32>>>,
}

impl Receiver {
    pub fn new() -> Self {
        let notifications: Arc<Mutex<Vec<Notification>>> = Arc::new(Mutex::new(Vec::new()));
        let values: Arc<Mutex<Vec<i32>>> = Arc::new(Mutex::new(Vec::new()));

        let sink = notifications.clone();
        let value_sink = values.clone();
        let object = ExposedObject::builder("Receiver")
            .method("onResult", &[Kind::Any, Kind::Bool, Kind::String], Kind::Void, move |_, args| {
                let entry = (
                    args[0].clone(),
                    args[1].to_bool().unwrap_or_default(),
                    args[2].as_str().unwrap_or_default().to_owned(),
                );
                sink.lock().expect("lock").push(entry);
                Value::Invalid
            })
            .method("onValue", &[Kind::Int], Kind::Void, move |_, args| {
                value_sink.lock().expect("lock").push(args[0].to_int().unwrap_or_default());
                Value::Invalid
            })
            .method("onText", &[Kind::String], Kind::Void, |_, _| Value::Invalid)
            .method("badNotify", &[Kind::Int], Kind::Void, |_, _| Value::Invalid)
            .signal("tick", &[Kind::Int])
            .signal("words", &[Kind::String, Kind::String])
            .signal("when", &[Kind::Date])
            .build();

        Self {
            object,
            notifications,
            values,
        }
    }

    pub fn notification_count(&self) -> usize {
        self.notifications.lock().expect("lock").len()
    }

    pub fn values(&self) -> Vec<i32> {
        self.values.lock().expect("lock").clone()
    }
}

/// Polls `check` until it holds or `timeout` elapses.
pub async fn eventually<F>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Awaits `fut` with a generous upper bound so a hang fails the test.
pub async fn within<T>(fut: impl Future<Output = T>) -> T {
    tokio::time::timeout(Duration::from_secs(10), fut)
        .await
        .expect("operation did not finish in time")
}

/// A TCP port with nothing listening on it.
pub fn closed_tcp_port() -> u16 {
    let listener = std::net::TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).expect("bind probe");
    listener.local_addr().expect("probe address").port()
}

/// A UDP port that was free a moment ago.
pub fn free_udp_port() -> u16 {
    let socket = std::net::UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).expect("bind probe");
    socket.local_addr().expect("probe address").port()
}
