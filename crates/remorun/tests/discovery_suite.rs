//! Discovery between runtimes on one host, over loopback unicast and over
//! broadcast on a shared port.

mod common;

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use remorun::Config;
use remorun::Discovery;
use remorun::FoundServer;
use remorun::Registry;
use remorun::Runtime;
use remorun::Server;
use remorun::discovery::ALREADY_STARTED_MESSAGE;
use remorun::discovery::NOT_STARTED_MESSAGE;

use common::LOCALHOST;
use common::eventually;

struct Node {
    _runtime: Arc<Runtime>,
    server: Server,
    discovery: Discovery,
    found: Arc<Mutex<Vec<FoundServer>>>,
    udp_port: u16,
}

async fn node(user: &str) -> Node {
    node_on(user, common::free_udp_port()).await
}

async fn node_on(user: &str, udp_port: u16) -> Node {
    let config = Config {
        discovery_port: udp_port,
        discovery_interval: Duration::from_millis(50),
        ..Config::default()
    };
    let runtime = Runtime::new(config).expect("inside a tokio runtime");
    let server = Server::new(runtime.clone(), Arc::new(Registry::new()));
    server.listen(SocketAddr::new(LOCALHOST, 0)).await.expect("listen");

    let discovery = Discovery::with_user(runtime.clone(), user);
    let found = Arc::new(Mutex::new(Vec::new()));
    let sink = found.clone();
    discovery.subscribe(move |server| sink.lock().expect("lock").push(server.clone()));

    Node {
        _runtime: runtime,
        server,
        discovery,
        found,
        udp_port,
    }
}

fn loopback(port: u16) -> SocketAddr {
    SocketAddr::new(LOCALHOST, port)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_nodes_find_each_other_once() {
    let a = node("alice (test)").await;
    let b = node("bob (test)").await;

    // Each node also hears its own beacon, which must not be reported.
    a.discovery.set_targets(Some(vec![loopback(a.udp_port), loopback(b.udp_port)]));
    b.discovery.set_targets(Some(vec![loopback(a.udp_port), loopback(b.udp_port)]));
    assert!(a.discovery.start(0).await.success);
    assert!(b.discovery.start(0).await.success);
    assert_eq!(a.discovery.local_port().await, Some(a.udp_port));

    let (a_found, b_found) = (a.found.clone(), b.found.clone());
    assert!(
        eventually(Duration::from_secs(5), || {
            a_found.lock().expect("lock").len() == 1 && b_found.lock().expect("lock").len() == 1
        })
        .await
    );

    // Several more beacon rounds must not produce duplicates.
    tokio::time::sleep(Duration::from_millis(400)).await;
    let seen_by_a = a.found.lock().expect("lock").clone();
    assert_eq!(seen_by_a.len(), 1);
    assert_eq!(seen_by_a[0].port, b.server.server_port());
    assert_eq!(seen_by_a[0].user, "bob (test)");
    assert_eq!(seen_by_a[0].server_id, b.server.server_id());
    assert_eq!(a.discovery.found_servers(), seen_by_a);

    let seen_by_b = b.found.lock().expect("lock").clone();
    assert_eq!(seen_by_b.len(), 1);
    assert_eq!(seen_by_b[0].port, a.server.server_port());

    assert!(a.discovery.stop().await.success);
    assert!(b.discovery.stop().await.success);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_nodes_share_one_discovery_port() {
    let port = common::free_udp_port();
    let mut nodes = Vec::new();
    for user in ["alice (test)", "bob (test)", "carol (test)", "dave (test)"] {
        nodes.push(node_on(user, port).await);
    }
    // Default targets: the broadcast address on the shared port.
    for node in &nodes {
        let outcome = node.discovery.start(0).await;
        assert!(outcome.success, "start failed: {}", outcome.message);
        assert_eq!(node.discovery.local_port().await, Some(port));
    }

    let others = nodes.len() - 1;
    let found: Vec<_> = nodes.iter().map(|n| n.found.clone()).collect();
    assert!(
        eventually(Duration::from_secs(5), || {
            found.iter().all(|f| f.lock().expect("lock").len() == others)
        })
        .await,
        "not every node saw every other server"
    );

    tokio::time::sleep(Duration::from_millis(400)).await;
    for (i, node) in nodes.iter().enumerate() {
        let mut seen: Vec<u16> = node.found.lock().expect("lock").iter().map(|s| s.port).collect();
        seen.sort_unstable();
        let mut expected: Vec<u16> = nodes
            .iter()
            .enumerate()
            .filter(|(j, _)| *j != i)
            .map(|(_, other)| other.server.server_port())
            .collect();
        expected.sort_unstable();
        assert_eq!(seen, expected, "servers seen by {}", node.discovery.user());
    }

    for node in &nodes {
        assert!(node.discovery.stop().await.success);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_zero_interval_still_announces() {
    let a = node("alice (test)").await;
    let udp_port = common::free_udp_port();
    let runtime = Runtime::new(Config {
        discovery_port: udp_port,
        discovery_interval: Duration::ZERO,
        ..Config::default()
    })
    .expect("inside a tokio runtime");
    let server = Server::new(runtime.clone(), Arc::new(Registry::new()));
    server.listen(SocketAddr::new(LOCALHOST, 0)).await.expect("listen");
    let eager = Discovery::with_user(runtime.clone(), "eager (test)");
    eager.set_targets(Some(vec![loopback(a.udp_port)]));

    assert!(a.discovery.start(0).await.success);
    assert!(eager.start(0).await.success);

    let found = a.found.clone();
    assert!(eventually(Duration::from_secs(5), || found.lock().expect("lock").len() == 1).await);
    assert_eq!(a.found.lock().expect("lock")[0].port, server.server_port());
    assert!(eager.stop().await.success);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_released_server_is_reported_again() {
    let a = node("alice (test)").await;
    let b = node("bob (test)").await;
    b.discovery.set_targets(Some(vec![loopback(a.udp_port)]));
    assert!(a.discovery.start(0).await.success);
    assert!(b.discovery.start(0).await.success);

    let found = a.found.clone();
    assert!(eventually(Duration::from_secs(5), || found.lock().expect("lock").len() == 1).await);

    let record = a.discovery.found_servers().pop().expect("one record");
    assert!(a.discovery.release_found_server(&record));
    assert!(!a.discovery.release_found_server(&record));
    assert!(eventually(Duration::from_secs(5), || found.lock().expect("lock").len() == 2).await);

    a.discovery.release_all_found_servers();
    assert!(a.discovery.found_servers().len() <= 1);
}

#[tokio::test]
async fn test_start_stop_contract() {
    let a = node("alice (test)").await;

    let outcome = a.discovery.stop().await;
    assert_eq!(outcome.message, NOT_STARTED_MESSAGE);

    assert!(a.discovery.start(0).await.success);
    assert!(a.discovery.is_running().await);
    let outcome = a.discovery.start(0).await;
    assert_eq!(outcome.message, ALREADY_STARTED_MESSAGE);

    assert!(a.discovery.stop().await.success);
    assert!(!a.discovery.is_running().await);
    assert_eq!(a.discovery.stop().await.message, NOT_STARTED_MESSAGE);

    assert!(a.discovery.start(0).await.success, "restart after stop");
}

#[tokio::test]
async fn test_bind_failure_is_an_outcome() {
    let a = node("alice (test)").await;
    let blocker = std::net::UdpSocket::bind(("0.0.0.0", 0)).expect("bind blocker");
    let port = blocker.local_addr().expect("blocker address").port();

    let outcome = a.discovery.start(port).await;
    assert!(!outcome.success);
    assert!(!outcome.message.is_empty());
    assert!(!a.discovery.is_running().await);
}

#[tokio::test]
async fn test_servers_without_a_listener_are_not_announced() {
    let runtime = Runtime::new(Config {
        discovery_port: common::free_udp_port(),
        discovery_interval: Duration::from_millis(50),
        ..Config::default()
    })
    .expect("inside a tokio runtime");
    let observer = node("observer (test)").await;

    // No server at all: nothing is sent.
    let silent = Discovery::with_user(runtime.clone(), "silent (test)");
    silent.set_targets(Some(vec![loopback(observer.udp_port)]));
    assert!(observer.discovery.start(0).await.success);
    assert!(silent.start(0).await.success);

    // A server that is not listening is announced with port 0 and skipped.
    let _idle = Server::new(runtime.clone(), Arc::new(Registry::new()));
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(observer.found.lock().expect("lock").is_empty());
}
