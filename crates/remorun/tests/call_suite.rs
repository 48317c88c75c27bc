//! One-shot calls and the free-standing signal bridge against a live server.

mod common;

use std::net::IpAddr;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;

use remopack::Value;
use remorpc::Outcome;
use remorun::Call;
use remorun::CallRequest;
use remorun::CallState;
use remorun::call::CALL_TIMEOUT_MESSAGE;
use remorun::ipc_connect;

use common::HIDDEN_PATH;
use common::LOCALHOST;
use common::Receiver;
use common::SERVICE_PATH;
use common::eventually;
use common::within;

fn service_call(port: u16, method: &str, args: Vec<Value>) -> CallRequest {
    CallRequest::new(LOCALHOST, port, SERVICE_PATH, method).args(args)
}

// ============================================================================
// Successful calls
// ============================================================================

#[tokio::test]
async fn test_call_integer() {
    let h = common::start_server().await;
    let call = Call::start(&h.runtime, service_call(h.port, "integer", vec![Value::Int(10)]));
    let outcome = within(call.done()).await;

    assert!(outcome.success, "unexpected failure: {}", outcome.message);
    assert_eq!(outcome.data, Value::Int(10));
    assert_eq!(call.state(), CallState::Done);
    assert!(call.message_id() > 0);
}

#[tokio::test]
async fn test_call_converts_arguments() {
    let h = common::start_server().await;
    let call = Call::start(
        &h.runtime,
        service_call(h.port, "sum", vec![Value::from("2"), Value::Double(3.0)]),
    );
    let outcome = within(call.done()).await;
    assert_eq!(outcome.data, Value::Int(5));
}

#[tokio::test]
async fn test_application_result_passes_through() {
    let h = common::start_server().await;

    let ok = Call::start(&h.runtime, service_call(h.port, "testResultFunction", vec![Value::Bool(true)]));
    let ok = within(ok.done()).await;
    assert_eq!(ok, Outcome::new(true, "", "Result is success", Value::from("ok")));

    let failed = Call::start(&h.runtime, service_call(h.port, "testResultFunction", vec![Value::Bool(false)]));
    let failed = within(failed.done()).await;
    assert!(!failed.success);
    assert_eq!(failed.code, "TestFailure");
    assert_eq!(failed.message, "Result is failure");
    assert_eq!(failed.data, Value::Invalid);
}

// ============================================================================
// Protocol failures
// ============================================================================

async fn failure_message(h: &common::Harness, request: CallRequest) -> String {
    let call = Call::start(&h.runtime, request);
    let outcome = within(call.done()).await;
    assert!(!outcome.success);
    assert_eq!(call.state(), CallState::Done);
    outcome.message
}

#[tokio::test]
async fn test_dispatch_failures() {
    let h = common::start_server().await;

    let unknown = CallRequest::new(LOCALHOST, h.port, "Application.Unknown", "integer").args(vec![Value::Int(1)]);
    assert_eq!(failure_message(&h, unknown).await, "Object 'Application.Unknown' doesn't exist");

    let hidden = CallRequest::new(LOCALHOST, h.port, HIDDEN_PATH, "integer").args(vec![Value::Int(1)]);
    assert_eq!(failure_message(&h, hidden).await, "Meta access for this object was denied");

    let extra = service_call(h.port, "integer", vec![Value::Int(1), Value::Int(2)]);
    assert_eq!(failure_message(&h, extra).await, "Parameter count mismatch");

    let date = service_call(h.port, "stamp", vec![Value::Date { year: 2020, month: 5, day: 17 }]);
    assert_eq!(failure_message(&h, date).await, "Argument type 'Date' not supported");

    let missing = service_call(h.port, "nothing", vec![]);
    assert_eq!(failure_message(&h, missing).await, "Method 'nothing' was not found in object");

    let protected = service_call(h.port, "internal", vec![]);
    assert_eq!(failure_message(&h, protected).await, "Cannot call a non-public method");

    let wrong_type = service_call(h.port, "integer", vec![Value::List(vec![])]);
    assert_eq!(
        failure_message(&h, wrong_type).await,
        "Invalid parameter type. Expecting 'Int' but found 'List'"
    );
}

#[tokio::test]
async fn test_preflight_checks_never_connect() {
    let h = common::start_server().await;
    let unspecified = IpAddr::V4(Ipv4Addr::UNSPECIFIED);

    let cases = [
        (CallRequest::new(unspecified, h.port, SERVICE_PATH, "integer"), "Invalid host address"),
        (CallRequest::new(LOCALHOST, 0, SERVICE_PATH, "integer"), "Invalid port number"),
        (CallRequest::new(LOCALHOST, h.port, SERVICE_PATH, ""), "Method unspecified"),
    ];
    for (request, expected) in cases {
        let call = Call::start(&h.runtime, request);
        assert_eq!(call.state(), CallState::Done);
        assert_eq!(call.outcome().message, expected);
        assert_eq!(call.message_id(), 0);
    }
}

// ============================================================================
// Connectivity
// ============================================================================

#[tokio::test]
async fn test_call_times_out() {
    let h = common::start_server().await;
    let request = service_call(h.port, "longFunction", vec![Value::Int(1000)]).timeout(Duration::from_millis(200));
    let call = Call::start(&h.runtime, request);
    let outcome = within(call.done()).await;

    assert_eq!(call.state(), CallState::TimedOut);
    assert_eq!(outcome.message, CALL_TIMEOUT_MESSAGE);

    // The late response is never observed.
    tokio::time::sleep(Duration::from_millis(1200)).await;
    assert_eq!(call.state(), CallState::TimedOut);
    assert_eq!(call.outcome().message, CALL_TIMEOUT_MESSAGE);
}

#[tokio::test]
async fn test_connection_refused() {
    let h = common::start_server().await;
    let port = common::closed_tcp_port();
    let call = Call::start(&h.runtime, service_call(port, "integer", vec![Value::Int(1)]));
    let outcome = within(call.done()).await;

    assert_eq!(call.state(), CallState::ConnectionRefused);
    assert!(!outcome.success);
    assert!(!outcome.message.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_many_concurrent_calls() {
    let h = common::start_server().await;
    let operands: Vec<(i32, i32)> = {
        let mut rng = rand::thread_rng();
        (0..60)
            .map(|_| (rng.gen_range(-10_000..10_000), rng.gen_range(-10_000..10_000)))
            .collect()
    };
    let calls: Vec<Call> = operands
        .iter()
        .map(|&(a, b)| Call::start(&h.runtime, service_call(h.port, "sum", vec![Value::Int(a), Value::Int(b)])))
        .collect();

    for (i, (call, (a, b))) in calls.iter().zip(&operands).enumerate() {
        let outcome = within(call.done()).await;
        assert!(outcome.success, "call {} failed: {}", i, outcome.message);
        assert_eq!(outcome.data, Value::Int(a + b));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_call_from_foreign_thread() {
    let h = common::start_server().await;
    let runtime = h.runtime.clone();
    let port = h.port;

    let thread = std::thread::spawn(move || {
        let call = Call::start(&runtime, service_call(port, "integer", vec![Value::Int(77)]));
        call.wait_for_done()
    });
    let outcome = tokio::task::spawn_blocking(move || thread.join().expect("caller thread"))
        .await
        .expect("join");

    assert!(outcome.success);
    assert_eq!(outcome.data, Value::Int(77));
}

#[tokio::test]
async fn test_on_done_callback() {
    let h = common::start_server().await;
    let (tx, rx) = tokio::sync::oneshot::channel();
    let call = Call::start(&h.runtime, service_call(h.port, "echo", vec![Value::from("hi")]));
    call.on_done(move |outcome| {
        let _ = tx.send(outcome.clone());
    });

    let outcome = within(rx).await.expect("callback ran");
    assert_eq!(outcome.data, Value::from("hi"));
}

// ============================================================================
// Free-standing bridge
// ============================================================================

#[tokio::test]
async fn test_ipc_connect_forwards_emissions() {
    let h = common::start_server().await;
    let receiver = Receiver::new();

    let outcome = ipc_connect(&h.runtime, Some(&receiver.object), "tick", LOCALHOST, h.port, SERVICE_PATH, "record");
    assert!(outcome.success, "bridge failed: {}", outcome.message);

    receiver.object.emit("tick", vec![Value::Int(4)]);
    let service = h.service.clone();
    assert!(
        eventually(Duration::from_secs(5), || service.get_property("recorded") == Some(Value::Int(4))).await
    );
}

#[tokio::test]
async fn test_ipc_connect_usage_errors() {
    let h = common::start_server().await;
    let receiver = Receiver::new();

    let none: Option<&Arc<remorun::ExposedObject>> = None;
    let outcome = ipc_connect(&h.runtime, none, "tick", LOCALHOST, h.port, SERVICE_PATH, "record");
    assert_eq!(outcome.message, "Sender not specified");

    let outcome = ipc_connect(&h.runtime, Some(&receiver.object), "nope", LOCALHOST, h.port, SERVICE_PATH, "record");
    assert_eq!(outcome.message, "Signal doesn't exist in the sender");

    let outcome = ipc_connect(&h.runtime, Some(&receiver.object), "when", LOCALHOST, h.port, SERVICE_PATH, "record");
    assert_eq!(outcome.message, "Parameter type 'Date' not supported");
    assert_eq!(receiver.object.subscriber_count("when"), 0);
}
