//! Connects a local signal to a method of a remote object without a proxy.
//! Each emission becomes an independent one-shot [`Call`].

use std::net::IpAddr;
use std::sync::Arc;

use tracing::debug;

use remopack::Value;
use remorpc::Outcome;

use crate::call::Call;
use crate::call::CallRequest;
use crate::object::ExposedObject;
use crate::object::signature_name;
use crate::runtime::Runtime;

pub const SENDER_MISSING_MESSAGE: &str = "Sender not specified";
pub const SIGNAL_MISSING_MESSAGE: &str = "Signal doesn't exist in the sender";

/// Forwards every emission of `sender.signal` to `object.method` at
/// `address:port`. The outcome's data is the subscription id.
pub fn ipc_connect(
    runtime: &Arc<Runtime>,
    sender: Option<&Arc<ExposedObject>>,
    signal: &str,
    address: IpAddr,
    port: u16,
    object: &str,
    method: &str,
) -> Outcome {
    let Some(sender) = sender else {
        return Outcome::failure(SENDER_MISSING_MESSAGE);
    };
    let Some(spec) = sender.signal(signature_name(signal)) else {
        return Outcome::failure(SIGNAL_MISSING_MESSAGE);
    };
    if let Some(kind) = spec.params.iter().find(|k| !k.is_supported()) {
        return Outcome::failure(format!("Parameter type '{}' not supported", kind));
    }

    let runtime = Arc::downgrade(runtime);
    let object = object.to_owned();
    let method = method.to_owned();
    let slot = Arc::new(move |args: &[Value]| {
        let Some(runtime) = runtime.upgrade() else { return };
        let request = CallRequest::new(address, port, object.as_str(), method.as_str()).args(args.to_vec());
        let call = Call::start(&runtime, request);
        let method = method.clone();
        call.on_done(move |outcome| {
            if !outcome.success {
                debug!(method = %method, reason = %outcome.message, "forwarded emission failed");
            }
        });
    });

    match sender.subscribe(&spec.name, slot) {
        Some(id) => Outcome::success(Value::Int(id.0 as i32)),
        None => Outcome::failure(SIGNAL_MISSING_MESSAGE),
    }
}
