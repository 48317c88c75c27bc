//! # Invocation
//!
//! Validates a method request against an object's tables and runs it.
//!
//! ## Invariants
//! - Checks run in a fixed order: empty name, lookup, visibility, argument
//!   count, then each argument (type, then support), then the return kind.
//!   The first failure wins.
//! - No user code runs unless every check passed.

use remopack::Kind;
use remopack::Value;
use remorpc::Outcome;

use crate::object::ExposedObject;
use crate::object::Invoker;
use crate::object::Visibility;

/// A protocol-visible failure. `Display` yields the exact message that goes
/// on the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum InvokeError {
    ObjectNotFound(String),
    AccessDenied,
    MethodUnspecified,
    MethodNotFound(String),
    NonPublic,
    ParameterCount,
    ParameterType { expected: Kind, found: &'static str },
    UnsupportedArgument(Kind),
    UnsupportedReturn(Kind),
    PropertyNotFound(String),
    SignalNotFound(String),
}

impl std::fmt::Display for InvokeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ObjectNotFound(path) => write!(f, "Object '{}' doesn't exist", path),
            Self::AccessDenied => write!(f, "Meta access for this object was denied"),
            Self::MethodUnspecified => write!(f, "Method name not specified"),
            Self::MethodNotFound(name) => write!(f, "Method '{}' was not found in object", name),
            Self::NonPublic => write!(f, "Cannot call a non-public method"),
            Self::ParameterCount => write!(f, "Parameter count mismatch"),
            Self::ParameterType { expected, found } => write!(
                f,
                "Invalid parameter type. Expecting '{}' but found '{}'",
                expected, found
            ),
            Self::UnsupportedArgument(kind) => write!(f, "Argument type '{}' not supported", kind),
            Self::UnsupportedReturn(kind) => write!(f, "Return type '{}' not supported", kind),
            Self::PropertyNotFound(name) => {
                write!(f, "Property '{}' doesn't exist in this object", name)
            }
            Self::SignalNotFound(name) => write!(f, "Signal '{}' doesn't exist in this object", name),
        }
    }
}

impl std::error::Error for InvokeError {}

impl From<InvokeError> for Outcome {
    fn from(e: InvokeError) -> Self {
        Outcome::failure(e.to_string())
    }
}

/// A validated call, ready to run. Owns everything it needs so it can be
/// moved to a blocking thread.
pub struct PreparedCall {
    method: String,
    invoker: Invoker,
    args: Vec<Value>,
    ret: Kind,
}

impl PreparedCall {
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Runs the method and wraps its result.
    ///
    /// Plain values become successful outcomes, converted to the declared
    /// return kind where possible. Application outcomes pass through with
    /// their code and message; failures lose their data.
    pub fn run(self, object: &ExposedObject) -> Outcome {
        match self.invoker {
            Invoker::Value(f) => {
                let value = f(object, &self.args);
                match self.ret {
                    Kind::Void => Outcome::ok(),
                    kind => {
                        let value = value.convert(kind).unwrap_or(value);
                        Outcome::success(value)
                    }
                }
            }
            Invoker::Outcome(f) => f(object, &self.args).normalized(),
        }
    }
}

/// Validates `method(args)` against the object's tables.
///
/// Arguments are converted to the declared parameter kinds.
pub fn prepare(object: &ExposedObject, method: &str, args: &[Value]) -> Result<PreparedCall, InvokeError> {
    if method.is_empty() {
        return Err(InvokeError::MethodUnspecified);
    }
    let spec = object
        .method(method)
        .ok_or_else(|| InvokeError::MethodNotFound(method.to_owned()))?;
    if spec.visibility != Visibility::Public {
        return Err(InvokeError::NonPublic);
    }
    if spec.params.len() != args.len() {
        return Err(InvokeError::ParameterCount);
    }

    let mut converted = Vec::with_capacity(args.len());
    for (kind, arg) in spec.params.iter().zip(args) {
        let value = arg.convert(*kind).ok_or(InvokeError::ParameterType {
            expected: *kind,
            found: arg.type_name(),
        })?;
        if !kind.is_supported() {
            return Err(InvokeError::UnsupportedArgument(*kind));
        }
        converted.push(value);
    }

    if !spec.ret.is_supported_return() {
        return Err(InvokeError::UnsupportedReturn(spec.ret));
    }

    Ok(PreparedCall {
        method: spec.name.clone(),
        invoker: spec.invoker.clone(),
        args: converted,
        ret: spec.ret,
    })
}
