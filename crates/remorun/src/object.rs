//! # Exposed Objects
//!
//! An `ExposedObject` is a local object described by explicit registration
//! tables: methods, properties and signals. The tables are built once with
//! `ObjectBuilder` and never change afterwards; only property values and
//! signal subscriptions are mutable.
//!
//! ## Philosophy
//!
//! - **Declared, not discovered**: every member carries its declared kinds, so
//!   the dispatcher can validate a request before running any user code.
//! - **Signals are subscriber lists**: emitting a signal calls every slot
//!   subscribed to it, in subscription order.

use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;

use remopack::Kind;
use remopack::Value;
use remopack::ValueMap;
use remorpc::Outcome;

use crate::events::Emitter;
use crate::events::SubscriptionId;
use crate::invoke;
use crate::invoke::InvokeError;

/// Body of a method returning a plain value (`Value::Invalid` for `Void`).
pub type MethodFn = Arc<dyn Fn(&ExposedObject, &[Value]) -> Value + Send + Sync>;

/// Body of a method returning its own outcome envelope.
pub type OutcomeFn = Arc<dyn Fn(&ExposedObject, &[Value]) -> Outcome + Send + Sync>;

/// A signal slot. Receives the emitted arguments.
pub type Slot = Arc<dyn Fn(&[Value]) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Public,
    Protected,
    Private,
}

#[derive(Clone)]
pub enum Invoker {
    Value(MethodFn),
    Outcome(OutcomeFn),
}

#[derive(Clone)]
pub struct MethodSpec {
    pub name: String,
    pub params: Vec<Kind>,
    pub ret: Kind,
    pub visibility: Visibility,
    pub invoker: Invoker,
}

impl MethodSpec {
    pub fn signature(&self) -> String {
        signature(&self.name, &self.params)
    }
}

#[derive(Debug, Clone)]
pub struct PropertySpec {
    pub name: String,
    pub kind: Kind,
    /// Signal emitted with the new value after each change.
    pub notify: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SignalSpec {
    pub name: String,
    pub params: Vec<Kind>,
}

impl SignalSpec {
    pub fn signature(&self) -> String {
        signature(&self.name, &self.params)
    }
}

/// Renders `name(Kind,Kind,...)`.
pub fn signature(name: &str, params: &[Kind]) -> String {
    let params: Vec<&str> = params.iter().map(|k| k.name()).collect();
    format!("{}({})", name, params.join(","))
}

/// Splits `name(Kind,Kind)` into its name and parameter kinds.
///
/// Returns `None` when the text is not a signature or names an unknown kind.
pub fn parse_signature(text: &str) -> Option<(&str, Vec<Kind>)> {
    let open = text.find('(')?;
    let inner = text[open + 1..].strip_suffix(')')?;
    let name = &text[..open];
    if inner.trim().is_empty() {
        return Some((name, Vec::new()));
    }
    let params = inner
        .split(',')
        .map(|k| Kind::from_name(k.trim()))
        .collect::<Option<Vec<Kind>>>()?;
    Some((name, params))
}

/// The name part of a signature, or the text itself when it has no parameter list.
pub fn signature_name(text: &str) -> &str {
    match text.find('(') {
        Some(open) => &text[..open],
        None => text,
    }
}

/// Per-object subscriber registry for signals.
pub struct SignalHub {
    slots: DashMap<String, Arc<Emitter<Vec<Value>>>>,
}

impl SignalHub {
    pub fn new() -> Self {
        Self { slots: DashMap::new() }
    }

    pub fn subscribe(&self, signal: &str, slot: Slot) -> SubscriptionId {
        let emitter = self
            .slots
            .entry(signal.to_owned())
            .or_insert_with(|| Arc::new(Emitter::new()))
            .clone();
        emitter.subscribe(move |args: &Vec<Value>| slot(args))
    }

    pub fn unsubscribe(&self, signal: &str, id: SubscriptionId) -> bool {
        let Some(emitter) = self.slots.get(signal).map(|e| e.value().clone()) else {
            return false;
        };
        emitter.unsubscribe(id)
    }

    pub fn emit(&self, signal: &str, args: Vec<Value>) {
        let Some(emitter) = self.slots.get(signal).map(|e| e.value().clone()) else {
            return;
        };
        emitter.emit(&args);
    }

    pub fn subscriber_count(&self, signal: &str) -> usize {
        self.slots.get(signal).map(|e| e.len()).unwrap_or(0)
    }
}

impl Default for SignalHub {
    fn default() -> Self {
        Self::new()
    }
}

/// A local object that can be served, invoked and used as a bridge endpoint.
pub struct ExposedObject {
    class_name: String,
    methods: BTreeMap<String, MethodSpec>,
    properties: BTreeMap<String, PropertySpec>,
    signals: BTreeMap<String, SignalSpec>,
    values: DashMap<String, Value>,
    hub: SignalHub,
}

impl ExposedObject {
    pub fn builder(class_name: impl Into<String>) -> ObjectBuilder {
        ObjectBuilder::new(class_name)
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn method(&self, name: &str) -> Option<&MethodSpec> {
        self.methods.get(name)
    }

    pub fn methods(&self) -> impl Iterator<Item = &MethodSpec> {
        self.methods.values()
    }

    pub fn property(&self, name: &str) -> Option<&PropertySpec> {
        self.properties.get(name)
    }

    pub fn properties(&self) -> impl Iterator<Item = &PropertySpec> {
        self.properties.values()
    }

    pub fn signal(&self, name: &str) -> Option<&SignalSpec> {
        self.signals.get(name)
    }

    pub fn signals(&self) -> impl Iterator<Item = &SignalSpec> {
        self.signals.values()
    }

    /// Signatures of the public methods, in name order.
    pub fn member_signatures(&self) -> Vec<String> {
        self.methods
            .values()
            .filter(|m| m.visibility == Visibility::Public)
            .map(MethodSpec::signature)
            .collect()
    }

    pub fn signal_signatures(&self) -> Vec<String> {
        self.signals.values().map(SignalSpec::signature).collect()
    }

    /// Current value of every property.
    pub fn property_values(&self) -> ValueMap {
        self.properties
            .keys()
            .map(|name| (name.clone(), self.get_property(name).unwrap_or_default()))
            .collect()
    }

    pub fn get_property(&self, name: &str) -> Option<Value> {
        self.properties.get(name)?;
        Some(self.values.get(name).map(|v| v.value().clone()).unwrap_or_default())
    }

    /// Converts `value` to the declared kind, stores it and emits the notify
    /// signal. Returns the stored value.
    pub fn set_property(&self, name: &str, value: Value) -> Result<Value, InvokeError> {
        let spec = self
            .properties
            .get(name)
            .ok_or_else(|| InvokeError::PropertyNotFound(name.to_owned()))?;
        let stored = value.convert(spec.kind).ok_or_else(|| InvokeError::ParameterType {
            expected: spec.kind,
            found: value.type_name(),
        })?;
        self.values.insert(name.to_owned(), stored.clone());
        if let Some(signal) = &spec.notify {
            self.emit(signal, vec![stored.clone()]);
        }
        Ok(stored)
    }

    /// Emits a signal to every subscribed slot.
    pub fn emit(&self, signal: &str, args: Vec<Value>) {
        self.hub.emit(signal, args);
    }

    /// Subscribes to a declared signal. Returns `None` for unknown signals.
    pub fn subscribe(&self, signal: &str, slot: Slot) -> Option<SubscriptionId> {
        self.signals.get(signal)?;
        Some(self.hub.subscribe(signal, slot))
    }

    pub fn unsubscribe(&self, signal: &str, id: SubscriptionId) -> bool {
        self.hub.unsubscribe(signal, id)
    }

    pub fn subscriber_count(&self, signal: &str) -> usize {
        self.hub.subscriber_count(signal)
    }

    /// Invokes a method locally, with the same validation the server applies.
    pub fn invoke(&self, method: &str, args: &[Value]) -> Outcome {
        match invoke::prepare(self, method, args) {
            Ok(call) => call.run(self),
            Err(e) => Outcome::failure(e.to_string()),
        }
    }
}

/// Declares the tables of an `ExposedObject`.
pub struct ObjectBuilder {
    class_name: String,
    methods: BTreeMap<String, MethodSpec>,
    properties: BTreeMap<String, PropertySpec>,
    signals: BTreeMap<String, SignalSpec>,
    values: DashMap<String, Value>,
}

impl ObjectBuilder {
    pub fn new(class_name: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            methods: BTreeMap::new(),
            properties: BTreeMap::new(),
            signals: BTreeMap::new(),
            values: DashMap::new(),
        }
    }

    /// Adds a public method.
    pub fn method<F>(self, name: &str, params: &[Kind], ret: Kind, f: F) -> Self
    where
        F: Fn(&ExposedObject, &[Value]) -> Value + Send + Sync + 'static,
    {
        self.method_with_visibility(name, params, ret, Visibility::Public, f)
    }

    pub fn method_with_visibility<F>(
        mut self,
        name: &str,
        params: &[Kind],
        ret: Kind,
        visibility: Visibility,
        f: F,
    ) -> Self
    where
        F: Fn(&ExposedObject, &[Value]) -> Value + Send + Sync + 'static,
    {
        self.methods.insert(name.to_owned(), MethodSpec {
            name: name.to_owned(),
            params: params.to_vec(),
            ret,
            visibility,
            invoker: Invoker::Value(Arc::new(f)),
        });
        self
    }

    /// Adds a public method that returns an application outcome.
    pub fn outcome_method<F>(mut self, name: &str, params: &[Kind], f: F) -> Self
    where
        F: Fn(&ExposedObject, &[Value]) -> Outcome + Send + Sync + 'static,
    {
        self.methods.insert(name.to_owned(), MethodSpec {
            name: name.to_owned(),
            params: params.to_vec(),
            ret: Kind::Outcome,
            visibility: Visibility::Public,
            invoker: Invoker::Outcome(Arc::new(f)),
        });
        self
    }

    /// Adds a stored property with an initial value and an optional notify signal.
    ///
    /// The notify signal is declared automatically with one parameter of the
    /// property's kind.
    pub fn property(mut self, name: &str, kind: Kind, initial: Value, notify: Option<&str>) -> Self {
        if let Some(signal) = notify {
            self = self.signal(signal, &[kind]);
        }
        self.properties.insert(name.to_owned(), PropertySpec {
            name: name.to_owned(),
            kind,
            notify: notify.map(str::to_owned),
        });
        self.values.insert(name.to_owned(), initial);
        self
    }

    pub fn signal(mut self, name: &str, params: &[Kind]) -> Self {
        self.signals.insert(name.to_owned(), SignalSpec {
            name: name.to_owned(),
            params: params.to_vec(),
        });
        self
    }

    pub fn build(self) -> Arc<ExposedObject> {
        Arc::new(ExposedObject {
            class_name: self.class_name,
            methods: self.methods,
            properties: self.properties,
            signals: self.signals,
            values: self.values,
            hub: SignalHub::new(),
        })
    }
}
