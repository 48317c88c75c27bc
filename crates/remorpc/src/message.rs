//! # Messages
//!
//! The unit of wire exchange and its outcome envelope.

use remopack::Value;
use remopack::ValueMap;

/// The fixed set of message types. Each has a 16-byte tag on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    RequestObject,
    GetPropertyValue,
    SetPropertyValue,
    RequestConnection,
    SignalDelivery,
    IpcCall,
}

impl MessageType {
    pub const ALL: [MessageType; 6] = [
        MessageType::RequestObject,
        MessageType::GetPropertyValue,
        MessageType::SetPropertyValue,
        MessageType::RequestConnection,
        MessageType::SignalDelivery,
        MessageType::IpcCall,
    ];

    /// The 16-byte wire tag (binary UUID).
    pub fn tag(self) -> [u8; 16] {
        match self {
            // 653FC1D5-5D74-4903-A113-4F8AFCB9F074
            MessageType::RequestObject => [
                0x65, 0x3F, 0xC1, 0xD5, 0x5D, 0x74, 0x49, 0x03,
                0xA1, 0x13, 0x4F, 0x8A, 0xFC, 0xB9, 0xF0, 0x74,
            ],
            // BC73CC41-EBB2-403F-B143-628675385D76
            MessageType::GetPropertyValue => [
                0xBC, 0x73, 0xCC, 0x41, 0xEB, 0xB2, 0x40, 0x3F,
                0xB1, 0x43, 0x62, 0x86, 0x75, 0x38, 0x5D, 0x76,
            ],
            // AFA6B515-DCCD-429A-B8DC-B64E5C01BE82
            MessageType::SetPropertyValue => [
                0xAF, 0xA6, 0xB5, 0x15, 0xDC, 0xCD, 0x42, 0x9A,
                0xB8, 0xDC, 0xB6, 0x4E, 0x5C, 0x01, 0xBE, 0x82,
            ],
            // 398A7574-9186-4BEF-9459-FEA040E07EE9
            MessageType::RequestConnection => [
                0x39, 0x8A, 0x75, 0x74, 0x91, 0x86, 0x4B, 0xEF,
                0x94, 0x59, 0xFE, 0xA0, 0x40, 0xE0, 0x7E, 0xE9,
            ],
            // F1B30D27-48DF-4439-8788-C58057683551
            MessageType::SignalDelivery => [
                0xF1, 0xB3, 0x0D, 0x27, 0x48, 0xDF, 0x44, 0x39,
                0x87, 0x88, 0xC5, 0x80, 0x57, 0x68, 0x35, 0x51,
            ],
            // 274DC568-A5C2-4575-AE24-F4D001AC71CF
            MessageType::IpcCall => [
                0x27, 0x4D, 0xC5, 0x68, 0xA5, 0xC2, 0x45, 0x75,
                0xAE, 0x24, 0xF4, 0xD0, 0x01, 0xAC, 0x71, 0xCF,
            ],
        }
    }

    /// Maps a wire tag back to its type.
    pub fn from_tag(tag: &[u8; 16]) -> Option<Self> {
        Self::ALL.into_iter().find(|ty| ty.tag() == *tag)
    }

    pub fn name(self) -> &'static str {
        match self {
            MessageType::RequestObject => "RequestObject",
            MessageType::GetPropertyValue => "GetPropertyValue",
            MessageType::SetPropertyValue => "SetPropertyValue",
            MessageType::RequestConnection => "RequestConnection",
            MessageType::SignalDelivery => "SignalDelivery",
            MessageType::IpcCall => "IpcCall",
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Payload keys shared by both ends of the protocol.
pub mod keys {
    pub const OBJECT: &str = "object";
    pub const METHOD: &str = "method";
    pub const ARGUMENTS: &str = "arguments";
    pub const PROPERTY_NAME: &str = "propertyName";
    pub const PROPERTY_VALUE: &str = "propertyValue";
    pub const SIGNAL: &str = "signal";
    pub const MEMBER: &str = "member";
    pub const PROPERTIES: &str = "properties";
    pub const SIGNALS: &str = "signals";
    pub const MEMBERS: &str = "members";
}

/// Outcome envelope carried by every response and returned by every public
/// operation that can fail at the protocol level.
///
/// When `success` is false, `data` is `Value::Invalid`. A successful outcome
/// normally has an empty `message`, but one built with `Outcome::new` may
/// carry both.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Outcome {
    pub success: bool,
    pub code: String,
    pub message: String,
    pub data: Value,
}

impl Outcome {
    /// Builds an outcome verbatim, without normalising any field.
    pub fn new(success: bool, code: impl Into<String>, message: impl Into<String>, data: Value) -> Self {
        Self { success, code: code.into(), message: message.into(), data }
    }

    /// A success with no data.
    pub fn ok() -> Self {
        Self::new(true, "", "", Value::Invalid)
    }

    /// A success carrying `data`.
    pub fn success(data: impl Into<Value>) -> Self {
        Self::new(true, "", "", data.into())
    }

    /// A failure with a human-readable reason.
    pub fn failure(message: impl Into<String>) -> Self {
        Self::new(false, "", message, Value::Invalid)
    }

    /// A failure with a machine-readable code and a reason.
    pub fn failure_with_code(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(false, code, message, Value::Invalid)
    }

    pub fn is_success(&self) -> bool {
        self.success
    }

    /// Drops `data` on failures so the envelope invariant holds.
    pub fn normalized(mut self) -> Self {
        if !self.success {
            self.data = Value::Invalid;
        }
        self
    }
}

impl From<bool> for Outcome {
    fn from(success: bool) -> Self {
        Self::new(success, "", "", Value::Invalid)
    }
}

/// Unit of wire exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub id: u32,
    pub message_type: MessageType,
    pub is_response: bool,
    pub data: ValueMap,
    pub result: Outcome,
}

impl Message {
    /// A request of the given type. The result envelope is left empty.
    pub fn request(id: u32, message_type: MessageType) -> Self {
        Self {
            id,
            message_type,
            is_response: false,
            data: ValueMap::new(),
            result: Outcome::default(),
        }
    }

    /// A response correlated with `request` (same id and type).
    pub fn response_to(request: &Message, result: Outcome) -> Self {
        Self {
            id: request.id,
            message_type: request.message_type,
            is_response: true,
            data: ValueMap::new(),
            result,
        }
    }

    /// Inserts a payload field, builder style.
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.data.insert(key.to_owned(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    /// A string payload field, or the empty string when absent or not a string.
    pub fn get_str(&self, key: &str) -> &str {
        self.data.get(key).and_then(Value::as_str).unwrap_or_default()
    }
}
