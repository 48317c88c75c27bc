//! # Dynamic Values
//!
//! `Value` is what crosses the process boundary: arguments, return values,
//! property values and signal payloads. `Kind` is what a registration table
//! declares for a parameter or return slot.
//!
//! ## Invariants
//! - **Recursion Safety**: Encoding and decoding are bounded by `MAX_RECURSION_DEPTH`.
//! - **Pure Conversions**: `Value::convert` never coerces silently; a conversion
//!   that would lose meaning returns `None`.

use std::collections::BTreeMap;

use crate::Decoder;
use crate::Encoder;
use crate::Error;
use crate::Result;
use crate::Tag;

/// The maximum nesting depth for Values before encoding or decoding fails.
pub const MAX_RECURSION_DEPTH: usize = 64;

/// String-keyed map of values, ordered by key.
pub type ValueMap = BTreeMap<String, Value>;

/// A dynamically typed value.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    /// The typed "empty" value.
    #[default]
    Invalid,
    Int(i32),
    Bool(bool),
    Double(f64),
    String(String),
    StringList(Vec<String>),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    Map(ValueMap),
    /// A calendar date. Encodable, but outside the set of kinds an
    /// invocation accepts.
    Date { year: i32, month: u8, day: u8 },
}

/// Declared type of a parameter, return slot, property or signal argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    Void,
    Int,
    Bool,
    Double,
    String,
    StringList,
    /// Accepts any value unchanged.
    Any,
    List,
    Map,
    Bytes,
    /// An application result envelope. Only valid as a return kind.
    Outcome,
    Date,
}

impl Kind {
    /// Returns true for kinds that may appear as a parameter.
    pub fn is_supported(self) -> bool {
        matches!(
            self,
            Kind::Int
                | Kind::Bool
                | Kind::Double
                | Kind::String
                | Kind::StringList
                | Kind::Any
                | Kind::List
                | Kind::Map
                | Kind::Bytes
        )
    }

    /// Returns true for kinds that may appear as a return type.
    pub fn is_supported_return(self) -> bool {
        self == Kind::Void || self == Kind::Outcome || self.is_supported()
    }

    pub fn name(self) -> &'static str {
        match self {
            Kind::Void => "Void",
            Kind::Int => "Int",
            Kind::Bool => "Bool",
            Kind::Double => "Double",
            Kind::String => "String",
            Kind::StringList => "StringList",
            Kind::Any => "Any",
            Kind::List => "List",
            Kind::Map => "Map",
            Kind::Bytes => "Bytes",
            Kind::Outcome => "Outcome",
            Kind::Date => "Date",
        }
    }

    /// Parses a kind name as rendered by `name()`.
    pub fn from_name(name: &str) -> Option<Self> {
        let kind = match name {
            "Void" => Kind::Void,
            "Int" => Kind::Int,
            "Bool" => Kind::Bool,
            "Double" => Kind::Double,
            "String" => Kind::String,
            "StringList" => Kind::StringList,
            "Any" => Kind::Any,
            "List" => Kind::List,
            "Map" => Kind::Map,
            "Bytes" => Kind::Bytes,
            "Outcome" => Kind::Outcome,
            "Date" => Kind::Date,
            _ => return None,
        };
        Some(kind)
    }
}

impl std::fmt::Display for Kind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl Value {
    /// Returns false only for `Value::Invalid`.
    pub fn is_valid(&self) -> bool {
        !matches!(self, Value::Invalid)
    }

    /// Name of the value's own type, as used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Invalid => "Invalid",
            Value::Int(_) => "Int",
            Value::Bool(_) => "Bool",
            Value::Double(_) => "Double",
            Value::String(_) => "String",
            Value::StringList(_) => "StringList",
            Value::Bytes(_) => "Bytes",
            Value::List(_) => "List",
            Value::Map(_) => "Map",
            Value::Date { .. } => "Date",
        }
    }

    /// Converts the value to `kind` when that is possible without losing meaning.
    ///
    /// Numeric strings convert to numbers, scalars convert to strings, a single
    /// string converts to a string list. A map never converts to a list.
    pub fn convert(&self, kind: Kind) -> Option<Value> {
        match kind {
            Kind::Any => Some(self.clone()),
            Kind::Int => self.to_int().map(Value::Int),
            Kind::Bool => self.to_bool().map(Value::Bool),
            Kind::Double => self.to_double().map(Value::Double),
            Kind::String => self.to_string_value().map(Value::String),
            Kind::StringList => self.to_string_list().map(Value::StringList),
            Kind::List => match self {
                Value::List(items) => Some(Value::List(items.clone())),
                Value::StringList(items) => {
                    Some(Value::List(items.iter().cloned().map(Value::String).collect()))
                }
                _ => None,
            },
            Kind::Map => match self {
                Value::Map(map) => Some(Value::Map(map.clone())),
                _ => None,
            },
            Kind::Bytes => match self {
                Value::Bytes(b) => Some(Value::Bytes(b.clone())),
                Value::String(s) => Some(Value::Bytes(s.as_bytes().to_vec())),
                _ => None,
            },
            Kind::Date => match self {
                Value::Date { .. } => Some(self.clone()),
                _ => None,
            },
            Kind::Void | Kind::Outcome => None,
        }
    }

    pub fn to_int(&self) -> Option<i32> {
        match self {
            Value::Int(v) => Some(*v),
            Value::Bool(b) => Some(i32::from(*b)),
            Value::Double(d) => {
                let r = d.round();
                if r.is_finite() && r >= f64::from(i32::MIN) && r <= f64::from(i32::MAX) {
                    Some(r as i32)
                } else {
                    None
                }
            }
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn to_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            Value::Int(v) => Some(*v != 0),
            Value::Double(d) => Some(*d != 0.0),
            Value::String(s) => {
                let s = s.trim();
                Some(!(s.is_empty() || s == "0" || s.eq_ignore_ascii_case("false")))
            }
            _ => None,
        }
    }

    pub fn to_double(&self) -> Option<f64> {
        match self {
            Value::Double(d) => Some(*d),
            Value::Int(v) => Some(f64::from(*v)),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    fn to_string_value(&self) -> Option<String> {
        match self {
            Value::String(s) => Some(s.clone()),
            Value::Int(v) => Some(v.to_string()),
            Value::Double(d) => Some(d.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            Value::Bytes(b) => String::from_utf8(b.clone()).ok(),
            _ => None,
        }
    }

    fn to_string_list(&self) -> Option<Vec<String>> {
        match self {
            Value::StringList(items) => Some(items.clone()),
            Value::String(s) => Some(vec![s.clone()]),
            Value::List(items) => items
                .iter()
                .map(|item| match item {
                    Value::String(s) => Some(s.clone()),
                    _ => None,
                })
                .collect(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&ValueMap> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Returns list items, treating a string list as a list of strings.
    pub fn to_list(&self) -> Option<Vec<Value>> {
        match self.convert(Kind::List)? {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    /// Looks up `key` when the value is a map.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_map()?.get(key)
    }

    /// Encodes the value into a standalone byte buffer.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut enc = Encoder::new();
        encode_value(&mut enc, self)?;
        enc.into_bytes()
    }

    /// Decodes a value from a buffer produced by `to_bytes`.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        decode_value(&mut Decoder::new(bytes))
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self { Value::Int(v) }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self { Value::Bool(v) }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self { Value::Double(v) }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self { Value::String(v.to_owned()) }
}

impl From<String> for Value {
    fn from(v: String) -> Self { Value::String(v) }
}

impl From<Vec<String>> for Value {
    fn from(v: Vec<String>) -> Self { Value::StringList(v) }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self { Value::Bytes(v) }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self { Value::List(v) }
}

impl From<ValueMap> for Value {
    fn from(v: ValueMap) -> Self { Value::Map(v) }
}

/// Encodes a `Value` into the encoder stream.
///
/// # Errors
/// Returns `Error::RecursionLimitExceeded` if the value is too deeply nested.
pub fn encode_value(enc: &mut Encoder, value: &Value) -> Result<()> {
    encode_value_impl(enc, value, 0)
}

fn encode_value_impl(enc: &mut Encoder, value: &Value, depth: usize) -> Result<()> {
    if depth > MAX_RECURSION_DEPTH {
        return Err(Error::RecursionLimitExceeded);
    }

    match value {
        Value::Invalid => enc.invalid()?,
        Value::Int(v) => enc.s32(*v)?,
        Value::Bool(b) => enc.bool(*b)?,
        Value::Double(d) => enc.f64(*d)?,
        Value::String(s) => enc.str(s)?,
        Value::Bytes(b) => enc.bytes(b)?,
        Value::Date { year, month, day } => enc.date(*year, *month, *day)?,
        Value::StringList(items) => {
            enc.string_list_begin()?;
            for item in items {
                enc.str(item)?;
            }
            enc.string_list_end()?;
        }
        Value::List(items) => {
            enc.list_begin()?;
            for item in items {
                encode_value_impl(enc, item, depth + 1)?;
            }
            enc.list_end()?;
        }
        Value::Map(map) => {
            enc.map_begin()?;
            for (key, item) in map {
                enc.entry_begin(key)?;
                encode_value_impl(enc, item, depth + 1)?;
                enc.entry_end()?;
            }
            enc.map_end()?;
        }
    }
    Ok(())
}

/// Decodes the next `Value` from the decoder.
///
/// # Errors
/// Returns `Error::RecursionLimitExceeded` if the value is too deeply nested,
/// or a structural error if the bytes are not a valid value.
pub fn decode_value(dec: &mut Decoder) -> Result<Value> {
    decode_value_impl(dec, 0)
}

fn decode_value_impl(dec: &mut Decoder, depth: usize) -> Result<Value> {
    if depth > MAX_RECURSION_DEPTH {
        return Err(Error::RecursionLimitExceeded);
    }

    let value = match dec.peek_tag()? {
        Tag::Invalid => {
            dec.invalid()?;
            Value::Invalid
        }
        Tag::BoolTrue | Tag::BoolFalse => Value::Bool(dec.bool()?),
        Tag::S32 => Value::Int(dec.s32()?),
        Tag::F64 => Value::Double(dec.f64()?),
        Tag::String => Value::String(dec.str()?.to_owned()),
        Tag::Bytes => Value::Bytes(dec.bytes()?.to_vec()),
        Tag::Date => {
            let (year, month, day) = dec.date()?;
            Value::Date { year, month, day }
        }
        Tag::StringList => {
            let mut iter = dec.string_list()?;
            let mut items = Vec::new();
            while let Some(s) = iter.next()? {
                items.push(s.to_owned());
            }
            Value::StringList(items)
        }
        Tag::List => {
            let mut iter = dec.list()?;
            let mut items = Vec::new();
            while let Some(mut item) = iter.next()? {
                items.push(decode_value_impl(&mut item, depth + 1)?);
            }
            Value::List(items)
        }
        Tag::Map => {
            let mut iter = dec.map()?;
            let mut map = ValueMap::new();
            while let Some((key, mut item)) = iter.next()? {
                map.insert(key.to_owned(), decode_value_impl(&mut item, depth + 1)?);
            }
            Value::Map(map)
        }
        tag @ (Tag::U16 | Tag::U32 | Tag::Entry) => return Err(Error::InvalidTag(tag as u8)),
    };
    Ok(value)
}
