//! Tagged-value codec.
//!
//! Inbound values are JSON strings whose first character says what they
//! are:
//!
//! | Tag | Meaning        | Example     |
//! |-----|----------------|-------------|
//! | `@` | object         | `"@mr1001"` |
//! | `€` | remote error   | `"€boom"`   |
//! | `$` | string         | `"$hello"`  |
//! | `#` | number         | `"#3"`      |
//!
//! Arrays nest. Outbound values are *not* tagged, except objects in
//! [`SerializeMethod::IncludeSignature`] mode: the peer re-tags what it
//! sends back, so encode and decode are deliberately not inverses.

use thiserror::Error;

use crate::objects::{ObjectError, ObjectRef, ObjectRegistry, SerializeMethod};

const OBJECT_TAG: char = '@';
const ERROR_TAG: char = '€';
const STRING_TAG: char = '$';
const NUMBER_TAG: char = '#';

/// A value moving between the peer and scripts.
#[derive(Debug, Clone)]
pub enum Value {
    /// Absent value (JSON `null`).
    Nil,
    /// Boolean. Only produced by scripts; the peer never sends one.
    Bool(bool),
    /// Integer number.
    Int(i64),
    /// Floating-point number.
    Float(f64),
    /// Plain string.
    String(String),
    /// Reference to a domain object.
    Object(ObjectRef),
    /// Ordered sequence.
    Array(Vec<Value>),
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Nil, Self::Nil) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a.to_bits() == b.to_bits(),
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Object(a), Self::Object(b)) => {
                a.signature() == b.signature() && a.serial() == b.serial()
            }
            (Self::Array(a), Self::Array(b)) => a == b,
            _ => false,
        }
    }
}

impl Value {
    /// Object reference, if this is an object.
    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Self::Object(obj) => Some(obj),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<ObjectRef> for Value {
    fn from(obj: ObjectRef) -> Self {
        Self::Object(obj)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Self::Array(items)
    }
}

/// Failure to decode an inbound value.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The peer sent an error marker (`€`) instead of a value.
    #[error("{0}")]
    Remote(String),
    /// A string without one of the four known tags.
    #[error("Cannot deserialize \"{value}\". Unsupported string sub-type \"{tag}\".")]
    UnsupportedSubtype {
        /// Offending string.
        value: String,
        /// Its first character (empty for an empty string).
        tag: String,
    },
    /// A JSON value that is neither a tagged string nor an array.
    #[error("Cannot deserialize \"{value}\". Unsupported type \"{kind}\".")]
    UnsupportedType {
        /// Offending value, JSON-encoded.
        value: String,
        /// JSON type name.
        kind: &'static str,
    },
    /// `#` with no parseable number after it.
    #[error("Cannot deserialize \"{0}\". Not a number.")]
    InvalidNumber(String),
    /// `@` payload the registry could not rebuild.
    #[error(transparent)]
    Object(#[from] ObjectError),
}

/// Decode one wire value.
///
/// # Errors
///
/// Fails on untagged strings, bare JSON numbers/booleans/objects, unknown
/// object signatures, and on the remote error tag (carrying its message).
pub fn decode(raw: &serde_json::Value, registry: &ObjectRegistry) -> Result<Value, DecodeError> {
    match raw {
        serde_json::Value::Null => Ok(Value::Nil),
        serde_json::Value::String(s) => decode_string(s, registry),
        serde_json::Value::Array(items) => items
            .iter()
            .map(|item| decode(item, registry))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        serde_json::Value::Bool(_) => Err(unsupported_type(raw, "boolean")),
        serde_json::Value::Number(_) => Err(unsupported_type(raw, "number")),
        serde_json::Value::Object(_) => Err(unsupported_type(raw, "object")),
    }
}

/// Decode every element of an argument list, preserving order.
pub fn decode_all(
    raw: &[serde_json::Value],
    registry: &ObjectRegistry,
) -> Result<Vec<Value>, DecodeError> {
    raw.iter().map(|item| decode(item, registry)).collect()
}

fn unsupported_type(raw: &serde_json::Value, kind: &'static str) -> DecodeError {
    DecodeError::UnsupportedType {
        value: raw.to_string(),
        kind,
    }
}

fn decode_string(s: &str, registry: &ObjectRegistry) -> Result<Value, DecodeError> {
    let mut chars = s.chars();
    let tag = chars.next();
    let rest = chars.as_str();
    match tag {
        Some(OBJECT_TAG) => Ok(Value::Object(registry.deserialize(rest)?)),
        Some(ERROR_TAG) => Err(DecodeError::Remote(rest.to_string())),
        Some(STRING_TAG) => Ok(Value::String(rest.to_string())),
        Some(NUMBER_TAG) => decode_number(rest),
        other => Err(DecodeError::UnsupportedSubtype {
            value: s.to_string(),
            tag: other.map(String::from).unwrap_or_default(),
        }),
    }
}

/// Numbers follow the peer's convention: a comma anywhere marks a float.
///
/// Both branches parse the longest numeric prefix and ignore the rest, so
/// `#3,14` decodes to the float `3.0` and `#3.5` to the integer `3`. This
/// mirrors what the peer's own scripting host does with the same text.
fn decode_number(text: &str) -> Result<Value, DecodeError> {
    let parsed = if text.contains(',') {
        parse_float_prefix(text).map(Value::Float)
    } else {
        parse_int_prefix(text).map(Value::Int)
    };
    parsed.ok_or_else(|| DecodeError::InvalidNumber(format!("{NUMBER_TAG}{text}")))
}

fn sign_len(s: &str) -> usize {
    usize::from(s.starts_with(['+', '-']))
}

fn digits_len(s: &str) -> usize {
    s.bytes().take_while(u8::is_ascii_digit).count()
}

fn parse_int_prefix(text: &str) -> Option<i64> {
    let s = text.trim_start();
    let sign = sign_len(s);
    let digits = digits_len(&s[sign..]);
    if digits == 0 {
        return None;
    }
    s[..sign + digits].parse().ok()
}

fn parse_float_prefix(text: &str) -> Option<f64> {
    let s = text.trim_start();
    let mut end = sign_len(s);
    let int_digits = digits_len(&s[end..]);
    end += int_digits;

    let mut frac_digits = 0;
    if s[end..].starts_with('.') {
        frac_digits = digits_len(&s[end + 1..]);
        if int_digits > 0 || frac_digits > 0 {
            end += 1 + frac_digits;
        }
    }
    if int_digits == 0 && frac_digits == 0 {
        return None;
    }

    if s[end..].starts_with(['e', 'E']) {
        let exp = &s[end + 1..];
        let exp_sign = sign_len(exp);
        let exp_digits = digits_len(&exp[exp_sign..]);
        if exp_digits > 0 {
            end += 1 + exp_sign + exp_digits;
        }
    }
    s[..end].parse().ok()
}

/// Encode a value for the wire.
///
/// Only objects are tagged, and only in
/// [`SerializeMethod::IncludeSignature`] mode. Non-finite floats become
/// `null`.
pub fn encode(value: &Value, method: SerializeMethod) -> serde_json::Value {
    match value {
        Value::Nil => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Int(i) => serde_json::Value::from(*i),
        Value::Float(f) => serde_json::Number::from_f64(*f)
            .map_or(serde_json::Value::Null, serde_json::Value::Number),
        Value::String(s) => serde_json::Value::String(s.clone()),
        Value::Object(obj) => serde_json::Value::String(encode_object(obj, method)),
        Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(|item| encode(item, method)).collect())
        }
    }
}

/// Encode a list of values as a JSON array.
pub fn encode_all(values: &[Value], method: SerializeMethod) -> serde_json::Value {
    serde_json::Value::Array(values.iter().map(|v| encode(v, method)).collect())
}

/// Object wire form: `@` + signature + serial, or the bare serial.
pub fn encode_object(obj: &ObjectRef, method: SerializeMethod) -> String {
    match method {
        SerializeMethod::IncludeSignature => {
            format!("{OBJECT_TAG}{}", obj.serialize(method))
        }
        SerializeMethod::WithoutSignature => obj.serialize(method),
    }
}
