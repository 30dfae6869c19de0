//! Devicelink Message Envelope
//!
//! This module implements the core message structure exchanged between
//! devices. Messages are JSON-formatted with a newline terminator.
//!
//! ## Message Structure
//!
//! Each message contains:
//! - `id`: UNIX epoch timestamp in milliseconds
//! - `type`: Message type in format `devicelink.<plugin>[.<action>]`
//! - `body`: dictionary of typed, handler-specific parameters
//! - `payloadSize`: (optional) size of accompanying payload data in bytes
//! - `payloadTransferInfo`: (optional) transfer negotiation parameters
//!
//! ## Field Values
//!
//! Body fields are typed: boolean, 64-bit integer, double, UTF-8 string,
//! raw byte sequence, or an ordered list of the above. The type of each
//! field survives a serialize/deserialize round-trip, and the absence of a
//! key is distinct from a false/zero value. Byte sequences are carried on
//! the wire as `{"$binary": "<base64>"}` objects so they are not confused
//! with lists of numbers.
//!
//! A message is read-only after construction. A message that declares a
//! payload descriptor stays associated with exactly that payload until the
//! transfer completes or aborts; its fields are never reused for another.

use crate::{ProtocolError, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::Utc;
use serde::de::{self, MapAccess, SeqAccess, Visitor};
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;

/// Wire key used to tag byte-sequence values inside JSON
const BINARY_KEY: &str = "$binary";

/// A typed message body value
///
/// The six wire types a body field may hold. Lists may nest arbitrarily.
///
/// # Examples
///
/// ```
/// use devicelink::Value;
///
/// let v: Value = true.into();
/// assert_eq!(v.type_name(), "bool");
///
/// let v: Value = "hello".into();
/// assert_eq!(v.type_name(), "string");
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Boolean
    Bool(bool),
    /// 64-bit signed integer
    Int(i64),
    /// Double-precision float
    Float(f64),
    /// UTF-8 string
    Str(String),
    /// Raw byte sequence
    Bytes(Vec<u8>),
    /// Ordered list of values
    List(Vec<Value>),
}

impl Value {
    /// Name of the variant tag, used in type-mismatch errors
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::List(_) => "list",
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<u16> for Value {
    fn from(v: u16) -> Self {
        Value::Int(v as i64)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::List(v)
    }
}

impl From<Vec<String>> for Value {
    fn from(v: Vec<String>) -> Self {
        Value::List(v.into_iter().map(Value::Str).collect())
    }
}

impl Serialize for Value {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Int(i) => serializer.serialize_i64(*i),
            Value::Float(f) => serializer.serialize_f64(*f),
            Value::Str(s) => serializer.serialize_str(s),
            Value::Bytes(b) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry(BINARY_KEY, &BASE64.encode(b))?;
                map.end()
            }
            Value::List(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
        }
    }
}

struct ValueVisitor;

impl<'de> Visitor<'de> for ValueVisitor {
    type Value = Value;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a bool, number, string, list, or {\"$binary\": ...} object")
    }

    fn visit_bool<E: de::Error>(self, v: bool) -> std::result::Result<Value, E> {
        Ok(Value::Bool(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> std::result::Result<Value, E> {
        Ok(Value::Int(v))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> std::result::Result<Value, E> {
        i64::try_from(v)
            .map(Value::Int)
            .map_err(|_| E::custom("integer out of i64 range"))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> std::result::Result<Value, E> {
        Ok(Value::Float(v))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<Value, E> {
        Ok(Value::Str(v.to_string()))
    }

    fn visit_string<E: de::Error>(self, v: String) -> std::result::Result<Value, E> {
        Ok(Value::Str(v))
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> std::result::Result<Value, A::Error> {
        let mut items = Vec::new();
        while let Some(item) = seq.next_element()? {
            items.push(item);
        }
        Ok(Value::List(items))
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> std::result::Result<Value, A::Error> {
        let key: Option<String> = map.next_key()?;
        match key.as_deref() {
            Some(BINARY_KEY) => {
                let encoded: String = map.next_value()?;
                let bytes = BASE64
                    .decode(encoded.as_bytes())
                    .map_err(|e| de::Error::custom(format!("invalid base64: {}", e)))?;
                if map.next_key::<String>()?.is_some() {
                    return Err(de::Error::custom("unexpected key after $binary"));
                }
                Ok(Value::Bytes(bytes))
            }
            Some(other) => Err(de::Error::custom(format!(
                "unexpected object key '{}' in field value",
                other
            ))),
            None => Err(de::Error::custom("empty object is not a field value")),
        }
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(ValueVisitor)
    }
}

/// Conversion from a stored [`Value`] into a concrete field type
///
/// Implemented for the six wire types. Used by [`Message::get`] to enforce
/// the stored variant tag.
pub trait FieldValue: Sized {
    /// Human-readable type name for mismatch errors
    const TYPE_NAME: &'static str;

    /// Extract a value of this type, `None` if the variant tag differs
    fn from_value(value: &Value) -> Option<Self>;
}

impl FieldValue for bool {
    const TYPE_NAME: &'static str = "bool";
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl FieldValue for i64 {
    const TYPE_NAME: &'static str = "int";
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }
}

impl FieldValue for f64 {
    const TYPE_NAME: &'static str = "float";
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Float(f) => Some(*f),
            // Integers widen losslessly enough for coordinate fields sent
            // by peers that round whole numbers
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }
}

impl FieldValue for String {
    const TYPE_NAME: &'static str = "string";
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Str(s) => Some(s.clone()),
            _ => None,
        }
    }
}

impl FieldValue for Vec<u8> {
    const TYPE_NAME: &'static str = "bytes";
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Bytes(b) => Some(b.clone()),
            _ => None,
        }
    }
}

impl FieldValue for Vec<Value> {
    const TYPE_NAME: &'static str = "list";
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::List(items) => Some(items.clone()),
            _ => None,
        }
    }
}

/// A devicelink message envelope
///
/// # Examples
///
/// ```
/// use devicelink::Message;
///
/// let message = Message::new("devicelink.ping")
///     .with_body_field("message", "hello");
///
/// let bytes = message.to_bytes().unwrap();
/// let parsed = Message::from_bytes(&bytes).unwrap();
/// assert_eq!(parsed.message_type, "devicelink.ping");
/// assert_eq!(parsed.get("message", String::new()).unwrap(), "hello");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    /// UNIX timestamp in milliseconds
    /// Note: some peers send this as a string
    #[serde(deserialize_with = "deserialize_id", serialize_with = "serialize_id")]
    pub id: i64,

    /// Message type in format: devicelink.<plugin>[.<action>]
    #[serde(rename = "type")]
    pub message_type: String,

    /// Typed handler-specific parameters
    #[serde(default)]
    pub body: HashMap<String, Value>,

    /// Optional payload size in bytes (-1 for indefinite streams)
    #[serde(rename = "payloadSize", skip_serializing_if = "Option::is_none")]
    pub payload_size: Option<i64>,

    /// Optional payload transfer negotiation info (opaque to this crate)
    #[serde(
        rename = "payloadTransferInfo",
        skip_serializing_if = "Option::is_none"
    )]
    pub payload_transfer_info: Option<HashMap<String, Value>>,
}

impl Message {
    /// Create a new message with the specified type and an empty body
    ///
    /// The message ID is set to the current timestamp in milliseconds.
    pub fn new(message_type: impl Into<String>) -> Self {
        Self {
            id: current_timestamp(),
            message_type: message_type.into(),
            body: HashMap::new(),
            payload_size: None,
            payload_transfer_info: None,
        }
    }

    /// Create a new message with an explicit timestamp
    ///
    /// Useful for testing or when you need specific timestamp control.
    pub fn with_id(id: i64, message_type: impl Into<String>) -> Self {
        Self {
            id,
            message_type: message_type.into(),
            body: HashMap::new(),
            payload_size: None,
            payload_transfer_info: None,
        }
    }

    /// Builder pattern: add a key-value pair to the body
    pub fn with_body_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.body.insert(key.into(), value.into());
        self
    }

    /// Builder pattern: set payload size
    pub fn with_payload_size(mut self, size: i64) -> Self {
        self.payload_size = Some(size);
        self
    }

    /// Builder pattern: set payload transfer info
    pub fn with_payload_transfer_info(mut self, info: HashMap<String, Value>) -> Self {
        self.payload_transfer_info = Some(info);
        self
    }

    /// Check if message is of a specific type
    pub fn is_type(&self, message_type: &str) -> bool {
        self.message_type == message_type
    }

    /// Check whether the body contains a key
    ///
    /// Absence is distinct from a stored `false`/`0` value.
    pub fn has(&self, key: &str) -> bool {
        self.body.contains_key(key)
    }

    /// Check whether a payload accompanies this message
    pub fn has_payload(&self) -> bool {
        self.payload_size.is_some()
    }

    /// Get a typed body field, falling back to `default` if the key is absent
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::TypeMismatch`] if the key is present but the
    /// stored variant differs from the requested type.
    ///
    /// # Examples
    ///
    /// ```
    /// use devicelink::Message;
    ///
    /// let message = Message::new("devicelink.mousepad.request")
    ///     .with_body_field("dx", 12.5)
    ///     .with_body_field("singleclick", true);
    ///
    /// assert_eq!(message.get("dx", 0.0).unwrap(), 12.5);
    /// assert_eq!(message.get("dy", 0.0).unwrap(), 0.0); // absent -> default
    /// assert!(message.get("singleclick", String::new()).is_err()); // wrong type
    /// ```
    pub fn get<T: FieldValue>(&self, key: &str, default: T) -> Result<T> {
        match self.body.get(key) {
            None => Ok(default),
            Some(value) => T::from_value(value).ok_or_else(|| ProtocolError::TypeMismatch {
                key: key.to_string(),
                expected: T::TYPE_NAME,
                found: value.type_name(),
            }),
        }
    }

    /// Serialize to bytes with newline terminator
    ///
    /// Messages are JSON-formatted and terminated with a single `\n`,
    /// so they can be delimited on a byte stream.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let json = serde_json::to_string(self)?;
        let mut bytes = json.into_bytes();
        bytes.push(b'\n');
        Ok(bytes)
    }

    /// Deserialize a message from bytes
    ///
    /// Accepts newline-terminated and non-terminated JSON; some peers send
    /// `\r\n` terminators.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidMessage`] if the data is not valid
    /// JSON or doesn't conform to the envelope structure.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let trimmed = data
            .strip_suffix(b"\r\n")
            .or_else(|| data.strip_suffix(b"\n"))
            .unwrap_or(data);

        serde_json::from_slice(trimmed).map_err(|e| {
            ProtocolError::InvalidMessage(format!("failed to deserialize message: {}", e))
        })
    }
}

/// Custom deserializer for the `id` field to handle both string and number
fn deserialize_id<'de, D>(deserializer: D) -> std::result::Result<i64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error;

    let value: serde_json::Value = Deserialize::deserialize(deserializer)?;
    match value {
        serde_json::Value::Number(n) => n
            .as_i64()
            .ok_or_else(|| Error::custom("Invalid number for id")),
        serde_json::Value::String(s) => s
            .parse::<i64>()
            .map_err(|_| Error::custom("Invalid string for id")),
        _ => Err(Error::custom("id must be a number or string")),
    }
}

/// Custom serializer for the `id` field - always serialize as a number
fn serialize_id<S>(id: &i64, serializer: S) -> std::result::Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_i64(*id)
}

/// Generate current UNIX timestamp in milliseconds
pub fn current_timestamp() -> i64 {
    Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_message() {
        let message = Message::new("devicelink.ping");
        assert_eq!(message.message_type, "devicelink.ping");
        assert!(message.body.is_empty());
        assert!(message.id > 0);
        assert!(!message.has_payload());
    }

    #[test]
    fn test_message_serialization() {
        let message = Message::new("devicelink.identity")
            .with_body_field("deviceId", "test-device")
            .with_body_field("deviceName", "Test Device")
            .with_body_field("protocolVersion", 8i64);

        let bytes = message.to_bytes().unwrap();
        let json_str = String::from_utf8_lossy(&bytes);

        assert!(json_str.ends_with('\n'));
        let json_part = json_str.trim_end();
        assert!(serde_json::from_str::<serde_json::Value>(json_part).is_ok());
    }

    #[test]
    fn test_message_deserialization() {
        let json_data = r#"{"id":1234567890,"type":"devicelink.ping","body":{}}"#;
        let message = Message::from_bytes(json_data.as_bytes()).unwrap();

        assert_eq!(message.id, 1234567890);
        assert_eq!(message.message_type, "devicelink.ping");
        assert!(message.body.is_empty());
    }

    #[test]
    fn test_message_deserialization_with_newline() {
        let json_data = r#"{"id":1234567890,"type":"devicelink.ping","body":{}}"#.to_string() + "\n";
        let message = Message::from_bytes(json_data.as_bytes()).unwrap();
        assert_eq!(message.message_type, "devicelink.ping");
    }

    #[test]
    fn test_message_deserialization_with_crlf() {
        let json_data =
            r#"{"id":1234567890,"type":"devicelink.ping","body":{}}"#.to_string() + "\r\n";
        let message = Message::from_bytes(json_data.as_bytes()).unwrap();
        assert_eq!(message.message_type, "devicelink.ping");
    }

    #[test]
    fn test_id_as_string() {
        // Some peers send id as string
        let json_data = r#"{"id":"1234567890","type":"devicelink.ping","body":{}}"#;
        let message = Message::from_bytes(json_data.as_bytes()).unwrap();
        assert_eq!(message.id, 1234567890);
    }

    #[test]
    fn test_roundtrip_preserves_types() {
        let message = Message::new("devicelink.test")
            .with_body_field("flag", true)
            .with_body_field("count", 85i64)
            .with_body_field("ratio", 0.5)
            .with_body_field("label", "battery")
            .with_body_field("blob", vec![0u8, 1, 2, 254, 255])
            .with_body_field(
                "items",
                vec![Value::Str("a".into()), Value::Int(2), Value::Bool(false)],
            );

        let bytes = message.to_bytes().unwrap();
        let parsed = Message::from_bytes(&bytes).unwrap();

        assert_eq!(message.message_type, parsed.message_type);
        assert_eq!(message.body, parsed.body);
        assert_eq!(parsed.body["flag"], Value::Bool(true));
        assert_eq!(parsed.body["count"], Value::Int(85));
        assert_eq!(parsed.body["ratio"], Value::Float(0.5));
        assert_eq!(parsed.body["label"], Value::Str("battery".into()));
        assert_eq!(parsed.body["blob"], Value::Bytes(vec![0, 1, 2, 254, 255]));
        assert_eq!(
            parsed.body["items"],
            Value::List(vec![
                Value::Str("a".into()),
                Value::Int(2),
                Value::Bool(false)
            ])
        );
    }

    #[test]
    fn test_bytes_wire_encoding() {
        let message = Message::with_id(1, "devicelink.test").with_body_field("raw", vec![1u8, 2]);
        let bytes = message.to_bytes().unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.contains("$binary"));
    }

    #[test]
    fn test_get_with_default() {
        let message = Message::new("devicelink.mousepad.request").with_body_field("dx", 3.0);

        assert_eq!(message.get("dx", 0.0).unwrap(), 3.0);
        assert_eq!(message.get("dy", 0.0).unwrap(), 0.0);
        assert_eq!(message.get("key", String::new()).unwrap(), "");
        assert!(!message.has("dy"));
        assert!(message.has("dx"));
    }

    #[test]
    fn test_get_type_mismatch() {
        let message = Message::new("devicelink.test").with_body_field("pair", true);

        let err = message.get("pair", String::new()).unwrap_err();
        match err {
            ProtocolError::TypeMismatch {
                key,
                expected,
                found,
            } => {
                assert_eq!(key, "pair");
                assert_eq!(expected, "string");
                assert_eq!(found, "bool");
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_int_widens_to_float() {
        // Peers round whole coordinates to integers
        let message = Message::new("devicelink.mousepad.request").with_body_field("dx", 4i64);
        assert_eq!(message.get("dx", 0.0).unwrap(), 4.0);
    }

    #[test]
    fn test_absence_distinct_from_false() {
        let message = Message::new("devicelink.pair").with_body_field("pair", false);
        assert!(message.has("pair"));
        assert!(!message.get("pair", true).unwrap());

        let empty = Message::new("devicelink.pair");
        assert!(!empty.has("pair"));
        assert!(empty.get("pair", true).unwrap());
    }

    #[test]
    fn test_with_payload_size() {
        let message = Message::new("devicelink.share.request").with_payload_size(1024);
        assert_eq!(message.payload_size, Some(1024));
        assert!(message.has_payload());
    }

    #[test]
    fn test_with_payload_transfer_info() {
        let mut info = HashMap::new();
        info.insert("port".to_string(), Value::Int(1739));

        let message = Message::new("devicelink.share.request").with_payload_transfer_info(info);

        let port = message
            .payload_transfer_info
            .as_ref()
            .and_then(|i| i.get("port"));
        assert_eq!(port, Some(&Value::Int(1739)));
    }

    #[test]
    fn test_is_type() {
        let message = Message::new("devicelink.ping");
        assert!(message.is_type("devicelink.ping"));
        assert!(!message.is_type("devicelink.pair"));
    }

    #[test]
    fn test_invalid_message() {
        let invalid_json = b"not json data";
        assert!(Message::from_bytes(invalid_json).is_err());
    }

    #[test]
    fn test_timestamp_generation() {
        let timestamp = current_timestamp();
        assert!(timestamp > 0);
        // milliseconds: 13 digits for current time
        assert!(timestamp.to_string().len() >= 13);
    }
}
