//! Value envelope codec
//!
//! Feed payloads travel as `{"d": {"_type": ..., "feed_id": ..., "value": ...}}`.
//! The value is loosely typed on the wire and decoded into the closed
//! [`FeedValue`] set; numbers always become integers.

use serde_json::{json, Map, Value};
use std::fmt;
use thiserror::Error;
use tracing::debug;

pub const ENVELOPE_KEY: &str = "d";
pub const TYPE_KEY: &str = "_type";
pub const FEED_ID_KEY: &str = "feed_id";
pub const VALUE_KEY: &str = "value";

/// Errors decoding or reading a value envelope
#[derive(Debug, Error)]
pub enum EnvelopeError {
    /// Payload is not a JSON object
    #[error("Cannot parse JSON top-level object: {0}")]
    MalformedTopLevel(#[source] serde_json::Error),

    /// `d` is present but not a JSON object
    #[error("Cannot parse JSON 'd' object")]
    MalformedEnvelope,

    /// One or more required fields were absent or of an unusable shape
    #[error("Missing fields in JSON object: {}", .0.join(", "))]
    MissingFields(Vec<&'static str>),

    /// Typed accessor called on a value of another type
    #[error("Value is not of type '{expected}' (found '{found}')")]
    ValueType {
        expected: &'static str,
        found: &'static str,
    },
}

/// A decoded feed value. `null` on the wire is `None` in [`ValueEnvelope::value`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedValue {
    Int(i64),
    Bool(bool),
    Text(String),
}

impl FeedValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            FeedValue::Int(_) => "int",
            FeedValue::Bool(_) => "bool",
            FeedValue::Text(_) => "string",
        }
    }

    /// Decodes one JSON value. `null` and shapes the envelope does not carry
    /// (arrays, objects) leave the value unset.
    fn from_json(value: &Value) -> Option<FeedValue> {
        match value {
            Value::Null => None,
            Value::Bool(b) => Some(FeedValue::Bool(*b)),
            Value::String(s) => Some(FeedValue::Text(s.clone())),
            Value::Number(n) => {
                // Fractions are truncated toward zero
                let int = n
                    .as_i64()
                    .or_else(|| n.as_f64().map(|f| f as i64))
                    .unwrap_or_default();
                Some(FeedValue::Int(int))
            }
            Value::Array(_) | Value::Object(_) => {
                debug!("Skipping unsupported envelope value: {}", value);
                None
            }
        }
    }

    fn to_json(&self) -> Value {
        match self {
            FeedValue::Int(i) => json!(i),
            FeedValue::Bool(b) => json!(b),
            FeedValue::Text(s) => json!(s),
        }
    }
}

impl fmt::Display for FeedValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FeedValue::Int(i) => write!(f, "{}", i),
            FeedValue::Bool(b) => write!(f, "{}", b),
            FeedValue::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<i64> for FeedValue {
    fn from(value: i64) -> Self {
        FeedValue::Int(value)
    }
}

impl From<bool> for FeedValue {
    fn from(value: bool) -> Self {
        FeedValue::Bool(value)
    }
}

impl From<&str> for FeedValue {
    fn from(value: &str) -> Self {
        FeedValue::Text(value.to_string())
    }
}

impl From<String> for FeedValue {
    fn from(value: String) -> Self {
        FeedValue::Text(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueEnvelope {
    pub value_type: String,
    pub feed_id: String,
    pub value: Option<FeedValue>,
}

impl ValueEnvelope {
    pub fn new(
        value_type: impl Into<String>,
        feed_id: impl Into<String>,
        value: Option<FeedValue>,
    ) -> Self {
        Self {
            value_type: value_type.into(),
            feed_id: feed_id.into(),
            value,
        }
    }

    /// Envelope for the `text` service
    pub fn text(feed_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(
            super::topic::SERVICE_ID_TEXT,
            feed_id,
            Some(FeedValue::Text(text.into())),
        )
    }

    fn found(&self) -> &'static str {
        self.value.as_ref().map_or("null", FeedValue::type_name)
    }

    pub fn as_int(&self) -> Result<i64, EnvelopeError> {
        match &self.value {
            Some(FeedValue::Int(i)) => Ok(*i),
            _ => Err(EnvelopeError::ValueType {
                expected: "int",
                found: self.found(),
            }),
        }
    }

    pub fn as_bool(&self) -> Result<bool, EnvelopeError> {
        match &self.value {
            Some(FeedValue::Bool(b)) => Ok(*b),
            _ => Err(EnvelopeError::ValueType {
                expected: "bool",
                found: self.found(),
            }),
        }
    }

    pub fn as_str(&self) -> Result<&str, EnvelopeError> {
        match &self.value {
            Some(FeedValue::Text(s)) => Ok(s),
            _ => Err(EnvelopeError::ValueType {
                expected: "string",
                found: self.found(),
            }),
        }
    }

    /// Serializes into the wire envelope
    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        let value = self.value.as_ref().map_or(Value::Null, FeedValue::to_json);
        serde_json::to_vec(&json!({
            ENVELOPE_KEY: {
                TYPE_KEY: self.value_type,
                FEED_ID_KEY: self.feed_id,
                VALUE_KEY: value,
            }
        }))
    }
}

/// Decodes the `d` object of an envelope payload into its JSON fields
pub(crate) fn envelope_body(payload: &[u8]) -> Result<Map<String, Value>, EnvelopeError> {
    let mut top: Map<String, Value> =
        serde_json::from_slice(payload).map_err(EnvelopeError::MalformedTopLevel)?;

    match top.remove(ENVELOPE_KEY) {
        Some(Value::Object(body)) => Ok(body),
        Some(_) => Err(EnvelopeError::MalformedEnvelope),
        None => Err(EnvelopeError::MissingFields(vec![ENVELOPE_KEY])),
    }
}

/// Parses a value envelope. `_type`, `feed_id` and `value` must all be present;
/// a `null`, array or object value counts as present but stays unset.
pub fn parse_envelope(payload: impl AsRef<[u8]>) -> Result<ValueEnvelope, EnvelopeError> {
    let body = envelope_body(payload.as_ref())?;

    let value_type = body.get(TYPE_KEY).and_then(Value::as_str);
    let feed_id = body.get(FEED_ID_KEY).and_then(Value::as_str);
    let value = body.get(VALUE_KEY).map(FeedValue::from_json);

    match (value_type, feed_id, value) {
        (Some(value_type), Some(feed_id), Some(value)) => Ok(ValueEnvelope {
            value_type: value_type.to_string(),
            feed_id: feed_id.to_string(),
            value,
        }),
        (value_type, feed_id, value) => {
            let mut missing = Vec::new();
            if value_type.is_none() {
                missing.push(TYPE_KEY);
            }
            if feed_id.is_none() {
                missing.push(FEED_ID_KEY);
            }
            if value.is_none() {
                missing.push(VALUE_KEY);
            }
            Err(EnvelopeError::MissingFields(missing))
        }
    }
}
