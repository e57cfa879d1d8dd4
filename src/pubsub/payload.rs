use std::{fmt, str::FromStr};

use bytes::Bytes;
use redmux_error::{MuxError, MuxResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// How a subscriber wants message payloads handed to it.
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum DecodeMode {
    /// UTF-8 (lossy) text, parsed as JSON when possible.
    #[default]
    Text,
    /// The exact payload bytes.
    Binary,
}

impl DecodeMode {
    pub const ALL: [DecodeMode; 2] = [DecodeMode::Text, DecodeMode::Binary];

    pub fn as_str(&self) -> &'static str {
        match self {
            DecodeMode::Text => "text",
            DecodeMode::Binary => "binary",
        }
    }
}

impl fmt::Display for DecodeMode {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DecodeMode {
    type Err = MuxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" | "utf8" => Ok(DecodeMode::Text),
            "binary" | "buffer" => Ok(DecodeMode::Binary),
            other => Err(MuxError::invalid(format!("unknown decode mode '{other}'"))),
        }
    }
}

/// A decoded inbound payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Text that parsed as JSON.
    Json(Value),
    /// Text that did not parse as JSON.
    Text(String),
    /// Raw bytes, binary mode only.
    Binary(Bytes),
}

impl Payload {
    /// Decodes raw wire bytes for the given mode. Never fails: text that is
    /// not JSON stays text, invalid UTF-8 is replaced.
    pub fn decode(
        mode: DecodeMode,
        raw: &Bytes,
    ) -> Payload {
        match mode {
            DecodeMode::Binary => Payload::Binary(raw.clone()),
            DecodeMode::Text => {
                let text = String::from_utf8_lossy(raw);
                match serde_json::from_str::<Value>(&text) {
                    Ok(value) => Payload::Json(value),
                    Err(_) => Payload::Text(text.into_owned()),
                }
            }
        }
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Payload::Json(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Payload::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Payload::Binary(b) => Some(b),
            _ => None,
        }
    }

    /// Best-effort structured view: JSON as is, text as a JSON string, bytes
    /// as lossy text.
    pub fn to_value(&self) -> Value {
        match self {
            Payload::Json(v) => v.clone(),
            Payload::Text(s) => Value::String(s.clone()),
            Payload::Binary(b) => Value::String(String::from_utf8_lossy(b).into_owned()),
        }
    }
}

/// An outbound payload before wire encoding.
#[derive(Debug, Clone, PartialEq)]
pub enum PublishPayload {
    /// Serialized to JSON text. A bare JSON string is sent unquoted.
    Json(Value),
    Text(String),
    Bytes(Bytes),
}

impl PublishPayload {
    /// Builds a JSON payload from any serializable value.
    pub fn json<T: Serialize>(value: &T) -> MuxResult<Self> {
        Ok(PublishPayload::Json(serde_json::to_value(value)?))
    }

    /// Wire form of the payload.
    pub fn encode(&self) -> MuxResult<Bytes> {
        match self {
            PublishPayload::Json(Value::String(s)) => Ok(Bytes::copy_from_slice(s.as_bytes())),
            PublishPayload::Json(value) => Ok(Bytes::from(serde_json::to_vec(value)?)),
            PublishPayload::Text(s) => Ok(Bytes::copy_from_slice(s.as_bytes())),
            PublishPayload::Bytes(b) => Ok(b.clone()),
        }
    }
}

impl From<Value> for PublishPayload {
    fn from(value: Value) -> Self {
        PublishPayload::Json(value)
    }
}

impl From<&str> for PublishPayload {
    fn from(s: &str) -> Self {
        PublishPayload::Text(s.to_string())
    }
}

impl From<String> for PublishPayload {
    fn from(s: String) -> Self {
        PublishPayload::Text(s)
    }
}

impl From<Bytes> for PublishPayload {
    fn from(b: Bytes) -> Self {
        PublishPayload::Bytes(b)
    }
}

impl From<Vec<u8>> for PublishPayload {
    fn from(v: Vec<u8>) -> Self {
        PublishPayload::Bytes(Bytes::from(v))
    }
}

impl From<&[u8]> for PublishPayload {
    fn from(v: &[u8]) -> Self {
        PublishPayload::Bytes(Bytes::copy_from_slice(v))
    }
}
