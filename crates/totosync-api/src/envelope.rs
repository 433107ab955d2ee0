// ── Push-channel wire format ──
//
// Every text frame on the push channel is one JSON envelope:
// `{ "type": "hello" | "event" | ..., "event"?: string, "data"?: any, "ts": string }`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Envelope `type` discriminator.
///
/// Unknown types are preserved verbatim so the dispatcher can report
/// them instead of failing deserialization.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EnvelopeKind {
    /// One-shot bulk snapshot sent right after the channel opens.
    Hello,
    /// Incremental event, routed by [`Envelope::event`].
    Event,
    /// Anything else the server might send (`"error"`, future types).
    Other(String),
}

impl From<String> for EnvelopeKind {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "hello" => Self::Hello,
            "event" => Self::Event,
            _ => Self::Other(raw),
        }
    }
}

impl From<EnvelopeKind> for String {
    fn from(kind: EnvelopeKind) -> Self {
        match kind {
            EnvelopeKind::Hello => "hello".into(),
            EnvelopeKind::Event => "event".into(),
            EnvelopeKind::Other(raw) => raw,
        }
    }
}

/// One inbound push-channel message. Immutable once parsed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: EnvelopeKind,

    /// Event name for `type == "event"`, e.g. `"system_status"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,

    /// Event payload. `null` and absent are both `None`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,

    /// RFC 3339 timestamp stamped by the server.
    #[serde(default)]
    pub ts: String,
}

impl Envelope {
    /// Parse a raw text frame.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn hello(data: Value, ts: impl Into<String>) -> Self {
        Self {
            kind: EnvelopeKind::Hello,
            event: None,
            data: Some(data),
            ts: ts.into(),
        }
    }

    pub fn event(name: impl Into<String>, data: Value, ts: impl Into<String>) -> Self {
        Self {
            kind: EnvelopeKind::Event,
            event: Some(name.into()),
            data: Some(data),
            ts: ts.into(),
        }
    }

    /// Serialize back into a text frame.
    pub fn to_frame(&self) -> String {
        // Envelope contains only strings and `Value`s, which always serialize.
        serde_json::to_string(self).unwrap_or_default()
    }
}
