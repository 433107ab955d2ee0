use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

/// Address of a whole-replace slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(tag = "slot", content = "name", rename_all = "snake_case")]
pub enum SlotId {
    /// `system_status`
    System,
    /// `scan_started` / `scan_progress` / `scan_done`
    Scan,
    /// Raw payload of the last hello frame.
    Hello,
    /// `<name>_status_changed`
    Service(String),
    /// Configured latest-value events, keyed by event name.
    Latest(String),
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::System => f.write_str("system"),
            Self::Scan => f.write_str("scan"),
            Self::Hello => f.write_str("hello"),
            Self::Service(name) => write!(f, "service:{name}"),
            Self::Latest(name) => write!(f, "latest:{name}"),
        }
    }
}

/// Current content of a whole-replace slot.
///
/// Always exactly the payload of the most recent update routed to the
/// slot; a `null` payload is stored as `Value::Null`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SlotValue {
    pub value: Value,
    /// Store revision of the update that produced this value.
    pub revision: u64,
    pub updated_at: DateTime<Utc>,
}

impl SlotValue {
    /// `value["status"]` as a string, if present.
    pub fn status(&self) -> Option<&str> {
        self.value.get("status").and_then(Value::as_str)
    }
}
