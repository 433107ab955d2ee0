//! JSON-lines output: one object per state change on stdout.

use std::collections::BTreeMap;
use std::io::{self, Write};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use totosync_core::{ConnectionState, ConnectionStatus};

use crate::error::CliError;

/// One state change.
#[derive(Debug, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Line<'a> {
    Connection {
        status: ConnectionStatus,
        attempt: u32,
        last_error: Option<&'a str>,
    },
    System {
        value: &'a Value,
    },
    Scan {
        value: &'a Value,
    },
    Service {
        name: &'a str,
        value: Option<&'a Value>,
    },
    Latest {
        event: &'a str,
        value: Option<&'a Value>,
    },
    /// `record` is `null` when the entity was removed.
    Entity {
        key: &'a str,
        record: Option<Value>,
    },
}

impl<'a> Line<'a> {
    pub fn connection(state: &'a ConnectionState) -> Self {
        Self::Connection {
            status: state.status,
            attempt: state.attempt,
            last_error: state.last_error.as_deref(),
        }
    }
}

#[derive(Serialize)]
struct Stamped<'a> {
    at: DateTime<Utc>,
    #[serde(flatten)]
    line: &'a Line<'a>,
}

/// Writes [`Line`]s as JSON, one per line, flushing after each.
pub struct JsonLines<W: Write> {
    out: W,
}

impl JsonLines<io::Stdout> {
    pub fn stdout() -> Self {
        Self { out: io::stdout() }
    }
}

impl<W: Write> JsonLines<W> {
    #[cfg(test)]
    fn new(out: W) -> Self {
        Self { out }
    }

    pub fn emit(&mut self, line: &Line<'_>) -> Result<(), CliError> {
        let stamped = Stamped {
            at: Utc::now(),
            line,
        };
        serde_json::to_writer(&mut self.out, &stamped)?;
        self.out.write_all(b"\n")?;
        self.out.flush()?;
        Ok(())
    }
}

/// Keys whose value is a different `Arc` in `next` than in `prev`, with
/// the new value (`None` if the key disappeared). Keys come out sorted.
pub fn changed<K, V>(
    prev: &BTreeMap<K, Arc<V>>,
    next: &BTreeMap<K, Arc<V>>,
) -> Vec<(K, Option<Arc<V>>)>
where
    K: Ord + Clone,
{
    let mut out: Vec<(K, Option<Arc<V>>)> = next
        .iter()
        .filter(|(k, v)| prev.get(*k).is_none_or(|p| !Arc::ptr_eq(p, v)))
        .map(|(k, v)| (k.clone(), Some(Arc::clone(v))))
        .collect();
    out.extend(
        prev.keys()
            .filter(|k| !next.contains_key(*k))
            .map(|k| (k.clone(), None)),
    );
    out.sort_by(|a, b| a.0.cmp(&b.0));
    out
}
