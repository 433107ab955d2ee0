// ── Runtime configuration for a sync session ──
//
// These types describe *how* a session behaves. They are constructed by
// the config crate (from a profile) or directly by embedding code.
// No disk I/O happens here.

use std::collections::BTreeSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Reconnect delays, in milliseconds, indexed by attempt.
pub const DEFAULT_BACKOFF_MS: [u64; 7] = [500, 1_000, 2_000, 5_000, 8_000, 15_000, 30_000];

/// Baseline polling interval while the push channel is down.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(8);

/// Scan status polling interval while a scan runs (or the channel is down).
pub const DEFAULT_SCAN_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Configuration for a [`SyncSession`](crate::SyncSession).
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub backoff: BackoffSchedule,
    pub poll_interval: Duration,
    pub scan_poll_interval: Duration,
    pub entity: EntitySpec,
    pub ordering: BaselineOrdering,
    /// Event names kept as "latest value" slots (e.g. `mqtt_log_new`).
    pub latest_events: BTreeSet<String>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            backoff: BackoffSchedule::default(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            scan_poll_interval: DEFAULT_SCAN_POLL_INTERVAL,
            entity: EntitySpec::default(),
            ordering: BaselineOrdering::default(),
            latest_events: BTreeSet::new(),
        }
    }
}

// ── Backoff ──────────────────────────────────────────────────────────

/// Fixed reconnect delay table. The last entry repeats forever.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffSchedule {
    steps: Vec<Duration>,
}

impl BackoffSchedule {
    /// Build a schedule from millisecond delays. The table must not be empty.
    pub fn from_millis(steps: &[u64]) -> Result<Self, CoreError> {
        if steps.is_empty() {
            return Err(CoreError::Config {
                message: "backoff table must contain at least one delay".into(),
            });
        }
        Ok(Self {
            steps: steps.iter().copied().map(Duration::from_millis).collect(),
        })
    }

    /// Delay before the reconnect that follows `attempt` consecutive failures.
    pub fn delay(&self, attempt: u32) -> Duration {
        let idx = usize::try_from(attempt).unwrap_or(usize::MAX);
        self.steps
            .get(idx)
            .or_else(|| self.steps.last())
            .copied()
            .unwrap_or_default()
    }

    pub fn steps(&self) -> &[Duration] {
        &self.steps
    }
}

impl Default for BackoffSchedule {
    fn default() -> Self {
        Self {
            steps: DEFAULT_BACKOFF_MS
                .iter()
                .copied()
                .map(Duration::from_millis)
                .collect(),
        }
    }
}

// ── Entity naming ────────────────────────────────────────────────────

/// How keyed entities are named on the wire.
///
/// With the default (`device` / `ip`) the dispatcher routes
/// `device_upsert` and `device_status_changed`, and picks up the
/// `devices` array of a hello frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitySpec {
    pub event_prefix: String,
    pub key_field: String,
}

impl EntitySpec {
    pub fn new(event_prefix: impl Into<String>, key_field: impl Into<String>) -> Self {
        Self {
            event_prefix: event_prefix.into(),
            key_field: key_field.into(),
        }
    }

    pub fn upsert_event(&self) -> String {
        format!("{}_upsert", self.event_prefix)
    }

    pub fn status_event(&self) -> String {
        format!("{}_status_changed", self.event_prefix)
    }

    /// Key of the entity array inside a hello payload.
    pub fn hello_list_key(&self) -> String {
        format!("{}s", self.event_prefix)
    }
}

impl Default for EntitySpec {
    fn default() -> Self {
        Self::new("device", "ip")
    }
}

// ── Baseline ordering ────────────────────────────────────────────────

/// Tie-break between a baseline snapshot and push updates that arrived
/// while the baseline was in flight.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum BaselineOrdering {
    /// Apply updates in the order they reach the merge engine.
    #[default]
    ArrivalOrder,
    /// Skip baseline values for targets a push update changed after the
    /// baseline was requested.
    PushWins,
}
