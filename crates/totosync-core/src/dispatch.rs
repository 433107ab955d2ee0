// ── Message dispatcher ──
//
// Turns raw push frames into merge-engine updates. Classification is a
// typed table: each `EventKind` maps to a pure reducer from envelope to
// updates. Nothing here ever fails outward; every frame ends in a
// `FrameOutcome` that is logged and returned for tests.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

use totosync_api::{Envelope, EnvelopeKind};

use crate::config::EntitySpec;
use crate::connection::FrameSink;
use crate::merge::{MergeEngine, MissingEntities, Update, UpdateSource, keyed_patches};
use crate::model::{EntityKey, SlotId};

/// Why a frame was dropped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    /// Not JSON, or not an envelope.
    #[error("malformed frame: {0}")]
    Malformed(String),

    #[error("unknown event '{0}'")]
    UnknownEvent(String),

    #[error("unknown message type '{0}'")]
    UnknownType(String),

    /// A recognised event whose payload could not be handled.
    #[error("handler for '{event}' failed: {reason}")]
    Handler { event: String, reason: String },
}

/// Result of handling one frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameOutcome {
    /// At least one slot or entity changed.
    Applied,
    /// Routed, but the store already held these values.
    Unchanged,
    Dropped(DispatchError),
}

/// Classified event names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    /// `system_status`
    SystemStatus,
    /// `scan_started` / `scan_progress` / `scan_done`
    ScanStatus,
    /// `<name>_status_changed`
    ServiceStatusChanged(String),
    /// Configured latest-value event.
    Latest(String),
    /// `<prefix>_upsert`
    EntityUpsert,
    /// `<prefix>_status_changed`
    EntityStatusChanged,
}

type Reducer = fn(&DispatchTable, &EventKind, &Envelope) -> Result<Vec<Update>, DispatchError>;

impl EventKind {
    fn reducer(&self) -> Reducer {
        match self {
            Self::SystemStatus
            | Self::ScanStatus
            | Self::ServiceStatusChanged(_)
            | Self::Latest(_) => reduce_replace,
            Self::EntityUpsert => reduce_upsert,
            Self::EntityStatusChanged => reduce_status_changed,
        }
    }

    /// Target slot for replace-whole events.
    fn slot(&self) -> Option<SlotId> {
        match self {
            Self::SystemStatus => Some(SlotId::System),
            Self::ScanStatus => Some(SlotId::Scan),
            Self::ServiceStatusChanged(name) => Some(SlotId::Service(name.clone())),
            Self::Latest(event) => Some(SlotId::Latest(event.clone())),
            Self::EntityUpsert | Self::EntityStatusChanged => None,
        }
    }
}

// ── DispatchTable ────────────────────────────────────────────────────

/// Pure classification and reduction of envelopes.
#[derive(Debug, Clone)]
pub struct DispatchTable {
    entity: EntitySpec,
    upsert_event: String,
    status_event: String,
    hello_list_key: String,
    latest_events: BTreeSet<String>,
}

impl DispatchTable {
    pub fn new(entity: EntitySpec, latest_events: BTreeSet<String>) -> Self {
        Self {
            upsert_event: entity.upsert_event(),
            status_event: entity.status_event(),
            hello_list_key: entity.hello_list_key(),
            entity,
            latest_events,
        }
    }

    pub fn entity(&self) -> &EntitySpec {
        &self.entity
    }

    /// Classify an event name. Entity events are matched before the
    /// generic `*_status_changed` family.
    pub fn classify(&self, event: &str) -> Option<EventKind> {
        if event == self.upsert_event {
            return Some(EventKind::EntityUpsert);
        }
        if event == self.status_event {
            return Some(EventKind::EntityStatusChanged);
        }
        if self.latest_events.contains(event) {
            return Some(EventKind::Latest(event.to_owned()));
        }
        match event {
            "system_status" => Some(EventKind::SystemStatus),
            "scan_started" | "scan_progress" | "scan_done" => Some(EventKind::ScanStatus),
            _ => event
                .strip_suffix("_status_changed")
                .filter(|name| !name.is_empty())
                .map(|name| EventKind::ServiceStatusChanged(name.to_owned())),
        }
    }

    /// Reduce one envelope to the updates it implies.
    pub fn reduce(&self, envelope: &Envelope) -> Result<Vec<Update>, DispatchError> {
        match &envelope.kind {
            EnvelopeKind::Hello => Ok(self.reduce_hello(envelope)),
            EnvelopeKind::Event => {
                let Some(name) = envelope.event.as_deref() else {
                    return Err(DispatchError::Malformed(
                        "event envelope without event name".into(),
                    ));
                };
                let kind = self
                    .classify(name)
                    .ok_or_else(|| DispatchError::UnknownEvent(name.to_owned()))?;
                (kind.reducer())(self, &kind, envelope)
            }
            EnvelopeKind::Other(kind) => Err(DispatchError::UnknownType(kind.clone())),
        }
    }

    /// Route the pieces of a hello snapshot to their slots and entities.
    fn reduce_hello(&self, envelope: &Envelope) -> Vec<Update> {
        let data = envelope.data.clone().unwrap_or(Value::Null);
        let mut updates = Vec::new();

        if let Value::Object(fields) = &data {
            for (field, value) in fields {
                if value.is_null() {
                    continue;
                }
                if *field == self.hello_list_key {
                    if let Some(update) = self.hello_entities(value) {
                        updates.push(update);
                    }
                    continue;
                }
                let slot = match field.strip_suffix("_status") {
                    Some("system") => SlotId::System,
                    Some("scan") => SlotId::Scan,
                    Some(name) if !name.is_empty() => SlotId::Service(name.to_owned()),
                    _ => continue,
                };
                updates.push(Update::ReplaceSlot {
                    slot,
                    value: value.clone(),
                });
            }
        }

        updates.push(Update::ReplaceSlot {
            slot: SlotId::Hello,
            value: data,
        });
        updates
    }

    fn hello_entities(&self, list: &Value) -> Option<Update> {
        let Value::Array(items) = list else {
            debug!(field = %self.hello_list_key, "hello entity list is not an array");
            return None;
        };
        Some(Update::MergeEntities {
            records: keyed_patches(items, &self.entity.key_field),
            missing: MissingEntities::Retain,
        })
    }

    fn entity_payload<'a>(
        &self,
        envelope: &'a Envelope,
    ) -> Result<(EntityKey, &'a Map<String, Value>), DispatchError> {
        let event = envelope.event.clone().unwrap_or_default();
        let Some(Value::Object(fields)) = &envelope.data else {
            return Err(DispatchError::Handler {
                event,
                reason: "payload is not an object".into(),
            });
        };
        let key = fields
            .get(&self.entity.key_field)
            .and_then(EntityKey::from_value)
            .ok_or_else(|| DispatchError::Handler {
                event,
                reason: format!("missing key field '{}'", self.entity.key_field),
            })?;
        Ok((key, fields))
    }
}

// ── Reducers ─────────────────────────────────────────────────────────

fn reduce_replace(
    _table: &DispatchTable,
    kind: &EventKind,
    envelope: &Envelope,
) -> Result<Vec<Update>, DispatchError> {
    let slot = kind.slot().ok_or_else(|| DispatchError::Handler {
        event: envelope.event.clone().unwrap_or_default(),
        reason: "event has no slot".into(),
    })?;
    Ok(vec![Update::ReplaceSlot {
        slot,
        value: envelope.data.clone().unwrap_or(Value::Null),
    }])
}

fn reduce_upsert(
    table: &DispatchTable,
    _kind: &EventKind,
    envelope: &Envelope,
) -> Result<Vec<Update>, DispatchError> {
    let (key, fields) = table.entity_payload(envelope)?;
    Ok(vec![Update::MergeEntity {
        key,
        patch: fields.clone(),
    }])
}

/// Writes only the key, `status` and `last_seen` (from the payload's
/// `ts`, falling back to the envelope's).
fn reduce_status_changed(
    table: &DispatchTable,
    _kind: &EventKind,
    envelope: &Envelope,
) -> Result<Vec<Update>, DispatchError> {
    let (key, fields) = table.entity_payload(envelope)?;
    let status = fields
        .get("status")
        .cloned()
        .ok_or_else(|| DispatchError::Handler {
            event: envelope.event.clone().unwrap_or_default(),
            reason: "missing 'status'".into(),
        })?;
    let last_seen = fields
        .get("ts")
        .cloned()
        .unwrap_or_else(|| Value::String(envelope.ts.clone()));

    let mut patch = Map::new();
    patch.insert(
        table.entity.key_field.clone(),
        Value::String(key.as_str().to_owned()),
    );
    patch.insert("status".into(), status);
    patch.insert("last_seen".into(), last_seen);

    Ok(vec![Update::MergeEntity { key, patch }])
}

// ── Dispatcher ───────────────────────────────────────────────────────

/// Parses, classifies and applies push frames, one at a time.
pub struct Dispatcher {
    table: DispatchTable,
    engine: Arc<MergeEngine>,
}

impl Dispatcher {
    pub fn new(table: DispatchTable, engine: Arc<MergeEngine>) -> Self {
        Self { table, engine }
    }

    pub fn table(&self) -> &DispatchTable {
        &self.table
    }

    /// Handle one raw text frame. Never panics on bad input and never
    /// touches the store for a dropped frame.
    pub fn handle_frame(&self, text: &str) -> FrameOutcome {
        let envelope = match Envelope::parse(text) {
            Ok(envelope) => envelope,
            Err(e) => return FrameOutcome::Dropped(DispatchError::Malformed(e.to_string())),
        };

        let updates = match self.table.reduce(&envelope) {
            Ok(updates) => updates,
            Err(e) => return FrameOutcome::Dropped(e),
        };

        self.engine.store().mark_push_event();
        if self.engine.apply_all(updates, UpdateSource::Push) {
            FrameOutcome::Applied
        } else {
            FrameOutcome::Unchanged
        }
    }
}

impl FrameSink for Dispatcher {
    fn on_frame(&self, text: &str) {
        match self.handle_frame(text) {
            FrameOutcome::Applied => debug!("frame applied"),
            FrameOutcome::Unchanged => debug!("frame changed nothing"),
            FrameOutcome::Dropped(reason) => debug!(%reason, "frame dropped"),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::config::BaselineOrdering;
    use crate::store::DataStore;

    fn table() -> DispatchTable {
        DispatchTable::new(
            EntitySpec::default(),
            BTreeSet::from(["mqtt_log_new".to_owned()]),
        )
    }

    fn dispatcher() -> Dispatcher {
        let engine = MergeEngine::new(Arc::new(DataStore::new()), BaselineOrdering::ArrivalOrder);
        Dispatcher::new(table(), Arc::new(engine))
    }

    fn event(name: &str, data: Value) -> String {
        Envelope::event(name, data, "2026-01-01T00:00:00Z").to_frame()
    }

    #[test]
    fn classification_table() {
        let t = table();
        assert_eq!(t.classify("system_status"), Some(EventKind::SystemStatus));
        assert_eq!(t.classify("scan_done"), Some(EventKind::ScanStatus));
        assert_eq!(t.classify("device_upsert"), Some(EventKind::EntityUpsert));
        assert_eq!(
            t.classify("device_status_changed"),
            Some(EventKind::EntityStatusChanged)
        );
        assert_eq!(
            t.classify("frp_status_changed"),
            Some(EventKind::ServiceStatusChanged("frp".into()))
        );
        assert_eq!(
            t.classify("mqtt_log_new"),
            Some(EventKind::Latest("mqtt_log_new".into()))
        );
        assert_eq!(t.classify("_status_changed"), None);
        assert_eq!(t.classify("firmware_available"), None);
    }

    #[test]
    fn custom_entity_prefix() {
        let t = DispatchTable::new(EntitySpec::new("node", "id"), BTreeSet::new());
        assert_eq!(t.classify("node_upsert"), Some(EventKind::EntityUpsert));
        assert_eq!(
            t.classify("device_status_changed"),
            Some(EventKind::ServiceStatusChanged("device".into()))
        );
    }

    #[test]
    fn non_json_frame_is_dropped_without_touching_store() {
        let d = dispatcher();
        let store = d.engine.store().clone();
        let entities = store.entities_snapshot();
        let revision = store.revision();

        for junk in ["", "not json", "{\"type\":", "[1,2,3]", "{\"event\":\"x\"}"] {
            let outcome = d.handle_frame(junk);
            assert!(
                matches!(outcome, FrameOutcome::Dropped(DispatchError::Malformed(_))),
                "{junk:?} -> {outcome:?}"
            );
        }

        assert!(Arc::ptr_eq(&entities, &store.entities_snapshot()));
        assert_eq!(store.revision(), revision);
        assert!(store.last_push_event().is_none());
    }

    #[test]
    fn unknown_event_and_type_are_dropped() {
        let d = dispatcher();
        assert_eq!(
            d.handle_frame(&event("firmware_available", json!({}))),
            FrameOutcome::Dropped(DispatchError::UnknownEvent("firmware_available".into()))
        );
        assert_eq!(
            d.handle_frame(r#"{"type":"error","ts":"t"}"#),
            FrameOutcome::Dropped(DispatchError::UnknownType("error".into()))
        );
    }

    #[test]
    fn handler_error_does_not_block_next_frame() {
        let d = dispatcher();
        let bad = d.handle_frame(&event("device_upsert", json!({"mac": "AA"})));
        assert!(matches!(bad, FrameOutcome::Dropped(DispatchError::Handler { .. })));

        let good = d.handle_frame(&event("device_upsert", json!({"ip": "10.0.0.2", "mac": "BB"})));
        assert_eq!(good, FrameOutcome::Applied);
        assert_eq!(
            d.engine.store().entity("10.0.0.2").unwrap().get_str("mac"),
            Some("BB")
        );
    }

    #[test]
    fn upsert_then_status_change() {
        let d = dispatcher();
        d.handle_frame(&event(
            "device_upsert",
            json!({"ip": "192.168.1.10", "mac": "AA", "status": "online"}),
        ));
        d.handle_frame(&event(
            "device_status_changed",
            json!({"ip": "192.168.1.10", "status": "offline", "ts": "T2"}),
        ));

        let rec = d.engine.store().entity("192.168.1.10").unwrap();
        assert_eq!(
            rec.to_value(),
            json!({"ip": "192.168.1.10", "mac": "AA", "status": "offline", "last_seen": "T2"})
        );
    }

    #[test]
    fn status_change_without_payload_ts_uses_envelope_ts() {
        let d = dispatcher();
        d.handle_frame(&event(
            "device_status_changed",
            json!({"ip": "10.0.0.3", "status": "online"}),
        ));
        let rec = d.engine.store().entity("10.0.0.3").unwrap();
        assert_eq!(rec.get_str("last_seen"), Some("2026-01-01T00:00:00Z"));
    }

    #[test]
    fn null_data_stores_null() {
        let d = dispatcher();
        d.handle_frame(&event("scan_progress", json!({"progress": 5})));
        let outcome = d.handle_frame(r#"{"type":"event","event":"scan_done","ts":"t"}"#);
        assert_eq!(outcome, FrameOutcome::Applied);
        assert_eq!(d.engine.store().scan().unwrap().value, Value::Null);
    }

    #[test]
    fn repeated_frame_is_unchanged() {
        let d = dispatcher();
        let frame = event("system_status", json!({"cpu_usage": 3}));
        assert_eq!(d.handle_frame(&frame), FrameOutcome::Applied);
        assert_eq!(d.handle_frame(&frame), FrameOutcome::Unchanged);
    }

    #[test]
    fn hello_routes_every_known_piece() {
        let d = dispatcher();
        let data = json!({
            "device_id": "dev-1",
            "system_status": {"cpu_usage": 1},
            "scan_status": {"status": "idle"},
            "frp_status": {"running": true},
            "nps_status": null,
            "devices": [
                {"ip": "10.0.0.1", "status": "online"},
                {"mac": "no-key"}
            ]
        });
        let frame = Envelope::hello(data.clone(), "t").to_frame();
        assert_eq!(d.handle_frame(&frame), FrameOutcome::Applied);

        let store = d.engine.store();
        assert_eq!(store.hello().unwrap().value, data);
        assert_eq!(store.system().unwrap().value, json!({"cpu_usage": 1}));
        assert_eq!(store.scan().unwrap().value, json!({"status": "idle"}));
        assert_eq!(store.service("frp").unwrap().value, json!({"running": true}));
        assert!(store.service("nps").is_none());
        assert_eq!(store.entity_count(), 1);
        assert_eq!(store.entity("10.0.0.1").unwrap().get_str("status"), Some("online"));
    }

    #[test]
    fn latest_event_slot() {
        let d = dispatcher();
        d.handle_frame(&event("mqtt_log_new", json!({"topic": "a"})));
        d.handle_frame(&event("mqtt_log_new", json!({"topic": "b"})));
        assert_eq!(
            d.engine.store().latest("mqtt_log_new").unwrap().value,
            json!({"topic": "b"})
        );
    }
}
