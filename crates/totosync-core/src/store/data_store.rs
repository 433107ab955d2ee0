// ── Central reactive data store ──
//
// Holds every slot and the entity map for one session. Reads are
// wait-free snapshot clones; writes go through the merge engine.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use tokio::sync::watch;

use super::entity_map::{EntityChange, EntityMap, EntitySnapshot};
use super::slot::{SlotFamily, SlotFamilySnapshot, WholeReplaceSlot};
use crate::model::{EntityKey, EntityRecord, SlotId, SlotValue};
use crate::stream::{EntityStream, SlotFamilyStream, SlotStream, Subscription};

/// Local view of the backend's state.
pub struct DataStore {
    system: WholeReplaceSlot,
    scan: WholeReplaceSlot,
    hello: WholeReplaceSlot,
    services: SlotFamily,
    latest: SlotFamily,
    entities: EntityMap,
    /// Store-wide monotonic revision, stamped on every applied update.
    revision: AtomicU64,
    last_push_event: watch::Sender<Option<DateTime<Utc>>>,
    last_baseline: watch::Sender<Option<DateTime<Utc>>>,
    /// Set by [`close`](DataStore::close); every later write is dropped.
    closed: AtomicBool,
}

impl DataStore {
    pub fn new() -> Self {
        let (last_push_event, _) = watch::channel(None);
        let (last_baseline, _) = watch::channel(None);

        Self {
            system: WholeReplaceSlot::new(),
            scan: WholeReplaceSlot::new(),
            hello: WholeReplaceSlot::new(),
            services: SlotFamily::new(),
            latest: SlotFamily::new(),
            entities: EntityMap::new(),
            revision: AtomicU64::new(0),
            last_push_event,
            last_baseline,
            closed: AtomicBool::new(false),
        }
    }

    // ── Slot accessors ───────────────────────────────────────────────

    pub fn system(&self) -> Option<Arc<SlotValue>> {
        self.system.get()
    }

    pub fn scan(&self) -> Option<Arc<SlotValue>> {
        self.scan.get()
    }

    pub fn hello(&self) -> Option<Arc<SlotValue>> {
        self.hello.get()
    }

    pub fn service(&self, name: &str) -> Option<Arc<SlotValue>> {
        self.services.get(name)
    }

    pub fn latest(&self, event: &str) -> Option<Arc<SlotValue>> {
        self.latest.get(event)
    }

    pub fn services_snapshot(&self) -> SlotFamilySnapshot {
        self.services.snapshot()
    }

    pub fn latest_snapshot(&self) -> SlotFamilySnapshot {
        self.latest.snapshot()
    }

    /// Look up any slot by id.
    pub fn slot(&self, id: &SlotId) -> Option<Arc<SlotValue>> {
        match id {
            SlotId::System => self.system(),
            SlotId::Scan => self.scan(),
            SlotId::Hello => self.hello(),
            SlotId::Service(name) => self.service(name),
            SlotId::Latest(name) => self.latest(name),
        }
    }

    // ── Entity accessors ─────────────────────────────────────────────

    pub fn entities_snapshot(&self) -> EntitySnapshot {
        self.entities.snapshot()
    }

    pub fn entity(&self, key: &str) -> Option<Arc<EntityRecord>> {
        self.entities.get(key)
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    /// Number of published entity-map changes.
    pub fn entities_version(&self) -> u64 {
        self.entities.version()
    }

    // ── Subscriptions ────────────────────────────────────────────────

    pub fn subscribe_system(&self) -> SlotStream {
        Subscription::new(self.system.subscribe())
    }

    pub fn subscribe_scan(&self) -> SlotStream {
        Subscription::new(self.scan.subscribe())
    }

    pub fn subscribe_hello(&self) -> SlotStream {
        Subscription::new(self.hello.subscribe())
    }

    pub fn subscribe_services(&self) -> SlotFamilyStream {
        Subscription::new(self.services.subscribe())
    }

    pub fn subscribe_latest(&self) -> SlotFamilyStream {
        Subscription::new(self.latest.subscribe())
    }

    pub fn subscribe_entities(&self) -> EntityStream {
        Subscription::new(self.entities.subscribe())
    }

    pub(crate) fn scan_receiver(&self) -> watch::Receiver<Option<Arc<SlotValue>>> {
        self.scan.subscribe()
    }

    // ── Revisions and timestamps ─────────────────────────────────────

    /// Revision of the most recently stamped update.
    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::SeqCst)
    }

    fn next_revision(&self) -> u64 {
        self.revision.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn last_push_event(&self) -> Option<DateTime<Utc>> {
        *self.last_push_event.borrow()
    }

    pub fn last_baseline(&self) -> Option<DateTime<Utc>> {
        *self.last_baseline.borrow()
    }

    pub(crate) fn mark_push_event(&self) {
        if self.is_closed() {
            return;
        }
        let _ = self.last_push_event.send_replace(Some(Utc::now()));
    }

    pub(crate) fn mark_baseline(&self) {
        if self.is_closed() {
            return;
        }
        let _ = self.last_baseline.send_replace(Some(Utc::now()));
    }

    // ── Closing ──────────────────────────────────────────────────────

    /// Stop accepting writes for good. Waits for any write already in
    /// progress; once this returns, nothing changes the store again.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.system.fence();
        self.scan.fence();
        self.hello.fence();
        self.services.fence();
        self.latest.fence();
        self.entities.fence();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    // ── Mutation primitives (merge engine only) ──────────────────────

    /// Replace a slot. `f` runs under the slot's write lock and receives
    /// the revision to stamp, so revisions follow the order writes land in.
    pub(crate) fn update_slot<F>(&self, id: &SlotId, f: F) -> bool
    where
        F: FnOnce(Option<&SlotValue>, u64) -> Option<SlotValue>,
    {
        let guarded = |current: Option<&SlotValue>| {
            if self.is_closed() {
                return None;
            }
            f(current, self.next_revision())
        };
        match id {
            SlotId::System => self.system.update(guarded),
            SlotId::Scan => self.scan.update(guarded),
            SlotId::Hello => self.hello.update(guarded),
            SlotId::Service(name) => self.services.update(name, guarded),
            SlotId::Latest(name) => self.latest.update(name, guarded),
        }
    }

    /// Change the entity map. `plan` runs under the map's write lock and
    /// receives the revision to stamp.
    pub(crate) fn update_entities<F>(&self, plan: F) -> bool
    where
        F: FnOnce(&BTreeMap<EntityKey, Arc<EntityRecord>>, u64) -> Vec<EntityChange>,
    {
        self.entities.apply(|map| {
            if self.is_closed() {
                return Vec::new();
            }
            plan(map, self.next_revision())
        })
    }
}

impl Default for DataStore {
    fn default() -> Self {
        Self::new()
    }
}
