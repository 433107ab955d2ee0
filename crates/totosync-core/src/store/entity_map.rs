// ── Keyed entity storage ──
//
// Copy-on-write map of entity records with push-based change
// notification via `watch` channels. Every published mutation swaps in a
// new snapshot `Arc` and bumps the version; a mutation that changes
// nothing publishes nothing.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::watch;

use crate::model::{EntityKey, EntityRecord};

/// Point-in-time view of every entity, ordered by key.
pub type EntitySnapshot = Arc<BTreeMap<EntityKey, Arc<EntityRecord>>>;

/// One change computed against the current snapshot.
#[derive(Debug, Clone)]
pub(crate) enum EntityChange {
    Put(EntityRecord),
    Remove(EntityKey),
}

pub(crate) struct EntityMap {
    snapshot: watch::Sender<EntitySnapshot>,
    /// Version counter, bumped on every published mutation.
    version: watch::Sender<u64>,
}

impl EntityMap {
    pub(crate) fn new() -> Self {
        let (snapshot, _) = watch::channel(Arc::new(BTreeMap::new()));
        let (version, _) = watch::channel(0u64);
        Self { snapshot, version }
    }

    pub(crate) fn get(&self, key: &str) -> Option<Arc<EntityRecord>> {
        self.snapshot.borrow().get(key).cloned()
    }

    /// Get the current snapshot (cheap `Arc` clone).
    pub(crate) fn snapshot(&self) -> EntitySnapshot {
        self.snapshot.borrow().clone()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<EntitySnapshot> {
        self.snapshot.subscribe()
    }

    pub(crate) fn version(&self) -> u64 {
        *self.version.borrow()
    }

    pub(crate) fn len(&self) -> usize {
        self.snapshot.borrow().len()
    }

    /// Compute changes against the current map and publish them as one
    /// new snapshot. `plan` runs under the channel's write lock, so
    /// concurrent writers never interleave. Returns `true` if published.
    pub(crate) fn apply<F>(&self, plan: F) -> bool
    where
        F: FnOnce(&BTreeMap<EntityKey, Arc<EntityRecord>>) -> Vec<EntityChange>,
    {
        let published = self.snapshot.send_if_modified(|current| {
            let changes = plan(current);
            if changes.is_empty() {
                return false;
            }
            let mut next = (**current).clone();
            for change in changes {
                match change {
                    EntityChange::Put(record) => {
                        next.insert(record.key.clone(), Arc::new(record));
                    }
                    EntityChange::Remove(key) => {
                        next.remove(&key);
                    }
                }
            }
            *current = Arc::new(next);
            true
        });

        if published {
            self.version.send_modify(|v| *v += 1);
        }
        published
    }

    /// Wait for any write in progress to finish.
    pub(crate) fn fence(&self) {
        self.snapshot.send_if_modified(|_| false);
    }
}
