// ── Merge engine ──
//
// The single writer of the data store. Push events and baseline
// snapshots both arrive here as `Update`s and go through the same two
// policies: replace-whole for slots, field-merge for entities.

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use serde_json::{Map, Value};
use tracing::{debug, trace};

use crate::config::BaselineOrdering;
use crate::model::{EntityKey, EntityRecord, SlotId, SlotValue};
use crate::store::{DataStore, EntityChange};

/// A classified change, ready to merge.
#[derive(Debug, Clone, PartialEq)]
pub enum Update {
    /// Replace the slot's value with `value` (replace-whole policy).
    ReplaceSlot { slot: SlotId, value: Value },
    /// Field-merge `patch` into entity `key`.
    MergeEntity {
        key: EntityKey,
        patch: Map<String, Value>,
    },
    /// Field-merge a list of entities in one publication.
    MergeEntities {
        records: Vec<(EntityKey, Map<String, Value>)>,
        missing: MissingEntities,
    },
}

/// What to do with known entities that a list update does not mention.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum MissingEntities {
    /// Leave them alone. Absence is not evidence of anything.
    #[default]
    Retain,
    /// Field-merge these fields into every unmentioned entity
    /// (e.g. `{"status": "offline"}`).
    Patch(Map<String, Value>),
}

/// Where an update came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateSource {
    Push,
    /// A baseline requested when the store was at revision `issued_at`.
    Baseline { issued_at: u64 },
}

// ── Pure merge policies ──────────────────────────────────────────────

/// Replace-whole: the payload becomes the slot value.
///
/// Returns `None` when the slot already holds exactly `payload`.
pub fn replace_whole(current: Option<&SlotValue>, payload: Value, revision: u64) -> Option<SlotValue> {
    if current.is_some_and(|c| c.value == payload) {
        return None;
    }
    Some(SlotValue {
        value: payload,
        revision,
        updated_at: Utc::now(),
    })
}

/// Field-merge: every field in `patch` overwrites, every other field of
/// `existing` is kept. A missing record starts out empty.
///
/// Returns `None` when the merge would change nothing.
pub fn field_merge(
    existing: Option<&EntityRecord>,
    key: &EntityKey,
    patch: &Map<String, Value>,
    revision: u64,
) -> Option<EntityRecord> {
    let mut changed = existing.is_none();
    let mut record = existing
        .cloned()
        .unwrap_or_else(|| EntityRecord::empty(key.clone()));

    for (field, value) in patch {
        if record.fields.get(field) != Some(value) {
            record.fields.insert(field.clone(), value.clone());
            changed = true;
        }
    }

    changed.then(|| {
        record.revision = revision;
        record
    })
}

/// Turn a JSON array of entity objects into keyed patches. Items that are
/// not objects or lack a usable `key_field` are skipped.
pub fn keyed_patches<'a, I>(items: I, key_field: &str) -> Vec<(EntityKey, Map<String, Value>)>
where
    I: IntoIterator<Item = &'a Value>,
{
    items
        .into_iter()
        .filter_map(|item| {
            let fields = item.as_object()?;
            let key = EntityKey::from_value(fields.get(key_field)?)?;
            Some((key, fields.clone()))
        })
        .collect()
}

// ── MergeEngine ──────────────────────────────────────────────────────

/// Applies updates to a [`DataStore`].
pub struct MergeEngine {
    store: Arc<DataStore>,
    ordering: BaselineOrdering,
}

impl MergeEngine {
    pub fn new(store: Arc<DataStore>, ordering: BaselineOrdering) -> Self {
        Self { store, ordering }
    }

    pub fn store(&self) -> &Arc<DataStore> {
        &self.store
    }

    pub fn ordering(&self) -> BaselineOrdering {
        self.ordering
    }

    /// Source tag for a baseline fetch that starts now.
    pub fn baseline_source(&self) -> UpdateSource {
        UpdateSource::Baseline {
            issued_at: self.store.revision(),
        }
    }

    /// Apply every update in order. Returns `true` if anything changed.
    pub fn apply_all<I>(&self, updates: I, source: UpdateSource) -> bool
    where
        I: IntoIterator<Item = Update>,
    {
        updates
            .into_iter()
            .fold(false, |changed, update| self.apply(update, source) | changed)
    }

    /// Apply one update. Returns `true` if the store published a change.
    ///
    /// The revision is taken under the target's write lock, so a push and
    /// a baseline racing for the same target are stamped in the order they
    /// land.
    pub fn apply(&self, update: Update, source: UpdateSource) -> bool {
        let mut stamped = 0;

        match update {
            Update::ReplaceSlot { slot, value } => {
                let published = self.store.update_slot(&slot, |current, revision| {
                    stamped = revision;
                    if current.is_some_and(|c| self.superseded(source, c.revision)) {
                        trace!(%slot, "baseline value superseded by newer push");
                        return None;
                    }
                    replace_whole(current, value, revision)
                });
                if published {
                    debug!(%slot, revision = stamped, "slot replaced");
                }
                published
            }
            Update::MergeEntity { key, patch } => {
                let published = self.store.update_entities(|map, revision| {
                    stamped = revision;
                    let existing = map.get(&key).map(|r| &**r);
                    if existing.is_some_and(|r| self.superseded(source, r.revision)) {
                        return Vec::new();
                    }
                    field_merge(existing, &key, &patch, revision)
                        .map(EntityChange::Put)
                        .into_iter()
                        .collect()
                });
                if published {
                    debug!(%key, revision = stamped, "entity merged");
                }
                published
            }
            Update::MergeEntities { records, missing } => {
                let published = self.store.update_entities(|map, revision| {
                    stamped = revision;
                    let mut changes = Vec::new();
                    for (key, patch) in &records {
                        let existing = map.get(key).map(|r| &**r);
                        if existing.is_some_and(|r| self.superseded(source, r.revision)) {
                            continue;
                        }
                        if let Some(record) = field_merge(existing, key, patch, revision) {
                            changes.push(EntityChange::Put(record));
                        }
                    }
                    if let MissingEntities::Patch(fields) = &missing {
                        let listed: BTreeSet<&EntityKey> = records.iter().map(|(k, _)| k).collect();
                        for (key, record) in map {
                            if listed.contains(key) || self.superseded(source, record.revision) {
                                continue;
                            }
                            if let Some(next) = field_merge(Some(&**record), key, fields, revision) {
                                changes.push(EntityChange::Put(next));
                            }
                        }
                    }
                    changes
                });
                if published {
                    debug!(count = records.len(), revision = stamped, "entity list merged");
                }
                published
            }
        }
    }

    fn superseded(&self, source: UpdateSource, target_revision: u64) -> bool {
        match (self.ordering, source) {
            (BaselineOrdering::PushWins, UpdateSource::Baseline { issued_at }) => {
                target_revision > issued_at
            }
            _ => false,
        }
    }

    // ── Optimistic updates ───────────────────────────────────────────

    /// Apply `patch` to entity `key` right away, then await `remote`.
    ///
    /// On success the speculative fields stay. On failure every patched
    /// field that still holds its speculative value is restored to what
    /// it was before, and fields that did not exist before are removed;
    /// an entity created by the speculation is removed entirely.
    pub async fn optimistic<T, E, Fut>(
        &self,
        key: impl Into<EntityKey>,
        patch: Map<String, Value>,
        remote: Fut,
    ) -> Result<T, E>
    where
        Fut: Future<Output = Result<T, E>>,
    {
        let key = key.into();
        let speculation = self.speculate(&key, &patch);

        match remote.await {
            Ok(value) => Ok(value),
            Err(err) => {
                self.roll_back(&key, &patch, speculation);
                Err(err)
            }
        }
    }

    fn speculate(&self, key: &EntityKey, patch: &Map<String, Value>) -> Speculation {
        let mut speculation = Speculation::default();
        let mut stamped = 0;

        let published = self.store.update_entities(|map, revision| {
            stamped = revision;
            let existing = map.get(key).map(|r| &**r);
            speculation.existed = existing.is_some();
            speculation.prior = patch
                .keys()
                .map(|field| (field.clone(), existing.and_then(|r| r.get(field).cloned())))
                .collect();
            field_merge(existing, key, patch, revision)
                .map(EntityChange::Put)
                .into_iter()
                .collect()
        });

        if published {
            debug!(%key, revision = stamped, "optimistic patch applied");
        }
        speculation
    }

    fn roll_back(&self, key: &EntityKey, patch: &Map<String, Value>, speculation: Speculation) {
        let mut stamped = 0;

        let published = self.store.update_entities(|map, revision| {
            stamped = revision;
            let Some(current) = map.get(key) else {
                return Vec::new();
            };
            let mut record = EntityRecord::clone(current);
            let mut changed = false;

            for (field, prior) in speculation.prior {
                if record.fields.get(&field) != patch.get(&field) {
                    // Overwritten since; the newer value wins.
                    continue;
                }
                if prior.as_ref() == patch.get(&field) {
                    continue;
                }
                match prior {
                    Some(value) => {
                        record.fields.insert(field, value);
                    }
                    None => {
                        record.fields.remove(&field);
                    }
                }
                changed = true;
            }

            if !changed {
                return Vec::new();
            }
            if !speculation.existed && record.fields.is_empty() {
                return vec![EntityChange::Remove(key.clone())];
            }
            record.revision = revision;
            vec![EntityChange::Put(record)]
        });

        if published {
            debug!(%key, revision = stamped, "optimistic patch rolled back");
        }
    }
}

#[derive(Debug, Default)]
struct Speculation {
    existed: bool,
    prior: Vec<(String, Option<Value>)>,
}
