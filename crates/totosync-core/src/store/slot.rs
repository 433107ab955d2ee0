// ── Whole-replace slots ──
//
// A slot holds one JSON value. Writers hand in a closure that sees the
// current value and returns the replacement, or `None` to leave the slot
// (and its subscribers) untouched.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::watch;

use crate::model::SlotValue;

/// Snapshot of a keyed slot family.
pub type SlotFamilySnapshot = Arc<BTreeMap<String, Arc<SlotValue>>>;

/// A single whole-replace slot.
pub(crate) struct WholeReplaceSlot {
    value: watch::Sender<Option<Arc<SlotValue>>>,
}

impl WholeReplaceSlot {
    pub(crate) fn new() -> Self {
        let (value, _) = watch::channel(None);
        Self { value }
    }

    pub(crate) fn get(&self) -> Option<Arc<SlotValue>> {
        self.value.borrow().clone()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<Option<Arc<SlotValue>>> {
        self.value.subscribe()
    }

    /// Replace the value if `f` returns one. Returns `true` if published.
    pub(crate) fn update<F>(&self, f: F) -> bool
    where
        F: FnOnce(Option<&SlotValue>) -> Option<SlotValue>,
    {
        self.value.send_if_modified(|current| {
            match f(current.as_deref()) {
                Some(next) => {
                    *current = Some(Arc::new(next));
                    true
                }
                None => false,
            }
        })
    }

    /// Wait for any write in progress to finish.
    pub(crate) fn fence(&self) {
        self.value.send_if_modified(|_| false);
    }
}

/// A family of whole-replace slots addressed by name.
pub(crate) struct SlotFamily {
    slots: watch::Sender<SlotFamilySnapshot>,
}

impl SlotFamily {
    pub(crate) fn new() -> Self {
        let (slots, _) = watch::channel(Arc::new(BTreeMap::new()));
        Self { slots }
    }

    pub(crate) fn get(&self, name: &str) -> Option<Arc<SlotValue>> {
        self.slots.borrow().get(name).cloned()
    }

    pub(crate) fn snapshot(&self) -> SlotFamilySnapshot {
        self.slots.borrow().clone()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<SlotFamilySnapshot> {
        self.slots.subscribe()
    }

    /// Replace slot `name` if `f` returns a value. Returns `true` if published.
    pub(crate) fn update<F>(&self, name: &str, f: F) -> bool
    where
        F: FnOnce(Option<&SlotValue>) -> Option<SlotValue>,
    {
        self.slots.send_if_modified(|family| {
            let Some(next) = f(family.get(name).map(|v| &**v)) else {
                return false;
            };
            let mut copy = (**family).clone();
            copy.insert(name.to_owned(), Arc::new(next));
            *family = Arc::new(copy);
            true
        })
    }

    /// Wait for any write in progress to finish.
    pub(crate) fn fence(&self) {
        self.slots.send_if_modified(|_| false);
    }
}
