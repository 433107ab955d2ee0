// ── Reactive data store ──
//
// Slot and entity storage with push-based change notification.
// Only the merge engine mutates it.

mod data_store;
mod entity_map;
mod slot;

pub use data_store::DataStore;
pub use entity_map::EntitySnapshot;
pub use slot::SlotFamilySnapshot;

pub(crate) use entity_map::EntityChange;
