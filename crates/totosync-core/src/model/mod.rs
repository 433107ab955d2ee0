// ── Domain model ──
//
// Plain data shared by the store, the merge engine and consumers.

mod connection;
mod entity;
mod slot;

pub use connection::{ConnectionState, ConnectionStatus};
pub use entity::{EntityKey, EntityRecord};
pub use slot::{SlotId, SlotValue};
