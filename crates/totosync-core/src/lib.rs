// totosync-core: realtime state synchronization between the Totoro admin
// backend and local consumers (CLI, embedding applications).

pub mod baseline;
pub mod config;
pub mod connection;
pub mod dispatch;
pub mod error;
pub mod merge;
pub mod model;
pub mod poll;
pub mod session;
pub mod store;
pub mod stream;

// ── Primary re-exports ──────────────────────────────────────────────
pub use baseline::{RestBaseline, RestResource};
pub use config::{BackoffSchedule, BaselineOrdering, EntitySpec, SyncConfig};
pub use connection::{ConnectionManager, FrameSink};
pub use dispatch::{DispatchError, DispatchTable, Dispatcher, EventKind, FrameOutcome};
pub use error::CoreError;
pub use merge::{MergeEngine, MissingEntities, Update, UpdateSource};
pub use poll::{BaselineFetcher, PollCoordinator, PollGuard, PollTask};
pub use session::{SyncSession, SyncSessionBuilder};
pub use store::{DataStore, EntitySnapshot, SlotFamilySnapshot};
pub use stream::{ConnectionStream, EntityStream, SlotFamilyStream, SlotStream, Subscription};

// Re-export model types at the crate root for ergonomics.
pub use model::{ConnectionState, ConnectionStatus, EntityKey, EntityRecord, SlotId, SlotValue};
