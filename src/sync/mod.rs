//! Sync layer: the client-facing sync manager, the undo manager, and the
//! cross-tab coordinator that lets co-located replicas of one logical user
//! converge on a single undo position (§4.G, §4.J, §4.K).

pub mod cross_tab;
pub mod manager;
pub mod undo;

pub use cross_tab::{CrossTabCoordinator, CrossTabRegistry};
pub use manager::{NetworkStatus, SyncManager, SyncableDocument};
pub use undo::{UndoEntry, UndoManager};
