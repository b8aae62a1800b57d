//! # synckit-server
//!
//! Reference server and sync-protocol host for SyncKit: a [`sync::SyncManager`]
//! and [`server::ServerCore`] wired to a pluggable [`storage::StorageAdapter`],
//! [`transport::TransportAdapter`], and [`auth::AuthGuard`], with the
//! ambient logging, configuration, and metrics stack described in DESIGN.md.

#![deny(clippy::all)]
#![warn(missing_docs)]

pub mod auth;
pub mod config;
pub mod error;
pub mod metrics;
pub mod server;
pub mod storage;
pub mod sync;
pub mod telemetry;
pub mod transport;

pub use error::{SyncKitError, SyncKitResult};
pub use server::{DocumentKind, RedisPubSub, ServerCore};
pub use storage::{MemoryStorage, StorageAdapter};
pub use sync::{CrossTabCoordinator, NetworkStatus, SyncManager, SyncableDocument, UndoEntry, UndoManager};
pub use transport::{ConnectionState, TcpTransport, TransportAdapter};
