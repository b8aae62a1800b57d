//! # synckit-crdt
//!
//! The composite CRDT layer for SyncKit: an LWW document, a Fugue-family
//! text CRDT, a Peritext-style rich-text overlay, a PN-Counter, and an
//! OR-Set, plus the causal operation log that orders and deduplicates
//! every operation they emit.
//!
//! ## Layout
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │ document · text · richtext · counter · orset │
//! │        (this crate's public CRDTs)           │
//! └───────────────────┬───────────────────────────┘
//!                      │ emits/consumes
//!                      ▼
//! ┌─────────────────────────────────────────────┐
//! │              op · oplog                     │
//! │   Operation envelope and causal ordering     │
//! └───────────────────┬───────────────────────────┘
//!                      │ built on
//!                      ▼
//! ┌─────────────────────────────────────────────┐
//! │         synckit-proto (clocks, ids)          │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! Every CRDT here is plain, synchronous data — concurrency and
//! persistence belong to the sync manager and server core one layer up.

#![deny(clippy::all)]
#![warn(missing_docs)]

pub mod counter;
pub mod document;
pub mod op;
pub mod oplog;
pub mod orset;
pub mod richtext;
pub mod text;

pub use counter::PnCounter;
pub use document::LwwDocument;
pub use op::{OpKind, Operation};
pub use oplog::OperationLog;
pub use orset::OrSet;
pub use richtext::{MergeStrategy, Peritext};
pub use text::{CharacterId, FugueText, Side, TextError};
