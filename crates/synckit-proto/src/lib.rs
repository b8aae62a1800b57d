//! # synckit-proto
//!
//! Logical clocks, the ephemeral awareness channel, and the client↔server
//! wire protocol for SyncKit, a local-first collaborative CRDT runtime.
//!
//! This crate is the protocol layer: it defines the vocabulary ([`clock`]),
//! the message taxonomy and both framings ([`wire`]), and presence state
//! ([`awareness`]) that the higher-level CRDTs in `synckit-crdt` and the
//! server in the root crate build on.
//!
//! ## Layout
//!
//! ```text
//! ┌───────────────────────────────┐
//! │   synckit-crdt (document/text/│
//! │   rich-text/counter/set)      │
//! └───────────────┬────────────────┘
//!                  │ uses ReplicaId, VectorClock, OperationId
//!                  ▼
//! ┌───────────────────────────────┐
//! │   synckit-proto (this crate)  │
//! │   clock · wire · awareness    │
//! └───────────────┬────────────────┘
//!                  │ carried over
//!                  ▼
//! ┌───────────────────────────────┐
//! │   transport (TCP/WebSocket)   │
//! └───────────────────────────────┘
//! ```

#![deny(clippy::all)]
#![warn(missing_docs)]

pub mod awareness;
pub mod clock;
pub mod error;
pub mod wire;

pub use awareness::{ApplyOutcome, Awareness, AwarenessEntry};
pub use clock::{CausalOrder, LamportStamp, LogicalClock, OperationId, PhysicalTime, ReplicaId, VectorClock};
pub use error::ProtocolError;
pub use wire::{AwarenessEntryWire, DeltaEnvelope, Message};

#[cfg(test)]
mod tests {
    use super::*;

    /// Verify the public re-exports are accessible from the crate root.
    #[test]
    fn public_reexports_are_usable() {
        let replica = ReplicaId::new("r1");
        let mut vc = VectorClock::new();
        vc.tick(&replica);

        let stamp = LamportStamp::new(LogicalClock::new(1), replica.clone());
        assert_eq!(stamp.replica, replica);

        let mut aw = Awareness::new();
        aw.set_local(replica, serde_json::json!({"online": true}));

        let msg = Message::Ping {};
        assert_eq!(msg.type_code(), 0x30);
    }
}
