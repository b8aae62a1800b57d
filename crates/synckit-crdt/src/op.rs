//! The operation envelope every mutating CRDT call produces (§4.F).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use synckit_proto::{LogicalClock, OperationId, PhysicalTime, ReplicaId, VectorClock};

/// Which CRDT-intrinsic mutation this operation represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpKind {
    /// A field write on a [`crate::document::LwwDocument`].
    DocumentSet,
    /// A field tombstone on a [`crate::document::LwwDocument`].
    DocumentDelete,
    /// A character insert on a [`crate::text::FugueText`].
    TextInsert,
    /// A tombstoning delete on a [`crate::text::FugueText`].
    TextDelete,
    /// A new format span on a [`crate::richtext::Peritext`].
    RichTextFormat,
    /// A span tombstone clearing formats on a [`crate::richtext::Peritext`].
    RichTextClear,
    /// A delta on a [`crate::counter::PnCounter`].
    CounterDelta,
    /// An element add on a [`crate::orset::OrSet`].
    SetAdd,
    /// An element remove on a [`crate::orset::OrSet`].
    SetRemove,
}

/// One operation: enough to identify, order, and apply a single CRDT mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    /// What kind of mutation this is.
    pub kind: OpKind,
    /// The document this operation applies to.
    pub document_id: String,
    /// The emitting replica.
    pub replica_id: ReplicaId,
    /// The emitting replica's logical clock at emission time.
    pub logical_clock: LogicalClock,
    /// The emitting replica's full vector clock at emission time.
    pub vector_clock: VectorClock,
    /// Wall-clock time at emission; a tie-breaker only, never load-bearing.
    pub physical_ms: PhysicalTime,
    /// The CRDT-specific payload, opaque to the operation log.
    pub payload: Value,
}

impl Operation {
    /// This operation's globally unique id.
    #[must_use]
    pub fn id(&self) -> OperationId {
        OperationId::new(self.replica_id.clone(), self.logical_clock)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operation_id_combines_replica_and_clock() {
        let op = Operation {
            kind: OpKind::TextInsert,
            document_id: "doc1".into(),
            replica_id: ReplicaId::new("a"),
            logical_clock: LogicalClock::new(3),
            vector_clock: VectorClock::new(),
            physical_ms: PhysicalTime::from_millis(0),
            payload: serde_json::json!({}),
        };
        assert_eq!(op.id(), OperationId::new(ReplicaId::new("a"), LogicalClock::new(3)));
    }
}
