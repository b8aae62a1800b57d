//! Causal operation log: idempotence, causal-ready buffering, local
//! ordering (§4.F).

use std::collections::HashSet;

use synckit_proto::{OperationId, VectorClock};

use crate::op::Operation;

/// Buffers and orders incoming operations so that they are applied exactly
/// once, and only once every causal dependency is already satisfied.
pub struct OperationLog {
    entries: Vec<Operation>,
    seen: HashSet<OperationId>,
    pending: Vec<Operation>,
    vector_clock: VectorClock,
}

impl Default for OperationLog {
    fn default() -> Self {
        Self::new()
    }
}

impl OperationLog {
    /// An empty log with a zero vector clock.
    #[must_use]
    pub fn new() -> Self {
        Self { entries: Vec::new(), seen: HashSet::new(), pending: Vec::new(), vector_clock: VectorClock::new() }
    }

    /// This log's current vector clock, reflecting every applied operation.
    #[must_use]
    pub fn vector_clock(&self) -> &VectorClock {
        &self.vector_clock
    }

    /// Every applied operation, in local application order.
    #[must_use]
    pub fn entries(&self) -> &[Operation] {
        &self.entries
    }

    /// Operations buffered pending an unmet causal dependency.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    fn is_ready(&self, op: &Operation) -> bool {
        // Same-replica: this must be the immediate next op in that
        // replica's sequence (local order, §4.F).
        let own = self.vector_clock.get(&op.replica_id);
        if own.value().saturating_add(1) != op.logical_clock.value() {
            return false;
        }
        for (replica, required) in op.vector_clock.iter() {
            if *replica == op.replica_id {
                continue;
            }
            if self.vector_clock.get(replica) < *required {
                return false;
            }
        }
        true
    }

    fn apply(&mut self, op: Operation) {
        self.seen.insert(op.id());
        self.vector_clock.observe_replica(op.replica_id.clone(), op.logical_clock);
        self.entries.push(op);
    }

    /// Deliver one incoming operation. Returns every operation — this one
    /// and any previously buffered ones — that became causally ready as a
    /// result, in the order they should be applied to the CRDT state.
    ///
    /// Duplicate delivery (already-seen [`OperationId`]) is a silent no-op
    /// (§4.F "Idempotence").
    pub fn deliver(&mut self, op: Operation) -> Vec<Operation> {
        if self.seen.contains(&op.id()) {
            return Vec::new();
        }

        if !self.is_ready(&op) {
            self.pending.push(op);
            return Vec::new();
        }

        let mut newly_ready = Vec::new();
        self.apply(op.clone());
        newly_ready.push(op);

        // Fixed point: applying one op may unblock others.
        loop {
            let mut progressed = false;
            let mut still_pending = Vec::with_capacity(self.pending.len());
            for candidate in std::mem::take(&mut self.pending) {
                if self.seen.contains(&candidate.id()) {
                    continue;
                }
                if self.is_ready(&candidate) {
                    self.apply(candidate.clone());
                    newly_ready.push(candidate);
                    progressed = true;
                } else {
                    still_pending.push(candidate);
                }
            }
            self.pending = still_pending;
            if !progressed {
                break;
            }
        }

        newly_ready
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::op::OpKind;
    use synckit_proto::{LogicalClock, PhysicalTime, ReplicaId};

    fn op(replica: &str, clock: u64, deps: &[(&str, u64)]) -> Operation {
        let mut vc = VectorClock::new();
        for (r, c) in deps {
            vc.observe_replica(ReplicaId::new(*r), LogicalClock::new(*c));
        }
        vc.observe_replica(ReplicaId::new(replica), LogicalClock::new(clock));
        Operation {
            kind: OpKind::TextInsert,
            document_id: "doc1".into(),
            replica_id: ReplicaId::new(replica),
            logical_clock: LogicalClock::new(clock),
            vector_clock: vc,
            physical_ms: PhysicalTime::from_millis(0),
            payload: serde_json::json!({}),
        }
    }

    #[test]
    fn ready_op_applies_immediately() {
        let mut log = OperationLog::new();
        let ready = log.deliver(op("a", 1, &[]));
        assert_eq!(ready.len(), 1);
        assert_eq!(log.entries().len(), 1);
    }

    #[test]
    fn duplicate_delivery_is_a_no_op() {
        let mut log = OperationLog::new();
        log.deliver(op("a", 1, &[]));
        let second = log.deliver(op("a", 1, &[]));
        assert!(second.is_empty());
        assert_eq!(log.entries().len(), 1);
    }

    #[test]
    fn out_of_order_same_replica_op_is_buffered() {
        let mut log = OperationLog::new();
        let ready = log.deliver(op("a", 2, &[]));
        assert!(ready.is_empty());
        assert_eq!(log.pending_count(), 1);
    }

    #[test]
    fn buffered_op_flushes_once_dependency_arrives() {
        let mut log = OperationLog::new();
        log.deliver(op("a", 2, &[]));
        let flushed = log.deliver(op("a", 1, &[]));
        assert_eq!(flushed.len(), 2, "delivering clock 1 should also release buffered clock 2");
        assert_eq!(log.entries().len(), 2);
        assert_eq!(log.pending_count(), 0);
    }

    #[test]
    fn cross_replica_causal_dependency_is_respected() {
        let mut log = OperationLog::new();
        // b's op 1 depends on a's op 1 having already been seen.
        let ready = log.deliver(op("b", 1, &[("a", 1)]));
        assert!(ready.is_empty());

        let flushed = log.deliver(op("a", 1, &[]));
        assert_eq!(flushed.len(), 2);
    }

    #[test]
    fn chain_of_buffered_ops_flushes_in_causal_order() {
        let mut log = OperationLog::new();
        log.deliver(op("a", 3, &[]));
        log.deliver(op("a", 2, &[]));
        let flushed = log.deliver(op("a", 1, &[]));
        assert_eq!(flushed.iter().map(|o| o.logical_clock.value()).collect::<Vec<_>>(), vec![1, 2, 3]);
    }
}
