//! PN-Counter: a grow/shrink counter that converges under concurrent
//! increments and decrements (§4.E).

use std::collections::HashMap;

use synckit_proto::{LogicalClock, PhysicalTime, ReplicaId, VectorClock};

use crate::op::{OpKind, Operation};

/// Two per-replica grow-only maps whose difference is the counter's value.
pub struct PnCounter {
    document_id: String,
    replica_id: ReplicaId,
    clock: LogicalClock,
    vector_clock: VectorClock,
    pos: HashMap<ReplicaId, u64>,
    neg: HashMap<ReplicaId, u64>,
}

impl PnCounter {
    /// A zero-valued counter owned by `replica_id`.
    #[must_use]
    pub fn new(document_id: impl Into<String>, replica_id: ReplicaId) -> Self {
        Self {
            document_id: document_id.into(),
            replica_id,
            clock: LogicalClock::ZERO,
            vector_clock: VectorClock::new(),
            pos: HashMap::new(),
            neg: HashMap::new(),
        }
    }

    /// `Σ pos − Σ neg` across every replica (§4.E `value`).
    #[must_use]
    pub fn value(&self) -> i64 {
        let total_pos: u64 = self.pos.values().sum();
        let total_neg: u64 = self.neg.values().sum();
        total_pos as i64 - total_neg as i64
    }

    fn next_op(&mut self, kind: OpKind, payload: serde_json::Value) -> Operation {
        self.clock = self.clock.tick();
        self.vector_clock.observe_replica(self.replica_id.clone(), self.clock);
        Operation {
            kind,
            document_id: self.document_id.clone(),
            replica_id: self.replica_id.clone(),
            logical_clock: self.clock,
            vector_clock: self.vector_clock.clone(),
            physical_ms: PhysicalTime::now(),
            payload,
        }
    }

    /// Add `amount` (non-negative) to this replica's positive slot
    /// (§4.E "Increment/decrement of non-negative amounts only"). The
    /// emitted operation carries this replica's new cumulative total, not
    /// just `amount`, so that `apply_remote`'s pointwise-max merge
    /// accumulates correctly across a sequence of deltas instead of only
    /// ever converging on the single largest one delivered.
    ///
    /// # Panics
    /// Panics if `amount` would overflow this replica's accumulator.
    pub fn increment(&mut self, amount: u64) -> Operation {
        let entry = self.pos.entry(self.replica_id.clone()).or_insert(0);
        *entry = entry.checked_add(amount).expect("PN-Counter pos overflow");
        let total = *entry;
        self.next_op(OpKind::CounterDelta, serde_json::json!({"sign": "pos", "amount": total}))
    }

    /// Add `amount` (non-negative) to this replica's negative slot. See
    /// [`Self::increment`] for why the emitted amount is cumulative.
    ///
    /// # Panics
    /// Panics if `amount` would overflow this replica's accumulator.
    pub fn decrement(&mut self, amount: u64) -> Operation {
        let entry = self.neg.entry(self.replica_id.clone()).or_insert(0);
        *entry = entry.checked_add(amount).expect("PN-Counter neg overflow");
        let total = *entry;
        self.next_op(OpKind::CounterDelta, serde_json::json!({"sign": "neg", "amount": total}))
    }

    /// Zero out every slot. Local-only: this does not produce an operation
    /// and is never propagated to other replicas (§4.E `reset`).
    pub fn reset(&mut self) {
        self.pos.clear();
        self.neg.clear();
    }

    /// Apply a remote delta.
    pub fn apply_remote(&mut self, op: &Operation) {
        if op.kind != OpKind::CounterDelta {
            return;
        }
        let amount = op.payload["amount"].as_u64().unwrap_or(0);
        let map = if op.payload["sign"] == serde_json::json!("pos") { &mut self.pos } else { &mut self.neg };
        let entry = map.entry(op.replica_id.clone()).or_insert(0);
        *entry = (*entry).max(amount);
        self.vector_clock.observe_replica(op.replica_id.clone(), op.logical_clock);
    }

    /// Pointwise max merge of both grow-only maps (§4.E `merge`).
    pub fn merge(&mut self, other: &PnCounter) {
        for (replica, amount) in &other.pos {
            let entry = self.pos.entry(replica.clone()).or_insert(0);
            *entry = (*entry).max(*amount);
        }
        for (replica, amount) in &other.neg {
            let entry = self.neg.entry(replica.clone()).or_insert(0);
            *entry = (*entry).max(*amount);
        }
        self.vector_clock.merge(&other.vector_clock);
    }
}


#[cfg(test)]
mod proptests {
    use proptest::prelude::*;

    use super::*;

    proptest! {
        // value() always equals the sum of increments minus the sum of
        // decrements applied locally, for any interleaving.
        #[test]
        fn value_matches_sum_of_pos_minus_sum_of_neg(
            increments in prop::collection::vec(0u64..1000, 0..10),
            decrements in prop::collection::vec(0u64..1000, 0..10),
        ) {
            let mut c = PnCounter::new("doc1", ReplicaId::new("a"));
            for amount in &increments {
                c.increment(*amount);
            }
            for amount in &decrements {
                c.decrement(*amount);
            }
            let expected: i64 = increments.iter().sum::<u64>() as i64 - decrements.iter().sum::<u64>() as i64;
            prop_assert_eq!(c.value(), expected);
        }

        // merge() is commutative and associative: any grouping/order of
        // merging three replicas' states yields the same value.
        #[test]
        fn merge_is_commutative_and_associative(
            a_amount in 0u64..500,
            b_amount in 0u64..500,
            c_amount in 0u64..500,
        ) {
            let mut a = PnCounter::new("doc1", ReplicaId::new("a"));
            a.increment(a_amount);
            let mut b = PnCounter::new("doc1", ReplicaId::new("b"));
            b.increment(b_amount);
            let mut c = PnCounter::new("doc1", ReplicaId::new("c"));
            c.increment(c_amount);

            let mut left_first = PnCounter::new("doc1", ReplicaId::new("x"));
            left_first.merge(&a);
            left_first.merge(&b);
            left_first.merge(&c);

            let mut right_first = PnCounter::new("doc1", ReplicaId::new("y"));
            right_first.merge(&c);
            right_first.merge(&b);
            right_first.merge(&a);

            prop_assert_eq!(left_first.value(), right_first.value());
            prop_assert_eq!(left_first.value(), (a_amount + b_amount + c_amount) as i64);
        }
    }
}
