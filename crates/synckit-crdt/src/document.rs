//! Field-granular Last-Write-Wins document CRDT (§4.B).

use std::collections::HashMap;

use serde_json::Value;
use synckit_proto::{LamportStamp, LogicalClock, PhysicalTime, ReplicaId, VectorClock};

use crate::op::{OpKind, Operation};

#[derive(Debug, Clone)]
struct Field {
    value: Value,
    stamp: LamportStamp,
    deleted: bool,
}

/// An unordered map `key -> {value, writeTime, deleted?}` with deterministic
/// Last-Write-Wins conflict resolution (§3 "Document-level CRDT").
pub struct LwwDocument {
    document_id: String,
    replica_id: ReplicaId,
    clock: LogicalClock,
    vector_clock: VectorClock,
    fields: HashMap<String, Field>,
    subscribers: Vec<Box<dyn FnMut(&HashMap<String, Value>) + Send>>,
}

impl LwwDocument {
    /// Create an empty document owned by `replica_id`.
    #[must_use]
    pub fn new(document_id: impl Into<String>, replica_id: ReplicaId) -> Self {
        Self {
            document_id: document_id.into(),
            replica_id,
            clock: LogicalClock::ZERO,
            vector_clock: VectorClock::new(),
            fields: HashMap::new(),
            subscribers: Vec::new(),
        }
    }

    /// The document's id.
    #[must_use]
    pub fn document_id(&self) -> &str {
        &self.document_id
    }

    /// This replica's current vector clock for the document.
    #[must_use]
    pub fn vector_clock(&self) -> &VectorClock {
        &self.vector_clock
    }

    /// Force this replica's vector clock forward, e.g. after adopting a
    /// snapshot delivered out-of-band (§4.G `set_vector_clock`).
    pub fn set_vector_clock(&mut self, vc: VectorClock) {
        self.vector_clock = vc;
    }

    /// Register an observer invoked after any state change, with a
    /// snapshot of the current non-tombstoned view (§4.B `subscribe`).
    pub fn subscribe(&mut self, callback: impl FnMut(&HashMap<String, Value>) + Send + 'static) {
        self.subscribers.push(Box::new(callback));
    }

    fn notify(&mut self) {
        let snapshot = self.get_all();
        for sub in &mut self.subscribers {
            sub(&snapshot);
        }
    }

    /// The current value of `key`, or `None` if absent or tombstoned.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key).filter(|f| !f.deleted).map(|f| &f.value)
    }

    /// The winning value, stamp, and tombstone state for `key`, including
    /// tombstoned keys. Lets a caller (e.g. the server core) rebroadcast the
    /// resolved state even to a sender whose write lost the LWW race.
    #[must_use]
    pub fn field_entry(&self, key: &str) -> Option<(Value, LamportStamp, bool)> {
        self.fields.get(key).map(|f| (f.value.clone(), f.stamp.clone(), f.deleted))
    }

    /// The current non-tombstoned view of the whole document.
    #[must_use]
    pub fn get_all(&self) -> HashMap<String, Value> {
        self.fields
            .iter()
            .filter(|(_, f)| !f.deleted)
            .map(|(k, f)| (k.clone(), f.value.clone()))
            .collect()
    }

    fn next_stamp(&mut self) -> LamportStamp {
        self.clock = self.clock.tick();
        self.vector_clock.observe_replica(self.replica_id.clone(), self.clock);
        LamportStamp::new(self.clock, self.replica_id.clone())
    }

    fn make_op(&self, kind: OpKind, payload: Value, stamp: &LamportStamp) -> Operation {
        Operation {
            kind,
            document_id: self.document_id.clone(),
            replica_id: self.replica_id.clone(),
            logical_clock: stamp.clock,
            vector_clock: self.vector_clock.clone(),
            physical_ms: PhysicalTime::now(),
            payload,
        }
    }

    /// Write `key = value`, emitting one operation with the next logical
    /// clock (§4.B `set`).
    pub fn set(&mut self, key: impl Into<String>, value: Value) -> Operation {
        let key = key.into();
        let stamp = self.next_stamp();
        self.fields.insert(
            key.clone(),
            Field { value: value.clone(), stamp: stamp.clone(), deleted: false },
        );
        let op = self.make_op(
            OpKind::DocumentSet,
            serde_json::json!({"key": key, "value": value, "stamp": stamp_wire(&stamp)}),
            &stamp,
        );
        self.notify();
        op
    }

    /// Atomically write several fields. Each field receives a consecutive,
    /// strictly increasing clock value (§4.B `update`); observers that see
    /// the batch applied op-by-op still converge to the same final state.
    pub fn update(&mut self, fields: impl IntoIterator<Item = (String, Value)>) -> Vec<Operation> {
        fields.into_iter().map(|(k, v)| self.set(k, v)).collect()
    }

    /// Tombstone `key` with a fresh stamp (§4.B `delete`). A tombstone and a
    /// live write compete under the same LWW rule — no special priority.
    pub fn delete(&mut self, key: impl Into<String>) -> Operation {
        let key = key.into();
        let stamp = self.next_stamp();
        self.fields
            .entry(key.clone())
            .and_modify(|f| {
                f.deleted = true;
                f.stamp = stamp.clone();
            })
            .or_insert_with(|| Field { value: Value::Null, stamp: stamp.clone(), deleted: true });
        let op = self.make_op(
            OpKind::DocumentDelete,
            serde_json::json!({"key": key, "stamp": stamp_wire(&stamp)}),
            &stamp,
        );
        self.notify();
        op
    }

    /// Apply a remote field operation under LWW rules: the write with the
    /// larger `(clock, replicaId)` pair wins (§4.B "Conflict resolution").
    pub fn apply_remote(&mut self, op: &Operation) {
        let stamp = LamportStamp::new(op.logical_clock, op.replica_id.clone());
        let key = op.payload["key"].as_str().unwrap_or_default().to_string();

        let should_apply = match self.fields.get(&key) {
            Some(existing) => stamp > existing.stamp,
            None => true,
        };
        if !should_apply {
            return;
        }

        match op.kind {
            OpKind::DocumentSet => {
                let value = op.payload["value"].clone();
                self.fields.insert(key, Field { value, stamp, deleted: false });
            }
            OpKind::DocumentDelete => {
                self.fields
                    .entry(key)
                    .and_modify(|f| {
                        f.deleted = true;
                        f.stamp = stamp.clone();
                    })
                    .or_insert(Field { value: Value::Null, stamp, deleted: true });
            }
            _ => return,
        }

        self.vector_clock.observe_replica(op.replica_id.clone(), op.logical_clock);
        self.notify();
    }

    /// Merge another replica's full document state into this one,
    /// field-by-field under LWW (§4.B `merge`).
    pub fn merge(&mut self, other: &LwwDocument) {
        for (key, other_field) in &other.fields {
            let should_apply = match self.fields.get(key) {
                Some(existing) => other_field.stamp > existing.stamp,
                None => true,
            };
            if should_apply {
                self.fields.insert(key.clone(), other_field.clone());
            }
        }
        self.vector_clock.merge(&other.vector_clock);
        self.notify();
    }
}

fn stamp_wire(stamp: &LamportStamp) -> Value {
    serde_json::json!({"clock": stamp.clock.value(), "replicaId": stamp.replica.as_str()})
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(id: &str, replica: &str) -> LwwDocument {
        LwwDocument::new(id, ReplicaId::new(replica))
    }

    #[test]
    fn set_then_get_roundtrips() {
        let mut d = doc("doc1", "a");
        d.set("title", serde_json::json!("hello"));
        assert_eq!(d.get("title"), Some(&serde_json::json!("hello")));
    }

    #[test]
    fn delete_tombstones_and_hides_from_get() {
        let mut d = doc("doc1", "a");
        d.set("title", serde_json::json!("hello"));
        d.delete("title");
        assert_eq!(d.get("title"), None);
        assert!(d.get_all().is_empty());
    }

    #[test]
    fn newer_stamp_can_resurrect_a_tombstoned_field() {
        let mut a = doc("doc1", "a");
        let mut b = doc("doc1", "b");

        let del = a.delete("title");
        let set = b.set("title", serde_json::json!("resurrected"));

        let mut merged = doc("doc1", "c");
        merged.apply_remote(&del);
        merged.apply_remote(&set);

        // b's stamp (clock=1, replica=b) beats a's (clock=1, replica=a) by tie-break.
        assert_eq!(merged.get("title"), Some(&serde_json::json!("resurrected")));
    }

    #[test]
    fn lww_conflict_resolved_by_larger_clock_replica_pair() {
        // S2-style scenario: clocks 5 ("a"), 7 ("b"), 6 ("c"); largest wins.
        let a = Operation {
            kind: OpKind::DocumentSet,
            document_id: "doc1".into(),
            replica_id: ReplicaId::new("a"),
            logical_clock: LogicalClock::new(5),
            vector_clock: VectorClock::new(),
            physical_ms: PhysicalTime::from_millis(100),
            payload: serde_json::json!({"key": "title", "value": "A"}),
        };
        let b = Operation {
            logical_clock: LogicalClock::new(7),
            replica_id: ReplicaId::new("b"),
            payload: serde_json::json!({"key": "title", "value": "B"}),
            physical_ms: PhysicalTime::from_millis(50),
            ..a.clone()
        };
        let c = Operation {
            logical_clock: LogicalClock::new(6),
            replica_id: ReplicaId::new("c"),
            payload: serde_json::json!({"key": "title", "value": "C"}),
            physical_ms: PhysicalTime::from_millis(150),
            ..a.clone()
        };

        for perm in [[&a, &b, &c], [&c, &a, &b], [&b, &c, &a]] {
            let mut d = doc("doc1", "server");
            for op in perm {
                d.apply_remote(op);
            }
            assert_eq!(d.get("title"), Some(&serde_json::json!("B")), "order-independent convergence");
        }
    }

    #[test]
    fn update_assigns_strictly_increasing_clocks() {
        let mut d = doc("doc1", "a");
        let ops = d.update([("a".to_string(), serde_json::json!(1)), ("b".to_string(), serde_json::json!(2))]);
        assert!(ops[0].logical_clock < ops[1].logical_clock);
    }

    #[test]
    fn merge_converges_two_replicas() {
        let mut a = doc("doc1", "a");
        let mut b = doc("doc1", "b");
        a.set("x", serde_json::json!(1));
        b.set("y", serde_json::json!(2));

        a.merge(&b);
        b.merge(&a);

        assert_eq!(a.get_all(), b.get_all());
    }

    #[test]
    fn field_entry_exposes_winning_stamp_and_tombstone_state() {
        let mut d = doc("doc1", "a");
        d.set("title", serde_json::json!("hello"));
        let (value, _stamp, deleted) = d.field_entry("title").unwrap();
        assert_eq!(value, serde_json::json!("hello"));
        assert!(!deleted);

        d.delete("title");
        let (_, _, deleted) = d.field_entry("title").unwrap();
        assert!(deleted);
    }

    #[test]
    fn subscribe_fires_on_change() {
        use std::sync::{Arc, Mutex};
        let calls = Arc::new(Mutex::new(0));
        let calls_clone = calls.clone();

        let mut d = doc("doc1", "a");
        d.subscribe(move |_snapshot| {
            *calls_clone.lock().unwrap() += 1;
        });
        d.set("x", serde_json::json!(1));
        d.delete("x");

        assert_eq!(*calls.lock().unwrap(), 2);
    }
}

#[cfg(test)]
mod proptests {
    use proptest::prelude::*;

    use super::*;

    fn replica_id(n: u8) -> ReplicaId {
        ReplicaId::new(format!("r{n}"))
    }

    // Permutations of the same set operations on one key converge on the
    // write with the largest (clock, replicaId) pair, regardless of
    // delivery order (LWW determinism).
    proptest! {
        #[test]
        fn lww_convergence_is_order_independent(
            clocks in prop::collection::vec(1u64..20, 2..6),
        ) {
            let ops: Vec<Operation> = clocks
                .iter()
                .enumerate()
                .map(|(i, &clock)| Operation {
                    kind: OpKind::DocumentSet,
                    document_id: "doc1".into(),
                    replica_id: replica_id(i as u8),
                    logical_clock: LogicalClock::new(clock),
                    vector_clock: VectorClock::new(),
                    physical_ms: PhysicalTime::from_millis(0),
                    payload: serde_json::json!({"key": "title", "value": i}),
                })
                .collect();

            let winner = ops
                .iter()
                .max_by_key(|op| (op.logical_clock, op.replica_id.clone()))
                .unwrap()
                .payload["value"]
                .clone();

            let forward: Vec<&Operation> = ops.iter().collect();
            let mut reversed = forward.clone();
            reversed.reverse();

            for order in [forward, reversed] {
                let mut d = LwwDocument::new("doc1", ReplicaId::new("server"));
                for op in order {
                    d.apply_remote(op);
                }
                prop_assert_eq!(d.get("title"), Some(&winner));
            }
        }

        #[test]
        fn applying_the_same_operation_twice_is_a_no_op(clock in 1u64..50, value in 0i64..1000) {
            let op = Operation {
                kind: OpKind::DocumentSet,
                document_id: "doc1".into(),
                replica_id: ReplicaId::new("a"),
                logical_clock: LogicalClock::new(clock),
                vector_clock: VectorClock::new(),
                physical_ms: PhysicalTime::from_millis(0),
                payload: serde_json::json!({"key": "title", "value": value}),
            };
            let mut d = LwwDocument::new("doc1", ReplicaId::new("server"));
            d.apply_remote(&op);
            let once = d.get_all();
            d.apply_remote(&op);
            prop_assert_eq!(d.get_all(), once);
        }

        #[test]
        fn merge_is_commutative(
            a_clocks in prop::collection::vec(1i64..20, 0..4),
            b_clocks in prop::collection::vec(1i64..20, 0..4),
        ) {
            let mut a = LwwDocument::new("doc1", ReplicaId::new("a"));
            let mut b = LwwDocument::new("doc1", ReplicaId::new("b"));
            for (i, clock) in a_clocks.iter().enumerate() {
                a.set(format!("k{i}"), serde_json::json!(clock));
            }
            for (i, clock) in b_clocks.iter().enumerate() {
                b.set(format!("k{i}"), serde_json::json!(clock));
            }

            let mut ab = LwwDocument::new("doc1", ReplicaId::new("ab"));
            ab.merge(&a);
            ab.merge(&b);

            let mut ba = LwwDocument::new("doc1", ReplicaId::new("ba"));
            ba.merge(&b);
            ba.merge(&a);

            prop_assert_eq!(ab.get_all(), ba.get_all());
        }
    }
}
