//! OR-Set: an add/remove set where concurrent add-then-remove favors the
//! add (§4.E).

use std::collections::{HashMap, HashSet};
use std::hash::Hash;

use serde::Serialize;
use synckit_proto::{LogicalClock, OperationId, PhysicalTime, ReplicaId, VectorClock};

use crate::op::{OpKind, Operation};

/// A set of elements, each tracked by a collection of observed-remove tags.
pub struct OrSet<T> {
    document_id: String,
    replica_id: ReplicaId,
    clock: LogicalClock,
    vector_clock: VectorClock,
    live_tags: HashMap<T, HashSet<OperationId>>,
    tombstones: HashMap<T, HashSet<OperationId>>,
}

impl<T> OrSet<T>
where
    T: Eq + Hash + Clone + Serialize + for<'de> serde::Deserialize<'de>,
{
    /// An empty set owned by `replica_id`.
    #[must_use]
    pub fn new(document_id: impl Into<String>, replica_id: ReplicaId) -> Self {
        Self {
            document_id: document_id.into(),
            replica_id,
            clock: LogicalClock::ZERO,
            vector_clock: VectorClock::new(),
            live_tags: HashMap::new(),
            tombstones: HashMap::new(),
        }
    }

    fn next_id(&mut self) -> OperationId {
        self.clock = self.clock.tick();
        self.vector_clock.observe_replica(self.replica_id.clone(), self.clock);
        OperationId::new(self.replica_id.clone(), self.clock)
    }

    /// `true` iff `element` has at least one non-tombstoned tag
    /// (§4.E `has`).
    #[must_use]
    pub fn has(&self, element: &T) -> bool {
        match self.live_tags.get(element) {
            Some(tags) => {
                let tombstoned = self.tombstones.get(element);
                tags.iter().any(|tag| tombstoned.map_or(true, |t| !t.contains(tag)))
            }
            None => false,
        }
    }

    /// Every currently-present element.
    #[must_use]
    pub fn values(&self) -> Vec<T> {
        self.live_tags.keys().filter(|e| self.has(e)).cloned().collect()
    }

    /// Add `element`, creating a fresh tag (§4.E `add`).
    pub fn add(&mut self, element: T) -> Operation {
        let id = self.next_id();
        self.live_tags.entry(element.clone()).or_default().insert(id.clone());
        Operation {
            kind: OpKind::SetAdd,
            document_id: self.document_id.clone(),
            replica_id: id.replica().clone(),
            logical_clock: id.clock(),
            vector_clock: self.vector_clock.clone(),
            physical_ms: PhysicalTime::now(),
            payload: serde_json::json!({"element": element, "tag": id.to_string()}),
        }
    }

    /// Tombstone every tag currently observed for `element`
    /// (§4.E `remove`). A concurrent add whose tag was not yet observed
    /// survives — "add wins on concurrent add/remove".
    pub fn remove(&mut self, element: &T) -> Operation {
        let observed: Vec<OperationId> = self
            .live_tags
            .get(element)
            .map(|tags| tags.iter().cloned().collect())
            .unwrap_or_default();
        let entry = self.tombstones.entry(element.clone()).or_default();
        for tag in &observed {
            entry.insert(tag.clone());
        }
        let id = self.next_id();
        Operation {
            kind: OpKind::SetRemove,
            document_id: self.document_id.clone(),
            replica_id: id.replica().clone(),
            logical_clock: id.clock(),
            vector_clock: self.vector_clock.clone(),
            physical_ms: PhysicalTime::now(),
            payload: serde_json::json!({
                "element": element,
                "tags": observed.iter().map(OperationId::to_string).collect::<Vec<_>>(),
            }),
        }
    }

    /// Apply a remote add or remove.
    pub fn apply_remote(&mut self, op: &Operation)
    where
        T: serde::de::DeserializeOwned,
    {
        let element: T = match serde_json::from_value(op.payload["element"].clone()) {
            Ok(e) => e,
            Err(_) => return,
        };
        match op.kind {
            OpKind::SetAdd => {
                if let Some(tag) = op.payload["tag"].as_str().and_then(OperationId::parse) {
                    self.live_tags.entry(element).or_default().insert(tag);
                }
            }
            OpKind::SetRemove => {
                let tags: Vec<OperationId> = op.payload["tags"]
                    .as_array()
                    .map(|arr| arr.iter().filter_map(|v| v.as_str().and_then(OperationId::parse)).collect())
                    .unwrap_or_default();
                let entry = self.tombstones.entry(element).or_default();
                for tag in tags {
                    entry.insert(tag);
                }
            }
            _ => return,
        }
        self.vector_clock.observe_replica(op.replica_id.clone(), op.logical_clock);
    }

    /// Union tags and tombstones with another replica's state
    /// (§4.E `merge`).
    pub fn merge(&mut self, other: &OrSet<T>) {
        for (element, tags) in &other.live_tags {
            self.live_tags.entry(element.clone()).or_default().extend(tags.iter().cloned());
        }
        for (element, tags) in &other.tombstones {
            self.tombstones.entry(element.clone()).or_default().extend(tags.iter().cloned());
        }
        self.vector_clock.merge(&other.vector_clock);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_then_has_is_true() {
        let mut s: OrSet<String> = OrSet::new("doc1", ReplicaId::new("a"));
        s.add("apple".to_string());
        assert!(s.has(&"apple".to_string()));
    }

    #[test]
    fn remove_then_has_is_false() {
        let mut s: OrSet<String> = OrSet::new("doc1", ReplicaId::new("a"));
        s.add("apple".to_string());
        s.remove(&"apple".to_string());
        assert!(!s.has(&"apple".to_string()));
    }

    #[test]
    fn concurrent_add_wins_over_remove_of_unseen_tag() {
        let mut a: OrSet<String> = OrSet::new("doc1", ReplicaId::new("a"));
        let add_op = a.add("apple".to_string());

        let mut b: OrSet<String> = OrSet::new("doc1", ReplicaId::new("b"));
        // b never saw a's add, so its remove observes zero tags.
        let remove_op = b.remove(&"apple".to_string());

        let mut merged: OrSet<String> = OrSet::new("doc1", ReplicaId::new("c"));
        merged.apply_remote(&add_op);
        merged.apply_remote(&remove_op);

        assert!(merged.has(&"apple".to_string()), "add-wins: remove only tombstones observed tags");
    }

    #[test]
    fn remove_after_observing_add_wins_over_add() {
        let mut a: OrSet<String> = OrSet::new("doc1", ReplicaId::new("a"));
        let add_op = a.add("apple".to_string());
        a.remove(&"apple".to_string());

        let mut merged: OrSet<String> = OrSet::new("doc1", ReplicaId::new("b"));
        merged.apply_remote(&add_op);
        assert!(merged.has(&"apple".to_string()));

        let mut a2: OrSet<String> = OrSet::new("doc1", ReplicaId::new("a"));
        a2.add("apple".to_string());
        let remove_op = a2.remove(&"apple".to_string());
        merged.apply_remote(&remove_op);
        assert!(!merged.has(&"apple".to_string()));
    }

    #[test]
    fn merge_converges_two_replicas() {
        let mut a: OrSet<String> = OrSet::new("doc1", ReplicaId::new("a"));
        let mut b: OrSet<String> = OrSet::new("doc1", ReplicaId::new("b"));
        a.add("apple".to_string());
        b.add("banana".to_string());

        a.merge(&b);
        b.merge(&a);

        assert_eq!(a.values().len(), b.values().len());
        assert_eq!(a.values().len(), 2);
    }
}

#[cfg(test)]
mod proptests {
    use proptest::prelude::*;

    use super::*;

    proptest! {
        // A concurrent add and a remove that never observed it always
        // converges to present, regardless of which op is delivered first.
        #[test]
        fn concurrent_add_and_unseen_remove_converges_to_present(element in "[a-z]{1,8}") {
            let mut a: OrSet<String> = OrSet::new("doc1", ReplicaId::new("a"));
            let add_op = a.add(element.clone());

            let mut b: OrSet<String> = OrSet::new("doc1", ReplicaId::new("b"));
            let remove_op = b.remove(&element);

            let mut forward: OrSet<String> = OrSet::new("doc1", ReplicaId::new("c"));
            forward.apply_remote(&add_op);
            forward.apply_remote(&remove_op);

            let mut backward: OrSet<String> = OrSet::new("doc1", ReplicaId::new("d"));
            backward.apply_remote(&remove_op);
            backward.apply_remote(&add_op);

            prop_assert!(forward.has(&element));
            prop_assert!(backward.has(&element));
        }

        // merge() is commutative.
        #[test]
        fn merge_is_commutative(elements_a in prop::collection::vec("[a-z]{1,6}", 0..5), elements_b in prop::collection::vec("[a-z]{1,6}", 0..5)) {
            let mut a: OrSet<String> = OrSet::new("doc1", ReplicaId::new("a"));
            for e in &elements_a {
                a.add(e.clone());
            }
            let mut b: OrSet<String> = OrSet::new("doc1", ReplicaId::new("b"));
            for e in &elements_b {
                b.add(e.clone());
            }

            let mut ab: OrSet<String> = OrSet::new("doc1", ReplicaId::new("ab"));
            ab.merge(&a);
            ab.merge(&b);

            let mut ba: OrSet<String> = OrSet::new("doc1", ReplicaId::new("ba"));
            ba.merge(&b);
            ba.merge(&a);

            let mut ab_values = ab.values();
            let mut ba_values = ba.values();
            ab_values.sort();
            ba_values.sort();
            prop_assert_eq!(ab_values, ba_values);
        }
    }
}
