//! Fugue-family tree-structured positional text CRDT (§4.C).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use synckit_proto::{LogicalClock, OperationId, PhysicalTime, ReplicaId, VectorClock};
use thiserror::Error;

use crate::op::{OpKind, Operation};

/// A character's stable identity: `(ReplicaId, LogicalClock)` of the
/// operation that inserted it.
pub type CharacterId = OperationId;

/// Which side of `parent` a character was inserted on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    /// This character sits to the left of its parent.
    Left,
    /// This character sits to the right of its parent.
    Right,
}

/// Errors a [`FugueText`] operation can fail with.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TextError {
    /// A position argument fell outside `[0, length]`.
    #[error("text position {position} out of range for length {length}")]
    OutOfRange {
        /// The offending position.
        position: usize,
        /// The document's current visible length.
        length: usize,
    },
}

struct CharNode {
    value: char,
    parent: Option<CharacterId>,
    side: Side,
    deleted: bool,
}

/// A conflict-free character sequence, materialised from a tree of
/// positions (§3 "Text CRDT").
pub struct FugueText {
    document_id: String,
    replica_id: ReplicaId,
    clock: LogicalClock,
    vector_clock: VectorClock,
    nodes: HashMap<CharacterId, CharNode>,
    children: HashMap<(Option<CharacterId>, Side), Vec<CharacterId>>,
    pending: Vec<Operation>,
    subscribers: Vec<Box<dyn FnMut(&str) + Send>>,
}

impl FugueText {
    /// An empty text CRDT owned by `replica_id`.
    #[must_use]
    pub fn new(document_id: impl Into<String>, replica_id: ReplicaId) -> Self {
        Self {
            document_id: document_id.into(),
            replica_id,
            clock: LogicalClock::ZERO,
            vector_clock: VectorClock::new(),
            nodes: HashMap::new(),
            children: HashMap::new(),
            pending: Vec::new(),
            subscribers: Vec::new(),
        }
    }

    /// Register an observer invoked with the materialised string after
    /// every change (§4.C `subscribe`).
    pub fn subscribe(&mut self, callback: impl FnMut(&str) + Send + 'static) {
        self.subscribers.push(Box::new(callback));
    }

    fn notify(&mut self) {
        let text = self.to_string();
        for sub in &mut self.subscribers {
            sub(&text);
        }
    }

    /// This replica's current vector clock for the document.
    #[must_use]
    pub fn vector_clock(&self) -> &VectorClock {
        &self.vector_clock
    }

    /// Operations buffered pending an unseen parent character.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    fn sorted_insert(children: &mut Vec<CharacterId>, id: CharacterId) {
        let idx = children
            .binary_search_by(|existing| (existing.replica(), existing.clock()).cmp(&(id.replica(), id.clock())))
            .unwrap_or_else(|i| i);
        children.insert(idx, id);
    }

    fn expand_node(&self, id: CharacterId, out: &mut String) {
        if let Some(lefts) = self.children.get(&(Some(id.clone()), Side::Left)) {
            for child in lefts.clone() {
                self.expand_node(child, out);
            }
        }
        if let Some(node) = self.nodes.get(&id) {
            if !node.deleted {
                out.push(node.value);
            }
        }
        if let Some(rights) = self.children.get(&(Some(id), Side::Right)) {
            for child in rights.clone() {
                self.expand_node(child, out);
            }
        }
    }

    /// Materialise the current visible string, skipping tombstones
    /// (§4.C `to_string`).
    #[must_use]
    pub fn to_string(&self) -> String {
        let mut out = String::new();
        if let Some(lefts) = self.children.get(&(None, Side::Left)) {
            for child in lefts.clone() {
                self.expand_node(child, &mut out);
            }
        }
        if let Some(rights) = self.children.get(&(None, Side::Right)) {
            for child in rights.clone() {
                self.expand_node(child, &mut out);
            }
        }
        out
    }

    /// The current visible characters, in materialised order — used by
    /// overlay CRDTs (e.g. [`crate::richtext::Peritext`]) to resolve a
    /// visible position into a stable [`CharacterId`].
    #[must_use]
    pub fn visible_character_ids(&self) -> Vec<CharacterId> {
        self.materialize_ids()
    }

    /// The full structural order of every character ever inserted,
    /// including tombstones. Used by overlay CRDTs to test whether a
    /// character id falls within an anchored span regardless of deletion.
    #[must_use]
    pub fn all_character_ids(&self) -> Vec<CharacterId> {
        fn walk(text: &FugueText, id: CharacterId, out: &mut Vec<CharacterId>) {
            if let Some(lefts) = text.children.get(&(Some(id.clone()), Side::Left)) {
                for child in lefts.clone() {
                    walk(text, child, out);
                }
            }
            out.push(id.clone());
            if let Some(rights) = text.children.get(&(Some(id), Side::Right)) {
                for child in rights.clone() {
                    walk(text, child, out);
                }
            }
        }
        let mut out = Vec::new();
        if let Some(lefts) = self.children.get(&(None, Side::Left)) {
            for child in lefts.clone() {
                walk(self, child, &mut out);
            }
        }
        if let Some(rights) = self.children.get(&(None, Side::Right)) {
            for child in rights.clone() {
                walk(self, child, &mut out);
            }
        }
        out
    }

    /// `true` iff `id` has been tombstoned (or is unknown).
    #[must_use]
    pub fn is_deleted(&self, id: &CharacterId) -> bool {
        self.nodes.get(id).map_or(true, |n| n.deleted)
    }

    fn materialize_ids(&self) -> Vec<CharacterId> {
        fn walk(text: &FugueText, id: CharacterId, out: &mut Vec<CharacterId>) {
            if let Some(lefts) = text.children.get(&(Some(id.clone()), Side::Left)) {
                for child in lefts.clone() {
                    walk(text, child, out);
                }
            }
            if let Some(node) = text.nodes.get(&id) {
                if !node.deleted {
                    out.push(id.clone());
                }
            }
            if let Some(rights) = text.children.get(&(Some(id), Side::Right)) {
                for child in rights.clone() {
                    walk(text, child, out);
                }
            }
        }
        let mut out = Vec::new();
        if let Some(lefts) = self.children.get(&(None, Side::Left)) {
            for child in lefts.clone() {
                walk(self, child, &mut out);
            }
        }
        if let Some(rights) = self.children.get(&(None, Side::Right)) {
            for child in rights.clone() {
                walk(self, child, &mut out);
            }
        }
        out
    }

    fn next_id(&mut self) -> CharacterId {
        self.clock = self.clock.tick();
        self.vector_clock.observe_replica(self.replica_id.clone(), self.clock);
        OperationId::new(self.replica_id.clone(), self.clock)
    }

    fn attach(&mut self, id: CharacterId, value: char, parent: Option<CharacterId>, side: Side) {
        self.nodes.insert(id.clone(), CharNode { value, parent, side, deleted: false });
        Self::sorted_insert(self.children.entry((parent, side)).or_default(), id);
    }

    fn make_op(&self, kind: OpKind, payload: Value, id: &CharacterId) -> Operation {
        Operation {
            kind,
            document_id: self.document_id.clone(),
            replica_id: id.replica().clone(),
            logical_clock: id.clock(),
            vector_clock: self.vector_clock.clone(),
            physical_ms: PhysicalTime::now(),
            payload,
        }
    }

    /// Insert `text` at `position`, producing one operation per code point
    /// (§4.C `insert`).
    pub fn insert(&mut self, position: usize, text: &str) -> Result<Vec<Operation>, TextError> {
        let materialized = self.materialize_ids();
        if position > materialized.len() {
            return Err(TextError::OutOfRange { position, length: materialized.len() });
        }

        let mut ops = Vec::new();
        let mut prev_new: Option<CharacterId> = None;

        for ch in text.chars() {
            let (parent, side) = match &prev_new {
                Some(prev) => (Some(prev.clone()), Side::Right),
                None => {
                    if position > 0 {
                        (Some(materialized[position - 1].clone()), Side::Right)
                    } else if !materialized.is_empty() {
                        (Some(materialized[0].clone()), Side::Left)
                    } else {
                        (None, Side::Right)
                    }
                }
            };

            let id = self.next_id();
            self.attach(id.clone(), ch, parent.clone(), side);
            let payload = serde_json::json!({
                "value": ch,
                "parent": parent.as_ref().map(|p| p.to_string()),
                "side": side,
            });
            ops.push(self.make_op(OpKind::TextInsert, payload, &id));
            prev_new = Some(id);
        }

        self.notify();
        Ok(ops)
    }

    /// Tombstone the visible half-open range `[start, end)`
    /// (§4.C `delete`).
    pub fn delete(&mut self, start: usize, end: usize) -> Result<Vec<Operation>, TextError> {
        let materialized = self.materialize_ids();
        if start > end || end > materialized.len() {
            return Err(TextError::OutOfRange { position: end, length: materialized.len() });
        }

        let mut ops = Vec::new();
        for target in &materialized[start..end] {
            if let Some(node) = self.nodes.get_mut(target) {
                node.deleted = true;
            }
            let id = self.next_id();
            let payload = serde_json::json!({"target": target.to_string()});
            ops.push(self.make_op(OpKind::TextDelete, payload, &id));
        }
        self.notify();
        Ok(ops)
    }

    /// Apply a remote insert or delete. Inserts whose parent is not yet
    /// known are buffered until it arrives (§4.C "unknown parent IDs never
    /// fail — ops are queued until causally ready").
    pub fn apply_remote(&mut self, op: Operation) {
        if self.try_apply(&op) {
            self.flush_pending();
        } else {
            self.pending.push(op);
        }
    }

    fn try_apply(&mut self, op: &Operation) -> bool {
        match op.kind {
            OpKind::TextInsert => {
                let parent: Option<CharacterId> = match op.payload["parent"].as_str() {
                    Some(s) => match CharacterId::parse(s) {
                        Some(id) => Some(id),
                        None => return false,
                    },
                    None => None,
                };
                if let Some(p) = &parent {
                    if !self.nodes.contains_key(p) {
                        return false;
                    }
                }
                let side = if op.payload["side"] == serde_json::json!("left") { Side::Left } else { Side::Right };
                let value = op.payload["value"].as_str().and_then(|s| s.chars().next()).unwrap_or('\u{FFFD}');
                let id = OperationId::new(op.replica_id.clone(), op.logical_clock);
                if self.nodes.contains_key(&id) {
                    return true; // already applied, idempotent no-op
                }
                self.attach(id.clone(), value, parent, side);
                self.vector_clock.observe_replica(op.replica_id.clone(), op.logical_clock);
                self.notify();
                true
            }
            OpKind::TextDelete => {
                let target = match op.payload["target"].as_str().and_then(CharacterId::parse) {
                    Some(id) => id,
                    None => return true,
                };
                if let Some(node) = self.nodes.get_mut(&target) {
                    node.deleted = true;
                }
                self.vector_clock.observe_replica(op.replica_id.clone(), op.logical_clock);
                self.notify();
                true
            }
            _ => true,
        }
    }

    fn flush_pending(&mut self) {
        loop {
            let mut progressed = false;
            let mut still_pending = Vec::with_capacity(self.pending.len());
            for op in std::mem::take(&mut self.pending) {
                if self.try_apply(&op) {
                    progressed = true;
                } else {
                    still_pending.push(op);
                }
            }
            self.pending = still_pending;
            if !progressed {
                break;
            }
        }
    }
}


#[cfg(test)]
mod proptests {
    use proptest::prelude::*;

    use super::*;

    fn ascii_word() -> impl Strategy<Value = String> {
        "[a-zA-Z]{1,6}"
    }

    proptest! {
        // Two replicas that each insert a distinct word at the same gap,
        // then exchange ops in opposite delivery orders, must converge on
        // one shared string containing both words intact.
        #[test]
        fn concurrent_inserts_at_same_gap_converge(base in ascii_word(), left in ascii_word(), right in ascii_word()) {
            let mut seed = FugueText::new("doc1", ReplicaId::new("seed"));
            let seed_ops = seed.insert(0, &base).unwrap();

            let mut a = FugueText::new("doc1", ReplicaId::new("a"));
            let mut b = FugueText::new("doc1", ReplicaId::new("b"));
            for op in &seed_ops {
                a.apply_remote(op.clone());
                b.apply_remote(op.clone());
            }

            let mid = base.chars().count() / 2;
            let a_ops = a.insert(mid, &left).unwrap();
            let b_ops = b.insert(mid, &right).unwrap();

            for op in &b_ops {
                a.apply_remote(op.clone());
            }
            for op in &a_ops {
                b.apply_remote(op.clone());
            }

            prop_assert_eq!(a.to_string(), b.to_string());
            prop_assert!(a.to_string().contains(&left));
            prop_assert!(a.to_string().contains(&right));
        }

        // Re-delivering an already-applied insert is a no-op.
        #[test]
        fn duplicate_insert_delivery_is_idempotent(word in ascii_word()) {
            let mut source = FugueText::new("doc1", ReplicaId::new("src"));
            let ops = source.insert(0, &word).unwrap();

            let mut replica = FugueText::new("doc1", ReplicaId::new("dst"));
            for op in &ops {
                replica.apply_remote(op.clone());
            }
            let once = replica.to_string();
            for op in &ops {
                replica.apply_remote(op.clone());
            }
            prop_assert_eq!(replica.to_string(), once);
        }
    }
}
