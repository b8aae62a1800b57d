//! Peritext-style rich-text formatting overlaid on [`FugueText`] (§4.D).

use std::collections::HashMap;

use serde_json::Value;
use synckit_proto::{LogicalClock, OperationId, PhysicalTime, ReplicaId, VectorClock};

use crate::op::{OpKind, Operation};
use crate::text::{CharacterId, FugueText, TextError};

/// How concurrent writes to the same attribute are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeStrategy {
    /// Toggle-style attributes (bold, italic, underline, strikethrough):
    /// among the spans with the most recent timestamp, truthy values
    /// combine by logical OR.
    Union,
    /// The most recent `(timestamp, replicaId)` wins; ties favor the
    /// smaller `replicaId`.
    Lww,
    /// Caller-supplied; falls back to [`MergeStrategy::Lww`] here.
    Custom,
}

fn default_strategies() -> HashMap<String, MergeStrategy> {
    let mut m = HashMap::new();
    for key in ["bold", "italic", "underline", "strikethrough"] {
        m.insert(key.to_string(), MergeStrategy::Union);
    }
    for key in ["color", "background", "link"] {
        m.insert(key.to_string(), MergeStrategy::Lww);
    }
    m
}

struct FormatSpan {
    op_id: OperationId,
    start: CharacterId,
    end: CharacterId,
    attributes: HashMap<String, Value>,
    deleted: bool,
    physical_ms: PhysicalTime,
    replica_id: ReplicaId,
}

/// A set of format spans anchored to stable character ids, overlaid on a
/// companion [`FugueText`] (§3 "Rich-text CRDT").
pub struct Peritext {
    document_id: String,
    replica_id: ReplicaId,
    clock: LogicalClock,
    vector_clock: VectorClock,
    spans: HashMap<OperationId, FormatSpan>,
    strategies: HashMap<String, MergeStrategy>,
    subscribers: Vec<Box<dyn FnMut() + Send>>,
}

fn is_truthy(v: &Value) -> bool {
    !matches!(v, Value::Null | Value::Bool(false))
}

impl Peritext {
    /// An overlay with no spans, owned by `replica_id`.
    #[must_use]
    pub fn new(document_id: impl Into<String>, replica_id: ReplicaId) -> Self {
        Self {
            document_id: document_id.into(),
            replica_id,
            clock: LogicalClock::ZERO,
            vector_clock: VectorClock::new(),
            spans: HashMap::new(),
            strategies: default_strategies(),
            subscribers: Vec::new(),
        }
    }

    /// Override the merge strategy for `attribute`.
    pub fn set_strategy(&mut self, attribute: impl Into<String>, strategy: MergeStrategy) {
        self.strategies.insert(attribute.into(), strategy);
    }

    /// Register an observer invoked after any span changes.
    pub fn subscribe(&mut self, callback: impl FnMut() + Send + 'static) {
        self.subscribers.push(Box::new(callback));
    }

    fn notify(&mut self) {
        for sub in &mut self.subscribers {
            sub();
        }
    }

    fn next_id(&mut self) -> OperationId {
        self.clock = self.clock.tick();
        self.vector_clock.observe_replica(self.replica_id.clone(), self.clock);
        OperationId::new(self.replica_id.clone(), self.clock)
    }

    fn anchor_range(text: &FugueText, start: usize, end: usize) -> Result<(CharacterId, CharacterId), TextError> {
        let visible = text.visible_character_ids();
        if start >= visible.len() {
            return Err(TextError::OutOfRange { position: start, length: visible.len() });
        }
        // Zero-length format(p, p, ...) anchors the single character at p;
        // otherwise end is exclusive, so the end anchor is the last
        // covered character.
        let end_pos = if end <= start { start } else { (end - 1).min(visible.len() - 1) };
        Ok((visible[start].clone(), visible[end_pos].clone()))
    }

    fn covers(all_ids: &[CharacterId], span_start: &CharacterId, span_end: &CharacterId, target: &CharacterId) -> bool {
        let idx = |id: &CharacterId| all_ids.iter().position(|x| x == id);
        match (idx(span_start), idx(span_end), idx(target)) {
            (Some(s), Some(e), Some(t)) => s <= t && t <= e,
            _ => false,
        }
    }

    /// Create a new format span over `[start, end)` visible characters
    /// (§4.D `format`).
    pub fn format(
        &mut self,
        text: &FugueText,
        start: usize,
        end: usize,
        attributes: HashMap<String, Value>,
    ) -> Result<Operation, TextError> {
        let (start_id, end_id) = Self::anchor_range(text, start, end)?;
        let op_id = self.next_id();
        let physical_ms = PhysicalTime::now();

        self.spans.insert(
            op_id.clone(),
            FormatSpan {
                op_id: op_id.clone(),
                start: start_id.clone(),
                end: end_id.clone(),
                attributes: attributes.clone(),
                deleted: false,
                physical_ms,
                replica_id: self.replica_id.clone(),
            },
        );

        let payload = serde_json::json!({
            "opId": op_id.to_string(),
            "start": start_id.to_string(),
            "end": end_id.to_string(),
            "attributes": attributes,
            "physicalMs": physical_ms.millis(),
        });
        self.notify();
        Ok(Operation {
            kind: OpKind::RichTextFormat,
            document_id: self.document_id.clone(),
            replica_id: op_id.replica().clone(),
            logical_clock: op_id.clock(),
            vector_clock: self.vector_clock.clone(),
            physical_ms,
            payload,
        })
    }

    fn overlapping_span_ids(&self, all_ids: &[CharacterId], start_id: &CharacterId, end_id: &CharacterId) -> Vec<OperationId> {
        self.spans
            .values()
            .filter(|s| !s.deleted)
            .filter(|s| Self::covers(all_ids, &s.start, &s.end, start_id) || Self::covers(all_ids, &s.start, &s.end, end_id))
            .map(|s| s.op_id.clone())
            .collect()
    }

    fn make_clear_op(&mut self, op_ids: &[OperationId], attributes: Option<&[String]>) -> Operation {
        let id = self.next_id();
        let payload = serde_json::json!({
            "opIds": op_ids.iter().map(OperationId::to_string).collect::<Vec<_>>(),
            "attributes": attributes,
        });
        Operation {
            kind: OpKind::RichTextClear,
            document_id: self.document_id.clone(),
            replica_id: id.replica().clone(),
            logical_clock: id.clock(),
            vector_clock: self.vector_clock.clone(),
            physical_ms: PhysicalTime::now(),
            payload,
        }
    }

    /// Remove `attributes` from every active span overlapping
    /// `[start, end)`. A span whose bag becomes empty is tombstoned
    /// (§4.D `unformat`, edge case 4). Emits an [`OpKind::RichTextClear`]
    /// naming the affected spans and removed attributes so remote
    /// replicas apply the identical partial clear; returns `None` if no
    /// span overlapped the range.
    pub fn unformat(
        &mut self,
        text: &FugueText,
        start: usize,
        end: usize,
        attributes: &[String],
    ) -> Result<Option<Operation>, TextError> {
        let (start_id, end_id) = Self::anchor_range(text, start, end)?;
        let all_ids = text.all_character_ids();
        let overlapping = self.overlapping_span_ids(&all_ids, &start_id, &end_id);
        if overlapping.is_empty() {
            return Ok(None);
        }

        for op_id in &overlapping {
            if let Some(span) = self.spans.get_mut(op_id) {
                for attr in attributes {
                    span.attributes.remove(attr);
                }
                if span.attributes.is_empty() {
                    span.deleted = true;
                }
            }
        }
        self.notify();
        Ok(Some(self.make_clear_op(&overlapping, Some(attributes))))
    }

    /// Tombstone every active span overlapping `[start, end)`, regardless
    /// of attributes (§4.D `clear_formats`). Emits an
    /// [`OpKind::RichTextClear`] naming the affected spans so remote
    /// replicas tombstone the same ones; returns `None` if no span
    /// overlapped the range.
    pub fn clear_formats(&mut self, text: &FugueText, start: usize, end: usize) -> Result<Option<Operation>, TextError> {
        let (start_id, end_id) = Self::anchor_range(text, start, end)?;
        let all_ids = text.all_character_ids();
        let overlapping = self.overlapping_span_ids(&all_ids, &start_id, &end_id);
        if overlapping.is_empty() {
            return Ok(None);
        }

        for op_id in &overlapping {
            if let Some(span) = self.spans.get_mut(op_id) {
                span.deleted = true;
            }
        }
        self.notify();
        Ok(Some(self.make_clear_op(&overlapping, None)))
    }

    fn merge_attribute(&self, name: &str, contributions: &[(&FormatSpan, &Value)]) -> Value {
        let strategy = self.strategies.get(name).copied().unwrap_or(MergeStrategy::Lww);
        match strategy {
            MergeStrategy::Lww | MergeStrategy::Custom => contributions
                .iter()
                .max_by(|(a, _), (b, _)| a.physical_ms.cmp(&b.physical_ms).then(b.replica_id.cmp(&a.replica_id)))
                .map(|(_, v)| (*v).clone())
                .unwrap_or(Value::Null),
            MergeStrategy::Union => {
                let max_ms = contributions.iter().map(|(s, _)| s.physical_ms).max();
                Value::Bool(
                    contributions.iter().any(|(s, v)| Some(s.physical_ms) == max_ms && is_truthy(v)),
                )
            }
        }
    }

    /// The merged attribute bag in effect at visible position `pos`
    /// (§4.D `get_formats`).
    #[must_use]
    pub fn get_formats(&self, text: &FugueText, pos: usize) -> HashMap<String, Value> {
        let visible = text.visible_character_ids();
        let Some(target) = visible.get(pos) else { return HashMap::new() };
        let all_ids = text.all_character_ids();

        let covering: Vec<&FormatSpan> = self
            .spans
            .values()
            .filter(|s| !s.deleted)
            .filter(|s| Self::covers(&all_ids, &s.start, &s.end, target))
            .collect();

        let mut names: Vec<&String> = Vec::new();
        for span in &covering {
            for key in span.attributes.keys() {
                if !names.contains(&key) {
                    names.push(key);
                }
            }
        }

        let mut result = HashMap::new();
        for name in names {
            let contributions: Vec<(&FormatSpan, &Value)> =
                covering.iter().filter_map(|s| s.attributes.get(name).map(|v| (*s, v))).collect();
            let value = self.merge_attribute(name, &contributions);
            if is_truthy(&value) {
                result.insert(name.clone(), value);
            }
        }
        result
    }

    /// The minimal sequence of `(substring, attributes)` chunks covering
    /// the visible document (§4.D `get_ranges`).
    #[must_use]
    pub fn get_ranges(&self, text: &FugueText) -> Vec<(String, HashMap<String, Value>)> {
        let materialized = text.to_string();
        let mut ranges: Vec<(String, HashMap<String, Value>)> = Vec::new();

        for (pos, ch) in materialized.chars().enumerate() {
            let attrs = self.get_formats(text, pos);
            match ranges.last_mut() {
                Some((chunk, last_attrs)) if *last_attrs == attrs => chunk.push(ch),
                _ => ranges.push((ch.to_string(), attrs)),
            }
        }
        ranges
    }

    /// Apply a remote [`OpKind::RichTextFormat`] or [`OpKind::RichTextClear`]
    /// (§4.D `apply_remote`). A format merge is commutative: re-inserting
    /// the same `opId` is a no-op. A clear is naturally idempotent:
    /// tombstoning an already-tombstoned span, or removing an
    /// already-absent attribute, changes nothing.
    pub fn apply_remote(&mut self, op: &Operation) {
        match op.kind {
            OpKind::RichTextFormat => self.apply_remote_format(op),
            OpKind::RichTextClear => self.apply_remote_clear(op),
            _ => {}
        }
    }

    fn apply_remote_format(&mut self, op: &Operation) {
        let op_id = OperationId::new(op.replica_id.clone(), op.logical_clock);
        if self.spans.contains_key(&op_id) {
            return;
        }
        let Some(start_id) = op.payload["start"].as_str().and_then(CharacterId::parse) else { return };
        let Some(end_id) = op.payload["end"].as_str().and_then(CharacterId::parse) else { return };
        let attributes: HashMap<String, Value> =
            serde_json::from_value(op.payload["attributes"].clone()).unwrap_or_default();
        let physical_ms = op.payload["physicalMs"].as_i64().map(PhysicalTime::from_millis).unwrap_or(op.physical_ms);

        self.spans.insert(
            op_id.clone(),
            FormatSpan {
                op_id,
                start: start_id,
                end: end_id,
                attributes,
                deleted: false,
                physical_ms,
                replica_id: op.replica_id.clone(),
            },
        );
        self.vector_clock.observe_replica(op.replica_id.clone(), op.logical_clock);
        self.notify();
    }

    fn apply_remote_clear(&mut self, op: &Operation) {
        let Some(op_ids) = op.payload["opIds"].as_array() else { return };
        let attributes: Option<Vec<String>> =
            serde_json::from_value(op.payload["attributes"].clone()).unwrap_or(None);

        for raw in op_ids {
            let Some(target) = raw.as_str().and_then(OperationId::parse) else { continue };
            let Some(span) = self.spans.get_mut(&target) else { continue };
            match &attributes {
                Some(attrs) => {
                    for attr in attrs {
                        span.attributes.remove(attr);
                    }
                    if span.attributes.is_empty() {
                        span.deleted = true;
                    }
                }
                None => span.deleted = true,
            }
        }
        self.vector_clock.observe_replica(op.replica_id.clone(), op.logical_clock);
        self.notify();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attrs(pairs: &[(&str, Value)]) -> HashMap<String, Value> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn format_then_get_formats_at_covered_position() {
        let mut text = FugueText::new("doc1", ReplicaId::new("a"));
        text.insert(0, "hello").unwrap();

        let mut rich = Peritext::new("doc1", ReplicaId::new("a"));
        rich.format(&text, 0, 5, attrs(&[("bold", Value::Bool(true))])).unwrap();

        assert_eq!(rich.get_formats(&text, 2).get("bold"), Some(&Value::Bool(true)));
    }

    #[test]
    fn zero_length_format_covers_single_character() {
        let mut text = FugueText::new("doc1", ReplicaId::new("a"));
        text.insert(0, "hi").unwrap();

        let mut rich = Peritext::new("doc1", ReplicaId::new("a"));
        rich.format(&text, 1, 1, attrs(&[("bold", Value::Bool(true))])).unwrap();

        assert_eq!(rich.get_formats(&text, 1).get("bold"), Some(&Value::Bool(true)));
        assert!(rich.get_formats(&text, 0).get("bold").is_none());
    }

    #[test]
    fn boundary_formatting_at_document_end() {
        let mut text = FugueText::new("doc1", ReplicaId::new("a"));
        text.insert(0, "hi").unwrap();

        let mut rich = Peritext::new("doc1", ReplicaId::new("a"));
        rich.format(&text, 0, 2, attrs(&[("italic", Value::Bool(true))])).unwrap();
        assert_eq!(rich.get_formats(&text, 0).get("italic"), Some(&Value::Bool(true)));
        assert_eq!(rich.get_formats(&text, 1).get("italic"), Some(&Value::Bool(true)));
    }

    #[test]
    fn unformat_empties_bag_and_removes_span() {
        let mut text = FugueText::new("doc1", ReplicaId::new("a"));
        text.insert(0, "hi").unwrap();

        let mut rich = Peritext::new("doc1", ReplicaId::new("a"));
        rich.format(&text, 0, 2, attrs(&[("bold", Value::Bool(true))])).unwrap();
        rich.unformat(&text, 0, 2, &["bold".to_string()]).unwrap();

        assert!(rich.get_formats(&text, 0).is_empty());
    }

    #[test]
    fn clear_formats_removes_overlapping_spans_even_with_remaining_attrs() {
        let mut text = FugueText::new("doc1", ReplicaId::new("a"));
        text.insert(0, "hi").unwrap();

        let mut rich = Peritext::new("doc1", ReplicaId::new("a"));
        rich.format(&text, 0, 2, attrs(&[("bold", Value::Bool(true)), ("italic", Value::Bool(true))])).unwrap();
        rich.clear_formats(&text, 0, 2).unwrap();

        assert!(rich.get_formats(&text, 0).is_empty());
    }

    #[test]
    fn get_ranges_coalesces_uniformly_formatted_chunks() {
        let mut text = FugueText::new("doc1", ReplicaId::new("a"));
        text.insert(0, "hello world").unwrap();

        let mut rich = Peritext::new("doc1", ReplicaId::new("a"));
        rich.format(&text, 0, 5, attrs(&[("bold", Value::Bool(true))])).unwrap();

        let ranges = rich.get_ranges(&text);
        assert_eq!(ranges[0].0, "hello");
        assert_eq!(ranges[0].1.get("bold"), Some(&Value::Bool(true)));
        assert_eq!(ranges[1].0, " world");
        assert!(ranges[1].1.is_empty());
    }

    #[test]
    fn remote_span_applies_and_is_idempotent() {
        let mut text_a = FugueText::new("doc1", ReplicaId::new("a"));
        let insert_ops = text_a.insert(0, "hi").unwrap();

        let mut text_b = FugueText::new("doc1", ReplicaId::new("b"));
        for op in insert_ops {
            text_b.apply_remote(op);
        }

        let mut rich_a = Peritext::new("doc1", ReplicaId::new("a"));
        let op = rich_a.format(&text_a, 0, 2, attrs(&[("bold", Value::Bool(true))])).unwrap();

        let mut rich_b = Peritext::new("doc1", ReplicaId::new("b"));
        rich_b.apply_remote(&op);
        rich_b.apply_remote(&op);

        assert_eq!(rich_b.get_formats(&text_b, 0).get("bold"), Some(&Value::Bool(true)));
    }

    #[test]
    fn remote_clear_tombstones_the_same_span_on_a_peer() {
        let mut text_a = FugueText::new("doc1", ReplicaId::new("a"));
        let insert_ops = text_a.insert(0, "hi").unwrap();

        let mut text_b = FugueText::new("doc1", ReplicaId::new("b"));
        for op in insert_ops {
            text_b.apply_remote(op);
        }

        let mut rich_a = Peritext::new("doc1", ReplicaId::new("a"));
        let format_op = rich_a.format(&text_a, 0, 2, attrs(&[("bold", Value::Bool(true))])).unwrap();
        let clear_op = rich_a.clear_formats(&text_a, 0, 2).unwrap().expect("a span overlapped the range");

        let mut rich_b = Peritext::new("doc1", ReplicaId::new("b"));
        rich_b.apply_remote(&format_op);
        rich_b.apply_remote(&clear_op);
        rich_b.apply_remote(&clear_op);

        assert!(rich_b.get_formats(&text_b, 0).is_empty());
        assert!(rich_a.get_formats(&text_a, 0).is_empty());
    }

    #[test]
    fn remote_partial_unformat_only_drops_the_named_attribute() {
        let mut text_a = FugueText::new("doc1", ReplicaId::new("a"));
        let insert_ops = text_a.insert(0, "hi").unwrap();

        let mut text_b = FugueText::new("doc1", ReplicaId::new("b"));
        for op in insert_ops {
            text_b.apply_remote(op);
        }

        let mut rich_a = Peritext::new("doc1", ReplicaId::new("a"));
        let format_op = rich_a
            .format(&text_a, 0, 2, attrs(&[("bold", Value::Bool(true)), ("italic", Value::Bool(true))]))
            .unwrap();
        let clear_op = rich_a.unformat(&text_a, 0, 2, &["bold".to_string()]).unwrap().expect("a span overlapped");

        let mut rich_b = Peritext::new("doc1", ReplicaId::new("b"));
        rich_b.apply_remote(&format_op);
        rich_b.apply_remote(&clear_op);

        assert!(rich_b.get_formats(&text_b, 0).get("bold").is_none());
        assert_eq!(rich_b.get_formats(&text_b, 0).get("italic"), Some(&Value::Bool(true)));
    }
}
