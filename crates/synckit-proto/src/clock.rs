//! Logical clocks and causal ordering for distributed CRDT synchronization.
//!
//! This module provides the time primitives every other component builds on:
//! - [`ReplicaId`]: a stable, opaque identifier for a replica.
//! - [`LogicalClock`]: a per-replica monotonic counter.
//! - [`LamportStamp`]: a `(clock, replicaId)` pair used for deterministic LWW ordering.
//! - [`VectorClock`]: tracks causal dependencies across replicas.
//! - [`PhysicalTime`]: wall-clock milliseconds, used only as a tie-breaker.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;

/// A unique, opaque identifier for a replica.
///
/// Stable for the life of a replica. Comparison is lexicographic on the
/// inner string, which is also the deterministic tie-break used throughout
/// the CRDT layer.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct ReplicaId(String);

impl ReplicaId {
    /// Create a replica id from any string-like value.
    ///
    /// # Panics
    ///
    /// Panics if `id` is empty; a `ReplicaId` is defined to be non-empty.
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        assert!(!id.is_empty(), "ReplicaId must not be empty");
        Self(id)
    }

    /// Borrow the inner string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ReplicaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ReplicaId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for ReplicaId {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

/// A per-replica monotonic unsigned counter.
///
/// Incremented once per emitted operation. A 64-bit counter overflowing is
/// treated as a fatal invariant violation, not a recoverable error: it can
/// only happen after billions of operations from a single replica.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, serde::Serialize, serde::Deserialize)]
pub struct LogicalClock(u64);

impl LogicalClock {
    /// The initial value of a fresh clock.
    pub const ZERO: Self = Self(0);

    /// Wrap a raw counter value.
    #[must_use]
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    /// The raw counter value.
    #[must_use]
    pub fn value(&self) -> u64 {
        self.0
    }

    /// Advance the clock by one tick, returning the new value.
    ///
    /// # Panics
    ///
    /// Panics on overflow (§4.A: "overflow of a 64-bit counter is treated as
    /// a fatal invariant violation").
    #[must_use]
    pub fn tick(&self) -> Self {
        Self(self.0.checked_add(1).expect("LogicalClock overflow"))
    }

    /// Return a clock that is at least as advanced as both `self` and `other`.
    #[must_use]
    pub fn merge(&self, other: &Self) -> Self {
        Self(self.0.max(other.0))
    }
}

/// A clock reading, aka Lamport stamp: a `(clock, replicaId)` pair.
///
/// Used as the deterministic total order behind LWW conflict resolution:
/// the stamp with the larger `clock` wins; ties are broken by `replicaId`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct LamportStamp {
    /// The logical clock reading.
    pub clock: LogicalClock,
    /// The replica that produced this stamp.
    pub replica: ReplicaId,
}

impl LamportStamp {
    /// Build a new stamp.
    #[must_use]
    pub fn new(clock: LogicalClock, replica: ReplicaId) -> Self {
        Self { clock, replica }
    }
}

impl PartialOrd for LamportStamp {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for LamportStamp {
    fn cmp(&self, other: &Self) -> Ordering {
        self.clock.cmp(&other.clock).then_with(|| self.replica.cmp(&other.replica))
    }
}

/// `(ReplicaId, LogicalClock)` — globally unique identifier for an operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct OperationId {
    /// Replica that emitted the operation.
    pub replica: ReplicaId,
    /// That replica's logical clock at emission time.
    pub clock: LogicalClock,
}

impl OperationId {
    /// Build a new operation id.
    #[must_use]
    pub fn new(replica: ReplicaId, clock: LogicalClock) -> Self {
        Self { replica, clock }
    }

    /// The emitting replica.
    #[must_use]
    pub fn replica(&self) -> &ReplicaId {
        &self.replica
    }

    /// The replica's logical clock at emission time.
    #[must_use]
    pub fn clock(&self) -> LogicalClock {
        self.clock
    }

    /// Parse the `replica@clock` form produced by [`Display`](fmt::Display).
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        let (replica, clock) = s.rsplit_once('@')?;
        let clock: u64 = clock.parse().ok()?;
        Some(Self::new(ReplicaId::new(replica), LogicalClock::new(clock)))
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.replica, self.clock.value())
    }
}

/// Wall-clock milliseconds since the Unix epoch.
///
/// Used only as an LWW tie-breaker display value and for undo-merge windows;
/// correctness of any algorithm in this crate never depends on clock accuracy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct PhysicalTime(i64);

impl PhysicalTime {
    /// Wrap a raw millisecond value.
    #[must_use]
    pub fn from_millis(ms: i64) -> Self {
        Self(ms)
    }

    /// The current wall-clock time.
    #[must_use]
    pub fn now() -> Self {
        Self(chrono::Utc::now().timestamp_millis())
    }

    /// The raw millisecond value.
    #[must_use]
    pub fn millis(&self) -> i64 {
        self.0
    }
}

/// Result of comparing two [`VectorClock`]s.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CausalOrder {
    /// `self` happened-before `other`.
    Less,
    /// The clocks are identical.
    Equal,
    /// `other` happened-before `self`.
    Greater,
    /// Neither happened-before the other.
    Concurrent,
}

/// A vector clock: `{ReplicaId -> LogicalClock}`, default 0 for unseen replicas.
///
/// Tracks causal dependencies across replicas so that a remote operation can
/// be held back ("buffered") until every operation it causally depends on has
/// already been applied locally.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct VectorClock {
    entries: HashMap<ReplicaId, LogicalClock>,
}

impl VectorClock {
    /// An empty vector clock.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The clock entry for `replica`, or zero if unseen.
    #[must_use]
    pub fn get(&self, replica: &ReplicaId) -> LogicalClock {
        self.entries.get(replica).copied().unwrap_or(LogicalClock::ZERO)
    }

    /// Advance `replica`'s entry to `clock` if `clock` is newer.
    pub fn observe_replica(&mut self, replica: ReplicaId, clock: LogicalClock) {
        let entry = self.entries.entry(replica).or_insert(LogicalClock::ZERO);
        if clock > *entry {
            *entry = clock;
        }
    }

    /// Tick and return the entry for `replica`, advancing it past its
    /// current value. This is `now(replicaId)` from §4.A.
    pub fn tick(&mut self, replica: &ReplicaId) -> LogicalClock {
        let entry = self
            .entries
            .entry(replica.clone())
            .or_insert(LogicalClock::ZERO);
        *entry = entry.tick();
        *entry
    }

    /// Merge another vector clock into this one (pointwise max), then ensure
    /// `replica`'s own slot is strictly greater than it was, as required
    /// before the next emit (§4.A: `observe(remoteClock)`).
    pub fn observe(&mut self, other: &Self, replica: &ReplicaId) {
        for (r, &c) in &other.entries {
            self.observe_replica(r.clone(), c);
        }
        self.tick(replica);
    }

    /// Pointwise max merge without advancing any replica's own slot.
    pub fn merge(&mut self, other: &Self) {
        for (r, &c) in &other.entries {
            self.observe_replica(r.clone(), c);
        }
    }

    /// Causal comparison per §4.A: `Less`/`Equal`/`Greater`/`Concurrent`.
    #[must_use]
    pub fn compare(&self, other: &Self) -> CausalOrder {
        let mut self_greater = false;
        let mut other_greater = false;

        let all_replicas: std::collections::HashSet<&ReplicaId> =
            self.entries.keys().chain(other.entries.keys()).collect();

        for replica in all_replicas {
            let a = self.entries.get(replica).copied().unwrap_or(LogicalClock::ZERO);
            let b = other.entries.get(replica).copied().unwrap_or(LogicalClock::ZERO);
            match a.cmp(&b) {
                Ordering::Greater => self_greater = true,
                Ordering::Less => other_greater = true,
                Ordering::Equal => {}
            }
        }

        match (self_greater, other_greater) {
            (false, false) => CausalOrder::Equal,
            (true, false) => CausalOrder::Greater,
            (false, true) => CausalOrder::Less,
            (true, true) => CausalOrder::Concurrent,
        }
    }

    /// `true` iff `self` happened-before `other`.
    #[must_use]
    pub fn happened_before(&self, other: &Self) -> bool {
        matches!(self.compare(other), CausalOrder::Less)
    }

    /// Iterate over every `(replica, clock)` entry currently tracked.
    pub fn iter(&self) -> impl Iterator<Item = (&ReplicaId, &LogicalClock)> {
        self.entries.iter()
    }

    /// Export the clock as a plain map, for wire encoding.
    #[must_use]
    pub fn to_wire(&self) -> HashMap<String, u64> {
        self.entries
            .iter()
            .map(|(r, c)| (r.as_str().to_string(), c.value()))
            .collect()
    }

    /// Rebuild a vector clock from a wire-encoded map.
    #[must_use]
    pub fn from_wire(map: HashMap<String, u64>) -> Self {
        Self {
            entries: map
                .into_iter()
                .map(|(r, c)| (ReplicaId::new(r), LogicalClock::new(c)))
                .collect(),
        }
    }

    /// `true` iff every entry of `self` is `<=` the corresponding entry of
    /// `other` (i.e. `other` dominates `self` and is therefore causally
    /// ready to absorb an operation stamped with `self`).
    #[must_use]
    pub fn dominates(&self, other: &Self) -> bool {
        matches!(other.compare(self), CausalOrder::Greater | CausalOrder::Equal)
    }
}
