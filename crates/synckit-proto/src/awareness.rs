//! Ephemeral presence channel (§4.I / §3 "Awareness").
//!
//! Unlike the document CRDTs, awareness state is never persisted: it tracks
//! per-client presence (cursors, selections, "who's online") with a simple
//! monotonic-clock discard rule rather than full causal merge.

use std::collections::HashMap;

use serde_json::Value;

use crate::clock::ReplicaId;

/// One client's current presence state.
#[derive(Debug, Clone, PartialEq)]
pub struct AwarenessEntry {
    /// Opaque application-defined presence payload. `None` means the client
    /// has left.
    pub state: Option<Value>,
    /// The client's own monotonic awareness clock.
    pub clock: u64,
}

/// A single document's awareness map: `ReplicaId -> {state, clock}`.
///
/// Updates are accepted only if their clock strictly exceeds the stored
/// clock for that client (§3: "An incoming update with `clock <= stored.clock`
/// is discarded").
#[derive(Debug, Clone, Default)]
pub struct Awareness {
    entries: HashMap<ReplicaId, AwarenessEntry>,
    local_clock: u64,
}

/// The outcome of applying a remote or local awareness update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The update was newer than the stored state and was applied.
    Applied,
    /// The update's clock did not exceed the stored clock; discarded.
    Stale,
}

impl Awareness {
    /// An empty awareness map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current presence state for `replica`, if any.
    #[must_use]
    pub fn get(&self, replica: &ReplicaId) -> Option<&AwarenessEntry> {
        self.entries.get(replica)
    }

    /// All current (non-left) presence states.
    pub fn states(&self) -> impl Iterator<Item = (&ReplicaId, &AwarenessEntry)> {
        self.entries.iter().filter(|(_, e)| e.state.is_some())
    }

    /// Set this replica's own local state, incrementing its awareness clock.
    /// Returns the update that should be broadcast as `AWARENESS_UPDATE`.
    pub fn set_local(&mut self, replica: ReplicaId, state: Value) -> AwarenessEntry {
        self.local_clock += 1;
        let entry = AwarenessEntry {
            state: Some(state),
            clock: self.local_clock,
        };
        self.entries.insert(replica, entry.clone());
        entry
    }

    /// Apply an incoming update (local or remote). Discards stale updates
    /// per the monotonic-clock rule.
    pub fn apply(&mut self, replica: ReplicaId, update: AwarenessEntry) -> ApplyOutcome {
        let is_newer = match self.entries.get(&replica) {
            Some(stored) => update.clock > stored.clock,
            None => true,
        };

        if is_newer {
            self.entries.insert(replica, update);
            ApplyOutcome::Applied
        } else {
            ApplyOutcome::Stale
        }
    }

    /// Emit a "leaving" update for `replica`: `state = null` with an
    /// incremented clock, per §4.I `create_leave()`.
    pub fn create_leave(&mut self, replica: &ReplicaId) -> Option<AwarenessEntry> {
        let clock = self.entries.get(replica)?.clock + 1;
        let entry = AwarenessEntry { state: None, clock };
        self.entries.insert(replica.clone(), entry.clone());
        Some(entry)
    }
}
