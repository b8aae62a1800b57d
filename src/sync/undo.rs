//! Bounded undo/redo stacks with time-windowed merging (§4.J).

use serde::Serialize;
use synckit_proto::PhysicalTime;

use crate::sync::cross_tab::CrossTabCoordinator;

/// One entry on the undo/redo stack: an opaque, caller-defined operation
/// plus the time it was recorded, used only for merge-window comparisons.
#[derive(Debug, Clone)]
pub struct UndoEntry<T> {
    /// The caller's representation of the change (e.g. a CRDT op, or an
    /// application-level description of one).
    pub data: T,
    /// When this entry was recorded.
    pub recorded_at: PhysicalTime,
}

/// Bounded undo/redo stacks over an opaque operation type `T` (§4.J).
///
/// The manager never interprets `T`; inversion is the caller's
/// responsibility once `undo()`/`redo()` hand an entry back.
pub struct UndoManager<T> {
    undo_stack: Vec<UndoEntry<T>>,
    redo_stack: Vec<UndoEntry<T>>,
    max_size: usize,
    merge_window_ms: i64,
    coordinator: Option<CrossTabCoordinator>,
}

impl<T> UndoManager<T> {
    /// Build a manager bounded at `max_size` entries per stack (FIFO at the
    /// bottom) with a `merge_window_ms` merge window (§4.J default: 100 /
    /// 1000ms via [`crate::config::UndoConfig`]).
    #[must_use]
    pub fn new(max_size: usize, merge_window_ms: i64) -> Self {
        Self { undo_stack: Vec::new(), redo_stack: Vec::new(), max_size, merge_window_ms, coordinator: None }
    }

    /// Attach a cross-tab coordinator. `undo()`/`redo()` will broadcast the
    /// popped entry on this channel afterward, so co-located replicas of the
    /// same logical user can converge on the same undo position (§4.J,
    /// core item #7).
    #[must_use]
    pub fn with_coordinator(mut self, coordinator: CrossTabCoordinator) -> Self {
        self.coordinator = Some(coordinator);
        self
    }

    fn broadcast(&self, action: &str, data: &T)
    where
        T: Serialize,
    {
        if let Some(coordinator) = &self.coordinator {
            coordinator.broadcast(&serde_json::json!({"action": action, "data": data}));
        }
    }

    /// Current undo stack depth.
    #[must_use]
    pub fn undo_len(&self) -> usize {
        self.undo_stack.len()
    }

    /// Current redo stack depth.
    #[must_use]
    pub fn redo_len(&self) -> usize {
        self.redo_stack.len()
    }

    /// Append `data` to the undo stack, clearing the redo stack (§4.J
    /// `add`). If `can_merge(prev, &data)` returns `true` and `data` arrived
    /// within `merge_window_ms` of the top entry, the two are merged via
    /// `merge` instead of pushed separately.
    pub fn add(
        &mut self,
        data: T,
        recorded_at: PhysicalTime,
        can_merge: impl FnOnce(&T, &T) -> bool,
        merge: impl FnOnce(T, T) -> T,
    ) {
        self.redo_stack.clear();

        if let Some(top) = self.undo_stack.last() {
            let within_window = recorded_at.millis() - top.recorded_at.millis() <= self.merge_window_ms;
            if within_window && can_merge(&top.data, &data) {
                let top = self.undo_stack.pop().expect("checked above");
                self.undo_stack.push(UndoEntry { data: merge(top.data, data), recorded_at });
                return;
            }
        }

        self.undo_stack.push(UndoEntry { data, recorded_at });
        if self.undo_stack.len() > self.max_size {
            self.undo_stack.remove(0);
        }
    }

    /// Pop the most recent undo entry, pushing it onto the redo stack, and
    /// return it to the caller for inversion (§4.J `undo`).
    pub fn undo(&mut self) -> Option<T>
    where
        T: Clone + Serialize,
    {
        let entry = self.undo_stack.pop()?;
        self.redo_stack.push(entry.clone());
        if self.redo_stack.len() > self.max_size {
            self.redo_stack.remove(0);
        }
        self.broadcast("undo", &entry.data);
        Some(entry.data)
    }

    /// Pop the most recent redo entry, pushing it back onto the undo stack,
    /// and return it to the caller to reapply (§4.J `redo`).
    pub fn redo(&mut self) -> Option<T>
    where
        T: Clone + Serialize,
    {
        let entry = self.redo_stack.pop()?;
        self.undo_stack.push(entry.clone());
        if self.undo_stack.len() > self.max_size {
            self.undo_stack.remove(0);
        }
        self.broadcast("redo", &entry.data);
        Some(entry.data)
    }

    /// Empty both stacks (§4.J `clear`).
    pub fn clear(&mut self) {
        self.undo_stack.clear();
        self.redo_stack.clear();
    }
}
