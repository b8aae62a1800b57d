//! Leader election across co-located replicas of one logical user (§4.K).
//!
//! Modeled as a shared roster rather than a real browser `BroadcastChannel`:
//! every tab/process instance registers itself and deregisters on drop, and
//! leadership is a pure function of the current roster.

use std::sync::{Arc, Mutex};

type BroadcastCallback = Box<dyn FnMut(&serde_json::Value) + Send>;

struct Channel {
    tabs: Vec<String>,
    original_leader: Option<String>,
    subscribers: Vec<BroadcastCallback>,
}

/// A named leader-election channel. Clone to share a handle to the same
/// roster across tasks; the roster itself lives behind an `Arc<Mutex<_>>`.
#[derive(Clone)]
pub struct CrossTabCoordinator {
    tab_id: String,
    channel: Arc<Mutex<Channel>>,
}

impl CrossTabCoordinator {
    /// Join `channel_name` as `tab_id`. The first tab to join a given
    /// channel becomes its leader.
    #[must_use]
    pub fn join(tab_id: impl Into<String>, registry: &CrossTabRegistry) -> Self {
        let tab_id = tab_id.into();
        let channel = registry.channel();
        {
            let mut roster = channel.lock().expect("roster mutex poisoned");
            if roster.original_leader.is_none() {
                roster.original_leader = Some(tab_id.clone());
            }
            roster.tabs.push(tab_id.clone());
        }
        Self { tab_id, channel }
    }

    /// This tab's id.
    #[must_use]
    pub fn tab_id(&self) -> &str {
        &self.tab_id
    }

    /// `true` if this tab currently holds leadership: the first-joined tab,
    /// unless it has departed, in which case the lexicographically smallest
    /// remaining tab id wins (§4.K "Election").
    #[must_use]
    pub fn is_current_leader(&self) -> bool {
        let roster = self.channel.lock().expect("roster mutex poisoned");
        let leader = match &roster.original_leader {
            Some(original) if roster.tabs.contains(original) => Some(original),
            _ => roster.tabs.iter().min(),
        };
        leader.is_some_and(|leader| *leader == self.tab_id)
    }

    /// Broadcast an arbitrary message to every other tab on this channel.
    pub fn broadcast(&self, message: &serde_json::Value) {
        for sub in &mut self.channel.lock().expect("roster mutex poisoned").subscribers {
            sub(message);
        }
    }

    /// Register a callback invoked for every broadcast on this channel
    /// (including this tab's own, mirroring a real `BroadcastChannel`'s
    /// loopback-free semantics is left to the caller if undesired).
    pub fn subscribe(&self, callback: impl FnMut(&serde_json::Value) + Send + 'static) {
        self.channel.lock().expect("roster mutex poisoned").subscribers.push(Box::new(callback));
    }

    /// Voluntarily leave the channel, e.g. on tab close. Leadership
    /// re-elects immediately among the remaining tabs.
    pub fn leave(&self) {
        let mut roster = self.channel.lock().expect("roster mutex poisoned");
        if let Some(pos) = roster.tabs.iter().position(|id| id == &self.tab_id) {
            roster.tabs.remove(pos);
        }
    }
}

/// Owns the shared roster a [`CrossTabCoordinator`] channel is built on.
///
/// In a real client this would be a single `BroadcastChannel` per
/// `channel_name` shared across tabs via the browser; here it is an
/// in-process stand-in with the same election semantics.
#[derive(Clone, Default)]
pub struct CrossTabRegistry {
    channel: Arc<Mutex<Channel>>,
}

impl CrossTabRegistry {
    /// A fresh, empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            channel: Arc::new(Mutex::new(Channel { tabs: Vec::new(), original_leader: None, subscribers: Vec::new() })),
        }
    }

    fn channel(&self) -> Arc<Mutex<Channel>> {
        self.channel.clone()
    }
}
