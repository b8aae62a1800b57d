//! Server core (§4.L): per-document authoritative state, `DELTA`/awareness
//! handling, and broadcast to subscribers.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use synckit_crdt::{LwwDocument, OpKind, Operation};
use synckit_proto::{ApplyOutcome, Awareness, AwarenessEntry, AwarenessEntryWire, LamportStamp, Message, ReplicaId};
use tracing::{debug, warn};

use crate::auth::AuthGuard;
use crate::error::{SyncKitError, SyncKitResult};
use crate::metrics;
use crate::storage::{awareness_key, log_key, StorageAdapter};
use crate::telemetry::create_operation_span;
use crate::transport::TransportAdapter;

/// Whether a registered document is resolved server-side (LWW) or merely
/// relayed verbatim because the CRDT itself guarantees convergence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    /// Field-granular LWW document: the server computes the authoritative
    /// post-merge value and broadcasts it to every subscriber, sender
    /// included (§4.L step 4).
    Lww,
    /// Text, rich-text, counter, or set ops: commutative and idempotent, so
    /// the server relays verbatim, excluding the sender.
    CrdtIntrinsic,
}

/// An inter-instance broadcast bus (§4.L "Pub/sub"): when a document's
/// subscribers are spread across server instances, an implementation
/// replays local broadcasts to every other instance and vice versa.
///
/// No concrete backend ships with this crate; production deployments
/// supply their own (Redis, NATS, or similar).
pub trait RedisPubSub: Send + Sync {
    /// Publish a message to every other instance subscribed to `document_id`.
    fn publish(&self, document_id: &str, message: &Message) -> SyncKitResult<()>;

    /// This instance gained its first local subscriber for `document_id`.
    fn subscribe(&self, document_id: &str);

    /// This instance lost its last local subscriber for `document_id`.
    fn unsubscribe(&self, document_id: &str);
}

struct DocumentState {
    kind: DocumentKind,
    lww: Mutex<Option<LwwDocument>>,
    awareness: Mutex<Awareness>,
    subscribers: Mutex<HashMap<String, Arc<dyn TransportAdapter>>>,
}

/// Central per-process document registry, wired to a storage adapter, an
/// `AuthGuard`, and optionally an inter-instance pub/sub bus (§4.L).
pub struct ServerCore {
    documents: Mutex<HashMap<String, Arc<DocumentState>>>,
    storage: Arc<dyn StorageAdapter>,
    auth: Arc<dyn AuthGuard>,
    bus: Option<Arc<dyn RedisPubSub>>,
}

impl ServerCore {
    /// Build a core backed by `storage` and `auth`, with no inter-instance
    /// bus attached.
    #[must_use]
    pub fn new(storage: Arc<dyn StorageAdapter>, auth: Arc<dyn AuthGuard>) -> Self {
        Self { documents: Mutex::new(HashMap::new()), storage, auth, bus: None }
    }

    /// Attach an inter-instance pub/sub bus.
    #[must_use]
    pub fn with_bus(mut self, bus: Arc<dyn RedisPubSub>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Register `document_id` as `kind` if it isn't already known. Idempotent.
    pub fn register_document(&self, document_id: &str, kind: DocumentKind) {
        let mut documents = self.documents.lock();
        documents.entry(document_id.to_string()).or_insert_with(|| {
            let lww = match kind {
                DocumentKind::Lww => Some(LwwDocument::new(document_id, ReplicaId::new("server"))),
                DocumentKind::CrdtIntrinsic => None,
            };
            Arc::new(DocumentState {
                kind,
                lww: Mutex::new(lww),
                awareness: Mutex::new(Awareness::new()),
                subscribers: Mutex::new(HashMap::new()),
            })
        });
    }

    fn document(&self, document_id: &str) -> SyncKitResult<Arc<DocumentState>> {
        self.documents
            .lock()
            .get(document_id)
            .cloned()
            .ok_or_else(|| SyncKitError::NotInitialized(document_id.to_string()))
    }

    /// Subscribe `connection_id`'s transport to `document_id`'s change
    /// stream. The first local subscriber triggers a bus subscription
    /// (§4.L "Pub/sub").
    pub fn subscribe(
        &self,
        document_id: &str,
        connection_id: &str,
        transport: Arc<dyn TransportAdapter>,
    ) -> SyncKitResult<()> {
        let doc = self.document(document_id)?;
        let mut subscribers = doc.subscribers.lock();
        let was_empty = subscribers.is_empty();
        subscribers.insert(connection_id.to_string(), transport);
        drop(subscribers);

        if was_empty {
            if let Some(bus) = &self.bus {
                bus.subscribe(document_id);
            }
            metrics::ACTIVE_DOCUMENTS.inc();
        }
        Ok(())
    }

    /// Remove `connection_id` from `document_id`'s subscriber set. The last
    /// local subscriber leaving triggers a bus unsubscription.
    pub fn unsubscribe(&self, document_id: &str, connection_id: &str) -> SyncKitResult<()> {
        let doc = self.document(document_id)?;
        let mut subscribers = doc.subscribers.lock();
        subscribers.remove(connection_id);
        let now_empty = subscribers.is_empty();
        drop(subscribers);

        if now_empty {
            if let Some(bus) = &self.bus {
                bus.unsubscribe(document_id);
            }
            metrics::ACTIVE_DOCUMENTS.dec();
        }
        Ok(())
    }

    fn broadcast(&self, doc: &DocumentState, document_id: &str, message: &Message, exclude: Option<&str>) {
        for (connection_id, transport) in doc.subscribers.lock().iter() {
            if Some(connection_id.as_str()) == exclude {
                continue;
            }
            if let Err(err) = transport.send(message.clone()) {
                warn!(connection_id, document_id, error = %err, "broadcast send failed");
            }
        }
        if let Some(bus) = &self.bus {
            if let Err(err) = bus.publish(document_id, message) {
                warn!(document_id, error = %err, "inter-instance publish failed");
            }
        }
    }

    /// Handle an incoming `DELTA` from `sender_connection_id` owned by
    /// `user` (§4.L steps 1-5).
    pub async fn handle_delta(
        &self,
        user: &str,
        sender_connection_id: &str,
        document_id: &str,
        delta: &serde_json::Value,
    ) -> SyncKitResult<Message> {
        let _span = create_operation_span("delta", document_id, user).entered();

        if !self.auth.can_write(user, document_id) {
            metrics::record_operation_error("unauthorized");
            return Err(SyncKitError::Unauthorized(format!("{user} cannot write {document_id}")));
        }

        let op: Operation = serde_json::from_value(delta.clone())?;
        let doc = self.document(document_id)?;

        self.storage.set(&log_key(document_id, &op.id().to_string()), serde_json::to_vec(&op)?).await?;

        let (broadcast_op, exclude) = match doc.kind {
            DocumentKind::Lww => {
                let mut lww_guard = doc.lww.lock();
                let lww = lww_guard.as_mut().expect("Lww documents always carry a document");
                lww.apply_remote(&op);

                let key = op.payload["key"].as_str().unwrap_or_default().to_string();
                let (value, stamp, deleted) =
                    lww.field_entry(&key).expect("just-applied key is present");
                let authoritative = authoritative_op(document_id, &key, value, stamp, deleted, lww.vector_clock().clone());
                (authoritative, None)
            }
            DocumentKind::CrdtIntrinsic => (op.clone(), Some(sender_connection_id)),
        };

        let message = Message::Delta {
            document_id: document_id.to_string(),
            delta: serde_json::to_value(&broadcast_op)?,
            vector_clock: broadcast_op.vector_clock.to_wire(),
        };
        self.broadcast(&doc, document_id, &message, exclude);
        metrics::OPS_APPLIED.inc();

        Ok(Message::Ack { message_id: op.id().to_string() })
    }

    /// Handle an incoming `AWARENESS_UPDATE`, applying the monotonic-clock
    /// rule and broadcasting to every subscriber except the sender (§4.I,
    /// §4.L). Awareness is never persisted.
    pub fn handle_awareness_update(
        &self,
        user: &str,
        sender_connection_id: &str,
        document_id: &str,
        client_id: &str,
        state: Option<serde_json::Value>,
        clock: u64,
    ) -> SyncKitResult<()> {
        if !self.auth.can_awareness(user) {
            return Err(SyncKitError::Unauthorized(format!("{user} cannot publish awareness")));
        }

        let doc = self.document(document_id)?;
        let replica = ReplicaId::new(client_id);
        let outcome = doc.awareness.lock().apply(replica, AwarenessEntry { state: state.clone(), clock });

        match outcome {
            ApplyOutcome::Applied => {
                let message = Message::AwarenessUpdate {
                    document_id: document_id.to_string(),
                    client_id: client_id.to_string(),
                    state,
                    clock,
                };
                self.broadcast(&doc, document_id, &message, Some(sender_connection_id));
                Ok(())
            }
            ApplyOutcome::Stale => {
                debug!(document_id, client_id, "stale awareness update dropped");
                metrics::AWARENESS_STALE_DROPPED.inc();
                Ok(())
            }
        }
    }

    /// Build an `AWARENESS_STATE` snapshot for `document_id`.
    pub fn awareness_snapshot(&self, document_id: &str) -> SyncKitResult<Message> {
        let doc = self.document(document_id)?;
        let states: HashMap<String, AwarenessEntryWire> = doc
            .awareness
            .lock()
            .states()
            .map(|(replica, entry)| {
                (replica.as_str().to_string(), AwarenessEntryWire { state: entry.state.clone(), clock: entry.clock })
            })
            .collect();

        Ok(Message::AwarenessState { document_id: document_id.to_string(), states })
    }
}

fn authoritative_op(
    document_id: &str,
    key: &str,
    value: serde_json::Value,
    stamp: LamportStamp,
    deleted: bool,
    vector_clock: synckit_proto::VectorClock,
) -> Operation {
    let stamp_json = serde_json::json!({"clock": stamp.clock.value(), "replicaId": stamp.replica.as_str()});
    let (kind, payload) = if deleted {
        (OpKind::DocumentDelete, serde_json::json!({"key": key, "stamp": stamp_json}))
    } else {
        (OpKind::DocumentSet, serde_json::json!({"key": key, "value": value, "stamp": stamp_json}))
    };
    Operation {
        kind,
        document_id: document_id.to_string(),
        replica_id: stamp.replica,
        logical_clock: stamp.clock,
        vector_clock,
        physical_ms: synckit_proto::PhysicalTime::now(),
        payload,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AllowAll;
    use crate::storage::MemoryStorage;
    use crate::transport::ConnectionState;

    struct RecordingTransport {
        received: Mutex<Vec<Message>>,
    }

    impl TransportAdapter for RecordingTransport {
        fn send(&self, message: Message) -> SyncKitResult<()> {
            self.received.lock().push(message);
            Ok(())
        }
        fn on_message(&self, _callback: Box<dyn FnMut(Message) + Send>) {}
        fn on_open(&self, _callback: Box<dyn FnMut() + Send>) {}
        fn on_close(&self, _callback: Box<dyn FnMut() + Send>) {}
        fn state(&self) -> ConnectionState {
            ConnectionState::Open
        }
        fn close(&self) {}
    }

    fn lww_delta_message(key: &str, value: serde_json::Value, replica: &str, clock: u64) -> serde_json::Value {
        let op = Operation {
            kind: OpKind::DocumentSet,
            document_id: "doc1".to_string(),
            replica_id: ReplicaId::new(replica),
            logical_clock: synckit_proto::LogicalClock::new(clock),
            vector_clock: synckit_proto::VectorClock::new(),
            physical_ms: synckit_proto::PhysicalTime::from_millis(clock as i64),
            payload: serde_json::json!({"key": key, "value": value}),
        };
        serde_json::to_value(&op).unwrap()
    }

    #[tokio::test]
    async fn delta_is_broadcast_to_sender_and_others_for_lww_documents() {
        let core = ServerCore::new(Arc::new(MemoryStorage::new()), Arc::new(AllowAll));
        core.register_document("doc1", DocumentKind::Lww);

        let sender = Arc::new(RecordingTransport { received: Mutex::new(Vec::new()) });
        let other = Arc::new(RecordingTransport { received: Mutex::new(Vec::new()) });
        core.subscribe("doc1", "sender", sender.clone()).unwrap();
        core.subscribe("doc1", "other", other.clone()).unwrap();

        let delta = lww_delta_message("title", serde_json::json!("hello"), "a", 1);
        core.handle_delta("user1", "sender", "doc1", &delta).await.unwrap();

        assert_eq!(sender.received.lock().len(), 1);
        assert_eq!(other.received.lock().len(), 1);
    }

    #[tokio::test]
    async fn crdt_intrinsic_delta_excludes_the_sender() {
        let core = ServerCore::new(Arc::new(MemoryStorage::new()), Arc::new(AllowAll));
        core.register_document("doc1", DocumentKind::CrdtIntrinsic);

        let sender = Arc::new(RecordingTransport { received: Mutex::new(Vec::new()) });
        let other = Arc::new(RecordingTransport { received: Mutex::new(Vec::new()) });
        core.subscribe("doc1", "sender", sender.clone()).unwrap();
        core.subscribe("doc1", "other", other.clone()).unwrap();

        let delta = lww_delta_message("ignored", serde_json::json!(null), "a", 1);
        core.handle_delta("user1", "sender", "doc1", &delta).await.unwrap();

        assert_eq!(sender.received.lock().len(), 0);
        assert_eq!(other.received.lock().len(), 1);
    }

    #[tokio::test]
    async fn unauthorized_write_is_rejected() {
        struct DenyAll;
        impl AuthGuard for DenyAll {
            fn can_read(&self, _: &str, _: &str) -> bool {
                true
            }
            fn can_write(&self, _: &str, _: &str) -> bool {
                false
            }
            fn can_awareness(&self, _: &str) -> bool {
                true
            }
        }

        let core = ServerCore::new(Arc::new(MemoryStorage::new()), Arc::new(DenyAll));
        core.register_document("doc1", DocumentKind::Lww);
        let delta = lww_delta_message("title", serde_json::json!("x"), "a", 1);

        let err = core.handle_delta("user1", "sender", "doc1", &delta).await.unwrap_err();
        assert!(matches!(err, SyncKitError::Unauthorized(_)));
    }

    #[test]
    fn awareness_update_broadcasts_excluding_sender() {
        let core = ServerCore::new(Arc::new(MemoryStorage::new()), Arc::new(AllowAll));
        core.register_document("doc1", DocumentKind::Lww);

        let sender = Arc::new(RecordingTransport { received: Mutex::new(Vec::new()) });
        let other = Arc::new(RecordingTransport { received: Mutex::new(Vec::new()) });
        core.subscribe("doc1", "sender", sender.clone()).unwrap();
        core.subscribe("doc1", "other", other.clone()).unwrap();

        core.handle_awareness_update("user1", "sender", "doc1", "client-a", Some(serde_json::json!({"cursor": 1})), 1)
            .unwrap();

        assert_eq!(sender.received.lock().len(), 0);
        assert_eq!(other.received.lock().len(), 1);
    }

    #[test]
    fn stale_awareness_update_is_dropped() {
        let core = ServerCore::new(Arc::new(MemoryStorage::new()), Arc::new(AllowAll));
        core.register_document("doc1", DocumentKind::Lww);
        let other = Arc::new(RecordingTransport { received: Mutex::new(Vec::new()) });
        core.subscribe("doc1", "other", other.clone()).unwrap();

        core.handle_awareness_update("user1", "sender", "doc1", "client-a", Some(serde_json::json!(1)), 5).unwrap();
        core.handle_awareness_update("user1", "sender", "doc1", "client-a", Some(serde_json::json!(2)), 3).unwrap();

        assert_eq!(other.received.lock().len(), 1);
    }

    #[tokio::test]
    async fn unsubscribe_removes_the_connection() {
        let core = ServerCore::new(Arc::new(MemoryStorage::new()), Arc::new(AllowAll));
        core.register_document("doc1", DocumentKind::Lww);
        let sender = Arc::new(RecordingTransport { received: Mutex::new(Vec::new()) });
        core.subscribe("doc1", "sender", sender.clone()).unwrap();
        core.unsubscribe("doc1", "sender").unwrap();

        let delta = lww_delta_message("title", serde_json::json!("x"), "a", 1);
        core.handle_delta("user1", "ghost", "doc1", &delta).await.unwrap();
        assert_eq!(sender.received.lock().len(), 0);
    }
}
