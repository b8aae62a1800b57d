//! The client-facing sync manager (§4.G): registers documents, persists and
//! broadcasts local operations, and causally orders incoming ones.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use synckit_crdt::{LwwDocument, Operation, OperationLog};
use synckit_proto::{Message, OperationId, PhysicalTime, VectorClock};
use tracing::{debug, warn};

use crate::error::{SyncKitError, SyncKitResult};
use crate::storage::{log_key, StorageAdapter};
use crate::transport::{ConnectionState, TransportAdapter};

/// The adapter boundary a CRDT document type must implement to be
/// registered with the sync manager (§4.G).
pub trait SyncableDocument: Send + Sync {
    /// The document's id.
    fn document_id(&self) -> String;

    /// Apply a causally-ready remote operation.
    fn apply_remote(&self, op: &Operation);

    /// This document's current vector clock.
    fn get_vector_clock(&self) -> VectorClock;

    /// Force this document's vector clock forward, e.g. after adopting a
    /// snapshot.
    fn set_vector_clock(&self, vc: VectorClock);
}

impl SyncableDocument for Mutex<LwwDocument> {
    fn document_id(&self) -> String {
        self.lock().document_id().to_string()
    }

    fn apply_remote(&self, op: &Operation) {
        self.lock().apply_remote(op);
    }

    fn get_vector_clock(&self) -> VectorClock {
        self.lock().vector_clock().clone()
    }

    fn set_vector_clock(&self, vc: VectorClock) {
        self.lock().set_vector_clock(vc);
    }
}

/// Snapshot of the manager's connectivity and offline-queue health
/// (§4.G `network_status`).
#[derive(Debug, Clone)]
pub struct NetworkStatus {
    /// Current transport lifecycle state, or `Closed` if none is attached.
    pub connection_state: ConnectionState,
    /// Number of operations buffered for replay once reconnected.
    pub queue_size: usize,
    /// Count of operations that exceeded the back-pressure threshold and
    /// were rejected outright, since manager construction.
    pub failed_ops: usize,
    /// Emission timestamp of the oldest still-queued operation.
    pub oldest_op_ts: Option<PhysicalTime>,
}

struct DocumentEntry {
    document: Arc<dyn SyncableDocument>,
    log: Mutex<OperationLog>,
}

type StatusCallback = Box<dyn FnMut(&NetworkStatus) + Send>;

/// Coordinates one or more [`SyncableDocument`]s against a transport and a
/// storage adapter, handling offline queueing and causal ordering (§4.G).
pub struct SyncManager {
    documents: Mutex<HashMap<String, DocumentEntry>>,
    storage: Arc<dyn StorageAdapter>,
    transport: Mutex<Option<Arc<dyn TransportAdapter>>>,
    offline_queue: Mutex<Vec<Operation>>,
    queued_ids: Mutex<HashSet<OperationId>>,
    queue_high_water: usize,
    failed_ops: Mutex<usize>,
    status_subscribers: Mutex<Vec<StatusCallback>>,
}

impl SyncManager {
    /// Build a manager backed by `storage`, with no transport attached yet
    /// and an offline queue bounded by `queue_high_water` operations.
    #[must_use]
    pub fn new(storage: Arc<dyn StorageAdapter>, queue_high_water: usize) -> Self {
        Self {
            documents: Mutex::new(HashMap::new()),
            storage,
            transport: Mutex::new(None),
            offline_queue: Mutex::new(Vec::new()),
            queued_ids: Mutex::new(HashSet::new()),
            queue_high_water,
            failed_ops: Mutex::new(0),
            status_subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Attach (or replace) the transport used to broadcast local operations
    /// and receive remote ones. Triggers an offline-queue flush.
    pub fn set_transport(&self, transport: Arc<dyn TransportAdapter>) {
        *self.transport.lock() = Some(transport);
        self.flush_offline_queue();
        self.notify_status();
    }

    /// Register a document so incoming operations targeting its id can be
    /// delivered to it (§4.G `register_document`).
    pub fn register_document(&self, document: Arc<dyn SyncableDocument>) {
        let id = document.document_id();
        let log = OperationLog::new();
        self.documents.lock().insert(id, DocumentEntry { document, log: Mutex::new(log) });
    }

    /// Inform the server we want `document_id`'s change stream (§4.G
    /// `subscribe_document`). A no-op if no transport is attached yet.
    pub fn subscribe_document(&self, document_id: &str) {
        if let Some(transport) = self.transport.lock().as_ref() {
            let message = Message::Subscribe { document_id: document_id.to_string() };
            if let Err(err) = transport.send(message) {
                warn!(document_id, error = %err, "failed to send subscribe request");
            }
        }
    }

    /// Persist and broadcast a locally-emitted operation, or queue it for
    /// offline replay if no transport is connected (§4.G `push_operation`).
    pub async fn push_operation(&self, op: Operation) -> SyncKitResult<()> {
        self.storage
            .set(&log_key(&op.document_id, &op.id().to_string()), serde_json::to_vec(&op)?)
            .await?;

        let connected = matches!(
            self.transport.lock().as_ref().map(|t| t.state()),
            Some(ConnectionState::Open)
        );

        if connected {
            self.broadcast(&op);
        } else {
            self.enqueue_offline(op)?;
        }

        self.notify_status();
        Ok(())
    }

    fn broadcast(&self, op: &Operation) {
        if let Some(transport) = self.transport.lock().as_ref() {
            let delta = match serde_json::to_value(op) {
                Ok(delta) => delta,
                Err(err) => {
                    warn!(document_id = %op.document_id, error = %err, "failed to serialize operation, dropping broadcast");
                    return;
                }
            };
            let message =
                Message::Delta { document_id: op.document_id.clone(), delta, vector_clock: op.vector_clock.to_wire() };
            if let Err(err) = transport.send(message) {
                warn!(document_id = %op.document_id, error = %err, "broadcast failed, queueing offline");
                let _ = self.enqueue_offline(op.clone());
            }
        }
    }

    fn enqueue_offline(&self, op: Operation) -> SyncKitResult<()> {
        let mut queued_ids = self.queued_ids.lock();
        if !queued_ids.insert(op.id()) {
            return Ok(());
        }
        let mut queue = self.offline_queue.lock();
        if queue.len() >= self.queue_high_water {
            queued_ids.remove(&op.id());
            *self.failed_ops.lock() += 1;
            return Err(SyncKitError::QueueFull { max: self.queue_high_water });
        }
        queue.push(op);
        Ok(())
    }

    /// Replay every queued operation in emission order. The server is
    /// expected to deduplicate by `OperationId` on its side.
    fn flush_offline_queue(&self) {
        let connected = matches!(
            self.transport.lock().as_ref().map(|t| t.state()),
            Some(ConnectionState::Open)
        );
        if !connected {
            return;
        }

        let drained: Vec<Operation> = {
            let mut queue = self.offline_queue.lock();
            std::mem::take(&mut *queue)
        };
        self.queued_ids.lock().clear();

        for op in drained {
            self.broadcast(&op);
        }
    }

    /// Causally order, deliver, and persist an incoming remote operation
    /// (§4.G `on_incoming`). Ops that aren't yet causally ready are buffered
    /// inside the document's operation log until their dependencies land.
    pub fn on_incoming(&self, op: Operation) {
        let documents = self.documents.lock();
        let Some(entry) = documents.get(&op.document_id) else {
            debug!(document_id = %op.document_id, "incoming op for unregistered document, dropped");
            return;
        };

        let ready = entry.log.lock().deliver(op);
        for ready_op in ready {
            entry.document.apply_remote(&ready_op);
        }
        entry.document.set_vector_clock(entry.log.lock().vector_clock().clone());
        drop(documents);
        self.notify_status();
    }

    /// The manager's current connectivity/queue snapshot.
    #[must_use]
    pub fn network_status(&self) -> NetworkStatus {
        let connection_state =
            self.transport.lock().as_ref().map_or(ConnectionState::Closed, |t| t.state());
        let queue = self.offline_queue.lock();
        NetworkStatus {
            connection_state,
            queue_size: queue.len(),
            failed_ops: *self.failed_ops.lock(),
            oldest_op_ts: queue.first().map(|op| op.physical_ms),
        }
    }

    /// Register a callback invoked whenever connectivity or queue depth
    /// changes.
    pub fn on_network_status_change(&self, callback: impl FnMut(&NetworkStatus) + Send + 'static) {
        self.status_subscribers.lock().push(Box::new(callback));
    }

    fn notify_status(&self) {
        let status = self.network_status();
        for cb in &mut *self.status_subscribers.lock() {
            cb(&status);
        }
    }
}
