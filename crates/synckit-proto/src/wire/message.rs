//! The message taxonomy shared by both wire framings (§4.H).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProtocolError;

/// One `{delta, vectorClock}` entry inside a `SYNC_RESPONSE` backlog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeltaEnvelope {
    /// The CRDT-specific delta payload.
    pub delta: Value,
    /// The vector clock at the time this delta was emitted.
    pub vector_clock: HashMap<String, u64>,
}

/// The full message taxonomy. Every variant corresponds to exactly one
/// single-byte type code used by the binary framing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[non_exhaustive]
pub enum Message {
    /// `0x01` C→S: request authentication.
    #[serde(rename_all = "camelCase")]
    Auth {
        /// Bearer token, if using token auth.
        #[serde(skip_serializing_if = "Option::is_none")]
        token: Option<String>,
        /// API key, if using key auth.
        #[serde(skip_serializing_if = "Option::is_none")]
        api_key: Option<String>,
    },
    /// `0x02` S→C: authentication accepted.
    #[serde(rename_all = "camelCase")]
    AuthSuccess {
        /// The authenticated user's id.
        user_id: String,
        /// Permissions granted to the user.
        permissions: Vec<String>,
    },
    /// `0x03` S→C: authentication rejected.
    #[serde(rename_all = "camelCase")]
    AuthError {
        /// Human-readable rejection reason.
        error: String,
    },
    /// `0x10` C→S: subscribe to a document's change stream.
    #[serde(rename_all = "camelCase")]
    Subscribe {
        /// The document to subscribe to.
        document_id: String,
    },
    /// `0x11` C→S: stop receiving a document's change stream.
    #[serde(rename_all = "camelCase")]
    Unsubscribe {
        /// The document to unsubscribe from.
        document_id: String,
    },
    /// `0x12` C→S: request a full or incremental sync.
    #[serde(rename_all = "camelCase")]
    SyncRequest {
        /// The document to sync.
        document_id: String,
        /// The client's current vector clock, if any (omitted for full sync).
        #[serde(skip_serializing_if = "Option::is_none")]
        vector_clock: Option<HashMap<String, u64>>,
    },
    /// `0x13` S→C: reply to a `SyncRequest` with the backlog since `state`.
    #[serde(rename_all = "camelCase")]
    SyncResponse {
        /// Correlates with the originating request.
        request_id: String,
        /// The document being synced.
        document_id: String,
        /// The server's vector clock as of this response.
        state: HashMap<String, u64>,
        /// Deltas the client is missing, in emission order.
        deltas: Vec<DeltaEnvelope>,
    },
    /// `0x20` C↔S: a CRDT operation.
    #[serde(rename_all = "camelCase")]
    Delta {
        /// The document the delta applies to.
        document_id: String,
        /// The CRDT-specific delta payload.
        delta: Value,
        /// The emitting replica's vector clock.
        vector_clock: HashMap<String, u64>,
    },
    /// `0x21` S→C: advisory acknowledgement of a received message.
    #[serde(rename_all = "camelCase")]
    Ack {
        /// The id of the message being acknowledged.
        message_id: String,
    },
    /// `0x30` C↔S: heartbeat probe.
    Ping {},
    /// `0x31` C↔S: heartbeat reply.
    Pong {},
    /// `0x40` C↔S: a client's ephemeral presence state changed.
    #[serde(rename_all = "camelCase")]
    AwarenessUpdate {
        /// The document this presence applies to.
        document_id: String,
        /// The client whose presence changed.
        client_id: String,
        /// Opaque presence payload; `None` means "leaving".
        state: Option<Value>,
        /// The client's monotonic awareness clock.
        clock: u64,
    },
    /// `0x41` C→S: subscribe to a document's awareness channel.
    #[serde(rename_all = "camelCase")]
    AwarenessSubscribe {
        /// The document to subscribe to.
        document_id: String,
    },
    /// `0x42` S→C: full snapshot of a document's awareness states.
    #[serde(rename_all = "camelCase")]
    AwarenessState {
        /// The document this snapshot applies to.
        document_id: String,
        /// Current per-client presence state.
        states: HashMap<String, AwarenessEntryWire>,
    },
    /// `0xFF` S→C: a server-side error unrelated to a specific request.
    #[serde(rename_all = "camelCase")]
    Error {
        /// Human-readable error summary.
        error: String,
        /// Optional machine-readable detail payload.
        #[serde(skip_serializing_if = "Option::is_none")]
        details: Option<Value>,
    },
}

/// Wire shape of one awareness entry inside `AwarenessState`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AwarenessEntryWire {
    /// Opaque presence payload; `None` means "leaving".
    pub state: Option<Value>,
    /// The client's monotonic awareness clock.
    pub clock: u64,
}

impl Message {
    /// The single-byte type code for the binary framing.
    #[must_use]
    pub fn type_code(&self) -> u8 {
        match self {
            Message::Auth { .. } => 0x01,
            Message::AuthSuccess { .. } => 0x02,
            Message::AuthError { .. } => 0x03,
            Message::Subscribe { .. } => 0x10,
            Message::Unsubscribe { .. } => 0x11,
            Message::SyncRequest { .. } => 0x12,
            Message::SyncResponse { .. } => 0x13,
            Message::Delta { .. } => 0x20,
            Message::Ack { .. } => 0x21,
            Message::Ping {} => 0x30,
            Message::Pong {} => 0x31,
            Message::AwarenessUpdate { .. } => 0x40,
            Message::AwarenessSubscribe { .. } => 0x41,
            Message::AwarenessState { .. } => 0x42,
            Message::Error { .. } => 0xFF,
        }
    }

    /// Validate that a decoded message's JSON tag matches the type code the
    /// binary header declared. Used by the binary decoder to catch a header
    /// that disagrees with its own payload.
    pub(crate) fn validate_type_code(&self, declared: u8) -> Result<(), ProtocolError> {
        if self.type_code() == declared {
            Ok(())
        } else {
            Err(ProtocolError::UnknownMessageType(declared))
        }
    }
}
