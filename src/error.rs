//! Unified error handling for synckit-server.
//!
//! Centralizes the error taxonomy described by §7: CRDT mutation failures
//! fail fast, storage/transport failures are surfaced through the
//! network-status stream rather than thrown per-operation, and wire-level
//! malformations are a narrower, convertible sub-enum.

use synckit_proto::ProtocolError;
use thiserror::Error;

/// The server's unified error type.
#[derive(Debug, Error)]
pub enum SyncKitError {
    /// An operation was called before the relevant subsystem finished
    /// initializing (e.g. a document accessed before `register_document`).
    #[error("not initialized: {0}")]
    NotInitialized(String),

    /// A text position fell outside `[0, length]`.
    #[error("out of range: {0}")]
    OutOfRange(#[from] synckit_crdt::TextError),

    /// A malformed argument was supplied to a CRDT operation (negative
    /// counter amount, malformed attribute value, etc).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The transport or server rejected a read/write for permission
    /// reasons.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The offline operation queue exceeded its configured bound.
    #[error("offline queue full (max {max})")]
    QueueFull {
        /// The configured bound that was exceeded.
        max: usize,
    },

    /// A storage adapter call failed.
    #[error("storage failure: {0}")]
    StorageFailure(String),

    /// A transport adapter call failed.
    #[error("transport failure: {0}")]
    TransportFailure(String),

    /// A wire-level malformation (§4.H).
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Failed to (de)serialize a payload.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Underlying I/O failure (storage files, transport sockets).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl SyncKitError {
    /// A static error code string for metrics labeling (§10.4).
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::NotInitialized(_) => "not_initialized",
            Self::OutOfRange(_) => "out_of_range",
            Self::InvalidArgument(_) => "invalid_argument",
            Self::Unauthorized(_) => "unauthorized",
            Self::QueueFull { .. } => "queue_full",
            Self::StorageFailure(_) => "storage_failure",
            Self::TransportFailure(_) => "transport_failure",
            Self::Protocol(_) => "protocol_error",
            Self::Serialization(_) => "serialization_error",
            Self::Io(_) => "io_error",
        }
    }

    /// `true` iff this failure is structural (truncated/malformed frame
    /// header) and the connection should be closed rather than merely
    /// logged (§7 "Propagation policy").
    #[must_use]
    pub fn is_connection_fatal(&self) -> bool {
        matches!(self, Self::Protocol(p) if p.is_structural())
    }
}

/// Result type used throughout the server for fallible CRDT-facing calls.
pub type SyncKitResult<T> = Result<T, SyncKitError>;
