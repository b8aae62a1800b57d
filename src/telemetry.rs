//! Sync-aware telemetry: structured tracing spans carrying replica/document
//! context (§10.1), so operation handling can be correlated across logs.

#![allow(dead_code)]

use std::time::Instant;
use tracing::{Level, Span, span};

/// Structured trace context for a sync operation.
///
/// Captures the attributes needed to correlate one operation's handling
/// across the sync manager, operation log, and server core.
#[derive(Debug, Clone, Default)]
pub struct SyncTraceContext {
    /// The operation kind (e.g. `"text_insert"`, `"document_set"`).
    pub kind: Option<String>,
    /// The document this operation targets.
    pub document_id: Option<String>,
    /// The emitting replica.
    pub replica_id: Option<String>,
    /// The operation's logical clock, for correlating retries/duplicates.
    pub logical_clock: Option<u64>,
    /// The connection/session this operation arrived on, if any.
    pub connection_id: Option<String>,
}

impl SyncTraceContext {
    /// An empty trace context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the operation kind.
    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    /// Set the target document id.
    pub fn with_document_id(mut self, document_id: impl Into<String>) -> Self {
        self.document_id = Some(document_id.into());
        self
    }

    /// Set the emitting replica id.
    pub fn with_replica_id(mut self, replica_id: impl Into<String>) -> Self {
        self.replica_id = Some(replica_id.into());
        self
    }

    /// Set the operation's logical clock.
    pub fn with_logical_clock(mut self, clock: u64) -> Self {
        self.logical_clock = Some(clock);
        self
    }

    /// Set the originating connection id.
    pub fn with_connection_id(mut self, connection_id: impl Into<String>) -> Self {
        self.connection_id = Some(connection_id.into());
        self
    }

    /// Build a tracing span carrying every set attribute as a field.
    pub fn into_span(self) -> Span {
        let kind = self.kind.as_deref().unwrap_or("unknown");
        span!(
            Level::INFO,
            "sync.operation",
            kind = kind,
            document_id = self.document_id.as_deref(),
            replica_id = self.replica_id.as_deref(),
            logical_clock = self.logical_clock,
            connection_id = self.connection_id.as_deref(),
        )
    }
}

/// Guard that records operation latency and outcome metrics on drop.
pub struct SyncOpTimer {
    kind: String,
    start: Instant,
    error_code: Option<&'static str>,
}

impl SyncOpTimer {
    /// Start timing an operation of the given `kind`.
    pub fn new(kind: impl Into<String>) -> Self {
        Self { kind: kind.into(), start: Instant::now(), error_code: None }
    }

    /// Elapsed time since the timer started.
    pub fn elapsed_secs(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }

    /// Mark the operation as having failed with `error_code`; recorded on
    /// drop instead of a successful-operation sample.
    pub fn record_error(&mut self, error_code: &'static str) {
        self.error_code = Some(error_code);
    }
}

impl Drop for SyncOpTimer {
    fn drop(&mut self) {
        match self.error_code {
            Some(code) => crate::metrics::record_operation_error(code),
            None => crate::metrics::record_operation(&self.kind, self.start.elapsed().as_secs_f64()),
        }
    }
}

/// Convenience constructor combining [`SyncTraceContext`] with span
/// creation, for the common case of tracing one incoming operation.
pub fn create_operation_span(kind: &str, document_id: &str, replica_id: &str) -> Span {
    SyncTraceContext::new().with_kind(kind).with_document_id(document_id).with_replica_id(replica_id).into_span()
}

/// Create a span for awareness channel updates.
pub fn create_awareness_span(document_id: &str, replica_id: &str) -> Span {
    span!(Level::DEBUG, "sync.awareness", document_id = document_id, replica_id = replica_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trace_context_builder_sets_fields() {
        let ctx = SyncTraceContext::new()
            .with_kind("text_insert")
            .with_document_id("doc1")
            .with_replica_id("r1")
            .with_logical_clock(3);

        assert_eq!(ctx.kind.as_deref(), Some("text_insert"));
        assert_eq!(ctx.document_id.as_deref(), Some("doc1"));
        assert_eq!(ctx.replica_id.as_deref(), Some("r1"));
        assert_eq!(ctx.logical_clock, Some(3));
    }

    #[test]
    fn op_timer_records_elapsed_time() {
        let timer = SyncOpTimer::new("text_insert");
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(timer.elapsed_secs() >= 0.005);
    }
}
