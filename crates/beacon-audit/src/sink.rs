//! Audit sink backends.
//!
//! This module provides the [`AuditSink`] trait and default implementations.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::record::{AuditAction, AuditLevel, AuditRecord};

/// Trait for audit backends.
///
/// Implement this trait to send audit records to a custom destination
/// (e.g., file, database, event-log service). Sinks are append-only and
/// must never fail the caller.
pub trait AuditSink: Send + Sync {
    /// Appends a record.
    fn record(&self, record: &AuditRecord);

    /// Appends a record if its level is at or above the minimum.
    fn record_if_at_least(&self, record: &AuditRecord, min_level: AuditLevel) {
        if record.level >= min_level {
            self.record(record);
        }
    }
}

impl<S: AuditSink + ?Sized> AuditSink for Arc<S> {
    fn record(&self, record: &AuditRecord) {
        (**self).record(record);
    }
}

/// Audit sink that writes to the `tracing` infrastructure.
///
/// Records are emitted under the `beacon_audit` target at a level chosen by
/// [`AuditLevel`]:
/// - Debug → `tracing::debug!`
/// - Info → `tracing::info!`
/// - Warning → `tracing::warn!`
/// - Error, Critical → `tracing::error!`
#[derive(Debug, Clone, Default)]
pub struct TracingAuditSink {
    /// Optional prefix for all log messages.
    prefix: Option<String>,
}

impl TracingAuditSink {
    /// Creates a new tracing-based audit sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new tracing-based audit sink with a prefix.
    #[must_use]
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: Some(prefix.into()),
        }
    }
}

impl AuditSink for TracingAuditSink {
    fn record(&self, record: &AuditRecord) {
        let event_id = record.event_id;
        let action = record.action_type;
        let level = record.level;
        let timestamp = record.timestamp;
        let description = record.description.as_str();

        let json = record.to_json().unwrap_or_else(|_| "{}".to_string());
        let prefix = self.prefix.as_deref().unwrap_or("AUDIT");

        match level {
            AuditLevel::Debug => {
                tracing::debug!(
                    target: "beacon_audit",
                    %event_id, %action, %level, %timestamp,
                    record_json = %json,
                    "[{prefix}] {action}: {description}"
                );
            }
            AuditLevel::Info => {
                tracing::info!(
                    target: "beacon_audit",
                    %event_id, %action, %level, %timestamp,
                    record_json = %json,
                    "[{prefix}] {action}: {description}"
                );
            }
            AuditLevel::Warning => {
                tracing::warn!(
                    target: "beacon_audit",
                    %event_id, %action, %level, %timestamp,
                    record_json = %json,
                    "[{prefix}] {action}: {description}"
                );
            }
            AuditLevel::Error | AuditLevel::Critical => {
                tracing::error!(
                    target: "beacon_audit",
                    %event_id, %action, %level, %timestamp,
                    record_json = %json,
                    "[{prefix}] {action}: {description}"
                );
            }
        }
    }
}

/// In-memory audit sink.
///
/// Keeps every record in append order. Useful in tests and for hosts that
/// want to expose recent audit history without an external store.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    records: RwLock<Vec<AuditRecord>>,
}

impl MemoryAuditSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of every record, oldest first.
    #[must_use]
    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.read().clone()
    }

    /// Returns the records with the given action type, oldest first.
    #[must_use]
    pub fn by_action(&self, action: AuditAction) -> Vec<AuditRecord> {
        self.records
            .read()
            .iter()
            .filter(|r| r.action_type == action)
            .cloned()
            .collect()
    }

    /// Returns the number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Returns true if no records have been written.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, record: &AuditRecord) {
        self.records.write().push(record.clone());
    }
}

/// A no-op audit sink for disabled scenarios.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopAuditSink;

impl NoopAuditSink {
    /// Creates a new no-op audit sink.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl AuditSink for NoopAuditSink {
    fn record(&self, _record: &AuditRecord) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(level: AuditLevel) -> AuditRecord {
        AuditRecord::new(AuditAction::AlertTriggered, "sample", level)
    }

    #[test]
    fn tracing_sink_creation() {
        let sink = TracingAuditSink::new();
        assert!(sink.prefix.is_none());

        let sink = TracingAuditSink::with_prefix("OPS");
        assert_eq!(sink.prefix, Some("OPS".to_string()));
    }

    #[test]
    fn tracing_sink_handles_every_level() {
        let sink = TracingAuditSink::new();
        for level in [
            AuditLevel::Debug,
            AuditLevel::Info,
            AuditLevel::Warning,
            AuditLevel::Error,
            AuditLevel::Critical,
        ] {
            sink.record(&sample(level));
        }
    }

    #[test]
    fn memory_sink_keeps_append_order() {
        let sink = MemoryAuditSink::new();
        assert!(sink.is_empty());

        sink.record(&sample(AuditLevel::Info).with_metadata("n", 1));
        sink.record(&sample(AuditLevel::Info).with_metadata("n", 2));

        let records = sink.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].metadata["n"], 1);
        assert_eq!(records[1].metadata["n"], 2);
    }

    #[test]
    fn memory_sink_filters_by_action() {
        let sink = MemoryAuditSink::new();
        sink.record(&sample(AuditLevel::Info));
        sink.record(&AuditRecord::new(
            AuditAction::NotificationFailed,
            "boom",
            AuditLevel::Error,
        ));

        assert_eq!(sink.by_action(AuditAction::NotificationFailed).len(), 1);
        assert_eq!(sink.by_action(AuditAction::AlertResolved).len(), 0);
    }

    #[test]
    fn record_if_at_least_filters() {
        let sink = MemoryAuditSink::new();
        sink.record_if_at_least(&sample(AuditLevel::Debug), AuditLevel::Warning);
        sink.record_if_at_least(&sample(AuditLevel::Error), AuditLevel::Warning);
        assert_eq!(sink.len(), 1);
    }

    #[test]
    fn arc_sink_delegates() {
        let inner = Arc::new(MemoryAuditSink::new());
        let shared: Arc<dyn AuditSink> = inner.clone();
        shared.record(&sample(AuditLevel::Info));
        assert_eq!(inner.len(), 1);
    }

    #[test]
    fn noop_sink_does_nothing() {
        NoopAuditSink::new().record(&sample(AuditLevel::Critical));
    }
}
