//! # beacon-audit
//!
//! Append-only audit trail for the Beacon alerting engine.
//!
//! Every alert lifecycle transition and every failed delivery is recorded
//! as an [`AuditRecord`] and handed to an [`AuditSink`]. The sink is a
//! pluggable backend; the crate ships a `tracing`-backed sink, an in-memory
//! sink that can be queried, and a no-op sink.
//!
//! ## Features
//!
//! - [`AuditRecord`]: A single append-only record
//! - [`AuditAction`]: What happened (`alert_triggered`, `alert_resolved`, ...)
//! - [`AuditLevel`]: Five-level taxonomy (debug/info/warning/error/critical)
//! - [`AuditSink`]: Pluggable trait for audit backends
//!
//! ## Example
//!
//! ```rust
//! use beacon_audit::{AuditAction, AuditLevel, AuditRecord, AuditSink, MemoryAuditSink};
//!
//! let sink = MemoryAuditSink::new();
//!
//! let record = AuditRecord::new(
//!     AuditAction::AlertResolved,
//!     "alert abc resolved by oncall",
//!     AuditLevel::Info,
//! )
//! .with_metadata("alert_id", "abc");
//!
//! sink.record(&record);
//! assert_eq!(sink.len(), 1);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod record;
pub mod sink;

// Re-export main types
pub use error::{AuditError, Result};
pub use record::{AuditAction, AuditLevel, AuditRecord};
pub use sink::{AuditSink, MemoryAuditSink, NoopAuditSink, TracingAuditSink};
