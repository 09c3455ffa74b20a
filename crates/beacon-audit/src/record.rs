//! Audit record types.
//!
//! This module defines the append-only record shape written for every alert
//! lifecycle transition and delivery failure.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AuditError, Result};

/// Five-level severity taxonomy for audit records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum AuditLevel {
    /// Diagnostic detail (e.g., a successful delivery).
    Debug = 0,
    /// Informational event (e.g., an alert was resolved).
    Info = 1,
    /// Something worth a look (e.g., a medium alert fired).
    Warning = 2,
    /// A failure (e.g., a channel delivery failed).
    Error = 3,
    /// A critical alert fired.
    Critical = 4,
}

impl AuditLevel {
    /// Returns the string representation of this level.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for AuditLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The kind of event an audit record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    /// A rule fired and an alert was created.
    AlertTriggered,
    /// An alert was resolved, manually or automatically.
    AlertResolved,
    /// A channel failed to deliver a notification.
    NotificationFailed,
    /// A notification was delivered to one or more channels.
    AlertSent,
}

impl AuditAction {
    /// Returns the wire name of this action.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::AlertTriggered => "alert_triggered",
            Self::AlertResolved => "alert_resolved",
            Self::NotificationFailed => "notification_failed",
            Self::AlertSent => "alert_sent",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for AuditAction {
    type Err = AuditError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "alert_triggered" => Ok(Self::AlertTriggered),
            "alert_resolved" => Ok(Self::AlertResolved),
            "notification_failed" => Ok(Self::NotificationFailed),
            "alert_sent" => Ok(Self::AlertSent),
            other => Err(AuditError::UnknownAction(other.to_string())),
        }
    }
}

/// A single append-only audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Unique record identifier.
    pub event_id: Uuid,
    /// When the event occurred.
    pub timestamp: DateTime<Utc>,
    /// What happened.
    pub action_type: AuditAction,
    /// Human-readable description.
    pub description: String,
    /// Severity of the record.
    pub level: AuditLevel,
    /// Structured context (alert id, channel id, error, payload, ...).
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl AuditRecord {
    /// Creates a record stamped with the current wall-clock time.
    #[must_use]
    pub fn new(action_type: AuditAction, description: impl Into<String>, level: AuditLevel) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            action_type,
            description: description.into(),
            level,
            metadata: HashMap::new(),
        }
    }

    /// Overrides the timestamp.
    #[must_use]
    pub const fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Adds a metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Returns a metadata value as a string, if present and a string.
    #[must_use]
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(serde_json::Value::as_str)
    }

    /// Serializes the record to JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(AuditError::from)
    }
}
