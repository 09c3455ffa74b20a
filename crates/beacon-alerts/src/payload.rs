//! The transport-neutral notification payload.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{Alert, AlertType, Severity};

/// What every transport renders from. Built per send, never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationPayload {
    /// The alert this payload describes (empty for synthetic payloads).
    pub alert_id: String,
    /// Short title.
    pub title: String,
    /// Message body.
    pub message: String,
    /// Severity.
    pub severity: Severity,
    /// Kind of alert.
    #[serde(rename = "type")]
    pub alert_type: AlertType,
    /// When the payload was built.
    pub timestamp: DateTime<Utc>,
    /// Context copied from the alert.
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    /// Where the recipient can act on the alert.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_url: Option<String>,
}

impl NotificationPayload {
    /// Builds a payload for `alert`.
    ///
    /// The action link is the first alert action carrying a URL, falling back
    /// to `{action_base_url}/alerts/{id}`.
    #[must_use]
    pub fn from_alert(alert: &Alert, action_base_url: Option<&str>, now: DateTime<Utc>) -> Self {
        let action_url = alert
            .actions
            .iter()
            .find_map(|a| a.url.clone())
            .or_else(|| {
                action_base_url
                    .map(|base| format!("{}/alerts/{}", base.trim_end_matches('/'), alert.id))
            });

        Self {
            alert_id: alert.id.clone(),
            title: alert.title.clone(),
            message: alert.message.clone(),
            severity: alert.severity,
            alert_type: alert.alert_type,
            timestamp: now,
            metadata: alert.metadata.clone(),
            action_url,
        }
    }

    /// A synthetic low-severity payload for exercising one channel.
    #[must_use]
    pub fn test(channel_id: &str, now: DateTime<Utc>) -> Self {
        let mut metadata = HashMap::new();
        metadata.insert("test".to_string(), serde_json::Value::Bool(true));
        metadata.insert(
            "channel_id".to_string(),
            serde_json::Value::from(channel_id),
        );

        Self {
            alert_id: String::new(),
            title: "Test notification".to_string(),
            message: format!("Test notification from Beacon for channel '{channel_id}'."),
            severity: Severity::Low,
            alert_type: AlertType::System,
            timestamp: now,
            metadata,
            action_url: None,
        }
    }

    /// Annotates the payload for escalation step `step_index` (zero-based),
    /// which fires `delay_minutes` after the alert was created.
    #[must_use]
    pub fn escalated(mut self, step_index: usize, delay_minutes: u64) -> Self {
        let level = step_index + 1;
        self.title = format!("[ESCALATED - Level {level}] {}", self.title);
        self.message = format!(
            "{}\n\nThis alert has been unresolved for {delay_minutes} minutes.",
            self.message
        );
        self.metadata.insert(
            "escalation_level".to_string(),
            serde_json::Value::from(level),
        );
        self
    }

    /// Title prefixed with the severity, e.g. `[CRITICAL] High memory usage`.
    #[must_use]
    pub fn subject(&self) -> String {
        format!(
            "[{}] {}",
            self.severity.as_str().to_uppercase(),
            self.title
        )
    }
}
