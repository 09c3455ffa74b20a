//! Audit records for alert lifecycle and delivery events.

use beacon_audit::{AuditAction, AuditLevel, AuditRecord};
use chrono::{DateTime, Utc};

use crate::channels::NotificationChannel;
use crate::error::AlertError;
use crate::payload::NotificationPayload;
use crate::types::Alert;

/// An alert was created. Logged at the level matching its severity.
pub(crate) fn alert_triggered(alert: &Alert) -> AuditRecord {
    AuditRecord::new(
        AuditAction::AlertTriggered,
        format!("alert triggered: {}", alert.title),
        alert.severity.audit_level(),
    )
    .at(alert.created_at)
    .with_metadata("alert_id", alert.id.clone())
    .with_metadata("rule_id", alert.rule_id.clone())
    .with_metadata("severity", alert.severity.as_str())
    .with_metadata("type", alert.alert_type.as_str())
}

/// An alert was resolved, manually or by the auto-resolve check.
pub(crate) fn alert_resolved(alert: &Alert) -> AuditRecord {
    let record = AuditRecord::new(
        AuditAction::AlertResolved,
        format!("alert resolved: {}", alert.title),
        AuditLevel::Info,
    )
    .with_metadata("alert_id", alert.id.clone())
    .with_metadata("rule_id", alert.rule_id.clone())
    .with_metadata(
        "resolved_by",
        alert.resolved_by.clone().unwrap_or_default(),
    );

    match alert.resolved_at {
        Some(at) => record.at(at),
        None => record,
    }
}

/// One channel failed to deliver.
pub(crate) fn notification_failed(
    channel: &NotificationChannel,
    payload: &NotificationPayload,
    error: &AlertError,
    now: DateTime<Utc>,
) -> AuditRecord {
    let payload_json = serde_json::to_value(payload).unwrap_or(serde_json::Value::Null);
    AuditRecord::new(
        AuditAction::NotificationFailed,
        format!("notification via '{}' failed: {error}", channel.id),
        AuditLevel::Error,
    )
    .at(now)
    .with_metadata("channel_id", channel.id.clone())
    .with_metadata("channel_type", channel.channel_type().as_str())
    .with_metadata("error", error.to_string())
    .with_metadata("payload", payload_json)
}

/// A payload reached at least one channel.
pub(crate) fn alert_sent(
    payload: &NotificationPayload,
    channels: &[String],
    now: DateTime<Utc>,
) -> AuditRecord {
    let mut record = AuditRecord::new(
        AuditAction::AlertSent,
        format!(
            "notification '{}' sent to {} channel(s)",
            payload.title,
            channels.len()
        ),
        AuditLevel::Info,
    )
    .at(now)
    .with_metadata("alert_id", payload.alert_id.clone())
    .with_metadata("severity", payload.severity.as_str())
    .with_metadata("channels", channels.to_vec());

    if let Some(level) = payload.metadata.get("escalation_level") {
        record = record.with_metadata("escalation_level", level.clone());
    }
    record
}
