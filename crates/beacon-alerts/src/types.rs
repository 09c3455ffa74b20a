//! Core types for the alerting engine.
//!
//! This module provides the fundamental types used throughout the crate:
//! - [`Severity`]: The ordered severity of an alert
//! - [`AlertType`]: What kind of signal raised the alert
//! - [`ComparisonOperator`] and [`ThresholdCondition`]: Declarative metric checks
//! - [`Condition`]: A predicate over a merged metrics snapshot
//! - [`AlertRule`]: A named condition plus its trigger policy
//! - [`Alert`]: A materialized alert record

use std::collections::HashMap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Duration;

use beacon_audit::AuditLevel;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AlertError, Result};
use crate::metrics::MetricsSnapshot;

/// The severity of an alert. Ordered `Low < Medium < High < Critical`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Worth knowing, no action required.
    Low,
    /// Should be looked at during working hours.
    Medium,
    /// Needs attention soon.
    High,
    /// Needs attention now.
    Critical,
}

impl Severity {
    /// Every severity, lowest first.
    pub const ALL: [Self; 4] = [Self::Low, Self::Medium, Self::High, Self::Critical];

    /// Returns the severity as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    /// Attachment colour used by chat transports.
    #[must_use]
    pub const fn color(&self) -> &'static str {
        match self {
            Self::Low => "#36a64f",
            Self::Medium => "#ffcc00",
            Self::High => "#ff9900",
            Self::Critical => "#ff0000",
        }
    }

    /// Audit level used when an alert of this severity fires.
    #[must_use]
    pub const fn audit_level(&self) -> AuditLevel {
        match self {
            Self::Low => AuditLevel::Info,
            Self::Medium => AuditLevel::Warning,
            Self::High => AuditLevel::Error,
            Self::Critical => AuditLevel::Critical,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The kind of signal that raised an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    /// Latency, throughput or error-rate regression.
    Performance,
    /// Statistical anomaly in a metric.
    Anomaly,
    /// Model quality drifting from its baseline.
    ModelDrift,
    /// Host or infrastructure resource pressure.
    System,
    /// Business KPI out of range.
    Business,
}

impl AlertType {
    /// Returns the type as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Performance => "performance",
            Self::Anomaly => "anomaly",
            Self::ModelDrift => "model_drift",
            Self::System => "system",
            Self::Business => "business",
        }
    }
}

impl fmt::Display for AlertType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A named follow-up attached to an alert (e.g. "view dashboard").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertAction {
    /// Handler name.
    pub name: String,
    /// Link the handler opens, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl AlertAction {
    /// Creates an action without a link.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: None,
        }
    }

    /// Creates an action with a link.
    #[must_use]
    pub fn link(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: Some(url.into()),
        }
    }
}

/// Comparison operators for threshold conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ComparisonOperator {
    /// Greater than (>).
    #[serde(rename = ">")]
    GreaterThan,
    /// Greater than or equal (>=).
    #[serde(rename = ">=")]
    GreaterThanOrEqual,
    /// Less than (<).
    #[serde(rename = "<")]
    LessThan,
    /// Less than or equal (<=).
    #[serde(rename = "<=")]
    LessThanOrEqual,
    /// Equal (==).
    #[serde(rename = "==")]
    Equal,
    /// Not equal (!=).
    #[serde(rename = "!=")]
    NotEqual,
}

impl ComparisonOperator {
    /// Whether `value <op> threshold` holds. Equality is within `f64::EPSILON`;
    /// a NaN value only satisfies `!=`.
    #[must_use]
    pub fn holds(self, value: f64, threshold: f64) -> bool {
        let close = (value - threshold).abs() < f64::EPSILON;
        match self {
            Self::Equal => close,
            Self::NotEqual => !close,
            Self::GreaterThan => value > threshold,
            Self::LessThan => value < threshold,
            Self::GreaterThanOrEqual => value > threshold || close,
            Self::LessThanOrEqual => value < threshold || close,
        }
    }

    /// The symbol used in config files and descriptions.
    #[must_use]
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Equal => "==",
            Self::NotEqual => "!=",
            Self::GreaterThan => ">",
            Self::LessThan => "<",
            Self::GreaterThanOrEqual => ">=",
            Self::LessThanOrEqual => "<=",
        }
    }
}

impl fmt::Display for ComparisonOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Compares one metric in the snapshot against a fixed threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdCondition {
    /// The metric to read.
    pub metric: String,
    /// The comparison operator.
    pub operator: ComparisonOperator,
    /// The value to compare against.
    pub threshold: f64,
}

impl ThresholdCondition {
    /// Creates a threshold condition.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::InvalidRule` if the metric name is empty or the
    /// threshold is not finite.
    pub fn new(
        metric: impl Into<String>,
        operator: ComparisonOperator,
        threshold: f64,
    ) -> Result<Self> {
        let metric = metric.into();
        if metric.is_empty() {
            return Err(AlertError::InvalidRule {
                reason: "metric name cannot be empty".to_string(),
            });
        }
        if !threshold.is_finite() {
            return Err(AlertError::InvalidRule {
                reason: format!("threshold for '{metric}' must be finite"),
            });
        }

        Ok(Self {
            metric,
            operator,
            threshold,
        })
    }

    /// Evaluates against a snapshot. A missing metric is an error.
    pub fn evaluate(&self, snapshot: &MetricsSnapshot) -> Result<bool> {
        let value = snapshot
            .get(&self.metric)
            .ok_or_else(|| AlertError::condition(format!("metric not found: {}", self.metric)))?;
        Ok(self.operator.holds(value, self.threshold))
    }
}

impl fmt::Display for ThresholdCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.metric, self.operator, self.threshold)
    }
}

/// A caller-supplied predicate over a metrics snapshot.
pub type MetricPredicate = Arc<dyn Fn(&MetricsSnapshot) -> Result<bool> + Send + Sync>;

/// A predicate over a merged metrics snapshot.
#[derive(Clone)]
pub enum Condition {
    /// A single metric threshold.
    Threshold(ThresholdCondition),
    /// True when every inner condition is true.
    All(Vec<Condition>),
    /// True when any inner condition is true.
    Any(Vec<Condition>),
    /// Arbitrary code.
    Predicate(MetricPredicate),
}

impl Condition {
    /// Shorthand for a threshold condition.
    ///
    /// # Errors
    ///
    /// See [`ThresholdCondition::new`].
    pub fn threshold(
        metric: impl Into<String>,
        operator: ComparisonOperator,
        threshold: f64,
    ) -> Result<Self> {
        ThresholdCondition::new(metric, operator, threshold).map(Self::Threshold)
    }

    /// Wraps a closure as a condition.
    pub fn predicate<F>(f: F) -> Self
    where
        F: Fn(&MetricsSnapshot) -> Result<bool> + Send + Sync + 'static,
    {
        Self::Predicate(Arc::new(f))
    }

    /// Evaluates the condition.
    ///
    /// A panicking predicate is reported as an error rather than unwinding
    /// into the caller.
    pub fn evaluate(&self, snapshot: &MetricsSnapshot) -> Result<bool> {
        match self {
            Self::Threshold(t) => t.evaluate(snapshot),
            Self::All(conditions) => {
                for c in conditions {
                    if !c.evaluate(snapshot)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Self::Any(conditions) => {
                for c in conditions {
                    if c.evaluate(snapshot)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Self::Predicate(f) => catch_unwind(AssertUnwindSafe(|| f(snapshot)))
                .unwrap_or_else(|_| Err(AlertError::condition("predicate panicked"))),
        }
    }

    /// Names of the metrics referenced by threshold conditions.
    #[must_use]
    pub fn metrics(&self) -> Vec<&str> {
        match self {
            Self::Threshold(t) => vec![t.metric.as_str()],
            Self::All(conditions) | Self::Any(conditions) => {
                conditions.iter().flat_map(Self::metrics).collect()
            }
            Self::Predicate(_) => Vec::new(),
        }
    }
}

impl fmt::Debug for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Threshold(t) => f.debug_tuple("Threshold").field(t).finish(),
            Self::All(c) => f.debug_tuple("All").field(c).finish(),
            Self::Any(c) => f.debug_tuple("Any").field(c).finish(),
            Self::Predicate(_) => f.write_str("Predicate(<fn>)"),
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Threshold(t) => write!(f, "{t}"),
            Self::All(c) => write_joined(f, c, "&&"),
            Self::Any(c) => write_joined(f, c, "||"),
            Self::Predicate(_) => write!(f, "<predicate>"),
        }
    }
}

fn write_joined(f: &mut fmt::Formatter<'_>, parts: &[Condition], sep: &str) -> fmt::Result {
    write!(f, "(")?;
    for (i, c) in parts.iter().enumerate() {
        if i > 0 {
            write!(f, " {sep} ")?;
        }
        write!(f, "{c}")?;
    }
    write!(f, ")")
}

/// A named condition plus the policy for turning it into alerts.
#[derive(Debug, Clone)]
pub struct AlertRule {
    /// Unique identifier for the rule.
    pub id: String,
    /// Human-readable name, used as the alert title.
    pub name: String,
    /// Message body for alerts raised by this rule.
    pub description: String,
    /// Kind of alert this rule raises.
    pub alert_type: AlertType,
    /// The condition that triggers this rule.
    pub condition: Condition,
    /// The severity of alerts generated by this rule.
    pub severity: Severity,
    /// Minimum time between two triggers of this rule.
    pub cooldown: Duration,
    /// Whether to re-check the condition one cooldown after triggering and
    /// resolve the alert if it no longer holds.
    pub auto_resolve: bool,
    /// Actions copied onto every alert.
    pub actions: Vec<AlertAction>,
    /// Escalation policy to schedule for alerts raised by this rule.
    pub escalation_policy: Option<String>,
    /// Whether this rule is evaluated at all.
    pub enabled: bool,
}

impl AlertRule {
    /// Maximum allowed length for rule ids and names.
    pub const MAX_NAME_LENGTH: usize = 256;

    /// Creates a new alert rule builder.
    pub fn builder(id: impl Into<String>, condition: Condition) -> AlertRuleBuilder {
        AlertRuleBuilder::new(id, condition)
    }
}

/// Builder for creating [`AlertRule`] instances.
#[derive(Debug)]
pub struct AlertRuleBuilder {
    id: String,
    name: Option<String>,
    description: Option<String>,
    alert_type: AlertType,
    condition: Condition,
    severity: Severity,
    cooldown: Duration,
    auto_resolve: bool,
    actions: Vec<AlertAction>,
    escalation_policy: Option<String>,
    enabled: bool,
}

impl AlertRuleBuilder {
    fn new(id: impl Into<String>, condition: Condition) -> Self {
        Self {
            id: id.into(),
            name: None,
            description: None,
            alert_type: AlertType::System,
            condition,
            severity: Severity::Medium,
            cooldown: Duration::from_secs(300),
            auto_resolve: false,
            actions: Vec::new(),
            escalation_policy: None,
            enabled: true,
        }
    }

    /// Sets the display name (defaults to the id).
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the alert message body.
    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Sets the alert type.
    #[must_use]
    pub const fn alert_type(mut self, alert_type: AlertType) -> Self {
        self.alert_type = alert_type;
        self
    }

    /// Sets the severity level.
    #[must_use]
    pub const fn severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    /// Sets the cooldown.
    #[must_use]
    pub const fn cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    /// Sets the cooldown in minutes.
    #[must_use]
    pub const fn cooldown_minutes(mut self, minutes: u64) -> Self {
        self.cooldown = Duration::from_secs(minutes.saturating_mul(60));
        self
    }

    /// Enables the one-shot auto-resolve check.
    #[must_use]
    pub const fn auto_resolve(mut self, auto_resolve: bool) -> Self {
        self.auto_resolve = auto_resolve;
        self
    }

    /// Adds an action.
    #[must_use]
    pub fn action(mut self, action: AlertAction) -> Self {
        self.actions.push(action);
        self
    }

    /// Attaches an escalation policy by id.
    #[must_use]
    pub fn escalation_policy(mut self, policy_id: impl Into<String>) -> Self {
        self.escalation_policy = Some(policy_id.into());
        self
    }

    /// Sets whether the rule is enabled.
    #[must_use]
    pub const fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Builds the [`AlertRule`].
    ///
    /// # Errors
    ///
    /// Returns `AlertError::InvalidRule` if:
    /// - The id is empty
    /// - The id or name exceeds the maximum length
    pub fn build(self) -> Result<AlertRule> {
        if self.id.is_empty() {
            return Err(AlertError::InvalidRule {
                reason: "rule id cannot be empty".to_string(),
            });
        }

        let name = self.name.unwrap_or_else(|| self.id.clone());
        if self.id.len() > AlertRule::MAX_NAME_LENGTH || name.len() > AlertRule::MAX_NAME_LENGTH {
            return Err(AlertError::InvalidRule {
                reason: format!(
                    "rule id and name must not exceed {} characters",
                    AlertRule::MAX_NAME_LENGTH
                ),
            });
        }

        let description = self
            .description
            .unwrap_or_else(|| format!("{name}: {}", self.condition));

        Ok(AlertRule {
            id: self.id,
            name,
            description,
            alert_type: self.alert_type,
            condition: self.condition,
            severity: self.severity,
            cooldown: self.cooldown,
            auto_resolve: self.auto_resolve,
            actions: self.actions,
            escalation_policy: self.escalation_policy,
            enabled: self.enabled,
        })
    }
}

/// A materialized alert.
///
/// Created only when a rule triggers. Once `resolved` is set it is never
/// cleared.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    /// Unique identifier for this alert.
    pub id: String,
    /// The rule that raised this alert.
    pub rule_id: String,
    /// Kind of alert.
    #[serde(rename = "type")]
    pub alert_type: AlertType,
    /// Severity copied from the rule.
    pub severity: Severity,
    /// Short title.
    pub title: String,
    /// Message body.
    pub message: String,
    /// When the alert was created.
    pub created_at: DateTime<Utc>,
    /// Opaque context (rule id, metric values at trigger time, ...).
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    /// Whether the alert has been resolved.
    pub resolved: bool,
    /// When the alert was resolved.
    pub resolved_at: Option<DateTime<Utc>>,
    /// Who resolved it (a user, or `auto_resolved`).
    pub resolved_by: Option<String>,
    /// Follow-up actions.
    #[serde(default)]
    pub actions: Vec<AlertAction>,
}

impl Alert {
    /// `resolved_by` value written by the auto-resolve check.
    pub const AUTO_RESOLVED: &'static str = "auto_resolved";

    /// Creates an alert for a rule that just triggered on `snapshot`.
    #[must_use]
    pub fn from_rule(rule: &AlertRule, snapshot: &MetricsSnapshot, now: DateTime<Utc>) -> Self {
        let mut metadata = HashMap::new();
        metadata.insert("rule_id".to_string(), serde_json::Value::from(rule.id.clone()));

        let observed: serde_json::Map<String, serde_json::Value> = rule
            .condition
            .metrics()
            .into_iter()
            .filter_map(|m| snapshot.get(m).map(|v| (m.to_string(), serde_json::Value::from(v))))
            .collect();
        if !observed.is_empty() {
            metadata.insert("metrics".to_string(), serde_json::Value::Object(observed));
        }

        Self {
            id: Uuid::new_v4().to_string(),
            rule_id: rule.id.clone(),
            alert_type: rule.alert_type,
            severity: rule.severity,
            title: rule.name.clone(),
            message: rule.description.clone(),
            created_at: now,
            metadata,
            resolved: false,
            resolved_at: None,
            resolved_by: None,
            actions: rule.actions.clone(),
        }
    }

    /// Marks the alert resolved. Returns false if it already was.
    pub fn resolve(&mut self, resolved_by: impl Into<String>, at: DateTime<Utc>) -> bool {
        if self.resolved {
            return false;
        }
        self.resolved = true;
        self.resolved_at = Some(at);
        self.resolved_by = Some(resolved_by.into());
        true
    }

    /// Returns true while the alert is unresolved.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        !self.resolved
    }
}
