//! `beacon.toml` configuration.
//!
//! The file has five sections:
//! - `[engine]`: intervals and limits, mapped onto [`EngineConfig`]
//! - `[metrics]`: where the metrics file lives
//! - `[[channels]]`: notification channels, one table per channel
//! - `[[rules]]`: declarative threshold rules
//! - `[[escalation_policies]]`: timed re-notification steps

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use beacon_alerts::{
    AlertAction, AlertRule, AlertType, ComparisonOperator, Condition, EngineConfig,
    EscalationCondition, EscalationPolicy, EscalationStep, NotificationChannel, Severity,
    ThresholdCondition,
};
use serde::{Deserialize, Serialize};

use crate::error::CliError;

/// Engine settings, in seconds where the library takes durations.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EngineSection {
    /// Poll interval in seconds.
    pub poll_interval_secs: u64,
    /// Timer tick in seconds.
    pub timer_tick_secs: u64,
    /// Per-channel send timeout in seconds.
    pub channel_timeout_secs: u64,
    /// Alerts retained in memory.
    pub max_history: usize,
    /// Whether pushed updates skip rule cooldowns.
    pub realtime_bypasses_cooldown: bool,
    /// Base URL for alert links.
    pub action_base_url: Option<String>,
    /// Alert event channel capacity.
    pub event_buffer: usize,
}

impl Default for EngineSection {
    fn default() -> Self {
        let defaults = EngineConfig::default();
        Self {
            poll_interval_secs: defaults.poll_interval.as_secs(),
            timer_tick_secs: defaults.timer_tick.as_secs(),
            channel_timeout_secs: defaults.channel_timeout.as_secs(),
            max_history: defaults.max_history,
            realtime_bypasses_cooldown: defaults.realtime_bypasses_cooldown,
            action_base_url: defaults.action_base_url,
            event_buffer: defaults.event_buffer,
        }
    }
}

impl EngineSection {
    /// Converts to the library configuration.
    #[must_use]
    pub fn to_engine_config(&self) -> EngineConfig {
        EngineConfig {
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            timer_tick: Duration::from_secs(self.timer_tick_secs),
            channel_timeout: Duration::from_secs(self.channel_timeout_secs),
            max_history: self.max_history,
            realtime_bypasses_cooldown: self.realtime_bypasses_cooldown,
            action_base_url: self.action_base_url.clone(),
            event_buffer: self.event_buffer,
        }
    }
}

/// Where metrics are read from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MetricsSection {
    /// JSON file with one object per metric category. Relative paths are
    /// resolved against the config file's directory.
    pub path: PathBuf,
}

/// A rule condition as written in the config file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ConditionConfig {
    /// `metric operator threshold`.
    Threshold(ThresholdCondition),
    /// Every nested condition holds.
    All {
        /// Nested conditions.
        conditions: Vec<ConditionConfig>,
    },
    /// At least one nested condition holds.
    Any {
        /// Nested conditions.
        conditions: Vec<ConditionConfig>,
    },
}

impl ConditionConfig {
    /// Shorthand for a threshold condition.
    #[must_use]
    pub fn threshold(metric: impl Into<String>, operator: ComparisonOperator, threshold: f64) -> Self {
        Self::Threshold(ThresholdCondition {
            metric: metric.into(),
            operator,
            threshold,
        })
    }

    fn to_condition(&self) -> Result<Condition, CliError> {
        match self {
            Self::Threshold(t) => Ok(Condition::Threshold(ThresholdCondition::new(
                t.metric.clone(),
                t.operator,
                t.threshold,
            )?)),
            Self::All { conditions } => Ok(Condition::All(Self::nested(conditions)?)),
            Self::Any { conditions } => Ok(Condition::Any(Self::nested(conditions)?)),
        }
    }

    fn nested(conditions: &[Self]) -> Result<Vec<Condition>, CliError> {
        if conditions.is_empty() {
            return Err(CliError::Config(
                "composite condition needs at least one nested condition".to_string(),
            ));
        }
        conditions.iter().map(Self::to_condition).collect()
    }
}

const fn default_true() -> bool {
    true
}

const fn default_severity() -> Severity {
    Severity::Medium
}

const fn default_alert_type() -> AlertType {
    AlertType::System
}

const fn default_cooldown_minutes() -> u64 {
    5
}

/// A rule as written in the config file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RuleConfig {
    /// Unique identifier.
    pub id: String,
    /// Display name, used as the alert title.
    #[serde(default)]
    pub name: Option<String>,
    /// Alert message body.
    #[serde(default)]
    pub description: Option<String>,
    /// Alert type.
    #[serde(default = "default_alert_type", rename = "type")]
    pub alert_type: AlertType,
    /// Trigger condition.
    pub condition: ConditionConfig,
    /// Alert severity.
    #[serde(default = "default_severity")]
    pub severity: Severity,
    /// Minutes between two triggers.
    #[serde(default = "default_cooldown_minutes")]
    pub cooldown_minutes: u64,
    /// Re-check and resolve one cooldown after triggering.
    #[serde(default)]
    pub auto_resolve: bool,
    /// Escalation policy id.
    #[serde(default)]
    pub escalation_policy: Option<String>,
    /// Follow-up actions copied onto each alert.
    #[serde(default)]
    pub actions: Vec<AlertAction>,
    /// Whether the rule is evaluated.
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl RuleConfig {
    /// Builds the library rule.
    ///
    /// # Errors
    ///
    /// Returns an error if the condition or rule is invalid.
    pub fn to_rule(&self) -> Result<AlertRule, CliError> {
        let mut builder = AlertRule::builder(self.id.clone(), self.condition.to_condition()?)
            .alert_type(self.alert_type)
            .severity(self.severity)
            .cooldown_minutes(self.cooldown_minutes)
            .auto_resolve(self.auto_resolve)
            .enabled(self.enabled);
        if let Some(name) = &self.name {
            builder = builder.name(name.clone());
        }
        if let Some(description) = &self.description {
            builder = builder.description(description.clone());
        }
        if let Some(policy) = &self.escalation_policy {
            builder = builder.escalation_policy(policy.clone());
        }
        for action in &self.actions {
            builder = builder.action(action.clone());
        }
        Ok(builder.build()?)
    }
}

/// One escalation step as written in the config file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StepConfig {
    /// Minutes after the alert was created.
    #[serde(default)]
    pub delay_minutes: u64,
    /// Channel ids to notify.
    pub channels: Vec<String>,
    /// Only fire for alerts at or above this severity.
    #[serde(default)]
    pub min_severity: Option<Severity>,
}

/// An escalation policy as written in the config file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PolicyConfig {
    /// Unique identifier.
    pub id: String,
    /// Display name (defaults to the id).
    #[serde(default)]
    pub name: Option<String>,
    /// Whether the policy is active.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Steps, in order.
    pub steps: Vec<StepConfig>,
}

impl PolicyConfig {
    /// Builds the library policy.
    #[must_use]
    pub fn to_policy(&self) -> EscalationPolicy {
        let name = self.name.clone().unwrap_or_else(|| self.id.clone());
        self.steps.iter().fold(
            EscalationPolicy::new(self.id.clone(), name).enabled(self.enabled),
            |policy, s| {
                let mut step = EscalationStep::new(s.delay_minutes, s.channels.iter().cloned());
                if let Some(min) = s.min_severity {
                    step = step.when(EscalationCondition::SeverityAtLeast(min));
                }
                policy.step(step)
            },
        )
    }
}

/// The whole config file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BeaconConfig {
    /// Engine settings.
    #[serde(default)]
    pub engine: EngineSection,
    /// Metrics source.
    pub metrics: MetricsSection,
    /// Notification channels.
    #[serde(default)]
    pub channels: Vec<NotificationChannel>,
    /// Alert rules.
    #[serde(default)]
    pub rules: Vec<RuleConfig>,
    /// Escalation policies.
    #[serde(default)]
    pub escalation_policies: Vec<PolicyConfig>,
}

impl BeaconConfig {
    /// Loads and validates a config file. A relative metrics path is
    /// resolved against the config file's directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, CliError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            CliError::Config(format!("failed to read config file '{}': {e}", path.display()))
        })?;

        let mut config = Self::from_toml(&content)?;
        if config.metrics.path.is_relative() {
            if let Some(dir) = path.parent() {
                config.metrics.path = dir.join(&config.metrics.path);
            }
        }
        Ok(config)
    }

    /// Parses and validates config from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid or fails validation.
    pub fn from_toml(content: &str) -> Result<Self, CliError> {
        let config: Self =
            toml::from_str(content).map_err(|e| CliError::Config(format!("invalid TOML: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error on empty or duplicate ids, incomplete channel
    /// transports, invalid rules, or references to unknown channels or
    /// policies.
    pub fn validate(&self) -> Result<(), CliError> {
        self.engine.to_engine_config().validate()?;

        let channel_ids = unique_ids("channel", self.channels.iter().map(|c| c.id.as_str()))?;
        let policy_ids = unique_ids(
            "escalation policy",
            self.escalation_policies.iter().map(|p| p.id.as_str()),
        )?;
        unique_ids("rule", self.rules.iter().map(|r| r.id.as_str()))?;

        for channel in &self.channels {
            channel.validate()?;
        }

        for policy in &self.escalation_policies {
            policy.to_policy().validate()?;
            for (i, step) in policy.steps.iter().enumerate() {
                if let Some(unknown) = step.channels.iter().find(|c| !channel_ids.contains(c.as_str())) {
                    return Err(CliError::Config(format!(
                        "step {i} of escalation policy '{}' names unknown channel '{unknown}'",
                        policy.id
                    )));
                }
            }
        }

        for rule in &self.rules {
            rule.to_rule()?;
            if let Some(policy) = &rule.escalation_policy {
                if !policy_ids.contains(policy.as_str()) {
                    return Err(CliError::Config(format!(
                        "rule '{}' names unknown escalation policy '{policy}'",
                        rule.id
                    )));
                }
            }
        }

        Ok(())
    }

    /// Builds every rule.
    ///
    /// # Errors
    ///
    /// Returns the first invalid rule.
    pub fn alert_rules(&self) -> Result<Vec<AlertRule>, CliError> {
        self.rules.iter().map(RuleConfig::to_rule).collect()
    }

    /// Builds every escalation policy.
    #[must_use]
    pub fn policies(&self) -> Vec<EscalationPolicy> {
        self.escalation_policies.iter().map(PolicyConfig::to_policy).collect()
    }
}

fn unique_ids<'a>(
    kind: &str,
    ids: impl Iterator<Item = &'a str>,
) -> Result<HashSet<&'a str>, CliError> {
    let mut seen = HashSet::new();
    for id in ids {
        if id.trim().is_empty() {
            return Err(CliError::Config(format!("{kind} id cannot be empty")));
        }
        if !seen.insert(id) {
            return Err(CliError::Config(format!("duplicate {kind} id '{id}'")));
        }
    }
    Ok(seen)
}
