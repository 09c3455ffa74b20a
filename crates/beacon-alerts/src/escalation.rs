//! Escalation policies and the timed re-notification scheduler.
//!
//! When an alert is created under a rule with an attached policy, every step
//! of the policy becomes one timer at `created_at + delay`. Steps are
//! independent: a skipped step does not affect later ones. Resolving the
//! alert removes all of its timers.

use std::collections::BTreeMap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{AlertError, Result};
use crate::timer::{ScheduledTimer, TimerQueue};
use crate::types::{Alert, Severity};

/// A caller-supplied predicate over an alert.
pub type AlertPredicate = Arc<dyn Fn(&Alert) -> Result<bool> + Send + Sync>;

/// Gate on a single escalation step.
#[derive(Clone)]
pub enum EscalationCondition {
    /// Fires only for alerts at or above this severity.
    SeverityAtLeast(Severity),
    /// Arbitrary code.
    Predicate(AlertPredicate),
}

impl EscalationCondition {
    /// Wraps a closure as a step condition.
    pub fn predicate<F>(f: F) -> Self
    where
        F: Fn(&Alert) -> Result<bool> + Send + Sync + 'static,
    {
        Self::Predicate(Arc::new(f))
    }

    /// Evaluates the condition. A panic is reported as an error.
    pub fn evaluate(&self, alert: &Alert) -> Result<bool> {
        match self {
            Self::SeverityAtLeast(min) => Ok(alert.severity >= *min),
            Self::Predicate(f) => catch_unwind(AssertUnwindSafe(|| f(alert)))
                .unwrap_or_else(|_| Err(AlertError::condition("escalation condition panicked"))),
        }
    }
}

impl fmt::Debug for EscalationCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SeverityAtLeast(s) => f.debug_tuple("SeverityAtLeast").field(s).finish(),
            Self::Predicate(_) => f.write_str("Predicate(<fn>)"),
        }
    }
}

/// One step of an escalation policy.
#[derive(Debug, Clone)]
pub struct EscalationStep {
    /// Minutes after alert creation at which the step fires.
    pub delay_minutes: u64,
    /// Channels the step sends to.
    pub channel_ids: Vec<String>,
    /// Optional gate; the step is skipped when it is false or errors.
    pub condition: Option<EscalationCondition>,
}

impl EscalationStep {
    /// Creates an unconditional step.
    #[must_use]
    pub fn new<I, S>(delay_minutes: u64, channel_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            delay_minutes,
            channel_ids: channel_ids.into_iter().map(Into::into).collect(),
            condition: None,
        }
    }

    /// Gates the step on a condition.
    #[must_use]
    pub fn when(mut self, condition: EscalationCondition) -> Self {
        self.condition = Some(condition);
        self
    }

    /// The step delay as a chrono duration, capped at
    /// [`EscalationPolicy::MAX_DELAY_MINUTES`].
    #[must_use]
    pub fn delay(&self) -> chrono::Duration {
        let minutes = self.delay_minutes.min(EscalationPolicy::MAX_DELAY_MINUTES);
        chrono::Duration::minutes(i64::try_from(minutes).unwrap_or(0))
    }
}

/// An ordered list of timed re-notification steps.
#[derive(Debug, Clone)]
pub struct EscalationPolicy {
    /// Unique identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Disabled policies schedule nothing and fire nothing.
    pub enabled: bool,
    /// Steps, in order.
    pub steps: Vec<EscalationStep>,
}

impl EscalationPolicy {
    /// Longest allowed step delay (one year).
    pub const MAX_DELAY_MINUTES: u64 = 525_600;

    /// Creates an enabled policy with no steps.
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            enabled: true,
            steps: Vec::new(),
        }
    }

    /// Appends a step.
    #[must_use]
    pub fn step(mut self, step: EscalationStep) -> Self {
        self.steps.push(step);
        self
    }

    /// Sets whether the policy is enabled.
    #[must_use]
    pub const fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Validates the policy.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::InvalidPolicy` if the id is empty, there are no
    /// steps, or a step names no channels or waits too long.
    pub fn validate(&self) -> Result<()> {
        let reason = if self.id.trim().is_empty() {
            Some("policy id cannot be empty".to_string())
        } else if self.steps.is_empty() {
            Some(format!("policy '{}' has no steps", self.id))
        } else {
            self.steps.iter().enumerate().find_map(|(i, s)| {
                if s.channel_ids.is_empty() {
                    Some(format!("step {i} of policy '{}' names no channels", self.id))
                } else if s.delay_minutes > Self::MAX_DELAY_MINUTES {
                    Some(format!(
                        "step {i} of policy '{}' exceeds {} minutes",
                        self.id,
                        Self::MAX_DELAY_MINUTES
                    ))
                } else {
                    None
                }
            })
        };

        match reason {
            Some(reason) => Err(AlertError::InvalidPolicy { reason }),
            None => Ok(()),
        }
    }
}

/// One pending escalation step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationTask {
    /// The alert being escalated.
    pub alert_id: String,
    /// The policy the step belongs to.
    pub policy_id: String,
    /// Index into the policy's steps.
    pub step_index: usize,
}

/// What a due step should send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EscalationSend {
    /// Target channels.
    pub channel_ids: Vec<String>,
    /// Index of the step that fired.
    pub step_index: usize,
    /// The step delay, for the message annotation.
    pub delay_minutes: u64,
}

/// Holds escalation policies and the timers of every escalating alert.
#[derive(Debug, Default)]
pub struct EscalationScheduler {
    policies: RwLock<BTreeMap<String, EscalationPolicy>>,
    timers: Mutex<TimerQueue<EscalationTask>>,
}

impl EscalationScheduler {
    /// Creates an empty scheduler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a policy.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::InvalidPolicy` if the policy is invalid or the id
    /// is already taken.
    pub fn add_policy(&self, policy: EscalationPolicy) -> Result<()> {
        policy.validate()?;
        let mut policies = self.policies.write();
        if policies.contains_key(&policy.id) {
            return Err(AlertError::InvalidPolicy {
                reason: format!("policy with ID '{}' already exists", policy.id),
            });
        }
        info!(policy_id = %policy.id, steps = policy.steps.len(), "added escalation policy");
        policies.insert(policy.id.clone(), policy);
        Ok(())
    }

    /// Replaces an existing policy. Steps already scheduled keep their fire
    /// times and read the new policy when they come due.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::PolicyNotFound` if the id is unknown, or
    /// `AlertError::InvalidPolicy` if the replacement is invalid.
    pub fn update_policy(&self, policy: EscalationPolicy) -> Result<()> {
        policy.validate()?;
        let mut policies = self.policies.write();
        if !policies.contains_key(&policy.id) {
            return Err(AlertError::PolicyNotFound { id: policy.id.clone() });
        }
        info!(policy_id = %policy.id, enabled = policy.enabled, "updated escalation policy");
        policies.insert(policy.id.clone(), policy);
        Ok(())
    }

    /// Removes a policy. Steps already scheduled under it will be skipped
    /// when they come due.
    pub fn remove_policy(&self, policy_id: &str) -> bool {
        let removed = self.policies.write().remove(policy_id).is_some();
        if removed {
            info!(policy_id = %policy_id, "removed escalation policy");
        }
        removed
    }

    /// Gets a policy by id.
    #[must_use]
    pub fn get_policy(&self, policy_id: &str) -> Option<EscalationPolicy> {
        self.policies.read().get(policy_id).cloned()
    }

    /// Returns every policy, ordered by id.
    #[must_use]
    pub fn list_policies(&self) -> Vec<EscalationPolicy> {
        self.policies.read().values().cloned().collect()
    }

    /// Schedules one timer per step for a new alert. Returns how many were
    /// scheduled (zero if the policy is unknown or disabled).
    pub fn schedule(&self, alert: &Alert, policy_id: &str) -> usize {
        let Some(policy) = self.get_policy(policy_id) else {
            warn!(alert_id = %alert.id, policy_id = %policy_id, "escalation policy not found");
            return 0;
        };
        if !policy.enabled {
            debug!(alert_id = %alert.id, policy_id = %policy_id, "escalation policy disabled");
            return 0;
        }

        let mut timers = self.timers.lock();
        for (step_index, step) in policy.steps.iter().enumerate() {
            timers.schedule(
                alert.id.clone(),
                alert.created_at + step.delay(),
                EscalationTask {
                    alert_id: alert.id.clone(),
                    policy_id: policy.id.clone(),
                    step_index,
                },
            );
        }

        info!(
            alert_id = %alert.id,
            policy_id = %policy.id,
            steps = policy.steps.len(),
            "scheduled escalation"
        );
        policy.steps.len()
    }

    /// Cancels every pending step of an alert. Returns how many were removed.
    pub fn cancel(&self, alert_id: &str) -> usize {
        let cancelled = self.timers.lock().cancel_alert(alert_id);
        if cancelled > 0 {
            info!(alert_id = %alert_id, cancelled, "cancelled pending escalation steps");
        }
        cancelled
    }

    /// Removes and returns the steps due at `now`.
    pub fn due(&self, now: DateTime<Utc>) -> Vec<EscalationTask> {
        self.timers.lock().pop_due(now)
    }

    /// Decides what a due step sends, or `None` if the step is skipped.
    ///
    /// A step is skipped when its policy was removed or disabled, or when its
    /// condition is false or fails.
    #[must_use]
    pub fn prepare(&self, task: &EscalationTask, alert: &Alert) -> Option<EscalationSend> {
        let policy = self.get_policy(&task.policy_id).filter(|p| p.enabled)?;
        let step = policy.steps.get(task.step_index)?;

        if let Some(condition) = &step.condition {
            match condition.evaluate(alert) {
                Ok(true) => {}
                Ok(false) => {
                    debug!(
                        alert_id = %alert.id,
                        step = task.step_index,
                        "escalation condition false, skipping step"
                    );
                    return None;
                }
                Err(e) => {
                    warn!(
                        alert_id = %alert.id,
                        step = task.step_index,
                        error = %e,
                        "escalation condition failed, skipping step"
                    );
                    return None;
                }
            }
        }

        Some(EscalationSend {
            channel_ids: step.channel_ids.clone(),
            step_index: task.step_index,
            delay_minutes: step.delay_minutes,
        })
    }

    /// Number of pending steps for an alert.
    #[must_use]
    pub fn pending_for(&self, alert_id: &str) -> usize {
        self.timers.lock().pending_for(alert_id)
    }

    /// Every pending step, in firing order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<ScheduledTimer<EscalationTask>> {
        self.timers.lock().snapshot()
    }
}
