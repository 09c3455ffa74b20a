//! Rule registry and evaluation.
//!
//! Each rule carries a cooldown. A rule that triggered at `T` is not
//! evaluated again before `T + cooldown`, except on the real-time path when
//! the engine is configured to let critical pushes through.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::clock::{Clock, elapsed};
use crate::error::{AlertError, Result};
use crate::metrics::MetricsSnapshot;
use crate::types::{Alert, AlertRule, Severity};

/// Which invocation path is evaluating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvaluationMode {
    /// Periodic poll: every enabled rule, cooldown enforced.
    Poll,
    /// Pushed metric update: critical rules only.
    Realtime {
        /// Whether the cooldown gate is skipped on this path.
        bypass_cooldown: bool,
    },
}

impl EvaluationMode {
    const fn includes(self, rule: &AlertRule) -> bool {
        match self {
            Self::Poll => true,
            Self::Realtime { .. } => matches!(rule.severity, Severity::Critical),
        }
    }

    const fn enforces_cooldown(self) -> bool {
        match self {
            Self::Poll => true,
            Self::Realtime { bypass_cooldown } => !bypass_cooldown,
        }
    }
}

/// A rule that fired, with the alert it produced.
#[derive(Debug, Clone)]
pub struct Triggered {
    /// The rule as it was at evaluation time.
    pub rule: AlertRule,
    /// The new alert.
    pub alert: Alert,
}

/// Holds rules and the last trigger time of each.
#[derive(Debug)]
pub struct RuleEngine {
    rules: RwLock<BTreeMap<String, AlertRule>>,
    last_triggered: Mutex<HashMap<String, DateTime<Utc>>>,
    clock: Arc<dyn Clock>,
}

impl RuleEngine {
    /// Creates an empty rule engine.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            rules: RwLock::new(BTreeMap::new()),
            last_triggered: Mutex::new(HashMap::new()),
            clock,
        }
    }

    /// Adds a rule.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::InvalidRule` if a rule with the same id exists.
    pub fn add_rule(&self, rule: AlertRule) -> Result<()> {
        let mut rules = self.rules.write();
        if rules.contains_key(&rule.id) {
            return Err(AlertError::InvalidRule {
                reason: format!("rule with ID '{}' already exists", rule.id),
            });
        }
        info!(rule_id = %rule.id, rule_name = %rule.name, severity = %rule.severity, "added alert rule");
        rules.insert(rule.id.clone(), rule);
        Ok(())
    }

    /// Replaces an existing rule. Its cooldown keeps running.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::RuleNotFound` if the rule doesn't exist.
    pub fn update_rule(&self, rule: AlertRule) -> Result<()> {
        let mut rules = self.rules.write();
        if !rules.contains_key(&rule.id) {
            return Err(AlertError::RuleNotFound { id: rule.id.clone() });
        }
        info!(rule_id = %rule.id, rule_name = %rule.name, "updated alert rule");
        rules.insert(rule.id.clone(), rule);
        Ok(())
    }

    /// Removes a rule and forgets its cooldown. Returns true if it existed.
    pub fn remove_rule(&self, rule_id: &str) -> bool {
        let removed = self.rules.write().remove(rule_id).is_some();
        if removed {
            self.last_triggered.lock().remove(rule_id);
            info!(rule_id = %rule_id, "removed alert rule");
        }
        removed
    }

    /// Gets a rule by id.
    #[must_use]
    pub fn get_rule(&self, rule_id: &str) -> Option<AlertRule> {
        self.rules.read().get(rule_id).cloned()
    }

    /// Returns every rule, ordered by id.
    #[must_use]
    pub fn list_rules(&self) -> Vec<AlertRule> {
        self.rules.read().values().cloned().collect()
    }

    /// Returns the number of rules.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.read().len()
    }

    /// Returns true if there are no rules.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.read().is_empty()
    }

    /// When a rule last triggered.
    #[must_use]
    pub fn last_triggered(&self, rule_id: &str) -> Option<DateTime<Utc>> {
        self.last_triggered.lock().get(rule_id).copied()
    }

    /// Evaluates the rules selected by `mode` against one snapshot.
    ///
    /// The cooldown check and the trigger timestamp update happen under one
    /// lock, so concurrent poll and push evaluations cannot both fire the
    /// same rule. A condition that fails to evaluate counts as false.
    pub fn evaluate(&self, snapshot: &MetricsSnapshot, mode: EvaluationMode) -> Vec<Triggered> {
        let now = self.clock.now();
        let rules: Vec<AlertRule> = self
            .rules
            .read()
            .values()
            .filter(|r| r.enabled && mode.includes(r))
            .cloned()
            .collect();

        let mut last_triggered = self.last_triggered.lock();
        let mut triggered = Vec::new();

        for rule in rules {
            if mode.enforces_cooldown() {
                if let Some(last) = last_triggered.get(&rule.id) {
                    if elapsed(now, *last) < rule.cooldown {
                        debug!(rule_id = %rule.id, "rule in cooldown");
                        continue;
                    }
                }
            }

            match rule.condition.evaluate(snapshot) {
                Ok(true) => {
                    let alert = Alert::from_rule(&rule, snapshot, now);
                    last_triggered.insert(rule.id.clone(), now);
                    info!(
                        rule_id = %rule.id,
                        alert_id = %alert.id,
                        severity = %rule.severity,
                        ?mode,
                        "rule triggered"
                    );
                    triggered.push(Triggered { rule, alert });
                }
                Ok(false) => {}
                Err(e) => {
                    warn!(rule_id = %rule.id, error = %e, "rule condition failed, treating as false");
                }
            }
        }

        triggered
    }
}
