//! The alert engine.
//!
//! [`AlertEngine`] owns every registry (rules, channels, escalation
//! policies, alerts) and drives the whole pipeline:
//!
//! ```text
//! metrics ──► rule engine ──► alert store ──► dispatcher ──► transports
//!                                   │
//!                                   └──► escalation timers ──► dispatcher
//! ```
//!
//! The engine is cheap to clone; clones share state.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use beacon_audit::{AuditSink, TracingAuditSink};
use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info, warn};
use url::Url;

use crate::audit;
use crate::channels::{ChannelRegistry, NotificationChannel};
use crate::clock::{Clock, SystemClock};
use crate::dispatcher::{DispatchReport, Dispatcher};
use crate::error::{AlertError, Result};
use crate::escalation::{EscalationPolicy, EscalationScheduler, EscalationTask};
use crate::metrics::{MetricUpdate, MetricsProvider, MetricsSnapshot, fetch_snapshot};
use crate::payload::NotificationPayload;
use crate::rules::{EvaluationMode, RuleEngine, Triggered};
use crate::store::AlertStore;
use crate::timer::{ScheduledTimer, TimerQueue};
use crate::transport::Transport;
use crate::types::{Alert, AlertRule};

/// Engine settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// How often the poll path fetches and evaluates.
    pub poll_interval: Duration,
    /// How often due timers are checked by [`AlertEngine::run`].
    pub timer_tick: Duration,
    /// Upper bound on a single channel send.
    pub channel_timeout: Duration,
    /// How many alerts the store retains.
    pub max_history: usize,
    /// Whether pushed metric updates skip the per-rule cooldown.
    pub realtime_bypasses_cooldown: bool,
    /// Base for `action_url` in payloads (`{base}/alerts/{id}`).
    pub action_base_url: Option<String>,
    /// Capacity of the alert event channel.
    pub event_buffer: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(30),
            timer_tick: Duration::from_secs(1),
            channel_timeout: Duration::from_secs(10),
            max_history: 1000,
            realtime_bypasses_cooldown: true,
            action_base_url: None,
            event_buffer: 256,
        }
    }
}

impl EngineConfig {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::Config` if an interval or capacity is zero or the
    /// action base URL does not parse.
    pub fn validate(&self) -> Result<()> {
        let problem = if self.poll_interval.is_zero() {
            Some("poll_interval must be positive".to_string())
        } else if self.timer_tick.is_zero() {
            Some("timer_tick must be positive".to_string())
        } else if self.channel_timeout.is_zero() {
            Some("channel_timeout must be positive".to_string())
        } else if self.max_history == 0 {
            Some("max_history must be positive".to_string())
        } else if self.event_buffer == 0 {
            Some("event_buffer must be positive".to_string())
        } else {
            self.action_base_url
                .as_deref()
                .and_then(|u| Url::parse(u).err().map(|e| format!("action_base_url: {e}")))
        };

        match problem {
            Some(reason) => Err(AlertError::Config { reason }),
            None => Ok(()),
        }
    }
}

/// Published on every alert lifecycle transition.
#[derive(Debug, Clone, PartialEq)]
pub enum AlertEvent {
    /// A rule fired and the alert was stored.
    Triggered(Alert),
    /// The alert was resolved.
    Resolved(Alert),
}

impl AlertEvent {
    /// The alert the event is about.
    #[must_use]
    pub const fn alert(&self) -> &Alert {
        match self {
            Self::Triggered(a) | Self::Resolved(a) => a,
        }
    }
}

/// A scheduled auto-resolve check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoResolveTask {
    /// The alert to re-check.
    pub alert_id: String,
    /// The rule whose condition is re-evaluated.
    pub rule_id: String,
}

/// What one [`AlertEngine::run_due_timers`] call did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimerReport {
    /// Escalation steps that sent.
    pub escalations_fired: usize,
    /// Escalation steps skipped (alert resolved, condition false, policy gone).
    pub escalations_skipped: usize,
    /// Auto-resolve checks that ran.
    pub auto_resolve_checks: usize,
    /// Alerts the checks resolved.
    pub auto_resolved: usize,
}

struct EngineInner {
    config: EngineConfig,
    clock: Arc<dyn Clock>,
    metrics: Arc<dyn MetricsProvider>,
    audit: Arc<dyn AuditSink>,
    rules: RuleEngine,
    store: AlertStore,
    channels: Arc<ChannelRegistry>,
    dispatcher: Dispatcher,
    escalations: EscalationScheduler,
    auto_resolve: Mutex<TimerQueue<AutoResolveTask>>,
    last_snapshot: RwLock<MetricsSnapshot>,
    events: broadcast::Sender<AlertEvent>,
}

/// Builder for [`AlertEngine`].
pub struct AlertEngineBuilder {
    metrics: Arc<dyn MetricsProvider>,
    transport: Arc<dyn Transport>,
    config: EngineConfig,
    clock: Option<Arc<dyn Clock>>,
    audit: Option<Arc<dyn AuditSink>>,
}

impl fmt::Debug for AlertEngineBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AlertEngineBuilder")
            .field("config", &self.config)
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}

impl AlertEngineBuilder {
    /// Sets the engine configuration.
    #[must_use]
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the clock (defaults to [`SystemClock`]).
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Sets the audit sink (defaults to [`TracingAuditSink`]).
    #[must_use]
    pub fn audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Builds the engine.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::Config` if the configuration is invalid.
    pub fn build(self) -> Result<AlertEngine> {
        self.config.validate()?;

        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let audit = self
            .audit
            .unwrap_or_else(|| Arc::new(TracingAuditSink::new()));
        let channels = Arc::new(ChannelRegistry::new());
        let dispatcher = Dispatcher::new(
            Arc::clone(&channels),
            self.transport,
            Arc::clone(&audit),
            Arc::clone(&clock),
            self.config.channel_timeout,
        );
        let (events, _) = broadcast::channel(self.config.event_buffer);

        Ok(AlertEngine {
            inner: Arc::new(EngineInner {
                rules: RuleEngine::new(Arc::clone(&clock)),
                store: AlertStore::new(self.config.max_history),
                escalations: EscalationScheduler::new(),
                auto_resolve: Mutex::new(TimerQueue::new()),
                last_snapshot: RwLock::new(MetricsSnapshot::new()),
                config: self.config,
                clock,
                metrics: self.metrics,
                audit,
                channels,
                dispatcher,
                events,
            }),
        })
    }
}

/// The alerting and escalation engine.
#[derive(Clone)]
pub struct AlertEngine {
    inner: Arc<EngineInner>,
}

impl fmt::Debug for AlertEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AlertEngine")
            .field("config", &self.inner.config)
            .field("rules", &self.inner.rules.len())
            .field("channels", &self.inner.channels.len())
            .field("alerts", &self.inner.store.len())
            .finish_non_exhaustive()
    }
}

impl AlertEngine {
    /// Starts building an engine over a metrics provider and a transport.
    pub fn builder(
        metrics: Arc<dyn MetricsProvider>,
        transport: Arc<dyn Transport>,
    ) -> AlertEngineBuilder {
        AlertEngineBuilder {
            metrics,
            transport,
            config: EngineConfig::default(),
            clock: None,
            audit: None,
        }
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Subscribes to alert lifecycle events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<AlertEvent> {
        self.inner.events.subscribe()
    }

    // ============ Rules ============

    /// Adds a rule.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::InvalidRule` if the id is taken.
    pub fn add_rule(&self, rule: AlertRule) -> Result<()> {
        self.inner.rules.add_rule(rule)
    }

    /// Replaces a rule, keeping its cooldown.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::RuleNotFound` if the rule doesn't exist.
    pub fn update_rule(&self, rule: AlertRule) -> Result<()> {
        self.inner.rules.update_rule(rule)
    }

    /// Removes a rule. Returns true if it existed.
    pub fn remove_rule(&self, rule_id: &str) -> bool {
        self.inner.rules.remove_rule(rule_id)
    }

    /// Gets a rule by id.
    #[must_use]
    pub fn get_rule(&self, rule_id: &str) -> Option<AlertRule> {
        self.inner.rules.get_rule(rule_id)
    }

    /// Returns every rule.
    #[must_use]
    pub fn list_rules(&self) -> Vec<AlertRule> {
        self.inner.rules.list_rules()
    }

    // ============ Channels ============

    /// Adds a channel. Incomplete transport config is rejected here rather
    /// than at send time.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::InvalidChannel` on bad config or a taken id.
    pub fn add_channel(&self, channel: NotificationChannel) -> Result<()> {
        self.inner.channels.add(channel)
    }

    /// Replaces a channel, keeping its `last_sent`.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::ChannelNotFound` or `AlertError::InvalidChannel`.
    pub fn update_channel(&self, channel: NotificationChannel) -> Result<()> {
        self.inner.channels.update(channel)
    }

    /// Removes a channel. Returns true if it existed.
    pub fn remove_channel(&self, channel_id: &str) -> bool {
        self.inner.channels.remove(channel_id)
    }

    /// Gets a channel by id.
    #[must_use]
    pub fn get_channel(&self, channel_id: &str) -> Option<NotificationChannel> {
        self.inner.channels.get(channel_id)
    }

    /// Returns every channel.
    #[must_use]
    pub fn get_channels(&self) -> Vec<NotificationChannel> {
        self.inner.channels.list()
    }

    /// Sends a synthetic low-severity payload through one channel and
    /// reports whether it was delivered. Unknown channels report false.
    pub async fn test_channel(&self, channel_id: &str) -> bool {
        match self.inner.dispatcher.test_channel(channel_id).await {
            Ok(delivered) => delivered,
            Err(e) => {
                warn!(channel = %channel_id, error = %e, "cannot test channel");
                false
            }
        }
    }

    // ============ Escalation policies ============

    /// Adds an escalation policy. Rules attach to it by id.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::InvalidPolicy` if the policy is invalid or the id
    /// is taken.
    pub fn add_escalation_policy(&self, policy: EscalationPolicy) -> Result<()> {
        self.inner.escalations.add_policy(policy)
    }

    /// Replaces a policy, for example to disable it.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::PolicyNotFound` or `AlertError::InvalidPolicy`.
    pub fn update_escalation_policy(&self, policy: EscalationPolicy) -> Result<()> {
        self.inner.escalations.update_policy(policy)
    }

    /// Removes a policy. Already-scheduled steps are skipped when due.
    pub fn remove_escalation_policy(&self, policy_id: &str) -> bool {
        self.inner.escalations.remove_policy(policy_id)
    }

    /// Returns every escalation policy.
    #[must_use]
    pub fn list_escalation_policies(&self) -> Vec<EscalationPolicy> {
        self.inner.escalations.list_policies()
    }

    /// Pending escalation steps, in firing order.
    #[must_use]
    pub fn pending_escalations(&self) -> Vec<ScheduledTimer<EscalationTask>> {
        self.inner.escalations.snapshot()
    }

    /// Number of pending escalation steps for one alert.
    #[must_use]
    pub fn pending_escalations_for(&self, alert_id: &str) -> usize {
        self.inner.escalations.pending_for(alert_id)
    }

    /// Pending auto-resolve checks, in firing order.
    #[must_use]
    pub fn pending_auto_resolve(&self) -> Vec<ScheduledTimer<AutoResolveTask>> {
        self.inner.auto_resolve.lock().snapshot()
    }

    // ============ Alerts ============

    /// Unresolved alerts, newest first.
    #[must_use]
    pub fn get_active_alerts(&self) -> Vec<Alert> {
        self.inner.store.active()
    }

    /// All retained alerts, newest first, at most `limit`.
    #[must_use]
    pub fn get_alert_history(&self, limit: usize) -> Vec<Alert> {
        self.inner.store.history(limit)
    }

    /// Gets an alert by id.
    #[must_use]
    pub fn get_alert(&self, alert_id: &str) -> Option<Alert> {
        self.inner.store.get(alert_id)
    }

    /// Resolves an alert and cancels its pending timers.
    ///
    /// Idempotent: returns false, and does nothing, if the alert is unknown
    /// or already resolved. Once this returns, no escalation step of the
    /// alert will send.
    pub fn resolve_alert(&self, alert_id: &str, resolved_by: &str) -> bool {
        let now = self.inner.clock.now();
        let alert = match self.inner.store.resolve(alert_id, resolved_by, now) {
            Ok(Some(alert)) => alert,
            Ok(None) => {
                debug!(alert_id = %alert_id, "resolve ignored: alert already resolved");
                return false;
            }
            Err(e) => {
                debug!(alert_id = %alert_id, error = %e, "resolve ignored");
                return false;
            }
        };

        let cancelled = self.inner.escalations.cancel(alert_id);
        self.inner.auto_resolve.lock().cancel_alert(alert_id);

        info!(
            alert_id = %alert_id,
            resolved_by = %resolved_by,
            cancelled_steps = cancelled,
            "alert resolved"
        );
        self.inner.audit.record(&audit::alert_resolved(&alert));
        let _ = self.inner.events.send(AlertEvent::Resolved(alert));
        true
    }

    // ============ Evaluation ============

    /// Evaluates every rule against a snapshot (poll semantics) and handles
    /// the resulting alerts. Returns the alerts created.
    pub async fn evaluate(&self, snapshot: &MetricsSnapshot) -> Vec<Alert> {
        self.evaluate_with(snapshot, EvaluationMode::Poll).await
    }

    /// One poll tick: fetches all metric categories, remembers the merged
    /// snapshot and evaluates it.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::MetricsFetch` if any category fails; nothing is
    /// evaluated in that case.
    pub async fn poll_once(&self) -> Result<Vec<Alert>> {
        let snapshot = fetch_snapshot(self.inner.metrics.as_ref()).await?;
        *self.inner.last_snapshot.write() = snapshot.clone();
        Ok(self.evaluate(&snapshot).await)
    }

    /// The push path: overlays one metric on the last snapshot and evaluates
    /// critical rules only.
    pub async fn handle_metric_update(&self, update: MetricUpdate) -> Vec<Alert> {
        let snapshot = {
            let mut last = self.inner.last_snapshot.write();
            last.insert(update.metric.clone(), update.value);
            last.clone()
        };
        debug!(metric = %update.metric, value = update.value, "metric update");

        let mode = EvaluationMode::Realtime {
            bypass_cooldown: self.inner.config.realtime_bypasses_cooldown,
        };
        self.evaluate_with(&snapshot, mode).await
    }

    async fn evaluate_with(&self, snapshot: &MetricsSnapshot, mode: EvaluationMode) -> Vec<Alert> {
        let triggered = self.inner.rules.evaluate(snapshot, mode);
        let alerts: Vec<Alert> = triggered.iter().map(|t| t.alert.clone()).collect();
        join_all(triggered.into_iter().map(|t| self.on_triggered(t))).await;
        alerts
    }

    async fn on_triggered(&self, triggered: Triggered) -> DispatchReport {
        let Triggered { rule, alert } = triggered;

        self.inner.store.insert(alert.clone());
        self.inner.audit.record(&audit::alert_triggered(&alert));
        let _ = self.inner.events.send(AlertEvent::Triggered(alert.clone()));

        if let Some(policy_id) = &rule.escalation_policy {
            self.inner.escalations.schedule(&alert, policy_id);
        }
        if rule.auto_resolve {
            self.schedule_auto_resolve(&rule, &alert);
        }

        let payload = NotificationPayload::from_alert(
            &alert,
            self.inner.config.action_base_url.as_deref(),
            self.inner.clock.now(),
        );
        self.inner.dispatcher.dispatch(&payload).await
    }

    fn schedule_auto_resolve(&self, rule: &AlertRule, alert: &Alert) {
        let fire_at = chrono::Duration::from_std(rule.cooldown)
            .ok()
            .and_then(|d| alert.created_at.checked_add_signed(d));
        let Some(fire_at) = fire_at else {
            warn!(rule_id = %rule.id, "cooldown out of range, auto-resolve not scheduled");
            return;
        };

        self.inner.auto_resolve.lock().schedule(
            alert.id.clone(),
            fire_at,
            AutoResolveTask {
                alert_id: alert.id.clone(),
                rule_id: rule.id.clone(),
            },
        );
        debug!(alert_id = %alert.id, fire_at = %fire_at, "scheduled auto-resolve check");
    }

    // ============ Timers ============

    /// Runs every escalation step and auto-resolve check that is due.
    ///
    /// Each step re-checks the alert right before sending, so a step whose
    /// alert was resolved while earlier steps were in flight does not send.
    pub async fn run_due_timers(&self) -> TimerReport {
        let now = self.inner.clock.now();
        let mut report = TimerReport::default();

        let due = self.inner.escalations.due(now);
        for task in &due {
            if self.fire_escalation(task).await {
                report.escalations_fired += 1;
            } else {
                report.escalations_skipped += 1;
            }
        }

        let checks = self.inner.auto_resolve.lock().pop_due(now);
        for check in &checks {
            report.auto_resolve_checks += 1;
            if self.auto_resolve_check(check).await {
                report.auto_resolved += 1;
            }
        }

        report
    }

    async fn fire_escalation(&self, task: &EscalationTask) -> bool {
        let Some(alert) = self.inner.store.get(&task.alert_id) else {
            return false;
        };
        if alert.resolved {
            debug!(alert_id = %alert.id, step = task.step_index, "alert resolved, step dropped");
            return false;
        }
        let Some(send) = self.inner.escalations.prepare(task, &alert) else {
            return false;
        };

        let payload = NotificationPayload::from_alert(
            &alert,
            self.inner.config.action_base_url.as_deref(),
            self.inner.clock.now(),
        )
        .escalated(send.step_index, send.delay_minutes);

        info!(
            alert_id = %alert.id,
            policy_id = %task.policy_id,
            step = send.step_index,
            channels = ?send.channel_ids,
            "escalating alert"
        );
        self.inner.dispatcher.send_to(&send.channel_ids, &payload).await;
        true
    }

    /// Re-evaluates the rule once; resolves the alert only if the condition
    /// is known to be false now. Fetch or evaluation errors leave it open.
    async fn auto_resolve_check(&self, task: &AutoResolveTask) -> bool {
        if !self.inner.store.is_active(&task.alert_id) {
            return false;
        }
        let Some(rule) = self.inner.rules.get_rule(&task.rule_id) else {
            warn!(alert_id = %task.alert_id, rule_id = %task.rule_id, "rule removed, auto-resolve skipped");
            return false;
        };

        let snapshot = match fetch_snapshot(self.inner.metrics.as_ref()).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(alert_id = %task.alert_id, error = %e, "auto-resolve check could not fetch metrics");
                return false;
            }
        };

        match rule.condition.evaluate(&snapshot) {
            Ok(false) => self.resolve_alert(&task.alert_id, Alert::AUTO_RESOLVED),
            Ok(true) => {
                debug!(alert_id = %task.alert_id, "condition still holds, alert stays open");
                false
            }
            Err(e) => {
                warn!(alert_id = %task.alert_id, error = %e, "auto-resolve condition failed");
                false
            }
        }
    }

    // ============ Run loop ============

    /// Drives the engine until `shutdown` flips to true (or its sender is
    /// dropped): polls on `poll_interval`, fires timers on `timer_tick` and
    /// evaluates pushed metric updates as they arrive.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut poll_ticker = interval(self.inner.config.poll_interval);
        poll_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut timer_ticker = interval(self.inner.config.timer_tick);
        timer_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut updates = self.inner.metrics.subscribe();

        info!(
            poll_interval_secs = self.inner.config.poll_interval.as_secs(),
            push = updates.is_some(),
            "alert engine started"
        );

        loop {
            tokio::select! {
                _ = poll_ticker.tick() => {
                    match self.poll_once().await {
                        Ok(alerts) if !alerts.is_empty() => {
                            info!(alerts = alerts.len(), "poll raised alerts");
                        }
                        Ok(_) => {}
                        Err(e) => warn!(error = %e, "poll tick aborted"),
                    }
                }

                _ = timer_ticker.tick() => {
                    self.run_due_timers().await;
                }

                update = next_update(&mut updates) => {
                    match update {
                        Some(update) => {
                            self.handle_metric_update(update).await;
                        }
                        None => {
                            warn!("metric update stream closed, continuing with polling only");
                            updates = None;
                        }
                    }
                }

                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("alert engine shutting down");
                        break;
                    }
                }
            }
        }
    }
}

/// Waits for the next pushed update. Pends forever without a subscription.
async fn next_update(
    updates: &mut Option<broadcast::Receiver<MetricUpdate>>,
) -> Option<MetricUpdate> {
    let Some(rx) = updates else {
        return futures::future::pending().await;
    };
    loop {
        match rx.recv().await {
            Ok(update) => return Some(update),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "metric update subscriber lagged");
            }
            Err(broadcast::error::RecvError::Closed) => return None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::{ChannelConfig, WebhookConfig};
    use crate::clock::ManualClock;
    use crate::metrics::{MetricCategory, StaticMetricsProvider};
    use crate::transport::RecordingTransport;
    use crate::types::{ComparisonOperator, Condition, Severity};
    use beacon_audit::{AuditAction, MemoryAuditSink};
    use chrono::Utc;

    struct Fixture {
        engine: AlertEngine,
        metrics: Arc<StaticMetricsProvider>,
        transport: Arc<RecordingTransport>,
        audit: Arc<MemoryAuditSink>,
        clock: ManualClock,
    }

    fn fixture() -> Fixture {
        let metrics = Arc::new(StaticMetricsProvider::new());
        let transport = Arc::new(RecordingTransport::new());
        let audit = Arc::new(MemoryAuditSink::new());
        let clock = ManualClock::new(Utc::now());
        let engine = AlertEngine::builder(metrics.clone(), transport.clone())
            .clock(Arc::new(clock.clone()))
            .audit(audit.clone())
            .build()
            .unwrap();
        engine
            .add_channel(NotificationChannel::new(
                "hook",
                "Hook",
                ChannelConfig::Webhook(WebhookConfig {
                    url: "https://example.com/hook".to_string(),
                    headers: std::collections::HashMap::new(),
                }),
            ))
            .unwrap();
        Fixture {
            engine,
            metrics,
            transport,
            audit,
            clock,
        }
    }

    fn cpu_rule(severity: Severity) -> AlertRule {
        AlertRule::builder(
            "cpu",
            Condition::threshold("cpu", ComparisonOperator::GreaterThan, 0.8).unwrap(),
        )
        .severity(severity)
        .build()
        .unwrap()
    }

    mod config_tests {
        use super::*;

        #[test]
        fn defaults() {
            let config = EngineConfig::default();
            assert_eq!(config.poll_interval, Duration::from_secs(30));
            assert!(config.realtime_bypasses_cooldown);
            assert!(config.validate().is_ok());
        }

        #[test]
        fn zero_interval_rejected() {
            let config = EngineConfig {
                poll_interval: Duration::ZERO,
                ..EngineConfig::default()
            };
            assert!(matches!(config.validate(), Err(AlertError::Config { .. })));
        }

        #[test]
        fn bad_base_url_rejected() {
            let config = EngineConfig {
                action_base_url: Some("not a url".to_string()),
                ..EngineConfig::default()
            };
            assert!(config.validate().is_err());
        }
    }

    mod lifecycle_tests {
        use super::*;

        #[tokio::test]
        async fn trigger_stores_audits_publishes_and_dispatches() {
            let f = fixture();
            let mut events = f.engine.subscribe();
            f.engine.add_rule(cpu_rule(Severity::High)).unwrap();

            let alerts = f
                .engine
                .evaluate(&MetricsSnapshot::from_pairs([("cpu", 0.95)]))
                .await;

            assert_eq!(alerts.len(), 1);
            assert_eq!(f.engine.get_active_alerts().len(), 1);
            assert_eq!(f.transport.count_for("hook"), 1);
            assert_eq!(f.audit.by_action(AuditAction::AlertTriggered).len(), 1);
            assert!(matches!(events.recv().await.unwrap(), AlertEvent::Triggered(_)));
        }

        #[tokio::test]
        async fn resolve_is_idempotent_and_audited_once() {
            let f = fixture();
            let mut events = f.engine.subscribe();
            f.engine.add_rule(cpu_rule(Severity::High)).unwrap();
            let alerts = f
                .engine
                .evaluate(&MetricsSnapshot::from_pairs([("cpu", 0.95)]))
                .await;
            let id = &alerts[0].id;

            assert!(f.engine.resolve_alert(id, "oncall"));
            assert!(!f.engine.resolve_alert(id, "oncall"));
            assert!(!f.engine.resolve_alert("missing", "oncall"));

            assert!(f.engine.get_active_alerts().is_empty());
            assert_eq!(f.audit.by_action(AuditAction::AlertResolved).len(), 1);
            let resolved = f.engine.get_alert(id).unwrap();
            assert_eq!(resolved.resolved_at, Some(f.clock.now()));

            events.recv().await.unwrap();
            match events.recv().await.unwrap() {
                AlertEvent::Resolved(a) => assert_eq!(a.resolved_by.as_deref(), Some("oncall")),
                other => panic!("unexpected event {other:?}"),
            }
        }

        #[tokio::test]
        async fn poll_failure_aborts_tick_only() {
            let f = fixture();
            f.engine.add_rule(cpu_rule(Severity::High)).unwrap();
            f.metrics.set_metric(MetricCategory::System, "cpu", 0.95);
            f.metrics.set_failing(MetricCategory::Model, true);

            assert!(f.engine.poll_once().await.is_err());
            assert!(f.engine.get_active_alerts().is_empty());

            f.metrics.set_failing(MetricCategory::Model, false);
            assert_eq!(f.engine.poll_once().await.unwrap().len(), 1);
        }

        #[tokio::test]
        async fn history_is_newest_first() {
            let f = fixture();
            f.engine.add_rule(cpu_rule(Severity::Low)).unwrap();
            let snapshot = MetricsSnapshot::from_pairs([("cpu", 0.95)]);

            let first = f.engine.evaluate(&snapshot).await;
            f.clock.advance_minutes(10);
            let second = f.engine.evaluate(&snapshot).await;

            let history = f.engine.get_alert_history(10);
            assert_eq!(history[0].id, second[0].id);
            assert_eq!(history[1].id, first[0].id);
            assert_eq!(f.engine.get_alert_history(1).len(), 1);
        }
    }

    mod push_tests {
        use super::*;

        #[tokio::test]
        async fn push_overlays_last_snapshot_and_only_runs_critical() {
            let f = fixture();
            f.engine.add_rule(cpu_rule(Severity::High)).unwrap();
            f.engine
                .add_rule(
                    AlertRule::builder(
                        "errors",
                        Condition::All(vec![
                            Condition::threshold("errorRate", ComparisonOperator::GreaterThan, 0.1)
                                .unwrap(),
                            Condition::threshold("rps", ComparisonOperator::GreaterThan, 10.0)
                                .unwrap(),
                        ]),
                    )
                    .severity(Severity::Critical)
                    .build()
                    .unwrap(),
                )
                .unwrap();
            f.metrics.set_metric(MetricCategory::Performance, "rps", 50.0);
            f.metrics.set_metric(MetricCategory::Performance, "errorRate", 0.0);
            f.metrics.set_metric(MetricCategory::System, "cpu", 0.1);
            f.engine.poll_once().await.unwrap();

            let alerts = f.engine.handle_metric_update(MetricUpdate::new("cpu", 0.99)).await;
            assert!(alerts.is_empty());

            let alerts = f
                .engine
                .handle_metric_update(MetricUpdate::new("errorRate", 0.5))
                .await;
            assert_eq!(alerts.len(), 1);
            assert_eq!(alerts[0].rule_id, "errors");
        }

        #[tokio::test]
        async fn push_cooldown_is_configurable() {
            let metrics = Arc::new(StaticMetricsProvider::new());
            let engine = AlertEngine::builder(metrics, Arc::new(RecordingTransport::new()))
                .config(EngineConfig {
                    realtime_bypasses_cooldown: false,
                    ..EngineConfig::default()
                })
                .clock(Arc::new(ManualClock::default()))
                .audit(Arc::new(MemoryAuditSink::new()))
                .build()
                .unwrap();
            engine.add_rule(cpu_rule(Severity::Critical)).unwrap();

            assert_eq!(engine.handle_metric_update(MetricUpdate::new("cpu", 0.9)).await.len(), 1);
            assert!(engine.handle_metric_update(MetricUpdate::new("cpu", 0.9)).await.is_empty());
        }
    }

    mod run_tests {
        use super::*;

        #[tokio::test]
        async fn run_stops_on_shutdown() {
            let f = fixture();
            let (tx, rx) = watch::channel(false);
            let engine = f.engine.clone();
            let handle = tokio::spawn(async move { engine.run(rx).await });

            tx.send(true).unwrap();
            tokio::time::timeout(Duration::from_secs(5), handle)
                .await
                .unwrap()
                .unwrap();
        }

        #[tokio::test]
        async fn run_handles_pushed_updates() {
            let f = fixture();
            f.engine.add_rule(cpu_rule(Severity::Critical)).unwrap();
            let mut events = f.engine.subscribe();
            let (tx, rx) = watch::channel(false);
            let engine = f.engine.clone();
            let handle = tokio::spawn(async move { engine.run(rx).await });

            // Give the loop time to subscribe before publishing.
            let mut published = 0;
            for _ in 0..50 {
                published = f.metrics.publish(MetricUpdate::new("cpu", 0.99));
                if published > 0 {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            assert_eq!(published, 1);

            let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(event.alert().rule_id, "cpu");

            tx.send(true).unwrap();
            handle.await.unwrap();
        }
    }
}
