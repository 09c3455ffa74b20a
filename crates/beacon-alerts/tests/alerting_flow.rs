//! Integration tests for the alert engine.
//!
//! These tests verify:
//! 1. Cooldown gating across poll ticks
//! 2. Dispatch isolation between failing, hanging and healthy channels
//! 3. Channel rate limits and severity filters
//! 4. Escalation steps and their cancellation on resolve
//! 5. Auto-resolve checks
//! 6. A full trigger → dispatch → escalate flow

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use beacon_alerts::{
    AlertEngine, AlertRule, ChannelConfig, ChatConfig, Clock, ComparisonOperator, Condition,
    Delivery, EngineConfig, EscalationCondition, EscalationPolicy, EscalationStep, ManualClock,
    MetricCategory, MetricsSnapshot, NotificationChannel, RecordingTransport, Severity, SmsConfig,
    StaticMetricsProvider, WebhookConfig, WireMessage,
};
use beacon_audit::{AuditAction, MemoryAuditSink};
use chrono::Utc;

struct Harness {
    engine: AlertEngine,
    metrics: Arc<StaticMetricsProvider>,
    transport: Arc<RecordingTransport>,
    audit: Arc<MemoryAuditSink>,
    clock: ManualClock,
}

fn harness() -> Harness {
    harness_with(EngineConfig::default())
}

fn harness_with(config: EngineConfig) -> Harness {
    let metrics = Arc::new(StaticMetricsProvider::new());
    let transport = Arc::new(RecordingTransport::new());
    let audit = Arc::new(MemoryAuditSink::new());
    let clock = ManualClock::new(Utc::now());
    let engine = AlertEngine::builder(metrics.clone(), transport.clone())
        .config(config)
        .clock(Arc::new(clock.clone()))
        .audit(audit.clone())
        .build()
        .unwrap();
    Harness {
        engine,
        metrics,
        transport,
        audit,
        clock,
    }
}

fn webhook(id: &str) -> NotificationChannel {
    NotificationChannel::new(
        id,
        id,
        ChannelConfig::Webhook(WebhookConfig {
            url: format!("https://hooks.example.com/{id}"),
            headers: HashMap::new(),
        }),
    )
}

fn chat(id: &str) -> NotificationChannel {
    NotificationChannel::new(
        id,
        id,
        ChannelConfig::Chat(ChatConfig {
            webhook_url: format!("https://chat.example.com/{id}"),
            channel: Some("#ops".to_string()),
            username: None,
        }),
    )
}

fn sms(id: &str) -> NotificationChannel {
    NotificationChannel::new(
        id,
        id,
        ChannelConfig::Sms(SmsConfig {
            api_url: "https://sms.example.com/messages".to_string(),
            account_sid: "AC123".to_string(),
            auth_token: "secret".to_string(),
            from: "+15550000".to_string(),
            to: vec!["+15551234".to_string()],
        }),
    )
}

fn threshold_rule(id: &str, metric: &str, above: f64, severity: Severity) -> AlertRule {
    AlertRule::builder(
        id,
        Condition::threshold(metric, ComparisonOperator::GreaterThan, above).unwrap(),
    )
    .severity(severity)
    .build()
    .unwrap()
}

fn title_of(delivery: &Delivery) -> String {
    match &delivery.message {
        WireMessage::Chat(m) => m.body.attachments[0].title.clone(),
        WireMessage::Webhook(m) => m.body.alert.title.clone(),
        WireMessage::Sms(m) => m.body.clone(),
        WireMessage::Email(m) => m.body.subject.clone(),
        WireMessage::Push(m) => m.body.notification.title.clone(),
    }
}

fn snapshot(metric: &str, value: f64) -> MetricsSnapshot {
    MetricsSnapshot::from_pairs([(metric, value)])
}

// ============================================================================
// Cooldown
// ============================================================================

#[tokio::test]
async fn test_cooldown_allows_one_alert_per_window() {
    let h = harness();
    h.engine.add_channel(webhook("ops")).unwrap();
    h.engine
        .add_rule(
            AlertRule::builder(
                "cpu",
                Condition::threshold("cpu", ComparisonOperator::GreaterThan, 0.8).unwrap(),
            )
            .cooldown_minutes(5)
            .build()
            .unwrap(),
        )
        .unwrap();

    let mut raised = 0;
    for _ in 0..5 {
        raised += h.engine.evaluate(&snapshot("cpu", 0.95)).await.len();
        h.clock.advance_minutes(1);
    }

    assert_eq!(raised, 1);
    assert_eq!(h.engine.get_alert_history(100).len(), 1);
    assert_eq!(h.transport.count_for("ops"), 1);
}

// ============================================================================
// Dispatch isolation
// ============================================================================

#[tokio::test]
async fn test_failing_and_hanging_channels_do_not_block_others() {
    let h = harness_with(EngineConfig {
        channel_timeout: Duration::from_millis(100),
        ..EngineConfig::default()
    });
    for id in ["a", "b", "c"] {
        h.engine
            .add_channel(webhook(id).with_rate_limit_minutes(5))
            .unwrap();
    }
    h.transport.set_failing("b", true);
    h.transport.set_hanging("c", true);
    h.engine
        .add_rule(threshold_rule("cpu", "cpu", 0.8, Severity::High))
        .unwrap();

    let started = std::time::Instant::now();
    let alerts = h.engine.evaluate(&snapshot("cpu", 0.95)).await;
    assert!(started.elapsed() < Duration::from_secs(5));

    assert_eq!(alerts.len(), 1);
    assert_eq!(h.transport.count_for("a"), 1);

    let failures = h.audit.by_action(AuditAction::NotificationFailed);
    let mut failed: Vec<_> = failures
        .iter()
        .filter_map(|r| r.metadata_str("channel_id").map(str::to_string))
        .collect();
    failed.sort();
    assert_eq!(failed, vec!["b", "c"]);

    // Only the successful channel counts against its rate limit.
    assert_eq!(h.engine.get_channel("a").unwrap().last_sent, Some(h.clock.now()));
    assert_eq!(h.engine.get_channel("b").unwrap().last_sent, None);
    assert_eq!(h.engine.get_channel("c").unwrap().last_sent, None);

    let sent = h.audit.by_action(AuditAction::AlertSent);
    assert_eq!(sent.len(), 1);
}

#[tokio::test]
async fn test_slow_failing_channel_still_attempts_every_alert() {
    let h = harness();
    h.engine
        .add_channel(webhook("ops").with_rate_limit_minutes(5))
        .unwrap();
    h.transport.set_delay("ops", Duration::from_millis(20));
    h.transport.set_failing("ops", true);
    h.engine
        .add_rule(threshold_rule("a", "cpu", 0.8, Severity::High))
        .unwrap();
    h.engine
        .add_rule(threshold_rule("b", "cpu", 0.8, Severity::High))
        .unwrap();

    let alerts = h.engine.evaluate(&snapshot("cpu", 0.95)).await;
    assert_eq!(alerts.len(), 2);

    let mut attempted: Vec<String> = h
        .audit
        .by_action(AuditAction::NotificationFailed)
        .iter()
        .filter_map(|r| r.metadata["payload"]["alert_id"].as_str().map(str::to_string))
        .collect();
    attempted.sort();
    let mut expected: Vec<String> = alerts.iter().map(|a| a.id.clone()).collect();
    expected.sort();
    assert_eq!(attempted, expected);
    assert_eq!(h.engine.get_channel("ops").unwrap().last_sent, None);
}

// ============================================================================
// Rate limit and severity filter
// ============================================================================

#[tokio::test]
async fn test_rate_limit_suppresses_second_send() {
    let h = harness();
    h.engine
        .add_channel(webhook("ops").with_rate_limit_minutes(5))
        .unwrap();
    h.engine
        .add_rule(threshold_rule("cpu", "cpu", 0.8, Severity::High))
        .unwrap();
    h.engine
        .add_rule(threshold_rule("mem", "mem", 0.8, Severity::High))
        .unwrap();

    h.engine.evaluate(&snapshot("cpu", 0.95)).await;
    h.clock.advance_minutes(1);
    h.engine.evaluate(&snapshot("mem", 0.95)).await;
    assert_eq!(h.engine.get_active_alerts().len(), 2);
    assert_eq!(h.transport.count_for("ops"), 1);

    h.clock.advance_minutes(5);
    h.engine
        .evaluate(&MetricsSnapshot::from_pairs([("cpu", 0.95), ("mem", 0.5)]))
        .await;
    assert_eq!(h.transport.count_for("ops"), 2);
}

#[tokio::test]
async fn test_severity_filter_blocks_lower_severities() {
    let h = harness();
    h.engine
        .add_channel(webhook("pager").with_severity_filter([Severity::High, Severity::Critical]))
        .unwrap();
    for (id, severity) in [
        ("low", Severity::Low),
        ("medium", Severity::Medium),
        ("high", Severity::High),
        ("critical", Severity::Critical),
    ] {
        h.engine
            .add_rule(threshold_rule(id, id, 0.5, severity))
            .unwrap();
    }

    h.engine
        .evaluate(&MetricsSnapshot::from_pairs([
            ("low", 1.0),
            ("medium", 1.0),
            ("high", 1.0),
            ("critical", 1.0),
        ]))
        .await;

    assert_eq!(h.engine.get_active_alerts().len(), 4);
    let severities: Vec<Severity> = h
        .transport
        .deliveries()
        .iter()
        .map(|d| match &d.message {
            WireMessage::Webhook(m) => m.body.alert.severity,
            other => panic!("unexpected message {other:?}"),
        })
        .collect();
    assert_eq!(severities.len(), 2);
    assert!(severities.iter().all(|s| *s >= Severity::High));
}

#[tokio::test]
async fn test_disabled_channel_receives_nothing() {
    let h = harness();
    h.engine.add_channel(webhook("off").enabled(false)).unwrap();
    h.engine
        .add_rule(threshold_rule("cpu", "cpu", 0.8, Severity::Critical))
        .unwrap();

    h.engine.evaluate(&snapshot("cpu", 0.95)).await;
    assert_eq!(h.transport.count_for("off"), 0);
    assert!(!h.engine.test_channel("missing").await);
}

// ============================================================================
// Escalation
// ============================================================================

fn escalating_rule(policy: &str) -> AlertRule {
    AlertRule::builder(
        "errors",
        Condition::threshold("errorRate", ComparisonOperator::GreaterThan, 0.1).unwrap(),
    )
    .name("High error rate")
    .severity(Severity::High)
    .escalation_policy(policy)
    .build()
    .unwrap()
}

#[tokio::test]
async fn test_escalation_fires_steps_in_order() {
    let h = harness();
    h.engine.add_channel(webhook("first")).unwrap();
    h.engine.add_channel(webhook("second")).unwrap();
    h.engine
        .add_escalation_policy(
            EscalationPolicy::new("oncall", "On-call")
                .step(EscalationStep::new(5, ["first"]))
                .step(EscalationStep::new(15, ["second"])),
        )
        .unwrap();
    h.engine.add_rule(escalating_rule("oncall")).unwrap();

    let alerts = h.engine.evaluate(&snapshot("errorRate", 0.5)).await;
    let alert_id = alerts[0].id.clone();
    assert_eq!(h.engine.pending_escalations_for(&alert_id), 2);
    h.transport.clear();

    h.clock.advance_minutes(4);
    assert_eq!(h.engine.run_due_timers().await.escalations_fired, 0);

    h.clock.advance_minutes(1);
    assert_eq!(h.engine.run_due_timers().await.escalations_fired, 1);
    let deliveries = h.transport.deliveries();
    assert_eq!(deliveries.len(), 1);
    assert_eq!(deliveries[0].channel_id, "first");
    assert_eq!(title_of(&deliveries[0]), "[ESCALATED - Level 1] High error rate");

    h.clock.advance_minutes(10);
    assert_eq!(h.engine.run_due_timers().await.escalations_fired, 1);
    assert_eq!(h.transport.count_for("second"), 1);
    assert_eq!(h.engine.pending_escalations_for(&alert_id), 0);
}

#[tokio::test]
async fn test_resolve_cancels_pending_escalations() {
    let h = harness();
    h.engine.add_channel(webhook("first")).unwrap();
    h.engine.add_channel(webhook("second")).unwrap();
    h.engine
        .add_escalation_policy(
            EscalationPolicy::new("oncall", "On-call")
                .step(EscalationStep::new(5, ["first"]))
                .step(EscalationStep::new(10, ["second"]))
                .step(EscalationStep::new(30, ["first", "second"])),
        )
        .unwrap();
    h.engine.add_rule(escalating_rule("oncall")).unwrap();

    let alerts = h.engine.evaluate(&snapshot("errorRate", 0.5)).await;
    h.transport.clear();

    h.clock.advance_minutes(2);
    assert!(h.engine.resolve_alert(&alerts[0].id, "oncall"));
    assert_eq!(h.engine.pending_escalations_for(&alerts[0].id), 0);

    h.clock.advance_minutes(60);
    let report = h.engine.run_due_timers().await;
    assert_eq!(report.escalations_fired, 0);
    assert!(h.transport.deliveries().is_empty());
}

#[tokio::test]
async fn test_escalation_condition_gates_step() {
    let h = harness();
    h.engine.add_channel(webhook("exec")).unwrap();
    h.engine
        .add_escalation_policy(
            EscalationPolicy::new("exec", "Executive").step(
                EscalationStep::new(0, ["exec"])
                    .when(EscalationCondition::SeverityAtLeast(Severity::Critical)),
            ),
        )
        .unwrap();
    h.engine.add_rule(escalating_rule("exec")).unwrap();

    h.engine.evaluate(&snapshot("errorRate", 0.5)).await;
    h.transport.clear();

    let report = h.engine.run_due_timers().await;
    assert_eq!(report.escalations_fired, 0);
    assert_eq!(report.escalations_skipped, 1);
    assert!(h.transport.deliveries().is_empty());
}

#[tokio::test]
async fn test_removed_policy_skips_scheduled_steps() {
    let h = harness();
    h.engine.add_channel(webhook("first")).unwrap();
    h.engine
        .add_escalation_policy(
            EscalationPolicy::new("oncall", "On-call").step(EscalationStep::new(5, ["first"])),
        )
        .unwrap();
    h.engine.add_rule(escalating_rule("oncall")).unwrap();

    h.engine.evaluate(&snapshot("errorRate", 0.5)).await;
    h.transport.clear();
    assert!(h.engine.remove_escalation_policy("oncall"));

    h.clock.advance_minutes(5);
    assert_eq!(h.engine.run_due_timers().await.escalations_skipped, 1);
    assert!(h.transport.deliveries().is_empty());
}

// ============================================================================
// Auto-resolve
// ============================================================================

fn auto_resolving_rule() -> AlertRule {
    AlertRule::builder(
        "latency",
        Condition::threshold("p99", ComparisonOperator::GreaterThan, 500.0).unwrap(),
    )
    .cooldown_minutes(5)
    .auto_resolve(true)
    .build()
    .unwrap()
}

#[tokio::test]
async fn test_auto_resolve_when_condition_clears() {
    let h = harness();
    let mut events = h.engine.subscribe();
    h.engine.add_rule(auto_resolving_rule()).unwrap();
    h.metrics.set_metric(MetricCategory::Performance, "p99", 900.0);

    let alerts = h.engine.poll_once().await.unwrap();
    assert_eq!(alerts.len(), 1);
    assert_eq!(h.engine.pending_auto_resolve().len(), 1);

    h.metrics.set_metric(MetricCategory::Performance, "p99", 120.0);
    h.clock.advance_minutes(5);
    let report = h.engine.run_due_timers().await;
    assert_eq!(report.auto_resolve_checks, 1);
    assert_eq!(report.auto_resolved, 1);

    let alert = h.engine.get_alert(&alerts[0].id).unwrap();
    assert!(alert.resolved);
    assert_eq!(alert.resolved_by.as_deref(), Some("auto_resolved"));
    assert_eq!(h.audit.by_action(AuditAction::AlertResolved).len(), 1);

    events.recv().await.unwrap();
    assert!(matches!(
        events.recv().await.unwrap(),
        beacon_alerts::AlertEvent::Resolved(_)
    ));
}

#[tokio::test]
async fn test_auto_resolve_leaves_alert_open_while_condition_holds() {
    let h = harness();
    h.engine.add_rule(auto_resolving_rule()).unwrap();
    h.metrics.set_metric(MetricCategory::Performance, "p99", 900.0);

    let alerts = h.engine.poll_once().await.unwrap();
    h.clock.advance_minutes(5);
    let report = h.engine.run_due_timers().await;

    assert_eq!(report.auto_resolve_checks, 1);
    assert_eq!(report.auto_resolved, 0);
    assert!(h.engine.get_alert(&alerts[0].id).unwrap().is_active());
}

#[tokio::test]
async fn test_auto_resolve_leaves_alert_open_on_fetch_error() {
    let h = harness();
    h.engine.add_rule(auto_resolving_rule()).unwrap();
    h.metrics.set_metric(MetricCategory::Performance, "p99", 900.0);

    let alerts = h.engine.poll_once().await.unwrap();
    h.metrics.set_metric(MetricCategory::Performance, "p99", 100.0);
    h.metrics.set_failing(MetricCategory::Business, true);
    h.clock.advance_minutes(5);

    assert_eq!(h.engine.run_due_timers().await.auto_resolved, 0);
    assert!(h.engine.get_alert(&alerts[0].id).unwrap().is_active());
}

#[tokio::test]
async fn test_manual_resolve_cancels_auto_resolve() {
    let h = harness();
    h.engine.add_rule(auto_resolving_rule()).unwrap();
    h.metrics.set_metric(MetricCategory::Performance, "p99", 900.0);

    let alerts = h.engine.poll_once().await.unwrap();
    assert!(h.engine.resolve_alert(&alerts[0].id, "oncall"));
    assert!(h.engine.pending_auto_resolve().is_empty());

    h.clock.advance_minutes(5);
    assert_eq!(h.engine.run_due_timers().await.auto_resolve_checks, 0);
    assert_eq!(
        h.engine.get_alert(&alerts[0].id).unwrap().resolved_by.as_deref(),
        Some("oncall")
    );
}

// ============================================================================
// End to end
// ============================================================================

#[tokio::test]
async fn test_system_resources_flow() {
    let h = harness();
    let t0 = h.clock.now();

    h.engine
        .add_channel(
            chat("slack")
                .with_severity_filter([Severity::High, Severity::Critical])
                .with_rate_limit_minutes(2),
        )
        .unwrap();
    h.engine
        .add_channel(
            sms("sms")
                .with_severity_filter([Severity::Critical])
                .with_rate_limit_minutes(30),
        )
        .unwrap();
    // `discord` is named by the policy but never configured.
    h.engine
        .add_escalation_policy(
            EscalationPolicy::new("critical-path", "Critical path")
                .step(EscalationStep::new(0, ["slack", "discord"]))
                .step(EscalationStep::new(15, ["sms"])),
        )
        .unwrap();
    h.engine
        .add_rule(
            AlertRule::builder(
                "system_resources",
                Condition::threshold("memoryUsage", ComparisonOperator::GreaterThan, 0.9).unwrap(),
            )
            .name("High memory usage")
            .severity(Severity::Critical)
            .cooldown_minutes(2)
            .escalation_policy("critical-path")
            .build()
            .unwrap(),
        )
        .unwrap();

    let alerts = h.engine.evaluate(&snapshot("memoryUsage", 0.95)).await;
    assert_eq!(alerts.len(), 1);
    let alert = &alerts[0];
    assert_eq!(alert.created_at, t0);

    // Initial dispatch: both channels accept critical.
    assert_eq!(h.transport.count_for("slack"), 1);
    assert_eq!(h.transport.count_for("sms"), 1);
    assert_eq!(h.engine.pending_escalations_for(&alert.id), 2);

    // Step 0 is due immediately and reaches slack despite its rate limit.
    let report = h.engine.run_due_timers().await;
    assert_eq!(report.escalations_fired, 1);
    assert_eq!(h.transport.count_for("slack"), 2);
    assert_eq!(h.transport.count_for("discord"), 0);
    let escalated = h
        .transport
        .deliveries()
        .into_iter()
        .rfind(|d| d.channel_id == "slack")
        .unwrap();
    assert_eq!(title_of(&escalated), "[ESCALATED - Level 1] High memory usage");

    // Step 1 at t0+15m goes to sms regardless of its 30 minute rate limit.
    h.clock.advance_minutes(14);
    assert_eq!(h.engine.run_due_timers().await.escalations_fired, 0);
    h.clock.advance_minutes(1);
    assert_eq!(h.engine.run_due_timers().await.escalations_fired, 1);
    assert_eq!(h.transport.count_for("sms"), 2);
    let sms_text = title_of(
        &h.transport
            .deliveries()
            .into_iter()
            .rfind(|d| d.channel_id == "sms")
            .unwrap(),
    );
    assert!(sms_text.starts_with("[CRITICAL] [ESCALATED - Level 2] High memory usage"));
    assert!(sms_text.chars().count() <= 160);

    // Escalation sends leave the rate-limit clock alone.
    assert_eq!(h.engine.get_channel("sms").unwrap().last_sent, Some(t0));

    assert!(h.engine.resolve_alert(&alert.id, "oncall"));
    assert_eq!(h.audit.by_action(AuditAction::AlertTriggered).len(), 1);
    assert_eq!(h.audit.by_action(AuditAction::AlertResolved).len(), 1);
}

#[tokio::test]
async fn test_resolving_before_step_one_stops_sms_escalation() {
    let h = harness();
    h.engine
        .add_channel(sms("sms").with_severity_filter([Severity::Critical]))
        .unwrap();
    h.engine
        .add_escalation_policy(
            EscalationPolicy::new("critical-path", "Critical path")
                .step(EscalationStep::new(15, ["sms"])),
        )
        .unwrap();
    h.engine
        .add_rule(
            AlertRule::builder(
                "system_resources",
                Condition::threshold("memoryUsage", ComparisonOperator::GreaterThan, 0.9).unwrap(),
            )
            .severity(Severity::Critical)
            .escalation_policy("critical-path")
            .build()
            .unwrap(),
        )
        .unwrap();

    let alerts = h.engine.evaluate(&snapshot("memoryUsage", 0.95)).await;
    assert_eq!(h.transport.count_for("sms"), 1);

    h.clock.advance_minutes(10);
    h.engine.resolve_alert(&alerts[0].id, "oncall");
    h.clock.advance_minutes(10);
    h.engine.run_due_timers().await;

    assert_eq!(h.transport.count_for("sms"), 1);
}
