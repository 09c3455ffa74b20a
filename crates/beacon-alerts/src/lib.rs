//! Operational alerting and escalation for Beacon.
//!
//! `beacon-alerts` evaluates rules against live metrics, turns the rules
//! that fire into alerts, fans each alert out to notification channels and
//! escalates alerts that stay unresolved.
//!
//! # Features
//!
//! - **Rules**: threshold, composite and predicate conditions with a
//!   per-rule cooldown
//! - **Two evaluation paths**: a periodic poll over every rule, and a
//!   real-time path for pushed metric updates that only runs critical rules
//! - **Channels**: email, chat, SMS, push and webhook transports, each with
//!   a severity filter and a rate limit
//! - **Isolated dispatch**: one slow or failing channel never blocks or
//!   fails the others
//! - **Escalation policies**: ordered, delayed steps that stop the moment
//!   an alert is resolved
//! - **Auto-resolve**: an optional re-check one cooldown after the alert
//! - **Audit trail**: every lifecycle transition and failed delivery goes to
//!   a [`beacon_audit::AuditSink`]
//!
//! # Example
//!
//! ```rust
//! use std::collections::HashMap;
//! use std::sync::Arc;
//!
//! use beacon_alerts::{
//!     AlertEngine, AlertRule, ChannelConfig, ComparisonOperator, Condition, MetricsSnapshot,
//!     NotificationChannel, RecordingTransport, Severity, StaticMetricsProvider, WebhookConfig,
//! };
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let transport = Arc::new(RecordingTransport::new());
//! let engine = AlertEngine::builder(Arc::new(StaticMetricsProvider::new()), transport.clone())
//!     .build()
//!     .unwrap();
//!
//! engine
//!     .add_channel(NotificationChannel::new(
//!         "ops-hook",
//!         "Ops webhook",
//!         ChannelConfig::Webhook(WebhookConfig {
//!             url: "https://hooks.example.com/ops".to_string(),
//!             headers: HashMap::new(),
//!         }),
//!     ))
//!     .unwrap();
//!
//! let condition =
//!     Condition::threshold("memoryUsage", ComparisonOperator::GreaterThan, 0.9).unwrap();
//! engine
//!     .add_rule(
//!         AlertRule::builder("system_resources", condition)
//!             .severity(Severity::Critical)
//!             .build()
//!             .unwrap(),
//!     )
//!     .unwrap();
//!
//! let alerts = engine
//!     .evaluate(&MetricsSnapshot::from_pairs([("memoryUsage", 0.95)]))
//!     .await;
//! assert_eq!(alerts.len(), 1);
//! assert_eq!(transport.count_for("ops-hook"), 1);
//!
//! assert!(engine.resolve_alert(&alerts[0].id, "oncall"));
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod adapters;
mod audit;
pub mod channels;
pub mod clock;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod escalation;
pub mod metrics;
pub mod payload;
pub mod rules;
pub mod store;
pub mod timer;
pub mod transport;
pub mod types;

// Re-export main types at crate root
pub use adapters::WireMessage;
pub use channels::{
    ChannelClaim, ChannelConfig, ChannelRegistry, ChannelType, ChatConfig, Claim, EmailConfig, InFlight,
    NotificationChannel, PushConfig, SmsConfig, WebhookConfig,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use dispatcher::{DispatchReport, Dispatcher};
pub use engine::{
    AlertEngine, AlertEngineBuilder, AlertEvent, AutoResolveTask, EngineConfig, TimerReport,
};
pub use error::{AlertError, Result};
pub use escalation::{
    EscalationCondition, EscalationPolicy, EscalationScheduler, EscalationStep, EscalationTask,
};
pub use metrics::{
    MetricCategory, MetricUpdate, MetricsProvider, MetricsSnapshot, StaticMetricsProvider,
    fetch_snapshot,
};
pub use payload::NotificationPayload;
pub use rules::{EvaluationMode, RuleEngine};
pub use store::AlertStore;
pub use timer::{ScheduledTimer, TimerId, TimerQueue};
pub use transport::{Delivery, HttpTransport, RecordingTransport, Transport};
pub use types::{
    Alert, AlertAction, AlertRule, AlertRuleBuilder, AlertType, ComparisonOperator, Condition,
    Severity, ThresholdCondition,
};
