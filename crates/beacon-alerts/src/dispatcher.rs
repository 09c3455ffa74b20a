//! Fan-out of notification payloads to channels.
//!
//! Every send attempt runs concurrently, is bounded by a timeout and is
//! isolated from panics, so one bad channel can never hold up or suppress
//! another. Nothing in here returns an error to the caller; failures end up
//! in the audit sink.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use beacon_audit::AuditSink;
use futures::FutureExt;
use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::adapters::WireMessage;
use crate::audit;
use crate::channels::{ChannelRegistry, Claim, NotificationChannel};
use crate::clock::Clock;
use crate::error::{AlertError, Result};
use crate::payload::NotificationPayload;
use crate::transport::{Delivery, Transport};

/// Outcome of one fan-out.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Channels that accepted the payload.
    pub delivered: Vec<String>,
    /// Channels that failed, with the error message.
    pub failed: Vec<(String, String)>,
}

impl DispatchReport {
    /// Number of channels attempted.
    #[must_use]
    pub fn attempted(&self) -> usize {
        self.delivered.len() + self.failed.len()
    }
}

/// Sends payloads through the channel registry.
pub struct Dispatcher {
    channels: Arc<ChannelRegistry>,
    transport: Arc<dyn Transport>,
    audit: Arc<dyn AuditSink>,
    clock: Arc<dyn Clock>,
    channel_timeout: Duration,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("channels", &self.channels.len())
            .field("transport", &self.transport)
            .field("channel_timeout", &self.channel_timeout)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    /// Creates a dispatcher.
    #[must_use]
    pub fn new(
        channels: Arc<ChannelRegistry>,
        transport: Arc<dyn Transport>,
        audit: Arc<dyn AuditSink>,
        clock: Arc<dyn Clock>,
        channel_timeout: Duration,
    ) -> Self {
        Self {
            channels,
            transport,
            audit,
            clock,
            channel_timeout,
        }
    }

    /// First dispatch: sends to every channel that passes the gate.
    ///
    /// Each channel is claimed before its send starts. A channel already
    /// claimed by another dispatch is waited on, then re-checked, so a send
    /// that fails never causes a concurrent payload to be skipped.
    pub async fn dispatch(&self, payload: &NotificationPayload) -> DispatchReport {
        let candidates = self.channels.candidates(payload.severity);

        if candidates.is_empty() {
            debug!(
                alert_id = %payload.alert_id,
                severity = %payload.severity,
                "no eligible channels"
            );
            return DispatchReport::default();
        }

        let outcomes = join_all(candidates.iter().map(|id| self.dispatch_one(id, payload))).await;

        let mut report = DispatchReport::default();
        for (channel, outcome) in outcomes.into_iter().flatten() {
            match outcome {
                Ok(()) => report.delivered.push(channel.id),
                Err(e) => self.record_failure(&channel, payload, &e, &mut report),
            }
        }

        self.record_sent(payload, &report);
        report
    }

    /// Claims one channel and sends through it. `None` if the channel turned
    /// out not to be eligible.
    async fn dispatch_one(
        &self,
        channel_id: &str,
        payload: &NotificationPayload,
    ) -> Option<(NotificationChannel, Result<()>)> {
        loop {
            match self
                .channels
                .try_claim(channel_id, payload.severity, self.clock.now())
            {
                Claim::Granted(claim) => {
                    let outcome = self.attempt(&claim.channel, payload).await;
                    let channel = claim.channel.clone();
                    if outcome.is_ok() {
                        self.channels.confirm(claim);
                    } else {
                        self.channels.release(claim);
                    }
                    return Some((channel, outcome));
                }
                Claim::Busy(in_flight) => {
                    debug!(
                        channel = %channel_id,
                        alert_id = %payload.alert_id,
                        "channel busy, waiting for in-flight send"
                    );
                    in_flight.settled().await;
                }
                Claim::Ineligible => return None,
            }
        }
    }

    /// Escalation: sends to the named channels that are enabled, skipping
    /// the severity filter and rate limit. `last_sent` is not touched.
    pub async fn send_to(&self, channel_ids: &[String], payload: &NotificationPayload) -> DispatchReport {
        let targets: Vec<NotificationChannel> = channel_ids
            .iter()
            .filter_map(|id| {
                let channel = self.channels.get(id);
                if channel.is_none() {
                    warn!(channel = %id, alert_id = %payload.alert_id, "escalation targets unknown channel");
                }
                channel
            })
            .filter(|c| c.enabled)
            .collect();

        let outcomes = join_all(targets.iter().map(|c| self.attempt(c, payload))).await;

        let mut report = DispatchReport::default();
        for (channel, outcome) in targets.iter().zip(outcomes) {
            match outcome {
                Ok(()) => report.delivered.push(channel.id.clone()),
                Err(e) => self.record_failure(channel, payload, &e, &mut report),
            }
        }

        self.record_sent(payload, &report);
        report
    }

    /// Sends a synthetic low-severity payload through one channel, bypassing
    /// the gate. Returns whether the send succeeded.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::ChannelNotFound` if the channel does not exist.
    pub async fn test_channel(&self, channel_id: &str) -> Result<bool> {
        let channel = self
            .channels
            .get(channel_id)
            .ok_or_else(|| AlertError::ChannelNotFound {
                id: channel_id.to_string(),
            })?;
        let payload = NotificationPayload::test(channel_id, self.clock.now());

        match self.attempt(&channel, &payload).await {
            Ok(()) => {
                info!(channel = %channel_id, "test notification delivered");
                Ok(true)
            }
            Err(e) => {
                let mut report = DispatchReport::default();
                self.record_failure(&channel, &payload, &e, &mut report);
                Ok(false)
            }
        }
    }

    /// One bounded, panic-isolated send.
    async fn attempt(&self, channel: &NotificationChannel, payload: &NotificationPayload) -> Result<()> {
        let delivery = Delivery {
            channel_id: channel.id.clone(),
            message: WireMessage::render(&channel.transport, payload),
        };

        let send = AssertUnwindSafe(async { self.transport.send(&delivery).await }).catch_unwind();
        match tokio::time::timeout(self.channel_timeout, send).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(AlertError::ChannelSend {
                channel: channel.id.clone(),
                reason: "transport panicked".to_string(),
            }),
            Err(_) => Err(AlertError::ChannelTimeout {
                channel: channel.id.clone(),
                timeout_ms: u64::try_from(self.channel_timeout.as_millis()).unwrap_or(u64::MAX),
            }),
        }
    }

    fn record_failure(
        &self,
        channel: &NotificationChannel,
        payload: &NotificationPayload,
        error: &AlertError,
        report: &mut DispatchReport,
    ) {
        warn!(
            channel = %channel.id,
            channel_type = %channel.channel_type(),
            alert_id = %payload.alert_id,
            error = %error,
            "notification failed"
        );
        self.audit
            .record(&audit::notification_failed(channel, payload, error, self.clock.now()));
        report.failed.push((channel.id.clone(), error.to_string()));
    }

    fn record_sent(&self, payload: &NotificationPayload, report: &DispatchReport) {
        if report.delivered.is_empty() {
            return;
        }
        info!(
            alert_id = %payload.alert_id,
            delivered = report.delivered.len(),
            failed = report.failed.len(),
            "notification dispatched"
        );
        self.audit
            .record(&audit::alert_sent(payload, &report.delivered, self.clock.now()));
    }
}
