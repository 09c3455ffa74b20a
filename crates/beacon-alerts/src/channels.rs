//! Notification channels and the channel registry.
//!
//! A [`NotificationChannel`] is a configured destination: one transport, a
//! severity filter and a rate limit. The [`ChannelRegistry`] owns every
//! channel and is the only place `last_sent` is mutated.
//!
//! First-dispatch sends go through a claim. At most one claim per channel is
//! in flight; `last_sent` is stamped only when the claimed send succeeds, and
//! a dispatch that finds the channel busy waits for the claim to settle
//! before deciding whether the channel is still eligible.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::info;
use url::Url;

use crate::clock::elapsed;
use crate::error::{AlertError, Result};
use crate::types::Severity;

/// The transport family of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelType {
    /// Email via an HTTP mail API.
    Email,
    /// Chat webhook (Slack, Discord, Mattermost).
    Chat,
    /// SMS gateway.
    Sms,
    /// Mobile push via a topic-based push service.
    Push,
    /// Generic JSON webhook.
    Webhook,
}

impl ChannelType {
    /// Returns the type as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Chat => "chat",
            Self::Sms => "sms",
            Self::Push => "push",
            Self::Webhook => "webhook",
        }
    }
}

impl fmt::Display for ChannelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Email transport settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailConfig {
    /// Mail API endpoint that accepts a JSON message.
    pub api_url: String,
    /// Bearer token for the mail API.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Sender address.
    pub from: String,
    /// Recipient addresses.
    pub recipients: Vec<String>,
}

/// Chat webhook settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatConfig {
    /// Incoming-webhook URL.
    pub webhook_url: String,
    /// Channel override (e.g. `#ops`).
    #[serde(default)]
    pub channel: Option<String>,
    /// Bot display name.
    #[serde(default)]
    pub username: Option<String>,
}

/// SMS gateway settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmsConfig {
    /// Messages endpoint of the gateway.
    pub api_url: String,
    /// Account identifier, used as the basic-auth user.
    pub account_sid: String,
    /// Account secret, used as the basic-auth password.
    pub auth_token: String,
    /// Sending number.
    pub from: String,
    /// Destination numbers.
    pub to: Vec<String>,
}

/// Push service settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushConfig {
    /// Send endpoint of the push service.
    pub api_url: String,
    /// Server credential.
    pub server_key: String,
    /// Topics to publish to.
    pub topics: Vec<String>,
}

/// Generic webhook settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// Target URL.
    pub url: String,
    /// Extra request headers.
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

/// Transport configuration, one variant per channel type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ChannelConfig {
    /// Email.
    Email(EmailConfig),
    /// Chat webhook.
    Chat(ChatConfig),
    /// SMS.
    Sms(SmsConfig),
    /// Push.
    Push(PushConfig),
    /// Generic webhook.
    Webhook(WebhookConfig),
}

impl ChannelConfig {
    /// Returns the channel type for this config.
    #[must_use]
    pub const fn channel_type(&self) -> ChannelType {
        match self {
            Self::Email(_) => ChannelType::Email,
            Self::Chat(_) => ChannelType::Chat,
            Self::Sms(_) => ChannelType::Sms,
            Self::Push(_) => ChannelType::Push,
            Self::Webhook(_) => ChannelType::Webhook,
        }
    }

    /// Checks that every field the transport needs is present.
    ///
    /// Returns the problem as a message; the caller attaches the channel id.
    fn problem(&self) -> Option<String> {
        match self {
            Self::Email(c) => check_url("api_url", &c.api_url)
                .or_else(|| non_empty("from", &c.from))
                .or_else(|| non_empty_list("recipients", &c.recipients)),
            Self::Chat(c) => check_url("webhook_url", &c.webhook_url),
            Self::Sms(c) => check_url("api_url", &c.api_url)
                .or_else(|| non_empty("account_sid", &c.account_sid))
                .or_else(|| non_empty("auth_token", &c.auth_token))
                .or_else(|| non_empty("from", &c.from))
                .or_else(|| non_empty_list("to", &c.to)),
            Self::Push(c) => check_url("api_url", &c.api_url)
                .or_else(|| non_empty("server_key", &c.server_key))
                .or_else(|| non_empty_list("topics", &c.topics)),
            Self::Webhook(c) => check_url("url", &c.url),
        }
    }
}

fn non_empty(field: &str, value: &str) -> Option<String> {
    value
        .trim()
        .is_empty()
        .then(|| format!("{field} is required"))
}

fn non_empty_list(field: &str, values: &[String]) -> Option<String> {
    if values.is_empty() || values.iter().any(|v| v.trim().is_empty()) {
        Some(format!("{field} must list at least one non-empty entry"))
    } else {
        None
    }
}

fn check_url(field: &str, value: &str) -> Option<String> {
    if let Some(problem) = non_empty(field, value) {
        return Some(problem);
    }
    match Url::parse(value) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => None,
        Ok(url) => Some(format!("{field} must use http or https, got '{}'", url.scheme())),
        Err(e) => Some(format!("{field} is not a valid URL: {e}")),
    }
}

fn all_severities() -> HashSet<Severity> {
    Severity::ALL.into_iter().collect()
}

const fn default_enabled() -> bool {
    true
}

/// A configured notification destination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationChannel {
    /// Unique identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Transport settings.
    pub transport: ChannelConfig,
    /// Whether the channel receives anything at all.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Severities this channel accepts for first dispatch.
    #[serde(default = "all_severities")]
    pub severity_filter: HashSet<Severity>,
    /// Minimum minutes between two dispatches through this channel.
    #[serde(default)]
    pub rate_limit_minutes: u32,
    /// When the channel last accepted a dispatch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sent: Option<DateTime<Utc>>,
}

impl NotificationChannel {
    /// Creates an enabled channel accepting every severity, with no rate limit.
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>, transport: ChannelConfig) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            transport,
            enabled: true,
            severity_filter: all_severities(),
            rate_limit_minutes: 0,
            last_sent: None,
        }
    }

    /// Restricts the severities this channel accepts.
    #[must_use]
    pub fn with_severity_filter(mut self, severities: impl IntoIterator<Item = Severity>) -> Self {
        self.severity_filter = severities.into_iter().collect();
        self
    }

    /// Sets the rate limit.
    #[must_use]
    pub const fn with_rate_limit_minutes(mut self, minutes: u32) -> Self {
        self.rate_limit_minutes = minutes;
        self
    }

    /// Sets whether the channel is enabled.
    #[must_use]
    pub const fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Returns the channel type.
    #[must_use]
    pub const fn channel_type(&self) -> ChannelType {
        self.transport.channel_type()
    }

    /// Returns the rate limit as a duration.
    #[must_use]
    pub const fn rate_limit(&self) -> Duration {
        Duration::from_secs(self.rate_limit_minutes as u64 * 60)
    }

    /// Validates the channel configuration.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::InvalidChannel` if the id is empty or the
    /// transport config is missing a required field.
    pub fn validate(&self) -> Result<()> {
        let problem = if self.id.trim().is_empty() {
            Some("channel id cannot be empty".to_string())
        } else {
            self.transport.problem()
        };

        match problem {
            Some(reason) => Err(AlertError::InvalidChannel {
                id: self.id.clone(),
                reason,
            }),
            None => Ok(()),
        }
    }

    /// The first-dispatch gate: enabled, severity accepted, and outside the
    /// rate-limit window.
    #[must_use]
    pub fn should_send(&self, severity: Severity, now: DateTime<Utc>) -> bool {
        self.enabled
            && self.severity_filter.contains(&severity)
            && self
                .last_sent
                .is_none_or(|last| elapsed(now, last) >= self.rate_limit())
    }
}

/// A channel reserved for one first-dispatch attempt.
///
/// Settle it with [`ChannelRegistry::confirm`] or [`ChannelRegistry::release`].
/// Dropping it unsettled frees the channel without stamping `last_sent`.
#[derive(Debug)]
pub struct ChannelClaim {
    /// Snapshot of the channel at claim time.
    pub channel: NotificationChannel,
    /// When the claim was taken; becomes `last_sent` on success.
    pub claimed_at: DateTime<Utc>,
    _settled: watch::Sender<()>,
}

/// Another attempt holds the channel.
#[derive(Debug)]
pub struct InFlight(watch::Receiver<()>);

impl InFlight {
    /// Resolves once the holding claim is confirmed, released or dropped.
    pub async fn settled(mut self) {
        while self.0.changed().await.is_ok() {}
    }
}

/// Outcome of [`ChannelRegistry::try_claim`].
#[derive(Debug)]
pub enum Claim {
    /// The channel is reserved for this attempt.
    Granted(ChannelClaim),
    /// A send through the channel is in flight; wait, then try again.
    Busy(InFlight),
    /// Unknown, disabled, filtered out or rate limited.
    Ineligible,
}

/// Holds every configured channel.
#[derive(Debug, Default)]
pub struct ChannelRegistry {
    channels: RwLock<BTreeMap<String, NotificationChannel>>,
    // Lock order: `channels` before `in_flight`.
    in_flight: Mutex<HashMap<String, watch::Receiver<()>>>,
}

impl ChannelRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a channel after validating its transport config.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::InvalidChannel` if validation fails or the id is
    /// already taken.
    pub fn add(&self, channel: NotificationChannel) -> Result<()> {
        channel.validate()?;
        let mut channels = self.channels.write();

        if channels.contains_key(&channel.id) {
            return Err(AlertError::InvalidChannel {
                id: channel.id.clone(),
                reason: "a channel with this id already exists".to_string(),
            });
        }

        info!(
            channel = %channel.id,
            channel_type = %channel.channel_type(),
            "added notification channel"
        );
        channels.insert(channel.id.clone(), channel);
        Ok(())
    }

    /// Replaces an existing channel. `last_sent` carries over unless the
    /// replacement sets one.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::ChannelNotFound` if the id is unknown, or
    /// `AlertError::InvalidChannel` if validation fails.
    pub fn update(&self, mut channel: NotificationChannel) -> Result<()> {
        channel.validate()?;
        let mut channels = self.channels.write();

        let existing = channels
            .get(&channel.id)
            .ok_or_else(|| AlertError::ChannelNotFound {
                id: channel.id.clone(),
            })?;
        if channel.last_sent.is_none() {
            channel.last_sent = existing.last_sent;
        }

        info!(channel = %channel.id, "updated notification channel");
        channels.insert(channel.id.clone(), channel);
        Ok(())
    }

    /// Removes a channel. Returns true if it existed.
    pub fn remove(&self, id: &str) -> bool {
        let removed = self.channels.write().remove(id).is_some();
        if removed {
            info!(channel = %id, "removed notification channel");
        }
        removed
    }

    /// Gets a channel by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<NotificationChannel> {
        self.channels.read().get(id).cloned()
    }

    /// Returns every channel, ordered by id.
    #[must_use]
    pub fn list(&self) -> Vec<NotificationChannel> {
        self.channels.read().values().cloned().collect()
    }

    /// Returns the number of channels.
    #[must_use]
    pub fn len(&self) -> usize {
        self.channels.read().len()
    }

    /// Returns true if no channels are configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.channels.read().is_empty()
    }

    /// Ids of the enabled channels whose filter accepts `severity`, ordered
    /// by id. The rate limit is left to [`try_claim`](Self::try_claim).
    #[must_use]
    pub fn candidates(&self, severity: Severity) -> Vec<String> {
        self.channels
            .read()
            .values()
            .filter(|c| c.enabled && c.severity_filter.contains(&severity))
            .map(|c| c.id.clone())
            .collect()
    }

    /// Tries to reserve a channel for one first-dispatch attempt at `now`.
    ///
    /// The gate and the reservation happen in one critical section, so two
    /// concurrent dispatches cannot both pass the rate limit of a channel.
    pub fn try_claim(&self, id: &str, severity: Severity, now: DateTime<Utc>) -> Claim {
        let channels = self.channels.read();
        let Some(channel) = channels.get(id) else {
            return Claim::Ineligible;
        };

        let mut in_flight = self.in_flight.lock();
        if let Some(holder) = in_flight.get(id).cloned() {
            // A closed sender means the claim was dropped unsettled.
            if holder.has_changed().is_ok() {
                return Claim::Busy(InFlight(holder));
            }
            in_flight.remove(id);
        }
        if !channel.should_send(severity, now) {
            return Claim::Ineligible;
        }

        let (settled, holder) = watch::channel(());
        in_flight.insert(id.to_string(), holder);
        Claim::Granted(ChannelClaim {
            channel: channel.clone(),
            claimed_at: now,
            _settled: settled,
        })
    }

    /// Settles a claim whose send succeeded: stamps `last_sent` and wakes
    /// every waiter.
    pub fn confirm(&self, claim: ChannelClaim) {
        let mut channels = self.channels.write();
        if let Some(channel) = channels.get_mut(&claim.channel.id) {
            if channel.last_sent.is_none_or(|last| last < claim.claimed_at) {
                channel.last_sent = Some(claim.claimed_at);
            }
        }
        self.in_flight.lock().remove(&claim.channel.id);
        drop(channels);
        drop(claim);
    }

    /// Settles a claim whose send failed. `last_sent` is left untouched.
    pub fn release(&self, claim: ChannelClaim) {
        self.in_flight.lock().remove(&claim.channel.id);
        drop(claim);
    }
}
