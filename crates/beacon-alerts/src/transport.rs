//! Delivery of rendered wire messages.
//!
//! [`HttpTransport`] talks to the real providers over HTTP.
//! [`RecordingTransport`] keeps every delivery in memory and can be told to
//! fail, stall or hang for chosen channels.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::RwLock;
use reqwest::{Client, RequestBuilder};
use tracing::debug;

use crate::adapters::{
    ChatMessage, EmailMessage, PushMessage, SmsMessage, WebhookMessage, WireMessage,
};
use crate::error::{AlertError, Result};

/// A wire message addressed to one channel.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    /// The channel the message goes out through.
    pub channel_id: String,
    /// The rendered message.
    pub message: WireMessage,
}

/// Sends deliveries to their provider.
pub trait Transport: Send + Sync + fmt::Debug {
    /// Delivers one message.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::ChannelSend` if the provider rejects the message
    /// or cannot be reached.
    fn send<'a>(&'a self, delivery: &'a Delivery) -> BoxFuture<'a, Result<()>>;
}

/// HTTP transport for every channel type.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    /// Creates a transport whose requests time out after `request_timeout`.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::Config` if the HTTP client cannot be built.
    pub fn new(request_timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(request_timeout)
            .user_agent(concat!("beacon/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| AlertError::Config {
                reason: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self { client })
    }

    /// Wraps an existing client.
    #[must_use]
    pub const fn with_client(client: Client) -> Self {
        Self { client }
    }

    async fn send_email(&self, channel: &str, msg: &EmailMessage) -> Result<()> {
        let mut request = self.client.post(&msg.api_url).json(&msg.body);
        if let Some(key) = &msg.api_key {
            request = request.bearer_auth(key);
        }
        execute(channel, request).await
    }

    async fn send_chat(&self, channel: &str, msg: &ChatMessage) -> Result<()> {
        execute(channel, self.client.post(&msg.webhook_url).json(&msg.body)).await
    }

    async fn send_sms(&self, channel: &str, msg: &SmsMessage) -> Result<()> {
        for to in &msg.to {
            let form = [
                ("From", msg.from.as_str()),
                ("To", to.as_str()),
                ("Body", msg.body.as_str()),
            ];
            let request = self
                .client
                .post(&msg.api_url)
                .basic_auth(&msg.account_sid, Some(&msg.auth_token))
                .form(&form);
            execute(channel, request).await?;
        }
        Ok(())
    }

    async fn send_push(&self, channel: &str, msg: &PushMessage) -> Result<()> {
        let request = self
            .client
            .post(&msg.api_url)
            .header(reqwest::header::AUTHORIZATION, format!("key={}", msg.server_key))
            .json(&msg.body);
        execute(channel, request).await
    }

    async fn send_webhook(&self, channel: &str, msg: &WebhookMessage) -> Result<()> {
        let mut request = self.client.post(&msg.url).json(&msg.body);
        for (name, value) in &msg.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        execute(channel, request).await
    }
}

async fn execute(channel: &str, request: RequestBuilder) -> Result<()> {
    let response = request.send().await.map_err(|e| AlertError::ChannelSend {
        channel: channel.to_string(),
        reason: e.to_string(),
    })?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(AlertError::ChannelSend {
            channel: channel.to_string(),
            reason: format!("HTTP {status}: {}", body.trim()),
        });
    }

    debug!(channel = %channel, status = %status, "delivered notification");
    Ok(())
}

impl Transport for HttpTransport {
    fn send<'a>(&'a self, delivery: &'a Delivery) -> BoxFuture<'a, Result<()>> {
        let channel = delivery.channel_id.as_str();
        Box::pin(async move {
            match &delivery.message {
                WireMessage::Email(m) => self.send_email(channel, m).await,
                WireMessage::Chat(m) => self.send_chat(channel, m).await,
                WireMessage::Sms(m) => self.send_sms(channel, m).await,
                WireMessage::Push(m) => self.send_push(channel, m).await,
                WireMessage::Webhook(m) => self.send_webhook(channel, m).await,
            }
        })
    }
}

/// In-memory transport that records deliveries.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    sent: RwLock<Vec<Delivery>>,
    failing: RwLock<HashSet<String>>,
    hanging: RwLock<HashSet<String>>,
    delays: RwLock<HashMap<String, Duration>>,
}

impl RecordingTransport {
    /// Creates a transport where every send succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes sends through `channel_id` fail (or succeed again).
    pub fn set_failing(&self, channel_id: &str, failing: bool) {
        toggle(&self.failing, channel_id, failing);
    }

    /// Makes sends through `channel_id` never complete (or complete again).
    pub fn set_hanging(&self, channel_id: &str, hanging: bool) {
        toggle(&self.hanging, channel_id, hanging);
    }

    /// Makes sends through `channel_id` wait `delay` before completing.
    pub fn set_delay(&self, channel_id: &str, delay: Duration) {
        self.delays.write().insert(channel_id.to_string(), delay);
    }

    /// Every successful delivery, in completion order.
    #[must_use]
    pub fn deliveries(&self) -> Vec<Delivery> {
        self.sent.read().clone()
    }

    /// Channel ids of every successful delivery, in completion order.
    #[must_use]
    pub fn channel_ids(&self) -> Vec<String> {
        self.sent.read().iter().map(|d| d.channel_id.clone()).collect()
    }

    /// Number of successful deliveries through `channel_id`.
    #[must_use]
    pub fn count_for(&self, channel_id: &str) -> usize {
        self.sent
            .read()
            .iter()
            .filter(|d| d.channel_id == channel_id)
            .count()
    }

    /// Forgets recorded deliveries.
    pub fn clear(&self) {
        self.sent.write().clear();
    }
}

fn toggle(set: &RwLock<HashSet<String>>, channel_id: &str, on: bool) {
    let mut set = set.write();
    if on {
        set.insert(channel_id.to_string());
    } else {
        set.remove(channel_id);
    }
}

impl Transport for RecordingTransport {
    fn send<'a>(&'a self, delivery: &'a Delivery) -> BoxFuture<'a, Result<()>> {
        let channel = &delivery.channel_id;
        let hanging = self.hanging.read().contains(channel);
        let delay = self.delays.read().get(channel).copied();

        async move {
            if hanging {
                futures::future::pending::<()>().await;
            }
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }

            let failing = self.failing.read().contains(channel);
            if failing {
                return Err(AlertError::ChannelSend {
                    channel: channel.clone(),
                    reason: "simulated failure".to_string(),
                });
            }
            self.sent.write().push(delivery.clone());
            Ok(())
        }
        .boxed()
    }
}
