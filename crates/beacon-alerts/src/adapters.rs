//! Per-transport rendering of notification payloads.
//!
//! Each adapter turns a [`NotificationPayload`] plus the channel's typed
//! config into the request shape that provider expects. Rendering is pure;
//! the [`Transport`](crate::transport::Transport) does the I/O.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::channels::{
    ChannelConfig, ChannelType, ChatConfig, EmailConfig, PushConfig, SmsConfig, WebhookConfig,
};
use crate::payload::NotificationPayload;

/// Maximum SMS body length before truncation.
pub const SMS_MAX_LEN: usize = 160;

/// Source tag sent with generic webhooks.
pub const WEBHOOK_SOURCE: &str = "beacon";

/// A rendered message plus where to send it.
#[derive(Debug, Clone, PartialEq)]
pub enum WireMessage {
    /// Email.
    Email(EmailMessage),
    /// Chat webhook.
    Chat(ChatMessage),
    /// SMS.
    Sms(SmsMessage),
    /// Push.
    Push(PushMessage),
    /// Generic webhook.
    Webhook(WebhookMessage),
}

impl WireMessage {
    /// Renders `payload` for a channel's transport config.
    #[must_use]
    pub fn render(config: &ChannelConfig, payload: &NotificationPayload) -> Self {
        match config {
            ChannelConfig::Email(c) => Self::Email(EmailMessage::render(c, payload)),
            ChannelConfig::Chat(c) => Self::Chat(ChatMessage::render(c, payload)),
            ChannelConfig::Sms(c) => Self::Sms(SmsMessage::render(c, payload)),
            ChannelConfig::Push(c) => Self::Push(PushMessage::render(c, payload)),
            ChannelConfig::Webhook(c) => Self::Webhook(WebhookMessage::render(c, payload)),
        }
    }

    /// Returns the channel type this message targets.
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
}

// ============ Email ============

/// Mail API request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailMessage {
    /// Mail API endpoint.
    pub api_url: String,
    /// Bearer token.
    pub api_key: Option<String>,
    /// JSON body.
    pub body: EmailBody,
}

/// JSON body of a mail API request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmailBody {
    /// Sender.
    pub from: String,
    /// Recipients.
    pub to: Vec<String>,
    /// Subject line.
    pub subject: String,
    /// HTML body.
    pub html: String,
    /// Plain-text body.
    pub text: String,
}

impl EmailMessage {
    fn render(config: &EmailConfig, payload: &NotificationPayload) -> Self {
        let mut text = format!(
            "{}\n\nSeverity: {}\nType: {}\nTime: {}",
            payload.message,
            payload.severity,
            payload.alert_type,
            payload.timestamp.to_rfc3339()
        );
        let mut html = format!(
            "<h2 style=\"color:{}\">{}</h2><p>{}</p><ul><li><b>Severity:</b> {}</li>\
             <li><b>Type:</b> {}</li><li><b>Time:</b> {}</li></ul>",
            payload.severity.color(),
            escape_html(&payload.title),
            escape_html(&payload.message).replace('\n', "<br>"),
            payload.severity,
            payload.alert_type,
            payload.timestamp.to_rfc3339()
        );
        if let Some(url) = &payload.action_url {
            text.push_str(&format!("\n\nView alert: {url}"));
            html.push_str(&format!("<p><a href=\"{}\">View alert</a></p>", escape_html(url)));
        }

        Self {
            api_url: config.api_url.clone(),
            api_key: config.api_key.clone(),
            body: EmailBody {
                from: config.from.clone(),
                to: config.recipients.clone(),
                subject: payload.subject(),
                html,
                text,
            },
        }
    }
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

// ============ Chat ============

/// Chat webhook request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    /// Incoming-webhook URL.
    pub webhook_url: String,
    /// JSON body.
    pub body: ChatBody,
}

/// Slack-style message body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatBody {
    /// Channel override.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    /// Bot display name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Fallback text.
    pub text: String,
    /// Rich attachments.
    pub attachments: Vec<ChatAttachment>,
}

/// A colour-coded attachment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatAttachment {
    /// Sidebar colour, derived from the severity.
    pub color: String,
    /// Attachment title.
    pub title: String,
    /// Attachment body.
    pub text: String,
    /// Short key/value fields.
    pub fields: Vec<ChatField>,
    /// Link buttons.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<ChatLink>,
    /// Unix timestamp.
    pub ts: i64,
}

/// A key/value field of an attachment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatField {
    /// Field label.
    pub title: String,
    /// Field value.
    pub value: String,
    /// Whether it fits side by side with another field.
    pub short: bool,
}

/// A link button.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatLink {
    /// Always `button`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Button label.
    pub text: String,
    /// Target.
    pub url: String,
}

impl ChatMessage {
    fn render(config: &ChatConfig, payload: &NotificationPayload) -> Self {
        let fields = vec![
            ChatField {
                title: "Severity".to_string(),
                value: payload.severity.as_str().to_uppercase(),
                short: true,
            },
            ChatField {
                title: "Type".to_string(),
                value: payload.alert_type.to_string(),
                short: true,
            },
            ChatField {
                title: "Time".to_string(),
                value: payload.timestamp.to_rfc3339(),
                short: false,
            },
        ];
        let actions = payload
            .action_url
            .iter()
            .map(|url| ChatLink {
                kind: "button".to_string(),
                text: "View alert".to_string(),
                url: url.clone(),
            })
            .collect();

        Self {
            webhook_url: config.webhook_url.clone(),
            body: ChatBody {
                channel: config.channel.clone(),
                username: config.username.clone(),
                text: payload.subject(),
                attachments: vec![ChatAttachment {
                    color: payload.severity.color().to_string(),
                    title: payload.title.clone(),
                    text: payload.message.clone(),
                    fields,
                    actions,
                    ts: payload.timestamp.timestamp(),
                }],
            },
        }
    }
}

// ============ SMS ============

/// SMS gateway request, sent once per destination number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmsMessage {
    /// Messages endpoint.
    pub api_url: String,
    /// Basic-auth user.
    pub account_sid: String,
    /// Basic-auth password.
    pub auth_token: String,
    /// Sending number.
    pub from: String,
    /// Destination numbers.
    pub to: Vec<String>,
    /// Text, at most [`SMS_MAX_LEN`] characters.
    pub body: String,
}

impl SmsMessage {
    fn render(config: &SmsConfig, payload: &NotificationPayload) -> Self {
        let full = format!("{}: {}", payload.subject(), payload.message);
        Self {
            api_url: config.api_url.clone(),
            account_sid: config.account_sid.clone(),
            auth_token: config.auth_token.clone(),
            from: config.from.clone(),
            to: config.to.clone(),
            body: truncate(&full, SMS_MAX_LEN),
        }
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max_chars.saturating_sub(3)).collect();
    out.push_str("...");
    out
}

// ============ Push ============

/// Push service request.
#[derive(Debug, Clone, PartialEq)]
pub struct PushMessage {
    /// Send endpoint.
    pub api_url: String,
    /// Server credential.
    pub server_key: String,
    /// JSON body.
    pub body: PushBody,
}

/// Topic-addressed push body.
///
/// A single topic is addressed with `to`; several topics with a `condition`
/// expression.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PushBody {
    /// `/topics/<name>` for a single topic.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    /// `'a' in topics || 'b' in topics` for several topics.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    /// Visible notification.
    pub notification: PushNotification,
    /// Data for the client app.
    pub data: HashMap<String, serde_json::Value>,
}

/// Visible part of a push message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PushNotification {
    /// Title.
    pub title: String,
    /// Body.
    pub body: String,
}

impl PushMessage {
    fn render(config: &PushConfig, payload: &NotificationPayload) -> Self {
        let (to, condition) = match config.topics.as_slice() {
            [single] => (Some(format!("/topics/{single}")), None),
            topics => (
                None,
                Some(
                    topics
                        .iter()
                        .map(|t| format!("'{t}' in topics"))
                        .collect::<Vec<_>>()
                        .join(" || "),
                ),
            ),
        };

        let mut data = HashMap::new();
        data.insert("alert_id".to_string(), serde_json::Value::from(payload.alert_id.clone()));
        data.insert("severity".to_string(), serde_json::Value::from(payload.severity.as_str()));
        data.insert("type".to_string(), serde_json::Value::from(payload.alert_type.as_str()));
        data.insert(
            "timestamp".to_string(),
            serde_json::Value::from(payload.timestamp.to_rfc3339()),
        );
        if let Some(url) = &payload.action_url {
            data.insert("action_url".to_string(), serde_json::Value::from(url.clone()));
        }

        Self {
            api_url: config.api_url.clone(),
            server_key: config.server_key.clone(),
            body: PushBody {
                to,
                condition,
                notification: PushNotification {
                    title: payload.subject(),
                    body: payload.message.clone(),
                },
                data,
            },
        }
    }
}

// ============ Webhook ============

/// Generic webhook request.
#[derive(Debug, Clone, PartialEq)]
pub struct WebhookMessage {
    /// Target URL.
    pub url: String,
    /// Extra headers.
    pub headers: HashMap<String, String>,
    /// JSON body.
    pub body: WebhookBody,
}

/// JSON body of a generic webhook.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WebhookBody {
    /// The full payload.
    pub alert: NotificationPayload,
    /// Always [`WEBHOOK_SOURCE`].
    pub source: String,
    /// When the request was rendered.
    pub timestamp: DateTime<Utc>,
}

impl WebhookMessage {
    fn render(config: &WebhookConfig, payload: &NotificationPayload) -> Self {
        Self {
            url: config.url.clone(),
            headers: config.headers.clone(),
            body: WebhookBody {
                alert: payload.clone(),
                source: WEBHOOK_SOURCE.to_string(),
                timestamp: payload.timestamp,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AlertType, Severity};

    fn payload(severity: Severity) -> NotificationPayload {
        NotificationPayload {
            alert_id: "a-1".to_string(),
            title: "High memory usage".to_string(),
            message: "memoryUsage > 0.9".to_string(),
            severity,
            alert_type: AlertType::System,
            timestamp: Utc::now(),
            metadata: HashMap::new(),
            action_url: Some("https://ops.example.com/alerts/a-1".to_string()),
        }
    }

    #[test]
    fn email_shape() {
        let config = ChannelConfig::Email(EmailConfig {
            api_url: "https://mail.example.com/send".to_string(),
            api_key: Some("k".to_string()),
            from: "alerts@example.com".to_string(),
            recipients: vec!["oncall@example.com".to_string()],
        });
        let WireMessage::Email(msg) = WireMessage::render(&config, &payload(Severity::High)) else {
            panic!("expected email");
        };

        assert_eq!(msg.body.subject, "[HIGH] High memory usage");
        assert_eq!(msg.body.to, vec!["oncall@example.com"]);
        assert!(msg.body.html.contains("memoryUsage &gt; 0.9"));
        assert!(msg.body.text.contains("View alert: https://ops.example.com/alerts/a-1"));
    }

    #[test]
    fn chat_colour_tracks_severity() {
        let config = ChannelConfig::Chat(ChatConfig {
            webhook_url: "https://hooks.example.com/x".to_string(),
            channel: Some("#ops".to_string()),
            username: Some("beacon".to_string()),
        });
        let WireMessage::Chat(msg) = WireMessage::render(&config, &payload(Severity::Critical))
        else {
            panic!("expected chat");
        };

        let attachment = &msg.body.attachments[0];
        assert_eq!(attachment.color, Severity::Critical.color());
        assert_eq!(attachment.fields[0].value, "CRITICAL");
        assert_eq!(attachment.actions[0].url, "https://ops.example.com/alerts/a-1");

        let json = serde_json::to_value(&msg.body).unwrap();
        assert_eq!(json["channel"], "#ops");
        assert_eq!(json["attachments"][0]["actions"][0]["type"], "button");
    }

    #[test]
    fn sms_is_truncated() {
        let config = ChannelConfig::Sms(SmsConfig {
            api_url: "https://sms.example.com".to_string(),
            account_sid: "AC1".to_string(),
            auth_token: "t".to_string(),
            from: "+1555".to_string(),
            to: vec!["+1666".to_string()],
        });
        let mut p = payload(Severity::Critical);
        p.message = "x".repeat(500);

        let WireMessage::Sms(msg) = WireMessage::render(&config, &p) else {
            panic!("expected sms");
        };
        assert_eq!(msg.body.chars().count(), SMS_MAX_LEN);
        assert!(msg.body.ends_with("..."));
        assert!(msg.body.starts_with("[CRITICAL]"));
    }

    #[test]
    fn push_single_topic_uses_to() {
        let config = ChannelConfig::Push(PushConfig {
            api_url: "https://push.example.com/send".to_string(),
            server_key: "key".to_string(),
            topics: vec!["oncall".to_string()],
        });
        let WireMessage::Push(msg) = WireMessage::render(&config, &payload(Severity::High)) else {
            panic!("expected push");
        };
        assert_eq!(msg.body.to.as_deref(), Some("/topics/oncall"));
        assert!(msg.body.condition.is_none());
        assert_eq!(msg.body.data["severity"], "high");
    }

    #[test]
    fn push_many_topics_uses_condition() {
        let config = ChannelConfig::Push(PushConfig {
            api_url: "https://push.example.com/send".to_string(),
            server_key: "key".to_string(),
            topics: vec!["oncall".to_string(), "sre".to_string()],
        });
        let WireMessage::Push(msg) = WireMessage::render(&config, &payload(Severity::High)) else {
            panic!("expected push");
        };
        assert!(msg.body.to.is_none());
        assert_eq!(
            msg.body.condition.as_deref(),
            Some("'oncall' in topics || 'sre' in topics")
        );
    }

    #[test]
    fn webhook_wraps_payload() {
        let config = ChannelConfig::Webhook(WebhookConfig {
            url: "https://example.com/hook".to_string(),
            headers: HashMap::from([("X-Token".to_string(), "abc".to_string())]),
        });
        let msg = WireMessage::render(&config, &payload(Severity::Low));
        assert_eq!(msg.channel_type(), ChannelType::Webhook);

        let WireMessage::Webhook(msg) = msg else {
            panic!("expected webhook");
        };
        let json = serde_json::to_value(&msg.body).unwrap();
        assert_eq!(json["source"], "beacon");
        assert_eq!(json["alert"]["title"], "High memory usage");
        assert_eq!(msg.headers["X-Token"], "abc");
    }

    #[test]
    fn truncate_short_is_untouched() {
        assert_eq!(truncate("hello", 160), "hello");
    }
}
