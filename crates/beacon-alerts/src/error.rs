//! Error types for the beacon-alerts crate.

use thiserror::Error;

/// Errors that can occur in the alerting engine.
#[derive(Debug, Error)]
pub enum AlertError {
    /// Invalid alert rule configuration.
    #[error("invalid alert rule: {reason}")]
    InvalidRule {
        /// The reason the rule is invalid.
        reason: String,
    },

    /// Alert rule with the given id was not found.
    #[error("rule not found: {id}")]
    RuleNotFound {
        /// The rule id that was not found.
        id: String,
    },

    /// Alert with the given id was not found.
    #[error("alert not found: {id}")]
    AlertNotFound {
        /// The alert id that was not found.
        id: String,
    },

    /// A channel was rejected because its transport config is incomplete.
    #[error("invalid channel '{id}': {reason}")]
    InvalidChannel {
        /// The offending channel id.
        id: String,
        /// What is wrong with it.
        reason: String,
    },

    /// Channel with the given id was not found.
    #[error("channel not found: {id}")]
    ChannelNotFound {
        /// The channel id that was not found.
        id: String,
    },

    /// Invalid escalation policy.
    #[error("invalid escalation policy: {reason}")]
    InvalidPolicy {
        /// The reason the policy is invalid.
        reason: String,
    },

    /// Escalation policy with the given id was not found.
    #[error("escalation policy not found: {id}")]
    PolicyNotFound {
        /// The policy id that was not found.
        id: String,
    },

    /// Fetching a metrics category failed.
    #[error("metrics fetch failed for {category}: {reason}")]
    MetricsFetch {
        /// The category that failed.
        category: String,
        /// The reason the fetch failed.
        reason: String,
    },

    /// A channel transport failed to deliver.
    #[error("send via channel '{channel}' failed: {reason}")]
    ChannelSend {
        /// The channel id.
        channel: String,
        /// The reason delivery failed.
        reason: String,
    },

    /// A channel transport did not answer in time.
    #[error("send via channel '{channel}' timed out after {timeout_ms}ms")]
    ChannelTimeout {
        /// The channel id.
        channel: String,
        /// The timeout that elapsed.
        timeout_ms: u64,
    },

    /// A condition could not be evaluated.
    #[error("condition evaluation failed: {reason}")]
    Condition {
        /// The reason the evaluation failed.
        reason: String,
    },

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Engine configuration is invalid.
    #[error("configuration error: {reason}")]
    Config {
        /// What is wrong with the configuration.
        reason: String,
    },
}

impl AlertError {
    /// Shorthand for a condition error.
    pub fn condition(reason: impl Into<String>) -> Self {
        Self::Condition {
            reason: reason.into(),
        }
    }
}

impl From<serde_json::Error> for AlertError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Result type for alert operations.
pub type Result<T> = std::result::Result<T, AlertError>;
