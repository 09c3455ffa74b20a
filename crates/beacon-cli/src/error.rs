//! CLI error types.

use beacon_alerts::AlertError;
use thiserror::Error;

/// Errors surfaced by the `beacon` binary.
#[derive(Debug, Error)]
pub enum CliError {
    /// The config file is unreadable or invalid.
    #[error("configuration error: {0}")]
    Config(String),

    /// A channel test did not deliver.
    #[error("channel test failed: {0}")]
    ChannelTest(String),

    /// Output could not be formatted.
    #[error("format error: {0}")]
    Format(String),

    /// The engine rejected an operation.
    #[error(transparent)]
    Alert(#[from] AlertError),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for CliError {
    fn from(err: serde_json::Error) -> Self {
        Self::Format(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_display() {
        let err = CliError::Config("no channels".into());
        assert_eq!(err.to_string(), "configuration error: no channels");
    }

    #[test]
    fn alert_error_is_transparent() {
        let err: CliError = AlertError::ChannelNotFound {
            id: "slack".to_string(),
        }
        .into();
        assert_eq!(err.to_string(), "channel not found: slack");
    }

    #[test]
    fn io_error_converts() {
        let err: CliError = std::io::Error::other("disk gone").into();
        assert!(matches!(err, CliError::Io(_)));
        assert_eq!(err.to_string(), "IO error: disk gone");
    }
}
