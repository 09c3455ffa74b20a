//! Command-line argument parsing with clap.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// Beacon - operational alerting and escalation.
#[derive(Parser, Debug, Clone)]
#[command(name = "beacon")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to the config file.
    #[arg(short, long, env = "BEACON_CONFIG", default_value = "beacon.toml")]
    pub config: PathBuf,

    /// Log output format.
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    /// Output format for command results.
    #[arg(short, long, value_enum, default_value_t = Format::Text)]
    pub format: Format,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per event.
    Json,
}

/// Result output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum Format {
    /// Human-readable text.
    #[default]
    Text,
    /// JSON for scripting.
    Json,
}

/// Top-level subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Run the engine until interrupted.
    Run,

    /// Validate the config file and print a summary.
    Check,

    /// Send a test notification through one channel.
    TestChannel {
        /// Channel id to test.
        id: String,
    },

    /// Evaluate every rule once against the current metrics file.
    Evaluate {
        /// Record notifications instead of sending them.
        #[arg(long)]
        dry_run: bool,
    },
}
