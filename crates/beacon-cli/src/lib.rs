//! Beacon CLI library.
//!
//! Loads `beacon.toml`, wires a file-backed metrics provider and the HTTP
//! transports into an [`beacon_alerts::AlertEngine`], and implements the
//! `beacon` subcommands.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod metrics;

pub use config::BeaconConfig;
pub use error::CliError;
pub use metrics::FileMetricsProvider;
