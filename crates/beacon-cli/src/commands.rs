//! Subcommand implementations.
//!
//! Each command writes its result to the given writer so tests can capture
//! it; diagnostics go through `tracing`.

use std::io::Write;
use std::sync::Arc;

use beacon_alerts::{AlertEngine, HttpTransport, RecordingTransport, Transport};
use beacon_audit::TracingAuditSink;
use serde_json::json;
use tokio::sync::watch;
use tracing::{error, info};

use crate::cli::Format;
use crate::config::BeaconConfig;
use crate::error::CliError;
use crate::metrics::FileMetricsProvider;

/// Builds an engine from the config and registers every channel, policy and
/// rule in it.
///
/// # Errors
///
/// Returns an error if the engine rejects any entry.
pub fn build_engine(
    config: &BeaconConfig,
    transport: Arc<dyn Transport>,
) -> Result<AlertEngine, CliError> {
    let metrics = Arc::new(FileMetricsProvider::new(config.metrics.path.clone()));
    let engine = AlertEngine::builder(metrics, transport)
        .config(config.engine.to_engine_config())
        .audit(Arc::new(TracingAuditSink::new()))
        .build()?;

    for channel in &config.channels {
        engine.add_channel(channel.clone())?;
    }
    for policy in config.policies() {
        engine.add_escalation_policy(policy)?;
    }
    for rule in config.alert_rules()? {
        engine.add_rule(rule)?;
    }
    Ok(engine)
}

fn http_transport(config: &BeaconConfig) -> Result<Arc<dyn Transport>, CliError> {
    let timeout = config.engine.to_engine_config().channel_timeout;
    Ok(Arc::new(HttpTransport::new(timeout)?))
}

/// `beacon run`: drives the engine until Ctrl-C.
///
/// # Errors
///
/// Returns an error if the engine cannot be built.
pub async fn run(config: &BeaconConfig) -> Result<(), CliError> {
    let engine = build_engine(config, http_transport(config)?)?;
    info!(
        channels = config.channels.len(),
        rules = config.rules.len(),
        policies = config.escalation_policies.len(),
        metrics = %config.metrics.path.display(),
        "starting beacon"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("interrupt received");
                let _ = shutdown_tx.send(true);
            }
            Err(e) => {
                // Keep the sender alive so the engine is not stopped.
                error!(error = %e, "cannot listen for interrupt");
                std::future::pending::<()>().await;
            }
        }
    });

    engine.run(shutdown_rx).await;
    Ok(())
}

/// `beacon check`: prints a summary of a config that already validated.
///
/// # Errors
///
/// Returns an error if writing fails.
pub fn check(config: &BeaconConfig, out: &mut impl Write, format: Format) -> Result<(), CliError> {
    match format {
        Format::Json => {
            let summary = json!({
                "valid": true,
                "channels": config.channels.iter().map(|c| &c.id).collect::<Vec<_>>(),
                "rules": config.rules.iter().map(|r| &r.id).collect::<Vec<_>>(),
                "escalation_policies": config.escalation_policies.iter().map(|p| &p.id).collect::<Vec<_>>(),
            });
            writeln!(out, "{}", serde_json::to_string_pretty(&summary)?)?;
        }
        Format::Text => {
            writeln!(out, "config OK")?;
            writeln!(out, "  channels:            {}", config.channels.len())?;
            writeln!(out, "  rules:               {}", config.rules.len())?;
            writeln!(out, "  escalation policies: {}", config.escalation_policies.len())?;
            writeln!(out, "  metrics file:        {}", config.metrics.path.display())?;
        }
    }
    Ok(())
}

/// `beacon test-channel <id>`: sends a test notification.
///
/// # Errors
///
/// Returns `CliError::ChannelTest` if the channel is unknown or the send
/// fails.
pub async fn test_channel(
    config: &BeaconConfig,
    channel_id: &str,
    out: &mut impl Write,
) -> Result<(), CliError> {
    let engine = build_engine(config, http_transport(config)?)?;
    test_channel_with(&engine, channel_id, out).await
}

async fn test_channel_with(
    engine: &AlertEngine,
    channel_id: &str,
    out: &mut impl Write,
) -> Result<(), CliError> {
    if engine.get_channel(channel_id).is_none() {
        return Err(CliError::ChannelTest(format!("unknown channel '{channel_id}'")));
    }
    if engine.test_channel(channel_id).await {
        writeln!(out, "channel '{channel_id}': test notification delivered")?;
        Ok(())
    } else {
        Err(CliError::ChannelTest(format!(
            "channel '{channel_id}' did not accept the test notification"
        )))
    }
}

/// `beacon evaluate`: one poll cycle plus any escalation step due at once.
///
/// With `dry_run`, notifications are recorded and listed instead of sent.
///
/// # Errors
///
/// Returns an error if the metrics file cannot be read or writing fails.
pub async fn evaluate(
    config: &BeaconConfig,
    dry_run: bool,
    out: &mut impl Write,
    format: Format,
) -> Result<(), CliError> {
    let recorder = Arc::new(RecordingTransport::new());
    let transport: Arc<dyn Transport> = if dry_run {
        recorder.clone()
    } else {
        http_transport(config)?
    };
    let engine = build_engine(config, transport)?;

    let alerts = engine.poll_once().await?;
    engine.run_due_timers().await;
    let notified = recorder.channel_ids();

    match format {
        Format::Json => {
            let mut result = json!({
                "alerts": alerts,
                "dry_run": dry_run,
            });
            if dry_run {
                result["notified"] = json!(notified);
            }
            writeln!(out, "{}", serde_json::to_string_pretty(&result)?)?;
        }
        Format::Text => {
            writeln!(out, "{} alert(s) raised", alerts.len())?;
            for alert in &alerts {
                writeln!(
                    out,
                    "  [{}] {}: {}",
                    alert.severity.as_str().to_uppercase(),
                    alert.rule_id,
                    alert.title
                )?;
            }
            if dry_run && !notified.is_empty() {
                writeln!(out, "would notify: {}", notified.join(", "))?;
            }
        }
    }
    Ok(())
}
