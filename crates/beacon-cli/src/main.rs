//! Beacon binary entrypoint.

use std::io;
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use beacon_cli::cli::{Cli, Commands, LogFormat};
use beacon_cli::{BeaconConfig, CliError, commands};

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr);
    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let config = BeaconConfig::from_file(&cli.config)?;
    let mut stdout = io::stdout().lock();

    match cli.command {
        Commands::Run => commands::run(&config).await?,
        Commands::Check => commands::check(&config, &mut stdout, cli.format)?,
        Commands::TestChannel { id } => commands::test_channel(&config, &id, &mut stdout).await?,
        Commands::Evaluate { dry_run } => {
            commands::evaluate(&config, dry_run, &mut stdout, cli.format).await?;
        }
    }

    Ok(())
}
