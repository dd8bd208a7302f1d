//! Mock Server - CLI Entry Point

use anyhow::{Context, Result};
use clap::Parser;
use mock_server::signals::wait_for_shutdown_signal;
use mock_server::supervisor::DEFAULT_POLL_INTERVAL;
use mock_server::{Error, ServiceConfig};
use std::path::PathBuf;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(
    name = "mock-server",
    about = "Scripted HTTP test-double server - canned responses on one or more ports",
    version
)]
struct Args {
    /// Path to the server config file (JSON; YAML if it ends in .yaml/.yml)
    #[arg(required_unless_present = "print_config")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'L', long, default_value = "info")]
    log_level: Level,

    /// Print an example configuration and exit
    #[arg(long)]
    print_config: bool,

    /// Validate configuration and exit
    #[arg(long)]
    validate: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) if !e.use_stderr() => {
            // --help / --version
            e.print()?;
            return Ok(());
        }
        Err(e) => {
            e.print()?;
            std::process::exit(1);
        }
    };

    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    if args.print_config {
        println!("{}", include_str!("../demos/default-config.json"));
        return Ok(());
    }

    let path = args
        .config
        .context("Need to provide the server config file name")?;
    let config = ServiceConfig::from_file(&path)?;

    if args.validate {
        println!(
            "Configuration is valid ({} servers, {} scripted requests)",
            config.servers.len(),
            config.request_count()
        );
        return Ok(());
    }

    info!(path = ?path, servers = config.servers.len(), "Loaded configuration");

    let shutdown = async {
        if let Err(e) = wait_for_shutdown_signal().await {
            let e = Error::Signal(e);
            error!(error = %e, "Running without interrupt handling");
            std::future::pending::<()>().await;
        }
    };

    let outcome = mock_server::service::run(&config, DEFAULT_POLL_INTERVAL, shutdown).await?;
    info!(?outcome, "Mock server run finished");

    Ok(())
}
