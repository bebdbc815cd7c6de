//! CLI entry point for the linkharvest tool.

use anyhow::{Result, bail};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use linkharvest::{Config, run};

mod cli;

use cli::Args;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Determine log level based on verbose/quiet flags
    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt().with_env_filter(filter).init();

    debug!(?args, "CLI arguments parsed");
    info!("Linkharvest starting");

    let config = args.into_config();

    // The session-state blob is produced by the external interactive login
    // bootstrap; without it the automation context cannot authenticate.
    if !config.storage_state_path.exists() {
        bail!(
            "session-state blob not found at '{}'\n  \
            Run the interactive login bootstrap first, or pass --storage-state.",
            config.storage_state_path.display()
        );
    }

    // Operator interrupt: stop dispatching new articles; in-flight
    // resolutions drain and close their sessions.
    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("interrupt received; finishing in-flight work");
                signal_cancel.cancel();
            }
            Err(error) => warn!(%error, "could not install interrupt handler"),
        }
    });

    let summary = run_with_backend(&config, cancel).await?;

    info!(
        input = summary.input_total,
        skipped = summary.skipped_seen,
        resolved = summary.resolved,
        empty = summary.empty,
        failed = summary.failed,
        added = summary.merge.added(),
        "Linkharvest finished"
    );

    if summary.interrupted {
        bail!("run interrupted by operator; persisted state is complete up to the interrupt");
    }

    Ok(())
}

#[cfg(feature = "browser")]
async fn run_with_backend(
    config: &Config,
    cancel: CancellationToken,
) -> Result<run::RunSummary> {
    use std::sync::Arc;

    use anyhow::Context;
    use linkharvest::RqrrDecoder;
    use linkharvest::driver::chromium::ChromiumDriver;

    let driver = ChromiumDriver::launch(config)
        .await
        .context("cannot establish the shared automation context")?;
    let summary = run::execute(config, Arc::new(driver), Arc::new(RqrrDecoder), cancel)
        .await
        .context("batch run failed")?;
    Ok(summary)
}

#[cfg(not(feature = "browser"))]
async fn run_with_backend(
    _config: &Config,
    _cancel: CancellationToken,
) -> Result<run::RunSummary> {
    bail!(
        "this build has no automation backend; rebuild with `--features browser` \
        to drive a headless Chrome session"
    );
}
