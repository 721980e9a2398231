use std::path::PathBuf;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::commands::App;
use crate::integrity::IntegrityLevel;
use crate::scanner::{ScanError, ScanOptions};

#[derive(Debug, Clone)]
pub struct ServeOptions {
    pub seeds_file: PathBuf,
    pub scan_file: PathBuf,
    pub interval: Duration,
    pub scan: ScanOptions,
}

#[derive(Debug, PartialEq, Eq)]
enum CycleOutcome {
    Completed,
    Cancelled,
}

/// Runs fetch, ingest and reconcile until `shutdown` fires. A failed cycle is logged and
/// retried after the usual interval.
pub async fn serve(app: &App, options: ServeOptions, shutdown: CancellationToken) -> anyhow::Result<()> {
    app.require(IntegrityLevel::Full).await?;
    info!(
        seeds = %options.seeds_file.display(),
        scan_file = %options.scan_file.display(),
        interval_secs = options.interval.as_secs(),
        "server started"
    );

    let mut cycle: u64 = 0;
    loop {
        cycle += 1;
        match run_cycle(app, &options, shutdown.child_token()).await {
            Ok(CycleOutcome::Completed) => info!(cycle, "cycle finished"),
            Ok(CycleOutcome::Cancelled) => break,
            Err(err) => error!(cycle, error = %format!("{err:#}"), "cycle failed"),
        }

        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(options.interval) => {}
        }
    }

    info!("server stopped");
    Ok(())
}

async fn run_cycle(
    app: &App,
    options: &ServeOptions,
    cancel: CancellationToken,
) -> anyhow::Result<CycleOutcome> {
    let scan = app
        .fetch(&options.seeds_file, &options.scan_file, options.scan, cancel)
        .await;
    if let Err(err) = &scan
        && matches!(err.downcast_ref::<ScanError>(), Some(ScanError::Cancelled))
    {
        warn!("scan cancelled, partial output kept");
        return Ok(CycleOutcome::Cancelled);
    }
    scan?;

    let files = app.ingest(&options.scan_file).await?;
    let report = app.reconcile().await?;
    info!(
        files,
        created_folders = report.created_folders,
        created_shortcuts = report.created_shortcuts,
        deleted = report.deleted_remote,
        failures = report.failures,
        "cycle applied"
    );
    Ok(CycleOutcome::Completed)
}
