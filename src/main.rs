use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

use recsync::auth::StaticCredentials;
use recsync::capture::{ensure_ffprobe_available, FfprobeDuration};
use recsync::config;
use recsync::connectivity::{Connectivity, ConnectivityMonitor};
use recsync::db;
use recsync::recorder::Recorder;
use recsync::remote::HttpRemoteApi;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Upload pending recordings and send queued status events, then exit"
)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Also delete completed status events older than this many days
    #[arg(long)]
    purge_events_days: Option<u32>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let pool = db::init_pool(&cfg.database_url()).await?;
    db::run_migrations(&pool).await?;

    let device_id = cfg.resolve_device_id()?;
    let remote = HttpRemoteApi::with_user_agent(cfg.base_url()?, &cfg.remote.user_agent)?;
    let credentials = StaticCredentials::new(cfg.session());
    if cfg.session().is_none() {
        warn!("no remote token configured; network sync will be skipped");
    }

    // A one-shot run assumes the network is there; failures are retried on
    // the next run.
    let monitor = ConnectivityMonitor::new(Connectivity::Reachable);
    let mut recorder = Recorder::new(
        pool,
        Arc::new(remote),
        Arc::new(credentials),
        monitor.subscribe(),
        device_id.clone(),
        cfg.failure_policy()?,
    );
    if ensure_ffprobe_available().await.is_ok() {
        recorder = recorder.with_duration_probe(Arc::new(FfprobeDuration), cfg.probe_timeout());
    }

    let counts = recorder.records().count_by_status().await?;
    info!(
        device_id = %device_id,
        pending = counts.pending,
        failed = counts.failed,
        interrupted = counts.uploading,
        "starting sync"
    );

    match recorder.sync_now().await {
        Ok(Some(report)) => info!(%report, "sync complete"),
        Ok(None) => warn!("another sync is already running"),
        Err(err) => {
            error!(?err, "sync failed");
            return Err(err.into());
        }
    }

    if let Some(days) = args.purge_events_days {
        let cutoff = db::events::retention_cutoff(chrono::Utc::now(), days)
            .with_context(|| format!("--purge-events-days {} is out of range", days))?;
        let purged = recorder.events().purge_completed_before(cutoff).await?;
        info!(purged, "purged completed status events");
    }

    Ok(())
}
