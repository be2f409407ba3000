use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

use recsync::config;
use recsync::db::{self, LocalRecordStore, SyncEventStore};
use recsync::model::EventStatus;

#[derive(Parser, Debug)]
#[command(about = "Print the local recording queue and pending status events")]
struct Args {
    /// Path to YAML config
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Include completed status events
    #[arg(long)]
    all_events: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;

    let pool = db::init_pool(&cfg.database_url()).await?;
    db::run_migrations(&pool).await?;
    let records = LocalRecordStore::new(pool.clone());
    let events = SyncEventStore::new(pool);

    let counts = records.count_by_status().await?;
    println!(
        "Recordings: {} total ({} pending, {} uploading, {} uploaded, {} failed)",
        counts.total(),
        counts.pending,
        counts.uploading,
        counts.uploaded,
        counts.failed
    );
    for r in records.get_all().await? {
        println!(
            "  {} [{}] {} created={} bytes={} duration={} key={} error={}",
            r.id,
            r.status.as_str(),
            r.appointment_id,
            r.created_at.to_rfc3339(),
            r.artifact.len(),
            r.duration_seconds
                .map(|d| format!("{:.1}s", d))
                .unwrap_or_else(|| "-".into()),
            r.remote_key.as_deref().unwrap_or("-"),
            r.last_error.as_deref().unwrap_or("-"),
        );
    }

    let list = if args.all_events {
        events.get_all().await?
    } else {
        events.pending().await?
    };
    println!("Status events: {}", list.len());
    for e in list {
        let marker = match e.status {
            EventStatus::Pending => "pending",
            EventStatus::Completed => "done",
        };
        println!(
            "  {} [{}] {} {} \"{}\" at {}",
            e.id,
            marker,
            e.appointment_id,
            e.event_type,
            e.status_value,
            e.occurred_at.to_rfc3339()
        );
    }
    Ok(())
}
