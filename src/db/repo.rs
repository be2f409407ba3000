use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Executor, SqlitePool};
use std::future::Future;
use std::str::FromStr;
use thiserror::Error;
use tracing::{instrument, warn};

pub type Pool = SqlitePool;

/// Same DDL the migrator applies; every statement is `IF NOT EXISTS` so it can
/// be re-executed against a database that lost its tables.
const SCHEMA_SQL: &str = include_str!("../../migrations/20250301000000_init.sql");

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("schema still missing after recreate: {0}")]
    SchemaDrift(#[source] sqlx::Error),
    #[error("corrupt row: {0}")]
    Corrupt(String),
    #[error("no row with id {0}")]
    NotFound(String),
}

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    let options = SqliteConnectOptions::from_str(&normalized)
        .with_context(|| format!("invalid database url {}", normalized))?
        .create_if_missing(true)
        // WAL with full sync: a crash must never lose a saved recording.
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Full);
    let pool = SqlitePoolOptions::new()
        .connect_with(options)
        .await
        .context("failed to open sqlite database")?;
    Ok(pool)
}

/// Expand a leading `~/` in file-backed SQLite URLs and make sure the parent
/// directory exists. In-memory and non-sqlite URLs pass through untouched.
fn prepare_sqlite_url(url: &str) -> String {
    let Some(rest) = url.strip_prefix("sqlite:") else {
        return url.to_string();
    };
    if rest.starts_with(":memory") {
        return url.to_string();
    }

    let rest = rest.strip_prefix("//").unwrap_or(rest);
    let (path, query) = match rest.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (rest, None),
    };
    if path.is_empty() {
        return url.to_string();
    }

    let path = match (path.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(tail), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), tail),
        _ => path.to_string(),
    };

    if let Some(parent) = std::path::Path::new(&path).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    match query {
        Some(q) => format!("sqlite://{}?{}", path, q),
        None => format!("sqlite://{}", path),
    }
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Re-create any missing tables and indexes.
#[instrument(skip_all)]
pub async fn recreate_schema(pool: &Pool) -> Result<(), sqlx::Error> {
    pool.execute(SCHEMA_SQL).await?;
    Ok(())
}

pub(crate) fn is_missing_schema(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => db.message().contains("no such table"),
        _ => false,
    }
}

/// Run a store operation; if SQLite reports a missing table, recreate the
/// schema and run it exactly once more.
pub(crate) async fn with_schema_retry<T, F, Fut>(
    pool: &Pool,
    op_name: &'static str,
    mut op: F,
) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    match op().await {
        Err(StoreError::Database(err)) if is_missing_schema(&err) => {
            warn!(op = op_name, %err, "schema missing; recreating and retrying once");
            recreate_schema(pool).await?;
            match op().await {
                Err(StoreError::Database(err)) if is_missing_schema(&err) => {
                    Err(StoreError::SchemaDrift(err))
                }
                other => other,
            }
        }
        other => other,
    }
}
