use super::model::{event_from_row, EVENT_COLUMNS};
use super::repo::{with_schema_retry, Pool, StoreError};
use crate::model::{EventStatus, StatusEvent};
use chrono::{DateTime, Duration, Utc};
use tracing::instrument;

/// Durable per-device queue of outbound status events.
///
/// Append-only: events go in as written and only ever move
/// `pending -> completed`. Delivery order is insertion order.
#[derive(Debug, Clone)]
pub struct SyncEventStore {
    pool: Pool,
}

impl SyncEventStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    #[instrument(skip_all, fields(id = %event.id, appointment_id = %event.appointment_id))]
    pub async fn enqueue(&self, event: &StatusEvent) -> Result<(), StoreError> {
        let pool = &self.pool;
        with_schema_retry(pool, "events.enqueue", move || insert_event(pool, event)).await
    }

    /// Pending events, oldest first.
    #[instrument(skip_all)]
    pub async fn pending(&self) -> Result<Vec<StatusEvent>, StoreError> {
        let pool = &self.pool;
        with_schema_retry(pool, "events.pending", move || {
            fetch_events(pool, Some(EventStatus::Pending))
        })
        .await
    }

    #[instrument(skip_all)]
    pub async fn get_all(&self) -> Result<Vec<StatusEvent>, StoreError> {
        let pool = &self.pool;
        with_schema_retry(pool, "events.get_all", move || fetch_events(pool, None)).await
    }

    /// Mark the given events completed in one transaction. Already-completed
    /// ids are left alone. Returns the number of rows that changed.
    #[instrument(skip_all, fields(count = ids.len()))]
    pub async fn mark_completed(&self, ids: &[String]) -> Result<u64, StoreError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let pool = &self.pool;
        with_schema_retry(pool, "events.mark_completed", move || complete_events(pool, ids)).await
    }

    /// Delete completed events finished before `cutoff`. Pending events are
    /// never touched.
    #[instrument(skip_all)]
    pub async fn purge_completed_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let pool = &self.pool;
        with_schema_retry(pool, "events.purge_completed_before", move || {
            purge_completed(pool, cutoff)
        })
        .await
    }
}

/// `now` minus `days`, or `None` when that falls outside chrono's range.
pub fn retention_cutoff(now: DateTime<Utc>, days: u32) -> Option<DateTime<Utc>> {
    Duration::try_days(i64::from(days)).and_then(|age| now.checked_sub_signed(age))
}

async fn insert_event(pool: &Pool, e: &StatusEvent) -> Result<(), StoreError> {
    let sql = format!(
        "INSERT INTO status_events ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        EVENT_COLUMNS
    );
    sqlx::query(&sql)
        .bind(&e.id)
        .bind(&e.appointment_id)
        .bind(&e.event_type)
        .bind(&e.status_value)
        .bind(e.occurred_at)
        .bind(e.status.as_str())
        .bind(&e.owner.subject)
        .bind(&e.owner.email)
        .bind(&e.owner.name)
        .execute(pool)
        .await?;
    Ok(())
}

async fn fetch_events(
    pool: &Pool,
    status: Option<EventStatus>,
) -> Result<Vec<StatusEvent>, StoreError> {
    let rows = match status {
        Some(status) => {
            let sql = format!(
                "SELECT {} FROM status_events WHERE status = ? ORDER BY seq ASC",
                EVENT_COLUMNS
            );
            sqlx::query(&sql)
                .bind(status.as_str())
                .fetch_all(pool)
                .await?
        }
        None => {
            let sql = format!("SELECT {} FROM status_events ORDER BY seq ASC", EVENT_COLUMNS);
            sqlx::query(&sql).fetch_all(pool).await?
        }
    };
    rows.iter().map(event_from_row).collect()
}

async fn complete_events(pool: &Pool, ids: &[String]) -> Result<u64, StoreError> {
    let now = Utc::now();
    let mut tx = pool.begin().await?;
    let mut changed = 0;
    for id in ids {
        let res = sqlx::query(
            "UPDATE status_events SET status = 'completed', completed_at = ? \
             WHERE id = ? AND status = 'pending'",
        )
        .bind(now)
        .bind(id)
        .execute(&mut *tx)
        .await?;
        changed += res.rows_affected();
    }
    tx.commit().await?;
    Ok(changed)
}

async fn purge_completed(pool: &Pool, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
    let res = sqlx::query(
        "DELETE FROM status_events WHERE status = 'completed' AND completed_at IS NOT NULL \
         AND completed_at < ?",
    )
    .bind(cutoff)
    .execute(pool)
    .await?;
    Ok(res.rows_affected())
}
