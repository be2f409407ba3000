use super::model::{
    local_row_from_row, recording_from_row, StatusCounts, LOCAL_ROW_COLUMNS, RECORDING_COLUMNS,
};
use super::repo::{with_schema_retry, Pool, StoreError};
use crate::model::{LocalRow, Recording, RecordingStatus};
use sqlx::Row;
use tracing::instrument;

/// Durable per-device storage of recordings.
///
/// Every operation is keyed by record id. `update` overwrites the mutable
/// fields of an existing row (last write wins) and fails with `NotFound` once
/// the row is deleted. Reads never report `uploading`: a persisted
/// `uploading` row is a crashed attempt and comes back as `pending`.
#[derive(Debug, Clone)]
pub struct LocalRecordStore {
    pool: Pool,
}

impl LocalRecordStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    #[instrument(skip_all, fields(id = %record.id))]
    pub async fn create(&self, record: &Recording) -> Result<(), StoreError> {
        let pool = &self.pool;
        with_schema_retry(pool, "recordings.create", move || {
            insert_recording(pool, record)
        })
        .await
    }

    #[instrument(skip_all, fields(id = %record.id, status = record.status.as_str()))]
    pub async fn update(&self, record: &Recording) -> Result<(), StoreError> {
        let pool = &self.pool;
        with_schema_retry(pool, "recordings.update", move || {
            update_recording(pool, record)
        })
        .await
    }

    #[instrument(skip_all)]
    pub async fn get_all(&self) -> Result<Vec<Recording>, StoreError> {
        let pool = &self.pool;
        with_schema_retry(pool, "recordings.get_all", move || fetch_all(pool)).await
    }

    /// Every record without its artifact bytes, for listing.
    #[instrument(skip_all)]
    pub async fn list_rows(&self) -> Result<Vec<LocalRow>, StoreError> {
        let pool = &self.pool;
        with_schema_retry(pool, "recordings.list_rows", move || fetch_rows(pool)).await
    }

    #[instrument(skip_all)]
    pub async fn get_by_id(&self, id: &str) -> Result<Option<Recording>, StoreError> {
        let pool = &self.pool;
        with_schema_retry(pool, "recordings.get_by_id", move || fetch_one(pool, id)).await
    }

    /// Returns whether a row was removed.
    #[instrument(skip_all, fields(id = %id))]
    pub async fn delete_by_id(&self, id: &str) -> Result<bool, StoreError> {
        let pool = &self.pool;
        with_schema_retry(pool, "recordings.delete_by_id", move || delete_one(pool, id)).await
    }

    /// Counts by persisted status; `uploading` here means an attempt is in
    /// flight or was interrupted.
    #[instrument(skip_all)]
    pub async fn count_by_status(&self) -> Result<StatusCounts, StoreError> {
        let pool = &self.pool;
        with_schema_retry(pool, "recordings.count_by_status", move || count_statuses(pool)).await
    }
}

fn check_uploaded_key(r: &Recording) -> Result<(), StoreError> {
    let has_key = r.remote_key.as_deref().is_some_and(|k| !k.trim().is_empty());
    if r.status == RecordingStatus::Uploaded && !has_key {
        return Err(StoreError::Corrupt(format!(
            "recording {} marked uploaded without a remote key",
            r.id
        )));
    }
    Ok(())
}

async fn insert_recording(pool: &Pool, r: &Recording) -> Result<(), StoreError> {
    check_uploaded_key(r)?;
    let sql = format!(
        "INSERT INTO recordings ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        RECORDING_COLUMNS
    );
    sqlx::query(&sql)
        .bind(&r.id)
        .bind(&r.appointment_id)
        .bind(r.created_at)
        .bind(r.status.as_str())
        .bind(&r.artifact)
        .bind(&r.content_type)
        .bind(r.duration_seconds)
        .bind(&r.remote_key)
        .bind(&r.last_error)
        .bind(&r.device_id)
        .bind(&r.owner.subject)
        .bind(&r.owner.email)
        .bind(&r.owner.name)
        .execute(pool)
        .await?;
    Ok(())
}

// id, created_at and device_id are fixed at creation.
async fn update_recording(pool: &Pool, r: &Recording) -> Result<(), StoreError> {
    check_uploaded_key(r)?;
    let res = sqlx::query(
        "UPDATE recordings SET appointment_id = ?, status = ?, artifact = ?, \
         content_type = ?, duration_seconds = ?, remote_key = ?, last_error = ?, \
         owner_subject = ?, owner_email = ?, owner_name = ? WHERE id = ?",
    )
    .bind(&r.appointment_id)
    .bind(r.status.as_str())
    .bind(&r.artifact)
    .bind(&r.content_type)
    .bind(r.duration_seconds)
    .bind(&r.remote_key)
    .bind(&r.last_error)
    .bind(&r.owner.subject)
    .bind(&r.owner.email)
    .bind(&r.owner.name)
    .bind(&r.id)
    .execute(pool)
    .await?;
    if res.rows_affected() == 0 {
        return Err(StoreError::NotFound(r.id.clone()));
    }
    Ok(())
}

async fn fetch_all(pool: &Pool) -> Result<Vec<Recording>, StoreError> {
    let sql = format!(
        "SELECT {} FROM recordings ORDER BY created_at ASC, id ASC",
        RECORDING_COLUMNS
    );
    let rows = sqlx::query(&sql).fetch_all(pool).await?;
    rows.iter().map(recording_from_row).collect()
}

async fn fetch_rows(pool: &Pool) -> Result<Vec<LocalRow>, StoreError> {
    let sql = format!(
        "SELECT {} FROM recordings ORDER BY created_at ASC, id ASC",
        LOCAL_ROW_COLUMNS
    );
    let rows = sqlx::query(&sql).fetch_all(pool).await?;
    rows.iter().map(local_row_from_row).collect()
}

async fn fetch_one(pool: &Pool, id: &str) -> Result<Option<Recording>, StoreError> {
    let sql = format!("SELECT {} FROM recordings WHERE id = ?", RECORDING_COLUMNS);
    let row = sqlx::query(&sql).bind(id).fetch_optional(pool).await?;
    row.as_ref().map(recording_from_row).transpose()
}

async fn delete_one(pool: &Pool, id: &str) -> Result<bool, StoreError> {
    let res = sqlx::query("DELETE FROM recordings WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(res.rows_affected() > 0)
}

async fn count_statuses(pool: &Pool) -> Result<StatusCounts, StoreError> {
    let rows = sqlx::query("SELECT status, COUNT(*) AS n FROM recordings GROUP BY status")
        .fetch_all(pool)
        .await?;
    let mut counts = StatusCounts::default();
    for row in rows {
        let status: String = row.try_get("status")?;
        let n: i64 = row.try_get("n")?;
        match RecordingStatus::parse(&status) {
            Some(RecordingStatus::Pending) => counts.pending += n,
            Some(RecordingStatus::Uploading) => counts.uploading += n,
            Some(RecordingStatus::Uploaded) => counts.uploaded += n,
            Some(RecordingStatus::Failed) => counts.failed += n,
            None => return Err(StoreError::Corrupt(format!("unknown status {}", status))),
        }
    }
    Ok(counts)
}
