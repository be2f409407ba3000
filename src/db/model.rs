//! Row mapping shared by the record and event stores.
//!
//! Keep this focused on turning SQLite rows into domain entities. Business
//! rules (other than load-time recovery) live in higher layers.

use super::repo::StoreError;
use crate::model::{EventStatus, LocalRow, OwnerInfo, Recording, RecordingStatus, StatusEvent};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

pub(crate) const RECORDING_COLUMNS: &str = "id, appointment_id, created_at, status, artifact, \
     content_type, duration_seconds, remote_key, last_error, device_id, \
     owner_subject, owner_email, owner_name";

/// Everything `LocalRow` needs; the artifact blob is left on disk.
pub(crate) const LOCAL_ROW_COLUMNS: &str = "id, appointment_id, created_at, status, \
     duration_seconds, remote_key, last_error, device_id";

pub(crate) const EVENT_COLUMNS: &str = "id, appointment_id, event_type, status_value, \
     occurred_at, status, owner_subject, owner_email, owner_name";

/// Number of local records per upload status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub pending: i64,
    pub uploading: i64,
    pub uploaded: i64,
    pub failed: i64,
}

impl StatusCounts {
    pub fn total(&self) -> i64 {
        self.pending + self.uploading + self.uploaded + self.failed
    }
}

fn owner_from_row(row: &SqliteRow) -> Result<OwnerInfo, sqlx::Error> {
    Ok(OwnerInfo {
        subject: row.try_get("owner_subject")?,
        email: row.try_get("owner_email")?,
        name: row.try_get("owner_name")?,
    })
}

/// Persisted status as readers see it.
///
/// A persisted `uploading` status means the process died mid-transfer; it is
/// reported as `pending` so the next cycle resumes it.
fn recovered_status(row: &SqliteRow, id: &str) -> Result<RecordingStatus, StoreError> {
    let status_str: String = row.try_get("status")?;
    match RecordingStatus::parse(&status_str) {
        Some(RecordingStatus::Uploading) => Ok(RecordingStatus::Pending),
        Some(other) => Ok(other),
        None => Err(StoreError::Corrupt(format!(
            "recording {} has unknown status {}",
            id, status_str
        ))),
    }
}

fn remote_key(row: &SqliteRow) -> Result<Option<String>, sqlx::Error> {
    Ok(row
        .try_get::<Option<String>, _>("remote_key")?
        .filter(|k| !k.trim().is_empty()))
}

/// Map a row into a `Recording`. A remote key already issued to an
/// interrupted attempt is kept.
pub(crate) fn recording_from_row(row: &SqliteRow) -> Result<Recording, StoreError> {
    let id: String = row.try_get("id")?;
    Ok(Recording {
        appointment_id: row.try_get("appointment_id")?,
        created_at: row.try_get("created_at")?,
        status: recovered_status(row, &id)?,
        artifact: row.try_get("artifact")?,
        content_type: row.try_get("content_type")?,
        duration_seconds: row.try_get("duration_seconds")?,
        remote_key: remote_key(row)?,
        last_error: row.try_get("last_error")?,
        device_id: row.try_get("device_id")?,
        owner: owner_from_row(row)?,
        id,
    })
}

pub(crate) fn local_row_from_row(row: &SqliteRow) -> Result<LocalRow, StoreError> {
    let id: String = row.try_get("id")?;
    Ok(LocalRow {
        appointment_id: row.try_get("appointment_id")?,
        created_at: row.try_get("created_at")?,
        status: recovered_status(row, &id)?,
        duration_seconds: row.try_get("duration_seconds")?,
        remote_key: remote_key(row)?,
        last_error: row.try_get("last_error")?,
        device_id: row.try_get("device_id")?,
        id,
    })
}

pub(crate) fn event_from_row(row: &SqliteRow) -> Result<StatusEvent, StoreError> {
    let id: String = row.try_get("id")?;
    let status_str: String = row.try_get("status")?;
    let status = EventStatus::parse(&status_str).ok_or_else(|| {
        StoreError::Corrupt(format!("status event {} has unknown status {}", id, status_str))
    })?;

    Ok(StatusEvent {
        appointment_id: row.try_get("appointment_id")?,
        event_type: row.try_get("event_type")?,
        status_value: row.try_get("status_value")?,
        occurred_at: row.try_get("occurred_at")?,
        status,
        owner: owner_from_row(row)?,
        id,
    })
}
