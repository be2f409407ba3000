use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum RecordingStatus {
    Pending,
    Uploading,
    Uploaded,
    Failed,
}

impl RecordingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordingStatus::Pending => "pending",
            RecordingStatus::Uploading => "uploading",
            RecordingStatus::Uploaded => "uploaded",
            RecordingStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(RecordingStatus::Pending),
            "uploading" => Some(RecordingStatus::Uploading),
            "uploaded" => Some(RecordingStatus::Uploaded),
            "failed" => Some(RecordingStatus::Failed),
            _ => None,
        }
    }

    /// Whether a sync cycle should (re)try this record.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RecordingStatus::Pending | RecordingStatus::Failed)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Pending,
    /// Confirmed by the remote authority, or dropped as a permanent failure.
    Completed,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Pending => "pending",
            EventStatus::Completed => "completed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(EventStatus::Pending),
            "completed" => Some(EventStatus::Completed),
            _ => None,
        }
    }
}

/// Snapshot of the signed-in identity taken when a record is created.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct OwnerInfo {
    pub subject: Option<String>,
    pub email: Option<String>,
    pub name: Option<String>,
}

#[derive(Clone, Serialize, Deserialize, PartialEq)]
pub struct Recording {
    pub id: String,
    pub appointment_id: String,
    pub created_at: DateTime<Utc>,
    pub status: RecordingStatus,
    pub artifact: Vec<u8>,
    pub content_type: String,
    pub duration_seconds: Option<f64>,
    pub remote_key: Option<String>,
    pub last_error: Option<String>,
    pub device_id: String,
    pub owner: OwnerInfo,
}

impl Recording {
    pub fn new(
        appointment_id: impl Into<String>,
        artifact: Vec<u8>,
        content_type: impl Into<String>,
        duration_seconds: Option<f64>,
        device_id: impl Into<String>,
        owner: OwnerInfo,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            appointment_id: appointment_id.into(),
            created_at: Utc::now(),
            status: RecordingStatus::Pending,
            artifact,
            content_type: content_type.into(),
            duration_seconds,
            remote_key: None,
            last_error: None,
            device_id: device_id.into(),
            owner,
        }
    }
}

// The artifact can be megabytes of audio; print its size instead.
impl fmt::Debug for Recording {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Recording")
            .field("id", &self.id)
            .field("appointment_id", &self.appointment_id)
            .field("created_at", &self.created_at)
            .field("status", &self.status)
            .field("artifact_len", &self.artifact.len())
            .field("content_type", &self.content_type)
            .field("duration_seconds", &self.duration_seconds)
            .field("remote_key", &self.remote_key)
            .field("last_error", &self.last_error)
            .field("device_id", &self.device_id)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusEvent {
    pub id: String,
    pub appointment_id: String,
    pub event_type: String,
    pub status_value: String,
    pub occurred_at: DateTime<Utc>,
    pub status: EventStatus,
    pub owner: OwnerInfo,
}

impl StatusEvent {
    pub fn new(
        appointment_id: impl Into<String>,
        event_type: impl Into<String>,
        status_value: impl Into<String>,
        owner: OwnerInfo,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            appointment_id: appointment_id.into(),
            event_type: event_type.into(),
            status_value: status_value.into(),
            occurred_at: Utc::now(),
            status: EventStatus::Pending,
            owner,
        }
    }

    /// Composite key used to match remote outcomes back to local events.
    pub fn outcome_key(&self) -> (String, String) {
        (self.appointment_id.clone(), self.event_type.clone())
    }
}

/// An uploaded artifact as listed by the remote index.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RemoteEntry {
    pub key: String,
    pub appointment_id: String,
    pub created_at: DateTime<Utc>,
    pub status: String,
    pub duration_seconds: Option<f64>,
    pub device_id: Option<String>,
    pub owner_email: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DeviceScope {
    ThisDevice,
    #[default]
    Any,
}

/// Active list filters. Dates are inclusive and compared at UTC day granularity.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ViewFilters {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub status: Option<String>,
    pub device: DeviceScope,
}

impl ViewFilters {
    pub fn matches_local(&self, row: &LocalRow, device_id: &str) -> bool {
        let day = row.created_at.date_naive();
        if self.from.is_some_and(|from| day < from) {
            return false;
        }
        if self.to.is_some_and(|to| day > to) {
            return false;
        }
        if let Some(status) = self.status.as_deref() {
            if row.status.as_str() != status {
                return false;
            }
        }
        match self.device {
            DeviceScope::Any => true,
            DeviceScope::ThisDevice => row.device_id == device_id,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RowSource {
    Local,
    Remote,
}

/// Local record projected for display; the artifact stays in the store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LocalRow {
    pub id: String,
    pub appointment_id: String,
    pub created_at: DateTime<Utc>,
    pub status: RecordingStatus,
    pub duration_seconds: Option<f64>,
    pub remote_key: Option<String>,
    pub last_error: Option<String>,
    pub device_id: String,
}

impl From<&Recording> for LocalRow {
    fn from(r: &Recording) -> Self {
        Self {
            id: r.id.clone(),
            appointment_id: r.appointment_id.clone(),
            created_at: r.created_at,
            status: r.status,
            duration_seconds: r.duration_seconds,
            remote_key: r.remote_key.clone(),
            last_error: r.last_error.clone(),
            device_id: r.device_id.clone(),
        }
    }
}

/// One entry of the merged list. Local rows route follow-up actions (upload,
/// delete) to the record store by `id`; remote rows carry the storage key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "source", rename_all = "lowercase")]
pub enum UnifiedRow {
    Local(LocalRow),
    Remote(RemoteEntry),
}

impl UnifiedRow {
    pub fn source(&self) -> RowSource {
        match self {
            UnifiedRow::Local(_) => RowSource::Local,
            UnifiedRow::Remote(_) => RowSource::Remote,
        }
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        match self {
            UnifiedRow::Local(row) => row.created_at,
            UnifiedRow::Remote(entry) => entry.created_at,
        }
    }

    pub fn appointment_id(&self) -> &str {
        match self {
            UnifiedRow::Local(row) => &row.appointment_id,
            UnifiedRow::Remote(entry) => &entry.appointment_id,
        }
    }

    pub fn status(&self) -> &str {
        match self {
            UnifiedRow::Local(row) => row.status.as_str(),
            UnifiedRow::Remote(entry) => &entry.status,
        }
    }

    /// Storage key of the artifact, if it has one yet.
    pub fn storage_key(&self) -> Option<&str> {
        match self {
            UnifiedRow::Local(row) => row.remote_key.as_deref(),
            UnifiedRow::Remote(entry) => Some(&entry.key),
        }
    }
}
