use crate::auth::Session;
use crate::db::{LocalRecordStore, StoreError};
use crate::model::{Recording, RecordingStatus};
use crate::remote::{RemoteApi, UploadTargetRequest};
use anyhow::{anyhow, Result};
use std::sync::Arc;
use tracing::{info, instrument, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    Uploaded { key: String },
    /// The attempt failed and the record is persisted as `failed`; the
    /// artifact is still local.
    Failed { error: String },
}

impl UploadOutcome {
    pub fn is_uploaded(&self) -> bool {
        matches!(self, UploadOutcome::Uploaded { .. })
    }
}

/// Drives one recording from `pending`/`failed` to `uploaded`, or back to
/// `failed` with the error recorded. Callers guarantee at most one attempt
/// per record id at a time.
#[derive(Clone)]
pub struct UploadOrchestrator {
    records: LocalRecordStore,
    remote: Arc<dyn RemoteApi>,
}

impl UploadOrchestrator {
    pub fn new(records: LocalRecordStore, remote: Arc<dyn RemoteApi>) -> Self {
        Self { records, remote }
    }

    /// Returns `Err` only when the local store itself fails. Remote failures
    /// are recorded on the record and reported as `UploadOutcome::Failed`.
    #[instrument(skip_all, fields(id = %record.id, appointment_id = %record.appointment_id))]
    pub async fn upload(
        &self,
        session: &Session,
        mut record: Recording,
    ) -> Result<UploadOutcome, StoreError> {
        // Persisted before any network work so a crash is visible on restart.
        record.status = RecordingStatus::Uploading;
        self.records.update(&record).await?;

        match self.transfer(session, &mut record).await {
            Ok(key) => {
                record.status = RecordingStatus::Uploaded;
                record.last_error = None;
                self.records.update(&record).await?;
                info!(%key, "recording uploaded");
                Ok(UploadOutcome::Uploaded { key })
            }
            Err(TransferError::Store(err)) => Err(err),
            Err(TransferError::Remote(err)) => self.mark_failed(record, format!("{:#}", err)).await,
        }
    }

    /// Steps 2-4 of an attempt; returns the key the bytes landed under.
    async fn transfer(
        &self,
        session: &Session,
        record: &mut Recording,
    ) -> Result<String, TransferError> {
        let request = UploadTargetRequest {
            appointment_id: record.appointment_id.clone(),
            content_type: record.content_type.clone(),
            device_id: record.device_id.clone(),
            duration_seconds: record.duration_seconds,
        };
        let target = self
            .remote
            .issue_upload_target(session, &request)
            .await
            .map_err(TransferError::Remote)?;
        if target.key.trim().is_empty() {
            return Err(TransferError::Remote(anyhow!(
                "remote issued an upload target without a storage key"
            )));
        }

        // The key is written down before the bytes move.
        record.remote_key = Some(target.key.clone());
        self.records.update(record).await.map_err(TransferError::Store)?;

        self.remote
            .transfer(&target, &record.content_type, &record.artifact)
            .await
            .map_err(TransferError::Remote)?;
        Ok(target.key)
    }

    async fn mark_failed(
        &self,
        mut record: Recording,
        error: String,
    ) -> Result<UploadOutcome, StoreError> {
        warn!(id = %record.id, %error, "upload failed; kept for retry");
        record.status = RecordingStatus::Failed;
        record.last_error = Some(error.clone());
        self.records.update(&record).await?;
        Ok(UploadOutcome::Failed { error })
    }
}

enum TransferError {
    Remote(anyhow::Error),
    Store(StoreError),
}
