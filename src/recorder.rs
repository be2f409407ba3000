//! Presentation-facing entry points: save, upload, delete, sync, and the
//! filterable merged list, plus a status string the UI can observe.

use crate::auth::CredentialProvider;
use crate::capture::{resolve_duration, CapturedAudio, DurationProbe};
use crate::connectivity::Connectivity;
use crate::db::{LocalRecordStore, Pool, StoreError, SyncEventStore};
use crate::dispatch::{FailurePolicy, StatusEventDispatcher};
use crate::model::{DeviceScope, Recording, StatusEvent, UnifiedRow, ViewFilters};
use crate::remote::RemoteApi;
use crate::sync::{CycleReport, SyncController, SyncError, Trigger};
use crate::upload::{UploadOrchestrator, UploadOutcome};
use crate::view::UnifiedViewBuilder;
use chrono::NaiveDate;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{info, instrument};

/// Local precondition failures, reported before anything is persisted.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("an appointment id is required")]
    MissingAppointmentId,
    #[error("the recording is empty")]
    EmptyArtifact,
    #[error("event type is required")]
    MissingEventType,
    #[error("date range start {from} is after end {to}")]
    InvertedDateRange { from: NaiveDate, to: NaiveDate },
}

#[derive(Debug, Error)]
pub enum RecorderError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Sync(#[from] SyncError),
    #[error("remote request failed: {0:#}")]
    Remote(anyhow::Error),
}

pub struct Recorder {
    records: LocalRecordStore,
    events: SyncEventStore,
    view: UnifiedViewBuilder,
    remote: Arc<dyn RemoteApi>,
    credentials: Arc<dyn CredentialProvider>,
    controller: Arc<SyncController>,
    probe: Option<Arc<dyn DurationProbe>>,
    probe_timeout: Duration,
    device_id: String,
    filters: Mutex<ViewFilters>,
}

impl Recorder {
    pub fn new(
        pool: Pool,
        remote: Arc<dyn RemoteApi>,
        credentials: Arc<dyn CredentialProvider>,
        connectivity: watch::Receiver<Connectivity>,
        device_id: impl Into<String>,
        policy: FailurePolicy,
    ) -> Self {
        let records = LocalRecordStore::new(pool.clone());
        let events = SyncEventStore::new(pool);
        let uploader = UploadOrchestrator::new(records.clone(), remote.clone());
        let dispatcher = StatusEventDispatcher::new(events.clone(), remote.clone(), policy);
        let controller = Arc::new(SyncController::new(
            records.clone(),
            uploader,
            dispatcher,
            credentials.clone(),
            connectivity,
        ));
        Self {
            view: UnifiedViewBuilder::new(records.clone(), remote.clone()),
            records,
            events,
            remote,
            credentials,
            controller,
            probe: None,
            probe_timeout: Duration::from_secs(3),
            device_id: device_id.into(),
            filters: Mutex::new(ViewFilters::default()),
        }
    }

    pub fn with_duration_probe(mut self, probe: Arc<dyn DurationProbe>, timeout: Duration) -> Self {
        self.probe = Some(probe);
        self.probe_timeout = timeout;
        self
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn records(&self) -> &LocalRecordStore {
        &self.records
    }

    pub fn events(&self) -> &SyncEventStore {
        &self.events
    }

    /// Shared with the host so it can spawn `watch_connectivity`.
    pub fn controller(&self) -> Arc<SyncController> {
        self.controller.clone()
    }

    pub fn status_messages(&self) -> watch::Receiver<String> {
        self.controller.subscribe_progress()
    }

    #[instrument(skip(self, audio), fields(len = audio.bytes.len()))]
    pub async fn save_new_recording(
        &self,
        appointment_id: &str,
        audio: CapturedAudio,
    ) -> Result<Recording, RecorderError> {
        let appointment_id = appointment_id.trim();
        if appointment_id.is_empty() {
            return Err(ValidationError::MissingAppointmentId.into());
        }
        if audio.bytes.is_empty() {
            return Err(ValidationError::EmptyArtifact.into());
        }

        let duration = resolve_duration(&audio, self.probe.as_deref(), self.probe_timeout).await;
        let owner = self
            .credentials
            .session()
            .await
            .map(|s| s.owner)
            .unwrap_or_default();
        let record = Recording::new(
            appointment_id,
            audio.bytes,
            audio.content_type,
            duration,
            self.device_id.clone(),
            owner,
        );
        self.records.create(&record).await?;
        info!(id = %record.id, appointment_id, "recording saved");
        self.controller
            .publish(format!("Saved recording for {}", appointment_id));
        Ok(record)
    }

    #[instrument(skip(self))]
    pub async fn queue_status_event(
        &self,
        appointment_id: &str,
        event_type: &str,
        status_value: &str,
    ) -> Result<StatusEvent, RecorderError> {
        let appointment_id = appointment_id.trim();
        if appointment_id.is_empty() {
            return Err(ValidationError::MissingAppointmentId.into());
        }
        if event_type.trim().is_empty() {
            return Err(ValidationError::MissingEventType.into());
        }
        let owner = self
            .credentials
            .session()
            .await
            .map(|s| s.owner)
            .unwrap_or_default();
        let event = StatusEvent::new(appointment_id, event_type.trim(), status_value, owner);
        self.events.enqueue(&event).await?;
        Ok(event)
    }

    pub async fn upload_one(&self, id: &str) -> Result<UploadOutcome, RecorderError> {
        self.controller.publish("Uploading recording");
        let outcome = self.controller.upload_one(id).await;
        match &outcome {
            Ok(UploadOutcome::Uploaded { .. }) => self.controller.publish("Upload complete"),
            Ok(UploadOutcome::Failed { error }) => self
                .controller
                .publish(format!("Upload failed, kept for retry: {}", error)),
            Err(err) => self.controller.publish(format!("Upload not started: {}", err)),
        }
        Ok(outcome?)
    }

    pub async fn delete_local(&self, id: &str) -> Result<bool, RecorderError> {
        Ok(self.controller.delete_local(id).await?)
    }

    /// Manual sync. `None` means a cycle was already running.
    pub async fn sync_now(&self) -> Result<Option<CycleReport>, RecorderError> {
        let report = self.controller.run_cycle(Trigger::Manual).await?;
        if report.is_none() {
            self.controller.publish("Sync already in progress");
        }
        Ok(report)
    }

    pub async fn unified_rows(&self) -> Result<Vec<UnifiedRow>, RecorderError> {
        let filters = self.filters();
        let session = self.credentials.session().await;
        let rows = self
            .view
            .build(
                &filters,
                &self.device_id,
                self.controller.connectivity(),
                session.as_ref(),
            )
            .await?;
        Ok(rows)
    }

    pub async fn playback_url(&self, key: &str) -> Result<String, RecorderError> {
        let session = self
            .credentials
            .session()
            .await
            .ok_or(SyncError::Unauthenticated)?;
        let target = self
            .remote
            .issue_playback_target(&session, key)
            .await
            .map_err(RecorderError::Remote)?;
        Ok(target.url)
    }

    pub fn filters(&self) -> ViewFilters {
        self.filters
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn set_date_range(
        &self,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> Result<(), ValidationError> {
        if let (Some(from), Some(to)) = (from, to) {
            if from > to {
                return Err(ValidationError::InvertedDateRange { from, to });
            }
        }
        self.update_filters(|f| {
            f.from = from;
            f.to = to;
        });
        Ok(())
    }

    pub fn set_status_filter(&self, status: Option<&str>) {
        let status = status.map(str::trim).filter(|s| !s.is_empty()).map(str::to_string);
        self.update_filters(|f| f.status = status);
    }

    pub fn set_device_scope(&self, scope: DeviceScope) {
        self.update_filters(|f| f.device = scope);
    }

    fn update_filters(&self, apply: impl FnOnce(&mut ViewFilters)) {
        let mut filters = self.filters.lock().unwrap_or_else(|e| e.into_inner());
        apply(&mut filters);
    }
}
