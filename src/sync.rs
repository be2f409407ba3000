//! Connectivity-triggered sync controller.
//!
//! Both triggers (connectivity regained, manual sync) run the same cycle:
//! upload every `pending`/`failed` recording, delete local copies that are
//! `uploaded`, then send pending status events. A trigger that arrives while
//! a cycle is running is dropped; the next trigger picks up whatever it
//! missed.

use crate::auth::CredentialProvider;
use crate::connectivity::Connectivity;
use crate::db::{LocalRecordStore, StoreError};
use crate::dispatch::{DispatchReport, StatusEventDispatcher};
use crate::model::RecordingStatus;
use crate::upload::{UploadOrchestrator, UploadOutcome};
use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("recording {0} not found")]
    UnknownRecording(String),
    #[error("recording {0} is already being uploaded")]
    InFlight(String),
    #[error("recording {0} is already uploaded")]
    AlreadyUploaded(String),
    #[error("device is offline")]
    Offline,
    #[error("not signed in")]
    Unauthenticated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    ConnectivityRegained,
    Manual,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub trigger: Trigger,
    pub uploaded: usize,
    pub failed: usize,
    /// Records skipped because an upload for them was already running.
    pub busy: usize,
    /// Uploads not attempted because the device was offline or signed out.
    pub deferred: usize,
    pub cleaned: usize,
    pub dispatch: DispatchReport,
}

impl fmt::Display for CycleReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Sync finished: {} uploaded, {} failed, {} waiting, {} cleaned up; {}",
            self.uploaded,
            self.failed,
            self.deferred + self.busy,
            self.cleaned,
            self.dispatch
        )
    }
}

/// Record ids with an upload currently running.
#[derive(Debug, Default)]
struct InFlight {
    ids: Mutex<HashSet<String>>,
}

impl InFlight {
    fn claim(&self, id: &str) -> Option<InFlightGuard<'_>> {
        let mut ids = self.ids.lock().unwrap_or_else(|e| e.into_inner());
        if ids.insert(id.to_string()) {
            Some(InFlightGuard {
                owner: self,
                id: id.to_string(),
            })
        } else {
            None
        }
    }

    fn contains(&self, id: &str) -> bool {
        self.ids
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(id)
    }
}

struct InFlightGuard<'a> {
    owner: &'a InFlight,
    id: String,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.owner
            .ids
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.id);
    }
}

pub struct SyncController {
    records: LocalRecordStore,
    uploader: UploadOrchestrator,
    dispatcher: StatusEventDispatcher,
    credentials: Arc<dyn CredentialProvider>,
    connectivity: watch::Receiver<Connectivity>,
    cycle: tokio::sync::Mutex<()>,
    in_flight: InFlight,
    progress: watch::Sender<String>,
}

impl SyncController {
    pub fn new(
        records: LocalRecordStore,
        uploader: UploadOrchestrator,
        dispatcher: StatusEventDispatcher,
        credentials: Arc<dyn CredentialProvider>,
        connectivity: watch::Receiver<Connectivity>,
    ) -> Self {
        let (progress, _) = watch::channel(String::new());
        Self {
            records,
            uploader,
            dispatcher,
            credentials,
            connectivity,
            cycle: tokio::sync::Mutex::new(()),
            in_flight: InFlight::default(),
            progress,
        }
    }

    pub fn connectivity(&self) -> Connectivity {
        *self.connectivity.borrow()
    }

    pub fn subscribe_progress(&self) -> watch::Receiver<String> {
        self.progress.subscribe()
    }

    pub(crate) fn publish(&self, message: impl Into<String>) {
        self.progress.send_replace(message.into());
    }

    pub fn is_cycle_running(&self) -> bool {
        self.cycle.try_lock().is_err()
    }

    pub fn is_uploading(&self, id: &str) -> bool {
        self.in_flight.contains(id)
    }

    /// Run one full cycle. Returns `None` if a cycle was already running.
    #[instrument(skip(self))]
    pub async fn run_cycle(&self, trigger: Trigger) -> Result<Option<CycleReport>, SyncError> {
        let Ok(_cycle) = self.cycle.try_lock() else {
            debug!("sync cycle already running; trigger ignored");
            return Ok(None);
        };
        let manual = trigger == Trigger::Manual;
        let connectivity = self.connectivity();
        let session = self.credentials.session().await;

        let mut report = CycleReport {
            trigger,
            uploaded: 0,
            failed: 0,
            busy: 0,
            deferred: 0,
            cleaned: 0,
            dispatch: DispatchReport::Skipped(crate::dispatch::SkipReason::NothingPending),
        };

        let candidates: Vec<String> = self
            .records
            .list_rows()
            .await?
            .into_iter()
            .filter(|r| r.status.is_retryable())
            .map(|r| r.id)
            .collect();
        let total = candidates.len();

        match (connectivity.is_reachable(), session.as_ref()) {
            (true, Some(session)) => {
                for (i, id) in candidates.into_iter().enumerate() {
                    if manual {
                        self.publish(format!("Uploading {}/{}", i + 1, total));
                    }
                    let Some(_guard) = self.in_flight.claim(&id) else {
                        report.busy += 1;
                        continue;
                    };
                    // The listing is stale once earlier uploads have awaited.
                    let record = match self.records.get_by_id(&id).await? {
                        Some(r) if r.status.is_retryable() => r,
                        _ => {
                            debug!(%id, "recording deleted or settled during cycle; skipped");
                            continue;
                        }
                    };
                    match self.uploader.upload(session, record).await? {
                        UploadOutcome::Uploaded { .. } => report.uploaded += 1,
                        UploadOutcome::Failed { .. } => report.failed += 1,
                    }
                }
            }
            _ => {
                report.deferred = total;
                if total > 0 {
                    info!(total, ?connectivity, signed_in = session.is_some(), "uploads deferred");
                }
            }
        }

        if manual {
            self.publish("Cleaning up uploaded recordings");
        }
        report.cleaned = self.cleanup_uploaded().await?;

        if manual {
            self.publish("Sending status updates");
        }
        report.dispatch = self
            .dispatcher
            .run_cycle(connectivity, session.as_ref())
            .await?;

        info!(
            ?trigger,
            uploaded = report.uploaded,
            failed = report.failed,
            deferred = report.deferred,
            cleaned = report.cleaned,
            dispatch = %report.dispatch,
            "sync cycle finished"
        );
        if manual {
            self.publish(report.to_string());
        }
        Ok(Some(report))
    }

    /// Upload a single recording outside a cycle.
    #[instrument(skip(self))]
    pub async fn upload_one(&self, id: &str) -> Result<UploadOutcome, SyncError> {
        if !self.connectivity().is_reachable() {
            return Err(SyncError::Offline);
        }
        let session = self
            .credentials
            .session()
            .await
            .ok_or(SyncError::Unauthenticated)?;
        let guard = self
            .in_flight
            .claim(id)
            .ok_or_else(|| SyncError::InFlight(id.to_string()))?;
        let record = self
            .records
            .get_by_id(id)
            .await?
            .ok_or_else(|| SyncError::UnknownRecording(id.to_string()))?;
        if record.status == RecordingStatus::Uploaded {
            return Err(SyncError::AlreadyUploaded(id.to_string()));
        }
        let outcome = self.uploader.upload(&session, record).await?;
        drop(guard);
        Ok(outcome)
    }

    /// Delete a local record unless an upload for it is running.
    pub async fn delete_local(&self, id: &str) -> Result<bool, SyncError> {
        let _guard = self
            .in_flight
            .claim(id)
            .ok_or_else(|| SyncError::InFlight(id.to_string()))?;
        Ok(self.records.delete_by_id(id).await?)
    }

    async fn cleanup_uploaded(&self) -> Result<usize, StoreError> {
        let mut cleaned = 0;
        for record in self.records.list_rows().await? {
            if record.status != RecordingStatus::Uploaded {
                continue;
            }
            let Some(_guard) = self.in_flight.claim(&record.id) else {
                continue;
            };
            if self.records.delete_by_id(&record.id).await? {
                debug!(id = %record.id, key = ?record.remote_key, "local copy removed after upload");
                cleaned += 1;
            }
        }
        Ok(cleaned)
    }

    /// Follow connectivity transitions until the signal source goes away,
    /// running a cycle each time the device becomes reachable.
    pub async fn watch_connectivity(self: Arc<Self>) {
        let mut rx = self.connectivity.clone();
        let mut last = *rx.borrow_and_update();
        while rx.changed().await.is_ok() {
            let now = *rx.borrow_and_update();
            let regained = !last.is_reachable() && now.is_reachable();
            last = now;
            if !regained {
                continue;
            }
            info!("connectivity regained; starting sync");
            match self.run_cycle(Trigger::ConnectivityRegained).await {
                Ok(Some(_)) => {}
                Ok(None) => debug!("cycle already running"),
                Err(err) => warn!(?err, "sync cycle aborted"),
            }
        }
        debug!("connectivity source closed");
    }
}
