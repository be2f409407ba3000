#![allow(dead_code)]

use anyhow::{anyhow, Result};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};

use recsync::auth::{Session, StaticCredentials};
use recsync::connectivity::ConnectivityMonitor;
use recsync::db::{self, Pool};
use recsync::dispatch::FailurePolicy;
use recsync::model::{OwnerInfo, RemoteEntry, StatusEvent};
use recsync::recorder::Recorder;
use recsync::remote::{EventOutcome, IndexQuery, PlaybackTarget, RemoteApi, UploadTarget, UploadTargetRequest};

pub const DEVICE: &str = "device-a";

pub async fn setup_pool() -> Pool {
    let pool = db::init_pool("sqlite::memory:").await.unwrap();
    db::run_migrations(&pool).await.unwrap();
    pool
}

pub fn session() -> Session {
    Session {
        bearer: "test-token".into(),
        owner: OwnerInfo {
            subject: Some("user-1".into()),
            email: Some("tech@example.com".into()),
            name: Some("Field Tech".into()),
        },
    }
}

pub fn build_recorder(
    pool: Pool,
    remote: Arc<FakeRemote>,
    monitor: &ConnectivityMonitor,
    signed_in: bool,
) -> Recorder {
    let credentials = if signed_in {
        StaticCredentials::new(Some(session()))
    } else {
        StaticCredentials::signed_out()
    };
    Recorder::new(
        pool,
        remote,
        Arc::new(credentials),
        monitor.subscribe(),
        DEVICE,
        FailurePolicy::default(),
    )
}

/// Raw persisted status, bypassing the store's load-time recovery.
pub async fn raw_status(pool: &Pool, id: &str) -> Option<(String, Option<String>)> {
    sqlx::query_as::<_, (String, Option<String>)>(
        "SELECT status, remote_key FROM recordings WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await
    .unwrap()
}

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    IssueUpload(UploadTargetRequest),
    Transfer { key: String, len: usize },
    Playback(String),
    ListIndex(IndexQuery),
    SendEvents(Vec<String>),
}

/// Scripted stand-in for the remote service. Each queue is consumed front to
/// back; once empty, calls succeed with a generated answer.
#[derive(Default)]
pub struct FakeRemote {
    upload_targets: Mutex<VecDeque<Result<UploadTarget>>>,
    transfers: Mutex<VecDeque<Result<()>>>,
    event_responses: Mutex<VecDeque<Result<Vec<EventOutcome>>>>,
    index: Mutex<VecDeque<Result<Vec<RemoteEntry>>>>,
    calls: Mutex<Vec<Call>>,
    issued: Mutex<usize>,
    /// Persisted `(status, remote_key)` of every record, sampled when a
    /// transfer starts.
    observed_at_transfer: Mutex<Vec<(String, Option<String>)>>,
    observe_pool: Mutex<Option<Pool>>,
    gate: Mutex<Option<Arc<Notify>>>,
    pub transfer_started: Notify,
}

impl FakeRemote {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn push_upload_target(&self, r: Result<UploadTarget>) {
        self.upload_targets.lock().await.push_back(r);
    }

    pub async fn push_transfer(&self, r: Result<()>) {
        self.transfers.lock().await.push_back(r);
    }

    pub async fn push_event_response(&self, r: Result<Vec<EventOutcome>>) {
        self.event_responses.lock().await.push_back(r);
    }

    pub async fn push_index(&self, r: Result<Vec<RemoteEntry>>) {
        self.index.lock().await.push_back(r);
    }

    pub async fn observe(&self, pool: Pool) {
        *self.observe_pool.lock().await = Some(pool);
    }

    /// Make every transfer wait until the returned handle is notified.
    pub async fn hold_transfers(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.gate.lock().await = Some(gate.clone());
        gate
    }

    pub async fn calls(&self) -> Vec<Call> {
        self.calls.lock().await.clone()
    }

    pub async fn transfer_count(&self) -> usize {
        self.calls()
            .await
            .iter()
            .filter(|c| matches!(c, Call::Transfer { .. }))
            .count()
    }

    pub async fn observed_at_transfer(&self) -> Vec<(String, Option<String>)> {
        self.observed_at_transfer.lock().await.clone()
    }
}

#[async_trait::async_trait]
impl RemoteApi for FakeRemote {
    async fn issue_upload_target(
        &self,
        _session: &Session,
        request: &UploadTargetRequest,
    ) -> Result<UploadTarget> {
        self.calls.lock().await.push(Call::IssueUpload(request.clone()));
        if let Some(scripted) = self.upload_targets.lock().await.pop_front() {
            return scripted;
        }
        let mut issued = self.issued.lock().await;
        *issued += 1;
        Ok(UploadTarget {
            url: format!("https://storage.test/put/{}", issued),
            key: format!("recordings/{}/{}.webm", request.appointment_id, issued),
        })
    }

    async fn transfer(&self, target: &UploadTarget, _content_type: &str, bytes: &[u8]) -> Result<()> {
        self.calls.lock().await.push(Call::Transfer {
            key: target.key.clone(),
            len: bytes.len(),
        });
        if let Some(pool) = self.observe_pool.lock().await.clone() {
            let rows = sqlx::query_as::<_, (String, Option<String>)>(
                "SELECT status, remote_key FROM recordings ORDER BY created_at",
            )
            .fetch_all(&pool)
            .await?;
            self.observed_at_transfer.lock().await.extend(rows);
        }
        self.transfer_started.notify_one();
        let gate = self.gate.lock().await.clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        self.transfers.lock().await.pop_front().unwrap_or(Ok(()))
    }

    async fn issue_playback_target(&self, _session: &Session, key: &str) -> Result<PlaybackTarget> {
        self.calls.lock().await.push(Call::Playback(key.to_string()));
        Ok(PlaybackTarget {
            url: format!("https://storage.test/get/{}", key),
        })
    }

    async fn list_index(&self, _session: &Session, query: &IndexQuery) -> Result<Vec<RemoteEntry>> {
        self.calls.lock().await.push(Call::ListIndex(query.clone()));
        self.index.lock().await.pop_front().unwrap_or_else(|| Ok(Vec::new()))
    }

    async fn send_status_events(
        &self,
        _session: &Session,
        events: &[StatusEvent],
    ) -> Result<Vec<EventOutcome>> {
        self.calls
            .lock()
            .await
            .push(Call::SendEvents(events.iter().map(|e| e.id.clone()).collect()));
        if let Some(scripted) = self.event_responses.lock().await.pop_front() {
            return scripted;
        }
        Ok(events.iter().map(|e| outcome_for(e, true)).collect())
    }
}

pub fn outcome_for(event: &StatusEvent, success: bool) -> EventOutcome {
    EventOutcome {
        appointment_id: event.appointment_id.clone(),
        event_type: event.event_type.clone(),
        occurred_at: event.occurred_at,
        success,
        status_code: (!success).then_some(500),
        error_code: None,
        message: None,
    }
}

pub fn not_found(event: &StatusEvent) -> EventOutcome {
    EventOutcome {
        status_code: Some(404),
        error_code: Some("APPOINTMENT_NOT_FOUND".into()),
        message: Some("appointment no longer exists".into()),
        ..outcome_for(event, false)
    }
}

pub fn network_down() -> anyhow::Error {
    anyhow!("connection reset by peer")
}
