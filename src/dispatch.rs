use crate::auth::Session;
use crate::connectivity::Connectivity;
use crate::db::{StoreError, SyncEventStore};
use crate::remote::{EventOutcome, RemoteApi};
use regex::Regex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// One "the external reference no longer resolves" signature: an outcome
/// whose status code equals `status_code` and whose error code matches
/// `error_code` can never succeed.
#[derive(Debug, Clone)]
pub struct PermanentFailureRule {
    pub status_code: u16,
    pub error_code: Regex,
}

impl PermanentFailureRule {
    pub fn matches(&self, outcome: &EventOutcome) -> bool {
        outcome.status_code == Some(self.status_code)
            && outcome
                .error_code
                .as_deref()
                .is_some_and(|code| self.error_code.is_match(code))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeClass {
    Success,
    Permanent,
    Transient,
}

#[derive(Debug, Clone)]
pub struct FailurePolicy {
    rules: Vec<PermanentFailureRule>,
}

impl FailurePolicy {
    pub fn new(rules: Vec<PermanentFailureRule>) -> Self {
        Self { rules }
    }

    /// Anything not matching a permanent rule is transient.
    pub fn classify(&self, outcome: &EventOutcome) -> OutcomeClass {
        if outcome.success {
            OutcomeClass::Success
        } else if self.rules.iter().any(|r| r.matches(outcome)) {
            OutcomeClass::Permanent
        } else {
            OutcomeClass::Transient
        }
    }
}

impl Default for FailurePolicy {
    fn default() -> Self {
        Self::new(vec![PermanentFailureRule {
            status_code: 404,
            error_code: Regex::new("^APPOINTMENT_NOT_FOUND$").expect("valid default rule"),
        }])
    }
}

/// Keep the latest outcome per `(appointment_id, event_type)`. On equal
/// timestamps the first one seen stays.
pub fn reduce_latest(outcomes: Vec<EventOutcome>) -> HashMap<(String, String), EventOutcome> {
    let mut latest: HashMap<(String, String), EventOutcome> = HashMap::new();
    for outcome in outcomes {
        let key = outcome.key();
        match latest.get(&key) {
            Some(seen) if seen.occurred_at >= outcome.occurred_at => {}
            _ => {
                latest.insert(key, outcome);
            }
        }
    }
    latest
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NothingPending,
    Offline,
    Unauthenticated,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    pub processed: usize,
    pub succeeded: usize,
    pub dropped: usize,
    pub kept_pending: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchReport {
    /// Preconditions not met; nothing was sent.
    Skipped(SkipReason),
    /// The request failed before a response was parsed; every event stays
    /// pending.
    Deferred { pending: usize, error: String },
    Delivered(DispatchSummary),
}

impl fmt::Display for DispatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchReport::Skipped(SkipReason::NothingPending) => write!(f, "no status events to send"),
            DispatchReport::Skipped(SkipReason::Offline) => write!(f, "offline; status events kept"),
            DispatchReport::Skipped(SkipReason::Unauthenticated) => {
                write!(f, "not signed in; status events kept")
            }
            DispatchReport::Deferred { pending, .. } => {
                write!(f, "status sync failed; {} event(s) kept for retry", pending)
            }
            DispatchReport::Delivered(s) => write!(
                f,
                "{} status event(s) synced, {} dropped, {} kept for retry",
                s.succeeded, s.dropped, s.kept_pending
            ),
        }
    }
}

/// Sends every pending status event in one batch and settles each one from
/// the remote verdict. Not reentrant: the caller must not overlap cycles.
#[derive(Clone)]
pub struct StatusEventDispatcher {
    events: SyncEventStore,
    remote: Arc<dyn RemoteApi>,
    policy: FailurePolicy,
}

impl StatusEventDispatcher {
    pub fn new(events: SyncEventStore, remote: Arc<dyn RemoteApi>, policy: FailurePolicy) -> Self {
        Self {
            events,
            remote,
            policy,
        }
    }

    #[instrument(skip_all)]
    pub async fn run_cycle(
        &self,
        connectivity: Connectivity,
        session: Option<&Session>,
    ) -> Result<DispatchReport, StoreError> {
        let pending = self.events.pending().await?;
        if pending.is_empty() {
            return Ok(DispatchReport::Skipped(SkipReason::NothingPending));
        }
        if !connectivity.is_reachable() {
            return Ok(DispatchReport::Skipped(SkipReason::Offline));
        }
        let Some(session) = session else {
            return Ok(DispatchReport::Skipped(SkipReason::Unauthenticated));
        };

        let outcomes = match self.remote.send_status_events(session, &pending).await {
            Ok(outcomes) => outcomes,
            Err(err) => {
                warn!(?err, count = pending.len(), "status event batch failed; all kept pending");
                return Ok(DispatchReport::Deferred {
                    pending: pending.len(),
                    error: format!("{:#}", err),
                });
            }
        };
        let latest = reduce_latest(outcomes);

        let mut summary = DispatchSummary {
            processed: pending.len(),
            ..Default::default()
        };
        let mut settled = Vec::new();
        for event in &pending {
            let Some(outcome) = latest.get(&event.outcome_key()) else {
                summary.kept_pending += 1;
                continue;
            };
            match self.policy.classify(outcome) {
                OutcomeClass::Success => {
                    summary.succeeded += 1;
                    settled.push(event.id.clone());
                }
                OutcomeClass::Permanent => {
                    warn!(
                        id = %event.id,
                        appointment_id = %event.appointment_id,
                        event_type = %event.event_type,
                        status_code = ?outcome.status_code,
                        error_code = ?outcome.error_code,
                        message = ?outcome.message,
                        "dropping status event: permanent remote failure"
                    );
                    summary.dropped += 1;
                    settled.push(event.id.clone());
                }
                OutcomeClass::Transient => {
                    summary.kept_pending += 1;
                }
            }
        }

        self.events.mark_completed(&settled).await?;
        info!(
            processed = summary.processed,
            succeeded = summary.succeeded,
            dropped = summary.dropped,
            kept_pending = summary.kept_pending,
            "status event batch settled"
        );
        Ok(DispatchReport::Delivered(summary))
    }
}
