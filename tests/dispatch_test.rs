mod common;

use chrono::Duration;
use common::{build_recorder, network_down, not_found, outcome_for, session, setup_pool, Call, FakeRemote};
use recsync::connectivity::{Connectivity, ConnectivityMonitor};
use recsync::db::SyncEventStore;
use recsync::dispatch::{DispatchReport, DispatchSummary, FailurePolicy, SkipReason, StatusEventDispatcher};
use recsync::model::{EventStatus, OwnerInfo, StatusEvent};
use recsync::recorder::{RecorderError, ValidationError};

fn dispatcher(events: &SyncEventStore, remote: std::sync::Arc<FakeRemote>) -> StatusEventDispatcher {
    StatusEventDispatcher::new(events.clone(), remote, FailurePolicy::default())
}

async fn enqueue(events: &SyncEventStore, appt: &str, ty: &str) -> StatusEvent {
    let ev = StatusEvent::new(appt, ty, "Started", OwnerInfo::default());
    events.enqueue(&ev).await.unwrap();
    ev
}

#[tokio::test]
async fn success_and_permanent_failure_both_complete() {
    let pool = setup_pool().await;
    let events = SyncEventStore::new(pool);
    let remote = FakeRemote::new();
    let ok = enqueue(&events, "WO-1", "START").await;
    let gone = enqueue(&events, "WO-404", "START").await;
    remote
        .push_event_response(Ok(vec![outcome_for(&ok, true), not_found(&gone)]))
        .await;

    let report = dispatcher(&events, remote.clone())
        .run_cycle(Connectivity::Reachable, Some(&session()))
        .await
        .unwrap();
    assert_eq!(
        report,
        DispatchReport::Delivered(DispatchSummary {
            processed: 2,
            succeeded: 1,
            dropped: 1,
            kept_pending: 0,
        })
    );
    assert!(events.pending().await.unwrap().is_empty());
    let all = events.get_all().await.unwrap();
    assert!(all.iter().all(|e| e.status == EventStatus::Completed));
    assert_eq!(
        remote.calls().await,
        vec![Call::SendEvents(vec![ok.id.clone(), gone.id.clone()])]
    );
}

#[tokio::test]
async fn request_failure_leaves_batch_pending() {
    let pool = setup_pool().await;
    let events = SyncEventStore::new(pool);
    let remote = FakeRemote::new();
    enqueue(&events, "WO-1", "START").await;
    enqueue(&events, "WO-1", "DONE").await;
    remote.push_event_response(Err(network_down())).await;

    let report = dispatcher(&events, remote)
        .run_cycle(Connectivity::Reachable, Some(&session()))
        .await
        .unwrap();
    match report {
        DispatchReport::Deferred { pending, error } => {
            assert_eq!(pending, 2);
            assert!(error.contains("connection reset"));
        }
        other => panic!("unexpected report {:?}", other),
    }
    assert_eq!(events.pending().await.unwrap().len(), 2);
}

#[tokio::test]
async fn transient_and_unmatched_outcomes_stay_pending() {
    let pool = setup_pool().await;
    let events = SyncEventStore::new(pool);
    let remote = FakeRemote::new();
    let flaky = enqueue(&events, "WO-1", "START").await;
    let validation = enqueue(&events, "WO-2", "START").await;
    let unanswered = enqueue(&events, "WO-3", "START").await;

    let mut bad_request = outcome_for(&validation, false);
    bad_request.status_code = Some(400);
    bad_request.error_code = Some("VALIDATION_FAILED".into());
    remote
        .push_event_response(Ok(vec![outcome_for(&flaky, false), bad_request]))
        .await;

    let report = dispatcher(&events, remote)
        .run_cycle(Connectivity::Reachable, Some(&session()))
        .await
        .unwrap();
    assert_eq!(
        report,
        DispatchReport::Delivered(DispatchSummary {
            processed: 3,
            succeeded: 0,
            dropped: 0,
            kept_pending: 3,
        })
    );
    let pending: Vec<_> = events.pending().await.unwrap().into_iter().map(|e| e.id).collect();
    assert_eq!(pending, vec![flaky.id, validation.id, unanswered.id]);
}

#[tokio::test]
async fn preconditions_skip_without_calling_remote() {
    let pool = setup_pool().await;
    let events = SyncEventStore::new(pool);
    let remote = FakeRemote::new();
    let d = dispatcher(&events, remote.clone());

    let report = d.run_cycle(Connectivity::Reachable, Some(&session())).await.unwrap();
    assert_eq!(report, DispatchReport::Skipped(SkipReason::NothingPending));

    enqueue(&events, "WO-1", "START").await;
    let report = d.run_cycle(Connectivity::Unreachable, Some(&session())).await.unwrap();
    assert_eq!(report, DispatchReport::Skipped(SkipReason::Offline));
    let report = d.run_cycle(Connectivity::Reachable, None).await.unwrap();
    assert_eq!(report, DispatchReport::Skipped(SkipReason::Unauthenticated));

    assert!(remote.calls().await.is_empty());
    assert_eq!(events.pending().await.unwrap().len(), 1);
}

#[tokio::test]
async fn repeated_start_events_settle_on_latest_outcome() {
    let pool = setup_pool().await;
    let remote = FakeRemote::new();
    let monitor = ConnectivityMonitor::new(Connectivity::Unreachable);
    let recorder = build_recorder(pool, remote.clone(), &monitor, true);

    let first = recorder.queue_status_event("WO-2", "START", "Started").await.unwrap();
    let second = recorder.queue_status_event("WO-2", "START", "Started again").await.unwrap();
    assert_eq!(first.owner.subject.as_deref(), Some("user-1"));

    // Offline: nothing leaves the device.
    let report = recorder.sync_now().await.unwrap().unwrap();
    assert_eq!(report.dispatch, DispatchReport::Skipped(SkipReason::Offline));
    assert_eq!(recorder.events().pending().await.unwrap().len(), 2);

    // The remote reports an older failure and a newer success for the key.
    let mut older = outcome_for(&first, false);
    older.occurred_at = first.occurred_at - Duration::seconds(30);
    let mut newer = outcome_for(&second, true);
    newer.occurred_at = second.occurred_at + Duration::seconds(1);
    remote.push_event_response(Ok(vec![newer, older])).await;

    monitor.set(Connectivity::Reachable);
    let report = recorder.sync_now().await.unwrap().unwrap();
    assert_eq!(
        report.dispatch,
        DispatchReport::Delivered(DispatchSummary {
            processed: 2,
            succeeded: 2,
            dropped: 0,
            kept_pending: 0,
        })
    );
    let all = recorder.events().get_all().await.unwrap();
    assert_eq!(all.len(), 2);
    assert!(all.iter().all(|e| e.status == EventStatus::Completed));
}

#[tokio::test]
async fn completed_events_are_not_resent() {
    let pool = setup_pool().await;
    let remote = FakeRemote::new();
    let monitor = ConnectivityMonitor::new(Connectivity::Reachable);
    let recorder = build_recorder(pool, remote.clone(), &monitor, true);

    recorder.queue_status_event("WO-5", "ARRIVED", "On site").await.unwrap();
    recorder.sync_now().await.unwrap();
    let report = recorder.sync_now().await.unwrap().unwrap();
    assert_eq!(report.dispatch, DispatchReport::Skipped(SkipReason::NothingPending));

    let sends = remote
        .calls()
        .await
        .into_iter()
        .filter(|c| matches!(c, Call::SendEvents(_)))
        .count();
    assert_eq!(sends, 1);
}

#[tokio::test]
async fn queue_rejects_missing_fields() {
    let pool = setup_pool().await;
    let monitor = ConnectivityMonitor::new(Connectivity::Reachable);
    let recorder = build_recorder(pool, FakeRemote::new(), &monitor, true);

    let err = recorder.queue_status_event("", "START", "x").await.unwrap_err();
    assert!(matches!(err, RecorderError::Validation(ValidationError::MissingAppointmentId)));
    let err = recorder.queue_status_event("WO-1", " ", "x").await.unwrap_err();
    assert!(matches!(err, RecorderError::Validation(ValidationError::MissingEventType)));
    assert!(recorder.events().get_all().await.unwrap().is_empty());
}
