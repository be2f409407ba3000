mod common;

use common::{build_recorder, network_down, raw_status, setup_pool, Call, FakeRemote, DEVICE};
use recsync::capture::CapturedAudio;
use recsync::connectivity::{Connectivity, ConnectivityMonitor};
use recsync::model::RecordingStatus;
use recsync::recorder::{RecorderError, ValidationError};
use recsync::remote::UploadTarget;
use recsync::sync::SyncError;
use recsync::upload::UploadOutcome;

fn audio() -> CapturedAudio {
    CapturedAudio::new(vec![7u8; 2048], "audio/webm").with_duration(12.3)
}

#[tokio::test]
async fn upload_one_persists_key_and_marks_uploaded() {
    let pool = setup_pool().await;
    let remote = FakeRemote::new();
    remote.observe(pool.clone()).await;
    let monitor = ConnectivityMonitor::new(Connectivity::Reachable);
    let recorder = build_recorder(pool.clone(), remote.clone(), &monitor, true);

    let saved = recorder.save_new_recording("WO-1", audio()).await.unwrap();
    assert_eq!(saved.status, RecordingStatus::Pending);
    assert_eq!(saved.device_id, DEVICE);
    assert_eq!(saved.owner.email.as_deref(), Some("tech@example.com"));

    let outcome = recorder.upload_one(&saved.id).await.unwrap();
    let UploadOutcome::Uploaded { key } = outcome else {
        panic!("expected upload to succeed");
    };

    // Status was `uploading` with the key already written when bytes moved.
    let observed = remote.observed_at_transfer().await;
    assert_eq!(observed, vec![("uploading".to_string(), Some(key.clone()))]);

    let stored = recorder.records().get_by_id(&saved.id).await.unwrap().unwrap();
    assert_eq!(stored.status, RecordingStatus::Uploaded);
    assert_eq!(stored.remote_key.as_deref(), Some(key.as_str()));
    assert!(stored.last_error.is_none());
    assert_eq!(stored.artifact.len(), 2048);

    let calls = remote.calls().await;
    match &calls[0] {
        Call::IssueUpload(req) => {
            assert_eq!(req.appointment_id, "WO-1");
            assert_eq!(req.content_type, "audio/webm");
            assert_eq!(req.device_id, DEVICE);
            assert_eq!(req.duration_seconds, Some(12.3));
        }
        other => panic!("unexpected first call {:?}", other),
    }
    assert_eq!(calls[1], Call::Transfer { key, len: 2048 });
}

#[tokio::test]
async fn failed_transfer_keeps_artifact_and_retry_reuses_record() {
    let pool = setup_pool().await;
    let remote = FakeRemote::new();
    remote.push_transfer(Err(network_down())).await;
    let monitor = ConnectivityMonitor::new(Connectivity::Reachable);
    let recorder = build_recorder(pool.clone(), remote.clone(), &monitor, true);

    let saved = recorder.save_new_recording("WO-1", audio()).await.unwrap();

    let first = recorder.upload_one(&saved.id).await.unwrap();
    assert!(matches!(first, UploadOutcome::Failed { ref error } if error.contains("connection reset")));
    let failed = recorder.records().get_by_id(&saved.id).await.unwrap().unwrap();
    assert_eq!(failed.status, RecordingStatus::Failed);
    assert!(failed.last_error.as_deref().unwrap().contains("connection reset"));
    assert_eq!(failed.artifact.len(), 2048);

    let second = recorder.upload_one(&saved.id).await.unwrap();
    assert!(second.is_uploaded());

    let all = recorder.records().get_all().await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].id, saved.id);
    assert_eq!(all[0].status, RecordingStatus::Uploaded);
    assert!(all[0].last_error.is_none());
    // A fresh target was requested for the retry.
    assert_eq!(all[0].remote_key.as_deref(), Some("recordings/WO-1/2.webm"));
}

#[tokio::test]
async fn failed_target_issue_marks_failed_without_key() {
    let pool = setup_pool().await;
    let remote = FakeRemote::new();
    remote.push_upload_target(Err(anyhow::anyhow!("503 Service Unavailable"))).await;
    let monitor = ConnectivityMonitor::new(Connectivity::Reachable);
    let recorder = build_recorder(pool.clone(), remote.clone(), &monitor, true);

    let saved = recorder.save_new_recording("WO-1", audio()).await.unwrap();
    let outcome = recorder.upload_one(&saved.id).await.unwrap();
    assert!(!outcome.is_uploaded());
    assert_eq!(remote.transfer_count().await, 0);
    assert_eq!(raw_status(&pool, &saved.id).await, Some(("failed".into(), None)));
}

#[tokio::test]
async fn blank_storage_key_fails_before_transfer() {
    let pool = setup_pool().await;
    let remote = FakeRemote::new();
    remote
        .push_upload_target(Ok(UploadTarget {
            url: "https://storage.test/put/1".into(),
            key: "  ".into(),
        }))
        .await;
    let monitor = ConnectivityMonitor::new(Connectivity::Reachable);
    let recorder = build_recorder(pool.clone(), remote.clone(), &monitor, true);

    let saved = recorder.save_new_recording("WO-1", audio()).await.unwrap();
    let outcome = recorder.upload_one(&saved.id).await.unwrap();
    assert!(matches!(outcome, UploadOutcome::Failed { ref error } if error.contains("storage key")));
    assert_eq!(remote.transfer_count().await, 0);
    assert_eq!(raw_status(&pool, &saved.id).await, Some(("failed".into(), None)));

    // A well-formed target on retry goes through.
    assert!(recorder.upload_one(&saved.id).await.unwrap().is_uploaded());
}

#[tokio::test]
async fn upload_one_checks_preconditions() {
    let pool = setup_pool().await;
    let remote = FakeRemote::new();
    let monitor = ConnectivityMonitor::new(Connectivity::Unreachable);
    let recorder = build_recorder(pool.clone(), remote.clone(), &monitor, true);
    let saved = recorder.save_new_recording("WO-1", audio()).await.unwrap();

    let err = recorder.upload_one(&saved.id).await.unwrap_err();
    assert!(matches!(err, RecorderError::Sync(SyncError::Offline)));

    monitor.set(Connectivity::Reachable);
    let err = recorder.upload_one("missing").await.unwrap_err();
    assert!(matches!(err, RecorderError::Sync(SyncError::UnknownRecording(_))));

    recorder.upload_one(&saved.id).await.unwrap();
    let err = recorder.upload_one(&saved.id).await.unwrap_err();
    assert!(matches!(err, RecorderError::Sync(SyncError::AlreadyUploaded(_))));

    let signed_out = build_recorder(pool.clone(), remote.clone(), &monitor, false);
    let other = signed_out.save_new_recording("WO-9", audio()).await.unwrap();
    assert!(other.owner.email.is_none());
    let err = signed_out.upload_one(&other.id).await.unwrap_err();
    assert!(matches!(err, RecorderError::Sync(SyncError::Unauthenticated)));
    assert_eq!(remote.transfer_count().await, 1);
}

#[tokio::test]
async fn save_rejects_missing_fields_before_persisting() {
    let pool = setup_pool().await;
    let monitor = ConnectivityMonitor::new(Connectivity::Unreachable);
    let recorder = build_recorder(pool, FakeRemote::new(), &monitor, true);

    let err = recorder.save_new_recording("  ", audio()).await.unwrap_err();
    assert!(matches!(
        err,
        RecorderError::Validation(ValidationError::MissingAppointmentId)
    ));
    let err = recorder
        .save_new_recording("WO-1", CapturedAudio::new(Vec::new(), "audio/webm"))
        .await
        .unwrap_err();
    assert!(matches!(err, RecorderError::Validation(ValidationError::EmptyArtifact)));

    assert!(recorder.records().get_all().await.unwrap().is_empty());
}

#[tokio::test]
async fn interrupted_upload_is_retried_as_pending() {
    let pool = setup_pool().await;
    let monitor = ConnectivityMonitor::new(Connectivity::Reachable);
    let remote = FakeRemote::new();
    let recorder = build_recorder(pool.clone(), remote.clone(), &monitor, true);
    let saved = recorder.save_new_recording("WO-1", audio()).await.unwrap();

    // Simulate a crash between steps: persisted as uploading.
    sqlx::query("UPDATE recordings SET status = 'uploading' WHERE id = ?")
        .bind(&saved.id)
        .execute(&pool)
        .await
        .unwrap();

    let loaded = recorder.records().get_by_id(&saved.id).await.unwrap().unwrap();
    assert_eq!(loaded.status, RecordingStatus::Pending);

    let report = recorder.sync_now().await.unwrap().unwrap();
    assert_eq!(report.uploaded, 1);
    assert_eq!(report.cleaned, 1);
    assert!(recorder.records().get_all().await.unwrap().is_empty());
}
