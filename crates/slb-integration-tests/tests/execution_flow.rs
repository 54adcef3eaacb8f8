//! Requests carried from creation through execution, expiry and rollback.

mod common;

use std::fs;
use std::time::{Duration, Instant};

use slb_approval::{DEFAULT_POLL_INTERVAL, ExecuteOptions, NotificationEvent};
use slb_audit::AuditAction;
use slb_core::{RequestStatus, RiskTier};

use common::{log_cleanup_is_safe, project, project_with, reviews_of, status_of};

fn options(id: slb_core::RequestId) -> ExecuteOptions {
    ExecuteOptions {
        request_id: id,
        ..ExecuteOptions::default()
    }
}

#[tokio::test]
async fn test_safe_command_skips_review_and_runs() {
    let p = project_with(log_cleanup_is_safe);
    let alice = p.session("alice").await;
    let log = p.work_dir().join("old.log");
    fs::write(&log, "stale").unwrap();

    let created = p.create(&alice, "rm old.log").await.unwrap();
    assert!(created.skipped);
    assert_eq!(created.classification.tier, RiskTier::Safe);
    assert!(created.request.is_none());
    assert!(created.request_id().is_none());

    let pending = p.engine.pending(Default::default()).await.unwrap();
    assert!(pending.is_empty());

    let result = p.engine.execute_skipped("rm old.log", &p.work_dir(), false, None).await;
    assert_eq!(result.exit_code, 0, "{}", result.output);
    assert!(result.request_id.is_none());
    assert!(!log.exists());
}

#[tokio::test]
async fn test_safe_command_waits_out_its_delay() {
    let p = project_with(|c| {
        log_cleanup_is_safe(c);
        c.patterns.safe.auto_approve_delay_seconds = 1;
    });
    let alice = p.session("alice").await;
    let log = p.work_dir().join("old.log");
    fs::write(&log, "stale").unwrap();

    let created = p.create(&alice, "rm old.log").await.unwrap();
    assert!(created.skipped);
    assert_eq!(created.auto_approve_delay_secs, 1);

    let delay = Duration::from_secs(created.auto_approve_delay_secs);
    let started = Instant::now();
    assert!(p.engine.auto_approve_delay(delay, std::future::pending()).await);
    assert!(started.elapsed() >= delay);
    assert!(log.exists());

    let result = p.engine.execute_skipped("rm old.log", &p.work_dir(), false, None).await;
    assert_eq!(result.exit_code, 0, "{}", result.output);
    assert!(!log.exists());
}

#[tokio::test]
async fn test_interrupted_delay_never_runs_the_command() {
    let p = project_with(|c| {
        log_cleanup_is_safe(c);
        c.patterns.safe.auto_approve_delay_seconds = 30;
    });
    let alice = p.session("alice").await;
    let log = p.work_dir().join("old.log");
    fs::write(&log, "stale").unwrap();

    let created = p.create(&alice, "rm old.log").await.unwrap();
    let delay = Duration::from_secs(created.auto_approve_delay_secs);
    let started = Instant::now();
    assert!(!p.engine.auto_approve_delay(delay, async {}).await);
    assert!(started.elapsed() < delay);
    assert!(log.exists());
}

#[tokio::test]
async fn test_expired_wait_times_out_and_frees_pending_slot() {
    let p = project_with(|c| {
        c.rate_limits.max_pending_per_session = 1;
        c.rate_limits.max_requests_per_minute = 0;
    });
    let alice = p.session("alice").await;
    let bob = p.session("bob").await;
    let id = p.open(&alice, "rm -rf ./build").await;
    assert_eq!(p.create(&alice, "rm -rf ./dist").await.unwrap_err().kind(), "rate_limited");

    let waited = tokio::time::timeout(
        Duration::from_millis(50),
        p.engine.wait_for_decision(id, DEFAULT_POLL_INTERVAL, std::future::pending()),
    )
    .await;
    assert!(waited.is_err());
    let closed = p.engine.abandon_wait(id).await.unwrap();
    assert_eq!(closed.status, RequestStatus::Timeout);
    assert_eq!(status_of(&p, id).await, RequestStatus::Timeout);

    let trail = p.engine.audit_entries(Some(id)).await.unwrap();
    assert!(trail.iter().any(|e| matches!(
        e.action,
        AuditAction::StatusChanged {
            from: RequestStatus::Pending,
            to: RequestStatus::Timeout,
            ..
        }
    )));
    assert!(p.notifier.events().iter().any(|e| matches!(
        e,
        NotificationEvent::StatusChanged { request_id, to: RequestStatus::Timeout, .. } if *request_id == id
    )));

    assert_eq!(p.approve(&bob, id).await.unwrap_err().kind(), "conflict");
    p.open(&alice, "rm -rf ./dist").await;
}

#[tokio::test]
async fn test_caution_rm_shadows_safe_log_pattern() {
    let p = project();
    let alice = p.session("alice").await;

    let created = p.create(&alice, "rm old.log").await.unwrap();
    assert!(!created.skipped);
    assert_eq!(created.classification.tier, RiskTier::Caution);
    assert_eq!(created.auto_approve_delay_secs, 30);
    assert!(created.request_id().is_some());
}

#[tokio::test]
async fn test_expired_approval_returns_to_pending() {
    let p = project_with(|c| c.general.approval_ttl_minutes = 1);
    let alice = p.session("alice").await;
    let bob = p.session("bob").await;
    let id = p.open(&alice, "rm -rf ./build").await;

    p.approve(&bob, id).await.unwrap();
    assert_eq!(status_of(&p, id).await, RequestStatus::Approved);

    p.clock.advance(120);
    let err = p.engine.execute(options(id)).await.unwrap_err();
    assert_eq!(err.kind(), "timeout");

    let view = p.engine.request(id).await.unwrap();
    assert_eq!(view.request.status, RequestStatus::Pending);
    assert!(view.request.execution.is_none());
}

#[tokio::test]
async fn test_fresh_review_after_expiry_allows_execution() {
    let p = project_with(|c| c.general.approval_ttl_minutes = 1);
    let alice = p.session("alice").await;
    let bob = p.session("bob").await;
    let carol = p.session("carol").await;
    fs::create_dir_all(p.work_dir().join("build")).unwrap();
    let id = p.open(&alice, "rm -rf ./build").await;

    p.approve(&bob, id).await.unwrap();
    p.clock.advance(120);
    assert!(p.engine.execute(options(id)).await.is_err());

    let again = p.approve(&carol, id).await.unwrap();
    assert_eq!(again.new_request_status, RequestStatus::Approved);
    let result = p.engine.execute(options(id)).await.unwrap();
    assert_eq!(result.status, Some(RequestStatus::Executed));
}

#[tokio::test]
async fn test_approved_command_runs_and_can_be_rolled_back() {
    let p = project();
    let alice = p.session("alice").await;
    let bob = p.session("bob").await;
    let build = p.work_dir().join("build");
    fs::create_dir_all(build.join("out")).unwrap();
    fs::write(build.join("out/app.bin"), b"binary").unwrap();
    fs::write(build.join("manifest.json"), b"{}").unwrap();

    let id = p.open(&alice, "rm -rf ./build").await;
    p.approve(&bob, id).await.unwrap();

    let result = p
        .engine
        .execute(ExecuteOptions {
            request_id: id,
            session_id: Some(alice.session.id),
            capture_rollback: Some(true),
            timeout: None,
        })
        .await
        .unwrap();
    assert_eq!(result.exit_code, 0, "{}", result.output);
    assert_eq!(result.status, Some(RequestStatus::Executed));
    assert!(result.rollback_path.is_some());
    assert!(!build.exists());

    let view = p.engine.request(id).await.unwrap();
    assert_eq!(view.request.status, RequestStatus::Executed);
    assert_eq!(view.request.execution.as_ref().map(|e| e.exit_code), Some(0));
    assert_eq!(view.reviews.len(), 1);

    let report = p.engine.restore_rollback(id, false).await.unwrap();
    assert!(report.files >= 2);
    assert_eq!(fs::read(build.join("out/app.bin")).unwrap(), b"binary");
    assert_eq!(fs::read(build.join("manifest.json")).unwrap(), b"{}");

    let verification = p.engine.verify_audit().await.unwrap();
    assert!(verification.valid, "{:?}", verification.issues);
}

#[tokio::test]
async fn test_failing_command_is_recorded_as_failed() {
    let p = project();
    let alice = p.session("alice").await;
    let bob = p.session("bob").await;
    let id = p.open(&alice, "rm -r ./does-not-exist").await;
    p.approve(&bob, id).await.unwrap();

    let result = p.engine.execute(options(id)).await.unwrap();
    assert_ne!(result.exit_code, 0);
    assert_eq!(result.status, Some(RequestStatus::ExecutionFailed));
    assert_eq!(status_of(&p, id).await, RequestStatus::ExecutionFailed);
}

#[tokio::test]
async fn test_only_requester_may_execute() {
    let p = project();
    let alice = p.session("alice").await;
    let bob = p.session("bob").await;
    let id = p.open(&alice, "rm -rf ./build").await;
    p.approve(&bob, id).await.unwrap();

    let err = p
        .engine
        .execute(ExecuteOptions {
            request_id: id,
            session_id: Some(bob.session.id),
            ..ExecuteOptions::default()
        })
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "authorization_error");
    assert_eq!(status_of(&p, id).await, RequestStatus::Approved);
}

#[tokio::test]
async fn test_pending_request_cannot_execute() {
    let p = project();
    let alice = p.session("alice").await;
    let id = p.open(&alice, "rm -rf ./build").await;

    let err = p.engine.execute(options(id)).await.unwrap_err();
    assert_eq!(err.kind(), "conflict");
    assert_eq!(status_of(&p, id).await, RequestStatus::Pending);
}

#[tokio::test]
async fn test_requester_cancels_pending_request() {
    let p = project();
    let alice = p.session("alice").await;
    let bob = p.session("bob").await;
    let id = p.open(&alice, "rm -rf ./build").await;

    let err = p.engine.cancel(id, bob.session.id).await.unwrap_err();
    assert_eq!(err.kind(), "authorization_error");

    let cancelled = p.engine.cancel(id, alice.session.id).await.unwrap();
    assert_eq!(cancelled.status, RequestStatus::Cancelled);
    assert!(cancelled.resolved_at.is_some());

    let err = p.approve(&bob, id).await.unwrap_err();
    assert_eq!(err.kind(), "conflict");
    assert!(reviews_of(&p, id).await.is_empty());
}

#[tokio::test]
async fn test_ended_session_cannot_request() {
    let p = project();
    let alice = p.session("alice").await;
    p.engine.end_session(alice.session.id).await.unwrap();

    let err = p.create(&alice, "rm -rf ./build").await.unwrap_err();
    assert_eq!(err.kind(), "authentication_error", "{err:?}");
}
