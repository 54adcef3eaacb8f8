//! Several processes sharing one ledger, and classification stability.

mod common;

use slb_approval::{
    ApprovalEngine, ApprovalResult, ExecuteOptions, RegisteredSession, ReviewResult,
    RiskClassifier, SubmitReview,
};
use slb_audit::AuditAction;
use slb_core::{Decision, RequestId, RequestStatus, RiskTier};
use slb_test::test_config;

use common::{project, project_with, reviews_of, status_of};

async fn approve_on(
    engine: &ApprovalEngine,
    reviewer: &RegisteredSession,
    id: RequestId,
) -> ApprovalResult<ReviewResult> {
    engine
        .submit_review(SubmitReview {
            session_id: reviewer.session.id,
            session_key: reviewer.key.to_hex(),
            request_id: id,
            decision: Decision::Approve,
            comments: String::new(),
        })
        .await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_approvals_change_status_once() {
    let p = project();
    let other = p.second_process();
    let alice = p.session("alice").await;
    let bob = p.session("bob").await;
    let carol = p.session("carol").await;
    let id = p.open(&alice, "rm -rf ./build").await;

    let (a, b) = tokio::join!(approve_on(&p.engine, &bob, id), approve_on(&other, &carol, id));
    let a = a.unwrap();
    let b = b.unwrap();

    let changed = [&a, &b].iter().filter(|r| r.request_status_changed).count();
    assert_eq!(changed, 1);
    assert_eq!(status_of(&p, id).await, RequestStatus::Approved);
    assert_eq!(reviews_of(&p, id).await.len(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_only_one_process_claims_execution() {
    let p = project();
    let other = p.second_process();
    let alice = p.session("alice").await;
    let bob = p.session("bob").await;
    let id = p.open(&alice, "rm -rf ./build").await;
    p.approve(&bob, id).await.unwrap();

    let opts = ExecuteOptions {
        request_id: id,
        capture_rollback: Some(false),
        ..ExecuteOptions::default()
    };
    let (a, b) = tokio::join!(p.engine.execute(opts.clone()), other.execute(opts));

    let (wins, losses): (Vec<_>, Vec<_>) = [a, b].into_iter().partition(Result::is_ok);
    assert_eq!(wins.len(), 1);
    assert_eq!(losses.len(), 1);
    let err = losses.into_iter().next().unwrap().unwrap_err();
    assert_eq!(err.kind(), "conflict");
    assert_eq!(status_of(&p, id).await, RequestStatus::Executed);

    let claims = p
        .engine
        .audit_entries(Some(id))
        .await
        .unwrap()
        .into_iter()
        .filter(|e| {
            matches!(
                e.action,
                AuditAction::StatusChanged {
                    to: RequestStatus::Executing,
                    ..
                }
            )
        })
        .count();
    assert_eq!(claims, 1);
}

#[tokio::test]
async fn test_second_process_sees_first_process_writes() {
    let p = project_with(|c| c.patterns.dangerous.min_approvals = 2);
    let other = p.second_process();
    let alice = p.session("alice").await;
    let bob = p.session("bob").await;
    let carol = p.session("carol").await;
    let id = p.open(&alice, "rm -rf ./build").await;

    let first = approve_on(&other, &bob, id).await.unwrap();
    assert_eq!(first.approvals, 1);
    let second = p.approve(&carol, id).await.unwrap();
    assert_eq!(second.approvals, 2);
    assert_eq!(second.new_request_status, RequestStatus::Approved);

    let seen = other.request(id).await.unwrap();
    assert_eq!(seen.request.status, RequestStatus::Approved);
    assert!(other.verify_audit().await.unwrap().valid);
}

#[test]
fn test_classification_is_deterministic() {
    let config = test_config();
    let first = RiskClassifier::from_config(&config).unwrap();
    let second = RiskClassifier::from_config(&config).unwrap();

    let commands = [
        ("rm -rf /etc", RiskTier::Critical),
        ("rm -rf ./build", RiskTier::Dangerous),
        ("git reset --hard HEAD~1", RiskTier::Dangerous),
        ("rm notes.txt", RiskTier::Caution),
        ("rm old.log", RiskTier::Caution),
        ("git stash", RiskTier::Safe),
    ];
    for (command, tier) in commands {
        let a = first.classify(command);
        let b = second.classify(command);
        assert_eq!(a, b, "{command}");
        assert_eq!(a.tier, tier, "{command}");
        assert_eq!(first.tier_of(command), a.tier);
        for _ in 0..3 {
            assert_eq!(first.classify(command), a);
        }
    }
}
