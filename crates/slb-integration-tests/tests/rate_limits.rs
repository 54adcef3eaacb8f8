//! Per-session admission limits seen through request creation.

mod common;

use slb_approval::ApprovalError;
use slb_core::{RateLimitAction, RequestStatus};

use common::{project_with, status_of};

#[tokio::test]
async fn test_per_minute_cap_admits_then_rejects() {
    let p = project_with(|c| {
        c.rate_limits.max_pending_per_session = 0;
        c.rate_limits.max_requests_per_minute = 3;
    });
    let alice = p.session("alice").await;

    for dir in ["a", "b", "c"] {
        let created = p.create(&alice, &format!("rm -rf ./{dir}")).await.unwrap();
        assert!(created.rate_limit_warning.is_none());
    }
    let err = p.create(&alice, "rm -rf ./d").await.unwrap_err();
    let ApprovalError::RateLimited(breach) = &err else {
        panic!("expected rate limit, got {err:?}");
    };
    assert_eq!(err.kind(), "rate_limited");
    assert!(breach.minute_exceeded());
    assert_eq!(breach.recent, 3);
    assert!(breach.reset_at.is_some());

    let pending = p.engine.pending(Default::default()).await.unwrap();
    assert_eq!(pending.len(), 3);
}

#[tokio::test]
async fn test_window_slides_with_the_clock() {
    let p = project_with(|c| {
        c.rate_limits.max_pending_per_session = 0;
        c.rate_limits.max_requests_per_minute = 1;
    });
    let alice = p.session("alice").await;

    p.open(&alice, "rm -rf ./a").await;
    assert!(p.create(&alice, "rm -rf ./b").await.is_err());
    p.clock.advance(61);
    p.open(&alice, "rm -rf ./b").await;
}

#[tokio::test]
async fn test_safe_commands_count_toward_the_limit() {
    let p = project_with(|c| {
        c.rate_limits.max_pending_per_session = 0;
        c.rate_limits.max_requests_per_minute = 2;
    });
    let alice = p.session("alice").await;

    assert!(p.create(&alice, "git stash").await.unwrap().skipped);
    assert!(p.create(&alice, "npm cache clean").await.unwrap().skipped);
    let err = p.create(&alice, "git stash").await.unwrap_err();
    assert_eq!(err.kind(), "rate_limited");
}

#[tokio::test]
async fn test_pending_cap_frees_when_a_request_resolves() {
    let p = project_with(|c| {
        c.rate_limits.max_pending_per_session = 1;
        c.rate_limits.max_requests_per_minute = 0;
    });
    let alice = p.session("alice").await;
    let bob = p.session("bob").await;

    let first = p.open(&alice, "rm -rf ./a").await;
    let err = p.create(&alice, "rm -rf ./b").await.unwrap_err();
    let ApprovalError::RateLimited(breach) = &err else {
        panic!("expected rate limit, got {err:?}");
    };
    assert!(breach.pending_exceeded());

    p.reject(&bob, first, "not now").await.unwrap();
    assert_eq!(status_of(&p, first).await, RequestStatus::Rejected);
    p.open(&alice, "rm -rf ./b").await;
}

#[tokio::test]
async fn test_warn_action_admits_with_warning() {
    let p = project_with(|c| {
        c.rate_limits.max_pending_per_session = 0;
        c.rate_limits.max_requests_per_minute = 1;
        c.rate_limits.rate_limit_action = RateLimitAction::Warn;
    });
    let alice = p.session("alice").await;

    let first = p.create(&alice, "rm -rf ./a").await.unwrap();
    assert!(first.rate_limit_warning.is_none());
    let second = p.create(&alice, "rm -rf ./b").await.unwrap();
    let warning = second.rate_limit_warning.as_ref().expect("warning");
    assert_eq!(warning.action, RateLimitAction::Warn);
    assert!(second.request_id().is_some());
}

#[tokio::test]
async fn test_limits_are_per_session_and_resettable() {
    let p = project_with(|c| {
        c.rate_limits.max_pending_per_session = 0;
        c.rate_limits.max_requests_per_minute = 1;
    });
    let alice = p.session("alice").await;
    let bob = p.session("bob").await;

    p.open(&alice, "rm -rf ./a").await;
    assert!(p.create(&alice, "rm -rf ./b").await.is_err());
    p.open(&bob, "rm -rf ./c").await;

    p.engine.reset_rate_limits(alice.session.id).await.unwrap();
    p.open(&alice, "rm -rf ./b").await;
}
