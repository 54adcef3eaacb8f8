//! Shared helpers for integration tests.

#![allow(dead_code)]

use slb_approval::{ApprovalResult, RegisteredSession, ReviewResult, SubmitReview};
use slb_config::Config;
use slb_core::{Decision, RequestId, RequestStatus, Review};
use slb_test::{TestProject, init_test_logging, test_config};

/// A project whose built-in configuration was adjusted by `tweak`.
pub fn project_with(tweak: impl FnOnce(&mut Config)) -> TestProject {
    init_test_logging();
    let mut config = test_config();
    tweak(&mut config);
    TestProject::with_config(config)
}

/// A project with the built-in configuration.
pub fn project() -> TestProject {
    project_with(|_| {})
}

/// Drop the catch-all caution `rm` pattern so `.log`/`.tmp`/`.bak`
/// removals reach the safe tier.
pub fn log_cleanup_is_safe(config: &mut Config) {
    config.patterns.caution.patterns.retain(|p| p != r"^rm\s+[^-]");
}

/// Well-formed key material that belongs to nobody.
pub fn foreign_key() -> String {
    "ab".repeat(32)
}

/// Submit a review presenting `key` instead of the reviewer's own.
pub async fn review_with_key(
    project: &TestProject,
    reviewer: &RegisteredSession,
    id: RequestId,
    decision: Decision,
    key: String,
) -> ApprovalResult<ReviewResult> {
    project
        .engine
        .submit_review(SubmitReview {
            session_id: reviewer.session.id,
            session_key: key,
            request_id: id,
            decision,
            comments: String::new(),
        })
        .await
}

/// Current status of `id`.
pub async fn status_of(project: &TestProject, id: RequestId) -> RequestStatus {
    project.engine.request(id).await.unwrap().request.status
}

/// Review rows stored for `id`.
pub async fn reviews_of(project: &TestProject, id: RequestId) -> Vec<Review> {
    project.engine.request(id).await.unwrap().reviews
}
