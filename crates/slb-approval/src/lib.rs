//! SLB Approval - the command approval gate.
//!
//! An agent that wants to run a risky shell command opens a request; peer
//! sessions review it; only an approved request whose approval is still
//! fresh gets executed.
//!
//! # Components
//!
//! - [`normalize`] and [`RiskClassifier`]: map a command line to a
//!   [`RiskTier`](slb_core::RiskTier), seeing through `sudo`, `bash -c` and
//!   compound commands
//! - [`RateLimiter`]: per-session pending and per-minute caps
//! - [`RequestCreator`]: classification, admission and persistence in one
//!   transaction
//! - [`QuorumEngine`]: signed reviews, self-review rules, conflict policies
//!   and dynamic quorum
//! - [`TtlEscalator`]: request deadlines and approval expiry
//! - [`Executor`] and [`RollbackCapture`]: claim, snapshot, run, record
//! - [`ApprovalEngine`]: the async facade the CLI drives
//!
//! Components never share memory; they coordinate through the ledger, so
//! separate `slb` processes see one consistent state machine.
//!
//! # Example
//!
//! ```
//! use slb_approval::{PollDecision, poll_decision};
//! use slb_core::RequestStatus;
//!
//! assert_eq!(poll_decision(RequestStatus::Pending), PollDecision::KeepPolling);
//! assert_eq!(poll_decision(RequestStatus::Approved), PollDecision::Execute);
//! ```

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

pub mod classify;
pub mod clock;
pub mod create;
pub mod dryrun;
pub mod engine;
/// Error types and results for the decision engine.
pub mod error;
pub mod escalate;
pub mod execute;
pub mod normalize;
pub mod notify;
pub mod quorum;
pub mod ratelimit;
pub mod redact;
pub mod rollback;
pub mod session;

pub use classify::{Classification, RiskClassifier};
pub use clock::{Clock, SystemClock};
pub use create::{CreateRequest, CreateResult, RequestCreator, audit_rate_limit_denial};
pub use dryrun::{dry_run_command, shell_quote};
pub use engine::{
    ApprovalEngine, ApprovalEngineBuilder, DEFAULT_POLL_INTERVAL, ExecuteOptions, PendingQuery,
    PollDecision, PruneReport, RequestView, WaitOutcome, poll_decision,
};
pub use error::{ApprovalError, ApprovalResult, RateLimitError};
pub use escalate::{EscalationEvent, EscalationReport, TtlEscalator};
pub use execute::{Claim, ExecResult, Executor, RunOutcome, RunSpec};
pub use normalize::{NormalizedCommand, normalize};
pub use notify::{LogNotifier, NotificationEvent, Notifier, NotifyError};
pub use quorum::{
    QuorumEngine, QuorumInput, QuorumOutcome, ReviewResult, SubmitReview, decide,
    effective_min_approvals,
};
pub use ratelimit::{Admission, RateLimiter};
pub use redact::redact;
pub use rollback::{
    CaptureOutcome, GitSnapshot, RestoreReport, RollbackCapture, RollbackKind, RollbackMetadata,
};
pub use session::{RegisterSession, RegisteredSession, SessionAuthenticator};
