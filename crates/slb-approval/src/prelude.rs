//! Prelude module - commonly used types for convenient import.
//!
//! Use `use slb_approval::prelude::*;` to import all essential types.

pub use crate::{ApprovalError, ApprovalResult, RateLimitError};

pub use crate::{
    ApprovalEngine, ExecuteOptions, PendingQuery, PollDecision, RequestView, WaitOutcome,
    poll_decision,
};

pub use crate::{CreateRequest, CreateResult, RegisterSession, RegisteredSession, SubmitReview};

pub use crate::{Clock, LogNotifier, NotificationEvent, Notifier, SystemClock};

pub use crate::{ExecResult, ReviewResult, RollbackCapture};
