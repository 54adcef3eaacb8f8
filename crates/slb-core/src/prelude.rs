//! Prelude module - commonly used types for convenient import.
//!
//! Use `use slb_core::prelude::*;` to import all essential types.

pub use crate::{CoreError, CoreResult};

pub use crate::{
    ConflictResolution, Decision, RateLimitAction, RequestStatus, RiskTier, TimeoutAction,
};

pub use crate::{ExecutionRecord, Justification, Request, Review, Session};

pub use crate::{RequestId, ReviewId, SessionId, Timestamp};

pub use crate::{ProjectDir, SlbHome};
