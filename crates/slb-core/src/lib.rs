//! SLB Core - foundation types for the SLB command-approval gatekeeper.
//!
//! This crate provides:
//! - Identifier newtypes ([`SessionId`], [`RequestId`], [`ReviewId`]) and [`Timestamp`]
//! - The closed vocabularies: [`RiskTier`], [`RequestStatus`], [`Decision`] and
//!   the policy enums
//! - Ledger records ([`Session`], [`Request`], [`Review`])
//! - Directory layout for user and project state

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

pub mod dirs;
pub mod enums;
pub mod error;
pub mod model;
pub mod types;

pub use dirs::{ProjectDir, SlbHome};
pub use enums::{
    ConflictResolution, Decision, RateLimitAction, RequestStatus, RiskTier, TimeoutAction,
};
pub use error::{CoreError, CoreResult};
pub use model::{ExecutionRecord, Justification, Request, Review, Session};
pub use types::{RequestId, ReviewId, SessionId, Timestamp};
