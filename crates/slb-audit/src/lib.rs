//! SLB Audit - hash-chained audit trail.
//!
//! This crate provides:
//! - [`AuditEntry`] / [`AuditAction`]: one record per request, review and
//!   execution transition
//! - Chain linking: each entry carries the hash of its predecessor
//! - [`AuditStorage`], implemented for ledger transactions so audit entries
//!   commit atomically with the state change they describe
//! - Chain verification and retention pruning
//!
//! # Example
//!
//! ```
//! use slb_audit::{AuditAction, AuditLog, MemoryAuditStorage};
//! use slb_core::Timestamp;
//!
//! let log = AuditLog::new(MemoryAuditStorage::new());
//! log.append(None, None, AuditAction::RateLimitsReset, Timestamp::now()).unwrap();
//!
//! let result = log.verify_chain().unwrap();
//! assert!(result.valid);
//! ```

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

mod entry;
mod error;
mod log;
mod storage;

pub use entry::{AuditAction, AuditEntry, AuditEntryId};
pub use error::{AuditError, AuditResult};
pub use log::{AuditLog, ChainIssue, ChainVerificationResult};
pub use storage::{AuditStorage, MemoryAuditStorage};
