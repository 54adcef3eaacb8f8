//! Prelude module - commonly used types for convenient import.
//!
//! Use `use slb_audit::prelude::*;` to import all essential types.

pub use crate::{AuditError, AuditResult};

pub use crate::{AuditAction, AuditEntry, AuditEntryId};

pub use crate::{AuditLog, AuditStorage, ChainIssue, ChainVerificationResult, MemoryAuditStorage};
