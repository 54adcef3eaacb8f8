//! Prelude module - commonly used types for convenient import.
//!
//! Use `use slb_storage::prelude::*;` to import all essential types.

pub use crate::{AuditRow, Ledger, LedgerTx, RequestFilter, StorageError, StorageResult};
