//! SLB Storage - the per-project SQLite ledger.
//!
//! The ledger is the single source of truth shared by every `slb` process:
//! sessions and their keys, requests, reviews, rate-limit admissions and the
//! audit trail. Access goes through [`Ledger::write`] / [`Ledger::read`], which
//! hand a [`LedgerTx`] to a closure and commit when it returns `Ok`.
//!
//! # Example
//!
//! ```
//! use slb_storage::Ledger;
//! use slb_core::{SessionId, Timestamp};
//!
//! let ledger = Ledger::open_in_memory()?;
//! let session = SessionId::new();
//! ledger.write(|tx| tx.record_admission(&session, Timestamp::now()))?;
//! let n = ledger.read(|tx| tx.admissions_since(&session, Timestamp::now().minus_secs(60)))?;
//! assert_eq!(n, 1);
//! # Ok::<(), slb_storage::StorageError>(())
//! ```

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

mod audit;
mod error;
mod ledger;
mod limits;
mod requests;
mod reviews;
mod sessions;

pub use audit::AuditRow;
pub use error::{StorageError, StorageResult};
pub use ledger::{Ledger, LedgerTx};
pub use requests::RequestFilter;
