//! SLB Test - shared test utilities.
//!
//! Fixtures, mocks and a project harness for exercising the approval
//! engine against a real SQLite ledger in a temporary directory.
//!
//! # Usage
//!
//! ```toml
//! [dev-dependencies]
//! slb-test.workspace = true
//! ```
//!
//! ```rust,ignore
//! #[tokio::test]
//! async fn test_review_flow() {
//!     let project = TestProject::new();
//!     let requester = project.session("BlueLake").await;
//!     let reviewer = project.session("GreenCastle").await;
//!
//!     let id = project.open(&requester, "rm -rf ./build").await;
//!     let result = project.approve(&reviewer, id).await.unwrap();
//!     assert!(result.request_status_changed);
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]

pub mod prelude;

pub mod fixtures;
pub mod harness;
pub mod mocks;

pub use fixtures::*;
pub use harness::*;
pub use mocks::*;
