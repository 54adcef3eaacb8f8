//! Subcommand handlers.

pub(crate) mod audit;
pub(crate) mod config;
pub(crate) mod escalate;
pub(crate) mod pending;
pub(crate) mod review;
pub(crate) mod rollback;
pub(crate) mod run;
pub(crate) mod session;
pub(crate) mod status;
