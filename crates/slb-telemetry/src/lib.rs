//! SLB Telemetry - logging setup for the `slb` binary.
//!
//! # Example
//!
//! ```rust,no_run
//! use slb_telemetry::{LogConfig, LogFormat, setup_logging};
//!
//! # fn main() -> Result<(), slb_telemetry::TelemetryError> {
//! let config = LogConfig::new("debug")
//!     .with_format(LogFormat::Compact)
//!     .with_directive("slb_storage=trace");
//! setup_logging(&config)?;
//! tracing::info!("ready");
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]

pub mod prelude;

mod error;
mod logging;

pub use error::{TelemetryError, TelemetryResult};
pub use logging::{LogConfig, LogFormat, LogTarget, setup_logging};
