//! Layered configuration for SLB.
//!
//! A single immutable [`Config`] is produced at startup by merging, lowest
//! precedence first:
//!
//! 1. **Embedded defaults** (`defaults.toml` compiled into the binary)
//! 2. **User** (`~/.slb/config.toml`, or `$SLB_HOME/config.toml`)
//! 3. **Project** (`<project>/.slb/config.toml`, or `--config`)
//! 4. **Environment** (`SLB_*`)
//! 5. **Flags** (`--set key=value`)
//!
//! ```rust,no_run
//! use slb_config::{LoadOptions, load};
//!
//! let resolved = load(LoadOptions {
//!     project_dir: Some(".".into()),
//!     ..LoadOptions::default()
//! })
//! .unwrap();
//! println!("timeout: {}s", resolved.config.general.request_timeout);
//! ```

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

/// Environment and flag overrides.
pub mod env;
/// Configuration error types.
pub mod error;
/// Configuration file discovery and loading.
pub mod loader;
/// Layered merging with source tracking.
pub mod merge;
/// Configuration struct definitions.
pub mod types;
/// Configuration validation rules.
pub mod validate;

pub use error::{ConfigError, ConfigResult};
pub use loader::{LoadOptions, ResolvedConfig, load, load_file};
pub use merge::{ConfigLayer, FieldSources};
pub use types::*;
