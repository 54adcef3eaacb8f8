//! Prelude module - commonly used types for convenient import.
//!
//! Use `use slb_test::prelude::*;` to import all essential types.

pub use crate::{ManualClock, RecordingNotifier, TestLedger, TestProject};

pub use crate::{init_test_logging, test_config};
