//! Time source for the engine.

use slb_core::Timestamp;

/// Supplies "now" to every deadline computation.
///
/// Production code uses [`SystemClock`]; tests drive a manual clock so that
/// timeouts and TTLs can be crossed without sleeping.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Current time.
    fn now(&self) -> Timestamp;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Timestamp::now()
    }
}
