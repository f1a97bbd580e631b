//! Environment abstraction for deterministic testing.
//!
//! Decouples the transport from wall-clock time. Production code sleeps the
//! calling thread; the simulation harness records delays on a virtual clock
//! so retry and polling behavior can be asserted exactly.

use std::time::Duration;

/// Source of blocking delays.
///
/// # Invariants
///
/// - `delay()` returns only after the duration elapsed (in the
///   environment's notion of time)
pub trait Environment {
    /// Block for `duration`.
    fn delay(&self, duration: Duration);
}

/// Environment backed by the operating system.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemEnv;

impl Environment for SystemEnv {
    fn delay(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}
