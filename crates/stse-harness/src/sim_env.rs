//! Virtual-time environment for deterministic testing.

use std::{
    cell::{Cell, RefCell},
    time::Duration,
};

use stse_core::Environment;

/// Environment that records delays instead of sleeping.
///
/// Time only moves when the stack asks for a delay, so retry and polling
/// behavior can be asserted exactly and tests run instantly.
///
/// # Usage
///
/// ```ignore
/// let env = SimEnv::new();
/// // ... run transfers ...
/// assert_eq!(env.delay_count(), 3);
/// ```
#[derive(Debug, Default)]
pub struct SimEnv {
    elapsed: Cell<Duration>,
    delays: RefCell<Vec<Duration>>,
}

impl SimEnv {
    /// Create an environment at virtual time zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Total virtual time spent in delays
    pub fn elapsed(&self) -> Duration {
        self.elapsed.get()
    }

    /// Every delay requested so far, in order
    pub fn delays(&self) -> Vec<Duration> {
        self.delays.borrow().clone()
    }

    /// Number of delays requested so far
    pub fn delay_count(&self) -> usize {
        self.delays.borrow().len()
    }
}

impl Environment for SimEnv {
    fn delay(&self, duration: Duration) {
        self.elapsed.set(self.elapsed.get() + duration);
        self.delays.borrow_mut().push(duration);
    }
}
