//! Logical time server shared by every replica of a simulation.
//!
//! Time only moves when the driving process calls [`LogicalClock::tick`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::{Error, Result};

/// Shared, explicitly advanced logical clock
#[derive(Debug, Clone)]
pub struct LogicalClock {
    time: Arc<AtomicU64>,
    step: u64,
}

impl LogicalClock {
    /// Create a clock starting at `start_time` and advancing by `step`
    pub fn new(start_time: u64, step: u64) -> Result<Self> {
        if start_time < 1 {
            return Err(Error::Validation("start time must be > 0".to_string()));
        }
        if step < 1 {
            return Err(Error::Validation("step must be > 0".to_string()));
        }

        Ok(Self {
            time: Arc::new(AtomicU64::new(start_time)),
            step,
        })
    }

    pub fn now(&self) -> u64 {
        self.time.load(Ordering::SeqCst)
    }

    pub fn step(&self) -> u64 {
        self.step
    }

    /// Advance by one step, returning the new time
    pub fn tick(&self) -> u64 {
        self.time.fetch_add(self.step, Ordering::SeqCst) + self.step
    }

    /// Advance by `multiplier` steps
    pub fn tick_by(&self, multiplier: u64) -> Result<u64> {
        if multiplier < 1 {
            return Err(Error::Validation("multiplier must be > 0".to_string()));
        }
        let delta = self.step.saturating_mul(multiplier);
        Ok(self.time.fetch_add(delta, Ordering::SeqCst) + delta)
    }
}

impl Default for LogicalClock {
    fn default() -> Self {
        Self {
            time: Arc::new(AtomicU64::new(1)),
            step: 1,
        }
    }
}
