//! Cycle and wall-clock budget checks for the cycle controller.

use std::time::Duration;

use crate::core::types::{LoopState, LoopStop};

/// Limits evaluated between cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleBudget {
    pub max_cycles: u32,
    pub max_elapsed: Duration,
}

impl CycleBudget {
    /// Decide whether another cycle may start.
    ///
    /// Time is checked before the cycle count, so a run that exhausts both
    /// reports [`LoopStop::TimeBudgetExhausted`].
    pub fn stop_reason(&self, state: &LoopState, elapsed: Duration) -> Option<LoopStop> {
        if elapsed >= self.max_elapsed {
            return Some(LoopStop::TimeBudgetExhausted);
        }
        if state.cycles_completed >= self.max_cycles {
            return Some(LoopStop::CycleBudgetExhausted);
        }
        None
    }
}

/// Whole minutes, rounded to the nearest minute, for summaries.
pub fn elapsed_minutes(elapsed: Duration) -> u64 {
    (elapsed.as_secs() + 30) / 60
}
