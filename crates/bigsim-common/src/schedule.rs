//! Periodic schedules for cyclic handlers and controls.

use crate::SimTime;
use serde::{Deserialize, Serialize};

/// Computes when a cyclic activity runs next.
pub trait Schedule: Send + Sync {
    /// Delay after `now` until the next run. Negative means do not reschedule.
    fn next_delay(&self, now: SimTime) -> i64;

    /// Whether the activity should also run once after the simulation ends.
    fn is_finished(&self) -> bool {
        false
    }
}

/// Runs every `step` ticks in `[from, until)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodicSchedule {
    /// Period in ticks.
    pub step: i64,
    /// First run time.
    pub from: SimTime,
    /// Runs are scheduled strictly before this time.
    pub until: SimTime,
    /// Run once more in the post-simulation pass.
    #[serde(default)]
    pub at_end: bool,
}

impl PeriodicSchedule {
    /// Run every `step` ticks from time zero, forever.
    pub fn every(step: i64) -> Self {
        PeriodicSchedule {
            step,
            from: SimTime::ZERO,
            until: SimTime::MAX,
            at_end: false,
        }
    }

    /// Set the first run time.
    pub fn starting_at(mut self, from: SimTime) -> Self {
        self.from = from;
        self
    }

    /// Stop scheduling runs at or after `until`.
    pub fn until(mut self, until: SimTime) -> Self {
        self.until = until;
        self
    }

    /// Also run in the post-simulation pass.
    pub fn with_final_run(mut self) -> Self {
        self.at_end = true;
        self
    }

    /// Time of the first run, if it falls inside the window.
    pub fn first_time(&self) -> Option<SimTime> {
        (self.from < self.until).then_some(self.from)
    }
}

impl Schedule for PeriodicSchedule {
    fn next_delay(&self, now: SimTime) -> i64 {
        if self.step <= 0 {
            return -1;
        }
        match now.checked_add(self.step) {
            Some(next) if next < self.until => self.step,
            _ => -1,
        }
    }

    fn is_finished(&self) -> bool {
        self.at_end
    }
}
