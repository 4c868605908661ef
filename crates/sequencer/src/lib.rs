// sequencer module

pub mod pattern;
pub mod scheduler;
pub mod timer;

#[cfg(any(test, feature = "test-util"))]
mod manual_clock;

use std::time::Instant;

pub use pattern::{ChannelRecord, PatternError, PatternStore};
pub use scheduler::{BeatScheduler, PlaybackCursor, SchedulerState, TickReport};
pub use timer::{SessionTimer, TimerDisplay, TimerMode, TimerOutcome, TIMER_STEP};

#[cfg(any(test, feature = "test-util"))]
pub use manual_clock::ManualClock;

/// Source of the current time for the scheduler and the session timer
pub trait Clock: Send {
    fn now(&self) -> Instant;
}

/// The real monotonic clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}
