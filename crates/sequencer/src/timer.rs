// Session timer: counts down a practice timeout, or counts up the time
// spent playing when no timeout is set. Steps once per second.

use std::fmt;
use std::time::{Duration, Instant};

use log::{debug, info};

pub const TIMER_STEP: Duration = Duration::from_millis(1000);

const STEP_MS: u64 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerMode {
    Countdown,
    Elapsed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerOutcome {
    Idle,
    Stepped,
    /// The countdown hit zero; the caller stops playback
    Expired,
}

/// What the timer shows. Formats as `mm:ss`, or `h:mm:ss` past an hour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerDisplay {
    Countdown(Duration),
    Elapsed(Duration),
}

impl TimerDisplay {
    pub fn duration(&self) -> Duration {
        match self {
            TimerDisplay::Countdown(d) | TimerDisplay::Elapsed(d) => *d,
        }
    }
}

impl fmt::Display for TimerDisplay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let total = self.duration().as_secs();
        let (hours, minutes, seconds) = (total / 3600, (total / 60) % 60, total % 60);
        if hours > 0 {
            write!(f, "{}:{:02}:{:02}", hours, minutes, seconds)
        } else {
            write!(f, "{:02}:{:02}", minutes, seconds)
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionTimer {
    timeout_minutes: Option<u32>,
    // None once expired, until the next start
    countdown_ms: Option<u64>,
    accumulated: Duration,
    elapsed: Duration,
    run_started: Option<Instant>,
    next_step: Option<Instant>,
}

fn minutes_to_ms(minutes: u32) -> u64 {
    minutes as u64 * 60 * STEP_MS
}

impl SessionTimer {
    /// `Some(n)` with n > 0 selects countdown mode
    pub fn new(timeout_minutes: Option<u32>) -> Self {
        let timeout_minutes = timeout_minutes.filter(|&m| m > 0);
        Self {
            timeout_minutes,
            countdown_ms: timeout_minutes.map(minutes_to_ms),
            accumulated: Duration::ZERO,
            elapsed: Duration::ZERO,
            run_started: None,
            next_step: None,
        }
    }

    pub fn mode(&self) -> TimerMode {
        if self.timeout_minutes.is_some() {
            TimerMode::Countdown
        } else {
            TimerMode::Elapsed
        }
    }

    pub fn timeout_minutes(&self) -> Option<u32> {
        self.timeout_minutes
    }

    pub fn countdown_ms(&self) -> Option<u64> {
        self.countdown_ms
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    pub fn is_active(&self) -> bool {
        self.next_step.is_some()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.next_step
    }

    /// Playback started. An expired countdown starts over from the timeout;
    /// one that was paused by a manual stop resumes where it was.
    pub fn on_start(&mut self, now: Instant) {
        match self.timeout_minutes {
            Some(minutes) => {
                if self.countdown_ms.is_none() {
                    self.countdown_ms = Some(minutes_to_ms(minutes));
                }
            }
            None => self.run_started = Some(now),
        }
        self.next_step = Some(now + TIMER_STEP);
    }

    /// Playback stopped. Banks the running time; the countdown keeps its value.
    pub fn on_stop(&mut self, now: Instant) {
        if let Some(started) = self.run_started.take() {
            self.accumulated += now.saturating_duration_since(started);
            self.elapsed = self.accumulated;
        }
        self.next_step = None;
    }

    /// Switch modes or change the timeout. While running the step interval
    /// is re-armed from `now`.
    pub fn set_timeout_minutes(&mut self, minutes: Option<u32>, now: Instant) {
        let minutes = minutes.filter(|&m| m > 0);
        let running = self.is_active();
        if running {
            self.on_stop(now);
        }

        self.timeout_minutes = minutes;
        self.countdown_ms = minutes.map(minutes_to_ms);
        match minutes {
            Some(m) => info!("Session timeout set to {} minutes", m),
            None => info!("Session timeout cleared, counting elapsed time"),
        }

        if running {
            self.on_start(now);
        }
    }

    /// Zero the elapsed count and restore the full countdown
    pub fn reset(&mut self, now: Instant) {
        self.accumulated = Duration::ZERO;
        self.elapsed = Duration::ZERO;
        if self.run_started.is_some() {
            self.run_started = Some(now);
        }
        self.countdown_ms = self.timeout_minutes.map(minutes_to_ms);
        debug!("Session timer reset");
    }

    /// Run every step that is due by `now`
    pub fn poll(&mut self, now: Instant) -> TimerOutcome {
        let mut outcome = TimerOutcome::Idle;
        while let Some(due) = self.next_step {
            if now < due {
                break;
            }
            outcome = TimerOutcome::Stepped;

            match self.timeout_minutes {
                Some(_) => {
                    let remaining = self.countdown_ms.unwrap_or(0).saturating_sub(STEP_MS);
                    if remaining == 0 {
                        self.countdown_ms = None;
                        self.next_step = None;
                        info!("Session countdown expired");
                        return TimerOutcome::Expired;
                    }
                    self.countdown_ms = Some(remaining);
                    self.next_step = Some(due + TIMER_STEP);
                }
                None => {
                    // Elapsed time comes from the wall clock, so a late
                    // poll catches up in one step
                    if let Some(started) = self.run_started {
                        self.elapsed = self.accumulated + now.saturating_duration_since(started);
                    }
                    let mut next = due + TIMER_STEP;
                    while next <= now {
                        next += TIMER_STEP;
                    }
                    self.next_step = Some(next);
                }
            }
        }
        outcome
    }

    pub fn display(&self) -> TimerDisplay {
        match self.timeout_minutes {
            Some(minutes) => {
                let ms = self.countdown_ms.unwrap_or_else(|| minutes_to_ms(minutes));
                TimerDisplay::Countdown(Duration::from_millis(ms))
            }
            None => TimerDisplay::Elapsed(self.elapsed),
        }
    }
}
