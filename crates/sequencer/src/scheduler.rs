// Beat scheduler: the Stopped/Running state machine behind playback.
// Every call takes the current time and reads tempo and pattern fresh,
// so edits made between ticks show up on the next tick.

use std::time::{Duration, Instant};

use audio::SoundEngine;
use log::{debug, info};
use project::model::{ChannelId, TempoState, TimingKey};

use crate::pattern::PatternStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Stopped,
    Running,
}

/// Position of the slot that played last
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlaybackCursor {
    pub slot: usize,
    pub beat: usize,
    pub subdivision: usize,
}

impl PlaybackCursor {
    pub fn at(slot: usize, subdivision: u32) -> Self {
        let per_beat = subdivision.max(1) as usize;
        Self {
            slot,
            beat: slot / per_beat,
            subdivision: slot % per_beat,
        }
    }
}

/// Outcome of one tick: where the cursor is and which channel sounded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    pub cursor: PlaybackCursor,
    pub channel: Option<ChannelId>,
}

#[derive(Debug, Clone, Copy)]
struct RepeatingTimer {
    interval: Duration,
    next_fire: Instant,
}

pub struct BeatScheduler {
    state: SchedulerState,
    next_slot: usize,
    cursor: PlaybackCursor,
    timer: Option<RepeatingTimer>,
    timing: Option<TimingKey>,
}

impl Default for BeatScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl BeatScheduler {
    pub fn new() -> Self {
        Self {
            state: SchedulerState::Stopped,
            next_slot: 0,
            cursor: PlaybackCursor::default(),
            timer: None,
            timing: None,
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == SchedulerState::Running
    }

    pub fn cursor(&self) -> PlaybackCursor {
        self.cursor
    }

    /// Index of the slot the next tick will evaluate
    pub fn next_slot(&self) -> usize {
        self.next_slot
    }

    /// When the armed timer fires next, `None` while stopped
    pub fn next_deadline(&self) -> Option<Instant> {
        self.timer.map(|t| t.next_fire)
    }

    pub fn tick_interval(&self) -> Option<Duration> {
        self.timer.map(|t| t.interval)
    }

    /// Stopped -> Running. Tick 0 fires before this returns.
    pub fn start(
        &mut self,
        now: Instant,
        tempo: &TempoState,
        patterns: &PatternStore,
        engine: &mut dyn SoundEngine,
    ) -> Option<TickReport> {
        if self.is_running() {
            return None;
        }
        self.state = SchedulerState::Running;
        info!(
            "Scheduler started at {} BPM x{} ({}%), {:.1}ms per tick",
            tempo.bpm(),
            tempo.subdivision(),
            tempo.speed_percentage(),
            tempo.tick_interval_ms()
        );
        Some(self.arm(now, tempo, patterns, engine))
    }

    /// Running -> Stopped. Returns false when already stopped.
    pub fn stop(&mut self) -> bool {
        if !self.is_running() {
            return false;
        }
        self.timer = None;
        self.timing = None;
        self.state = SchedulerState::Stopped;
        self.next_slot = 0;
        self.cursor = PlaybackCursor::default();
        info!("Scheduler stopped");
        true
    }

    /// Call after any tempo edit. Re-arms (tick now, then repeat) only when
    /// bpm, subdivision or speed changed; anything else is picked up by the
    /// next regular tick. A measure that shrank past the cursor sends the
    /// next tick to slot 0.
    pub fn reconfigure(
        &mut self,
        now: Instant,
        tempo: &TempoState,
        patterns: &PatternStore,
        engine: &mut dyn SoundEngine,
    ) -> Option<TickReport> {
        if !self.is_running() {
            return None;
        }
        if self.timing == Some(tempo.timing()) {
            self.fit_measure(tempo.slot_count());
            return None;
        }
        debug!("Timing changed, re-arming at {:.1}ms per tick", tempo.tick_interval_ms());
        Some(self.arm(now, tempo, patterns, engine))
    }

    /// Fire the timer if it is due. A poll that is more than one interval
    /// late fires once and re-phases from `now` instead of bursting.
    pub fn poll(
        &mut self,
        now: Instant,
        tempo: &TempoState,
        patterns: &PatternStore,
        engine: &mut dyn SoundEngine,
    ) -> Option<TickReport> {
        let timer = self.timer.as_mut()?;
        if now < timer.next_fire {
            return None;
        }

        timer.next_fire += timer.interval;
        if timer.next_fire <= now {
            debug!("Scheduler fell behind, skipping ahead");
            timer.next_fire = now + timer.interval;
        }
        Some(self.tick(tempo, patterns, engine))
    }

    // A shorter measure can strand the cursor past its end; the next tick
    // then starts on the downbeat
    fn fit_measure(&mut self, slots: usize) {
        if self.cursor.slot >= slots {
            self.cursor = PlaybackCursor::default();
        }
        if self.next_slot >= slots {
            self.next_slot = 0;
        }
    }

    // Cancel whatever timer is armed, reset the cursor, tick, arm again
    fn arm(
        &mut self,
        now: Instant,
        tempo: &TempoState,
        patterns: &PatternStore,
        engine: &mut dyn SoundEngine,
    ) -> TickReport {
        self.timer = None;
        self.next_slot = 0;
        self.cursor = PlaybackCursor::default();
        self.timing = Some(tempo.timing());

        let report = self.tick(tempo, patterns, engine);
        let interval = tempo.tick_interval();
        self.timer = Some(RepeatingTimer {
            interval,
            next_fire: now + interval,
        });
        report
    }

    fn tick(&mut self, tempo: &TempoState, patterns: &PatternStore, engine: &mut dyn SoundEngine) -> TickReport {
        let slots = tempo.slot_count().max(1);
        let slot = self.next_slot % slots;
        let winner = patterns.resolve(slot).map(|c| (c.id, c.sound));

        // Cursor shows the slot being played, not the one after it
        self.cursor = PlaybackCursor::at(slot, tempo.subdivision());
        if let Some((id, sound)) = winner {
            debug!("Slot {} plays channel {}", slot, id);
            engine.trigger(&sound);
        }
        self.next_slot = (slot + 1) % slots;

        TickReport {
            cursor: self.cursor,
            channel: winner.map(|(id, _)| id),
        }
    }
}
