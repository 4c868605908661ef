// App state for the metronome: one facade over tempo, pattern, scheduler,
// session timer and sound engine. Every UI command goes through here.

pub mod runner;

use std::sync::Arc;
use std::time::Instant;

use audio::SoundEngine;
use events::{EventBus, MetronomeEvent, SharedEventBus};
use log::{debug, info, warn};
use project::model::{ChannelId, Snapshot, SoundParam, SoundParameters, TempoState};
use project::{PersistenceError, PresetLibrary, Settings, SettingsStore};
use sequencer::{
    BeatScheduler, ChannelRecord, Clock, PatternStore, PlaybackCursor, SessionTimer, SystemClock, TickReport,
    TimerDisplay, TimerOutcome,
};

pub use runner::{Command, MetronomeRunner, MetronomeStatus};

pub struct Metronome {
    tempo: TempoState,
    patterns: PatternStore,
    scheduler: BeatScheduler,
    timer: SessionTimer,
    engine: Box<dyn SoundEngine>,
    events: SharedEventBus,
    clock: Box<dyn Clock>,
}

impl Metronome {
    /// Default state: 120 BPM, 4/4, main channel on every beat
    pub fn new(engine: Box<dyn SoundEngine>) -> Self {
        Self::from_settings(Settings::default(), engine)
    }

    /// Restore from persisted settings
    pub fn from_settings(settings: Settings, mut engine: Box<dyn SoundEngine>) -> Self {
        let snapshot = settings.snapshot.normalized();
        engine.set_master_volume(settings.master_volume);
        if !engine.is_available() {
            warn!("Audio output unavailable, clicks will be silent");
        }

        Self {
            tempo: snapshot.tempo,
            patterns: PatternStore::from_channels(snapshot.tempo.slot_count(), &snapshot.channels),
            scheduler: BeatScheduler::new(),
            timer: SessionTimer::new(settings.timeout_minutes),
            engine,
            events: Arc::new(EventBus::new()),
            clock: Box::new(SystemClock),
        }
    }

    pub fn with_event_bus(mut self, events: SharedEventBus) -> Self {
        self.events = events;
        self
    }

    pub fn with_clock(mut self, clock: Box<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn events(&self) -> SharedEventBus {
        Arc::clone(&self.events)
    }

    // ---- Playback ----

    pub fn start(&mut self) {
        if self.scheduler.is_running() {
            return;
        }
        let now = self.clock.now();
        let tick = self.scheduler.start(now, &self.tempo, &self.patterns, self.engine.as_mut());
        self.timer.on_start(now);
        self.events.emit(MetronomeEvent::PlaybackStateChanged(true));
        self.report(tick);
    }

    pub fn stop(&mut self) {
        if !self.scheduler.stop() {
            return;
        }
        self.timer.on_stop(self.clock.now());
        self.events.emit(MetronomeEvent::PlaybackStateChanged(false));
    }

    pub fn toggle_playback(&mut self) {
        if self.scheduler.is_running() {
            self.stop();
        } else {
            self.start();
        }
    }

    /// Fire every scheduler tick and timer step that is due, earliest first
    pub fn advance(&mut self) {
        let now = self.clock.now();
        loop {
            let beat = self.scheduler.next_deadline().filter(|d| *d <= now);
            let step = self.timer.next_deadline().filter(|d| *d <= now);
            match (beat, step) {
                (None, None) => break,
                (Some(b), Some(s)) if s < b => self.step_timer(now),
                (Some(_), _) => {
                    let tick = self.scheduler.poll(now, &self.tempo, &self.patterns, self.engine.as_mut());
                    self.report(tick);
                }
                (None, Some(_)) => self.step_timer(now),
            }
        }
    }

    fn step_timer(&mut self, now: Instant) {
        if self.timer.poll(now) == TimerOutcome::Expired {
            info!("Session time is up, stopping playback");
            self.events.emit(MetronomeEvent::TimerExpired);
            self.stop();
        }
    }

    /// Earliest pending scheduler or timer deadline
    pub fn next_deadline(&self) -> Option<Instant> {
        match (self.scheduler.next_deadline(), self.timer.next_deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    fn report(&self, tick: Option<TickReport>) {
        if let Some(tick) = tick {
            self.events.emit(MetronomeEvent::SlotPlayed {
                slot: tick.cursor.slot,
                beat: tick.cursor.beat,
                subdivision: tick.cursor.subdivision,
                channel: tick.channel.map(|c| c.0),
            });
        }
    }

    // ---- Tempo ----

    // Apply a tempo edit, fit the pattern to the new measure and re-arm the
    // scheduler when the tick interval changed
    fn edit_tempo<F>(&mut self, edit: F) -> u32
    where
        F: FnOnce(&mut TempoState) -> u32,
    {
        let before = self.tempo;
        let value = edit(&mut self.tempo);
        if self.tempo == before {
            return value;
        }

        let slots = self.tempo.slot_count();
        if slots != self.patterns.len() {
            self.patterns.resize(slots);
            self.events.emit(MetronomeEvent::PatternChanged);
        }
        self.events.emit(MetronomeEvent::TempoChanged {
            bpm: self.tempo.bpm(),
            subdivision: self.tempo.subdivision(),
            beats_per_measure: self.tempo.beats_per_measure(),
            speed_percentage: self.tempo.speed_percentage(),
        });

        let now = self.clock.now();
        let tick = self
            .scheduler
            .reconfigure(now, &self.tempo, &self.patterns, self.engine.as_mut());
        self.report(tick);
        value
    }

    pub fn set_bpm(&mut self, bpm: i32) -> u32 {
        self.edit_tempo(|t| t.set_bpm(bpm))
    }

    pub fn adjust_bpm(&mut self, delta: i32) -> u32 {
        self.edit_tempo(|t| t.adjust_bpm(delta))
    }

    pub fn set_subdivision(&mut self, subdivision: i32) -> u32 {
        self.edit_tempo(|t| t.set_subdivision(subdivision))
    }

    pub fn adjust_subdivision(&mut self, delta: i32) -> u32 {
        self.edit_tempo(|t| t.adjust_subdivision(delta))
    }

    pub fn set_beats_per_measure(&mut self, beats: i32) -> u32 {
        self.edit_tempo(|t| t.set_beats_per_measure(beats))
    }

    pub fn adjust_beats_per_measure(&mut self, delta: i32) -> u32 {
        self.edit_tempo(|t| t.adjust_beats_per_measure(delta))
    }

    pub fn set_speed_percentage(&mut self, speed: i32) -> u32 {
        self.edit_tempo(|t| t.set_speed_percentage(speed))
    }

    // ---- Pattern and sounds ----

    /// Flip a slot, returning its new value. Unknown channels and
    /// out-of-range slots are logged and ignored.
    pub fn toggle(&mut self, channel: ChannelId, index: usize) -> Option<bool> {
        match self.patterns.toggle(channel, index, self.engine.as_mut()) {
            Ok(on) => {
                self.events.emit(MetronomeEvent::PatternChanged);
                Some(on)
            }
            Err(e) => {
                warn!("Ignoring toggle: {}", e);
                None
            }
        }
    }

    pub fn add_channel(&mut self) -> ChannelId {
        let id = self.patterns.add_channel();
        info!("Channel {} added", id);
        self.events.emit(MetronomeEvent::PatternChanged);
        id
    }

    pub fn remove_channel(&mut self, channel: ChannelId) -> bool {
        match self.patterns.remove_channel(channel) {
            Ok(_) => {
                info!("Channel {} removed", channel);
                self.events.emit(MetronomeEvent::PatternChanged);
                true
            }
            Err(e) => {
                warn!("Ignoring channel removal: {}", e);
                false
            }
        }
    }

    /// Change one sound field; the value is clamped to its range
    pub fn update_sound_param(&mut self, channel: ChannelId, param: SoundParam) -> Option<SoundParameters> {
        match self.patterns.update_sound(channel, param) {
            Ok(sound) => {
                debug!("Channel {} sound now {:?}", channel, sound);
                self.events.emit(MetronomeEvent::SoundChanged(channel.0));
                Some(sound)
            }
            Err(e) => {
                warn!("Ignoring sound update: {}", e);
                None
            }
        }
    }

    /// Play a channel's click once, whether or not playback is running
    pub fn preview(&mut self, channel: ChannelId) {
        let sound = self.patterns.sound(channel);
        self.engine.trigger(&sound);
    }

    pub fn set_master_volume(&mut self, volume: f32) -> f32 {
        self.engine.set_master_volume(volume);
        self.engine.master_volume()
    }

    // ---- Session timer ----

    /// `None` or `Some(0)` switches to elapsed mode
    pub fn set_timeout_minutes(&mut self, minutes: Option<u32>) {
        let now = self.clock.now();
        self.timer.set_timeout_minutes(minutes, now);
    }

    pub fn reset_timer(&mut self) {
        let now = self.clock.now();
        self.timer.reset(now);
    }

    // ---- Presets ----

    /// Replace tempo, pattern and sounds in one step. Playback, if running,
    /// restarts from slot 0 with the new state.
    pub fn apply_preset(&mut self, snapshot: Snapshot) {
        let snapshot = snapshot.normalized();
        self.tempo = snapshot.tempo;
        self.patterns = PatternStore::from_channels(self.tempo.slot_count(), &snapshot.channels);
        info!(
            "Applied preset: {} BPM, {} channels",
            self.tempo.bpm(),
            self.patterns.channels().len()
        );

        if self.scheduler.is_running() {
            let now = self.clock.now();
            self.scheduler.stop();
            let tick = self.scheduler.start(now, &self.tempo, &self.patterns, self.engine.as_mut());
            self.report(tick);
        }
        self.events.emit(MetronomeEvent::TempoChanged {
            bpm: self.tempo.bpm(),
            subdivision: self.tempo.subdivision(),
            beats_per_measure: self.tempo.beats_per_measure(),
            speed_percentage: self.tempo.speed_percentage(),
        });
        self.events.emit(MetronomeEvent::PatternChanged);
    }

    /// Deep copy of tempo, pattern and sounds
    pub fn capture_snapshot(&self) -> Snapshot {
        Snapshot {
            tempo: self.tempo,
            channels: self.patterns.to_channel_states(),
        }
    }

    pub fn save_preset(&self, library: &PresetLibrary, name: &str) -> Result<(), PersistenceError> {
        let path = library.save(name, &self.capture_snapshot())?;
        info!("Preset '{}' saved to {}", name, path.display());
        Ok(())
    }

    pub fn load_preset(&mut self, library: &PresetLibrary, name: &str) -> Result<(), PersistenceError> {
        let preset = library.load(name)?;
        self.apply_preset(preset.snapshot);
        Ok(())
    }

    // ---- Settings ----

    pub fn settings(&self) -> Settings {
        Settings {
            snapshot: self.capture_snapshot(),
            timeout_minutes: self.timer.timeout_minutes(),
            master_volume: self.engine.master_volume(),
        }
    }

    pub fn save_settings(&self, store: &mut SettingsStore) -> Result<(), PersistenceError> {
        store.store_settings(&self.settings())?;
        store.save()
    }

    // ---- Read back ----

    pub fn tempo(&self) -> TempoState {
        self.tempo
    }

    pub fn cursor(&self) -> PlaybackCursor {
        self.scheduler.cursor()
    }

    pub fn is_running(&self) -> bool {
        self.scheduler.is_running()
    }

    pub fn timer_display(&self) -> TimerDisplay {
        self.timer.display()
    }

    pub fn timeout_minutes(&self) -> Option<u32> {
        self.timer.timeout_minutes()
    }

    pub fn countdown_ms(&self) -> Option<u64> {
        self.timer.countdown_ms()
    }

    pub fn channels(&self) -> &[ChannelRecord] {
        self.patterns.channels()
    }

    pub fn sound(&self, channel: ChannelId) -> SoundParameters {
        self.patterns.sound(channel)
    }

    pub fn master_volume(&self) -> f32 {
        self.engine.master_volume()
    }

    pub fn audio_available(&self) -> bool {
        self.engine.is_available()
    }

    /// Run one UI command
    pub fn apply(&mut self, command: Command) {
        match command {
            Command::Start => self.start(),
            Command::Stop => self.stop(),
            Command::TogglePlayback => self.toggle_playback(),
            Command::SetBpm(bpm) => {
                self.set_bpm(bpm);
            }
            Command::AdjustBpm(delta) => {
                self.adjust_bpm(delta);
            }
            Command::SetSubdivision(n) => {
                self.set_subdivision(n);
            }
            Command::AdjustSubdivision(delta) => {
                self.adjust_subdivision(delta);
            }
            Command::SetBeatsPerMeasure(n) => {
                self.set_beats_per_measure(n);
            }
            Command::AdjustBeatsPerMeasure(delta) => {
                self.adjust_beats_per_measure(delta);
            }
            Command::SetSpeedPercentage(n) => {
                self.set_speed_percentage(n);
            }
            Command::Toggle { channel, index } => {
                self.toggle(channel, index);
            }
            Command::AddChannel => {
                self.add_channel();
            }
            Command::RemoveChannel(channel) => {
                self.remove_channel(channel);
            }
            Command::UpdateSound { channel, param } => {
                self.update_sound_param(channel, param);
            }
            Command::Preview(channel) => self.preview(channel),
            Command::SetTimeoutMinutes(minutes) => self.set_timeout_minutes(minutes),
            Command::ResetTimer => self.reset_timer(),
            Command::SetMasterVolume(volume) => {
                self.set_master_volume(volume);
            }
            Command::ApplyPreset(snapshot) => self.apply_preset(snapshot),
            Command::Quit => self.stop(),
        }
    }
}

impl Drop for Metronome {
    fn drop(&mut self) {
        if self.scheduler.is_running() {
            debug!("Metronome dropped while running, stopping");
            self.stop();
        }
    }
}

#[cfg(test)]
mod tests;
