use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use audio::{RecordingEngine, SoundEngine};
use events::{EventBus, MetronomeEvent, RunningSignal};
use project::model::{ChannelId, FilterType, Snapshot, SoundParam, SoundParameters, TempoState};
use project::{PresetLibrary, Settings, SettingsStore};
use sequencer::{Clock, ManualClock, PlaybackCursor, TimerDisplay};
use tempfile::tempdir;

use crate::{Command, Metronome, MetronomeRunner};

struct Harness {
    metronome: Metronome,
    engine: RecordingEngine,
    clock: ManualClock,
    events: Arc<Mutex<Vec<MetronomeEvent>>>,
}

impl Harness {
    fn new() -> Self {
        Self::with_settings(Settings::default())
    }

    fn with_settings(settings: Settings) -> Self {
        let engine = RecordingEngine::new();
        let clock = ManualClock::new();
        let events = Arc::new(Mutex::new(Vec::new()));

        let bus = Arc::new(EventBus::new());
        let log = Arc::clone(&events);
        bus.subscribe(move |event| log.lock().unwrap().push(event.clone()));

        let metronome = Metronome::from_settings(settings, Box::new(engine.clone()))
            .with_event_bus(bus)
            .with_clock(Box::new(clock.clone()));
        Self {
            metronome,
            engine,
            clock,
            events,
        }
    }

    // Move the clock forward and let the metronome catch up
    fn step(&mut self, by: Duration) {
        self.clock.advance(by);
        self.metronome.advance();
    }

    fn slots_played(&self) -> Vec<usize> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| match e {
                MetronomeEvent::SlotPlayed { slot, .. } => Some(*slot),
                _ => None,
            })
            .collect()
    }

    fn saw(&self, event: &MetronomeEvent) -> bool {
        self.events.lock().unwrap().contains(event)
    }
}

#[test]
fn test_default_state() {
    let h = Harness::new();
    let m = &h.metronome;
    assert_eq!(m.tempo(), TempoState::default());
    assert!(!m.is_running());
    assert_eq!(m.channels().len(), 2);
    assert_eq!(m.channels()[0].row, vec![true; 4]);
    assert_eq!(m.channels()[1].row, vec![false; 4]);
    assert_eq!(m.master_volume(), 0.5);
    assert_eq!(m.timer_display(), TimerDisplay::Elapsed(Duration::ZERO));
}

#[test]
fn test_quarter_notes_at_120() {
    let mut h = Harness::new();
    h.metronome.start();
    assert_eq!(h.engine.count(), 1);

    for _ in 0..4 {
        h.step(Duration::from_millis(500));
    }
    assert_eq!(h.slots_played(), vec![0, 1, 2, 3, 0]);
    let main = SoundParameters::for_channel(ChannelId::MAIN);
    assert!(h.engine.triggers().iter().all(|s| *s == main));
    assert_eq!(h.metronome.cursor().slot, 0);
}

#[test]
fn test_start_emits_running_then_first_slot() {
    let mut h = Harness::new();
    h.metronome.start();
    let events = h.events.lock().unwrap().clone();
    assert_eq!(events[0], MetronomeEvent::PlaybackStateChanged(true));
    assert!(matches!(events[1], MetronomeEvent::SlotPlayed { slot: 0, channel: Some(0), .. }));
}

#[test]
fn test_running_signal_follows_playback() {
    let mut h = Harness::new();
    let signal = RunningSignal::attach(&h.metronome.events());
    h.metronome.toggle_playback();
    assert!(signal.is_running());
    h.metronome.toggle_playback();
    assert!(!signal.is_running());
    assert!(h.saw(&MetronomeEvent::PlaybackStateChanged(false)));
}

#[test]
fn test_stop_silences_future_ticks() {
    let mut h = Harness::new();
    h.metronome.start();
    h.step(Duration::from_millis(500));
    h.metronome.stop();
    let count = h.engine.count();

    h.step(Duration::from_secs(5));
    assert_eq!(h.engine.count(), count);
    assert_eq!(h.metronome.cursor(), PlaybackCursor::default());
    assert!(h.metronome.next_deadline().is_none());
}

#[test]
fn test_bpm_is_clamped() {
    let mut h = Harness::new();
    assert_eq!(h.metronome.set_bpm(300), 220);
    assert_eq!(h.metronome.set_bpm(10), 40);
    assert_eq!(h.metronome.adjust_bpm(-1), 40);
    assert_eq!(h.metronome.set_speed_percentage(500), 200);
    assert_eq!(h.metronome.adjust_subdivision(-3), 1);
}

#[test]
fn test_tempo_change_while_running_restarts_measure() {
    let mut h = Harness::new();
    h.metronome.start();
    h.step(Duration::from_millis(500));
    h.step(Duration::from_millis(500));
    assert_eq!(h.metronome.cursor().slot, 2);

    h.metronome.set_bpm(60);
    assert_eq!(h.metronome.cursor().slot, 0);
    assert_eq!(h.slots_played(), vec![0, 1, 2, 0]);

    // Next tick is a full new interval away
    h.step(Duration::from_millis(999));
    assert_eq!(h.slots_played().len(), 4);
    h.step(Duration::from_millis(1));
    assert_eq!(h.slots_played(), vec![0, 1, 2, 0, 1]);
}

#[test]
fn test_pattern_edit_while_running_keeps_phase() {
    let mut h = Harness::new();
    h.metronome.start();
    h.step(Duration::from_millis(500));

    h.metronome.toggle(ChannelId(1), 2);
    assert_eq!(h.metronome.cursor().slot, 1);

    h.step(Duration::from_millis(500));
    let last = h.events.lock().unwrap().last().cloned();
    assert!(matches!(last, Some(MetronomeEvent::SlotPlayed { slot: 2, channel: Some(1), .. })));
}

#[test]
fn test_shrinking_measure_returns_to_downbeat() {
    let mut h = Harness::new();
    h.metronome.start();
    h.step(Duration::from_millis(500));
    h.step(Duration::from_millis(500));
    assert_eq!(h.metronome.cursor().slot, 2);
    let deadline = h.metronome.next_deadline();

    h.metronome.set_beats_per_measure(2);
    let beats = h.metronome.tempo().beats_per_measure() as usize;
    assert_eq!(beats, 2);
    assert!(h.metronome.cursor().beat < beats);
    // Same interval, so no re-arm and no extra tick
    assert_eq!(h.metronome.next_deadline(), deadline);
    assert_eq!(h.slots_played(), vec![0, 1, 2]);

    h.step(Duration::from_millis(500));
    let cursor = h.metronome.cursor();
    assert_eq!((cursor.slot, cursor.beat), (0, 0));
    h.step(Duration::from_millis(500));
    assert_eq!(h.slots_played(), vec![0, 1, 2, 0, 1]);
    assert!(h.metronome.cursor().beat < beats);
}

#[test]
fn test_speed_change_while_running_rearms() {
    let mut h = Harness::new();
    h.metronome.start();
    h.step(Duration::from_millis(500));
    assert_eq!(h.metronome.cursor().slot, 1);

    let now = h.clock.now();
    assert_eq!(h.metronome.set_speed_percentage(200), 200);
    assert_eq!(h.metronome.cursor().slot, 0);
    assert_eq!(h.slots_played(), vec![0, 1, 0]);
    assert_eq!(h.metronome.next_deadline(), Some(now + Duration::from_millis(250)));

    h.step(Duration::from_millis(249));
    assert_eq!(h.slots_played().len(), 3);
    h.step(Duration::from_millis(1));
    assert_eq!(h.slots_played(), vec![0, 1, 0, 1]);
}

#[test]
fn test_subdivision_change_while_running_rearms() {
    let mut h = Harness::new();
    h.metronome.start();
    h.step(Duration::from_millis(500));

    let now = h.clock.now();
    h.metronome.set_subdivision(2);
    assert_eq!(h.metronome.cursor(), PlaybackCursor::default());
    assert_eq!(h.slots_played(), vec![0, 1, 0]);
    assert_eq!(h.metronome.next_deadline(), Some(now + Duration::from_millis(250)));

    h.step(Duration::from_millis(250));
    let cursor = h.metronome.cursor();
    assert_eq!((cursor.slot, cursor.beat, cursor.subdivision), (1, 0, 1));
}

#[test]
fn test_sound_and_pattern_edits_do_not_rearm() {
    let mut h = Harness::new();
    h.metronome.start();
    h.step(Duration::from_millis(500));
    let deadline = h.metronome.next_deadline();

    h.metronome.update_sound_param(ChannelId::MAIN, SoundParam::Gain(0.9));
    h.metronome.toggle(ChannelId::MAIN, 3);
    h.metronome.add_channel();

    assert_eq!(h.metronome.next_deadline(), deadline);
    assert_eq!(h.metronome.cursor().slot, 1);
    assert_eq!(h.slots_played(), vec![0, 1]);
}

#[test]
fn test_subdivision_resizes_rows() {
    let mut h = Harness::new();
    h.metronome.toggle(ChannelId(1), 3);
    assert_eq!(h.metronome.set_subdivision(2), 2);

    let channels = h.metronome.channels();
    assert_eq!(channels[0].row, vec![true; 8]);
    assert_eq!(channels[1].row, vec![false, false, false, true, false, false, false, false]);
    assert!(h.saw(&MetronomeEvent::PatternChanged));
}

#[test]
fn test_cursor_reports_beat_and_subdivision() {
    let mut h = Harness::new();
    h.metronome.set_subdivision(3);
    h.metronome.set_beats_per_measure(2);
    h.metronome.start();

    // 120 BPM in triplets: 1000/6 ms per slot
    let slot = h.metronome.tempo().tick_interval();
    assert_eq!(slot.as_millis(), 166);
    for _ in 0..5 {
        h.step(slot);
    }
    let cursor = h.metronome.cursor();
    assert_eq!(cursor.slot, 5);
    assert_eq!((cursor.beat, cursor.subdivision), (1, 2));
    assert!(cursor.beat < h.metronome.tempo().beats_per_measure() as usize);
}

#[test]
fn test_toggle_previews_and_reports() {
    let mut h = Harness::new();
    assert_eq!(h.metronome.toggle(ChannelId(1), 0), Some(true));
    assert_eq!(h.engine.triggers(), vec![SoundParameters::for_channel(ChannelId(1))]);
    assert_eq!(h.metronome.toggle(ChannelId(1), 0), Some(false));
    assert_eq!(h.engine.count(), 1);

    assert_eq!(h.metronome.toggle(ChannelId(5), 0), None);
    assert_eq!(h.metronome.toggle(ChannelId::MAIN, 99), None);
}

#[test]
fn test_channels_add_and_remove() {
    let mut h = Harness::new();
    let added = h.metronome.add_channel();
    assert_eq!(added, ChannelId(2));
    assert_eq!(h.metronome.channels().len(), 3);
    assert_eq!(h.metronome.sound(added).frequency, 340.0);

    assert!(h.metronome.remove_channel(added));
    assert!(!h.metronome.remove_channel(ChannelId::MAIN));
    assert!(!h.metronome.remove_channel(ChannelId(42)));
    assert_eq!(h.metronome.channels().len(), 2);
}

#[test]
fn test_sound_updates_are_clamped() {
    let mut h = Harness::new();
    let sound = h.metronome.update_sound_param(ChannelId::MAIN, SoundParam::Frequency(50_000.0)).unwrap();
    assert_eq!(sound.frequency, 20_000.0);

    let sound = h.metronome.update_sound_param(ChannelId::MAIN, SoundParam::FilterType(FilterType::Bandpass)).unwrap();
    assert_eq!(sound.filter.kind, FilterType::Bandpass);
    assert!(h.saw(&MetronomeEvent::SoundChanged(0)));

    assert!(h.metronome.update_sound_param(ChannelId(9), SoundParam::Gain(1.0)).is_none());
}

#[test]
fn test_preview_plays_without_running() {
    let mut h = Harness::new();
    h.metronome.preview(ChannelId(1));
    h.metronome.preview(ChannelId(8));
    assert_eq!(
        h.engine.triggers(),
        vec![SoundParameters::for_channel(ChannelId(1)), SoundParameters::fallback()]
    );
    assert!(!h.metronome.is_running());
}

#[test]
fn test_master_volume_is_clamped() {
    let mut h = Harness::new();
    assert_eq!(h.metronome.set_master_volume(1.5), 1.0);
    assert_eq!(h.metronome.set_master_volume(-0.5), 0.0);
}

#[test]
fn test_countdown_stops_playback() {
    let mut h = Harness::with_settings(Settings {
        timeout_minutes: Some(5),
        ..Settings::default()
    });
    assert_eq!(h.metronome.timer_display().to_string(), "05:00");
    h.metronome.start();

    for _ in 0..299 {
        h.step(Duration::from_secs(1));
    }
    assert!(h.metronome.is_running());
    assert_eq!(h.metronome.timer_display().to_string(), "00:01");

    h.step(Duration::from_secs(1));
    assert!(!h.metronome.is_running());
    assert_eq!(h.metronome.countdown_ms(), None);
    assert!(h.saw(&MetronomeEvent::TimerExpired));
    assert!(h.saw(&MetronomeEvent::PlaybackStateChanged(false)));
}

#[test]
fn test_elapsed_timer_pauses_while_stopped() {
    let mut h = Harness::new();
    h.metronome.start();
    h.step(Duration::from_secs(3));
    h.metronome.stop();
    h.step(Duration::from_secs(30));
    assert_eq!(h.metronome.timer_display(), TimerDisplay::Elapsed(Duration::from_secs(3)));

    h.metronome.start();
    h.step(Duration::from_secs(2));
    assert_eq!(h.metronome.timer_display().to_string(), "00:05");

    h.metronome.reset_timer();
    h.step(Duration::from_secs(1));
    assert_eq!(h.metronome.timer_display().to_string(), "00:01");
}

#[test]
fn test_timeout_can_be_set_and_cleared() {
    let mut h = Harness::new();
    h.metronome.set_timeout_minutes(Some(10));
    assert_eq!(h.metronome.timer_display().to_string(), "10:00");
    h.metronome.set_timeout_minutes(None);
    assert_eq!(h.metronome.timeout_minutes(), None);
    assert!(matches!(h.metronome.timer_display(), TimerDisplay::Elapsed(_)));
}

#[test]
fn test_apply_preset_replaces_everything() {
    let mut h = Harness::new();
    h.metronome.start();
    h.step(Duration::from_millis(500));

    let mut preset = Snapshot {
        tempo: TempoState::new(90, 2, 3, 100),
        ..Snapshot::default()
    }
    .normalized();
    preset.channels[1].pattern[1] = true;
    h.metronome.apply_preset(preset.clone());

    assert_eq!(h.metronome.tempo(), preset.tempo);
    assert_eq!(h.metronome.capture_snapshot(), preset);
    assert_eq!(h.metronome.cursor().slot, 0);
    assert!(h.metronome.is_running());
}

#[test]
fn test_capture_snapshot_is_a_copy() {
    let mut h = Harness::new();
    let before = h.metronome.capture_snapshot();
    h.metronome.toggle(ChannelId::MAIN, 0);
    assert_ne!(h.metronome.capture_snapshot(), before);
    assert_eq!(before.channels[0].pattern, vec![true; 4]);
}

#[test]
fn test_unavailable_audio_keeps_timing() {
    let engine = RecordingEngine::unavailable();
    let clock = ManualClock::new();
    let mut metronome = Metronome::new(Box::new(engine.clone())).with_clock(Box::new(clock.clone()));
    assert!(!metronome.audio_available());

    metronome.start();
    clock.advance(Duration::from_millis(500));
    metronome.advance();
    assert_eq!(metronome.cursor().slot, 1);
    assert_eq!(engine.count(), 0);
}

#[test]
fn test_apply_command() {
    let mut h = Harness::new();
    h.metronome.apply(Command::SetBpm(150));
    h.metronome.apply(Command::AddChannel);
    h.metronome.apply(Command::Toggle { channel: ChannelId(2), index: 1 });
    h.metronome.apply(Command::SetMasterVolume(0.8));
    h.metronome.apply(Command::Start);

    assert_eq!(h.metronome.tempo().bpm(), 150);
    assert!(h.metronome.channels()[2].row[1]);
    assert_eq!(h.metronome.master_volume(), 0.8);
    assert!(h.metronome.is_running());

    h.metronome.apply(Command::Quit);
    assert!(!h.metronome.is_running());
}

#[test]
fn test_settings_round_trip() {
    let dir = tempdir().unwrap();
    let mut h = Harness::new();
    h.metronome.set_bpm(96);
    h.metronome.set_beats_per_measure(6);
    h.metronome.toggle(ChannelId(1), 5);
    h.metronome.set_timeout_minutes(Some(15));
    h.metronome.set_master_volume(0.7);

    let mut store = SettingsStore::open(dir.path());
    h.metronome.save_settings(&mut store).unwrap();

    let restored = SettingsStore::open(dir.path()).load_settings();
    assert_eq!(restored.timeout_minutes, Some(15));
    assert_eq!(restored.master_volume, 0.7);

    let reloaded = Harness::with_settings(restored);
    assert_eq!(reloaded.metronome.capture_snapshot(), h.metronome.capture_snapshot());
}

#[test]
fn test_presets_save_and_load() {
    let dir = tempdir().unwrap();
    let library = PresetLibrary::new(dir.path());
    let mut h = Harness::new();
    h.metronome.set_bpm(72);
    h.metronome.save_preset(&library, "Slow practice").unwrap();

    h.metronome.set_bpm(180);
    h.metronome.load_preset(&library, "Slow practice").unwrap();
    assert_eq!(h.metronome.tempo().bpm(), 72);
    assert!(h.metronome.load_preset(&library, "missing").is_err());
}

#[test]
fn test_runner_serves_commands() {
    let engine = RecordingEngine::new();
    let recorder = engine.clone();
    let bus = Arc::new(EventBus::new());
    let signal = RunningSignal::attach(&bus);

    let mut runner = MetronomeRunner::spawn(Settings::default(), bus, move || Box::new(engine) as Box<dyn SoundEngine>);
    assert!(runner.send(Command::SetBpm(200)));
    assert!(runner.send(Command::Start));

    let deadline = Instant::now() + Duration::from_secs(2);
    while !runner.status().is_running && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
    }
    let status = runner.status();
    assert!(status.is_running);
    assert_eq!(status.tempo.bpm(), 200);
    assert!(signal.is_running());
    assert!(recorder.count() >= 1);

    runner.shutdown();
    assert!(!runner.status().is_running);
    assert!(!signal.is_running());
    assert!(!runner.send(Command::Stop));
}
