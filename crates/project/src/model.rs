use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const MIN_BPM: u32 = 40;
pub const MAX_BPM: u32 = 220;
pub const MIN_SUBDIVISION: u32 = 1;
pub const MAX_SUBDIVISION: u32 = 8;
pub const MIN_BEATS_PER_MEASURE: u32 = 2;
pub const MAX_BEATS_PER_MEASURE: u32 = 12;
pub const MIN_SPEED_PERCENTAGE: u32 = 5;
pub const MAX_SPEED_PERCENTAGE: u32 = 200;

pub const MIN_FREQUENCY: f32 = 20.0;
pub const MAX_FREQUENCY: f32 = 20_000.0;
pub const MAX_GAIN: f32 = 2.0;
pub const MIN_Q: f32 = 0.1;
pub const MAX_Q: f32 = 30.0;
/// Shortest attack or decay segment, in seconds
pub const MIN_ENVELOPE_SECS: f32 = 0.001;
/// Lowest default pitch handed to a newly added channel
pub const MIN_CHANNEL_FREQUENCY: f32 = 60.0;

fn clamp_to(value: i32, min: u32, max: u32) -> u32 {
    value.clamp(min as i32, max as i32) as u32
}

/// Identifier of a pattern row. Channel 0 is the main beat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(pub u32);

impl ChannelId {
    pub const MAIN: ChannelId = ChannelId(0);

    pub fn is_main(self) -> bool {
        self == Self::MAIN
    }

    /// Value used for slots added by a resize: main row on, added rows off
    pub fn default_fill(self) -> bool {
        self.is_main()
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Waveform {
    #[default]
    Sine,
    Square,
    Sawtooth,
    Triangle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterType {
    #[default]
    None,
    Lowpass,
    Highpass,
    Bandpass,
}

/// Filter stage inserted between oscillator and envelope
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterSettings {
    #[serde(rename = "type", default)]
    pub kind: FilterType,
    #[serde(default = "default_cutoff")]
    pub cutoff_frequency: f32,
    #[serde(default = "default_q")]
    pub q: f32,
}

fn default_cutoff() -> f32 {
    1000.0
}

fn default_q() -> f32 {
    1.0
}

fn default_attack() -> f32 {
    0.005
}

fn default_decay() -> f32 {
    0.095
}

impl Default for FilterSettings {
    fn default() -> Self {
        Self {
            kind: FilterType::None,
            cutoff_frequency: default_cutoff(),
            q: default_q(),
        }
    }
}

impl FilterSettings {
    pub fn is_bypassed(&self) -> bool {
        self.kind == FilterType::None
    }
}

/// Timbre of one channel's click.
///
/// `frequency` and `gain` are required when deserializing; everything else
/// falls back to the default click shape.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SoundParameters {
    pub frequency: f32,
    pub gain: f32,
    #[serde(default)]
    pub waveform: Waveform,
    #[serde(default)]
    pub filter: FilterSettings,
    #[serde(default = "default_attack")]
    pub attack: f32,
    #[serde(default = "default_decay")]
    pub decay: f32,
}

impl Default for SoundParameters {
    fn default() -> Self {
        Self::fallback()
    }
}

impl SoundParameters {
    pub fn new(frequency: f32, gain: f32) -> Self {
        Self {
            frequency,
            gain,
            waveform: Waveform::Sine,
            filter: FilterSettings::default(),
            attack: default_attack(),
            decay: default_decay(),
        }
    }

    /// Sound used for a channel that has no stored entry
    pub fn fallback() -> Self {
        Self::new(440.0, 0.3)
    }

    /// Default sound of a channel: higher ids get a lower pitch
    pub fn for_channel(id: ChannelId) -> Self {
        match id.0 {
            0 => Self::new(1000.0, 0.5),
            1 => Self::new(500.0, 0.3),
            n => {
                let frequency = (440.0 - 50.0 * n as f32).max(MIN_CHANNEL_FREQUENCY);
                Self::new(frequency, 0.3)
            }
        }
    }

    /// Total audible length of a click: attack + decay
    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.attack as f64 + self.decay as f64)
    }

    /// Copy with every field forced into its valid range
    pub fn sanitized(mut self) -> Self {
        let defaults = Self::fallback();
        self.frequency = finite_or(self.frequency, defaults.frequency).clamp(MIN_FREQUENCY, MAX_FREQUENCY);
        self.gain = finite_or(self.gain, defaults.gain).clamp(0.0, MAX_GAIN);
        self.filter.cutoff_frequency =
            finite_or(self.filter.cutoff_frequency, default_cutoff()).clamp(MIN_FREQUENCY, MAX_FREQUENCY);
        self.filter.q = finite_or(self.filter.q, default_q()).clamp(MIN_Q, MAX_Q);
        self.attack = finite_or(self.attack, defaults.attack).max(MIN_ENVELOPE_SECS);
        self.decay = finite_or(self.decay, defaults.decay).max(MIN_ENVELOPE_SECS);
        self
    }

    /// Apply a single field update, clamped. Non-finite values are ignored.
    pub fn apply(&mut self, update: SoundParam) {
        match update {
            SoundParam::Frequency(v) if v.is_finite() => self.frequency = v,
            SoundParam::Gain(v) if v.is_finite() => self.gain = v,
            SoundParam::Waveform(w) => self.waveform = w,
            SoundParam::FilterType(kind) => self.filter.kind = kind,
            SoundParam::FilterCutoff(v) if v.is_finite() => self.filter.cutoff_frequency = v,
            SoundParam::FilterQ(v) if v.is_finite() => self.filter.q = v,
            SoundParam::Attack(v) if v.is_finite() => self.attack = v,
            SoundParam::Decay(v) if v.is_finite() => self.decay = v,
            _ => return,
        }
        *self = self.sanitized();
    }
}

fn finite_or(value: f32, fallback: f32) -> f32 {
    if value.is_finite() {
        value
    } else {
        fallback
    }
}

/// One editable field of `SoundParameters` with its new value
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SoundParam {
    Frequency(f32),
    Gain(f32),
    Waveform(Waveform),
    FilterType(FilterType),
    FilterCutoff(f32),
    FilterQ(f32),
    Attack(f32),
    Decay(f32),
}

/// The values that decide the tick interval. A change here re-arms the timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimingKey {
    pub bpm: u32,
    pub subdivision: u32,
    pub speed_percentage: u32,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTempoState {
    bpm: i32,
    subdivision: i32,
    beats_per_measure: i32,
    speed_percentage: i32,
}

impl From<RawTempoState> for TempoState {
    fn from(raw: RawTempoState) -> Self {
        TempoState::new(raw.bpm, raw.subdivision, raw.beats_per_measure, raw.speed_percentage)
    }
}

/// Tempo, meter and speed. Every setter clamps silently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "RawTempoState")]
pub struct TempoState {
    bpm: u32,
    subdivision: u32,
    beats_per_measure: u32,
    speed_percentage: u32,
}

impl Default for TempoState {
    fn default() -> Self {
        Self {
            bpm: 120,
            subdivision: 1,
            beats_per_measure: 4,
            speed_percentage: 100,
        }
    }
}

impl TempoState {
    pub fn new(bpm: i32, subdivision: i32, beats_per_measure: i32, speed_percentage: i32) -> Self {
        Self {
            bpm: clamp_to(bpm, MIN_BPM, MAX_BPM),
            subdivision: clamp_to(subdivision, MIN_SUBDIVISION, MAX_SUBDIVISION),
            beats_per_measure: clamp_to(beats_per_measure, MIN_BEATS_PER_MEASURE, MAX_BEATS_PER_MEASURE),
            speed_percentage: clamp_to(speed_percentage, MIN_SPEED_PERCENTAGE, MAX_SPEED_PERCENTAGE),
        }
    }

    pub fn bpm(&self) -> u32 {
        self.bpm
    }

    pub fn subdivision(&self) -> u32 {
        self.subdivision
    }

    pub fn beats_per_measure(&self) -> u32 {
        self.beats_per_measure
    }

    pub fn speed_percentage(&self) -> u32 {
        self.speed_percentage
    }

    pub fn set_bpm(&mut self, bpm: i32) -> u32 {
        self.bpm = clamp_to(bpm, MIN_BPM, MAX_BPM);
        self.bpm
    }

    pub fn adjust_bpm(&mut self, delta: i32) -> u32 {
        self.set_bpm((self.bpm as i32).saturating_add(delta))
    }

    pub fn set_subdivision(&mut self, subdivision: i32) -> u32 {
        self.subdivision = clamp_to(subdivision, MIN_SUBDIVISION, MAX_SUBDIVISION);
        self.subdivision
    }

    pub fn adjust_subdivision(&mut self, delta: i32) -> u32 {
        self.set_subdivision((self.subdivision as i32).saturating_add(delta))
    }

    pub fn set_beats_per_measure(&mut self, beats: i32) -> u32 {
        self.beats_per_measure = clamp_to(beats, MIN_BEATS_PER_MEASURE, MAX_BEATS_PER_MEASURE);
        self.beats_per_measure
    }

    pub fn adjust_beats_per_measure(&mut self, delta: i32) -> u32 {
        self.set_beats_per_measure((self.beats_per_measure as i32).saturating_add(delta))
    }

    pub fn set_speed_percentage(&mut self, speed: i32) -> u32 {
        self.speed_percentage = clamp_to(speed, MIN_SPEED_PERCENTAGE, MAX_SPEED_PERCENTAGE);
        self.speed_percentage
    }

    /// Slots in one measure: beats_per_measure x subdivision
    pub fn slot_count(&self) -> usize {
        (self.beats_per_measure * self.subdivision) as usize
    }

    /// Milliseconds between ticks, scaled by the speed multiplier
    pub fn tick_interval_ms(&self) -> f64 {
        60_000.0 / (self.bpm as f64 * self.subdivision as f64) * (100.0 / self.speed_percentage as f64)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs_f64(self.tick_interval_ms() / 1000.0)
    }

    pub fn timing(&self) -> TimingKey {
        TimingKey {
            bpm: self.bpm,
            subdivision: self.subdivision,
            speed_percentage: self.speed_percentage,
        }
    }
}

/// One row of the pattern together with its sound
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelState {
    pub id: ChannelId,
    pub pattern: Vec<bool>,
    pub sound: SoundParameters,
}

/// Deep copy of everything a preset captures
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub tempo: TempoState,
    pub channels: Vec<ChannelState>,
}

impl Default for Snapshot {
    fn default() -> Self {
        let tempo = TempoState::default();
        let slots = tempo.slot_count();
        let channels = [ChannelId::MAIN, ChannelId(1)]
            .into_iter()
            .map(|id| ChannelState {
                id,
                pattern: vec![id.default_fill(); slots],
                sound: SoundParameters::for_channel(id),
            })
            .collect();
        Self { tempo, channels }
    }
}

impl Snapshot {
    /// Build a snapshot from the id-keyed maps used by the settings store.
    /// Channels without a sound entry get the fallback sound.
    pub fn from_maps(
        tempo: TempoState,
        pattern: BTreeMap<ChannelId, Vec<bool>>,
        mut sounds: BTreeMap<ChannelId, SoundParameters>,
    ) -> Self {
        let channels = pattern
            .into_iter()
            .map(|(id, row)| ChannelState {
                id,
                pattern: row,
                sound: sounds.remove(&id).unwrap_or_else(SoundParameters::fallback),
            })
            .collect();
        Self { tempo, channels }.normalized()
    }

    pub fn pattern_map(&self) -> BTreeMap<ChannelId, Vec<bool>> {
        self.channels.iter().map(|c| (c.id, c.pattern.clone())).collect()
    }

    pub fn sound_map(&self) -> BTreeMap<ChannelId, SoundParameters> {
        self.channels.iter().map(|c| (c.id, c.sound)).collect()
    }

    pub fn channel(&self, id: ChannelId) -> Option<&ChannelState> {
        self.channels.iter().find(|c| c.id == id)
    }

    /// Sorted by id, duplicates dropped, channel 0 present, every row sized
    /// to the tempo's slot count and every sound in range.
    pub fn normalized(mut self) -> Self {
        let slots = self.tempo.slot_count();
        self.channels.sort_by_key(|c| c.id);
        self.channels.dedup_by_key(|c| c.id);
        if self.channels.first().map(|c| c.id) != Some(ChannelId::MAIN) {
            self.channels.insert(
                0,
                ChannelState {
                    id: ChannelId::MAIN,
                    pattern: Vec::new(),
                    sound: SoundParameters::for_channel(ChannelId::MAIN),
                },
            );
        }
        for channel in &mut self.channels {
            channel.pattern.resize(slots, channel.id.default_fill());
            channel.sound = channel.sound.sanitized();
        }
        self
    }
}

/// A named snapshot as stored by the preset library
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preset {
    pub name: String,
    pub snapshot: Snapshot,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bpm_clamping() {
        let mut tempo = TempoState::default();
        assert_eq!(tempo.set_bpm(300), 220);
        assert_eq!(tempo.set_bpm(10), 40);
        assert_eq!(tempo.set_bpm(-5), 40);
        assert_eq!(tempo.adjust_bpm(1), 41);
    }

    #[test]
    fn test_dimension_clamping() {
        let mut tempo = TempoState::default();
        assert_eq!(tempo.adjust_subdivision(-1), 1);
        assert_eq!(tempo.set_subdivision(12), 8);
        assert_eq!(tempo.adjust_subdivision(1), 8);
        assert_eq!(tempo.set_beats_per_measure(1), 2);
        assert_eq!(tempo.set_beats_per_measure(13), 12);
        assert_eq!(tempo.set_speed_percentage(0), 5);
        assert_eq!(tempo.set_speed_percentage(500), 200);
    }

    #[test]
    fn test_tick_interval_formula() {
        let tempo = TempoState::new(120, 1, 4, 100);
        assert!((tempo.tick_interval_ms() - 500.0).abs() < 1e-9);
        assert_eq!(tempo.tick_interval(), Duration::from_millis(500));

        let fast = TempoState::new(120, 2, 4, 200);
        assert!((fast.tick_interval_ms() - 125.0).abs() < 1e-9);

        let slow = TempoState::new(60, 1, 4, 50);
        assert!((slow.tick_interval_ms() - 2000.0).abs() < 1e-9);
    }

    #[test]
    fn test_tick_interval_positive_over_domain() {
        for bpm in MIN_BPM..=MAX_BPM {
            for sub in MIN_SUBDIVISION..=MAX_SUBDIVISION {
                for speed in [MIN_SPEED_PERCENTAGE, 37, 100, 151, MAX_SPEED_PERCENTAGE] {
                    let tempo = TempoState::new(bpm as i32, sub as i32, 4, speed as i32);
                    let expected = 60_000.0 / (bpm as f64 * sub as f64) * (100.0 / speed as f64);
                    assert!(tempo.tick_interval_ms() > 0.0);
                    assert!((tempo.tick_interval_ms() - expected).abs() < 1e-6);
                }
            }
        }
    }

    #[test]
    fn test_tempo_deserialization_clamps() {
        let tempo: TempoState = serde_json::from_str(
            r#"{"bpm": 999, "subdivision": 0, "beatsPerMeasure": 3, "speedPercentage": 100}"#,
        )
        .unwrap();
        assert_eq!(tempo.bpm(), 220);
        assert_eq!(tempo.subdivision(), 1);
        assert_eq!(tempo.beats_per_measure(), 3);
    }

    #[test]
    fn test_sound_duration() {
        let mut sound = SoundParameters::new(880.0, 0.5);
        sound.attack = 0.01;
        sound.decay = 0.2;
        assert!((sound.duration().as_secs_f64() - 0.21).abs() < 1e-6);
    }

    #[test]
    fn test_sound_param_clamping() {
        let mut sound = SoundParameters::fallback();
        sound.apply(SoundParam::Gain(5.0));
        assert_eq!(sound.gain, MAX_GAIN);
        sound.apply(SoundParam::Attack(0.0));
        assert_eq!(sound.attack, MIN_ENVELOPE_SECS);
        sound.apply(SoundParam::Frequency(f32::NAN));
        assert_eq!(sound.frequency, 440.0);
        sound.apply(SoundParam::Waveform(Waveform::Square));
        assert_eq!(sound.waveform, Waveform::Square);
    }

    #[test]
    fn test_channel_default_pitch_descends() {
        let pitches: Vec<f32> = (1..6)
            .map(|id| SoundParameters::for_channel(ChannelId(id)).frequency)
            .collect();
        assert!(pitches.windows(2).all(|w| w[1] < w[0]));
        assert_eq!(SoundParameters::for_channel(ChannelId(50)).frequency, MIN_CHANNEL_FREQUENCY);
    }

    #[test]
    fn test_sound_requires_frequency_and_gain() {
        let missing: Result<SoundParameters, _> = serde_json::from_str(r#"{"gain": 0.3}"#);
        assert!(missing.is_err());

        let minimal: SoundParameters = serde_json::from_str(r#"{"frequency": 330, "gain": 0.2}"#).unwrap();
        assert_eq!(minimal.waveform, Waveform::Sine);
        assert!(minimal.filter.is_bypassed());
    }

    #[test]
    fn test_snapshot_normalization() {
        let tempo = TempoState::new(100, 2, 3, 100);
        let mut pattern = BTreeMap::new();
        pattern.insert(ChannelId(2), vec![true]);
        let snapshot = Snapshot::from_maps(tempo, pattern, BTreeMap::new());

        assert_eq!(snapshot.channels.len(), 2);
        assert_eq!(snapshot.channels[0].id, ChannelId::MAIN);
        assert_eq!(snapshot.channels[0].pattern, vec![true; 6]);
        assert_eq!(snapshot.channels[1].pattern, vec![true, false, false, false, false, false]);
        assert_eq!(snapshot.channels[1].sound, SoundParameters::fallback());
    }

    #[test]
    fn test_channel_map_keys_serialize_as_strings() {
        let snapshot = Snapshot::default();
        let json = serde_json::to_value(snapshot.pattern_map()).unwrap();
        assert!(json.get("0").is_some());
        assert!(json.get("1").is_some());

        let back: BTreeMap<ChannelId, Vec<bool>> = serde_json::from_value(json).unwrap();
        assert_eq!(back, snapshot.pattern_map());
    }
}
