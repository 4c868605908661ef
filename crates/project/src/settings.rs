// Key-value settings store, one JSON document on disk.
// Mirrors a browser key-value store: each key is read and validated on its own.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use serde_json::{Map, Value};

use crate::error::PersistenceError;
use crate::model::{ChannelId, Snapshot, SoundParameters, TempoState};

pub const SETTINGS_FILE: &str = "settings.json";

pub const KEY_BPM: &str = "bpm";
pub const KEY_BEATS_PER_MEASURE: &str = "beatsPerMeasure";
pub const KEY_SUBDIVISION: &str = "subdivision";
pub const KEY_SPEED_PERCENTAGE: &str = "speedPercentage";
pub const KEY_PATTERN: &str = "pattern";
pub const KEY_SOUNDS: &str = "sounds";
pub const KEY_TIMEOUT_MINUTES: &str = "timeoutMinutes";
pub const KEY_MASTER_VOLUME: &str = "masterVolume";

pub const DEFAULT_MASTER_VOLUME: f32 = 0.5;

/// Everything the core restores at startup
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub snapshot: Snapshot,
    pub timeout_minutes: Option<u32>,
    pub master_volume: f32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            snapshot: Snapshot::default(),
            timeout_minutes: None,
            master_volume: DEFAULT_MASTER_VOLUME,
        }
    }
}

pub struct SettingsStore {
    path: PathBuf,
    items: Map<String, Value>,
}

impl SettingsStore {
    /// Empty store that saves to `path`
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            items: Map::new(),
        }
    }

    /// Open `<data dir>/settings.json`. A missing or unreadable document
    /// yields an empty store.
    pub fn open<P: AsRef<Path>>(data_dir: P) -> Self {
        let path = data_dir.as_ref().join(SETTINGS_FILE);
        let items = match fs::read_to_string(&path) {
            Ok(text) => match serde_json::from_str::<Value>(&text) {
                Ok(Value::Object(items)) => items,
                Ok(_) | Err(_) => {
                    warn!("Settings file {} is not a JSON object, starting fresh", path.display());
                    Map::new()
                }
            },
            Err(e) => {
                debug!("No settings at {}: {}", path.display(), e);
                Map::new()
            }
        };
        Self { path, items }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get_item(&self, key: &str) -> Option<&Value> {
        self.items.get(key)
    }

    pub fn set_item(&mut self, key: &str, value: Value) {
        self.items.insert(key.to_string(), value);
    }

    pub fn remove_item(&mut self, key: &str) -> Option<Value> {
        self.items.remove(key)
    }

    pub fn save(&self) -> Result<(), PersistenceError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&Value::Object(self.items.clone()))?;
        fs::write(&self.path, json)?;
        debug!("Settings written to {}", self.path.display());
        Ok(())
    }

    fn get_i32(&self, key: &str) -> Option<i32> {
        self.items
            .get(key)
            .and_then(Value::as_i64)
            .map(|v| v.clamp(i32::MIN as i64, i32::MAX as i64) as i32)
    }

    /// Restore settings. Tempo keys fall back one by one; pattern and sounds
    /// that fail the structural check are removed from the store and the
    /// default channel set is used instead.
    pub fn load_settings(&mut self) -> Settings {
        let defaults = TempoState::default();
        let tempo = TempoState::new(
            self.get_i32(KEY_BPM).unwrap_or(defaults.bpm() as i32),
            self.get_i32(KEY_SUBDIVISION).unwrap_or(defaults.subdivision() as i32),
            self.get_i32(KEY_BEATS_PER_MEASURE).unwrap_or(defaults.beats_per_measure() as i32),
            self.get_i32(KEY_SPEED_PERCENTAGE).unwrap_or(defaults.speed_percentage() as i32),
        );

        let snapshot = match self.load_channels() {
            Some((pattern, sounds)) => Snapshot::from_maps(tempo, pattern, sounds),
            None => Snapshot {
                tempo,
                ..Snapshot::default()
            }
            .normalized(),
        };

        let timeout_minutes = self
            .items
            .get(KEY_TIMEOUT_MINUTES)
            .and_then(Value::as_u64)
            .filter(|m| *m > 0)
            .map(|m| m.min(u32::MAX as u64) as u32);

        let master_volume = self
            .items
            .get(KEY_MASTER_VOLUME)
            .and_then(Value::as_f64)
            .map(|v| (v as f32).clamp(0.0, 1.0))
            .unwrap_or(DEFAULT_MASTER_VOLUME);

        Settings {
            snapshot,
            timeout_minutes,
            master_volume,
        }
    }

    #[allow(clippy::type_complexity)]
    fn load_channels(
        &mut self,
    ) -> Option<(BTreeMap<ChannelId, Vec<bool>>, BTreeMap<ChannelId, SoundParameters>)> {
        let pattern = self.items.get(KEY_PATTERN)?.clone();
        let parsed_pattern = serde_json::from_value::<BTreeMap<ChannelId, Vec<bool>>>(pattern);
        let parsed_sounds = match self.items.get(KEY_SOUNDS) {
            Some(sounds) => serde_json::from_value::<BTreeMap<ChannelId, SoundParameters>>(sounds.clone()),
            None => Ok(BTreeMap::new()),
        };

        match (parsed_pattern, parsed_sounds) {
            (Ok(pattern), Ok(sounds)) => {
                info!("Restored {} pattern rows from settings", pattern.len());
                Some((pattern, sounds))
            }
            (Err(e), _) | (_, Err(e)) => {
                warn!("Discarding corrupted pattern/sound settings: {}", e);
                self.remove_item(KEY_PATTERN);
                self.remove_item(KEY_SOUNDS);
                None
            }
        }
    }

    /// Write every key from the current state
    pub fn store_settings(&mut self, settings: &Settings) -> Result<(), PersistenceError> {
        let tempo = settings.snapshot.tempo;
        self.set_item(KEY_BPM, Value::from(tempo.bpm()));
        self.set_item(KEY_BEATS_PER_MEASURE, Value::from(tempo.beats_per_measure()));
        self.set_item(KEY_SUBDIVISION, Value::from(tempo.subdivision()));
        self.set_item(KEY_SPEED_PERCENTAGE, Value::from(tempo.speed_percentage()));
        self.set_item(KEY_PATTERN, serde_json::to_value(settings.snapshot.pattern_map())?);
        self.set_item(KEY_SOUNDS, serde_json::to_value(settings.snapshot.sound_map())?);
        self.set_item(
            KEY_TIMEOUT_MINUTES,
            settings.timeout_minutes.map(Value::from).unwrap_or(Value::Null),
        );
        self.set_item(KEY_MASTER_VOLUME, Value::from(settings.master_volume as f64));
        Ok(())
    }
}
