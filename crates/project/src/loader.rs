use crate::error::PersistenceError;
use crate::model::{Preset, Snapshot};
use dirs::home_dir;
use log::{debug, info};
use std::fs;
use std::path::{Path, PathBuf};

const DEV_DATA_DIR: &str = "metronome-data";
const HOME_DATA_DIR: &str = ".metronome";
const PRESET_DIR: &str = "presets";
const PRESET_EXT: &str = "toml";

pub fn get_data_dir() -> PathBuf {
    // Development checkout keeps its data next to the binary's working dir
    let dev_path = PathBuf::from(DEV_DATA_DIR);
    if dev_path.exists() {
        return dev_path;
    }

    let home = home_dir().unwrap_or_else(|| PathBuf::from("."));
    home.join(HOME_DATA_DIR)
}

fn validate_name(name: &str) -> Result<(), PersistenceError> {
    let valid = !name.trim().is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == ' ' || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(PersistenceError::InvalidPresetName(name.to_string()))
    }
}

/// Named presets stored as one TOML file each under `<data dir>/presets`
pub struct PresetLibrary {
    dir: PathBuf,
}

impl PresetLibrary {
    pub fn new<P: AsRef<Path>>(data_dir: P) -> Self {
        Self {
            dir: data_dir.as_ref().join(PRESET_DIR),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn preset_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", name, PRESET_EXT))
    }

    pub fn save(&self, name: &str, snapshot: &Snapshot) -> Result<PathBuf, PersistenceError> {
        validate_name(name)?;
        fs::create_dir_all(&self.dir)?;

        let preset = Preset {
            name: name.to_string(),
            snapshot: snapshot.clone(),
        };
        let path = self.preset_path(name);
        fs::write(&path, toml::to_string_pretty(&preset)?)?;
        info!("Saved preset '{}' to {}", name, path.display());
        Ok(path)
    }

    /// Load a preset; the snapshot comes back normalized
    pub fn load(&self, name: &str) -> Result<Preset, PersistenceError> {
        validate_name(name)?;
        let path = self.preset_path(name);
        if !path.exists() {
            return Err(PersistenceError::PresetNotFound(name.to_string()));
        }

        let text = fs::read_to_string(&path)?;
        let mut preset: Preset = toml::from_str(&text)?;
        preset.snapshot = preset.snapshot.normalized();
        debug!("Loaded preset '{}' with {} channels", name, preset.snapshot.channels.len());
        Ok(preset)
    }

    /// Sorted preset names; a missing directory means no presets
    pub fn list(&self) -> Result<Vec<String>, PersistenceError> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let mut names = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(PRESET_EXT) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                names.push(stem.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    pub fn delete(&self, name: &str) -> Result<(), PersistenceError> {
        validate_name(name)?;
        let path = self.preset_path(name);
        if !path.exists() {
            return Err(PersistenceError::PresetNotFound(name.to_string()));
        }
        fs::remove_file(&path)?;
        info!("Deleted preset '{}'", name);
        Ok(())
    }
}
