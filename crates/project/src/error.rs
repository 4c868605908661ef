use thiserror::Error;

/// Error types for settings and preset storage
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Failed to parse preset: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("Failed to write preset: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("Preset not found: {0}")]
    PresetNotFound(String),

    #[error("Invalid preset name: {0:?}")]
    InvalidPresetName(String),
}
