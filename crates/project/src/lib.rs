pub mod error;
pub mod loader;
pub mod model;
pub mod settings;

pub use error::PersistenceError;
pub use loader::{get_data_dir, PresetLibrary};
pub use model::{
    ChannelId, ChannelState, FilterSettings, FilterType, Preset, Snapshot, SoundParam,
    SoundParameters, TempoState, TimingKey, Waveform,
};
pub use settings::{Settings, SettingsStore};
