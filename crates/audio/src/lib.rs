// audio module: the click sound engine
mod player;
mod recording;
pub mod synth;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use project::model::SoundParameters;
use thiserror::Error;

// Re-export important types
pub use crate::player::ClickPlayer;
pub use crate::recording::RecordingEngine;
pub use crate::synth::{Click, SAMPLE_RATE};

pub use project::settings::DEFAULT_MASTER_VOLUME;

/// Error types for the audio system
#[derive(Debug, Error)]
pub enum AudioError {
    #[error("Failed to initialize audio output: {0}")]
    InitializationError(String),

    #[error("Playback error: {0}")]
    PlaybackError(String),
}

/// Anything that can sound a click.
///
/// `trigger` is fire-and-forget: it never reports completion and never fails.
/// An engine without a usable output device just does nothing.
pub trait SoundEngine {
    fn trigger(&mut self, params: &SoundParameters);

    fn master_volume(&self) -> f32;

    fn set_master_volume(&mut self, volume: f32);

    fn is_available(&self) -> bool {
        true
    }
}

/// Global output gain shared by every sounding click
#[derive(Debug, Clone)]
pub struct MasterVolume {
    bits: Arc<AtomicU32>,
}

impl MasterVolume {
    pub fn new(volume: f32) -> Self {
        let master = Self {
            bits: Arc::new(AtomicU32::new(0)),
        };
        master.set(volume);
        master
    }

    pub fn get(&self) -> f32 {
        f32::from_bits(self.bits.load(Ordering::Relaxed))
    }

    /// Clamped to 0.0..=1.0; NaN is ignored
    pub fn set(&self, volume: f32) {
        if volume.is_nan() {
            return;
        }
        self.bits.store(volume.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
    }
}

impl Default for MasterVolume {
    fn default() -> Self {
        Self::new(DEFAULT_MASTER_VOLUME)
    }
}
