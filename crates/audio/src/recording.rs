use std::sync::{Arc, Mutex};

use project::model::SoundParameters;

use crate::{MasterVolume, SoundEngine};

/// Sound engine that only remembers what it was asked to play.
///
/// Clones share the same log, so a test can keep one clone and hand the
/// other to the code under test.
#[derive(Clone, Default)]
pub struct RecordingEngine {
    triggers: Arc<Mutex<Vec<SoundParameters>>>,
    master: MasterVolume,
    unavailable: bool,
}

impl RecordingEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// An engine that behaves like a missing output device
    pub fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Self::default()
        }
    }

    pub fn triggers(&self) -> Vec<SoundParameters> {
        self.triggers.lock().map(|t| t.clone()).unwrap_or_default()
    }

    pub fn count(&self) -> usize {
        self.triggers.lock().map(|t| t.len()).unwrap_or(0)
    }

    pub fn clear(&self) {
        if let Ok(mut triggers) = self.triggers.lock() {
            triggers.clear();
        }
    }
}

impl SoundEngine for RecordingEngine {
    fn trigger(&mut self, params: &SoundParameters) {
        if self.unavailable {
            return;
        }
        if let Ok(mut triggers) = self.triggers.lock() {
            triggers.push(*params);
        }
    }

    fn master_volume(&self) -> f32 {
        self.master.get()
    }

    fn set_master_volume(&mut self, volume: f32) {
        self.master.set(volume);
    }

    fn is_available(&self) -> bool {
        !self.unavailable
    }
}
