// Click player: plays synthesized clicks on the default output device

use log::{debug, info, warn};
use project::model::SoundParameters;
use rodio::{OutputStream, OutputStreamHandle};

use crate::synth::{Click, SAMPLE_RATE};
use crate::{AudioError, MasterVolume, SoundEngine};

struct Output {
    // The stream must outlive the handle or playback silently stops
    _stream: OutputStream,
    handle: OutputStreamHandle,
}

/// Sound engine backed by the default audio output.
///
/// The output is opened once and closed when the player is dropped. Each
/// trigger mixes a fresh `Click` into the stream; clicks may overlap.
pub struct ClickPlayer {
    output: Option<Output>,
    master: MasterVolume,
}

impl ClickPlayer {
    /// Open the default output device
    pub fn try_new() -> Result<Self, AudioError> {
        let (stream, handle) = OutputStream::try_default()
            .map_err(|e| AudioError::InitializationError(e.to_string()))?;

        info!("Audio output opened");
        Ok(Self {
            output: Some(Output {
                _stream: stream,
                handle,
            }),
            master: MasterVolume::default(),
        })
    }

    /// Open the default output, or fall back to a silent player
    pub fn new() -> Self {
        match Self::try_new() {
            Ok(player) => player,
            Err(e) => {
                warn!("{}; clicks will be silent", e);
                Self::silent()
            }
        }
    }

    /// A player with no output device; every trigger is a no-op
    pub fn silent() -> Self {
        Self {
            output: None,
            master: MasterVolume::default(),
        }
    }

    pub fn master(&self) -> &MasterVolume {
        &self.master
    }
}

impl Default for ClickPlayer {
    fn default() -> Self {
        Self::new()
    }
}

impl SoundEngine for ClickPlayer {
    fn trigger(&mut self, params: &SoundParameters) {
        let Some(output) = &self.output else {
            debug!("No audio output, click skipped");
            return;
        };

        let click = Click::new(&params.sanitized(), SAMPLE_RATE, self.master.clone());
        match output.handle.play_raw(click) {
            Ok(()) => debug!("Click at {:.1}Hz gain {:.2}", params.frequency, params.gain),
            Err(e) => warn!("{}", AudioError::PlaybackError(e.to_string())),
        }
    }

    fn master_volume(&self) -> f32 {
        self.master.get()
    }

    fn set_master_volume(&mut self, volume: f32) {
        self.master.set(volume);
        debug!("Master volume set to {:.2}", self.master.get());
    }

    fn is_available(&self) -> bool {
        self.output.is_some()
    }
}
