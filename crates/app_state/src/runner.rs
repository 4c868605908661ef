// Playback thread: owns the metronome and serves UI commands between
// scheduler ticks and timer steps.

use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use audio::SoundEngine;
use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use events::SharedEventBus;
use log::{debug, error, info, warn};
use project::model::{ChannelId, Snapshot, SoundParam, TempoState};
use project::Settings;
use sequencer::{PlaybackCursor, TimerDisplay};

use crate::Metronome;

/// Commands that can be sent to the playback thread
#[derive(Debug, Clone)]
pub enum Command {
    Start,
    Stop,
    TogglePlayback,
    SetBpm(i32),
    AdjustBpm(i32),
    SetSubdivision(i32),
    AdjustSubdivision(i32),
    SetBeatsPerMeasure(i32),
    AdjustBeatsPerMeasure(i32),
    SetSpeedPercentage(i32),
    Toggle { channel: ChannelId, index: usize },
    AddChannel,
    RemoveChannel(ChannelId),
    UpdateSound { channel: ChannelId, param: SoundParam },
    Preview(ChannelId),
    SetTimeoutMinutes(Option<u32>),
    ResetTimer,
    SetMasterVolume(f32),
    ApplyPreset(Snapshot),
    Quit,
}

/// What the UI reads back after every command or tick
#[derive(Debug, Clone)]
pub struct MetronomeStatus {
    pub tempo: TempoState,
    pub cursor: PlaybackCursor,
    pub is_running: bool,
    pub timer: TimerDisplay,
    pub timeout_minutes: Option<u32>,
    pub master_volume: f32,
    pub audio_available: bool,
    pub snapshot: Snapshot,
}

impl MetronomeStatus {
    /// Read back the current state of a metronome
    pub fn of(metronome: &Metronome) -> Self {
        Self {
            tempo: metronome.tempo(),
            cursor: metronome.cursor(),
            is_running: metronome.is_running(),
            timer: metronome.timer_display(),
            timeout_minutes: metronome.timeout_minutes(),
            master_volume: metronome.master_volume(),
            audio_available: metronome.audio_available(),
            snapshot: metronome.capture_snapshot(),
        }
    }

    /// The settings this status would persist
    pub fn settings(&self) -> Settings {
        Settings {
            snapshot: self.snapshot.clone(),
            timeout_minutes: self.timeout_minutes,
            master_volume: self.master_volume,
        }
    }
}

fn publish(status: &Mutex<MetronomeStatus>, metronome: &Metronome) {
    match status.lock() {
        Ok(mut status) => *status = MetronomeStatus::of(metronome),
        Err(e) => warn!("Status lock poisoned: {}", e),
    }
}

pub struct MetronomeRunner {
    cmd_sender: Sender<Command>,
    status: Arc<Mutex<MetronomeStatus>>,
    events: SharedEventBus,
    thread_handle: Option<JoinHandle<()>>,
}

impl MetronomeRunner {
    /// Spawn the playback thread. The engine is built on that thread since
    /// audio output streams cannot move between threads.
    pub fn spawn<F>(settings: Settings, events: SharedEventBus, make_engine: F) -> Self
    where
        F: FnOnce() -> Box<dyn SoundEngine> + Send + 'static,
    {
        let (cmd_sender, cmd_receiver) = bounded::<Command>(32);
        let initial = MetronomeStatus {
            tempo: settings.snapshot.tempo,
            cursor: PlaybackCursor::default(),
            is_running: false,
            timer: sequencer::SessionTimer::new(settings.timeout_minutes).display(),
            timeout_minutes: settings.timeout_minutes,
            master_volume: settings.master_volume,
            audio_available: false,
            snapshot: settings.snapshot.clone(),
        };
        let status = Arc::new(Mutex::new(initial));

        let status_clone = Arc::clone(&status);
        let events_clone = Arc::clone(&events);

        let thread_handle = thread::spawn(move || {
            let mut metronome = Metronome::from_settings(settings, make_engine()).with_event_bus(events_clone);
            publish(&status_clone, &metronome);
            info!("Playback thread started");

            loop {
                let received = match metronome.next_deadline() {
                    Some(deadline) => cmd_receiver.recv_deadline(deadline),
                    None => cmd_receiver.recv().map_err(|_| RecvTimeoutError::Disconnected),
                };

                match received {
                    Ok(Command::Quit) | Err(RecvTimeoutError::Disconnected) => break,
                    Ok(command) => {
                        debug!("Command: {:?}", command);
                        metronome.apply(command);
                    }
                    Err(RecvTimeoutError::Timeout) => {}
                }

                metronome.advance();
                publish(&status_clone, &metronome);
            }

            metronome.stop();
            publish(&status_clone, &metronome);
            info!("Playback thread shutting down");
        });

        Self {
            cmd_sender,
            status,
            events,
            thread_handle: Some(thread_handle),
        }
    }

    /// Queue a command; false once the playback thread is gone
    pub fn send(&self, command: Command) -> bool {
        match self.cmd_sender.send(command) {
            Ok(()) => true,
            Err(e) => {
                warn!("Playback thread is gone, dropped {:?}", e.into_inner());
                false
            }
        }
    }

    pub fn status(&self) -> MetronomeStatus {
        match self.status.lock() {
            Ok(status) => status.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn events(&self) -> SharedEventBus {
        Arc::clone(&self.events)
    }

    /// Stop playback and wait for the thread to exit
    pub fn shutdown(&mut self) {
        if let Some(handle) = self.thread_handle.take() {
            let _ = self.cmd_sender.send(Command::Quit);
            if handle.join().is_err() {
                error!("Playback thread panicked");
            }
        }
    }
}

impl Drop for MetronomeRunner {
    fn drop(&mut self) {
        self.shutdown();
    }
}
