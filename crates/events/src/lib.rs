// Event system for the metronome
// Components emit events here; the UI and the power-management hook subscribe

use std::sync::{Arc, Mutex};
use log::warn;

/// Event type for the metronome core
#[derive(Debug, Clone, PartialEq)]
pub enum MetronomeEvent {
    /// A slot was evaluated; `channel` is the row that sounded, if any
    SlotPlayed {
        slot: usize,
        beat: usize,
        subdivision: usize,
        channel: Option<u32>,
    },

    /// Playback state changed (is_running)
    PlaybackStateChanged(bool),

    /// Tempo changed (bpm, subdivision, beats_per_measure, speed_percentage)
    TempoChanged {
        bpm: u32,
        subdivision: u32,
        beats_per_measure: u32,
        speed_percentage: u32,
    },

    /// Pattern rows changed (toggle, resize, channel added or removed)
    PatternChanged,

    /// Sound parameters of a channel changed
    SoundChanged(u32),

    /// The session countdown ran out and stopped playback
    TimerExpired,
}

type Listener = Arc<dyn Fn(&MetronomeEvent) + Send + Sync>;

/// A simple event bus implementation
pub struct EventBus {
    listeners: Arc<Mutex<Vec<Listener>>>,
}

impl EventBus {
    /// Create a new event bus
    pub fn new() -> Self {
        Self {
            listeners: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Subscribe to events, returns the listener id
    pub fn subscribe<F>(&self, listener: F) -> usize
    where
        F: Fn(&MetronomeEvent) + Send + Sync + 'static,
    {
        match self.listeners.lock() {
            Ok(mut listeners) => {
                let id = listeners.len();
                listeners.push(Arc::new(listener));
                id
            }
            Err(_) => {
                warn!("Event bus lock poisoned, listener dropped");
                usize::MAX
            }
        }
    }

    /// Emit an event to all listeners.
    ///
    /// Listeners run on a snapshot taken before dispatch, so a listener may
    /// subscribe (or emit) without deadlocking. A listener added that way
    /// first hears the next event.
    pub fn emit(&self, event: MetronomeEvent) {
        let listeners: Vec<Listener> = match self.listeners.lock() {
            Ok(listeners) => listeners.clone(),
            Err(_) => {
                warn!("Event bus lock poisoned, {:?} dropped", event);
                return;
            }
        };
        for listener in &listeners {
            listener(&event);
        }
    }

    /// Number of registered listeners
    pub fn listener_count(&self) -> usize {
        self.listeners.lock().map(|l| l.len()).unwrap_or(0)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// A reference counted, thread-safe event bus
pub type SharedEventBus = Arc<EventBus>;

impl Clone for EventBus {
    fn clone(&self) -> Self {
        Self {
            listeners: Arc::clone(&self.listeners),
        }
    }
}

/// Tracks the running flag from `PlaybackStateChanged` events.
///
/// This is the observable signal a display-stay-awake hook listens to.
#[derive(Clone, Default)]
pub struct RunningSignal {
    running: Arc<Mutex<bool>>,
}

impl RunningSignal {
    /// Attach a new signal to the bus
    pub fn attach(bus: &EventBus) -> Self {
        let signal = Self::default();
        let running = Arc::clone(&signal.running);
        bus.subscribe(move |event| {
            if let MetronomeEvent::PlaybackStateChanged(is_running) = event {
                if let Ok(mut flag) = running.lock() {
                    *flag = *is_running;
                }
            }
        });
        signal
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().map(|f| *f).unwrap_or(false)
    }
}
