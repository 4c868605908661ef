// Hand-driven clock for tests; built only with `test-util`

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use log::warn;

use crate::Clock;

/// A clock that only moves when told to. Clones share the same time.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<Instant>>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Arc::new(Mutex::new(Instant::now())),
        }
    }

    pub fn advance(&self, by: Duration) {
        match self.now.lock() {
            Ok(mut now) => *now += by,
            Err(e) => warn!("Manual clock lock poisoned: {}", e),
        }
    }

    pub fn set(&self, to: Instant) {
        match self.now.lock() {
            Ok(mut now) => *now = to,
            Err(e) => warn!("Manual clock lock poisoned: {}", e),
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        match self.now.lock() {
            Ok(now) => *now,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}
