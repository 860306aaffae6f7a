use crate::util::clock::Clock;
use chrono::{DateTime, TimeDelta, Utc};
use std::sync::{Arc, Mutex};

/// A [Clock] that only moves when told to.
///
/// Clones share the same time, so a test can keep one handle and pass another one into the code
/// under test.
#[derive(Debug, Clone)]
pub struct ControlledClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ControlledClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        ControlledClock {
            now: Arc::new(Mutex::new(now)),
        }
    }

    pub fn advance_by(&self, duration: TimeDelta) {
        let mut now = self.now.lock().unwrap();
        *now += duration;
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap() = now;
    }
}

impl Clock for ControlledClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}
