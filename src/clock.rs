#[cfg(test)]
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// Monotonic time source, in seconds.
pub trait Clock {
    fn now(&self) -> f64;
}

/// Host monotonic clock. Time zero is the moment the clock was created.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }
}

/// Clock that only moves when told to. Clones share the same time, so a
/// test can keep one handle and give another to a filter.
#[cfg(test)]
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    time: Arc<Mutex<f64>>,
}

#[cfg(test)]
impl ManualClock {
    pub fn new(start: f64) -> Self {
        Self {
            time: Arc::new(Mutex::new(start)),
        }
    }

    pub fn set(&self, seconds: f64) {
        *self.time.lock().expect("Could not lock") = seconds;
    }

    pub fn advance(&self, seconds: f64) {
        *self.time.lock().expect("Could not lock") += seconds;
    }
}

#[cfg(test)]
impl Clock for ManualClock {
    fn now(&self) -> f64 {
        *self.time.lock().expect("Could not lock")
    }
}
