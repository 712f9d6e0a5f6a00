use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

/// A clock provider
pub trait Clock: Send + Sync {
    /// A duration since the UNIX epoch
    fn now(&self) -> Duration;

    /// Seconds since the UNIX epoch
    fn now_secs(&self) -> u64 {
        self.now().as_secs()
    }
}

/// A clock provider using the std::time::SystemTime
pub struct StandardClock();

impl Clock for StandardClock {
    fn now(&self) -> Duration {
        SystemTime::now().duration_since(SystemTime::UNIX_EPOCH).unwrap_or_default()
    }
}

/// A clock provider with manually updated notion of "now"
#[derive(Clone)]
pub struct ManualClock(Arc<Mutex<Duration>>);

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        *self.0.lock().unwrap()
    }
}

impl ManualClock {
    /// Create a manual clock
    pub fn new(now: Duration) -> Self {
        ManualClock(Arc::new(Mutex::new(now)))
    }

    /// Set the current time as duration since the UNIX epoch
    pub fn set(&self, now: Duration) {
        *self.0.lock().unwrap() = now;
    }
}
