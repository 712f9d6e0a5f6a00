use std::time::{Duration, Instant};

/// Decide whether a progress line is due.
///
/// Returns true and advances `last_emitted` when at least `interval` has
/// elapsed since the previous emission.
pub fn throttled(last_emitted: &mut Instant, interval: Duration) -> bool {
    let now = Instant::now();
    if now.duration_since(*last_emitted) > interval {
        *last_emitted = now;
        true
    } else {
        false
    }
}

/// Rate limited progress reporting for long loops.
///
/// Holds its own "last emitted" state, so unrelated loops never share a timer.
pub struct ProgressLog {
    last_emitted: Instant,
    interval: Duration,
}

impl ProgressLog {
    /// Create a progress log that emits at most once per `interval`
    pub fn new(interval: Duration) -> Self {
        Self { last_emitted: Instant::now(), interval }
    }

    /// Run `emit` if a line is due
    pub fn tick<F: FnOnce()>(&mut self, emit: F) {
        if throttled(&mut self.last_emitted, self.interval) {
            emit();
        }
    }
}
