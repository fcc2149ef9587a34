//! Phase timing for evaluations.

use std::time::{Duration, Instant};

/// Adds the time between its creation and its drop to `slot`.
///
/// ```rust,ignore
/// let mut scope = Duration::ZERO;
/// {
///     let _timer = PhaseTimer::new(&mut scope);
///     // ... matched work ...
/// }
/// ```
pub struct PhaseTimer<'a> {
    start: Instant,
    slot: &'a mut Duration,
}

impl<'a> PhaseTimer<'a> {
    pub fn new(slot: &'a mut Duration) -> Self {
        Self {
            start: Instant::now(),
            slot,
        }
    }
}

impl Drop for PhaseTimer<'_> {
    fn drop(&mut self) {
        *self.slot += self.start.elapsed();
    }
}

/// Milliseconds as a float, the unit phases are reported in.
pub(crate) fn as_ms(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}
