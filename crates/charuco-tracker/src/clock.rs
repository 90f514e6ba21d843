//! Time sources for settle timing and sample timestamps.

use chrono::{DateTime, Local};
use std::cell::Cell;
use std::rc::Rc;
use std::time::{Duration, Instant};

/// Monotonic session time plus the wall-clock time used for timestamps.
pub trait Clock {
    /// Time since the clock was created.
    fn elapsed(&self) -> Duration;

    /// Current wall-clock time.
    fn wall_time(&self) -> DateTime<Local>;
}

impl<C: Clock + ?Sized> Clock for &C {
    fn elapsed(&self) -> Duration {
        (**self).elapsed()
    }

    fn wall_time(&self) -> DateTime<Local> {
        (**self).wall_time()
    }
}

impl<C: Clock + ?Sized> Clock for Rc<C> {
    fn elapsed(&self) -> Duration {
        (**self).elapsed()
    }

    fn wall_time(&self) -> DateTime<Local> {
        (**self).wall_time()
    }
}

/// The real clock.
#[derive(Clone, Copy, Debug)]
pub struct SystemClock {
    started: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    fn wall_time(&self) -> DateTime<Local> {
        Local::now()
    }
}

/// A clock that only moves when told to.
///
/// Wall time is `epoch + elapsed`, so timestamps stay consistent with the
/// simulated monotonic time.
#[derive(Debug)]
pub struct ManualClock {
    epoch: DateTime<Local>,
    now: Cell<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::starting_at(Local::now())
    }

    pub fn starting_at(epoch: DateTime<Local>) -> Self {
        Self {
            epoch,
            now: Cell::new(Duration::ZERO),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.now.set(self.now.get() + by);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn elapsed(&self) -> Duration {
        self.now.get()
    }

    fn wall_time(&self) -> DateTime<Local> {
        let offset = chrono::Duration::from_std(self.now.get())
            .unwrap_or_else(|_| chrono::Duration::zero());
        self.epoch + offset
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_moves_wall_time_with_elapsed() {
        let clock = ManualClock::new();
        let start = clock.wall_time();
        clock.advance(Duration::from_millis(1500));
        assert_eq!(clock.elapsed(), Duration::from_millis(1500));
        assert_eq!((clock.wall_time() - start).num_milliseconds(), 1500);
    }

    #[test]
    fn shared_clock_sees_advances() {
        let clock = Rc::new(ManualClock::new());
        let shared = clock.clone();
        clock.advance(Duration::from_secs(2));
        assert_eq!(Clock::elapsed(&shared), Duration::from_secs(2));
    }
}
