//! Protocol time.
//!
//! Every deadline in the engine (WTR, hold-off, Rx/Tx, dFOP-NR) and every
//! history timestamp is taken from a [`Clock`], so tests and the simulator
//! can drive protocol time explicitly.

use std::fmt::Debug;
use std::time::Instant;

/// Source of monotonic time for an engine.
pub trait Clock: Send + Sync + Debug {
    /// Current monotonic `Instant`.
    fn now(&self) -> Instant;

    /// Whole milliseconds from `epoch` to now; zero if `epoch` is in the future.
    fn millis_since(&self, epoch: Instant) -> u64 {
        u64::try_from(self.now().saturating_duration_since(epoch).as_millis()).unwrap_or(u64::MAX)
    }
}

/// Wall-clock time from the operating system.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Manually driven clock for deterministic runs.
pub mod mock_clock {
    use super::*;
    use std::sync::{Mutex, MutexGuard, PoisonError};
    use std::time::Duration;

    /// A clock that only moves when told to. Shareable between the two
    /// ends of a simulated span.
    #[derive(Debug)]
    pub struct MockClock {
        now: Mutex<Instant>,
    }

    impl MockClock {
        /// Creates a clock frozen at `start`.
        pub fn new(start: Instant) -> Self {
            Self {
                now: Mutex::new(start),
            }
        }

        fn guard(&self) -> MutexGuard<'_, Instant> {
            self.now.lock().unwrap_or_else(PoisonError::into_inner)
        }

        /// Moves time forward by `duration`.
        pub fn advance(&self, duration: Duration) {
            *self.guard() += duration;
        }

        /// Jumps to `instant`. Moving backwards is allowed; timers already
        /// armed keep their deadlines.
        pub fn set_time(&self, instant: Instant) {
            *self.guard() = instant;
        }

        /// Moves time forward to `deadline`, or not at all if it has passed.
        ///
        /// # Returns
        /// How far the clock moved.
        pub fn advance_to(&self, deadline: Instant) -> Duration {
            let mut now = self.guard();
            let step = deadline.saturating_duration_since(*now);
            *now += step;
            step
        }
    }

    impl Default for MockClock {
        fn default() -> Self {
            Self::new(Instant::now())
        }
    }

    impl Clock for MockClock {
        fn now(&self) -> Instant {
            *self.guard()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock_clock::MockClock;
    use super::*;
    use std::time::Duration;

    #[test]
    fn uptime_follows_mock_clock() {
        let epoch = Instant::now();
        let clock = MockClock::new(epoch);
        assert_eq!(clock.millis_since(epoch), 0);

        clock.advance(Duration::from_millis(17_500));
        assert_eq!(clock.millis_since(epoch), 17_500);

        clock.set_time(epoch + Duration::from_secs(300));
        assert_eq!(clock.millis_since(epoch), 300_000);
        assert_eq!(clock.millis_since(epoch + Duration::from_secs(400)), 0);
    }

    #[test]
    fn advance_to_never_goes_backwards() {
        let start = Instant::now();
        let clock = MockClock::new(start);

        let wtr = start + Duration::from_secs(10);
        assert_eq!(clock.advance_to(wtr), Duration::from_secs(10));
        assert_eq!(clock.now(), wtr);

        assert_eq!(clock.advance_to(start), Duration::ZERO);
        assert_eq!(clock.now(), wtr);
    }
}
