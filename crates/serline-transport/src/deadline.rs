//! Monotonic deadlines
//!
//! A [`Deadline`] is a single timeout window. It is created once per logical
//! operation (a `read`, a `write`, a whole `read_until`) and queried for the
//! time that is left, so that nested waits never extend the outer window.
//!
//! The duration follows the usual serial conventions:
//!
//! - `None` waits forever
//! - `Some(Duration::ZERO)` is non-blocking
//! - anything else expires that long after construction

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Source of the current instant
pub trait Clock {
    /// The current point in time
    fn now(&self) -> Instant;
}

/// The process monotonic clock
#[derive(Debug, Clone, Copy, Default)]
pub struct MonotonicClock;

impl Clock for MonotonicClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now(&self) -> Instant {
        (**self).now()
    }
}

impl<C: Clock + ?Sized> Clock for Arc<C> {
    fn now(&self) -> Instant {
        (**self).now()
    }
}

/// A clock that only moves when told to
///
/// Clones share the same time, so a test can keep one handle and give
/// another to the deadline under test.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<Instant>>,
}

impl ManualClock {
    /// Start at the current real instant
    pub fn new() -> Self {
        Self {
            now: Arc::new(Mutex::new(Instant::now())),
        }
    }

    /// Move time forward
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now += by;
    }

    /// Move time backward, as a misbehaving clock source would
    ///
    /// Saturates at the earliest instant the platform can represent
    /// relative to the current one.
    pub fn rewind(&self, by: Duration) {
        let mut now = self.now.lock();
        if let Some(earlier) = now.checked_sub(by) {
            *now = earlier;
        }
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock()
    }
}

/// A single timeout window
#[derive(Debug, Clone)]
pub struct Deadline<C: Clock = MonotonicClock> {
    clock: C,
    duration: Option<Duration>,
    target: Option<Instant>,
}

impl Deadline<MonotonicClock> {
    /// Start a deadline on the monotonic clock
    pub fn new(duration: Option<Duration>) -> Self {
        Self::with_clock(duration, MonotonicClock)
    }
}

impl<C: Clock> Deadline<C> {
    /// Start a deadline on a specific clock
    pub fn with_clock(duration: Option<Duration>, clock: C) -> Self {
        let target = Self::target_for(&clock, duration);
        Self {
            clock,
            duration,
            target,
        }
    }

    // A window too large for the platform instant behaves as infinite.
    fn target_for(clock: &C, duration: Option<Duration>) -> Option<Instant> {
        duration.and_then(|d| clock.now().checked_add(d))
    }

    /// The configured duration
    pub fn duration(&self) -> Option<Duration> {
        self.duration
    }

    /// Whether this deadline never expires
    pub fn is_infinite(&self) -> bool {
        self.target.is_none()
    }

    /// Whether this deadline is expired from the start
    pub fn is_non_blocking(&self) -> bool {
        self.duration == Some(Duration::ZERO)
    }

    /// Whether the window has closed
    pub fn expired(&mut self) -> bool {
        !self.is_infinite() && self.time_left() == Some(Duration::ZERO)
    }

    /// Time remaining in the window, `None` if infinite
    ///
    /// Never more than the configured duration: if the clock appears to have
    /// jumped backward, the window is re-anchored at the current instant.
    pub fn time_left(&mut self) -> Option<Duration> {
        let (duration, target) = match (self.duration, self.target) {
            (Some(d), Some(t)) => (d, t),
            _ => return None,
        };
        if duration.is_zero() {
            return Some(Duration::ZERO);
        }

        let now = self.clock.now();
        let left = target.saturating_duration_since(now);
        if left > duration {
            self.target = now.checked_add(duration);
            return Some(duration);
        }
        Some(left)
    }

    /// Open a fresh window of `duration` starting now
    pub fn restart(&mut self, duration: Option<Duration>) {
        self.duration = duration;
        self.target = Self::target_for(&self.clock, duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manual(duration: Option<Duration>) -> (ManualClock, Deadline<ManualClock>) {
        let clock = ManualClock::new();
        let deadline = Deadline::with_clock(duration, clock.clone());
        (clock, deadline)
    }

    #[test]
    fn test_finite_deadline_expires() {
        let (clock, mut deadline) = manual(Some(Duration::from_millis(500)));

        assert!(!deadline.expired());
        assert_eq!(deadline.time_left(), Some(Duration::from_millis(500)));

        clock.advance(Duration::from_millis(200));
        assert_eq!(deadline.time_left(), Some(Duration::from_millis(300)));
        assert!(!deadline.expired());

        clock.advance(Duration::from_millis(300));
        assert!(deadline.expired());
        assert_eq!(deadline.time_left(), Some(Duration::ZERO));

        clock.advance(Duration::from_secs(10));
        assert_eq!(deadline.time_left(), Some(Duration::ZERO));
    }

    #[test]
    fn test_non_blocking() {
        let (clock, mut deadline) = manual(Some(Duration::ZERO));

        assert!(deadline.is_non_blocking());
        assert!(deadline.expired());
        assert_eq!(deadline.time_left(), Some(Duration::ZERO));

        clock.rewind(Duration::from_secs(5));
        assert_eq!(deadline.time_left(), Some(Duration::ZERO));
        assert!(deadline.expired());
    }

    #[test]
    fn test_infinite() {
        let (clock, mut deadline) = manual(None);

        assert!(deadline.is_infinite());
        assert!(!deadline.expired());
        assert_eq!(deadline.time_left(), None);

        clock.advance(Duration::from_secs(3600));
        assert!(!deadline.expired());
        assert_eq!(deadline.time_left(), None);
    }

    #[test]
    fn test_backward_jump_reanchors() {
        let (clock, mut deadline) = manual(Some(Duration::from_secs(1)));
        clock.advance(Duration::from_secs(10));
        let mut deadline_late = Deadline::with_clock(Some(Duration::from_secs(1)), clock.clone());

        // Jump back past the start of the window.
        clock.rewind(Duration::from_secs(5));
        assert_eq!(deadline_late.time_left(), Some(Duration::from_secs(1)));

        // The window now runs from the rewound instant.
        clock.advance(Duration::from_millis(400));
        assert_eq!(deadline_late.time_left(), Some(Duration::from_millis(600)));

        // The first deadline was long expired and stays that way.
        assert!(deadline.expired());
    }

    #[test]
    fn test_small_backward_jump_keeps_target() {
        let (clock, mut deadline) = manual(Some(Duration::from_secs(2)));
        clock.advance(Duration::from_millis(1500));
        clock.rewind(Duration::from_millis(500));

        // Still inside the original window, so nothing is recomputed.
        assert_eq!(deadline.time_left(), Some(Duration::from_secs(1)));
    }

    #[test]
    fn test_restart() {
        let (clock, mut deadline) = manual(Some(Duration::from_millis(100)));
        clock.advance(Duration::from_millis(150));
        assert!(deadline.expired());

        deadline.restart(Some(Duration::from_millis(250)));
        assert!(!deadline.expired());
        assert_eq!(deadline.duration(), Some(Duration::from_millis(250)));
        assert_eq!(deadline.time_left(), Some(Duration::from_millis(250)));

        deadline.restart(None);
        assert!(deadline.is_infinite());
    }

    #[test]
    fn test_overflowing_duration_is_infinite() {
        let mut deadline = Deadline::new(Some(Duration::MAX));
        assert!(deadline.is_infinite());
        assert!(!deadline.expired());
    }

    #[test]
    fn test_real_clock_expiry() {
        let mut deadline = Deadline::new(Some(Duration::from_millis(20)));
        assert!(!deadline.expired());
        std::thread::sleep(Duration::from_millis(40));
        assert!(deadline.expired());
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        #[derive(Debug, Clone)]
        enum Step {
            Advance(u64),
            Rewind(u64),
        }

        fn step() -> impl Strategy<Value = Step> {
            prop_oneof![
                (0u64..5_000).prop_map(Step::Advance),
                (0u64..5_000).prop_map(Step::Rewind),
            ]
        }

        proptest! {
            #[test]
            fn time_left_stays_within_window(
                duration_ms in 1u64..3_000,
                steps in prop::collection::vec(step(), 1..20)
            ) {
                let duration = Duration::from_millis(duration_ms);
                let clock = ManualClock::new();
                // Leave room to rewind without hitting the platform floor.
                clock.advance(Duration::from_secs(1_000));
                let mut deadline = Deadline::with_clock(Some(duration), clock.clone());

                for s in steps {
                    match s {
                        Step::Advance(ms) => clock.advance(Duration::from_millis(ms)),
                        Step::Rewind(ms) => clock.rewind(Duration::from_millis(ms)),
                    }
                    let left = deadline.time_left().unwrap();
                    prop_assert!(left <= duration);
                }
            }
        }
    }
}
