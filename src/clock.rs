//! Monotonic clock sources.
//!
//! The scheduler reads time only through [`Clock`]. [`MonotonicClock`] follows
//! the OS monotonic clock; [`ManualClock`] only advances when told to, which
//! keeps deadline and budget arithmetic deterministic and replayable.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Time source for deadline and budget arithmetic.
pub trait Clock: Send + Sync + 'static {
    /// Current time.
    fn now(&self) -> Instant;

    /// How long a waiter should sleep before `deadline` is due.
    ///
    /// `None` means real-time waiting is meaningless for this clock and the
    /// waiter should sleep until notified.
    fn timeout_until(&self, deadline: Instant) -> Option<Duration>;
}

impl<C: Clock> Clock for Arc<C> {
    #[inline]
    fn now(&self) -> Instant {
        (**self).now()
    }

    #[inline]
    fn timeout_until(&self, deadline: Instant) -> Option<Duration> {
        (**self).timeout_until(deadline)
    }
}

/// OS monotonic clock.
#[derive(Clone, Copy, Debug, Default)]
pub struct MonotonicClock;

impl Clock for MonotonicClock {
    #[inline]
    fn now(&self) -> Instant {
        Instant::now()
    }

    #[inline]
    fn timeout_until(&self, deadline: Instant) -> Option<Duration> {
        Some(deadline.saturating_duration_since(Instant::now()))
    }
}

/// Manually advanced clock.
///
/// Time is `base + offset`; the offset is monotonic and moves only through
/// [`advance_by`](Self::advance_by) / [`advance_to`](Self::advance_to).
#[derive(Debug)]
pub struct ManualClock {
    base: Instant,
    offset_ns: AtomicU64,
}

impl ManualClock {
    /// Create a clock whose epoch is the current instant.
    pub fn new() -> Self {
        Self::starting_at(Instant::now())
    }

    pub fn starting_at(base: Instant) -> Self {
        Self {
            base,
            offset_ns: AtomicU64::new(0),
        }
    }

    /// The instant the clock started at.
    #[inline]
    pub fn epoch(&self) -> Instant {
        self.base
    }

    /// Time elapsed since the epoch.
    #[inline]
    pub fn elapsed(&self) -> Duration {
        Duration::from_nanos(self.offset_ns.load(Ordering::Acquire))
    }

    /// Advance by a delta, saturating on overflow.
    pub fn advance_by(&self, dt: Duration) {
        let dt = u64::try_from(dt.as_nanos()).unwrap_or(u64::MAX);
        let _ = self
            .offset_ns
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |cur| {
                Some(cur.saturating_add(dt))
            });
    }

    /// Advance to an absolute instant. Moving backwards is a no-op.
    pub fn advance_to(&self, t: Instant) {
        let target = t.saturating_duration_since(self.base);
        let target = u64::try_from(target.as_nanos()).unwrap_or(u64::MAX);
        self.offset_ns.fetch_max(target, Ordering::AcqRel);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    #[inline]
    fn now(&self) -> Instant {
        self.base + self.elapsed()
    }

    #[inline]
    fn timeout_until(&self, _deadline: Instant) -> Option<Duration> {
        None
    }
}
