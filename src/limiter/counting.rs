//! Async counting limiter
//!
//! Bounds how many units of one kind of work are in flight. `add` suspends
//! the caller until `current + n < max`; `sub` gives units back and wakes
//! waiters, each of which re-checks its own condition.

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::Notify;

/// Counting semaphore with a strict upper bound
///
/// Admission requires `current + n < max`, so a limiter built with
/// `new(max)` lets at most `max - 1` single units through. Use
/// [`CountingLimiter::with_concurrency`] to size it by the number of
/// concurrent units instead.
#[derive(Debug)]
pub struct CountingLimiter {
    max: i64,
    current: Mutex<i64>,
    changed: Notify,
}

impl CountingLimiter {
    #[must_use]
    pub fn new(max: i64) -> Self {
        Self {
            max,
            current: Mutex::new(0),
            changed: Notify::new(),
        }
    }

    /// Limiter admitting exactly `units` concurrent single-unit holders
    #[must_use]
    pub fn with_concurrency(units: usize) -> Self {
        let units = i64::try_from(units).unwrap_or(i64::MAX - 1);
        Self::new(units.saturating_add(1))
    }

    fn try_add(&self, n: i64) -> bool {
        let mut current = self.current.lock();
        if *current + n >= self.max {
            return false;
        }
        *current += n;
        true
    }

    /// Take `n` units, waiting until they fit under the bound
    pub async fn add(&self, n: i64) {
        loop {
            // Register before checking so a `sub` between the check and the
            // await still wakes us.
            let notified = self.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.try_add(n) {
                return;
            }
            notified.await;
        }
    }

    /// Give back `n` units
    ///
    /// # Panics
    ///
    /// Panics if `n` exceeds the units currently held. That is a bookkeeping
    /// bug in the caller and the admission contract can no longer be trusted.
    pub fn sub(&self, n: i64) {
        {
            let mut current = self.current.lock();
            if *current < n {
                panic!(
                    "counting limiter released {n} units with only {} acquired",
                    *current
                );
            }
            *current -= n;
        }
        self.changed.notify_waiters();
    }

    /// Take `n` units and hold them until the returned permit drops
    pub async fn acquire(self: &Arc<Self>, n: i64) -> LimiterPermit {
        self.add(n).await;
        LimiterPermit {
            limiter: Arc::clone(self),
            units: n,
        }
    }

    #[must_use]
    pub fn current(&self) -> i64 {
        *self.current.lock()
    }

    #[must_use]
    pub fn max(&self) -> i64 {
        self.max
    }
}

/// Units held on a [`CountingLimiter`], given back exactly once on drop
#[derive(Debug)]
#[must_use = "units are released as soon as the permit is dropped"]
pub struct LimiterPermit {
    limiter: Arc<CountingLimiter>,
    units: i64,
}

impl LimiterPermit {
    #[must_use]
    pub fn units(&self) -> i64 {
        self.units
    }
}

impl Drop for LimiterPermit {
    fn drop(&mut self) {
        self.limiter.sub(self.units);
    }
}
