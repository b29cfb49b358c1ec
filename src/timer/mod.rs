//! Timer / Expiry engine (§4.4): a cooperative, cancellable wait on a
//! condition variable, backed by the timer `WorkerPool`.
//!
//! Grounded in the original implementation's `Timer` component
//! (condvar + mutex-guarded stop flag, `startTimer`/`killTimer`), expressed
//! with `std::sync::{Mutex, Condvar}` instead of raw pthread primitives.

use crate::worker_pool::WorkerPool;
use log::{trace, warn};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

struct Inner {
    state: Mutex<bool>,
    cv: Condvar,
}

/// One request's timer (§3 `Timer`). Cloning shares the same underlying
/// kill switch, which is how `kill()` reaches a task already running on the
/// worker pool.
#[derive(Clone)]
pub struct Timer {
    inner: Arc<Inner>,
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

impl Timer {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(false),
                cv: Condvar::new(),
            }),
        }
    }

    /// Starts the timer for `duration_ms` milliseconds, firing `on_fire` on
    /// the given worker pool. Returns `false` for `0` or any value `< -1`
    /// (per §4.4); `-1` arms no timer and returns `true` ("no expiry").
    /// Recurring timers re-arm the wait after each fire until killed.
    pub fn start(
        &self,
        duration_ms: i64,
        recurring: bool,
        pool: &WorkerPool,
        mut on_fire: impl FnMut() + Send + 'static,
    ) -> bool {
        if duration_ms == -1 {
            return true;
        }
        if duration_ms == 0 || duration_ms < -1 {
            return false;
        }

        // A prior `kill()` on this same `Timer` (e.g. a retune re-arming the
        // request's one `Timer` instance) leaves the flag set; without this
        // reset the freshly spawned wait sees `killed == true` immediately
        // and exits without ever firing.
        *self.inner.state.lock().unwrap() = false;

        let inner = self.inner.clone();
        let duration = Duration::from_millis(duration_ms as u64);
        let submitted = pool.enqueue(move || loop {
            let guard = inner.state.lock().unwrap();
            let (guard, result) = inner
                .cv
                .wait_timeout_while(guard, duration, |killed| !*killed)
                .unwrap();
            let killed = *guard;
            drop(guard);

            if killed {
                trace!("timer killed before firing");
                break;
            }
            // `wait_timeout_while` only returns with `killed == false` once
            // the full duration has elapsed without a wake-up, so this is
            // always a natural fire, never both fired-and-cancelled.
            debug_assert!(result.timed_out());
            on_fire();

            if !recurring {
                break;
            }
        });

        if submitted.is_err() {
            warn!("failed to submit timer task: worker pool overloaded");
            return false;
        }
        true
    }

    /// Sets the cancel flag and wakes the cv. `on_fire` will not run after
    /// this call has been observed by the waiting task (§4.4).
    pub fn kill(&self) {
        let mut guard = self.inner.state.lock().unwrap();
        *guard = true;
        drop(guard);
        self.inner.cv.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration as StdDuration;

    #[test]
    fn negative_one_arms_nothing_but_reports_success() {
        let timer = Timer::new();
        let pool = WorkerPool::new("t", 2, 2, 8);
        assert!(timer.start(-1, false, &pool, || {}));
    }

    #[test]
    fn zero_and_below_minus_one_are_rejected() {
        let timer = Timer::new();
        let pool = WorkerPool::new("t", 2, 2, 8);
        assert!(!timer.start(0, false, &pool, || {}));
        assert!(!timer.start(-2, false, &pool, || {}));
    }

    #[test]
    fn fires_once_after_duration() {
        let timer = Timer::new();
        let pool = WorkerPool::new("t", 2, 2, 8);
        let fires = Arc::new(AtomicUsize::new(0));
        let fires2 = fires.clone();
        assert!(timer.start(30, false, &pool, move || {
            fires2.fetch_add(1, Ordering::AcqRel);
        }));
        std::thread::sleep(StdDuration::from_millis(80));
        assert_eq!(fires.load(Ordering::Acquire), 1);
    }

    #[test]
    fn kill_before_fire_prevents_callback() {
        let timer = Timer::new();
        let pool = WorkerPool::new("t", 2, 2, 8);
        let fires = Arc::new(AtomicUsize::new(0));
        let fires2 = fires.clone();
        assert!(timer.start(100, false, &pool, move || {
            fires2.fetch_add(1, Ordering::AcqRel);
        }));
        std::thread::sleep(StdDuration::from_millis(10));
        timer.kill();
        std::thread::sleep(StdDuration::from_millis(150));
        assert_eq!(fires.load(Ordering::Acquire), 0);
    }

    #[test]
    fn restarting_after_kill_fires_again() {
        let timer = Timer::new();
        let pool = WorkerPool::new("t", 2, 2, 8);
        let fires = Arc::new(AtomicUsize::new(0));

        let fires2 = fires.clone();
        assert!(timer.start(100, false, &pool, move || {
            fires2.fetch_add(1, Ordering::AcqRel);
        }));
        timer.kill();

        // Re-arming the same `Timer` after a kill must not inherit the
        // stale kill flag.
        let fires3 = fires.clone();
        assert!(timer.start(30, false, &pool, move || {
            fires3.fetch_add(1, Ordering::AcqRel);
        }));
        std::thread::sleep(StdDuration::from_millis(80));
        assert_eq!(fires.load(Ordering::Acquire), 1);
    }

    #[test]
    fn recurring_timer_fires_then_kill_stops_it() {
        let timer = Timer::new();
        let pool = WorkerPool::new("t", 2, 2, 8);
        let fires = Arc::new(AtomicUsize::new(0));
        let fires2 = fires.clone();
        assert!(timer.start(60, true, &pool, move || {
            fires2.fetch_add(1, Ordering::AcqRel);
        }));
        std::thread::sleep(StdDuration::from_millis(140));
        timer.kill();
        let at_kill = fires.load(Ordering::Acquire);
        assert!((1..=3).contains(&at_kill));
        std::thread::sleep(StdDuration::from_millis(150));
        assert_eq!(fires.load(Ordering::Acquire), at_kill);
    }
}
