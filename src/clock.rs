//! Abstract time source.
//!
//! Every time-dependent component depends on a `Clock` instead of reading
//! the wall clock directly, so the virtual implementation below can drive
//! deterministic tests without real sleeps.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::Notify;

/// A cancellable one-shot timer signal returned by `Clock::after`.
pub struct Sleep {
    inner: SleepInner,
}

enum SleepInner {
    Real(std::pin::Pin<Box<tokio::time::Sleep>>),
    Virtual {
        deadline: Instant,
        shared: Arc<VirtualClockShared>,
    },
}

impl Sleep {
    /// Wait for the sleep to elapse or be cancelled. Returns `true` if the
    /// duration elapsed, `false` if cancelled via the given cancellation
    /// future resolving first.
    pub async fn wait(self) {
        match self.inner {
            SleepInner::Real(sleep) => sleep.await,
            SleepInner::Virtual { deadline, shared } => {
                loop {
                    if shared.now() >= deadline {
                        return;
                    }
                    shared.notify.notified().await;
                }
            }
        }
    }
}

/// Abstract time source. Real in production, virtual in tests. Every
/// time-dependent component — including wall-clock-stamped comparisons like
/// the grace-period guard — reads through this trait exclusively, never
/// `chrono::Utc::now()` directly, so the whole engine is drivable by
/// `VirtualClock::advance`.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;

    fn since(&self, t: Instant) -> Duration {
        self.now().saturating_duration_since(t)
    }

    /// Wall-clock equivalent of `now()`, for comparisons against timestamps
    /// the runtime reports (e.g. a container's `finishedAt`).
    fn wall_now(&self) -> DateTime<Utc>;

    /// Returns a future that resolves after `duration` has elapsed
    /// according to this clock.
    fn after(&self, duration: Duration) -> Sleep;
}

/// Production clock backed by `tokio::time`.
#[derive(Debug, Clone, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn wall_now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn after(&self, duration: Duration) -> Sleep {
        Sleep {
            inner: SleepInner::Real(Box::pin(tokio::time::sleep(duration))),
        }
    }
}

struct VirtualClockShared {
    now: Mutex<Instant>,
    /// Anchored to `now` at construction and advanced by the same deltas, so
    /// wall-clock comparisons move in lockstep with `Instant` ones.
    wall_anchor: DateTime<Utc>,
    instant_anchor: Instant,
    notify: Notify,
}

impl VirtualClockShared {
    fn now(&self) -> Instant {
        *self.now.lock()
    }

    fn wall_now(&self) -> DateTime<Utc> {
        let elapsed = self.now().saturating_duration_since(self.instant_anchor);
        self.wall_anchor + chrono::Duration::from_std(elapsed).unwrap_or(chrono::Duration::zero())
    }
}

/// Test clock whose `now()` only moves when `advance` is called explicitly.
#[derive(Clone)]
pub struct VirtualClock {
    shared: Arc<VirtualClockShared>,
}

impl VirtualClock {
    pub fn new() -> Self {
        let instant_anchor = Instant::now();
        Self {
            shared: Arc::new(VirtualClockShared {
                now: Mutex::new(instant_anchor),
                wall_anchor: Utc::now(),
                instant_anchor,
                notify: Notify::new(),
            }),
        }
    }

    /// Move time forward, waking any pending `after()` sleeps whose
    /// deadline has now passed.
    pub fn advance(&self, duration: Duration) {
        {
            let mut now = self.shared.now.lock();
            *now += duration;
        }
        self.shared.notify.notify_waiters();
    }
}

impl Default for VirtualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for VirtualClock {
    fn now(&self) -> Instant {
        self.shared.now()
    }

    fn wall_now(&self) -> DateTime<Utc> {
        self.shared.wall_now()
    }

    fn after(&self, duration: Duration) -> Sleep {
        Sleep {
            inner: SleepInner::Virtual {
                deadline: self.now() + duration,
                shared: self.shared.clone(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn virtual_clock_after_resolves_on_advance() {
        let clock = VirtualClock::new();
        let start = clock.now();

        let sleep = clock.after(Duration::from_secs(5));
        let clock2 = clock.clone();
        tokio::spawn(async move {
            tokio::task::yield_now().await;
            clock2.advance(Duration::from_secs(5));
        });
        sleep.wait().await;

        assert!(clock.since(start) >= Duration::from_secs(5));
    }

    #[test]
    fn virtual_clock_does_not_advance_on_its_own() {
        let clock = VirtualClock::new();
        let t0 = clock.now();
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(clock.now(), t0);
    }

    #[test]
    fn wall_now_advances_in_lockstep_with_now() {
        let clock = VirtualClock::new();
        let wall0 = clock.wall_now();
        clock.advance(Duration::from_secs(300));
        assert_eq!((clock.wall_now() - wall0).num_seconds(), 300);
    }
}
