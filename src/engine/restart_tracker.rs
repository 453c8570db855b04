//! Per-container restart history, backoff schedule, budget, and circuit
//! state.
//!
//! Grounded on the crash-handling logic in the teacher's container monitor:
//! the same "record an attempt, double the backoff, cap it" shape, widened
//! here with a rolling restart-count window and an unhealthy-detection
//! counter that `container_monitor.rs` didn't need.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::clock::Clock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartReason {
    None,
    Backoff,
    Circuit,
}

#[derive(Debug, Clone)]
struct ContainerHistory {
    /// Restart timestamps within the rolling window, oldest first.
    restarts: Vec<Instant>,
    backoff_until: Option<Instant>,
    backoff_delay: Duration,
    circuit_open: bool,
    unhealthy_count: u32,
}

impl ContainerHistory {
    fn new() -> Self {
        Self {
            restarts: Vec::new(),
            backoff_until: None,
            backoff_delay: Duration::ZERO,
            circuit_open: false,
            unhealthy_count: 0,
        }
    }

    fn prune(&mut self, now: Instant, window: Duration) {
        self.restarts.retain(|t| now.saturating_duration_since(*t) <= window);
    }
}

/// Tunable numeric parameters. Defaults match §4.2's numeric semantics.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    pub initial_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
    pub window: Duration,
    /// 0 disables the budget (unlimited restarts).
    pub budget: u32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(10),
            multiplier: 2.0,
            max_delay: Duration::from_secs(300),
            window: Duration::from_secs(300),
            budget: 5,
        }
    }
}

struct Inner {
    config: TrackerConfig,
    histories: HashMap<String, ContainerHistory>,
    circuit_open_count: u64,
}

/// Thread-safe per-container restart bookkeeping. One instance is shared
/// across the whole process; all operations serialize on a single mutex,
/// matching §5's "RestartTracker serializes all its methods on one mutex".
#[derive(Clone)]
pub struct RestartTracker {
    clock: Arc<dyn Clock>,
    inner: Arc<Mutex<Inner>>,
}

impl RestartTracker {
    pub fn new(clock: Arc<dyn Clock>, config: TrackerConfig) -> Self {
        Self {
            clock,
            inner: Arc::new(Mutex::new(Inner {
                config,
                histories: HashMap::new(),
                circuit_open_count: 0,
            })),
        }
    }

    /// §4.2 `shouldRestart`.
    pub fn should_restart(&self, id: &str) -> (bool, RestartReason) {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        let window = inner.config.window;
        let budget = inner.config.budget;
        let history = inner
            .histories
            .entry(id.to_string())
            .or_insert_with(ContainerHistory::new);

        history.prune(now, window);

        if history.circuit_open {
            return (false, RestartReason::Circuit);
        }

        if let Some(until) = history.backoff_until {
            if now < until {
                return (false, RestartReason::Backoff);
            }
        }

        if budget > 0 && history.restarts.len() as u32 >= budget {
            history.circuit_open = true;
            inner.circuit_open_count += 1;
            return (false, RestartReason::Circuit);
        }

        (true, RestartReason::None)
    }

    /// §4.2 `recordRestart`.
    pub fn record_restart(&self, id: &str) {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        let multiplier = inner.config.multiplier;
        let max_delay = inner.config.max_delay;
        let initial_delay = inner.config.initial_delay;
        let history = inner
            .histories
            .entry(id.to_string())
            .or_insert_with(ContainerHistory::new);

        history.restarts.push(now);

        history.backoff_delay = if history.backoff_delay.is_zero() {
            initial_delay
        } else {
            let scaled = history.backoff_delay.mul_f64(multiplier);
            scaled.min(max_delay)
        };
        history.backoff_until = Some(now + history.backoff_delay);
    }

    /// §4.2 `recordUnhealthy`. Returns true once `threshold` is reached.
    pub fn record_unhealthy(&self, id: &str, threshold: u32) -> bool {
        let mut inner = self.inner.lock();
        let history = inner
            .histories
            .entry(id.to_string())
            .or_insert_with(ContainerHistory::new);
        history.unhealthy_count += 1;
        history.unhealthy_count >= threshold
    }

    /// §4.2 `resetUnhealthy`.
    pub fn reset_unhealthy(&self, id: &str) {
        if let Some(history) = self.inner.lock().histories.get_mut(id) {
            history.unhealthy_count = 0;
        }
    }

    /// §4.2 `reset` — drops the history entry entirely.
    pub fn reset(&self, id: &str) {
        self.inner.lock().histories.remove(id);
    }

    pub fn is_circuit_open(&self, id: &str) -> bool {
        self.inner
            .lock()
            .histories
            .get(id)
            .map(|h| h.circuit_open)
            .unwrap_or(false)
    }

    pub fn backoff_remaining(&self, id: &str) -> Duration {
        let now = self.clock.now();
        self.inner
            .lock()
            .histories
            .get(id)
            .and_then(|h| h.backoff_until)
            .map(|until| until.saturating_duration_since(now))
            .unwrap_or(Duration::ZERO)
    }

    pub fn circuit_open_count(&self) -> u64 {
        self.inner.lock().circuit_open_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::VirtualClock;

    fn tracker(config: TrackerConfig) -> (RestartTracker, VirtualClock) {
        let clock = VirtualClock::new();
        let tracker = RestartTracker::new(Arc::new(clock.clone()), config);
        (tracker, clock)
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let (t, clock) = tracker(TrackerConfig {
            initial_delay: Duration::from_secs(10),
            multiplier: 2.0,
            max_delay: Duration::from_secs(300),
            window: Duration::from_secs(3600),
            budget: 0,
        });

        let expected = [10u64, 20, 40, 80, 160, 300, 300];
        for exp in expected {
            let (allowed, reason) = t.should_restart("c1");
            assert!(allowed, "expected allowed before restart {}", exp);
            assert_eq!(reason, RestartReason::None);
            t.record_restart("c1");
            assert_eq!(t.backoff_remaining("c1"), Duration::from_secs(exp));
            clock.advance(Duration::from_secs(exp) + Duration::from_secs(1));
        }
    }

    #[test]
    fn budget_opens_circuit_and_reason_is_circuit_not_backoff() {
        let (t, clock) = tracker(TrackerConfig {
            initial_delay: Duration::from_secs(1),
            multiplier: 1.0,
            max_delay: Duration::from_secs(1),
            window: Duration::from_secs(600),
            budget: 2,
        });

        for _ in 0..2 {
            let (allowed, reason) = t.should_restart("c1");
            assert!(allowed);
            assert_eq!(reason, RestartReason::None);
            t.record_restart("c1");
            clock.advance(Duration::from_millis(1500));
        }

        let (allowed, reason) = t.should_restart("c1");
        assert!(!allowed);
        assert_eq!(reason, RestartReason::Circuit);
        assert!(t.is_circuit_open("c1"));
        assert_eq!(t.circuit_open_count(), 1);
    }

    #[test]
    fn window_pruning_allows_restart_after_window_elapses() {
        let (t, clock) = tracker(TrackerConfig {
            initial_delay: Duration::from_secs(1),
            multiplier: 1.0,
            max_delay: Duration::from_secs(1),
            window: Duration::from_secs(300),
            budget: 2,
        });

        for _ in 0..2 {
            let (allowed, _) = t.should_restart("c1");
            assert!(allowed);
            t.record_restart("c1");
            clock.advance(Duration::from_millis(1500));
        }

        clock.advance(Duration::from_secs(301));

        let (allowed, reason) = t.should_restart("c1");
        assert!(allowed);
        assert_eq!(reason, RestartReason::None);
        assert!(!t.is_circuit_open("c1"));
    }

    #[test]
    fn reset_clears_backoff_and_history() {
        let (t, clock) = tracker(TrackerConfig::default());
        t.record_restart("c1");
        clock.advance(Duration::from_millis(500));
        assert!(t.backoff_remaining("c1") > Duration::ZERO);

        t.reset("c1");

        let (allowed, reason) = t.should_restart("c1");
        assert!(allowed);
        assert_eq!(reason, RestartReason::None);
        assert_eq!(t.backoff_remaining("c1"), Duration::ZERO);
    }

    #[test]
    fn record_unhealthy_reaches_threshold() {
        let (t, _clock) = tracker(TrackerConfig::default());
        assert!(!t.record_unhealthy("c1", 3));
        assert!(!t.record_unhealthy("c1", 3));
        assert!(t.record_unhealthy("c1", 3));
        t.reset_unhealthy("c1");
        assert!(!t.record_unhealthy("c1", 3));
    }

    #[test]
    fn circuit_wins_tie_break_over_backoff() {
        let (t, _clock) = tracker(TrackerConfig {
            initial_delay: Duration::from_secs(100),
            multiplier: 1.0,
            max_delay: Duration::from_secs(100),
            window: Duration::from_secs(600),
            budget: 1,
        });

        t.should_restart("c1");
        t.record_restart("c1");

        // Still within backoff AND at budget: circuit must win.
        let (allowed, reason) = t.should_restart("c1");
        assert!(!allowed);
        assert_eq!(reason, RestartReason::Circuit);
    }
}
