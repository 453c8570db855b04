//! Per-key coalescing of actions within a time window.
//!
//! Storage is a mapping from key to a cancellable scheduled handle, per
//! §9's "Concurrent timers" note: replacing a handle always cancels the
//! previous one, and the handle's own callback deletes its entry under the
//! lock before returning, so nothing leaks.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;

use crate::clock::Clock;

/// A minimal cancellation token: cloning shares the same cancelled flag.
#[derive(Clone, Default)]
pub struct CancellationToken {
    inner: Arc<tokio::sync::Notify>,
    cancelled: Arc<std::sync::atomic::AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, std::sync::atomic::Ordering::SeqCst);
        self.inner.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(std::sync::atomic::Ordering::SeqCst)
    }

    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        self.inner.notified().await;
    }
}

pub struct Debouncer {
    clock: Arc<dyn Clock>,
    interval: Duration,
    pending: Arc<Mutex<HashMap<String, (JoinHandle<()>, CancellationToken)>>>,
    shutdown: CancellationToken,
}

impl Debouncer {
    /// `interval <= 0` defaults to 5 seconds, per §4.5.
    pub fn new(clock: Arc<dyn Clock>, interval: Duration, shutdown: CancellationToken) -> Self {
        let interval = if interval.is_zero() { Duration::from_secs(5) } else { interval };
        Self {
            clock,
            interval,
            pending: Arc::new(Mutex::new(HashMap::new())),
            shutdown,
        }
    }

    /// Cancel any pending timer for `key`, then schedule `fn_` to run once
    /// after the debounce interval elapses.
    pub fn schedule<F, Fut>(&self, key: impl Into<String>, fn_: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let key = key.into();
        let token = CancellationToken::new();
        let clock = self.clock.clone();
        let interval = self.interval;
        let pending = self.pending.clone();
        let shutdown = self.shutdown.clone();
        let key_for_task = key.clone();
        let token_for_task = token.clone();

        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = clock.after(interval).wait() => {}
                _ = token_for_task.cancelled() => {
                    return;
                }
            }

            // Remove our own entry before invoking, so a subsequent
            // schedule() for the same key starts a fresh timer.
            pending.lock().remove(&key_for_task);

            if shutdown.is_cancelled() {
                return;
            }

            fn_().await;
        });

        if let Some((old_handle, old_token)) = self.pending.lock().insert(key, (handle, token)) {
            old_token.cancel();
            old_handle.abort();
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::VirtualClock;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn second_schedule_cancels_first_and_fires_once() {
        let clock = VirtualClock::new();
        let debouncer = Debouncer::new(
            Arc::new(clock.clone()),
            Duration::from_secs(5),
            CancellationToken::new(),
        );

        let count = Arc::new(AtomicUsize::new(0));

        let c1 = count.clone();
        debouncer.schedule("unhealthy:abc", move || async move {
            c1.fetch_add(1, Ordering::SeqCst);
        });

        clock.advance(Duration::from_secs(2));
        tokio::task::yield_now().await;

        let c2 = count.clone();
        debouncer.schedule("unhealthy:abc", move || async move {
            c2.fetch_add(1, Ordering::SeqCst);
        });

        clock.advance(Duration::from_secs(5));
        // Give the spawned task a chance to observe the advance and run.
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(debouncer.pending_count(), 0);
    }
}
