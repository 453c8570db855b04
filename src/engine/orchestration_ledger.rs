//! In-memory window of create/destroy events observed per container name.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::clock::Clock;

#[derive(Clone)]
pub struct OrchestrationLedger {
    clock: Arc<dyn Clock>,
    entries: Arc<Mutex<HashMap<String, Instant>>>,
}

impl OrchestrationLedger {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Record a `create` or `destroy` observation for `name`.
    pub fn record(&self, name: &str) {
        let now = self.clock.now();
        self.entries.lock().insert(name.to_string(), now);
    }

    /// True if any entry in the ledger falls within `cooldown` of `now`.
    pub fn any_within(&self, now: Instant, cooldown: Duration) -> bool {
        self.entries
            .lock()
            .values()
            .any(|t| now.saturating_duration_since(*t) < cooldown)
    }

    /// True if `name` has an entry within `cooldown` of `now`.
    pub fn contains_within(&self, name: &str, now: Instant, cooldown: Duration) -> bool {
        self.entries
            .lock()
            .get(name)
            .map(|t| now.saturating_duration_since(*t) < cooldown)
            .unwrap_or(false)
    }

    /// Opportunistically purge entries older than `cooldown`. Safe to call
    /// from its own task; the ledger's mutex is only ever held for the
    /// duration of the purge itself.
    pub fn purge_older_than(&self, cooldown: Duration) {
        let now = self.clock.now();
        self.entries
            .lock()
            .retain(|_, t| now.saturating_duration_since(*t) < cooldown);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
