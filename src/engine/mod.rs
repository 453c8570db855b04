//! The decision engine: event intake, guard pipeline, restart tracker, and
//! dependency-orphan resolver described in the core of the specification.

pub mod controller;
pub mod debouncer;
pub mod dependency_resolver;
pub mod event_watcher;
pub mod guard_pipeline;
pub mod orchestration_ledger;
pub mod restart_tracker;
pub mod unhealthy_handler;

pub use controller::Controller;
pub use debouncer::Debouncer;
pub use dependency_resolver::DependencyResolver;
pub use event_watcher::EventWatcher;
pub use guard_pipeline::{GuardPipeline, SkipReason};
pub use orchestration_ledger::OrchestrationLedger;
pub use restart_tracker::{RestartReason, RestartTracker};
pub use unhealthy_handler::UnhealthyHandler;

use std::fmt;

/// One of the five container lifecycle events the runtime's event stream
/// reports, normalized to a single shape regardless of wire encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerEvent {
    pub id: String,
    pub name: String,
    pub action: EventAction,
    pub health_status: Option<HealthStatus>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventAction {
    HealthStatus,
    Die,
    Start,
    Create,
    Destroy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// The corrective action a guarded, tracked decision resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Restart,
    Stop,
    Notify,
    None,
}

impl Action {
    /// Parses the `autoheal.action` label value. Unknown values, per the
    /// label vocabulary, fall back to `restart`.
    pub fn from_label(value: Option<&str>) -> Self {
        match value {
            Some("stop") => Action::Stop,
            Some("notify") => Action::Notify,
            Some("none") => Action::None,
            _ => Action::Restart,
        }
    }
}

/// A minimal, capability-shaped summary of a container as reported by the
/// runtime client's listing calls.
#[derive(Debug, Clone)]
pub struct ContainerSummary {
    pub id: String,
    pub name: String,
    pub state: String,
    pub image: String,
    pub labels: std::collections::HashMap<String, String>,
}

impl ContainerSummary {
    /// First 12 hex chars of the id, the conventional short form for logs.
    pub fn short_id(&self) -> &str {
        let len = self.id.len().min(12);
        &self.id[..len]
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(|s| s.as_str())
    }
}
