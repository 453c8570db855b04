//! Runtime client: the narrow capability set the engine consumes (§6).
//!
//! Concrete implementations are injected at startup; the engine itself
//! never imports `bollard` directly, only this trait, so a test fake is a
//! drop-in replacement and a future alternative runtime can be slotted in
//! (§9, "Runtime polymorphism").

mod docker;

pub use docker::DockerRuntime;

use std::collections::HashMap;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use crate::engine::ContainerSummary;

/// The subset of `inspect` fields the engine reads (§6).
#[derive(Debug, Clone)]
pub struct Inspect {
    pub name: String,
    pub status: String,
    pub exit_code: i64,
    pub finished_at: Option<DateTime<Utc>>,
    pub health_log: Vec<String>,
    /// `hostConfig.networkMode`, e.g. `"container:<parentId>"` for a
    /// network-namespace child.
    pub network_mode: String,
    pub labels: HashMap<String, String>,
}

impl Inspect {
    /// Parent id if this container shares another's network namespace.
    pub fn network_parent_id(&self) -> Option<&str> {
        self.network_mode.strip_prefix("container:")
    }
}

/// A raw, not-yet-normalized event from the runtime's event stream or a
/// one-shot `events()` query.
#[derive(Debug, Clone)]
pub struct RawEvent {
    pub id: String,
    pub name: String,
    /// e.g. `"die"`, `"start"`, `"create"`, `"destroy"`, or one of the two
    /// `health_status` encodings described in §4.4.
    pub action: String,
    pub attributes: HashMap<String, String>,
    pub timestamp: DateTime<Utc>,
}

#[async_trait]
pub trait RuntimeClient: Send + Sync {
    /// `label == "all"` means no label filter; otherwise filters to
    /// containers carrying `<label>=true`.
    async fn list_unhealthy(&self, label: &str, only_running: bool) -> Result<Vec<ContainerSummary>>;
    async fn list_exited(&self) -> Result<Vec<ContainerSummary>>;
    async fn list_running(&self) -> Result<Vec<ContainerSummary>>;

    async fn inspect(&self, id: &str) -> Result<Inspect>;

    async fn restart(&self, id: &str, stop_timeout: Duration) -> Result<()>;
    async fn start(&self, id: &str) -> Result<()>;
    async fn stop(&self, id: &str, stop_timeout: Duration) -> Result<()>;

    async fn status(&self, id: &str) -> Result<String>;
    async fn finished_at(&self, id: &str) -> Result<Option<DateTime<Utc>>>;

    /// One-shot query used during full scans for the orchestration cooldown
    /// window.
    async fn events(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
        orchestration_only: bool,
    ) -> Result<Vec<RawEvent>>;

    /// Whether this client can stream events; the test fake reports
    /// `false` so the Controller exercises its polling fallback.
    fn supports_streaming(&self) -> bool {
        true
    }

    /// Subscribes to the event stream filtered to `types_filter`. The
    /// receiver carries `Err` for decode/connection errors; the caller
    /// (EventWatcher) is responsible for reconnection.
    async fn stream_events(
        &self,
        types_filter: &[&str],
    ) -> Result<mpsc::Receiver<Result<RawEvent>>>;
}
