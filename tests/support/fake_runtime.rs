//! In-memory `RuntimeClient` double for integration tests, grounded on the
//! teacher's `Arc<dyn ContainerRuntime>` injection pattern: the engine only
//! ever depends on the trait, so swapping in this fake requires no engine
//! changes.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use docker_guardian::engine::ContainerSummary;
use docker_guardian::runtime::{Inspect, RawEvent, RuntimeClient};
use parking_lot::Mutex;
use tokio::sync::mpsc;

#[derive(Debug, Clone)]
pub struct FakeContainer {
    pub id: String,
    pub name: String,
    pub state: String,
    pub image: String,
    pub labels: HashMap<String, String>,
    pub finished_at: Option<DateTime<Utc>>,
    pub network_mode: String,
}

impl FakeContainer {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            name: id.to_string(),
            state: "running".to_string(),
            image: "demo".to_string(),
            labels: HashMap::new(),
            finished_at: None,
            network_mode: "bridge".to_string(),
        }
    }

    pub fn with_label(mut self, key: &str, value: &str) -> Self {
        self.labels.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_state(mut self, state: &str) -> Self {
        self.state = state.to_string();
        self
    }

    pub fn with_network_mode(mut self, mode: &str) -> Self {
        self.network_mode = mode.to_string();
        self
    }

    fn summary(&self) -> ContainerSummary {
        ContainerSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            state: self.state.clone(),
            image: self.image.clone(),
            labels: self.labels.clone(),
        }
    }
}

pub struct FakeRuntimeClient {
    pub containers: Mutex<HashMap<String, FakeContainer>>,
    pub restart_calls: Mutex<Vec<String>>,
    pub stop_calls: Mutex<Vec<String>>,
    pub start_calls: Mutex<Vec<String>>,
    pub streaming: bool,
    events_tx: Mutex<Option<mpsc::Sender<anyhow::Result<RawEvent>>>>,
}

impl FakeRuntimeClient {
    pub fn new(containers: Vec<FakeContainer>) -> Self {
        Self {
            containers: Mutex::new(containers.into_iter().map(|c| (c.id.clone(), c)).collect()),
            restart_calls: Mutex::new(vec![]),
            stop_calls: Mutex::new(vec![]),
            start_calls: Mutex::new(vec![]),
            streaming: true,
            events_tx: Mutex::new(None),
        }
    }

    pub fn without_streaming(mut self) -> Self {
        self.streaming = false;
        self
    }

    /// Pushes an event to any open `stream_events` subscription.
    pub async fn push_event(&self, event: RawEvent) {
        if let Some(tx) = self.events_tx.lock().clone() {
            let _ = tx.send(Ok(event)).await;
        }
    }
}

#[async_trait]
impl RuntimeClient for FakeRuntimeClient {
    async fn list_unhealthy(&self, label: &str, only_running: bool) -> anyhow::Result<Vec<ContainerSummary>> {
        Ok(self
            .containers
            .lock()
            .values()
            .filter(|c| c.state == "unhealthy" || c.labels.get("health").map(|h| h == "unhealthy").unwrap_or(false))
            .filter(|c| !only_running || c.state != "exited")
            .filter(|c| label == "all" || c.labels.get(label).map(|v| v == "true").unwrap_or(false))
            .map(|c| c.summary())
            .collect())
    }

    async fn list_exited(&self) -> anyhow::Result<Vec<ContainerSummary>> {
        Ok(self
            .containers
            .lock()
            .values()
            .filter(|c| c.state == "exited")
            .map(|c| c.summary())
            .collect())
    }

    async fn list_running(&self) -> anyhow::Result<Vec<ContainerSummary>> {
        Ok(self
            .containers
            .lock()
            .values()
            .filter(|c| c.state == "running")
            .map(|c| c.summary())
            .collect())
    }

    async fn inspect(&self, id: &str) -> anyhow::Result<Inspect> {
        let containers = self.containers.lock();
        let c = containers.get(id).ok_or_else(|| anyhow::anyhow!("no such container: {id}"))?;
        Ok(Inspect {
            name: c.name.clone(),
            status: c.state.clone(),
            exit_code: 0,
            finished_at: c.finished_at,
            health_log: vec![],
            network_mode: c.network_mode.clone(),
            labels: c.labels.clone(),
        })
    }

    async fn restart(&self, id: &str, _stop_timeout: Duration) -> anyhow::Result<()> {
        self.restart_calls.lock().push(id.to_string());
        if let Some(c) = self.containers.lock().get_mut(id) {
            c.state = "running".to_string();
        }
        Ok(())
    }

    async fn start(&self, id: &str) -> anyhow::Result<()> {
        self.start_calls.lock().push(id.to_string());
        if let Some(c) = self.containers.lock().get_mut(id) {
            c.state = "running".to_string();
        }
        Ok(())
    }

    async fn stop(&self, id: &str, _stop_timeout: Duration) -> anyhow::Result<()> {
        self.stop_calls.lock().push(id.to_string());
        if let Some(c) = self.containers.lock().get_mut(id) {
            c.state = "exited".to_string();
        }
        Ok(())
    }

    async fn status(&self, id: &str) -> anyhow::Result<String> {
        Ok(self.inspect(id).await?.status)
    }

    async fn finished_at(&self, id: &str) -> anyhow::Result<Option<DateTime<Utc>>> {
        Ok(self.inspect(id).await?.finished_at)
    }

    async fn events(
        &self,
        _since: DateTime<Utc>,
        _until: DateTime<Utc>,
        _orchestration_only: bool,
    ) -> anyhow::Result<Vec<RawEvent>> {
        Ok(vec![])
    }

    fn supports_streaming(&self) -> bool {
        self.streaming
    }

    async fn stream_events(&self, _types_filter: &[&str]) -> anyhow::Result<mpsc::Receiver<anyhow::Result<RawEvent>>> {
        let (tx, rx) = mpsc::channel(64);
        *self.events_tx.lock() = Some(tx);
        Ok(rx)
    }
}

pub fn event(id: &str, name: &str, action: &str, attrs: &[(&str, &str)]) -> RawEvent {
    RawEvent {
        id: id.to_string(),
        name: name.to_string(),
        action: action.to_string(),
        attributes: attrs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
        timestamp: Utc::now(),
    }
}
