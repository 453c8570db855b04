use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use bollard::container::{
    InspectContainerOptions, ListContainersOptions, RestartContainerOptions, StartContainerOptions,
    StopContainerOptions,
};
use bollard::system::EventsOptions;
use bollard::Docker;
use chrono::{DateTime, TimeZone, Utc};
use futures::StreamExt;
use tokio::sync::mpsc;

use super::{Inspect, RawEvent, RuntimeClient};
use crate::engine::ContainerSummary;

pub struct DockerRuntime {
    client: Docker,
}

impl DockerRuntime {
    pub fn new(socket: &str) -> Result<Self> {
        let client = if cfg!(windows) || socket.starts_with("npipe://") || socket.starts_with("tcp://") {
            Docker::connect_with_local_defaults()
        } else {
            Docker::connect_with_socket(socket, 120, bollard::API_DEFAULT_VERSION)
        }
        .context("Failed to connect to the Docker socket")?;

        Ok(Self { client })
    }

    async fn list(&self, filters: HashMap<String, Vec<String>>) -> Result<Vec<ContainerSummary>> {
        let options = ListContainersOptions {
            all: true,
            filters,
            ..Default::default()
        };

        let containers = self
            .client
            .list_containers(Some(options))
            .await
            .context("Failed to list containers")?;

        Ok(containers
            .into_iter()
            .map(|c| {
                let name = c
                    .names
                    .and_then(|names| names.into_iter().next())
                    .unwrap_or_default()
                    .trim_start_matches('/')
                    .to_string();

                ContainerSummary {
                    id: c.id.unwrap_or_default(),
                    name,
                    state: c.state.unwrap_or_default(),
                    image: c.image.unwrap_or_default(),
                    labels: c.labels.unwrap_or_default(),
                }
            })
            .collect())
    }
}

#[async_trait]
impl RuntimeClient for DockerRuntime {
    async fn list_unhealthy(&self, label: &str, only_running: bool) -> Result<Vec<ContainerSummary>> {
        let mut filters = HashMap::new();
        filters.insert("health".to_string(), vec!["unhealthy".to_string()]);
        if only_running {
            filters.insert("status".to_string(), vec!["running".to_string()]);
        }
        if label != "all" {
            filters.insert("label".to_string(), vec![format!("{}=true", label)]);
        }
        self.list(filters).await
    }

    async fn list_exited(&self) -> Result<Vec<ContainerSummary>> {
        let mut filters = HashMap::new();
        filters.insert("status".to_string(), vec!["exited".to_string()]);
        self.list(filters).await
    }

    async fn list_running(&self) -> Result<Vec<ContainerSummary>> {
        let mut filters = HashMap::new();
        filters.insert("status".to_string(), vec!["running".to_string()]);
        self.list(filters).await
    }

    async fn inspect(&self, id: &str) -> Result<Inspect> {
        let info = self
            .client
            .inspect_container(id, None::<InspectContainerOptions>)
            .await
            .context("Failed to inspect container")?;

        let name = info
            .name
            .unwrap_or_default()
            .trim_start_matches('/')
            .to_string();

        let state = info.state.unwrap_or_default();
        let status = state
            .status
            .map(|s| format!("{:?}", s).to_lowercase())
            .unwrap_or_default();
        let exit_code = state.exit_code.unwrap_or(0);
        let finished_at = state
            .finished_at
            .as_deref()
            .and_then(parse_docker_timestamp);
        let health_log = state
            .health
            .and_then(|h| h.log)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|entry| entry.output)
            .collect();

        let network_mode = info
            .host_config
            .and_then(|hc| hc.network_mode)
            .unwrap_or_default();

        let labels = info
            .config
            .and_then(|c| c.labels)
            .unwrap_or_default();

        Ok(Inspect {
            name,
            status,
            exit_code,
            finished_at,
            health_log,
            network_mode,
            labels,
        })
    }

    async fn restart(&self, id: &str, stop_timeout: Duration) -> Result<()> {
        self.client
            .restart_container(
                id,
                Some(RestartContainerOptions {
                    t: stop_timeout.as_secs() as i64,
                }),
            )
            .await
            .context("Failed to restart container")
    }

    async fn start(&self, id: &str) -> Result<()> {
        self.client
            .start_container(id, None::<StartContainerOptions<String>>)
            .await
            .context("Failed to start container")
    }

    async fn stop(&self, id: &str, stop_timeout: Duration) -> Result<()> {
        self.client
            .stop_container(
                id,
                Some(StopContainerOptions {
                    t: stop_timeout.as_secs() as i64,
                }),
            )
            .await
            .context("Failed to stop container")
    }

    async fn status(&self, id: &str) -> Result<String> {
        Ok(self.inspect(id).await?.status)
    }

    async fn finished_at(&self, id: &str) -> Result<Option<DateTime<Utc>>> {
        Ok(self.inspect(id).await?.finished_at)
    }

    async fn events(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
        orchestration_only: bool,
    ) -> Result<Vec<RawEvent>> {
        let mut filters: HashMap<String, Vec<String>> = HashMap::new();
        filters.insert("type".to_string(), vec!["container".to_string()]);
        if orchestration_only {
            filters.insert(
                "event".to_string(),
                vec!["create".to_string(), "destroy".to_string()],
            );
        }

        let options = EventsOptions::<String> {
            since: Some(since.timestamp().to_string()),
            until: Some(until.timestamp().to_string()),
            filters,
        };

        let mut stream = self.client.events(Some(options));
        let mut events = Vec::new();
        while let Some(message) = stream.next().await {
            let message = message.context("Docker event stream error")?;
            if let Some(event) = raw_event_from_message(message) {
                events.push(event);
            }
        }
        Ok(events)
    }

    fn supports_streaming(&self) -> bool {
        true
    }

    async fn stream_events(&self, types_filter: &[&str]) -> Result<mpsc::Receiver<Result<RawEvent>>> {
        let mut filters: HashMap<String, Vec<String>> = HashMap::new();
        filters.insert("type".to_string(), vec!["container".to_string()]);
        filters.insert(
            "event".to_string(),
            types_filter.iter().map(|s| s.to_string()).collect(),
        );

        let options = EventsOptions::<String> {
            since: None,
            until: None,
            filters,
        };

        let (tx, rx) = mpsc::channel(64);
        let mut stream = self.client.events(Some(options));

        tokio::spawn(async move {
            while let Some(message) = stream.next().await {
                let item = match message {
                    Ok(message) => match raw_event_from_message(message) {
                        Some(event) => Ok(event),
                        None => continue,
                    },
                    Err(e) => Err(anyhow::anyhow!(e)),
                };

                // Back-pressure policy (§4.4): never drop, block on send.
                if tx.send(item).await.is_err() {
                    break;
                }
            }
        });

        Ok(rx)
    }
}

fn raw_event_from_message(message: bollard::models::EventMessage) -> Option<RawEvent> {
    let actor = message.actor?;
    let id = actor.id.unwrap_or_default();
    let attributes = actor.attributes.unwrap_or_default();
    let name = attributes
        .get("name")
        .cloned()
        .unwrap_or_default();
    let action = message.action.unwrap_or_default();
    let timestamp = message
        .time
        .and_then(|t| Utc.timestamp_opt(t, 0).single())
        .unwrap_or_else(Utc::now);

    Some(RawEvent {
        id,
        name,
        action,
        attributes,
        timestamp,
    })
}

/// Docker reports `finishedAt` as RFC3339 with nanosecond precision, or the
/// zero-value `"0001-01-01T00:00:00Z"` when the container has never exited.
fn parse_docker_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if raw.starts_with("0001-01-01") {
        return None;
    }
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_value_finished_at_is_none() {
        assert_eq!(parse_docker_timestamp("0001-01-01T00:00:00Z"), None);
    }

    #[test]
    fn parses_rfc3339_nano() {
        let parsed = parse_docker_timestamp("2024-01-02T03:04:05.123456789Z").unwrap();
        assert_eq!(parsed.timestamp(), 1704164645);
    }
}
