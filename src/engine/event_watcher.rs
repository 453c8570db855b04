//! Subscribes to the runtime's event stream, decodes events, and
//! reconnects with backoff on closure or error (§4.4).

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::clock::Clock;
use crate::engine::debouncer::CancellationToken;
use crate::engine::{ContainerEvent, EventAction, HealthStatus};
use crate::metrics;
use crate::runtime::{RawEvent, RuntimeClient};

const TYPES_FILTER: [&str; 5] = ["health_status", "die", "start", "create", "destroy"];
const CHANNEL_BUFFER: usize = 64;
const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

pub struct EventWatcher {
    clock: Arc<dyn Clock>,
    runtime: Arc<dyn RuntimeClient>,
    shutdown: CancellationToken,
}

impl EventWatcher {
    pub fn new(clock: Arc<dyn Clock>, runtime: Arc<dyn RuntimeClient>, shutdown: CancellationToken) -> Self {
        Self { clock, runtime, shutdown }
    }

    /// Runs the reconnect loop, forwarding normalized events to the
    /// returned channel. The channel closes once the shutdown token fires.
    pub fn run(self) -> mpsc::Receiver<ContainerEvent> {
        let (tx, rx) = mpsc::channel(CHANNEL_BUFFER);

        tokio::spawn(async move {
            let mut backoff = INITIAL_BACKOFF;

            loop {
                if self.shutdown.is_cancelled() {
                    break;
                }

                let mut upstream = match self.runtime.stream_events(&TYPES_FILTER).await {
                    Ok(rx) => rx,
                    Err(e) => {
                        metrics::gauge!(metrics::EVENT_STREAM_CONNECTED).set(0.0);
                        tracing::warn!(error = %e, backoff = ?backoff, "Failed to open event stream, retrying");
                        if !self.sleep_or_shutdown(backoff).await {
                            break;
                        }
                        backoff = next_backoff(backoff);
                        continue;
                    }
                };
                metrics::gauge!(metrics::EVENT_STREAM_CONNECTED).set(1.0);

                let mut saw_event = false;

                loop {
                    tokio::select! {
                        _ = self.shutdown.cancelled() => {
                            metrics::gauge!(metrics::EVENT_STREAM_CONNECTED).set(0.0);
                            return;
                        }
                        message = upstream.recv() => {
                            match message {
                                Some(Ok(raw)) => {
                                    saw_event = true;
                                    backoff = INITIAL_BACKOFF;
                                    if let Some(event) = normalize(raw) {
                                        // Back-pressure: block on send, never drop (§4.4).
                                        if tx.send(event).await.is_err() {
                                            metrics::gauge!(metrics::EVENT_STREAM_CONNECTED).set(0.0);
                                            return;
                                        }
                                    }
                                }
                                Some(Err(e)) => {
                                    metrics::gauge!(metrics::EVENT_STREAM_CONNECTED).set(0.0);
                                    tracing::warn!(error = %e, "Event stream error, reconnecting");
                                    break;
                                }
                                None => {
                                    metrics::gauge!(metrics::EVENT_STREAM_CONNECTED).set(0.0);
                                    tracing::warn!("Event stream closed, reconnecting");
                                    break;
                                }
                            }
                        }
                    }
                }

                if !saw_event {
                    if !self.sleep_or_shutdown(backoff).await {
                        break;
                    }
                    backoff = next_backoff(backoff);
                } else {
                    backoff = INITIAL_BACKOFF;
                }
            }
        });

        rx
    }

    /// Returns `false` if the shutdown signal fired while sleeping.
    async fn sleep_or_shutdown(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = self.clock.after(duration).wait() => true,
            _ = self.shutdown.cancelled() => false,
        }
    }
}

fn next_backoff(current: Duration) -> Duration {
    (current * 2).min(MAX_BACKOFF)
}

/// Normalizes both `health_status` encodings described in §4.4/§9: either
/// the action is the literal `"health_status: unhealthy"` / `"health_status:
/// healthy"`, or the action is `"health_status"` with the status carried in
/// the attributes map under `"healthStatus"`.
fn normalize(raw: RawEvent) -> Option<ContainerEvent> {
    let (action_str, inline_status) = if let Some(status) = raw.action.strip_prefix("health_status: ") {
        ("health_status", Some(status.to_string()))
    } else {
        (raw.action.as_str(), None)
    };

    let action = match action_str {
        "health_status" => EventAction::HealthStatus,
        "die" => EventAction::Die,
        "start" => EventAction::Start,
        "create" => EventAction::Create,
        "destroy" => EventAction::Destroy,
        _ => return None,
    };

    let health_status = if action == EventAction::HealthStatus {
        let status = inline_status.or_else(|| raw.attributes.get("healthStatus").cloned());
        match status.as_deref() {
            Some("unhealthy") => Some(HealthStatus::Unhealthy),
            Some("healthy") => Some(HealthStatus::Healthy),
            _ => None,
        }
    } else {
        None
    };

    Some(ContainerEvent {
        id: raw.id,
        name: raw.name,
        action,
        health_status,
        timestamp: raw.timestamp,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn raw(action: &str, attrs: &[(&str, &str)]) -> RawEvent {
        RawEvent {
            id: "abc123456789".to_string(),
            name: "web".to_string(),
            action: action.to_string(),
            attributes: attrs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
            timestamp: chrono::Utc::now(),
        }
    }

    #[test]
    fn normalizes_inline_health_status_encoding() {
        let event = normalize(raw("health_status: unhealthy", &[])).unwrap();
        assert_eq!(event.action, EventAction::HealthStatus);
        assert_eq!(event.health_status, Some(HealthStatus::Unhealthy));
    }

    #[test]
    fn normalizes_attribute_health_status_encoding() {
        let event = normalize(raw("health_status", &[("healthStatus", "healthy")])).unwrap();
        assert_eq!(event.action, EventAction::HealthStatus);
        assert_eq!(event.health_status, Some(HealthStatus::Healthy));
    }

    #[test]
    fn die_event_has_no_health_status() {
        let event = normalize(raw("die", &[])).unwrap();
        assert_eq!(event.action, EventAction::Die);
        assert_eq!(event.health_status, None);
    }

    #[test]
    fn backoff_sequence_doubles_and_caps_at_30() {
        let mut b = INITIAL_BACKOFF;
        let mut seq = vec![b];
        for _ in 0..6 {
            b = next_backoff(b);
            seq.push(b);
        }
        let secs: Vec<u64> = seq.iter().map(|d| d.as_secs()).collect();
        assert_eq!(secs, vec![1, 2, 4, 8, 16, 30, 30]);
    }
}
