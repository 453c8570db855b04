//! Notification fan-out: the engine's narrow three-verb `Notifier`
//! interface (§6), backed by zero or more configured transports.
//!
//! Grounded on the teacher's `notifications/mod.rs`: the same Slack/
//! Discord/Email transport shapes, collapsed from the teacher's five
//! `NotificationEventType` variants down to the three verbs the
//! specification defines, since this module is explicitly non-core.

pub mod discord;
pub mod email;
pub mod log;
pub mod slack;
pub mod webhook;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::clock::Clock;
use crate::metrics;

/// A transport-agnostic notification. `title`/`body` are rendered however
/// each transport sees fit (Slack attachment, Discord embed, email
/// subject/body, plain text line).
#[derive(Debug, Clone)]
pub struct Message {
    pub title: String,
    pub body: String,
    pub severity: Severity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    pub fn color_hex(&self) -> &'static str {
        match self {
            Severity::Info => "#3498db",
            Severity::Warning => "#f39c12",
            Severity::Critical => "#e74c3c",
        }
    }

    pub fn emoji(&self) -> &'static str {
        match self {
            Severity::Info => ":information_source:",
            Severity::Warning => ":warning:",
            Severity::Critical => ":rotating_light:",
        }
    }
}

/// One outbound channel. Implementations carry their own HTTP/SMTP client.
#[async_trait]
pub trait Transport: Send + Sync {
    fn name(&self) -> &'static str;
    async fn send(&self, message: &Message) -> anyhow::Result<()>;
}

/// The engine's consumed interface: three verbs, per §6.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn startup(&self, text: &str);
    /// `critical` prefixes the text with `[CRITICAL]`, per §6: "The engine
    /// passes the `[CRITICAL]` prefix when the cause is circuit opening."
    async fn action(&self, text: &str, critical: bool);
    async fn skip(&self, text: &str);
}

/// Fans a verb call out to every configured transport, with the retry
/// policy from §7: action notifications retry up to 3 times with 1s/2s/4s
/// backoff; startup/skip get a single attempt. A transport failure is
/// logged and never propagated — "never fails the engine."
pub struct FanoutNotifier {
    clock: Arc<dyn Clock>,
    transports: Vec<Arc<dyn Transport>>,
}

impl FanoutNotifier {
    pub fn new(clock: Arc<dyn Clock>, transports: Vec<Arc<dyn Transport>>) -> Self {
        Self { clock, transports }
    }

    async fn dispatch(&self, message: Message, retries: &[Duration]) {
        for transport in &self.transports {
            let mut attempt = 0usize;
            loop {
                match transport.send(&message).await {
                    Ok(()) => {
                        metrics::counter!(metrics::NOTIFICATIONS_TOTAL, "service" => transport.name(), "result" => "success")
                            .increment(1);
                        break;
                    }
                    Err(e) => {
                        if attempt >= retries.len() {
                            metrics::counter!(metrics::NOTIFICATIONS_TOTAL, "service" => transport.name(), "result" => "failure")
                                .increment(1);
                            tracing::error!(
                                transport = transport.name(),
                                error = %e,
                                "Notification delivery failed, giving up"
                            );
                            break;
                        }
                        let delay = retries[attempt];
                        tracing::warn!(
                            transport = transport.name(),
                            error = %e,
                            attempt = attempt + 1,
                            delay = ?delay,
                            "Notification delivery failed, retrying"
                        );
                        self.clock.after(delay).wait().await;
                        attempt += 1;
                    }
                }
            }
        }
    }
}

#[async_trait]
impl Notifier for FanoutNotifier {
    async fn startup(&self, text: &str) {
        self.dispatch(
            Message {
                title: "Docker Guardian started".to_string(),
                body: text.to_string(),
                severity: Severity::Info,
            },
            &[],
        )
        .await;
    }

    async fn action(&self, text: &str, critical: bool) {
        let text = if critical {
            format!("[CRITICAL] {}", text)
        } else {
            text.to_string()
        };
        let severity = if critical { Severity::Critical } else { Severity::Info };

        self.dispatch(
            Message {
                title: "Docker Guardian action".to_string(),
                body: text,
                severity,
            },
            &[
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4),
            ],
        )
        .await;
    }

    async fn skip(&self, text: &str) {
        self.dispatch(
            Message {
                title: "Docker Guardian skip".to_string(),
                body: text.to_string(),
                severity: Severity::Warning,
            },
            &[],
        )
        .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::VirtualClock;
    use parking_lot::Mutex;

    struct RecordingTransport {
        fail_times: Mutex<usize>,
        received: Arc<Mutex<Vec<Message>>>,
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        fn name(&self) -> &'static str {
            "recording"
        }

        async fn send(&self, message: &Message) -> anyhow::Result<()> {
            let mut remaining = self.fail_times.lock();
            if *remaining > 0 {
                *remaining -= 1;
                anyhow::bail!("simulated failure");
            }
            self.received.lock().push(message.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn action_retries_then_succeeds() {
        let clock = Arc::new(VirtualClock::new());
        let received = Arc::new(Mutex::new(Vec::new()));
        let transport = Arc::new(RecordingTransport {
            fail_times: Mutex::new(2),
            received: received.clone(),
        });
        let notifier = FanoutNotifier::new(clock.clone(), vec![transport]);

        let clock_driver = clock.clone();
        tokio::spawn(async move {
            for _ in 0..10 {
                tokio::task::yield_now().await;
                clock_driver.advance(Duration::from_secs(5));
            }
        });

        notifier.action("restarted", false).await;
        assert_eq!(received.lock().len(), 1);
    }

    #[tokio::test]
    async fn skip_never_retries() {
        let clock = Arc::new(VirtualClock::new());
        let received = Arc::new(Mutex::new(Vec::new()));
        let transport = Arc::new(RecordingTransport {
            fail_times: Mutex::new(1),
            received: received.clone(),
        });
        let notifier = FanoutNotifier::new(clock, vec![transport]);

        notifier.skip("grace period").await;
        assert_eq!(received.lock().len(), 0);
    }
}
