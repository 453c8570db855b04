//! Reacts to unhealthy containers: opt-out, action resolution, guards,
//! backoff/circuit consultation, and the actual restart/stop call (§4.6).
//!
//! Grounded on the teacher's `container_monitor.rs` crash-handling path for
//! the backoff-check/restart/metrics-record shape, generalized to the
//! label-driven action vocabulary and guard pipeline the specification
//! adds on top.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::engine::{Action, ContainerSummary, GuardPipeline, RestartReason, RestartTracker};
use crate::metrics;
use crate::notify::Notifier;
use crate::runtime::RuntimeClient;

const LABEL_OPT_OUT: &str = "autoheal";
const LABEL_ACTION: &str = "autoheal.action";
const LABEL_STOP_TIMEOUT: &str = "autoheal.stop.timeout";
const LABEL_NOTIFY: &str = "autoheal.notify";

#[derive(Debug, Clone)]
pub struct HandlerConfig {
    /// `"all"` disables label filtering in `list_unhealthy`.
    pub label_filter: String,
    pub only_running: bool,
    pub default_stop_timeout: Duration,
    /// Consecutive unhealthy observations required before acting. 1 means
    /// act on the first observation.
    pub unhealthy_threshold: u32,
}

impl Default for HandlerConfig {
    fn default() -> Self {
        Self {
            label_filter: "all".to_string(),
            only_running: true,
            default_stop_timeout: Duration::from_secs(10),
            unhealthy_threshold: 1,
        }
    }
}

/// `postRestartScript` hook, invoked with the four positional arguments
/// documented in §6: container name, short id, resulting state, and the
/// timeout (seconds) used for the action.
pub type PostActionHook = Arc<dyn Fn(&str, &str, &str, u64) + Send + Sync>;

pub struct UnhealthyHandler {
    config: HandlerConfig,
    runtime: Arc<dyn RuntimeClient>,
    guards: Arc<GuardPipeline>,
    tracker: RestartTracker,
    notifier: Arc<dyn Notifier>,
    hook: Option<PostActionHook>,
}

impl UnhealthyHandler {
    pub fn new(
        config: HandlerConfig,
        runtime: Arc<dyn RuntimeClient>,
        guards: Arc<GuardPipeline>,
        tracker: RestartTracker,
        notifier: Arc<dyn Notifier>,
        hook: Option<PostActionHook>,
    ) -> Self {
        Self {
            config,
            runtime,
            guards,
            tracker,
            notifier,
            hook,
        }
    }

    /// Full-scan enumeration path: lists every unhealthy container and runs
    /// each through `handle`. Resets the guard pipeline's per-cycle backup
    /// cache first.
    pub async fn scan(&self) {
        self.guards.reset_scan_cache();

        let containers = match self
            .runtime
            .list_unhealthy(&self.config.label_filter, self.config.only_running)
            .await
        {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to list unhealthy containers");
                return;
            }
        };

        metrics::gauge!(metrics::UNHEALTHY_CONTAINERS).set(containers.len() as f64);

        for container in containers {
            self.handle(&container).await;
        }
    }

    /// Event-driven path: called once a `health_status: unhealthy` event has
    /// been debounced for the given container. Re-inspects the container for
    /// current labels and state before acting, since the event carries
    /// neither.
    pub async fn handle_event(&self, id: &str) {
        let summary = match self.resolve_summary(id).await {
            Some(s) => s,
            None => return,
        };
        self.handle(&summary).await;
    }

    async fn resolve_summary(&self, id: &str) -> Option<ContainerSummary> {
        match self.runtime.inspect(id).await {
            Ok(inspect) => Some(ContainerSummary {
                id: id.to_string(),
                name: inspect.name,
                state: inspect.status,
                image: String::new(),
                labels: inspect.labels,
            }),
            Err(e) => {
                tracing::warn!(error = %e, container = id, "Failed to inspect unhealthy container");
                None
            }
        }
    }

    /// The 7-step algorithm from §4.6, run for a single container.
    async fn handle(&self, container: &ContainerSummary) {
        if is_opted_out(&container.labels) || container.state == "restarting" {
            return;
        }

        if !self
            .tracker
            .record_unhealthy(&container.id, self.config.unhealthy_threshold)
        {
            return;
        }
        self.tracker.reset_unhealthy(&container.id);

        let action = Action::from_label(container.label(LABEL_ACTION));

        let notify = !notify_suppressed(&container.labels);

        if let Some(reason) = self
            .guards
            .should_skip(&container.id, &container.name, &container.labels)
            .await
        {
            metrics::counter!(metrics::SKIPS_TOTAL, "container" => container.name.clone(), "reason" => reason.as_str())
                .increment(1);
            if notify {
                self.notifier
                    .skip(&format!(
                        "{} skipped ({})",
                        container.name,
                        reason.as_str()
                    ))
                    .await;
            }
            return;
        }

        if action == Action::Notify {
            if notify {
                self.notifier
                    .action(&format!("{} is unhealthy", container.name), false)
                    .await;
            }
            return;
        }

        if action == Action::None {
            return;
        }

        let (allowed, reason) = self.tracker.should_restart(&container.id);
        if !allowed {
            match reason {
                RestartReason::Circuit => {
                    metrics::counter!(metrics::SKIPS_TOTAL, "container" => container.name.clone(), "reason" => "circuit")
                        .increment(1);
                    metrics::gauge!(metrics::CIRCUIT_OPEN_CONTAINERS)
                        .set(self.tracker.circuit_open_count() as f64);
                    if notify {
                        self.notifier
                            .action(
                                &format!("{} restart circuit is open, giving up", container.name),
                                true,
                            )
                            .await;
                    }
                }
                RestartReason::Backoff => {
                    metrics::counter!(metrics::SKIPS_TOTAL, "container" => container.name.clone(), "reason" => "backoff")
                        .increment(1);
                }
                RestartReason::None => unreachable!(),
            }
            return;
        }

        let stop_timeout = container
            .label(LABEL_STOP_TIMEOUT)
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(self.config.default_stop_timeout);

        let timer = metrics::Timer::start();
        let result = match action {
            Action::Stop => self.runtime.stop(&container.id, stop_timeout).await,
            _ => self.runtime.restart(&container.id, stop_timeout).await,
        };
        metrics::histogram!(metrics::RESTART_DURATION_SECONDS, "container" => container.name.clone())
            .record(timer.elapsed().as_secs_f64());

        self.tracker.record_restart(&container.id);

        let resulting_state = match &result {
            Ok(()) => {
                metrics::counter!(metrics::RESTARTS_TOTAL, "container" => container.name.clone(), "result" => "success")
                    .increment(1);
                let verb = if action == Action::Stop { "stopped" } else { "restarted" };
                if notify {
                    self.notifier
                        .action(&format!("{} {}", container.name, verb), false)
                        .await;
                }
                if action == Action::Stop { "stopped" } else { "running" }
            }
            Err(e) => {
                metrics::counter!(metrics::RESTARTS_TOTAL, "container" => container.name.clone(), "result" => "failure")
                    .increment(1);
                if notify {
                    self.notifier
                        .action(&format!("{} action failed: {}", container.name, e), false)
                        .await;
                }
                "failed"
            }
        };

        if let Some(hook) = &self.hook {
            hook(&container.name, container.short_id(), resulting_state, stop_timeout.as_secs());
        }
    }
}

fn is_opted_out(labels: &HashMap<String, String>) -> bool {
    labels
        .get(LABEL_OPT_OUT)
        .map(|v| v.eq_ignore_ascii_case("false"))
        .unwrap_or(false)
}

/// §6: `autoheal.notify=false` suppresses notifications for this container
/// without affecting whether the restart/stop action itself runs.
fn notify_suppressed(labels: &HashMap<String, String>) -> bool {
    labels
        .get(LABEL_NOTIFY)
        .map(|v| v.eq_ignore_ascii_case("false"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::VirtualClock;
    use crate::engine::{OrchestrationLedger, RestartTracker};
    use crate::engine::guard_pipeline::GuardConfig;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::time::Duration as StdDuration;

    struct RecordingNotifier {
        actions: Mutex<Vec<(String, bool)>>,
        skips: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn startup(&self, _text: &str) {}
        async fn action(&self, text: &str, critical: bool) {
            self.actions.lock().push((text.to_string(), critical));
        }
        async fn skip(&self, text: &str) {
            self.skips.lock().push(text.to_string());
        }
    }

    struct FakeRuntime {
        restarted: Mutex<Vec<String>>,
    }

    fn summary(id: &str, labels: &[(&str, &str)]) -> ContainerSummary {
        ContainerSummary {
            id: id.to_string(),
            name: id.to_string(),
            state: "running".to_string(),
            image: "nginx".to_string(),
            labels: labels.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
        }
    }

    #[async_trait]
    impl RuntimeClient for FakeRuntime {
        async fn list_unhealthy(&self, _label: &str, _only_running: bool) -> anyhow::Result<Vec<ContainerSummary>> {
            Ok(vec![])
        }
        async fn list_exited(&self) -> anyhow::Result<Vec<ContainerSummary>> {
            Ok(vec![])
        }
        async fn list_running(&self) -> anyhow::Result<Vec<ContainerSummary>> {
            Ok(vec![])
        }
        async fn inspect(&self, id: &str) -> anyhow::Result<crate::runtime::Inspect> {
            Ok(crate::runtime::Inspect {
                name: id.to_string(),
                status: "running".to_string(),
                exit_code: 0,
                finished_at: None,
                health_log: vec![],
                network_mode: "bridge".to_string(),
                labels: HashMap::new(),
            })
        }
        async fn restart(&self, id: &str, _stop_timeout: StdDuration) -> anyhow::Result<()> {
            self.restarted.lock().push(id.to_string());
            Ok(())
        }
        async fn start(&self, _id: &str) -> anyhow::Result<()> {
            Ok(())
        }
        async fn stop(&self, _id: &str, _stop_timeout: StdDuration) -> anyhow::Result<()> {
            Ok(())
        }
        async fn status(&self, _id: &str) -> anyhow::Result<String> {
            Ok("running".to_string())
        }
        async fn finished_at(&self, _id: &str) -> anyhow::Result<Option<chrono::DateTime<chrono::Utc>>> {
            Ok(None)
        }
        async fn events(
            &self,
            _since: chrono::DateTime<chrono::Utc>,
            _until: chrono::DateTime<chrono::Utc>,
            _orchestration_only: bool,
        ) -> anyhow::Result<Vec<crate::runtime::RawEvent>> {
            Ok(vec![])
        }
        async fn stream_events(
            &self,
            _types_filter: &[&str],
        ) -> anyhow::Result<tokio::sync::mpsc::Receiver<anyhow::Result<crate::runtime::RawEvent>>> {
            let (_tx, rx) = tokio::sync::mpsc::channel(1);
            Ok(rx)
        }
    }

    fn handler(runtime: Arc<FakeRuntime>) -> (UnhealthyHandler, Arc<RecordingNotifier>) {
        let clock = Arc::new(VirtualClock::new());
        let ledger = OrchestrationLedger::new(clock.clone());
        let guards = Arc::new(GuardPipeline::new(
            clock.clone(),
            GuardConfig::default(),
            ledger,
            runtime.clone(),
        ));
        let tracker = RestartTracker::new(clock, Default::default());
        let notifier = Arc::new(RecordingNotifier {
            actions: Mutex::new(vec![]),
            skips: Mutex::new(vec![]),
        });

        (
            UnhealthyHandler::new(
                HandlerConfig::default(),
                runtime,
                guards,
                tracker,
                notifier.clone(),
                None,
            ),
            notifier,
        )
    }

    #[tokio::test]
    async fn opted_out_container_is_never_restarted() {
        let runtime = Arc::new(FakeRuntime { restarted: Mutex::new(vec![]) });
        let (handler, _notifier) = handler(runtime.clone());

        handler.handle(&summary("web", &[("autoheal", "false")])).await;

        assert!(runtime.restarted.lock().is_empty());
    }

    #[tokio::test]
    async fn action_notify_label_skips_restart_and_notifies() {
        let runtime = Arc::new(FakeRuntime { restarted: Mutex::new(vec![]) });
        let (handler, notifier) = handler(runtime.clone());

        handler
            .handle(&summary("web", &[("autoheal.action", "notify")]))
            .await;

        assert!(runtime.restarted.lock().is_empty());
        assert_eq!(notifier.actions.lock().len(), 1);
    }

    #[tokio::test]
    async fn default_action_restarts_and_records() {
        let runtime = Arc::new(FakeRuntime { restarted: Mutex::new(vec![]) });
        let (handler, notifier) = handler(runtime.clone());

        handler.handle(&summary("web", &[])).await;

        assert_eq!(runtime.restarted.lock().as_slice(), &["web".to_string()]);
        assert_eq!(notifier.actions.lock().len(), 1);
        assert_eq!(notifier.actions.lock()[0].1, false);
    }

    #[tokio::test]
    async fn notify_false_suppresses_notification_but_still_restarts() {
        let runtime = Arc::new(FakeRuntime { restarted: Mutex::new(vec![]) });
        let (handler, notifier) = handler(runtime.clone());

        handler
            .handle(&summary("web", &[("autoheal.notify", "false")]))
            .await;

        assert_eq!(runtime.restarted.lock().as_slice(), &["web".to_string()]);
        assert!(notifier.actions.lock().is_empty());
    }

    #[tokio::test]
    async fn hook_receives_name_short_id_state_and_timeout() {
        let runtime = Arc::new(FakeRuntime { restarted: Mutex::new(vec![]) });
        let calls: Arc<Mutex<Vec<(String, String, String, u64)>>> = Arc::new(Mutex::new(vec![]));
        let calls_clone = calls.clone();
        let hook: PostActionHook = Arc::new(move |name, short_id, state, timeout| {
            calls_clone.lock().push((name.to_string(), short_id.to_string(), state.to_string(), timeout));
        });

        let clock = Arc::new(VirtualClock::new());
        let ledger = OrchestrationLedger::new(clock.clone());
        let guards = Arc::new(GuardPipeline::new(clock.clone(), GuardConfig::default(), ledger, runtime.clone()));
        let tracker = RestartTracker::new(clock, Default::default());
        let notifier = Arc::new(RecordingNotifier { actions: Mutex::new(vec![]), skips: Mutex::new(vec![]) });

        let handler = UnhealthyHandler::new(
            HandlerConfig::default(),
            runtime,
            guards,
            tracker,
            notifier,
            Some(hook),
        );

        handler.handle(&summary("web", &[])).await;

        let calls = calls.lock();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0], ("web".to_string(), "web".to_string(), "running".to_string(), 10));
    }
}
