//! Wires the event source to the handlers: startup sequence, per-event
//! routing table, and the polling fallback for runtimes that can't stream
//! (§4.8).
//!
//! Grounded on the teacher's `engine/mod.rs` `DeploymentEngine::run()`
//! dispatch loop and `main.rs`'s startup-wiring order, generalized from
//! polling a deployment queue to routing normalized container events.

use std::sync::Arc;
use std::time::Duration;

use crate::clock::Clock;
use crate::engine::debouncer::CancellationToken;
use crate::engine::{ContainerEvent, Debouncer, DependencyResolver, EventWatcher, EventAction, GuardPipeline, HealthStatus, OrchestrationLedger, RestartTracker, UnhealthyHandler};
use crate::metrics;
use crate::notify::Notifier;
use crate::runtime::RuntimeClient;

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Interval between full scans when the runtime doesn't support
    /// streaming. Also used as the orchestration ledger's purge cadence.
    pub poll_interval: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
        }
    }
}

pub struct Controller {
    clock: Arc<dyn Clock>,
    config: ControllerConfig,
    runtime: Arc<dyn RuntimeClient>,
    guards: Arc<GuardPipeline>,
    ledger: OrchestrationLedger,
    tracker: RestartTracker,
    debouncer: Debouncer,
    unhealthy: Arc<UnhealthyHandler>,
    dependency: Arc<DependencyResolver>,
    notifier: Arc<dyn Notifier>,
    shutdown: CancellationToken,
}

impl Controller {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        clock: Arc<dyn Clock>,
        config: ControllerConfig,
        runtime: Arc<dyn RuntimeClient>,
        guards: Arc<GuardPipeline>,
        ledger: OrchestrationLedger,
        tracker: RestartTracker,
        debouncer: Debouncer,
        unhealthy: Arc<UnhealthyHandler>,
        dependency: Arc<DependencyResolver>,
        notifier: Arc<dyn Notifier>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            clock,
            config,
            runtime,
            guards,
            ledger,
            tracker,
            debouncer,
            unhealthy,
            dependency,
            notifier,
            shutdown,
        }
    }

    /// Startup sequence per §4.8: emit the startup notification, run one
    /// full scan so pre-existing unhealthy/exited containers are caught,
    /// then enter the steady-state loop (streaming or polling).
    pub async fn run(self) {
        self.notifier.startup("Docker Guardian is watching the runtime").await;

        self.full_scan().await;

        if self.runtime.supports_streaming() {
            self.run_streaming().await;
        } else {
            self.run_polling().await;
        }
    }

    async fn full_scan(&self) {
        self.guards.reset_scan_cache();
        self.unhealthy.scan().await;

        if let Ok(exited) = self.runtime.list_exited().await {
            for container in exited {
                self.dependency.handle_die(&container.id).await;
            }
        }
    }

    async fn run_streaming(&self) {
        let watcher = EventWatcher::new(self.clock.clone(), self.runtime.clone(), self.shutdown.clone());
        let mut events = watcher.run();

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => return,
                event = events.recv() => {
                    match event {
                        Some(event) => self.route(event).await,
                        None => return,
                    }
                }
            }
        }
    }

    async fn run_polling(&self) {
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => return,
                _ = self.clock.after(self.config.poll_interval).wait() => {
                    self.full_scan().await;
                    self.ledger.purge_older_than(self.config.poll_interval * 6);
                }
            }
        }
    }

    /// The per-event-type routing table from §4.8.
    async fn route(&self, event: ContainerEvent) {
        let timer = metrics::Timer::start();
        let action_label = event_action_label(event.action);
        metrics::counter!(metrics::EVENTS_PROCESSED_TOTAL, "action" => action_label).increment(1);

        match event.action {
            EventAction::HealthStatus => match event.health_status {
                Some(HealthStatus::Unhealthy) => {
                    let unhealthy = self.unhealthy.clone();
                    let id = event.id.clone();
                    self.debouncer.schedule(format!("unhealthy:{}", event.id), move || async move {
                        unhealthy.handle_event(&id).await;
                    });
                }
                Some(HealthStatus::Healthy) => {
                    self.tracker.reset(&event.id);
                }
                None => {}
            },
            EventAction::Die => {
                let dependency = self.dependency.clone();
                let id = event.id.clone();
                self.debouncer.schedule(format!("die:{}", event.id), move || async move {
                    dependency.handle_die(&id).await;
                });
            }
            EventAction::Create | EventAction::Destroy => {
                self.ledger.record(&event.name);
                // Opportunistic purge (§3, §4.8): tied to the event handler
                // itself in streaming mode, since there is no periodic scan
                // to piggyback on here.
                let cooldown = self.guards.orchestration_cooldown();
                if !cooldown.is_zero() {
                    self.ledger.purge_older_than(cooldown * 6);
                }
            }
            EventAction::Start => {}
        }

        metrics::histogram!(metrics::EVENT_PROCESSING_DURATION_SECONDS, "action" => action_label)
            .record(timer.elapsed().as_secs_f64());
    }
}

fn event_action_label(action: EventAction) -> &'static str {
    match action {
        EventAction::HealthStatus => "health_status",
        EventAction::Die => "die",
        EventAction::Start => "start",
        EventAction::Create => "create",
        EventAction::Destroy => "destroy",
    }
}
