//! Recovers containers left exited because the container whose network
//! namespace they share (`network_mode: container:<id>`) was restarted out
//! from under them (§4.7).
//!
//! Grounded on the teacher's `container_monitor.rs` restart path, reused
//! here for the "inspect, wait, re-check, start" shape; the parent-chasing
//! logic itself has no teacher analogue and is built from the
//! specification directly.

use std::sync::Arc;
use std::time::Duration;

use crate::clock::Clock;
use crate::engine::GuardPipeline;
use crate::metrics;
use crate::notify::Notifier;
use crate::runtime::RuntimeClient;

#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Delay after the parent is confirmed running before starting the
    /// child, giving the parent's own entrypoint time to come up.
    pub start_delay: Duration,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            start_delay: Duration::from_secs(5),
        }
    }
}

pub type PostActionHook = Arc<dyn Fn(&str, &str, &str, u64) + Send + Sync>;

pub struct DependencyResolver {
    clock: Arc<dyn Clock>,
    config: ResolverConfig,
    runtime: Arc<dyn RuntimeClient>,
    guards: Arc<GuardPipeline>,
    notifier: Arc<dyn Notifier>,
    hook: Option<PostActionHook>,
}

impl DependencyResolver {
    pub fn new(
        clock: Arc<dyn Clock>,
        config: ResolverConfig,
        runtime: Arc<dyn RuntimeClient>,
        guards: Arc<GuardPipeline>,
        notifier: Arc<dyn Notifier>,
        hook: Option<PostActionHook>,
    ) -> Self {
        Self {
            clock,
            config,
            runtime,
            guards,
            notifier,
            hook,
        }
    }

    /// The 7-step algorithm from §4.7, run for one container that just
    /// reported `die`. Multi-level chains (child of a child) converge
    /// naturally: each `die` independently re-triggers this same check
    /// against its own immediate parent, and a grandparent restart cascades
    /// one hop at a time as each die event fires in turn.
    pub async fn handle_die(&self, child_id: &str) {
        let child = match self.runtime.inspect(child_id).await {
            Ok(i) => i,
            Err(e) => {
                tracing::warn!(error = %e, container = child_id, "Failed to inspect exited container");
                return;
            }
        };

        let parent_id = match child.network_parent_id() {
            Some(p) => p.to_string(),
            None => return,
        };

        let parent = match self.runtime.inspect(&parent_id).await {
            Ok(i) => i,
            Err(e) => {
                tracing::warn!(error = %e, container = %parent_id, "Failed to inspect network parent");
                return;
            }
        };

        if parent.status != "running" {
            return;
        }

        if self
            .guards
            .should_skip(child_id, &child.name, &child.labels)
            .await
            .is_some()
        {
            return;
        }

        self.clock.after(self.config.start_delay).wait().await;

        let parent_still_running = matches!(self.runtime.status(&parent_id).await, Ok(status) if status == "running");
        if !parent_still_running {
            return;
        }

        let child_still_exited = matches!(self.runtime.status(child_id).await, Ok(status) if status == "exited");
        if !child_still_exited {
            return;
        }

        let timer = metrics::Timer::start();
        let result = self.runtime.start(child_id).await;
        metrics::histogram!(metrics::RESTART_DURATION_SECONDS, "container" => child.name.clone())
            .record(timer.elapsed().as_secs_f64());

        let resulting_state = match &result {
            Ok(()) => {
                metrics::counter!(metrics::RESTARTS_TOTAL, "container" => child.name.clone(), "result" => "success")
                    .increment(1);
                self.notifier
                    .action(
                        &format!("{} restarted after network parent came back up", child.name),
                        false,
                    )
                    .await;
                "running"
            }
            Err(e) => {
                metrics::counter!(metrics::RESTARTS_TOTAL, "container" => child.name.clone(), "result" => "failure")
                    .increment(1);
                self.notifier
                    .action(&format!("{} failed to restart: {}", child.name, e), false)
                    .await;
                "failed"
            }
        };

        if let Some(hook) = &self.hook {
            let short_id = &child_id[..child_id.len().min(12)];
            hook(&child.name, short_id, resulting_state, self.config.start_delay.as_secs());
        }
    }
}
