//! Pure predicates that decide whether a candidate action must be skipped.
//!
//! Evaluated in the fixed order required by §4.3 and §8 property 5:
//! orchestration cooldown, then grace period, then backup awareness.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::clock::Clock;
use crate::engine::OrchestrationLedger;
use crate::runtime::RuntimeClient;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Orchestration,
    Grace,
    Backup,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::Orchestration => "orchestration",
            SkipReason::Grace => "grace",
            SkipReason::Backup => "backup",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestrationScope {
    All,
    Affected,
}

#[derive(Debug, Clone)]
pub struct GuardConfig {
    pub orchestration_cooldown: Duration,
    pub orchestration_scope: OrchestrationScope,
    pub grace_period: Duration,
    pub backup_label: String,
    /// Name match for the running backup container; if empty, fall back to
    /// an image-name substring match for "docker-volume-backup".
    pub backup_container: String,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            orchestration_cooldown: Duration::ZERO,
            orchestration_scope: OrchestrationScope::All,
            grace_period: Duration::ZERO,
            backup_label: "docker-guardian.backup".to_string(),
            backup_container: String::new(),
        }
    }
}

/// Backup-active result cached for the duration of one scan cycle, per
/// §4.3: "cached for the duration of one scan cycle to avoid hammering the
/// runtime."
struct BackupCache {
    value: Option<bool>,
}

pub struct GuardPipeline {
    clock: Arc<dyn Clock>,
    config: GuardConfig,
    ledger: OrchestrationLedger,
    runtime: Arc<dyn RuntimeClient>,
    backup_cache: Mutex<BackupCache>,
}

impl GuardPipeline {
    pub fn new(
        clock: Arc<dyn Clock>,
        config: GuardConfig,
        ledger: OrchestrationLedger,
        runtime: Arc<dyn RuntimeClient>,
    ) -> Self {
        Self {
            clock,
            config,
            ledger,
            runtime,
            backup_cache: Mutex::new(BackupCache { value: None }),
        }
    }

    /// Call once at the top of every scan cycle (full scan or poll
    /// iteration) so the backup-active cache doesn't outlive the cycle it
    /// was computed for.
    pub fn reset_scan_cache(&self) {
        self.backup_cache.lock().value = None;
    }

    /// The configured orchestration cooldown, used to size the ledger's
    /// opportunistic purge window.
    pub fn orchestration_cooldown(&self) -> Duration {
        self.config.orchestration_cooldown
    }

    /// §4.3 `shouldSkip`.
    pub async fn should_skip(
        &self,
        id: &str,
        name: &str,
        labels: &std::collections::HashMap<String, String>,
    ) -> Option<SkipReason> {
        if let Some(reason) = self.check_orchestration(name) {
            return Some(reason);
        }
        if let Some(reason) = self.check_grace(id).await {
            return Some(reason);
        }
        if let Some(reason) = self.check_backup(labels).await {
            return Some(reason);
        }
        None
    }

    fn check_orchestration(&self, name: &str) -> Option<SkipReason> {
        if self.config.orchestration_cooldown.is_zero() {
            return None;
        }

        let now = self.clock.now();
        let recent = match self.config.orchestration_scope {
            OrchestrationScope::All => {
                self.ledger.any_within(now, self.config.orchestration_cooldown)
            }
            OrchestrationScope::Affected => {
                self.ledger.contains_within(name, now, self.config.orchestration_cooldown)
            }
        };

        recent.then_some(SkipReason::Orchestration)
    }

    async fn check_grace(&self, id: &str) -> Option<SkipReason> {
        if self.config.grace_period.is_zero() {
            return None;
        }

        // A `finishedAt` lookup failure is treated as "no data" (§7): the
        // grace guard is simply bypassed, it never blocks the pipeline.
        let finished_at = self.runtime.finished_at(id).await.ok()??;
        let elapsed = self.clock.wall_now().signed_duration_since(finished_at);
        let elapsed = elapsed.to_std().unwrap_or(Duration::ZERO);

        (elapsed < self.config.grace_period).then_some(SkipReason::Grace)
    }

    async fn check_backup(&self, labels: &std::collections::HashMap<String, String>) -> Option<SkipReason> {
        if !labels.contains_key(&self.config.backup_label) {
            return None;
        }

        let active = {
            let cached = self.backup_cache.lock().value;
            cached
        };

        let active = match active {
            Some(v) => v,
            None => {
                let computed = self.backup_is_active().await;
                self.backup_cache.lock().value = Some(computed);
                computed
            }
        };

        active.then_some(SkipReason::Backup)
    }

    async fn backup_is_active(&self) -> bool {
        let running = match self.runtime.list_running().await {
            Ok(r) => r,
            Err(_) => return false,
        };

        running.iter().any(|c| {
            if !self.config.backup_container.is_empty() {
                c.name == self.config.backup_container
            } else {
                c.image.contains("docker-volume-backup")
            }
        })
    }
}
