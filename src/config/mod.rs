//! Configuration: nested sub-structs with per-field defaults, loaded from
//! `DOCKER_GUARDIAN_*` environment variables via `clap`'s `env` attribute,
//! or from a TOML file when `--config` is given.
//!
//! Grounded on the teacher's `config/mod.rs`: the same nested-struct/
//! `#[serde(default = "fn_name")]`/free-function-default shape, adapted
//! from a pure-TOML file format to clap `Args` (flattened into `main.rs`'s
//! `Cli`) so environment variables are first-class per §6's operator
//! surface.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use serde::Deserialize;

#[derive(Debug, Clone, Args, Deserialize)]
#[serde(default)]
pub struct Config {
    #[command(flatten)]
    #[serde(flatten)]
    pub core: CoreConfig,
    #[command(flatten)]
    #[serde(flatten)]
    pub guard: GuardConfig,
    #[command(flatten)]
    #[serde(flatten)]
    pub health: HealthConfig,
    #[command(flatten)]
    #[serde(flatten)]
    pub tracker: TrackerConfig,
    #[command(flatten)]
    #[serde(flatten)]
    pub hooks: HooksConfig,
    #[command(flatten)]
    #[serde(flatten)]
    pub observability: ObservabilityConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            core: CoreConfig::default(),
            guard: GuardConfig::default(),
            health: HealthConfig::default(),
            tracker: TrackerConfig::default(),
            hooks: HooksConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Args, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Docker/Podman socket to connect to.
    #[arg(long, env = "DOCKER_GUARDIAN_DOCKER_SOCKET", default_value = "/var/run/docker.sock")]
    #[serde(default = "default_docker_socket")]
    pub docker_socket: String,

    /// `"all"` disables label filtering in unhealthy-container listing.
    #[arg(long, env = "DOCKER_GUARDIAN_LABEL", default_value = "all")]
    #[serde(default = "default_label")]
    pub label: String,

    /// Only consider currently-running containers when scanning for
    /// unhealthy ones.
    #[arg(long, env = "DOCKER_GUARDIAN_ONLY_MONITOR_RUNNING", default_value_t = true)]
    #[serde(default = "default_true")]
    pub only_monitor_running: bool,

    /// Interval between full scans when the runtime event stream is
    /// unavailable. Seconds.
    #[arg(long, env = "DOCKER_GUARDIAN_POLL_INTERVAL_SECONDS", default_value_t = 10)]
    #[serde(default = "default_poll_interval_seconds")]
    pub poll_interval_seconds: u64,

    /// Default stop timeout used for restart/stop actions, in seconds,
    /// unless overridden by the container's `autoheal.stop.timeout` label.
    #[arg(long, env = "DOCKER_GUARDIAN_STOP_TIMEOUT_SECONDS", default_value_t = 10)]
    #[serde(default = "default_stop_timeout_seconds")]
    pub stop_timeout_seconds: u64,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            docker_socket: default_docker_socket(),
            label: default_label(),
            only_monitor_running: default_true(),
            poll_interval_seconds: default_poll_interval_seconds(),
            stop_timeout_seconds: default_stop_timeout_seconds(),
        }
    }
}

fn default_docker_socket() -> String {
    if cfg!(windows) {
        "npipe:////./pipe/docker_engine".to_string()
    } else {
        "/var/run/docker.sock".to_string()
    }
}

fn default_label() -> String {
    "all".to_string()
}

fn default_true() -> bool {
    true
}

fn default_poll_interval_seconds() -> u64 {
    10
}

fn default_stop_timeout_seconds() -> u64 {
    10
}

#[derive(Debug, Clone, Args, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    /// Skip actions on containers within this many seconds of an observed
    /// orchestration `create`/`destroy` event. 0 disables the guard.
    #[arg(long, env = "DOCKER_GUARDIAN_ORCHESTRATION_COOLDOWN_SECONDS", default_value_t = 0)]
    #[serde(default)]
    pub orchestration_cooldown_seconds: u64,

    /// `"all"` or `"affected"`: whether the cooldown applies globally or
    /// only to the container named in the orchestration event.
    #[arg(long, env = "DOCKER_GUARDIAN_ORCHESTRATION_SCOPE", default_value = "all")]
    #[serde(default = "default_scope")]
    pub orchestration_scope: String,

    /// Skip actions on containers that exited fewer than this many seconds
    /// ago. 0 disables the guard.
    #[arg(long, env = "DOCKER_GUARDIAN_GRACE_PERIOD_SECONDS", default_value_t = 0)]
    #[serde(default)]
    pub grace_period_seconds: u64,

    /// Label marking a container as backup-sensitive.
    #[arg(long, env = "DOCKER_GUARDIAN_BACKUP_LABEL", default_value = "docker-guardian.backup")]
    #[serde(default = "default_backup_label")]
    pub backup_label: String,

    /// Name of the running backup container to check for. Empty falls back
    /// to an image-name substring match.
    #[arg(long, env = "DOCKER_GUARDIAN_BACKUP_CONTAINER", default_value = "")]
    #[serde(default)]
    pub backup_container: String,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            orchestration_cooldown_seconds: 0,
            orchestration_scope: default_scope(),
            grace_period_seconds: 0,
            backup_label: default_backup_label(),
            backup_container: String::new(),
        }
    }
}

fn default_scope() -> String {
    "all".to_string()
}

fn default_backup_label() -> String {
    "docker-guardian.backup".to_string()
}

impl GuardConfig {
    pub fn to_engine(&self) -> crate::engine::guard_pipeline::GuardConfig {
        crate::engine::guard_pipeline::GuardConfig {
            orchestration_cooldown: Duration::from_secs(self.orchestration_cooldown_seconds),
            orchestration_scope: if self.orchestration_scope == "affected" {
                crate::engine::guard_pipeline::OrchestrationScope::Affected
            } else {
                crate::engine::guard_pipeline::OrchestrationScope::All
            },
            grace_period: Duration::from_secs(self.grace_period_seconds),
            backup_label: self.backup_label.clone(),
            backup_container: self.backup_container.clone(),
        }
    }
}

#[derive(Debug, Clone, Args, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Consecutive unhealthy observations required before acting.
    #[arg(long, env = "DOCKER_GUARDIAN_UNHEALTHY_THRESHOLD", default_value_t = 1)]
    #[serde(default = "default_unhealthy_threshold")]
    pub unhealthy_threshold: u32,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            unhealthy_threshold: default_unhealthy_threshold(),
        }
    }
}

fn default_unhealthy_threshold() -> u32 {
    1
}

#[derive(Debug, Clone, Args, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    #[arg(long, env = "DOCKER_GUARDIAN_RESTART_INITIAL_DELAY_SECONDS", default_value_t = 10)]
    #[serde(default = "default_initial_delay")]
    pub restart_initial_delay_seconds: u64,

    #[arg(long, env = "DOCKER_GUARDIAN_RESTART_BACKOFF_MULTIPLIER", default_value_t = 2.0)]
    #[serde(default = "default_multiplier")]
    pub restart_backoff_multiplier: f64,

    #[arg(long, env = "DOCKER_GUARDIAN_RESTART_MAX_DELAY_SECONDS", default_value_t = 300)]
    #[serde(default = "default_max_delay")]
    pub restart_max_delay_seconds: u64,

    #[arg(long, env = "DOCKER_GUARDIAN_RESTART_WINDOW_SECONDS", default_value_t = 300)]
    #[serde(default = "default_window")]
    pub restart_window_seconds: u64,

    /// 0 disables the budget (unlimited restarts within the window).
    #[arg(long, env = "DOCKER_GUARDIAN_RESTART_BUDGET", default_value_t = 5)]
    #[serde(default = "default_budget")]
    pub restart_budget: u32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            restart_initial_delay_seconds: default_initial_delay(),
            restart_backoff_multiplier: default_multiplier(),
            restart_max_delay_seconds: default_max_delay(),
            restart_window_seconds: default_window(),
            restart_budget: default_budget(),
        }
    }
}

fn default_initial_delay() -> u64 {
    10
}
fn default_multiplier() -> f64 {
    2.0
}
fn default_max_delay() -> u64 {
    300
}
fn default_window() -> u64 {
    300
}
fn default_budget() -> u32 {
    5
}

impl TrackerConfig {
    pub fn to_engine(&self) -> crate::engine::restart_tracker::TrackerConfig {
        crate::engine::restart_tracker::TrackerConfig {
            initial_delay: Duration::from_secs(self.restart_initial_delay_seconds),
            multiplier: self.restart_backoff_multiplier,
            max_delay: Duration::from_secs(self.restart_max_delay_seconds),
            window: Duration::from_secs(self.restart_window_seconds),
            budget: self.restart_budget,
        }
    }
}

#[derive(Debug, Clone, Args, Deserialize)]
#[serde(default)]
pub struct HooksConfig {
    /// Shell command invoked asynchronously after an action completes.
    /// Receives `DOCKER_GUARDIAN_CONTAINER_ID` and `DOCKER_GUARDIAN_ACTION`
    /// in its environment. Unset disables hooks.
    #[arg(long, env = "DOCKER_GUARDIAN_POST_ACTION_HOOK")]
    #[serde(default)]
    pub post_action_hook: Option<String>,
}

impl Default for HooksConfig {
    fn default() -> Self {
        Self { post_action_hook: None }
    }
}

#[derive(Debug, Clone, Args, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    #[arg(long, env = "DOCKER_GUARDIAN_LOG_JSON", default_value_t = false)]
    #[serde(default)]
    pub log_json: bool,

    #[arg(long, env = "DOCKER_GUARDIAN_LOG_LEVEL", default_value = "info")]
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// 0 disables the metrics endpoint.
    #[arg(long, env = "DOCKER_GUARDIAN_METRICS_PORT", default_value_t = 9090)]
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,

    #[arg(long, env = "DOCKER_GUARDIAN_SLACK_WEBHOOK_URL")]
    #[serde(default)]
    pub slack_webhook_url: Option<String>,

    #[arg(long, env = "DOCKER_GUARDIAN_DISCORD_WEBHOOK_URL")]
    #[serde(default)]
    pub discord_webhook_url: Option<String>,

    #[arg(long, env = "DOCKER_GUARDIAN_WEBHOOK_URL")]
    #[serde(default)]
    pub webhook_url: Option<String>,

    #[arg(long, env = "DOCKER_GUARDIAN_SMTP_HOST")]
    #[serde(default)]
    pub smtp_host: Option<String>,
    #[arg(long, env = "DOCKER_GUARDIAN_SMTP_USERNAME")]
    #[serde(default)]
    pub smtp_username: Option<String>,
    #[arg(long, env = "DOCKER_GUARDIAN_SMTP_PASSWORD")]
    #[serde(default)]
    pub smtp_password: Option<String>,
    #[arg(long, env = "DOCKER_GUARDIAN_SMTP_FROM")]
    #[serde(default)]
    pub smtp_from: Option<String>,
    #[arg(long, env = "DOCKER_GUARDIAN_SMTP_TO")]
    #[serde(default)]
    pub smtp_to: Option<String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_json: false,
            log_level: default_log_level(),
            metrics_port: default_metrics_port(),
            slack_webhook_url: None,
            discord_webhook_url: None,
            webhook_url: None,
            smtp_host: None,
            smtp_username: None,
            smtp_password: None,
            smtp_from: None,
            smtp_to: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

impl Config {
    /// Loads from a TOML file. Used when `--config <path>` is given; the
    /// file entirely replaces the environment/flag-derived defaults rather
    /// than merging with them, matching §6: "`--config` is a fallback, not
    /// an overlay."
    pub fn from_toml(path: &Path) -> Result<Self> {
        tracing::info!(path = %path.display(), "Loading configuration from file");
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&content).with_context(|| "Failed to parse configuration file")
    }

    /// Enumerates every validation error rather than failing fast on the
    /// first one, so a misconfigured operator sees the whole list at once.
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();

        if self.guard.orchestration_scope != "all" && self.guard.orchestration_scope != "affected" {
            errors.push(format!(
                "orchestration_scope must be \"all\" or \"affected\", got {:?}",
                self.guard.orchestration_scope
            ));
        }

        if self.tracker.restart_backoff_multiplier < 1.0 {
            errors.push("restart_backoff_multiplier must be at least 1.0".to_string());
        }

        if self.health.unhealthy_threshold == 0 {
            errors.push("unhealthy_threshold must be at least 1".to_string());
        }

        if let Some(smtp) = &self.observability.smtp_host {
            if smtp.is_empty() {
                errors.push("smtp_host, if set, must not be empty".to_string());
            }
            if self.observability.smtp_from.is_none() || self.observability.smtp_to.is_none() {
                errors.push("smtp_from and smtp_to are required when smtp_host is set".to_string());
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            anyhow::bail!("Invalid configuration:\n  - {}", errors.join("\n  - "))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn invalid_scope_is_rejected() {
        let mut config = Config::default();
        config.guard.orchestration_scope = "bogus".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn smtp_without_from_to_is_rejected() {
        let mut config = Config::default();
        config.observability.smtp_host = Some("smtp.example.com".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn constant_backoff_multiplier_of_one_is_valid() {
        let mut config = Config::default();
        config.tracker.restart_backoff_multiplier = 1.0;
        config.validate().unwrap();
    }

    #[test]
    fn backoff_multiplier_below_one_is_rejected() {
        let mut config = Config::default();
        config.tracker.restart_backoff_multiplier = 0.5;
        assert!(config.validate().is_err());
    }
}
