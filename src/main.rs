use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use docker_guardian::config::Config;
use docker_guardian::engine::debouncer::CancellationToken;
use docker_guardian::engine::{Controller, Debouncer, DependencyResolver, GuardPipeline, OrchestrationLedger, RestartTracker, UnhealthyHandler};
use docker_guardian::engine::controller::ControllerConfig;
use docker_guardian::engine::dependency_resolver::ResolverConfig;
use docker_guardian::engine::unhealthy_handler::HandlerConfig;
use docker_guardian::clock::{Clock, SystemClock};
use docker_guardian::notify::{discord::DiscordTransport, email::EmailTransport, log::LogTransport, slack::SlackTransport, webhook::WebhookTransport, FanoutNotifier, Notifier, Transport};
use docker_guardian::runtime::{DockerRuntime, RuntimeClient};

#[derive(Parser, Debug)]
#[command(name = "docker-guardian")]
#[command(author, version, about = "Supervisor daemon that restarts, quarantines, or notifies on unhealthy and orphaned Docker containers", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Load configuration from a TOML file instead of environment variables
    /// and flags. When given, the file entirely replaces them.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(flatten)]
    opts: Config,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Validate configuration and exit, printing any errors found.
    ConfigCheck,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::from_toml(path)?,
        None => cli.opts,
    };

    init_tracing(&config);

    if let Err(e) = config.validate() {
        tracing::error!("{}", e);
        std::process::exit(1);
    }

    if matches!(cli.command, Some(Command::ConfigCheck)) {
        tracing::info!("Configuration is valid");
        return Ok(());
    }

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting Docker Guardian");

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let shutdown = CancellationToken::new();

    // A failure to reach the runtime is fatal at startup (§7): there is
    // nothing useful this process can do without it.
    let runtime: Arc<dyn RuntimeClient> = match DockerRuntime::new(&config.core.docker_socket) {
        Ok(r) => Arc::new(r),
        Err(e) => {
            tracing::error!(error = %e, "Failed to connect to the container runtime");
            std::process::exit(1);
        }
    };

    let notifier: Arc<dyn Notifier> = Arc::new(build_notifier(&config, clock.clone()));

    let ledger = OrchestrationLedger::new(clock.clone());
    let tracker = RestartTracker::new(clock.clone(), config.tracker.to_engine());
    let guards = Arc::new(GuardPipeline::new(
        clock.clone(),
        config.guard.to_engine(),
        ledger.clone(),
        runtime.clone(),
    ));
    let debouncer = Debouncer::new(clock.clone(), Duration::from_secs(5), shutdown.clone());

    let hook = build_hook(&config);

    let unhealthy = Arc::new(UnhealthyHandler::new(
        HandlerConfig {
            label_filter: config.core.label.clone(),
            only_running: config.core.only_monitor_running,
            default_stop_timeout: Duration::from_secs(config.core.stop_timeout_seconds),
            unhealthy_threshold: config.health.unhealthy_threshold,
        },
        runtime.clone(),
        guards.clone(),
        tracker.clone(),
        notifier.clone(),
        hook.clone(),
    ));

    let dependency = Arc::new(DependencyResolver::new(
        clock.clone(),
        ResolverConfig::default(),
        runtime.clone(),
        guards.clone(),
        notifier.clone(),
        hook,
    ));

    if config.observability.metrics_port != 0 {
        let handle = docker_guardian::metrics::install();
        let addr: std::net::SocketAddr = ([0, 0, 0, 0], config.observability.metrics_port).into();
        tokio::spawn(async move {
            if let Err(e) = docker_guardian::metrics::serve(addr, handle).await {
                tracing::error!(error = %e, "Metrics server exited");
            }
        });
    }

    let controller = Controller::new(
        clock,
        ControllerConfig {
            poll_interval: Duration::from_secs(config.core.poll_interval_seconds),
        },
        runtime,
        guards,
        ledger,
        tracker,
        debouncer,
        unhealthy,
        dependency,
        notifier,
        shutdown.clone(),
    );

    tokio::spawn(async move {
        controller.run().await;
    });

    shutdown_signal().await;
    tracing::info!("Shutdown signal received, draining in-flight work");
    shutdown.cancel();

    // Give the notifier a grace period to flush any in-flight retries (§5).
    tokio::time::sleep(Duration::from_secs(10)).await;

    tracing::info!("Docker Guardian stopped");
    Ok(())
}

fn init_tracing(config: &Config) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.observability.log_level));

    if config.observability.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

fn build_notifier(config: &Config, clock: Arc<dyn Clock>) -> FanoutNotifier {
    let mut transports: Vec<Arc<dyn Transport>> = vec![Arc::new(LogTransport)];

    if let Some(url) = &config.observability.slack_webhook_url {
        transports.push(Arc::new(SlackTransport::new(url.clone())));
    }
    if let Some(url) = &config.observability.discord_webhook_url {
        transports.push(Arc::new(DiscordTransport::new(url.clone())));
    }
    if let Some(url) = &config.observability.webhook_url {
        transports.push(Arc::new(WebhookTransport::new(url.clone())));
    }
    if let (Some(host), Some(from), Some(to)) = (
        &config.observability.smtp_host,
        &config.observability.smtp_from,
        &config.observability.smtp_to,
    ) {
        let username = config.observability.smtp_username.clone().unwrap_or_default();
        let password = config.observability.smtp_password.clone().unwrap_or_default();
        match EmailTransport::new(host, &username, &password, from.clone(), to.clone()) {
            Ok(email) => transports.push(Arc::new(email)),
            Err(e) => tracing::warn!(error = %e, "Failed to configure email transport"),
        }
    }

    FanoutNotifier::new(clock, transports)
}

/// Builds the `postRestartScript` hook (§6): invoked as
/// `<command> name shortId state timeoutSeconds`.
fn build_hook(config: &Config) -> Option<docker_guardian::engine::unhealthy_handler::PostActionHook> {
    let command = config.hooks.post_action_hook.clone()?;
    Some(Arc::new(move |name: &str, short_id: &str, state: &str, timeout_seconds: u64| {
        let command = command.clone();
        let name = name.to_string();
        let short_id = short_id.to_string();
        let state = state.to_string();
        tokio::spawn(async move {
            // `sh -c script $0 $1 $2 ...`: the arg right after the script
            // fills positional `$0`, so pass a placeholder there and let
            // the four documented values land in `$1`..`$4`.
            let result = tokio::process::Command::new("sh")
                .arg("-c")
                .arg(&command)
                .arg("post-action-hook")
                .arg(&name)
                .arg(&short_id)
                .arg(&state)
                .arg(timeout_seconds.to_string())
                .status()
                .await;

            if let Err(e) = result {
                tracing::warn!(error = %e, command = %command, "Post-action hook failed to launch");
            }
        });
    }))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
