//! Prometheus metrics surface (§6), adapted from the teacher's
//! `api/metrics.rs`: a `PrometheusHandle` installed once at startup and a
//! minimal `axum` router serving it, bound only to the configured port.

use std::net::SocketAddr;
use std::time::Duration;

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

pub const RESTARTS_TOTAL: &str = "docker_guardian_restarts_total";
pub const SKIPS_TOTAL: &str = "docker_guardian_skips_total";
pub const NOTIFICATIONS_TOTAL: &str = "docker_guardian_notifications_total";
pub const EVENTS_PROCESSED_TOTAL: &str = "docker_guardian_events_processed_total";
pub const UNHEALTHY_CONTAINERS: &str = "docker_guardian_unhealthy_containers";
pub const CIRCUIT_OPEN_CONTAINERS: &str = "docker_guardian_circuit_open_containers";
pub const EVENT_STREAM_CONNECTED: &str = "docker_guardian_event_stream_connected";
pub const RESTART_DURATION_SECONDS: &str = "docker_guardian_restart_duration_seconds";
pub const EVENT_PROCESSING_DURATION_SECONDS: &str = "docker_guardian_event_processing_duration_seconds";

/// Registers metric descriptions and installs the global recorder. Must be
/// called exactly once, before any `counter!`/`gauge!`/`histogram!` call.
pub fn install() -> PrometheusHandle {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    metrics::describe_counter!(RESTARTS_TOTAL, "Container restart attempts, labeled by result");
    metrics::describe_counter!(SKIPS_TOTAL, "Guarded skips, labeled by reason");
    metrics::describe_counter!(NOTIFICATIONS_TOTAL, "Notification deliveries, labeled by service and result");
    metrics::describe_counter!(EVENTS_PROCESSED_TOTAL, "Container events processed, labeled by action");
    metrics::describe_gauge!(UNHEALTHY_CONTAINERS, "Containers currently reporting unhealthy");
    metrics::describe_gauge!(CIRCUIT_OPEN_CONTAINERS, "Containers whose restart circuit is open");
    metrics::describe_gauge!(EVENT_STREAM_CONNECTED, "1 if the event stream is connected, else 0");
    metrics::describe_histogram!(RESTART_DURATION_SECONDS, "Time taken to execute a restart/stop action");
    metrics::describe_histogram!(EVENT_PROCESSING_DURATION_SECONDS, "Time taken to process one container event");

    handle
}

/// Serves `/metrics` on its own listener, independent of any other HTTP
/// surface. Returns once the server is bound; runs until the process exits.
pub async fn serve(addr: SocketAddr, handle: PrometheusHandle) -> anyhow::Result<()> {
    let app = axum::Router::new().route(
        "/metrics",
        axum::routing::get(move || {
            let handle = handle.clone();
            async move { handle.render() }
        }),
    );

    tracing::info!(%addr, "Metrics endpoint listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

/// Small helper so call sites can record a restart duration without pulling
/// in `std::time::Instant` bookkeeping at every call site.
pub struct Timer(std::time::Instant);

impl Timer {
    pub fn start() -> Self {
        Self(std::time::Instant::now())
    }

    pub fn elapsed(&self) -> Duration {
        self.0.elapsed()
    }
}
