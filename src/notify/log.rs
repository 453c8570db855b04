//! Log-only transport: always available, used as the default when no
//! webhook or SMTP endpoint is configured.

use async_trait::async_trait;

use super::{Message, Severity, Transport};

pub struct LogTransport;

#[async_trait]
impl Transport for LogTransport {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn send(&self, message: &Message) -> anyhow::Result<()> {
        match message.severity {
            Severity::Critical => tracing::error!(title = %message.title, "{}", message.body),
            Severity::Warning => tracing::warn!(title = %message.title, "{}", message.body),
            Severity::Info => tracing::info!(title = %message.title, "{}", message.body),
        }
        Ok(())
    }
}
