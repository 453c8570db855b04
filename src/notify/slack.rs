//! Slack webhook transport, adapted from the teacher's `notifications/mod.rs`
//! Slack sender: a single attachment with a color bar and title/body fields.

use async_trait::async_trait;
use serde_json::json;

use super::{Message, Transport};

pub struct SlackTransport {
    webhook_url: String,
    client: reqwest::Client,
}

impl SlackTransport {
    pub fn new(webhook_url: impl Into<String>) -> Self {
        Self {
            webhook_url: webhook_url.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Transport for SlackTransport {
    fn name(&self) -> &'static str {
        "slack"
    }

    async fn send(&self, message: &Message) -> anyhow::Result<()> {
        let payload = json!({
            "attachments": [{
                "color": message.severity.color_hex(),
                "title": message.title,
                "text": message.body,
            }]
        });

        let response = self
            .client
            .post(&self.webhook_url)
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            anyhow::bail!("Slack webhook returned {}", response.status());
        }
        Ok(())
    }
}
