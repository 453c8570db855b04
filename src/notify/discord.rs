//! Discord webhook transport, adapted from the teacher's `notifications/mod.rs`
//! Discord sender: a single embed with a decimal color code.

use async_trait::async_trait;
use serde_json::json;

use super::{Message, Transport};

pub struct DiscordTransport {
    webhook_url: String,
    client: reqwest::Client,
}

impl DiscordTransport {
    pub fn new(webhook_url: impl Into<String>) -> Self {
        Self {
            webhook_url: webhook_url.into(),
            client: reqwest::Client::new(),
        }
    }
}

fn color_decimal(hex: &str) -> u32 {
    u32::from_str_radix(hex.trim_start_matches('#'), 16).unwrap_or(0)
}

#[async_trait]
impl Transport for DiscordTransport {
    fn name(&self) -> &'static str {
        "discord"
    }

    async fn send(&self, message: &Message) -> anyhow::Result<()> {
        let payload = json!({
            "embeds": [{
                "title": message.title,
                "description": message.body,
                "color": color_decimal(message.severity.color_hex()),
            }]
        });

        let response = self
            .client
            .post(&self.webhook_url)
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            anyhow::bail!("Discord webhook returned {}", response.status());
        }
        Ok(())
    }
}
