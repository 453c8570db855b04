//! SMTP transport, adapted from the teacher's `notifications/mod.rs` email
//! sender: `lettre`'s async SMTP transport with a multipart plain-text body.

use async_trait::async_trait;
use lettre::message::MultiPart;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message as LettreMessage, Tokio1Executor};

use super::{Message, Transport};

pub struct EmailTransport {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: String,
    to: String,
}

impl EmailTransport {
    pub fn new(
        smtp_host: &str,
        username: &str,
        password: &str,
        from: impl Into<String>,
        to: impl Into<String>,
    ) -> anyhow::Result<Self> {
        let creds = Credentials::new(username.to_string(), password.to_string());
        let transport = AsyncSmtpTransport::<Tokio1Executor>::relay(smtp_host)?
            .credentials(creds)
            .build();

        Ok(Self {
            transport,
            from: from.into(),
            to: to.into(),
        })
    }
}

#[async_trait]
impl Transport for EmailTransport {
    fn name(&self) -> &'static str {
        "email"
    }

    async fn send(&self, message: &Message) -> anyhow::Result<()> {
        let email = LettreMessage::builder()
            .from(self.from.parse()?)
            .to(self.to.parse()?)
            .subject(&message.title)
            .multipart(MultiPart::alternative_plain_html(
                message.body.clone(),
                format!("<p>{}</p>", message.body),
            ))?;

        self.transport.send(email).await?;
        Ok(())
    }
}
