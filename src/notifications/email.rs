use std::sync::Arc;

use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message as MailMessage, Tokio1Executor,
};

use super::{render, LifecycleEvent, Message, Notifier};
use crate::{
    config::EmailConfig,
    domain::OutgoingEmail,
    error::{AppError, Result},
};

#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send(&self, email: OutgoingEmail) -> Result<()>;
}

pub struct SmtpEmailSender {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    reply_to: Option<Mailbox>,
}

impl SmtpEmailSender {
    pub fn new(config: &EmailConfig) -> Result<Self> {
        let host = config
            .smtp_host
            .as_deref()
            .ok_or_else(|| AppError::Internal("email.smtp_host is not set".to_string()))?;

        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
            .map_err(|e| AppError::Internal(format!("Invalid SMTP relay: {}", e)))?
            .port(config.smtp_port);

        if let (Some(username), Some(password)) = (&config.smtp_username, &config.smtp_password) {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }

        let from = config
            .from_address
            .parse::<Mailbox>()
            .map_err(|e| AppError::Internal(format!("Invalid from address: {}", e)))?;

        let reply_to = config
            .reply_to
            .as_deref()
            .map(str::parse::<Mailbox>)
            .transpose()
            .map_err(|e| AppError::Internal(format!("Invalid reply-to address: {}", e)))?;

        Ok(Self {
            transport: builder.build(),
            from,
            reply_to,
        })
    }
}

#[async_trait]
impl EmailSender for SmtpEmailSender {
    async fn send(&self, email: OutgoingEmail) -> Result<()> {
        let to = email
            .to
            .parse::<Mailbox>()
            .map_err(|e| AppError::BadRequest(format!("Invalid recipient {}: {}", email.to, e)))?;

        let mut builder = MailMessage::builder()
            .from(self.from.clone())
            .to(to)
            .subject(email.subject)
            .header(ContentType::TEXT_HTML);
        if let Some(reply_to) = &self.reply_to {
            builder = builder.reply_to(reply_to.clone());
        }

        let message = builder
            .body(email.html)
            .map_err(|e| AppError::Internal(format!("Failed to build email: {}", e)))?;

        self.transport
            .send(message)
            .await
            .map_err(|e| AppError::Internal(format!("SMTP send failed: {}", e)))?;

        Ok(())
    }
}

/// Stands in for SMTP when email is disabled.
pub struct LogEmailSender;

#[async_trait]
impl EmailSender for LogEmailSender {
    async fn send(&self, email: OutgoingEmail) -> Result<()> {
        tracing::info!(to = %email.to, subject = %email.subject, "Email (not sent, SMTP disabled)");
        Ok(())
    }
}

pub struct EmailNotifier {
    sender: Arc<dyn EmailSender>,
    base_url: String,
}

impl EmailNotifier {
    pub fn new(sender: Arc<dyn EmailSender>, base_url: String) -> Self {
        Self { sender, base_url }
    }
}

#[async_trait]
impl Notifier for EmailNotifier {
    fn name(&self) -> &str {
        "email"
    }

    async fn handle_event(&self, event: &LifecycleEvent) -> Result<()> {
        let mut first_error = None;

        // Keep going so one bad address does not starve the other recipients.
        for message in render(event, &self.base_url) {
            let email = render_email(&message);
            if let Err(e) = self.sender.send(email).await {
                tracing::warn!("Failed to email {}: {:?}", message.recipient_email, e);
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

pub fn render_email(message: &Message) -> OutgoingEmail {
    let button = message
        .link
        .as_deref()
        .map(|link| {
            format!(
                r#"<p style="margin:24px 0"><a href="{}" style="background:#233dff;color:#ffffff;padding:12px 24px;border-radius:6px;text-decoration:none">View on Got1</a></p>"#,
                ammonia::clean_text(link)
            )
        })
        .unwrap_or_default();

    let html = format!(
        r#"<!DOCTYPE html>
<html>
<body style="font-family:Arial,sans-serif;color:#111111;max-width:600px;margin:0 auto;padding:24px">
<h2>{title}</h2>
<p>Hi {name},</p>
<p>{body}</p>
{button}
<p style="color:#666666;font-size:12px">You are receiving this because you have an account on Got1.</p>
</body>
</html>"#,
        title = ammonia::clean_text(&message.title),
        name = ammonia::clean_text(&message.recipient_name),
        body = ammonia::clean_text(&message.body),
        button = button,
    );

    OutgoingEmail {
        to: message.recipient_email.clone(),
        subject: message.title.clone(),
        html,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    fn message(body: &str) -> Message {
        Message {
            recipient_id: Uuid::new_v4(),
            recipient_email: "avery@example.com".to_string(),
            recipient_name: "Avery".to_string(),
            kind: "evaluation_denied",
            title: "Evaluation Denied".to_string(),
            body: body.to_string(),
            link: Some("https://got1.app/evaluations/1".to_string()),
            metadata: json!({}),
        }
    }

    #[test]
    fn user_text_is_escaped() {
        let email = render_email(&message("Reason: <script>alert(1)</script>"));

        assert!(!email.html.contains("<script>"));
        assert!(email.html.contains("&lt;script&gt;"));
        assert_eq!(email.to, "avery@example.com");
        assert_eq!(email.subject, "Evaluation Denied");
    }

    #[test]
    fn link_becomes_a_button() {
        let email = render_email(&message("Ready"));
        assert!(email.html.contains("View on Got1"));
        assert!(email.html.contains("got1.app"));
    }
}
