use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use lettre::{
    message::header::ContentType, transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use tracing::{info, instrument};

use crate::config::MailConfig;

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, to: &str, subject: &str, body: &str) -> anyhow::Result<()>;
}

/// SMTP relay with STARTTLS.
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: String,
}

impl SmtpMailer {
    pub fn new(cfg: &MailConfig, host: &str) -> anyhow::Result<Self> {
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
            .context("smtp relay")?
            .port(cfg.smtp_port)
            .timeout(Some(std::time::Duration::from_secs(10)));
        if let (Some(user), Some(pass)) = (&cfg.smtp_user, &cfg.smtp_password) {
            builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }
        Ok(Self {
            transport: builder.build(),
            from: cfg.from.clone(),
        })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    #[instrument(skip(self, body))]
    async fn send(&self, to: &str, subject: &str, body: &str) -> anyhow::Result<()> {
        let email = Message::builder()
            .from(self.from.parse().context("invalid from address")?)
            .to(to.parse().context("invalid to address")?)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body.to_string())
            .context("build email")?;
        self.transport.send(email).await.context("smtp send")?;
        info!(to, "mail sent");
        Ok(())
    }
}

/// Used when no SMTP host is configured.
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, to: &str, subject: &str, body: &str) -> anyhow::Result<()> {
        info!(to, subject, body, "mail transport disabled; logging mail");
        Ok(())
    }
}

pub fn build(cfg: &MailConfig) -> anyhow::Result<Arc<dyn Mailer>> {
    match &cfg.smtp_host {
        Some(host) => Ok(Arc::new(SmtpMailer::new(cfg, host)?)),
        None => Ok(Arc::new(LogMailer)),
    }
}

pub fn verification_email(client_url: &str, token: &str) -> (String, String) {
    (
        "Verify your email address".to_string(),
        format!(
            "Welcome!\n\n\
            Confirm your email address by opening the link below:\n\n\
            {}/verify-email?token={}\n\n\
            The link expires in 24 hours.",
            client_url, token
        ),
    )
}

pub fn reset_email(client_url: &str, token: &str, ttl_minutes: i64) -> (String, String) {
    (
        "Password reset request".to_string(),
        format!(
            "A password reset was requested for your account.\n\n\
            Choose a new password here:\n\n\
            {}/reset-password?token={}\n\n\
            This link expires in {} minutes. If you did not request it, ignore this email.",
            client_url, token, ttl_minutes
        ),
    )
}
