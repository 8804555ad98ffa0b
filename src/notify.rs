//! Completion notice.

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::info;

use crate::processor::RunSummary;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub subject: String,
    pub body: String,
    pub recipient: String,
}

impl Notification {
    pub fn completion(recipient: &str, finished_at: DateTime<Local>, summary: &RunSummary) -> Self {
        let body = format!(
            "Image extraction finished at {}.\n\n\
             rows: {}\n\
             skipped (already processed): {}\n\
             processed: {}\n\
             images resolved: {}\n\
             inherited from parent: {}\n\
             parent images kept from earlier runs: {}\n\
             not found in catalog: {}\n\
             no 360 photo: {}\n\
             download failed: {}\n\
             conversion failed: {}\n\
             children without parent image: {}\n",
            finished_at.format("%H:%M:%S"),
            summary.total,
            summary.skipped,
            summary.processed,
            summary.resolved,
            summary.inherited,
            summary.restored,
            summary.catalog_misses,
            summary.asset_misses,
            summary.download_misses,
            summary.conversion_failures,
            summary.orphans,
        );
        Self {
            subject: "Product image extraction finished".into(),
            body,
            recipient: recipient.to_string(),
        }
    }
}

#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, message: &Notification) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub from: String,
}

/// Implicit-TLS SMTP relay with login credentials.
pub struct SmtpNotifier {
    cfg: SmtpConfig,
}

impl SmtpNotifier {
    pub fn new(cfg: SmtpConfig) -> Self {
        Self { cfg }
    }
}

#[async_trait::async_trait]
impl Notifier for SmtpNotifier {
    async fn notify(&self, message: &Notification) -> Result<()> {
        let email = Message::builder()
            .from(self.cfg.from.parse::<Mailbox>().context("invalid sender address")?)
            .to(message.recipient.parse::<Mailbox>().context("invalid recipient address")?)
            .subject(message.subject.as_str())
            .header(ContentType::TEXT_PLAIN)
            .body(message.body.clone())
            .context("build email")?;

        let mailer = AsyncSmtpTransport::<Tokio1Executor>::relay(&self.cfg.host)
            .with_context(|| format!("smtp relay {}", self.cfg.host))?
            .port(self.cfg.port)
            .credentials(Credentials::new(
                self.cfg.username.clone(),
                self.cfg.password.clone(),
            ))
            .build();
        mailer.send(email).await.context("smtp send")?;
        info!(to = %message.recipient, host = %self.cfg.host, "completion email sent");
        Ok(())
    }
}

/// Used when no SMTP relay is configured.
pub struct LogNotifier;

#[async_trait::async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, message: &Notification) -> Result<()> {
        info!(
            to = %message.recipient,
            subject = %message.subject,
            body = %message.body,
            "completion notice (smtp not configured)"
        );
        Ok(())
    }
}
