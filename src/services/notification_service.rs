use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Attachment, Mailbox, MultiPart, SinglePart},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::config::{env_optional, env_parse, env_string, ConfigError, EnvLookup};

// ==============================================================================
// Configuration
// ==============================================================================

#[derive(Debug, Clone)]
pub struct EmailConfig {
    /// With SMTP disabled, emails are only logged.
    pub smtp_enabled: bool,
    pub host: Option<String>,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub from_address: Option<String>,
    pub from_name: String,
}

impl EmailConfig {
    pub fn from_lookup(lookup: EnvLookup) -> Result<Self, ConfigError> {
        Ok(Self {
            smtp_enabled: env_parse(lookup, "SMTP_ENABLED", false)?,
            host: env_optional(lookup, "EMAIL_HOST"),
            port: env_parse(lookup, "EMAIL_PORT", 587)?,
            username: env_optional(lookup, "EMAIL_USER"),
            password: env_optional(lookup, "EMAIL_PASS"),
            from_address: env_optional(lookup, "EMAIL_FROM"),
            from_name: env_string(lookup, "EMAIL_FROM_NAME", "Agworld Reporter"),
        })
    }
}

// ==============================================================================
// Notifier seam
// ==============================================================================

#[derive(Debug, Clone)]
pub struct EmailAttachment {
    pub filename: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct ReportEmail {
    pub subject: String,
    pub text_body: String,
    pub html_body: Option<String>,
    pub attachment: Option<EmailAttachment>,
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("email configuration incomplete: {0}")]
    Config(String),

    #[error("invalid address {0}")]
    Address(String),

    #[error("failed to build email: {0}")]
    Build(String),

    #[error("SMTP send failed: {0}")]
    Transport(String),
}

/// Delivers a rendered report to a list of recipients.
#[async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &'static str;

    async fn send(&self, email: &ReportEmail, recipients: &[String]) -> Result<(), NotifyError>;
}

pub fn build_notifier(config: &EmailConfig) -> Result<Arc<dyn Notifier>, NotifyError> {
    if config.smtp_enabled {
        info!("📧 SMTP enabled, reports will be emailed via {}", config.host.as_deref().unwrap_or("?"));
        Ok(Arc::new(SmtpNotifier::new(config)?))
    } else {
        info!("📧 SMTP disabled, report emails will be logged only");
        Ok(Arc::new(LogNotifier))
    }
}

// ==============================================================================
// Log-only notifier
// ==============================================================================

/// Fallback when SMTP is disabled: logs what would have been sent.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn send(&self, email: &ReportEmail, recipients: &[String]) -> Result<(), NotifyError> {
        info!(
            "📧 Email would be sent: to={} subject={:?} attachment={}",
            recipients.join(", "),
            email.subject,
            email.attachment.as_ref().map(|a| a.filename.as_str()).unwrap_or("none")
        );
        Ok(())
    }
}

// ==============================================================================
// SMTP notifier
// ==============================================================================

pub struct SmtpNotifier {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpNotifier {
    pub fn new(config: &EmailConfig) -> Result<Self, NotifyError> {
        let host = config
            .host
            .as_deref()
            .ok_or_else(|| NotifyError::Config("EMAIL_HOST is not set".into()))?;
        let username = config
            .username
            .clone()
            .ok_or_else(|| NotifyError::Config("EMAIL_USER is not set".into()))?;
        let password = config.password.clone().unwrap_or_default();

        let from_email = config.from_address.clone().unwrap_or_else(|| username.clone());
        let from = format!("{} <{}>", config.from_name, from_email)
            .parse::<Mailbox>()
            .map_err(|e| NotifyError::Address(format!("{}: {}", from_email, e)))?;

        let mailer = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
            .map_err(|e| NotifyError::Config(format!("Failed to create SMTP transport: {}", e)))?
            .port(config.port)
            .credentials(Credentials::new(username, password))
            .build();

        Ok(Self { mailer, from })
    }
}

pub(crate) fn build_message(from: &Mailbox, email: &ReportEmail, recipients: &[String]) -> Result<Message, NotifyError> {
    let mut builder = Message::builder().from(from.clone()).subject(&email.subject);
    for recipient in recipients {
        let to = recipient
            .parse::<Mailbox>()
            .map_err(|e| NotifyError::Address(format!("{}: {}", recipient, e)))?;
        builder = builder.to(to);
    }

    let mut body = MultiPart::alternative().singlepart(
        SinglePart::builder()
            .header(ContentType::TEXT_PLAIN)
            .body(email.text_body.clone()),
    );
    if let Some(html) = &email.html_body {
        body = body.singlepart(
            SinglePart::builder()
                .header(ContentType::TEXT_HTML)
                .body(html.clone()),
        );
    }

    let message = match &email.attachment {
        Some(attachment) => {
            let content_type = ContentType::parse(&attachment.content_type)
                .map_err(|e| NotifyError::Build(format!("bad attachment content type: {}", e)))?;
            builder.multipart(
                MultiPart::mixed()
                    .multipart(body)
                    .singlepart(Attachment::new(attachment.filename.clone()).body(attachment.bytes.clone(), content_type)),
            )
        }
        None => builder.multipart(body),
    };

    message.map_err(|e| NotifyError::Build(e.to_string()))
}

#[async_trait]
impl Notifier for SmtpNotifier {
    fn name(&self) -> &'static str {
        "smtp"
    }

    async fn send(&self, email: &ReportEmail, recipients: &[String]) -> Result<(), NotifyError> {
        if recipients.is_empty() {
            warn!("No recipients for {:?}, nothing sent", email.subject);
            return Ok(());
        }

        let message = build_message(&self.from, email, recipients)?;

        info!("📤 Sending email to {} recipients...", recipients.len());
        match self.mailer.send(message).await {
            Ok(_) => {
                info!("✅ Email sent successfully");
                Ok(())
            }
            Err(e) => {
                error!("❌ SMTP Error: {:?}", e);
                Err(NotifyError::Transport(e.to_string()))
            }
        }
    }
}
