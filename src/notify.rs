//! Report delivery.
//!
//! A run produces exactly one [`Notification`]; [`dispatch`] logs its text
//! body and hands it to the configured [`Notifier`].  With an `[email]`
//! section that is [`EmailNotifier`] (SMTP with STARTTLS, multipart
//! plain-text + HTML); without one, [`NoopNotifier`].

use lettre::{
    Message, SmtpTransport, Transport,
    address::AddressError,
    message::{Mailbox, MultiPart},
    transport::smtp::authentication::Credentials,
};
use thiserror::Error;
use tracing::info;

use crate::{
    config::{Config, EmailConfig},
    report::Notification,
};

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("invalid email address '{address}': {source}")]
    Address {
        address: String,
        #[source]
        source: AddressError,
    },

    #[error("building email: {0}")]
    Message(#[from] lettre::error::Error),

    #[error("sending email via {server}: {source}")]
    Smtp {
        server: String,
        #[source]
        source: lettre::transport::smtp::Error,
    },
}

/// Something that can deliver a finished report.
pub trait Notifier {
    fn name(&self) -> &'static str;
    fn send(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// Used when no mail server is configured; the report is only logged.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn name(&self) -> &'static str {
        "none"
    }

    fn send(&self, _notification: &Notification) -> Result<(), NotifyError> {
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct EmailNotifier {
    cfg: EmailConfig,
}

impl EmailNotifier {
    pub fn new(cfg: EmailConfig) -> Self {
        Self { cfg }
    }

    /// The multipart message for `notification`.
    pub fn message(&self, notification: &Notification) -> Result<Message, NotifyError> {
        let message = Message::builder()
            .from(mailbox(&self.cfg.sender)?)
            .to(mailbox(&self.cfg.recipient)?)
            .subject(notification.subject.clone())
            .multipart(MultiPart::alternative_plain_html(
                notification.text.clone(),
                notification.html.clone(),
            ))?;
        Ok(message)
    }

    fn smtp_error(&self, source: lettre::transport::smtp::Error) -> NotifyError {
        NotifyError::Smtp {
            server: self.cfg.server.clone(),
            source,
        }
    }
}

impl Notifier for EmailNotifier {
    fn name(&self) -> &'static str {
        "email"
    }

    fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        let message = self.message(notification)?;

        let mut transport = SmtpTransport::starttls_relay(&self.cfg.server)
            .map_err(|e| self.smtp_error(e))?
            .port(self.cfg.port);
        if let (Some(user), Some(password)) = (&self.cfg.user, &self.cfg.password) {
            transport = transport.credentials(Credentials::new(
                user.clone(),
                password.expose().to_string(),
            ));
        }

        transport
            .build()
            .send(&message)
            .map_err(|e| self.smtp_error(e))?;
        info!("report sent to {}", self.cfg.recipient);
        Ok(())
    }
}

fn mailbox(address: &str) -> Result<Mailbox, NotifyError> {
    address.parse().map_err(|source| NotifyError::Address {
        address: address.into(),
        source,
    })
}

/// The notifier selected by the resolved configuration.
pub fn from_config(cfg: &Config) -> Box<dyn Notifier> {
    match &cfg.email {
        Some(email) => Box::new(EmailNotifier::new(email.clone())),
        None => Box::new(NoopNotifier),
    }
}

/// Log the report and deliver it.
pub fn dispatch(notifier: &dyn Notifier, notification: &Notification) -> Result<(), NotifyError> {
    info!("Report:\n{}", notification.text);
    info!("delivering report via {}", notifier.name());
    notifier.send(notification)
}

// ─── Tests ────────────────────────────────────────────────────────────────────
