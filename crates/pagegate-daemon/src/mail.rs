//! Mail delivery of rejection diagnostics.
//!
//! [`MailAlertSink`] implements [`AlertSink`] by pushing each diagnostic into
//! a bounded queue. A background task drains the queue and sends one HTML
//! mail per diagnostic over SMTP (STARTTLS).
//!
//! # Contracts
//!
//! - [CTR-ML001] `deliver` never blocks and never fails the request. A full
//!   or closed queue drops the alert with a warning.
//! - [CTR-ML002] SMTP errors are logged and dropped; nothing is retried.
//! - [CTR-ML003] Diagnostic text is HTML-escaped before it is embedded in
//!   the mail body.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use lettre::message::Mailbox;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use pagegate_core::AlertSink;
use pagegate_core::admission::RejectionDiagnostic;
use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::MailConfig;

/// Errors raised while configuring or sending mail.
#[derive(Debug, Error)]
pub enum MailError {
    /// A required setting is missing.
    #[error("mail setting missing: {0}")]
    MissingSetting(&'static str),

    /// The configured address is not a valid mailbox.
    #[error("invalid mail address '{address}': {source}")]
    InvalidAddress {
        /// The rejected address.
        address: String,
        /// Why it was rejected.
        #[source]
        source: lettre::address::AddressError,
    },

    /// The message could not be assembled.
    #[error("failed to build mail message: {0}")]
    Build(#[from] lettre::error::Error),

    /// The SMTP exchange failed.
    #[error("SMTP error: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),
}

/// Sends finished messages.
#[async_trait]
pub trait MailTransport: Send + Sync + 'static {
    /// Sends one message.
    async fn send(&self, message: Message) -> Result<(), MailError>;
}

/// SMTP transport over STARTTLS.
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpMailer {
    /// Builds an SMTP transport for `host:port`, authenticating when
    /// `credentials` are given.
    pub fn new(
        host: &str,
        port: u16,
        credentials: Option<(String, SecretString)>,
    ) -> Result<Self, MailError> {
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)?.port(port);
        if let Some((username, password)) = credentials {
            builder = builder.credentials(Credentials::new(
                username,
                password.expose_secret().to_string(),
            ));
        }
        Ok(Self {
            transport: builder.build(),
        })
    }
}

#[async_trait]
impl MailTransport for SmtpMailer {
    async fn send(&self, message: Message) -> Result<(), MailError> {
        self.transport.send(message).await?;
        Ok(())
    }
}

/// Sender, recipient and subject of alert mails.
#[derive(Debug, Clone)]
pub struct MailEnvelope {
    from: Mailbox,
    to: Mailbox,
    subject: String,
}

impl MailEnvelope {
    /// Creates an envelope that sends from and to `address`.
    pub fn new(address: &str, subject: impl Into<String>) -> Result<Self, MailError> {
        let mailbox: Mailbox = address.parse().map_err(|source| MailError::InvalidAddress {
            address: address.to_string(),
            source,
        })?;
        Ok(Self {
            from: mailbox.clone(),
            to: mailbox,
            subject: subject.into(),
        })
    }

    /// Builds the alert mail for one diagnostic.
    pub fn build_message(&self, diagnostic: &RejectionDiagnostic) -> Result<Message, MailError> {
        Ok(Message::builder()
            .from(self.from.clone())
            .to(self.to.clone())
            .subject(self.subject.clone())
            .header(ContentType::TEXT_HTML)
            .body(render_html(diagnostic))?)
    }
}

/// HTML body of an alert mail.
#[must_use]
pub fn render_html(diagnostic: &RejectionDiagnostic) -> String {
    let line = format!(
        "{} WARNING  Blocked request:\n\n{}",
        Utc::now().format("%Y-%m-%d %H:%M:%S"),
        diagnostic.to_json_pretty()
    );
    format!(
        "<html><head><style>\n\
         tt {{ padding: 0; margin: 0; color: #444444; }}\n\
         tt.WARNING {{ color: #CC6600; }}\n\
         tt.ERROR {{ color: #990000; }}\n\
         </style></head>\n\
         <body><pre><tt class=\"WARNING\">{}</tt></pre></body></html>\n",
        html_escape::encode_text(&line)
    )
}

/// [`AlertSink`] that mails diagnostics from a background task.
#[derive(Debug, Clone)]
pub struct MailAlertSink {
    sender: mpsc::Sender<RejectionDiagnostic>,
}

impl MailAlertSink {
    /// Starts the delivery task on the current tokio runtime.
    ///
    /// The task ends once every clone of the sink has been dropped and the
    /// queue is drained.
    pub fn spawn<T: MailTransport>(
        envelope: MailEnvelope,
        transport: T,
        queue_capacity: usize,
    ) -> (Self, JoinHandle<()>) {
        let (sink, receiver) = Self::channel(queue_capacity);
        let handle = tokio::spawn(run_mailer(receiver, envelope, Arc::new(transport)));
        (sink, handle)
    }

    /// Builds the SMTP sink described by `config`.
    ///
    /// # Errors
    ///
    /// Returns [`MailError`] if the address or host is missing or invalid, or
    /// a user name is configured without a password.
    pub fn from_config(
        config: &MailConfig,
        password: Option<SecretString>,
    ) -> Result<(Self, JoinHandle<()>), MailError> {
        let address = config
            .address
            .as_deref()
            .ok_or(MailError::MissingSetting("mail.address"))?;
        let host = config
            .host
            .as_deref()
            .ok_or(MailError::MissingSetting("mail.host"))?;

        let envelope = MailEnvelope::new(address, config.subject.clone())?;
        let credentials = match (config.username.clone(), password) {
            (Some(username), Some(password)) => Some((username, password)),
            (Some(_), None) => return Err(MailError::MissingSetting("mail.password_env")),
            (None, _) => None,
        };
        let transport = SmtpMailer::new(host, config.port, credentials)?;

        Ok(Self::spawn(envelope, transport, config.queue_capacity))
    }

    fn channel(queue_capacity: usize) -> (Self, mpsc::Receiver<RejectionDiagnostic>) {
        let (sender, receiver) = mpsc::channel(queue_capacity.max(1));
        (Self { sender }, receiver)
    }
}

impl AlertSink for MailAlertSink {
    fn deliver(&self, diagnostic: &RejectionDiagnostic) {
        match self.sender.try_send(diagnostic.clone()) {
            Ok(()) => {},
            Err(TrySendError::Full(dropped)) => {
                warn!(reason = %dropped.reason, "mail alert queue full, dropping alert");
            },
            Err(TrySendError::Closed(dropped)) => {
                warn!(reason = %dropped.reason, "mail alert task stopped, dropping alert");
            },
        }
    }
}

async fn run_mailer<T: MailTransport>(
    mut receiver: mpsc::Receiver<RejectionDiagnostic>,
    envelope: MailEnvelope,
    transport: Arc<T>,
) {
    while let Some(diagnostic) = receiver.recv().await {
        let message = match envelope.build_message(&diagnostic) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "failed to build mail alert");
                continue;
            },
        };
        match transport.send(message).await {
            Ok(()) => debug!(reason = %diagnostic.reason, "mail alert sent"),
            Err(e) => warn!(error = %e, reason = %diagnostic.reason, "failed to send mail alert"),
        }
    }
    debug!("mail alert queue closed");
}
