//! Notification: one message per run to either the success or the error distribution.

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::config::{MailConfig, Recipients};
use crate::contract::{MailError, MailTransport};
use crate::error::PipelineError;

/// Rendered subject and body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub subject: String,
    pub body: String,
}

/// Message for the success distribution. Only this one carries the link.
pub fn ready_notice(project_name: &str, url: &str) -> Notice {
    Notice {
        subject: format!("Your video {project_name} is ready"),
        body: format!(
            "Hello,\n\nThe segmented archive for {project_name} has been published.\n\
             Download it here: {url}\n"
        ),
    }
}

/// Message for the operator when a run failed after the project was known.
pub fn failure_notice(project_name: &str) -> Notice {
    Notice {
        subject: format!("Processing failed for {project_name}"),
        body: format!(
            "Processing of {project_name} did not complete. No archive was published.\n\
             See the run log for details.\n"
        ),
    }
}

/// Per-recipient delivery result.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Delivery {
    pub delivered: Vec<String>,
    /// `(recipient, reason)`
    pub failed: Vec<(String, String)>,
}

/// Send the ready notice when `url` is present, otherwise the failure notice.
///
/// Partial delivery is a success; the failed recipients are returned in [`Delivery`].
pub async fn notify<M>(
    mailer: &M,
    recipients: &Recipients,
    project_name: &str,
    url: Option<&str>,
) -> Result<Delivery, PipelineError>
where
    M: MailTransport + ?Sized,
{
    let (notice, targets): (Notice, Vec<&str>) = match url {
        Some(url) => (
            ready_notice(project_name, url),
            recipients.success.iter().map(String::as_str).collect(),
        ),
        None => (failure_notice(project_name), vec![recipients.error.as_str()]),
    };
    let kind = if url.is_some() { "success" } else { "error" };
    info!(kind, recipients = targets.len(), "[PIPELINE][NOTIFY] Sending notification");

    let targets: Vec<&str> = targets.into_iter().filter(|r| !r.trim().is_empty()).collect();
    if targets.is_empty() {
        error!(kind, "[PIPELINE][NOTIFY] No recipients configured");
        return Err(PipelineError::EmailNotification(format!(
            "no recipients configured for the {kind} distribution"
        )));
    }

    let mut delivery = Delivery::default();
    for recipient in targets {
        match mailer.send(recipient, &notice.subject, &notice.body).await {
            Ok(()) => delivery.delivered.push(recipient.to_string()),
            Err(e) => {
                warn!(recipient, error = %e, "Delivery failed");
                delivery.failed.push((recipient.to_string(), e.to_string()));
            }
        }
    }

    if delivery.delivered.is_empty() {
        let reasons = delivery
            .failed
            .iter()
            .map(|(r, e)| format!("{r}: {e}"))
            .collect::<Vec<_>>()
            .join("; ");
        error!(kind, "[PIPELINE][NOTIFY] Every recipient failed");
        return Err(PipelineError::EmailNotification(reasons));
    }

    info!(
        delivered = delivery.delivered.len(),
        failed = delivery.failed.len(),
        "[PIPELINE][NOTIFY] Notification sent"
    );
    Ok(delivery)
}

/// SMTP relay transport with STARTTLS and login credentials.
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    pub fn new(config: &MailConfig) -> Result<Self, MailError> {
        let from: Mailbox = config
            .sender
            .parse()
            .map_err(|e: lettre::address::AddressError| MailError::InvalidAddress {
                address: config.sender.clone(),
                reason: e.to_string(),
            })?;

        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)
            .map_err(|e| MailError::Transport(e.to_string()))?
            .port(config.smtp_port);
        if let Some(password) = &config.password {
            builder = builder.credentials(Credentials::new(config.sender.clone(), password.clone()));
        }

        Ok(Self {
            transport: builder.build(),
            from,
        })
    }
}

#[async_trait]
impl MailTransport for SmtpMailer {
    async fn send(&self, recipient: &str, subject: &str, body: &str) -> Result<(), MailError> {
        let to: Mailbox = recipient.parse().map_err(|e: lettre::address::AddressError| {
            MailError::InvalidAddress {
                address: recipient.to_string(),
                reason: e.to_string(),
            }
        })?;

        let message = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body.to_string())
            .map_err(|e| MailError::Message(e.to_string()))?;

        self.transport
            .send(message)
            .await
            .map_err(|e| MailError::Transport(e.to_string()))?;
        Ok(())
    }
}
