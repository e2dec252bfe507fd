//! Email notification dispatch.
//!
//! Sends are best-effort: a failed email is logged and counted but never
//! fails the payment it describes.

use crate::config::SmtpConfig;
use crate::models::DuePayment;
use crate::services::metrics::record_notification;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use secrecy::ExposeSecret;
use std::sync::{Arc, Mutex};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Email sender not enabled: {0}")]
    NotEnabled(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid recipient: {0}")]
    InvalidRecipient(String),

    #[error("Send error: {0}")]
    SendFailed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub body_text: String,
}

#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send(&self, email: &EmailMessage) -> Result<(), NotifyError>;
    fn is_enabled(&self) -> bool;
}

pub struct SmtpMailer {
    config: SmtpConfig,
    transport: Option<AsyncSmtpTransport<Tokio1Executor>>,
}

impl SmtpMailer {
    pub fn new(config: SmtpConfig) -> Result<Self, NotifyError> {
        if !config.enabled {
            return Ok(Self {
                config,
                transport: None,
            });
        }

        let creds = Credentials::new(
            config.user.clone(),
            config.password.expose_secret().clone(),
        );

        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
            .map_err(|e| {
                NotifyError::Configuration(format!("Failed to create SMTP relay: {}", e))
            })?
            .port(config.port)
            .credentials(creds)
            .build();

        Ok(Self {
            config,
            transport: Some(transport),
        })
    }
}

#[async_trait]
impl EmailSender for SmtpMailer {
    async fn send(&self, email: &EmailMessage) -> Result<(), NotifyError> {
        if !self.config.enabled {
            return Err(NotifyError::NotEnabled(
                "SMTP email sender is not enabled".to_string(),
            ));
        }

        let transport = self.transport.as_ref().ok_or_else(|| {
            NotifyError::Configuration("SMTP transport not initialized".to_string())
        })?;

        let from_mailbox: Mailbox =
            format!("{} <{}>", self.config.from_name, self.config.from_email)
                .parse()
                .map_err(|e| NotifyError::Configuration(format!("Invalid from address: {}", e)))?;

        let to_mailbox: Mailbox = email
            .to
            .parse()
            .map_err(|e| NotifyError::InvalidRecipient(format!("Invalid recipient: {}", e)))?;

        let message = Message::builder()
            .from(from_mailbox)
            .to(to_mailbox)
            .subject(&email.subject)
            .header(ContentType::TEXT_PLAIN)
            .body(email.body_text.clone())
            .map_err(|e| NotifyError::SendFailed(format!("Failed to build message: {}", e)))?;

        transport
            .send(message)
            .await
            .map_err(|e| NotifyError::SendFailed(format!("Failed to send email: {}", e)))?;

        tracing::info!(to = %email.to, subject = %email.subject, "Email sent");
        Ok(())
    }

    fn is_enabled(&self) -> bool {
        self.config.enabled
    }
}

/// Recording mailer for tests.
#[derive(Default)]
pub struct MockMailer {
    sent: Mutex<Vec<EmailMessage>>,
}

impl MockMailer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<EmailMessage> {
        self.sent.lock().expect("mailer lock poisoned").clone()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().expect("mailer lock poisoned").len()
    }
}

#[async_trait]
impl EmailSender for MockMailer {
    async fn send(&self, email: &EmailMessage) -> Result<(), NotifyError> {
        self.sent
            .lock()
            .expect("mailer lock poisoned")
            .push(email.clone());
        tracing::info!(to = %email.to, subject = %email.subject, "[MOCK] Email would be sent");
        Ok(())
    }

    fn is_enabled(&self) -> bool {
        true
    }
}

/// Format minor units as a dollar string, e.g. 200000 -> "2000.00".
pub fn format_amount(minor: i64) -> String {
    format!("{}.{:02}", minor / 100, minor % 100)
}

/// Builds and dispatches the notification set for each payment outcome.
#[derive(Clone)]
pub struct Notifier {
    sender: Arc<dyn EmailSender>,
    operations_email: String,
    public_base_url: String,
    timezone: Tz,
}

impl Notifier {
    pub fn new(
        sender: Arc<dyn EmailSender>,
        operations_email: String,
        public_base_url: String,
        timezone: Tz,
    ) -> Self {
        Self {
            sender,
            operations_email,
            public_base_url,
            timezone,
        }
    }

    fn local_date(&self, now: DateTime<Utc>) -> String {
        now.with_timezone(&self.timezone)
            .format("%Y-%m-%d")
            .to_string()
    }

    async fn dispatch(&self, kind: &str, email: EmailMessage) {
        match self.sender.send(&email).await {
            Ok(()) => record_notification(kind, "sent"),
            Err(e) => {
                tracing::warn!(kind = kind, to = %email.to, error = %e, "notification send failed");
                record_notification(kind, "failed");
            }
        }
    }

    /// Success: renter receipt plus host payout notice.
    pub async fn payment_succeeded(&self, item: &DuePayment, amount: i64, now: DateTime<Utc>) {
        let date = self.local_date(now);

        self.dispatch(
            "payment_success",
            EmailMessage {
                to: item.renter.email.clone(),
                subject: "Rent Payment Processed Successfully".to_string(),
                body_text: format!(
                    "Hi {},\n\n\
                     Your rent payment of ${} for {} was processed successfully on {}.\n\n\
                     No action is needed.\n",
                    item.renter.display_name(),
                    format_amount(amount),
                    item.listing.title,
                    date,
                ),
            },
        )
        .await;

        self.dispatch(
            "payment_received",
            EmailMessage {
                to: item.host.email.clone(),
                subject: "Rent Payment Received".to_string(),
                body_text: format!(
                    "Hi {},\n\n\
                     A rent payment of ${} from {} for {} was collected on {}.\n\
                     Funds will arrive in your connected account per your payout schedule.\n",
                    item.host.display_name(),
                    format_amount(amount),
                    item.renter.display_name(),
                    item.listing.title,
                    date,
                ),
            },
        )
        .await;
    }

    /// Pending bank-debit charge: renter only.
    pub async fn payment_processing(&self, item: &DuePayment, amount: i64, now: DateTime<Utc>) {
        self.dispatch(
            "payment_processing",
            EmailMessage {
                to: item.renter.email.clone(),
                subject: "Rent Payment Processing".to_string(),
                body_text: format!(
                    "Hi {},\n\n\
                     Your rent payment of ${} for {} was initiated on {} and is processing.\n\
                     Bank transfers typically complete within 3-5 business days.\n",
                    item.renter.display_name(),
                    format_amount(amount),
                    item.listing.title,
                    self.local_date(now),
                ),
            },
        )
        .await;
    }

    /// Failure: renter action request plus an operations alert with full
    /// diagnostic context.
    pub async fn payment_failed(
        &self,
        item: &DuePayment,
        amount: i64,
        reason: &str,
        now: DateTime<Utc>,
    ) {
        self.dispatch(
            "payment_failed",
            EmailMessage {
                to: item.renter.email.clone(),
                subject: "Rent Payment Failed - Action Required".to_string(),
                body_text: format!(
                    "Hi {},\n\n\
                     We could not process your rent payment of ${} for {} on {}.\n\
                     Reason: {}\n\n\
                     Please update your payment method:\n{}/app/rent/bookings/{}\n",
                    item.renter.display_name(),
                    format_amount(amount),
                    item.listing.title,
                    self.local_date(now),
                    reason,
                    self.public_base_url,
                    item.booking.booking_id,
                ),
            },
        )
        .await;

        self.dispatch(
            "admin_payment_failed",
            EmailMessage {
                to: self.operations_email.clone(),
                subject: format!("Rent Payment Failed - {}", item.listing.title),
                body_text: format!(
                    "Rent payment failure\n\
                     ---\n\
                     Payment id: {}\n\
                     Booking id: {}\n\
                     Property: {}\n\
                     Amount: ${}\n\
                     Reason: {}\n\
                     Attempt: {}\n\
                     ---\n\
                     Renter: {} <{}>\n\
                     Host: {} <{}>\n",
                    item.payment.payment_id,
                    item.booking.booking_id,
                    item.listing.title,
                    format_amount(amount),
                    reason,
                    item.payment.retry_count + 1,
                    item.renter.display_name(),
                    item.renter.email,
                    item.host.display_name(),
                    item.host.email,
                ),
            },
        )
        .await;
    }

    /// Daily preview report to the operations address.
    pub async fn preview_report(&self, report_date: &str, body: String) {
        self.dispatch(
            "payment_preview",
            EmailMessage {
                to: self.operations_email.clone(),
                subject: format!("Rent Payment Preview - {}", report_date),
                body_text: body,
            },
        )
        .await;
    }
}
