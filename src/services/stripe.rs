//! Stripe payment provider client.
//!
//! Implements payment-intent creation with automatic capture, an application
//! fee retained by the platform, and funds transfer to the host's connected
//! account. Requests carry an `Idempotency-Key` built by the configured
//! key strategy.

use crate::config::StripeConfig;
use anyhow::anyhow;
use chrono::{DateTime, Utc};
use reqwest::Client;
use secrecy::ExposeSecret;
use serde::Deserialize;
use thiserror::Error;
use uuid::Uuid;

/// Strategy for constructing gateway idempotency keys.
///
/// `Stable` dedupes repeated submissions at the same retry count.
/// `Timestamped` makes every attempt a distinct submission, which allows a
/// manually re-triggered run to produce a fresh charge attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdempotencyStrategy {
    Stable,
    Timestamped,
}

impl IdempotencyStrategy {
    pub fn key(&self, prefix: &str, payment_id: Uuid, retry_count: i32, now: DateTime<Utc>) -> String {
        match self {
            IdempotencyStrategy::Stable => format!("{}-{}-{}", prefix, payment_id, retry_count),
            IdempotencyStrategy::Timestamped => format!(
                "{}-{}-{}-{}",
                prefix,
                payment_id,
                retry_count,
                now.timestamp_millis()
            ),
        }
    }
}

impl std::str::FromStr for IdempotencyStrategy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stable" => Ok(IdempotencyStrategy::Stable),
            "timestamped" => Ok(IdempotencyStrategy::Timestamped),
            other => Err(anyhow!(
                "unknown idempotency key strategy '{}' (expected 'stable' or 'timestamped')",
                other
            )),
        }
    }
}

/// Tagged gateway failure. The processor stores `failure_reason()` on the
/// payment row, so these map one-to-one onto the renter-visible categories.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("insufficient funds")]
    InsufficientFunds,

    #[error("card declined")]
    CardDeclined,

    #[error("payment method unavailable")]
    MethodUnavailable,

    #[error("charge rejected: {message}")]
    Rejected {
        code: Option<String>,
        message: String,
    },

    #[error("unexpected payment status: {0}")]
    UnexpectedStatus(String),

    #[error("gateway request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

impl GatewayError {
    /// Build from a structured API error body.
    pub fn from_api(code: Option<&str>, decline_code: Option<&str>, message: &str) -> Self {
        match (code, decline_code) {
            (_, Some("insufficient_funds")) | (Some("insufficient_funds"), _) => {
                GatewayError::InsufficientFunds
            }
            (Some("card_declined"), _) | (_, Some("generic_decline")) => GatewayError::CardDeclined,
            (Some("payment_method_unavailable"), _) => GatewayError::MethodUnavailable,
            _ => Self::classify_message(message, code),
        }
    }

    /// Substring fallback for opaque error text.
    fn classify_message(message: &str, code: Option<&str>) -> Self {
        if message.contains("insufficient_funds") {
            GatewayError::InsufficientFunds
        } else if message.contains("card_declined") {
            GatewayError::CardDeclined
        } else if message.contains("payment_method_unavailable") {
            GatewayError::MethodUnavailable
        } else {
            GatewayError::Rejected {
                code: code.map(|c| c.to_string()),
                message: message.to_string(),
            }
        }
    }

    /// Human-readable reason persisted on the payment row.
    pub fn failure_reason(&self) -> String {
        match self {
            GatewayError::InsufficientFunds => "Insufficient funds".to_string(),
            GatewayError::CardDeclined => "Card declined".to_string(),
            GatewayError::MethodUnavailable => "Payment method unavailable".to_string(),
            GatewayError::Rejected { message, .. } => message.clone(),
            GatewayError::UnexpectedStatus(status) => {
                format!("Unexpected payment status: {}", status)
            }
            GatewayError::Transport(_) => "Payment processing failed".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentIntentStatus {
    Succeeded,
    Processing,
    RequiresPaymentMethod,
    RequiresConfirmation,
    RequiresAction,
    RequiresCapture,
    Canceled,
    #[serde(other)]
    Unknown,
}

impl PaymentIntentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentIntentStatus::Succeeded => "succeeded",
            PaymentIntentStatus::Processing => "processing",
            PaymentIntentStatus::RequiresPaymentMethod => "requires_payment_method",
            PaymentIntentStatus::RequiresConfirmation => "requires_confirmation",
            PaymentIntentStatus::RequiresAction => "requires_action",
            PaymentIntentStatus::RequiresCapture => "requires_capture",
            PaymentIntentStatus::Canceled => "canceled",
            PaymentIntentStatus::Unknown => "unknown",
        }
    }
}

/// Response from payment-intent creation.
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentIntent {
    pub id: String,
    pub status: PaymentIntentStatus,
    pub amount: i64,
}

#[derive(Debug, Deserialize)]
struct StripeErrorBody {
    error: StripeErrorDetail,
}

#[derive(Debug, Deserialize)]
struct StripeErrorDetail {
    #[serde(rename = "type")]
    error_type: Option<String>,
    code: Option<String>,
    decline_code: Option<String>,
    message: Option<String>,
}

/// Charge submission parameters.
#[derive(Debug, Clone)]
pub struct ChargeRequest {
    /// Gross amount in minor units. The platform fee is already embedded.
    pub amount: i64,
    pub currency: String,
    pub customer: String,
    pub payment_method: String,
    /// Portion of `amount` retained by the platform.
    pub application_fee_amount: i64,
    /// Host connected account receiving the remainder.
    pub destination_account: String,
    pub receipt_email: String,
    pub metadata: Vec<(String, String)>,
    pub idempotency_key: String,
}

#[derive(Clone)]
pub struct StripeClient {
    client: Client,
    config: StripeConfig,
}

impl StripeClient {
    pub fn new(config: StripeConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    pub fn is_configured(&self) -> bool {
        !self.config.secret_key.expose_secret().is_empty()
    }

    /// Create and immediately confirm a payment intent with automatic capture.
    pub async fn create_payment_intent(
        &self,
        request: &ChargeRequest,
    ) -> Result<PaymentIntent, GatewayError> {
        let mut form: Vec<(String, String)> = vec![
            ("amount".to_string(), request.amount.to_string()),
            ("currency".to_string(), request.currency.clone()),
            ("customer".to_string(), request.customer.clone()),
            ("payment_method".to_string(), request.payment_method.clone()),
            ("confirm".to_string(), "true".to_string()),
            ("capture_method".to_string(), "automatic".to_string()),
            (
                "application_fee_amount".to_string(),
                request.application_fee_amount.to_string(),
            ),
            (
                "transfer_data[destination]".to_string(),
                request.destination_account.clone(),
            ),
            ("receipt_email".to_string(), request.receipt_email.clone()),
        ];
        for (key, value) in &request.metadata {
            form.push((format!("metadata[{}]", key), value.clone()));
        }

        let url = format!("{}/payment_intents", self.config.api_base_url);
        let response = self
            .client
            .post(&url)
            .basic_auth(self.config.secret_key.expose_secret(), None::<&str>)
            .header("Idempotency-Key", &request.idempotency_key)
            .form(&form)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        tracing::debug!(status = %status, "payment intent response");

        if status.is_success() {
            let intent: PaymentIntent = serde_json::from_str(&body).map_err(|e| {
                GatewayError::Rejected {
                    code: None,
                    message: format!("unparseable gateway response: {}", e),
                }
            })?;
            tracing::info!(
                intent_id = %intent.id,
                status = intent.status.as_str(),
                amount = intent.amount,
                "payment intent created"
            );
            Ok(intent)
        } else {
            let err = match serde_json::from_str::<StripeErrorBody>(&body) {
                Ok(parsed) => {
                    let detail = parsed.error;
                    tracing::warn!(
                        error_type = detail.error_type.as_deref().unwrap_or("-"),
                        code = detail.code.as_deref().unwrap_or("-"),
                        decline_code = detail.decline_code.as_deref().unwrap_or("-"),
                        "payment intent rejected"
                    );
                    GatewayError::from_api(
                        detail.code.as_deref(),
                        detail.decline_code.as_deref(),
                        detail.message.as_deref().unwrap_or("charge failed"),
                    )
                }
                Err(_) => GatewayError::classify_message(&body, None),
            };
            Err(err)
        }
    }
}
