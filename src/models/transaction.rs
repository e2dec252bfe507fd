//! Audit transaction model. One row is written per settled or pending
//! charge attempt; failed attempts are recorded on the payment itself.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Succeeded,
    Pending,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Succeeded => "succeeded",
            TransactionStatus::Pending => "pending",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PaymentTransaction {
    pub transaction_id: Uuid,
    pub transaction_number: String,
    pub stripe_payment_intent_id: String,
    pub amount: i64,
    pub currency: String,
    pub status: String,
    pub platform_fee_amount: i64,
    pub net_amount: i64,
    pub processed_at: Option<DateTime<Utc>>,
    pub user_id: Uuid,
    pub booking_id: Uuid,
    pub created_utc: DateTime<Utc>,
}

/// Input for inserting an audit row.
#[derive(Debug, Clone)]
pub struct NewPaymentTransaction {
    pub transaction_number: String,
    pub stripe_payment_intent_id: String,
    pub amount: i64,
    pub currency: String,
    pub status: TransactionStatus,
    pub platform_fee_amount: i64,
    pub net_amount: i64,
    pub processed_at: Option<DateTime<Utc>>,
    pub user_id: Uuid,
    pub booking_id: Uuid,
}
