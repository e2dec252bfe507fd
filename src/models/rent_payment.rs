//! Rent payment and itemized charge models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::{Booking, Host, ListingSummary, Renter};

/// Rent payment lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Pending,
    Processing,
    Succeeded,
    Failed,
    Cancelled,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "PENDING",
            PaymentStatus::Processing => "PROCESSING",
            PaymentStatus::Succeeded => "SUCCEEDED",
            PaymentStatus::Failed => "FAILED",
            PaymentStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "PROCESSING" => PaymentStatus::Processing,
            "SUCCEEDED" => PaymentStatus::Succeeded,
            "FAILED" => PaymentStatus::Failed,
            "CANCELLED" => PaymentStatus::Cancelled,
            _ => PaymentStatus::Pending,
        }
    }
}

/// Category of an itemized charge line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChargeCategory {
    Rent,
    PetRent,
    SecurityDeposit,
    PetDeposit,
    PlatformFee,
    Other,
}

impl ChargeCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChargeCategory::Rent => "RENT",
            ChargeCategory::PetRent => "PET_RENT",
            ChargeCategory::SecurityDeposit => "SECURITY_DEPOSIT",
            ChargeCategory::PetDeposit => "PET_DEPOSIT",
            ChargeCategory::PlatformFee => "PLATFORM_FEE",
            ChargeCategory::Other => "OTHER",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "RENT" => ChargeCategory::Rent,
            "PET_RENT" => ChargeCategory::PetRent,
            "SECURITY_DEPOSIT" => ChargeCategory::SecurityDeposit,
            "PET_DEPOSIT" => ChargeCategory::PetDeposit,
            "PLATFORM_FEE" => ChargeCategory::PlatformFee,
            _ => ChargeCategory::Other,
        }
    }
}

/// One scheduled rent installment owed under a booking.
///
/// Amounts are integer minor units (cents).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct RentPayment {
    pub payment_id: Uuid,
    pub booking_id: Uuid,
    pub due_date: DateTime<Utc>,
    pub amount: i64,
    pub total_amount: Option<i64>,
    pub is_paid: bool,
    pub status: String,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub stripe_payment_method_id: Option<String>,
    pub stripe_payment_intent_id: Option<String>,
    pub retry_count: i32,
    pub last_retry_at: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
    pub payment_authorized_at: Option<DateTime<Utc>>,
    pub payment_captured_at: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl RentPayment {
    /// The amount actually submitted to the gateway. Newer payments carry an
    /// explicit total; older rows only have the legacy `amount` column.
    pub fn chargeable_amount(&self) -> i64 {
        self.total_amount.unwrap_or(self.amount)
    }
}

/// Itemized breakdown component of a payment.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PaymentChargeLine {
    pub charge_id: Uuid,
    pub payment_id: Uuid,
    pub category: String,
    pub amount: i64,
    pub is_applied: bool,
    pub metadata: Option<serde_json::Value>,
}

impl PaymentChargeLine {
    pub fn is_applied_platform_fee(&self) -> bool {
        self.is_applied && ChargeCategory::from_string(&self.category) == ChargeCategory::PlatformFee
    }

    /// Fee rate stored in metadata as a percentage, when present.
    pub fn metadata_rate_percent(&self) -> Option<f64> {
        self.metadata
            .as_ref()
            .and_then(|m| m.get("rate"))
            .and_then(|r| r.as_f64())
    }
}

/// A candidate payment loaded with everything the processor needs:
/// booking, both parties, listing, and itemized charge lines.
#[derive(Debug, Clone)]
pub struct DuePayment {
    pub payment: RentPayment,
    pub booking: Booking,
    pub listing: ListingSummary,
    pub renter: Renter,
    pub host: Host,
    pub charges: Vec<PaymentChargeLine>,
}
