//! Booking, listing, and party projections used by the processor.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Booking {
    pub booking_id: Uuid,
    pub renter_user_id: Uuid,
    pub listing_id: Uuid,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ListingSummary {
    pub listing_id: Uuid,
    pub host_user_id: Uuid,
    pub title: String,
}

/// Renter-side identity and payment fields.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Renter {
    pub user_id: Uuid,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: String,
    pub stripe_customer_id: Option<String>,
}

impl Renter {
    pub fn display_name(&self) -> String {
        display_name(&self.first_name, &self.last_name, &self.email)
    }
}

/// Host-side identity and connected-account fields.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Host {
    pub user_id: Uuid,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: String,
    pub stripe_account_id: Option<String>,
    pub stripe_charges_enabled: bool,
}

impl Host {
    /// A host without a connected account, or whose account cannot currently
    /// accept charges, invalidates fund transfer.
    pub fn can_receive_payments(&self) -> bool {
        self.stripe_account_id.is_some() && self.stripe_charges_enabled
    }

    pub fn display_name(&self) -> String {
        display_name(&self.first_name, &self.last_name, &self.email)
    }
}

fn display_name(first: &Option<String>, last: &Option<String>, email: &str) -> String {
    let full = format!(
        "{} {}",
        first.as_deref().unwrap_or(""),
        last.as_deref().unwrap_or("")
    );
    let full = full.trim();
    if full.is_empty() {
        email.to_string()
    } else {
        full.to_string()
    }
}
