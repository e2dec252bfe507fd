//! Platform fee resolution.
//!
//! An applied itemized `PLATFORM_FEE` charge line wins; otherwise the rate is
//! derived from booking duration, with long bookings earning the lower rate.

use crate::models::PaymentChargeLine;
use chrono::{DateTime, Utc};

/// Month length used when rounding a booking span to whole months.
pub const DAYS_PER_MONTH_PRECISE: f64 = 30.4375;

const MS_PER_DAY: f64 = 86_400_000.0;
const PERCENT_MULTIPLIER: f64 = 100.0;

#[derive(Clone, Copy, Debug)]
pub struct FeeSchedule {
    pub short_term_rate: f64,
    pub long_term_rate: f64,
    pub threshold_months: i64,
}

impl FeeSchedule {
    pub fn rate_for_duration(&self, duration_months: i64) -> f64 {
        if duration_months >= self.threshold_months {
            self.long_term_rate
        } else {
            self.short_term_rate
        }
    }
}

/// Where the resolved fee came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeeSource {
    Itemized,
    DurationBased,
}

#[derive(Debug, Clone)]
pub struct FeeBreakdown {
    /// Platform fee in minor units.
    pub amount: i64,
    /// Rate as a percentage (e.g. 1.5), when known.
    pub rate_percent: Option<f64>,
    pub duration_months: i64,
    pub source: FeeSource,
}

/// Booking span rounded to whole months at 30.4375-day precision.
pub fn duration_in_months(start: DateTime<Utc>, end: DateTime<Utc>) -> i64 {
    let span_ms = (end - start).num_milliseconds() as f64;
    (span_ms / (MS_PER_DAY * DAYS_PER_MONTH_PRECISE)).round() as i64
}

/// Resolve the platform fee for a payment.
///
/// A zero-amount itemized line falls through to the duration-based
/// computation, matching how legacy rows without a precomputed fee behave.
pub fn resolve_platform_fee(
    charges: &[PaymentChargeLine],
    total_amount: i64,
    booking_start: DateTime<Utc>,
    booking_end: DateTime<Utc>,
    schedule: &FeeSchedule,
) -> FeeBreakdown {
    let duration_months = duration_in_months(booking_start, booking_end);

    let itemized = charges.iter().find(|c| c.is_applied_platform_fee());
    if let Some(line) = itemized {
        if line.amount != 0 {
            return FeeBreakdown {
                amount: line.amount,
                rate_percent: line.metadata_rate_percent(),
                duration_months,
                source: FeeSource::Itemized,
            };
        }
    }

    let rate = schedule.rate_for_duration(duration_months);
    FeeBreakdown {
        amount: (total_amount as f64 * rate).round() as i64,
        rate_percent: Some(rate * PERCENT_MULTIPLIER),
        duration_months,
        source: FeeSource::DurationBased,
    }
}
