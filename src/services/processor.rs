//! Rent payment processing runs.
//!
//! Three scheduled operations share this module: the due run charges
//! payments due today, the retry run re-attempts past-due failures, and the
//! preview run reports tomorrow's batch without mutating anything.
//!
//! Payments are processed sequentially and independently: one payment's
//! failure never aborts the batch.

use crate::config::PaymentConfig;
use crate::error::AppError;
use crate::models::{DuePayment, NewPaymentTransaction, TransactionStatus};
use crate::services::database::{DueWindow, PaymentStore, SettleOutcome};
use crate::services::fees::{self, FeeBreakdown};
use crate::services::metrics::{record_charged_amount, record_payment_outcome, record_run, GATEWAY_REQUEST_DURATION};
use crate::services::notifications::{format_amount, Notifier};
use crate::services::stripe::{
    ChargeRequest, GatewayError, PaymentIntent, PaymentIntentStatus, StripeClient,
};
use chrono::{DateTime, Duration, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use std::sync::Arc;

/// Which scheduled operation is executing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunKind {
    Due,
    Retry,
}

impl RunKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunKind::Due => "due",
            RunKind::Retry => "retry",
        }
    }

    fn metadata_type(&self) -> &'static str {
        match self {
            RunKind::Due => "monthly_rent",
            RunKind::Retry => "monthly_rent_retry",
        }
    }

    fn idempotency_prefix(&self) -> &'static str {
        match self {
            RunKind::Due => "rent-payment",
            RunKind::Retry => "rent-payment-retry",
        }
    }

    fn transaction_prefix(&self) -> &'static str {
        match self {
            RunKind::Due => "RENT",
            RunKind::Retry => "RENT-RETRY",
        }
    }

    /// The retry run stamps `last_retry_at` on every outcome; the due run
    /// only stamps it on failure.
    fn retry_stamp(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            RunKind::Due => None,
            RunKind::Retry => Some(now),
        }
    }
}

/// Counts returned from a processing run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// Result of the read-only preview run.
#[derive(Debug, Clone)]
pub struct PreviewSummary {
    pub preview_date: DateTime<Utc>,
    pub payments_count: usize,
}

enum PaymentOutcome {
    Succeeded,
    Processing,
    AlreadySettled,
    Failed,
}

/// Per-payment error ahead of or from the charge submission.
enum ChargeError {
    /// Party configuration prevents charging; no gateway call was made.
    Config(String),
    Gateway(GatewayError),
}

impl ChargeError {
    fn failure_reason(&self) -> String {
        match self {
            ChargeError::Config(message) => message.clone(),
            ChargeError::Gateway(err) => err.failure_reason(),
        }
    }
}

/// Compute the UTC midnight-to-midnight window for the calendar day that
/// `now` falls on in `tz`, shifted by `offset_days`.
///
/// The business calendar day is deliberately decoupled from the server
/// wall-clock day so runs triggered at a fixed UTC hour always align to one
/// business day.
pub fn business_day_window(now: DateTime<Utc>, tz: Tz, offset_days: i64) -> DueWindow {
    let local_date = now.with_timezone(&tz).date_naive() + Duration::days(offset_days);
    let start = Utc.from_utc_datetime(&local_date.and_time(NaiveTime::MIN));
    DueWindow {
        start,
        end: start + Duration::days(1),
    }
}

pub struct RentPaymentProcessor {
    store: Arc<dyn PaymentStore>,
    gateway: StripeClient,
    notifier: Notifier,
    config: PaymentConfig,
}

impl RentPaymentProcessor {
    pub fn new(
        store: Arc<dyn PaymentStore>,
        gateway: StripeClient,
        notifier: Notifier,
        config: PaymentConfig,
    ) -> Self {
        Self {
            store,
            gateway,
            notifier,
            config,
        }
    }

    /// Charge every payment due today in the business timezone.
    pub async fn run_due(&self, now: DateTime<Utc>) -> Result<BatchSummary, AppError> {
        let window = business_day_window(now, self.config.business_timezone, 0);
        tracing::info!(
            window_start = %window.start,
            window_end = %window.end,
            "starting due payment run"
        );

        let candidates = self
            .store
            .find_due_payments(window, self.config.max_retries)
            .await?;

        let summary = self.process_batch(candidates, RunKind::Due, now).await;
        record_run("due", "completed");
        Ok(summary)
    }

    /// Re-attempt past-due payments whose last attempt failed, skipping any
    /// already retried today.
    pub async fn run_retries(&self, now: DateTime<Utc>) -> Result<BatchSummary, AppError> {
        let window = business_day_window(now, self.config.business_timezone, 0);
        tracing::info!(cutoff = %window.start, "starting failed payment retry run");

        let candidates = self
            .store
            .find_retryable_payments(window.start, self.config.max_retry_attempts)
            .await?;

        let summary = self.process_batch(candidates, RunKind::Retry, now).await;
        record_run("retry", "completed");
        Ok(summary)
    }

    /// Email the operations address a report of tomorrow's batch. Read-only.
    pub async fn run_preview(&self, now: DateTime<Utc>) -> Result<PreviewSummary, AppError> {
        let window = business_day_window(now, self.config.business_timezone, 1);
        tracing::info!(
            window_start = %window.start,
            window_end = %window.end,
            "starting payment preview run"
        );

        let payments = self.store.find_preview_payments(window).await?;
        let report_date = window.start.format("%Y-%m-%d").to_string();
        let body = build_preview_report(&payments, &report_date, &self.config);

        self.notifier.preview_report(&report_date, body).await;
        record_run("preview", "completed");

        Ok(PreviewSummary {
            preview_date: window.start,
            payments_count: payments.len(),
        })
    }

    async fn process_batch(
        &self,
        candidates: Vec<DuePayment>,
        run: RunKind,
        now: DateTime<Utc>,
    ) -> BatchSummary {
        let mut summary = BatchSummary {
            processed: candidates.len(),
            ..Default::default()
        };

        if candidates.is_empty() {
            tracing::info!(run = run.as_str(), "no payments to process");
            return summary;
        }

        tracing::info!(
            run = run.as_str(),
            count = candidates.len(),
            "processing payment batch"
        );

        for item in &candidates {
            match self.process_payment(item, run, now).await {
                Ok(PaymentOutcome::Succeeded) => {
                    summary.succeeded += 1;
                    record_payment_outcome(run.as_str(), "succeeded");
                }
                Ok(PaymentOutcome::Processing) => {
                    summary.succeeded += 1;
                    record_payment_outcome(run.as_str(), "processing");
                }
                Ok(PaymentOutcome::AlreadySettled) => {
                    // The charge went through but another run settled the row
                    // first; counted as succeeded, surfaced as a conflict.
                    summary.succeeded += 1;
                    record_payment_outcome(run.as_str(), "conflict");
                }
                Ok(PaymentOutcome::Failed) => {
                    summary.failed += 1;
                    record_payment_outcome(run.as_str(), "failed");
                }
                Err(err) => {
                    // Safety net: the per-payment handler itself failed.
                    // Record a minimal failure so the retry-count increment
                    // is never lost.
                    summary.failed += 1;
                    record_payment_outcome(run.as_str(), "error");
                    tracing::error!(
                        payment_id = %item.payment.payment_id,
                        error = %err,
                        "payment processing error"
                    );
                    if let Err(persist_err) = self
                        .store
                        .record_failure(item.payment.payment_id, "Processing error occurred", now)
                        .await
                    {
                        tracing::error!(
                            payment_id = %item.payment.payment_id,
                            error = %persist_err,
                            "failed to record processing error"
                        );
                    }
                }
            }
        }

        tracing::info!(
            run = run.as_str(),
            processed = summary.processed,
            succeeded = summary.succeeded,
            failed = summary.failed,
            "payment batch complete"
        );
        summary
    }

    async fn process_payment(
        &self,
        item: &DuePayment,
        run: RunKind,
        now: DateTime<Utc>,
    ) -> Result<PaymentOutcome, AppError> {
        let payment = &item.payment;
        let total = payment.chargeable_amount();
        let fee = fees::resolve_platform_fee(
            &item.charges,
            total,
            item.booking.start_date,
            item.booking.end_date,
            &self.config.fees,
        );
        let host_amount = total - fee.amount;

        tracing::info!(
            payment_id = %payment.payment_id,
            run = run.as_str(),
            total_amount = total,
            platform_fee = fee.amount,
            host_amount = host_amount,
            retry_count = payment.retry_count,
            "processing rent payment"
        );

        match self.submit_charge(item, run, now, total, &fee).await {
            Ok(intent) => match intent.status {
                PaymentIntentStatus::Succeeded => {
                    self.settle_succeeded(item, run, now, total, &fee, &intent)
                        .await
                }
                PaymentIntentStatus::Processing => {
                    self.settle_processing(item, run, now, total, &fee, &intent)
                        .await
                }
                other => {
                    let err = ChargeError::Gateway(GatewayError::UnexpectedStatus(
                        other.as_str().to_string(),
                    ));
                    self.handle_failure(item, total, &err, now).await?;
                    Ok(PaymentOutcome::Failed)
                }
            },
            Err(err) => {
                self.handle_failure(item, total, &err, now).await?;
                Ok(PaymentOutcome::Failed)
            }
        }
    }

    async fn submit_charge(
        &self,
        item: &DuePayment,
        run: RunKind,
        now: DateTime<Utc>,
        total: i64,
        fee: &FeeBreakdown,
    ) -> Result<PaymentIntent, ChargeError> {
        let payment = &item.payment;

        let destination = match (&item.host.stripe_account_id, item.host.stripe_charges_enabled) {
            (Some(account), true) => account.clone(),
            _ => {
                return Err(ChargeError::Config(
                    "Host payment account not properly configured".to_string(),
                ))
            }
        };
        let customer = item.renter.stripe_customer_id.clone().ok_or_else(|| {
            ChargeError::Config("Renter billing profile not configured".to_string())
        })?;
        let payment_method = payment.stripe_payment_method_id.clone().ok_or_else(|| {
            ChargeError::Config("No stored payment method".to_string())
        })?;

        let rate_label = fee
            .rate_percent
            .map(|r| format!("{}%", r))
            .unwrap_or_else(|| "itemized".to_string());
        let metadata = vec![
            ("rent_payment_id".to_string(), payment.payment_id.to_string()),
            ("booking_id".to_string(), payment.booking_id.to_string()),
            ("renter_id".to_string(), item.renter.user_id.to_string()),
            ("host_id".to_string(), item.host.user_id.to_string()),
            ("type".to_string(), run.metadata_type().to_string()),
            ("total_amount".to_string(), format_amount(total)),
            ("platform_fee_rate".to_string(), rate_label),
            ("platform_fee_amount".to_string(), format_amount(fee.amount)),
            ("host_amount".to_string(), format_amount(total - fee.amount)),
            (
                "booking_duration_months".to_string(),
                fee.duration_months.to_string(),
            ),
        ];

        let request = ChargeRequest {
            amount: total,
            currency: self.config.currency.clone(),
            customer,
            payment_method,
            application_fee_amount: fee.amount,
            destination_account: destination,
            receipt_email: item.renter.email.clone(),
            metadata,
            idempotency_key: self.config.idempotency.key(
                run.idempotency_prefix(),
                payment.payment_id,
                payment.retry_count,
                now,
            ),
        };

        let timer = GATEWAY_REQUEST_DURATION
            .with_label_values(&["create_payment_intent"])
            .start_timer();
        let result = self.gateway.create_payment_intent(&request).await;
        timer.observe_duration();

        result.map_err(ChargeError::Gateway)
    }

    async fn settle_succeeded(
        &self,
        item: &DuePayment,
        run: RunKind,
        now: DateTime<Utc>,
        total: i64,
        fee: &FeeBreakdown,
        intent: &PaymentIntent,
    ) -> Result<PaymentOutcome, AppError> {
        let audit = self.audit_row(item, run, now, total, fee, intent, TransactionStatus::Succeeded);
        let outcome = self
            .store
            .settle_succeeded(
                item.payment.payment_id,
                &intent.id,
                now,
                run.retry_stamp(now),
                audit,
            )
            .await?;

        match outcome {
            SettleOutcome::Applied => {
                record_charged_amount(&self.config.currency, "succeeded", total);
                self.notifier.payment_succeeded(item, total, now).await;
                Ok(PaymentOutcome::Succeeded)
            }
            SettleOutcome::AlreadyPaid => {
                tracing::warn!(
                    payment_id = %item.payment.payment_id,
                    intent_id = %intent.id,
                    "payment was already settled; skipping bookkeeping and notifications"
                );
                Ok(PaymentOutcome::AlreadySettled)
            }
        }
    }

    async fn settle_processing(
        &self,
        item: &DuePayment,
        run: RunKind,
        now: DateTime<Utc>,
        total: i64,
        fee: &FeeBreakdown,
        intent: &PaymentIntent,
    ) -> Result<PaymentOutcome, AppError> {
        let mut audit =
            self.audit_row(item, run, now, total, fee, intent, TransactionStatus::Pending);
        // Finalization is deferred to the gateway webhook.
        audit.processed_at = None;

        self.store
            .settle_processing(
                item.payment.payment_id,
                &intent.id,
                now,
                run.retry_stamp(now),
                audit,
            )
            .await?;

        record_charged_amount(&self.config.currency, "processing", total);
        self.notifier.payment_processing(item, total, now).await;
        Ok(PaymentOutcome::Processing)
    }

    async fn handle_failure(
        &self,
        item: &DuePayment,
        total: i64,
        err: &ChargeError,
        now: DateTime<Utc>,
    ) -> Result<(), AppError> {
        let reason = err.failure_reason();
        tracing::warn!(
            payment_id = %item.payment.payment_id,
            reason = %reason,
            "rent payment attempt failed"
        );

        self.store
            .record_failure(item.payment.payment_id, &reason, now)
            .await?;
        record_charged_amount(&self.config.currency, "failed", total);
        self.notifier.payment_failed(item, total, &reason, now).await;
        Ok(())
    }

    fn audit_row(
        &self,
        item: &DuePayment,
        run: RunKind,
        now: DateTime<Utc>,
        total: i64,
        fee: &FeeBreakdown,
        intent: &PaymentIntent,
        status: TransactionStatus,
    ) -> NewPaymentTransaction {
        NewPaymentTransaction {
            transaction_number: format!(
                "{}-{}-{}",
                run.transaction_prefix(),
                item.payment.payment_id,
                now.timestamp_millis()
            ),
            stripe_payment_intent_id: intent.id.clone(),
            amount: total,
            currency: self.config.currency.clone(),
            status,
            platform_fee_amount: fee.amount,
            net_amount: total - fee.amount,
            processed_at: Some(now),
            user_id: item.renter.user_id,
            booking_id: item.payment.booking_id,
        }
    }
}

/// Plain-text report of tomorrow's batch for the operations address.
fn build_preview_report(payments: &[DuePayment], report_date: &str, config: &PaymentConfig) -> String {
    if payments.is_empty() {
        return format!("No rent payments are due on {}.\n", report_date);
    }

    let mut gross_total: i64 = 0;
    let mut lines = String::new();
    for item in payments {
        let total = item.payment.chargeable_amount();
        let fee = fees::resolve_platform_fee(
            &item.charges,
            total,
            item.booking.start_date,
            item.booking.end_date,
            &config.fees,
        );
        gross_total += total;

        let mut flags: Vec<&str> = Vec::new();
        if item.payment.stripe_payment_method_id.is_none() {
            flags.push("NO PAYMENT METHOD");
        }
        if !item.host.can_receive_payments() {
            flags.push("HOST ACCOUNT NOT READY");
        }
        if item.payment.retry_count >= config.max_retries {
            flags.push("RETRIES EXHAUSTED");
        }
        let flag_suffix = if flags.is_empty() {
            String::new()
        } else {
            format!(" [{}]", flags.join(", "))
        };

        lines.push_str(&format!(
            "- ${} | {} | renter {} | host {} | fee ${}{}\n",
            format_amount(total),
            item.listing.title,
            item.renter.display_name(),
            item.host.display_name(),
            format_amount(fee.amount),
            flag_suffix,
        ));
    }

    format!(
        "Rent payments due on {}: {}\nGross total: ${}\n\n{}",
        report_date,
        payments.len(),
        format_amount(gross_total),
        lines
    )
}
