//! Durable store for payment records.
//!
//! `PaymentStore` is the seam the processor works against; `Database` is the
//! PostgreSQL implementation. Settlement updates are conditional on
//! `is_paid = FALSE` so a lost race mutates zero rows instead of
//! double-charging bookkeeping.

use crate::error::AppError;
use crate::models::{
    Booking, DuePayment, Host, ListingSummary, NewPaymentTransaction, PaymentChargeLine,
    PaymentStatus, RentPayment, Renter,
};
use crate::services::metrics::DB_QUERY_DURATION;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::FromRow;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;

/// Half-open UTC selection interval for one business calendar day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DueWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Result of a conditional mark-paid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettleOutcome {
    Applied,
    /// The row was already paid when the update ran; nothing was written.
    AlreadyPaid,
}

#[async_trait]
pub trait PaymentStore: Send + Sync {
    /// Payments due inside `window`: unpaid, uncancelled, with a stored
    /// payment method, and under the retry ceiling.
    async fn find_due_payments(
        &self,
        window: DueWindow,
        max_retries: i32,
    ) -> Result<Vec<DuePayment>, AppError>;

    /// Failed payments past due before `cutoff` that have not been retried
    /// today and are under the retry-run ceiling.
    async fn find_retryable_payments(
        &self,
        cutoff: DateTime<Utc>,
        max_retry_attempts: i32,
    ) -> Result<Vec<DuePayment>, AppError>;

    /// Unpaid, uncancelled payments due inside `window`, regardless of
    /// payment-method or retry state. Used by the read-only preview run.
    async fn find_preview_payments(&self, window: DueWindow) -> Result<Vec<DuePayment>, AppError>;

    /// Conditionally mark a payment paid and write its audit row in one
    /// transaction. `retry_stamp` is set by the retry run.
    async fn settle_succeeded(
        &self,
        payment_id: Uuid,
        intent_id: &str,
        now: DateTime<Utc>,
        retry_stamp: Option<DateTime<Utc>>,
        audit: NewPaymentTransaction,
    ) -> Result<SettleOutcome, AppError>;

    /// Stamp authorization for an asynchronous (bank-debit) charge and write
    /// its pending audit row. The payment stays unpaid until a webhook
    /// finalizes it.
    async fn settle_processing(
        &self,
        payment_id: Uuid,
        intent_id: &str,
        now: DateTime<Utc>,
        retry_stamp: Option<DateTime<Utc>>,
        audit: NewPaymentTransaction,
    ) -> Result<(), AppError>;

    /// Record a failed attempt: reason, retry-count increment, last-retry stamp.
    async fn record_failure(
        &self,
        payment_id: Uuid,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<(), AppError>;

    async fn health_check(&self) -> Result<(), AppError>;
}

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

/// Flat projection of the joined candidate query.
#[derive(FromRow)]
struct DuePaymentRow {
    #[sqlx(flatten)]
    payment: RentPayment,

    renter_user_id: Uuid,
    listing_id: Uuid,
    start_date: DateTime<Utc>,
    end_date: DateTime<Utc>,

    listing_title: String,
    host_user_id: Uuid,

    renter_first_name: Option<String>,
    renter_last_name: Option<String>,
    renter_email: String,
    renter_stripe_customer_id: Option<String>,

    host_first_name: Option<String>,
    host_last_name: Option<String>,
    host_email: String,
    host_stripe_account_id: Option<String>,
    host_stripe_charges_enabled: bool,
}

impl DuePaymentRow {
    fn into_due_payment(self, charges: Vec<PaymentChargeLine>) -> DuePayment {
        DuePayment {
            booking: Booking {
                booking_id: self.payment.booking_id,
                renter_user_id: self.renter_user_id,
                listing_id: self.listing_id,
                start_date: self.start_date,
                end_date: self.end_date,
            },
            listing: ListingSummary {
                listing_id: self.listing_id,
                host_user_id: self.host_user_id,
                title: self.listing_title,
            },
            renter: Renter {
                user_id: self.renter_user_id,
                first_name: self.renter_first_name,
                last_name: self.renter_last_name,
                email: self.renter_email,
                stripe_customer_id: self.renter_stripe_customer_id,
            },
            host: Host {
                user_id: self.host_user_id,
                first_name: self.host_first_name,
                last_name: self.host_last_name,
                email: self.host_email,
                stripe_account_id: self.host_stripe_account_id,
                stripe_charges_enabled: self.host_stripe_charges_enabled,
            },
            payment: self.payment,
            charges,
        }
    }
}

const CANDIDATE_SELECT: &str = r#"
    SELECT
        p.payment_id, p.booking_id, p.due_date, p.amount, p.total_amount,
        p.is_paid, p.status, p.cancelled_at, p.stripe_payment_method_id,
        p.stripe_payment_intent_id, p.retry_count, p.last_retry_at,
        p.failure_reason, p.payment_authorized_at, p.payment_captured_at,
        p.created_utc, p.updated_utc,
        b.renter_user_id, b.listing_id, b.start_date, b.end_date,
        l.title AS listing_title, l.host_user_id,
        r.first_name AS renter_first_name, r.last_name AS renter_last_name,
        r.email AS renter_email, r.stripe_customer_id AS renter_stripe_customer_id,
        h.first_name AS host_first_name, h.last_name AS host_last_name,
        h.email AS host_email, h.stripe_account_id AS host_stripe_account_id,
        h.stripe_charges_enabled AS host_stripe_charges_enabled
    FROM rent_payments p
    JOIN bookings b ON b.booking_id = p.booking_id
    JOIN listings l ON l.listing_id = b.listing_id
    JOIN users r ON r.user_id = b.renter_user_id
    JOIN users h ON h.user_id = l.host_user_id
"#;

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "rent-payment-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }

    async fn load_charges(
        &self,
        payment_ids: &[Uuid],
    ) -> Result<HashMap<Uuid, Vec<PaymentChargeLine>>, AppError> {
        if payment_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let lines = sqlx::query_as::<_, PaymentChargeLine>(
            r#"
            SELECT charge_id, payment_id, category, amount, is_applied, metadata
            FROM payment_charges
            WHERE payment_id = ANY($1)
            "#,
        )
        .bind(payment_ids)
        .fetch_all(&self.pool)
        .await?;

        let mut grouped: HashMap<Uuid, Vec<PaymentChargeLine>> = HashMap::new();
        for line in lines {
            grouped.entry(line.payment_id).or_default().push(line);
        }
        Ok(grouped)
    }

    async fn assemble(&self, rows: Vec<DuePaymentRow>) -> Result<Vec<DuePayment>, AppError> {
        let ids: Vec<Uuid> = rows.iter().map(|r| r.payment.payment_id).collect();
        let mut charges = self.load_charges(&ids).await?;
        Ok(rows
            .into_iter()
            .map(|row| {
                let lines = charges.remove(&row.payment.payment_id).unwrap_or_default();
                row.into_due_payment(lines)
            })
            .collect())
    }
}

#[async_trait]
impl PaymentStore for Database {
    #[instrument(skip(self))]
    async fn find_due_payments(
        &self,
        window: DueWindow,
        max_retries: i32,
    ) -> Result<Vec<DuePayment>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_due_payments"])
            .start_timer();

        let sql = format!(
            r#"{CANDIDATE_SELECT}
            WHERE p.due_date >= $1 AND p.due_date < $2
              AND p.is_paid = FALSE
              AND p.cancelled_at IS NULL
              AND p.stripe_payment_method_id IS NOT NULL
              AND p.retry_count < $3
            ORDER BY p.due_date ASC, p.payment_id ASC
            "#
        );
        let rows = sqlx::query_as::<_, DuePaymentRow>(&sql)
            .bind(window.start)
            .bind(window.end)
            .bind(max_retries)
            .fetch_all(&self.pool)
            .await?;

        timer.observe_duration();
        self.assemble(rows).await
    }

    #[instrument(skip(self))]
    async fn find_retryable_payments(
        &self,
        cutoff: DateTime<Utc>,
        max_retry_attempts: i32,
    ) -> Result<Vec<DuePayment>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_retryable_payments"])
            .start_timer();

        let sql = format!(
            r#"{CANDIDATE_SELECT}
            WHERE p.due_date < $1
              AND p.status = 'FAILED'
              AND p.is_paid = FALSE
              AND p.cancelled_at IS NULL
              AND p.stripe_payment_method_id IS NOT NULL
              AND p.retry_count < $2
              AND (p.last_retry_at IS NULL OR p.last_retry_at < $1)
            ORDER BY p.due_date ASC, p.payment_id ASC
            "#
        );
        let rows = sqlx::query_as::<_, DuePaymentRow>(&sql)
            .bind(cutoff)
            .bind(max_retry_attempts)
            .fetch_all(&self.pool)
            .await?;

        timer.observe_duration();
        self.assemble(rows).await
    }

    #[instrument(skip(self))]
    async fn find_preview_payments(&self, window: DueWindow) -> Result<Vec<DuePayment>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_preview_payments"])
            .start_timer();

        let sql = format!(
            r#"{CANDIDATE_SELECT}
            WHERE p.due_date >= $1 AND p.due_date < $2
              AND p.is_paid = FALSE
              AND p.cancelled_at IS NULL
            ORDER BY p.due_date ASC, p.payment_id ASC
            "#
        );
        let rows = sqlx::query_as::<_, DuePaymentRow>(&sql)
            .bind(window.start)
            .bind(window.end)
            .fetch_all(&self.pool)
            .await?;

        timer.observe_duration();
        self.assemble(rows).await
    }

    #[instrument(skip(self, audit))]
    async fn settle_succeeded(
        &self,
        payment_id: Uuid,
        intent_id: &str,
        now: DateTime<Utc>,
        retry_stamp: Option<DateTime<Utc>>,
        audit: NewPaymentTransaction,
    ) -> Result<SettleOutcome, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["settle_succeeded"])
            .start_timer();

        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            r#"
            UPDATE rent_payments
            SET is_paid = TRUE,
                status = $2,
                payment_captured_at = $3,
                stripe_payment_intent_id = $4,
                last_retry_at = COALESCE($5, last_retry_at),
                updated_utc = $3
            WHERE payment_id = $1 AND is_paid = FALSE
            "#,
        )
        .bind(payment_id)
        .bind(PaymentStatus::Succeeded.as_str())
        .bind(now)
        .bind(intent_id)
        .bind(retry_stamp)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            tx.rollback().await?;
            timer.observe_duration();
            return Ok(SettleOutcome::AlreadyPaid);
        }

        insert_transaction(&mut tx, &audit, now).await?;
        tx.commit().await?;

        timer.observe_duration();
        info!(payment_id = %payment_id, intent_id = %intent_id, "payment settled");
        Ok(SettleOutcome::Applied)
    }

    #[instrument(skip(self, audit))]
    async fn settle_processing(
        &self,
        payment_id: Uuid,
        intent_id: &str,
        now: DateTime<Utc>,
        retry_stamp: Option<DateTime<Utc>>,
        audit: NewPaymentTransaction,
    ) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["settle_processing"])
            .start_timer();

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            UPDATE rent_payments
            SET status = $2,
                payment_authorized_at = $3,
                stripe_payment_intent_id = $4,
                last_retry_at = COALESCE($5, last_retry_at),
                updated_utc = $3
            WHERE payment_id = $1
            "#,
        )
        .bind(payment_id)
        .bind(PaymentStatus::Processing.as_str())
        .bind(now)
        .bind(intent_id)
        .bind(retry_stamp)
        .execute(&mut *tx)
        .await?;

        insert_transaction(&mut tx, &audit, now).await?;
        tx.commit().await?;

        timer.observe_duration();
        info!(payment_id = %payment_id, intent_id = %intent_id, "payment authorization recorded");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn record_failure(
        &self,
        payment_id: Uuid,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["record_failure"])
            .start_timer();

        sqlx::query(
            r#"
            UPDATE rent_payments
            SET status = $2,
                failure_reason = $3,
                retry_count = retry_count + 1,
                last_retry_at = $4,
                updated_utc = $4
            WHERE payment_id = $1
            "#,
        )
        .bind(payment_id)
        .bind(PaymentStatus::Failed.as_str())
        .bind(reason)
        .bind(now)
        .execute(&self.pool)
        .await?;

        timer.observe_duration();
        Ok(())
    }

    async fn health_check(&self) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["health_check"])
            .start_timer();

        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Health check failed: {}", e)))?;

        timer.observe_duration();
        Ok(())
    }
}

async fn insert_transaction(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    audit: &NewPaymentTransaction,
    now: DateTime<Utc>,
) -> Result<(), AppError> {
    sqlx::query(
        r#"
        INSERT INTO payment_transactions (
            transaction_id, transaction_number, stripe_payment_intent_id,
            amount, currency, status, platform_fee_amount, net_amount,
            processed_at, user_id, booking_id, created_utc
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(&audit.transaction_number)
    .bind(&audit.stripe_payment_intent_id)
    .bind(audit.amount)
    .bind(&audit.currency)
    .bind(audit.status.as_str())
    .bind(audit.platform_fee_amount)
    .bind(audit.net_amount)
    .bind(audit.processed_at)
    .bind(audit.user_id)
    .bind(audit.booking_id)
    .bind(now)
    .execute(&mut **tx)
    .await?;
    Ok(())
}
