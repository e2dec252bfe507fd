//! Test helper module for rent-payment-service integration tests.
//!
//! Spawns the real router against an in-memory store, a recording mailer,
//! and a wiremock Stripe API, so tests are hermetic.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rent_payment_service::config::{
    Config, CronConfig, DatabaseConfig, PaymentConfig, ServerConfig, SmtpConfig, StripeConfig,
};
use rent_payment_service::error::AppError;
use rent_payment_service::models::{
    Booking, DuePayment, Host, ListingSummary, NewPaymentTransaction, PaymentChargeLine,
    PaymentStatus, RentPayment, Renter,
};
use rent_payment_service::services::database::{DueWindow, PaymentStore, SettleOutcome};
use rent_payment_service::services::fees::FeeSchedule;
use rent_payment_service::services::notifications::{MockMailer, Notifier};
use rent_payment_service::services::stripe::IdempotencyStrategy;
use rent_payment_service::services::{init_metrics, StripeClient};
use rent_payment_service::startup::{build_router, AppState};
use secrecy::Secret;
use serde_json::json;
use std::sync::{Arc, Mutex};
use uuid::Uuid;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const CRON_SECRET: &str = "test-cron-secret";
pub const OPS_EMAIL: &str = "ops@example.com";

/// In-memory `PaymentStore` mirroring the SQL selection and settlement
/// semantics, including the conditional mark-paid.
#[derive(Default)]
pub struct InMemoryStore {
    payments: Mutex<Vec<DuePayment>>,
    transactions: Mutex<Vec<NewPaymentTransaction>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, item: DuePayment) {
        self.payments.lock().unwrap().push(item);
    }

    pub fn payment(&self, payment_id: Uuid) -> RentPayment {
        self.payments
            .lock()
            .unwrap()
            .iter()
            .find(|p| p.payment.payment_id == payment_id)
            .map(|p| p.payment.clone())
            .expect("payment not found")
    }

    pub fn transactions(&self) -> Vec<NewPaymentTransaction> {
        self.transactions.lock().unwrap().clone()
    }
}

#[async_trait]
impl PaymentStore for InMemoryStore {
    async fn find_due_payments(
        &self,
        window: DueWindow,
        max_retries: i32,
    ) -> Result<Vec<DuePayment>, AppError> {
        Ok(self
            .payments
            .lock()
            .unwrap()
            .iter()
            .filter(|p| {
                let payment = &p.payment;
                payment.due_date >= window.start
                    && payment.due_date < window.end
                    && !payment.is_paid
                    && payment.cancelled_at.is_none()
                    && payment.stripe_payment_method_id.is_some()
                    && payment.retry_count < max_retries
            })
            .cloned()
            .collect())
    }

    async fn find_retryable_payments(
        &self,
        cutoff: DateTime<Utc>,
        max_retry_attempts: i32,
    ) -> Result<Vec<DuePayment>, AppError> {
        Ok(self
            .payments
            .lock()
            .unwrap()
            .iter()
            .filter(|p| {
                let payment = &p.payment;
                payment.due_date < cutoff
                    && payment.status == PaymentStatus::Failed.as_str()
                    && !payment.is_paid
                    && payment.cancelled_at.is_none()
                    && payment.stripe_payment_method_id.is_some()
                    && payment.retry_count < max_retry_attempts
                    && payment.last_retry_at.map_or(true, |at| at < cutoff)
            })
            .cloned()
            .collect())
    }

    async fn find_preview_payments(&self, window: DueWindow) -> Result<Vec<DuePayment>, AppError> {
        Ok(self
            .payments
            .lock()
            .unwrap()
            .iter()
            .filter(|p| {
                let payment = &p.payment;
                payment.due_date >= window.start
                    && payment.due_date < window.end
                    && !payment.is_paid
                    && payment.cancelled_at.is_none()
            })
            .cloned()
            .collect())
    }

    async fn settle_succeeded(
        &self,
        payment_id: Uuid,
        intent_id: &str,
        now: DateTime<Utc>,
        retry_stamp: Option<DateTime<Utc>>,
        audit: NewPaymentTransaction,
    ) -> Result<SettleOutcome, AppError> {
        let mut payments = self.payments.lock().unwrap();
        let item = payments
            .iter_mut()
            .find(|p| p.payment.payment_id == payment_id)
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("payment {}", payment_id)))?;

        if item.payment.is_paid {
            return Ok(SettleOutcome::AlreadyPaid);
        }

        item.payment.is_paid = true;
        item.payment.status = PaymentStatus::Succeeded.as_str().to_string();
        item.payment.payment_captured_at = Some(now);
        item.payment.stripe_payment_intent_id = Some(intent_id.to_string());
        if retry_stamp.is_some() {
            item.payment.last_retry_at = retry_stamp;
        }
        item.payment.updated_utc = now;

        self.transactions.lock().unwrap().push(audit);
        Ok(SettleOutcome::Applied)
    }

    async fn settle_processing(
        &self,
        payment_id: Uuid,
        intent_id: &str,
        now: DateTime<Utc>,
        retry_stamp: Option<DateTime<Utc>>,
        audit: NewPaymentTransaction,
    ) -> Result<(), AppError> {
        let mut payments = self.payments.lock().unwrap();
        let item = payments
            .iter_mut()
            .find(|p| p.payment.payment_id == payment_id)
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("payment {}", payment_id)))?;

        item.payment.status = PaymentStatus::Processing.as_str().to_string();
        item.payment.payment_authorized_at = Some(now);
        item.payment.stripe_payment_intent_id = Some(intent_id.to_string());
        if retry_stamp.is_some() {
            item.payment.last_retry_at = retry_stamp;
        }
        item.payment.updated_utc = now;

        self.transactions.lock().unwrap().push(audit);
        Ok(())
    }

    async fn record_failure(
        &self,
        payment_id: Uuid,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<(), AppError> {
        let mut payments = self.payments.lock().unwrap();
        let item = payments
            .iter_mut()
            .find(|p| p.payment.payment_id == payment_id)
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("payment {}", payment_id)))?;

        item.payment.status = PaymentStatus::Failed.as_str().to_string();
        item.payment.failure_reason = Some(reason.to_string());
        item.payment.retry_count += 1;
        item.payment.last_retry_at = Some(now);
        item.payment.updated_utc = now;
        Ok(())
    }

    async fn health_check(&self) -> Result<(), AppError> {
        Ok(())
    }
}

/// Fixture builder for a candidate payment with sensible defaults:
/// $2000.00 due now, 8-month booking, ready host, stored card.
pub struct PaymentBuilder {
    due_date: DateTime<Utc>,
    amount: i64,
    total_amount: Option<i64>,
    is_paid: bool,
    status: PaymentStatus,
    cancelled_at: Option<DateTime<Utc>>,
    payment_method: Option<String>,
    retry_count: i32,
    last_retry_at: Option<DateTime<Utc>>,
    booking_days: i64,
    host_ready: bool,
    renter_customer: Option<String>,
    charges: Vec<PaymentChargeLine>,
}

impl PaymentBuilder {
    pub fn due(due_date: DateTime<Utc>) -> Self {
        Self {
            due_date,
            amount: 200_000,
            total_amount: None,
            is_paid: false,
            status: PaymentStatus::Pending,
            cancelled_at: None,
            payment_method: Some(format!("pm_{}", Uuid::new_v4().simple())),
            retry_count: 0,
            last_retry_at: None,
            booking_days: 244,
            host_ready: true,
            renter_customer: Some(format!("cus_{}", Uuid::new_v4().simple())),
            charges: vec![],
        }
    }

    pub fn amount(mut self, amount: i64) -> Self {
        self.amount = amount;
        self
    }

    pub fn total_amount(mut self, total: i64) -> Self {
        self.total_amount = Some(total);
        self
    }

    pub fn paid(mut self) -> Self {
        self.is_paid = true;
        self.status = PaymentStatus::Succeeded;
        self
    }

    pub fn failed(mut self) -> Self {
        self.status = PaymentStatus::Failed;
        self
    }

    pub fn cancelled(mut self, at: DateTime<Utc>) -> Self {
        self.cancelled_at = Some(at);
        self.status = PaymentStatus::Cancelled;
        self
    }

    pub fn no_payment_method(mut self) -> Self {
        self.payment_method = None;
        self
    }

    pub fn payment_method(mut self, method: &str) -> Self {
        self.payment_method = Some(method.to_string());
        self
    }

    pub fn retry_count(mut self, count: i32) -> Self {
        self.retry_count = count;
        self
    }

    pub fn last_retry_at(mut self, at: DateTime<Utc>) -> Self {
        self.last_retry_at = Some(at);
        self
    }

    pub fn booking_days(mut self, days: i64) -> Self {
        self.booking_days = days;
        self
    }

    pub fn host_not_ready(mut self) -> Self {
        self.host_ready = false;
        self
    }

    pub fn renter_customer(mut self, customer: &str) -> Self {
        self.renter_customer = Some(customer.to_string());
        self
    }

    pub fn platform_fee_charge(mut self, amount: i64, rate_percent: f64) -> Self {
        self.charges.push(PaymentChargeLine {
            charge_id: Uuid::new_v4(),
            payment_id: Uuid::nil(), // fixed up in build()
            category: "PLATFORM_FEE".to_string(),
            amount,
            is_applied: true,
            metadata: Some(json!({ "rate": rate_percent })),
        });
        self
    }

    pub fn build(self) -> DuePayment {
        let payment_id = Uuid::new_v4();
        let booking_id = Uuid::new_v4();
        let listing_id = Uuid::new_v4();
        let renter_id = Uuid::new_v4();
        let host_id = Uuid::new_v4();
        let booking_start = self.due_date - Duration::days(30);

        let charges = self
            .charges
            .into_iter()
            .map(|mut line| {
                line.payment_id = payment_id;
                line
            })
            .collect();

        DuePayment {
            payment: RentPayment {
                payment_id,
                booking_id,
                due_date: self.due_date,
                amount: self.amount,
                total_amount: self.total_amount,
                is_paid: self.is_paid,
                status: self.status.as_str().to_string(),
                cancelled_at: self.cancelled_at,
                stripe_payment_method_id: self.payment_method,
                stripe_payment_intent_id: None,
                retry_count: self.retry_count,
                last_retry_at: self.last_retry_at,
                failure_reason: None,
                payment_authorized_at: None,
                payment_captured_at: None,
                created_utc: self.due_date - Duration::days(60),
                updated_utc: self.due_date - Duration::days(60),
            },
            booking: Booking {
                booking_id,
                renter_user_id: renter_id,
                listing_id,
                start_date: booking_start,
                end_date: booking_start + Duration::days(self.booking_days),
            },
            listing: ListingSummary {
                listing_id,
                host_user_id: host_id,
                title: "Sunny Apartment".to_string(),
            },
            renter: Renter {
                user_id: renter_id,
                first_name: Some("Rita".to_string()),
                last_name: Some("Renter".to_string()),
                email: format!("renter-{}@example.com", renter_id.simple()),
                stripe_customer_id: self.renter_customer,
            },
            host: Host {
                user_id: host_id,
                first_name: Some("Hank".to_string()),
                last_name: Some("Host".to_string()),
                email: format!("host-{}@example.com", host_id.simple()),
                stripe_account_id: self.host_ready.then(|| format!("acct_{}", host_id.simple())),
                stripe_charges_enabled: self.host_ready,
            },
            charges,
        }
    }
}

pub fn test_config(stripe_base_url: String) -> Config {
    Config {
        server: ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
        },
        database: DatabaseConfig {
            url: Secret::new("postgres://unused".to_string()),
            max_connections: 1,
            min_connections: 1,
        },
        cron: CronConfig {
            secret: Secret::new(CRON_SECRET.to_string()),
        },
        stripe: StripeConfig {
            secret_key: Secret::new("sk_test_123".to_string()),
            api_base_url: stripe_base_url,
        },
        smtp: SmtpConfig {
            host: "smtp.example.com".to_string(),
            port: 587,
            user: String::new(),
            password: Secret::new(String::new()),
            from_email: "noreply@example.com".to_string(),
            from_name: "Rent Payments".to_string(),
            enabled: false,
        },
        payments: PaymentConfig {
            business_timezone: "America/Los_Angeles".parse().unwrap(),
            currency: "usd".to_string(),
            fees: FeeSchedule {
                short_term_rate: 0.03,
                long_term_rate: 0.015,
                threshold_months: 6,
            },
            max_retries: 3,
            max_retry_attempts: 2,
            idempotency: IdempotencyStrategy::Stable,
            operations_email: OPS_EMAIL.to_string(),
            public_base_url: "http://localhost:3000".to_string(),
        },
        service_name: "rent-payment-service-test".to_string(),
    }
}

pub struct TestApp {
    pub address: String,
    pub store: Arc<InMemoryStore>,
    pub mailer: Arc<MockMailer>,
    pub stripe_server: MockServer,
    client: reqwest::Client,
}

impl TestApp {
    pub async fn spawn() -> Self {
        init_metrics();

        let stripe_server = MockServer::start().await;
        let config = test_config(stripe_server.uri());

        let store = Arc::new(InMemoryStore::new());
        let mailer = Arc::new(MockMailer::new());
        let notifier = Notifier::new(
            mailer.clone(),
            config.payments.operations_email.clone(),
            config.payments.public_base_url.clone(),
            config.payments.business_timezone,
        );

        let state = AppState {
            config: config.clone(),
            store: store.clone(),
            gateway: StripeClient::new(config.stripe.clone()),
            notifier,
        };

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind test listener");
        let port = listener.local_addr().unwrap().port();
        let router = build_router(state);

        tokio::spawn(async move {
            axum::serve(listener, router).await.ok();
        });

        TestApp {
            address: format!("http://127.0.0.1:{}", port),
            store,
            mailer,
            stripe_server,
            client: reqwest::Client::new(),
        }
    }

    /// GET a cron route with the given bearer token.
    pub async fn trigger(&self, route: &str, token: Option<&str>) -> reqwest::Response {
        let mut request = self.client.get(format!("{}{}", self.address, route));
        if let Some(token) = token {
            request = request.header("Authorization", format!("Bearer {}", token));
        }
        request.send().await.expect("Failed to execute request")
    }

    pub async fn stripe_request_count(&self) -> usize {
        self.stripe_server
            .received_requests()
            .await
            .map(|reqs| reqs.len())
            .unwrap_or(0)
    }
}

/// Mount a payment-intent response with the given status for all requests.
pub async fn mock_intent_with_status(server: &MockServer, status: &str) {
    Mock::given(method("POST"))
        .and(path("/payment_intents"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": format!("pi_{}", Uuid::new_v4().simple()),
            "status": status,
            "amount": 200000
        })))
        .mount(server)
        .await;
}

/// Mount a payment-intent response only for requests charging `customer`.
pub async fn mock_intent_for_customer(server: &MockServer, customer: &str, status: &str) {
    Mock::given(method("POST"))
        .and(path("/payment_intents"))
        .and(body_string_contains(customer))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": format!("pi_{}", Uuid::new_v4().simple()),
            "status": status,
            "amount": 200000
        })))
        .mount(server)
        .await;
}

/// Mount a card-error rejection.
pub async fn mock_intent_error(server: &MockServer, code: &str, decline_code: &str, message: &str) {
    Mock::given(method("POST"))
        .and(path("/payment_intents"))
        .respond_with(ResponseTemplate::new(402).set_body_json(json!({
            "error": {
                "type": "card_error",
                "code": code,
                "decline_code": decline_code,
                "message": message
            }
        })))
        .mount(server)
        .await;
}

/// Mount a card-error rejection only for requests charging `customer`.
pub async fn mock_intent_error_for_customer(
    server: &MockServer,
    customer: &str,
    code: &str,
    decline_code: &str,
    message: &str,
) {
    Mock::given(method("POST"))
        .and(path("/payment_intents"))
        .and(body_string_contains(customer))
        .respond_with(ResponseTemplate::new(402).set_body_json(json!({
            "error": {
                "type": "card_error",
                "code": code,
                "decline_code": decline_code,
                "message": message
            }
        })))
        .mount(server)
        .await;
}
