//! Application startup and lifecycle management.

use crate::config::Config;
use crate::error::AppError;
use crate::handlers;
use crate::services::{
    init_metrics, Database, EmailSender, Notifier, PaymentStore, RentPaymentProcessor, SmtpMailer,
    StripeClient,
};
use axum::{routing::get, Router};
use secrecy::ExposeSecret;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn PaymentStore>,
    pub gateway: StripeClient,
    pub notifier: Notifier,
}

impl AppState {
    pub fn processor(&self) -> RentPaymentProcessor {
        RentPaymentProcessor::new(
            self.store.clone(),
            self.gateway.clone(),
            self.notifier.clone(),
            self.config.payments.clone(),
        )
    }
}

/// Build the service router for the given state.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/metrics", get(handlers::metrics_endpoint))
        .route(
            "/api/cron/process-rent-payments",
            get(handlers::process_rent_payments),
        )
        .route(
            "/api/cron/retry-failed-rent-payments",
            get(handlers::retry_failed_rent_payments),
        )
        .route(
            "/api/cron/preview-rent-payments",
            get(handlers::preview_rent_payments),
        )
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get("x-request-id")
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                )
            }),
        )
        .with_state(state)
}

/// Application container for managing server lifecycle.
pub struct Application {
    port: u16,
    listener: TcpListener,
    state: AppState,
}

impl Application {
    /// Build the application with the given configuration.
    pub async fn build(config: Config) -> Result<Self, AppError> {
        Self::build_internal(config, true).await
    }

    /// Build the application without running migrations.
    /// Use this in tests when migrations are already applied by the test harness.
    pub async fn build_without_migrations(config: Config) -> Result<Self, AppError> {
        Self::build_internal(config, false).await
    }

    async fn build_internal(config: Config, run_migrations: bool) -> Result<Self, AppError> {
        init_metrics();

        let db = Database::new(
            config.database.url.expose_secret(),
            config.database.max_connections,
            config.database.min_connections,
        )
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to connect to PostgreSQL");
            e
        })?;

        if run_migrations {
            db.run_migrations().await.map_err(|e| {
                tracing::error!(error = %e, "Failed to run migrations");
                e
            })?;
        }

        let gateway = StripeClient::new(config.stripe.clone());
        if gateway.is_configured() {
            tracing::info!("Stripe client initialized");
        } else {
            tracing::warn!("Stripe credentials not configured - charges will fail");
        }

        let mailer = SmtpMailer::new(config.smtp.clone())
            .map_err(|e| AppError::EmailError(e.to_string()))?;
        if !mailer.is_enabled() {
            tracing::warn!("SMTP disabled - notifications will be logged and dropped");
        }

        let notifier = Notifier::new(
            Arc::new(mailer),
            config.payments.operations_email.clone(),
            config.payments.public_base_url.clone(),
            config.payments.business_timezone,
        );

        let state = AppState {
            config: config.clone(),
            store: Arc::new(db),
            gateway,
            notifier,
        };

        let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!(error = %e, addr = %addr, "Failed to bind HTTP listener");
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        tracing::info!(port = port, "Rent payment service listener bound");

        Ok(Self {
            port,
            listener,
            state,
        })
    }

    /// Get the port the server is listening on.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Get the application state.
    pub fn state(&self) -> AppState {
        self.state.clone()
    }

    /// Run the application until stopped.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        let router = build_router(self.state);

        tracing::info!(
            service = "rent-payment-service",
            version = env!("CARGO_PKG_VERSION"),
            port = self.port,
            "Service ready to accept connections"
        );

        axum::serve(self.listener, router).await
    }
}
