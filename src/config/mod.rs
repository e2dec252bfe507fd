use crate::services::fees::FeeSchedule;
use crate::services::stripe::IdempotencyStrategy;
use anyhow::{anyhow, Context, Result};
use chrono_tz::Tz;
use dotenvy::dotenv;
use secrecy::Secret;
use std::env;

#[derive(Clone, Debug)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub cron: CronConfig,
    pub stripe: StripeConfig,
    pub smtp: SmtpConfig,
    pub payments: PaymentConfig,
    pub service_name: String,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: Secret<String>,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Clone, Debug)]
pub struct CronConfig {
    /// Shared secret expected in the `Authorization: Bearer <secret>` header
    /// on the cron trigger routes.
    pub secret: Secret<String>,
}

#[derive(Clone, Debug)]
pub struct StripeConfig {
    pub secret_key: Secret<String>,
    pub api_base_url: String,
}

#[derive(Clone, Debug)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: Secret<String>,
    pub from_email: String,
    pub from_name: String,
    pub enabled: bool,
}

#[derive(Clone, Debug)]
pub struct PaymentConfig {
    /// Calendar days are computed in this timezone, then widened to a
    /// UTC midnight-to-midnight selection window.
    pub business_timezone: Tz,
    pub currency: String,
    pub fees: FeeSchedule,
    /// Ceiling for the due run: payments at or above this retry count are
    /// never selected again automatically.
    pub max_retries: i32,
    /// Ceiling for the retry run, which is stricter than the due run.
    pub max_retry_attempts: i32,
    pub idempotency: IdempotencyStrategy,
    /// Recipient of failure alerts and the daily preview report.
    pub operations_email: String,
    /// Base URL used to build renter-facing action links in emails.
    pub public_base_url: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();

        let host = env::var("RENT_SERVICE_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = env::var("RENT_SERVICE_PORT")
            .unwrap_or_else(|_| "3007".to_string())
            .parse()
            .context("RENT_SERVICE_PORT must be a valid port")?;

        let database_url = require("DATABASE_URL")?;
        let cron_secret = require("CRON_SECRET")?;
        let stripe_key = require("STRIPE_SECRET_KEY")?;

        let timezone: Tz = env::var("BUSINESS_TIMEZONE")
            .unwrap_or_else(|_| "America/Los_Angeles".to_string())
            .parse()
            .map_err(|e| anyhow!("BUSINESS_TIMEZONE is not a valid IANA timezone: {}", e))?;

        let idempotency = env::var("IDEMPOTENCY_KEY_STRATEGY")
            .unwrap_or_else(|_| "stable".to_string())
            .parse()?;

        Ok(Self {
            server: ServerConfig { host, port },
            database: DatabaseConfig {
                url: Secret::new(database_url),
                max_connections: parse_or("DATABASE_MAX_CONNECTIONS", 10)?,
                min_connections: parse_or("DATABASE_MIN_CONNECTIONS", 1)?,
            },
            cron: CronConfig {
                secret: Secret::new(cron_secret),
            },
            stripe: StripeConfig {
                secret_key: Secret::new(stripe_key),
                api_base_url: env::var("STRIPE_API_BASE_URL")
                    .unwrap_or_else(|_| "https://api.stripe.com/v1".to_string()),
            },
            smtp: SmtpConfig {
                host: env::var("SMTP_HOST").unwrap_or_else(|_| "smtp.gmail.com".to_string()),
                port: parse_or("SMTP_PORT", 587)?,
                user: env::var("SMTP_USER").unwrap_or_default(),
                password: Secret::new(env::var("SMTP_PASSWORD").unwrap_or_default()),
                from_email: env::var("SMTP_FROM_EMAIL")
                    .unwrap_or_else(|_| "noreply@example.com".to_string()),
                from_name: env::var("SMTP_FROM_NAME")
                    .unwrap_or_else(|_| "Rent Payments".to_string()),
                enabled: parse_or("SMTP_ENABLED", false)?,
            },
            payments: PaymentConfig {
                business_timezone: timezone,
                currency: env::var("PAYMENT_CURRENCY").unwrap_or_else(|_| "usd".to_string()),
                fees: FeeSchedule {
                    short_term_rate: parse_or("FEE_SHORT_TERM_RATE", 0.03)?,
                    long_term_rate: parse_or("FEE_LONG_TERM_RATE", 0.015)?,
                    threshold_months: parse_or("FEE_THRESHOLD_MONTHS", 6)?,
                },
                max_retries: parse_or("MAX_PAYMENT_RETRIES", 3)?,
                max_retry_attempts: parse_or("MAX_RETRY_ATTEMPTS", 2)?,
                idempotency,
                operations_email: env::var("OPERATIONS_ALERT_EMAIL")
                    .unwrap_or_else(|_| "ops@example.com".to_string()),
                public_base_url: env::var("PUBLIC_BASE_URL")
                    .unwrap_or_else(|_| "http://localhost:3000".to_string()),
            },
            service_name: "rent-payment-service".to_string(),
        })
    }
}

fn require(key: &str) -> Result<String> {
    env::var(key).map_err(|_| anyhow!("{} must be set", key))
}

fn parse_or<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .with_context(|| format!("{} has an invalid value", key)),
        Err(_) => Ok(default),
    }
}
