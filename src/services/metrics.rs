//! Prometheus metrics for payment runs.

use once_cell::sync::Lazy;
use prometheus::{
    histogram_opts, opts, register_histogram_vec, register_int_counter_vec, Encoder, HistogramVec,
    IntCounterVec, TextEncoder,
};
use std::sync::OnceLock;

/// Database query duration histogram
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        histogram_opts!("rent_db_query_duration_seconds", "Database query duration"),
        &["operation"]
    )
    .expect("Failed to register DB_QUERY_DURATION")
});

/// Gateway request duration histogram
pub static GATEWAY_REQUEST_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        histogram_opts!(
            "rent_gateway_request_duration_seconds",
            "Payment gateway request duration"
        ),
        &["operation"]
    )
    .expect("Failed to register GATEWAY_REQUEST_DURATION")
});

/// Cron run counter
pub static PAYMENT_RUNS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Per-payment outcome counter
pub static PAYMENTS_PROCESSED_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Gross amount submitted to the gateway, by outcome
pub static CHARGED_AMOUNT_TOTAL: OnceLock<prometheus::CounterVec> = OnceLock::new();

/// Notification email counter
pub static NOTIFICATIONS_SENT_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Initialize all metrics. Call once at startup.
pub fn init_metrics() {
    PAYMENT_RUNS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!("rent_payment_runs_total", "Total cron runs by kind and status"),
            &["run", "status"]
        )
        .expect("Failed to register PAYMENT_RUNS_TOTAL")
    });

    PAYMENTS_PROCESSED_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "rent_payments_processed_total",
                "Total payments processed by run kind and outcome"
            ),
            &["run", "outcome"]
        )
        .expect("Failed to register PAYMENTS_PROCESSED_TOTAL")
    });

    CHARGED_AMOUNT_TOTAL.get_or_init(|| {
        prometheus::register_counter_vec!(
            prometheus::opts!(
                "rent_charged_amount_total",
                "Gross amount submitted to the gateway in minor units, by currency and outcome"
            ),
            &["currency", "outcome"]
        )
        .expect("Failed to register CHARGED_AMOUNT_TOTAL")
    });

    NOTIFICATIONS_SENT_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "rent_notifications_sent_total",
                "Notification emails by kind and result"
            ),
            &["kind", "result"]
        )
        .expect("Failed to register NOTIFICATIONS_SENT_TOTAL")
    });

    // Force initialization of lazy statics
    let _ = &*DB_QUERY_DURATION;
    let _ = &*GATEWAY_REQUEST_DURATION;
}

/// Get metrics in Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .expect("Failed to encode metrics");
    String::from_utf8(buffer).expect("Failed to convert metrics to string")
}

/// Record a completed cron run.
pub fn record_run(run: &str, status: &str) {
    if let Some(counter) = PAYMENT_RUNS_TOTAL.get() {
        counter.with_label_values(&[run, status]).inc();
    }
}

/// Record a per-payment outcome.
pub fn record_payment_outcome(run: &str, outcome: &str) {
    if let Some(counter) = PAYMENTS_PROCESSED_TOTAL.get() {
        counter.with_label_values(&[run, outcome]).inc();
    }
}

/// Record a gross amount submitted to the gateway.
pub fn record_charged_amount(currency: &str, outcome: &str, amount_minor: i64) {
    if let Some(counter) = CHARGED_AMOUNT_TOTAL.get() {
        counter
            .with_label_values(&[currency, outcome])
            .inc_by(amount_minor.unsigned_abs() as f64);
    }
}

/// Record a notification send attempt.
pub fn record_notification(kind: &str, result: &str) {
    if let Some(counter) = NOTIFICATIONS_SENT_TOTAL.get() {
        counter.with_label_values(&[kind, result]).inc();
    }
}
