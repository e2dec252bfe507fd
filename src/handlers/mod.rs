//! HTTP handlers: health, metrics, and the cron trigger routes.

use crate::error::AppError;
use crate::services::get_metrics;
use crate::startup::AppState;
use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use secrecy::{ExposeSecret, Secret};
use serde::Serialize;
use serde_json::json;
use subtle::ConstantTimeEq;

/// Health check endpoint for liveness probes.
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.health_check().await {
        Ok(_) => (
            StatusCode::OK,
            Json(json!({
                "status": "ok",
                "service": "rent-payment-service",
                "version": env!("CARGO_PKG_VERSION")
            })),
        ),
        Err(e) => {
            tracing::warn!(error = %e, "Health check failed - database unavailable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "unhealthy",
                    "service": "rent-payment-service",
                    "error": e.to_string()
                })),
            )
        }
    }
}

/// Readiness check endpoint.
pub async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.health_check().await {
        Ok(_) => StatusCode::OK,
        Err(e) => {
            tracing::warn!(error = %e, "Readiness check failed");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

/// Prometheus metrics endpoint.
pub async fn metrics_endpoint() -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        get_metrics(),
    )
}

/// Validate the cron shared secret in constant time.
pub fn authorize_cron(headers: &HeaderMap, secret: &Secret<String>) -> Result<(), AppError> {
    let provided = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("");
    let expected = format!("Bearer {}", secret.expose_secret());

    let provided_bytes = provided.as_bytes();
    let expected_bytes = expected.as_bytes();

    let matches = provided_bytes.len() == expected_bytes.len()
        && bool::from(provided_bytes.ct_eq(expected_bytes));

    if matches {
        Ok(())
    } else {
        tracing::warn!("unauthorized cron trigger attempt");
        Err(AppError::Unauthorized("Unauthorized".to_string()))
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ProcessRunResponse {
    success: bool,
    processed_payments: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    successful_payments: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    failed_payments: Option<usize>,
    message: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RetryRunResponse {
    success: bool,
    retried_payments: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    successful_payments: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    failed_payments: Option<usize>,
    message: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PreviewRunResponse {
    success: bool,
    preview_date: String,
    payments_count: usize,
    message: String,
}

fn internal_error() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({
            "success": false,
            "error": "Internal server error"
        })),
    )
        .into_response()
}

/// Charge all rent payments due today.
pub async fn process_rent_payments(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Response {
    if let Err(err) = authorize_cron(&headers, &state.config.cron.secret) {
        return err.into_response();
    }

    match state.processor().run_due(Utc::now()).await {
        Ok(summary) if summary.processed == 0 => Json(ProcessRunResponse {
            success: true,
            processed_payments: 0,
            successful_payments: None,
            failed_payments: None,
            message: "No payments due today".to_string(),
        })
        .into_response(),
        Ok(summary) => Json(ProcessRunResponse {
            success: true,
            processed_payments: summary.processed,
            successful_payments: Some(summary.succeeded),
            failed_payments: Some(summary.failed),
            message: format!(
                "Processed {} payments: {} successful, {} failed",
                summary.processed, summary.succeeded, summary.failed
            ),
        })
        .into_response(),
        Err(err) => {
            tracing::error!(error = %err, "due payment run failed");
            internal_error()
        }
    }
}

/// Retry past-due payments whose last attempt failed.
pub async fn retry_failed_rent_payments(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Response {
    if let Err(err) = authorize_cron(&headers, &state.config.cron.secret) {
        return err.into_response();
    }

    match state.processor().run_retries(Utc::now()).await {
        Ok(summary) if summary.processed == 0 => Json(RetryRunResponse {
            success: true,
            retried_payments: 0,
            successful_payments: None,
            failed_payments: None,
            message: "No failed payments to retry".to_string(),
        })
        .into_response(),
        Ok(summary) => Json(RetryRunResponse {
            success: true,
            retried_payments: summary.processed,
            successful_payments: Some(summary.succeeded),
            failed_payments: Some(summary.failed),
            message: format!(
                "Retried {} payments: {} successful, {} failed",
                summary.processed, summary.succeeded, summary.failed
            ),
        })
        .into_response(),
        Err(err) => {
            tracing::error!(error = %err, "retry run failed");
            internal_error()
        }
    }
}

/// Email a report of tomorrow's batch to the operations address.
pub async fn preview_rent_payments(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Response {
    if let Err(err) = authorize_cron(&headers, &state.config.cron.secret) {
        return err.into_response();
    }

    match state.processor().run_preview(Utc::now()).await {
        Ok(summary) => Json(PreviewRunResponse {
            success: true,
            preview_date: summary.preview_date.to_rfc3339(),
            payments_count: summary.payments_count,
            message: format!(
                "Preview report sent for {} payments due tomorrow",
                summary.payments_count
            ),
        })
        .into_response(),
        Err(err) => {
            tracing::error!(error = %err, "preview run failed");
            internal_error()
        }
    }
}
