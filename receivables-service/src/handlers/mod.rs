//! HTTP handlers for receivables-service.

pub mod customers;
pub mod invoices;
pub mod payments;

use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::json;
use service_core::middleware::metrics::gather_metrics;

use crate::startup::AppState;

pub async fn health_check() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "status": "ok",
            "service": "receivables-service",
            "version": env!("CARGO_PKG_VERSION")
        })),
    )
}

/// Readiness probe; checks the database connection.
pub async fn readiness_check(
    axum::extract::State(state): axum::extract::State<AppState>,
) -> impl IntoResponse {
    match state.db.health_check().await {
        Ok(()) => (StatusCode::OK, Json(json!({ "status": "ready" }))),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "not ready", "details": e.to_string() })),
        ),
    }
}

pub async fn metrics_endpoint() -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        gather_metrics(),
    )
}
