//! Customer and outstanding-balance handlers.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;

use crate::{
    dtos::CreateCustomerRequest,
    models::{CreateCustomer, Customer, OutstandingSummary, UnappliedPayment},
    startup::AppState,
};

pub async fn create_customer(
    State(state): State<AppState>,
    Json(payload): Json<CreateCustomerRequest>,
) -> Result<(StatusCode, Json<Customer>), AppError> {
    let customer = state
        .db
        .create_customer(&CreateCustomer {
            name: payload.name,
            route: payload.route,
            opening_balance: payload.opening_balance,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(customer)))
}

pub async fn get_customer(
    State(state): State<AppState>,
    Path(customer_id): Path<Uuid>,
) -> Result<Json<Customer>, AppError> {
    let customer = state
        .db
        .get_customer(customer_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Customer {} not found", customer_id)))?;

    Ok(Json(customer))
}

/// Total amount the customer owes right now, broken down by source.
pub async fn get_outstanding(
    State(state): State<AppState>,
    Path(customer_id): Path<Uuid>,
) -> Result<Json<OutstandingSummary>, AppError> {
    let summary = state.db.total_outstanding(customer_id).await?;
    Ok(Json(summary))
}

/// Payments of this customer with credit still available to allocate.
pub async fn list_unapplied_payments(
    State(state): State<AppState>,
    Path(customer_id): Path<Uuid>,
) -> Result<Json<Vec<UnappliedPayment>>, AppError> {
    state
        .db
        .get_customer(customer_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Customer {} not found", customer_id)))?;

    let rows = state.db.list_unapplied_payments(customer_id).await?;
    Ok(Json(rows))
}
