//! Payment and allocation handlers.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use rust_decimal::Decimal;
use service_core::error::AppError;
use uuid::Uuid;

use crate::{
    dtos::{
        parse_allocation_status, AllocatePaymentRequest, AllocationListResponse,
        AllocationOutcomeResponse, CreatePaymentRequest, ListPaymentsQuery, ReconcileResponse,
        UpdatePaymentAmountRequest,
    },
    models::{AllocationRequest, CreatePayment, ListPaymentsFilter, Payment},
    startup::AppState,
};

pub async fn create_payment(
    State(state): State<AppState>,
    Json(payload): Json<CreatePaymentRequest>,
) -> Result<(StatusCode, Json<Payment>), AppError> {
    let payment = state
        .db
        .create_payment(&CreatePayment {
            customer_id: payload.customer_id,
            amount: payload.amount,
            payment_method: payload.payment_method,
            payment_reference: payload.payment_reference,
            payment_date: payload.payment_date,
            notes: payload.notes,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(payment)))
}

pub async fn get_payment(
    State(state): State<AppState>,
    Path(payment_id): Path<Uuid>,
) -> Result<Json<Payment>, AppError> {
    let payment = state
        .db
        .get_payment(payment_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Payment {} not found", payment_id)))?;

    Ok(Json(payment))
}

pub async fn list_payments(
    State(state): State<AppState>,
    Query(query): Query<ListPaymentsQuery>,
) -> Result<Json<Vec<Payment>>, AppError> {
    let allocation_status = query
        .allocation_status
        .as_deref()
        .map(parse_allocation_status)
        .transpose()?;

    let payments = state
        .db
        .list_payments(&ListPaymentsFilter {
            customer_id: query.customer_id,
            allocation_status,
            start_date: query.start_date,
            end_date: query.end_date,
            page_size: query.page_size.unwrap_or(50),
            page_token: query.page_token,
        })
        .await?;

    Ok(Json(payments))
}

/// Distribute some or all of a payment's unapplied credit across invoices
/// and/or the customer's opening balance.
pub async fn allocate_payment(
    State(state): State<AppState>,
    Path(payment_id): Path<Uuid>,
    Json(payload): Json<AllocatePaymentRequest>,
) -> Result<Json<AllocationOutcomeResponse>, AppError> {
    let requests = payload
        .allocations
        .into_iter()
        .map(|dto| dto.into_request())
        .collect::<Result<Vec<AllocationRequest>, AppError>>()?;

    let (payment, invoices) = state.db.allocate(payment_id, &requests).await?;

    Ok(Json(AllocationOutcomeResponse { payment, invoices }))
}

/// Current allocation rows for a payment, both kinds.
pub async fn list_allocations(
    State(state): State<AppState>,
    Path(payment_id): Path<Uuid>,
) -> Result<Json<AllocationListResponse>, AppError> {
    state
        .db
        .get_payment(payment_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Payment {} not found", payment_id)))?;

    let invoice_allocations = state.db.list_invoice_allocations(payment_id).await?;
    let opening_balance_allocations =
        state.db.list_opening_balance_allocations(payment_id).await?;

    Ok(Json(AllocationListResponse {
        invoice_allocations,
        opening_balance_allocations,
    }))
}

/// Undo every allocation of a payment, returning it to fully unapplied.
pub async fn reverse_allocations(
    State(state): State<AppState>,
    Path(payment_id): Path<Uuid>,
) -> Result<Json<Payment>, AppError> {
    let payment = state.db.reverse_allocations(payment_id).await?;
    Ok(Json(payment))
}

/// Change a payment's face amount. Allocated payments must supply a
/// replacement allocation breakdown.
pub async fn update_payment_amount(
    State(state): State<AppState>,
    Path(payment_id): Path<Uuid>,
    Json(payload): Json<UpdatePaymentAmountRequest>,
) -> Result<Json<AllocationOutcomeResponse>, AppError> {
    let requests = payload
        .allocations
        .map(|allocations| {
            allocations
                .into_iter()
                .map(|dto| dto.into_request())
                .collect::<Result<Vec<AllocationRequest>, AppError>>()
        })
        .transpose()?;

    let (payment, invoices) = state
        .db
        .update_payment_amount(payment_id, payload.amount, requests.as_deref())
        .await?;

    Ok(Json(AllocationOutcomeResponse { payment, invoices }))
}

/// Repair endpoint: bring the unapplied-payment tracker row in line with
/// the payment's counters. Idempotent.
pub async fn reconcile_payment(
    State(state): State<AppState>,
    Path(payment_id): Path<Uuid>,
) -> Result<Json<ReconcileResponse>, AppError> {
    let row = state.db.reconcile_unapplied_payment(payment_id).await?;

    Ok(Json(match row {
        Some(row) => ReconcileResponse {
            payment_id,
            tracked: true,
            amount_unapplied: row.amount_unapplied,
        },
        None => ReconcileResponse {
            payment_id,
            tracked: false,
            amount_unapplied: Decimal::ZERO,
        },
    }))
}
