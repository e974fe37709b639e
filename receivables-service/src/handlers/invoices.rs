//! Invoice handlers.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;

use crate::{
    dtos::{parse_invoice_status, CreateInvoiceRequest, InvoiceDeletedResponse, ListInvoicesQuery},
    models::{CreateInvoice, Invoice, ListInvoicesFilter},
    startup::AppState,
};

pub async fn create_invoice(
    State(state): State<AppState>,
    Json(payload): Json<CreateInvoiceRequest>,
) -> Result<(StatusCode, Json<Invoice>), AppError> {
    let invoice = state
        .db
        .create_invoice(&CreateInvoice {
            customer_id: payload.customer_id,
            invoice_date: payload.invoice_date,
            due_date: payload.due_date,
            total_amount: payload.total_amount,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(invoice)))
}

pub async fn get_invoice(
    State(state): State<AppState>,
    Path(invoice_id): Path<Uuid>,
) -> Result<Json<Invoice>, AppError> {
    let invoice = state
        .db
        .get_invoice(invoice_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Invoice {} not found", invoice_id)))?;

    Ok(Json(invoice))
}

pub async fn list_invoices(
    State(state): State<AppState>,
    Query(query): Query<ListInvoicesQuery>,
) -> Result<Json<Vec<Invoice>>, AppError> {
    let status = query
        .status
        .as_deref()
        .map(parse_invoice_status)
        .transpose()?;

    let invoices = state
        .db
        .list_invoices(&ListInvoicesFilter {
            customer_id: query.customer_id,
            status,
            start_date: query.start_date,
            end_date: query.end_date,
            page_size: query.page_size.unwrap_or(50),
            page_token: query.page_token,
        })
        .await?;

    Ok(Json(invoices))
}

/// Delete an invoice. Payments allocated to it are reversed first and
/// returned so the caller can re-allocate their credit.
pub async fn delete_invoice(
    State(state): State<AppState>,
    Path(invoice_id): Path<Uuid>,
) -> Result<Json<InvoiceDeletedResponse>, AppError> {
    let reversed_payments = state.db.delete_invoice(invoice_id).await?;

    Ok(Json(InvoiceDeletedResponse {
        invoice_id,
        reversed_payments,
    }))
}
