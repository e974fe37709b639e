use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use service_core::error::AppError;
use uuid::Uuid;

use crate::models::{
    AllocationRequest, AllocationStatus, AllocationTarget, Invoice, InvoicePaymentAllocation,
    InvoiceStatus, OpeningBalancePaymentAllocation, Payment,
};

#[derive(Deserialize)]
pub struct CreateCustomerRequest {
    pub name: String,
    pub route: Option<String>,
    #[serde(default)]
    pub opening_balance: Decimal,
}

#[derive(Deserialize)]
pub struct CreateInvoiceRequest {
    pub customer_id: Uuid,
    pub invoice_date: NaiveDate,
    pub due_date: Option<NaiveDate>,
    pub total_amount: Decimal,
}

#[derive(Deserialize)]
pub struct CreatePaymentRequest {
    pub customer_id: Uuid,
    pub amount: Decimal,
    pub payment_method: Option<String>,
    pub payment_reference: Option<String>,
    pub payment_date: NaiveDate,
    pub notes: Option<String>,
}

/// One line of an allocation plan. `target_type` is either `"invoice"`
/// (with `invoice_id` set) or `"opening_balance"`.
#[derive(Deserialize)]
pub struct AllocationRequestDto {
    pub target_type: String,
    pub invoice_id: Option<Uuid>,
    pub amount: Decimal,
}

impl AllocationRequestDto {
    pub fn into_request(self) -> Result<AllocationRequest, AppError> {
        let target = match self.target_type.as_str() {
            "invoice" => {
                let invoice_id = self.invoice_id.ok_or_else(|| {
                    AppError::BadRequest(anyhow::anyhow!(
                        "invoice_id is required when target_type is 'invoice'"
                    ))
                })?;
                AllocationTarget::Invoice(invoice_id)
            }
            "opening_balance" => AllocationTarget::OpeningBalance,
            other => {
                return Err(AppError::BadRequest(anyhow::anyhow!(
                    "Unknown target_type '{}', expected 'invoice' or 'opening_balance'",
                    other
                )))
            }
        };
        Ok(AllocationRequest {
            target,
            amount: self.amount,
        })
    }
}

#[derive(Deserialize)]
pub struct AllocatePaymentRequest {
    pub allocations: Vec<AllocationRequestDto>,
}

#[derive(Deserialize)]
pub struct UpdatePaymentAmountRequest {
    pub amount: Decimal,
    pub allocations: Option<Vec<AllocationRequestDto>>,
}

#[derive(Deserialize, Default)]
pub struct ListInvoicesQuery {
    pub customer_id: Option<Uuid>,
    pub status: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub page_size: Option<i32>,
    pub page_token: Option<Uuid>,
}

#[derive(Deserialize, Default)]
pub struct ListPaymentsQuery {
    pub customer_id: Option<Uuid>,
    pub allocation_status: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub page_size: Option<i32>,
    pub page_token: Option<Uuid>,
}

#[derive(Serialize)]
pub struct AllocationOutcomeResponse {
    pub payment: Payment,
    pub invoices: Vec<Invoice>,
}

#[derive(Serialize)]
pub struct AllocationListResponse {
    pub invoice_allocations: Vec<InvoicePaymentAllocation>,
    pub opening_balance_allocations: Vec<OpeningBalancePaymentAllocation>,
}

#[derive(Serialize)]
pub struct InvoiceDeletedResponse {
    pub invoice_id: Uuid,
    pub reversed_payments: Vec<Payment>,
}

#[derive(Serialize)]
pub struct ReconcileResponse {
    pub payment_id: Uuid,
    pub tracked: bool,
    pub amount_unapplied: Decimal,
}

pub fn parse_invoice_status(s: &str) -> Result<InvoiceStatus, AppError> {
    match s {
        "pending" | "sent" | "partially_paid" | "paid" | "overdue" => {
            Ok(InvoiceStatus::from_string(s))
        }
        other => Err(AppError::BadRequest(anyhow::anyhow!(
            "Unknown invoice status '{}'",
            other
        ))),
    }
}

pub fn parse_allocation_status(s: &str) -> Result<AllocationStatus, AppError> {
    match s {
        "unapplied" | "partially_applied" | "fully_applied" => Ok(AllocationStatus::from_string(s)),
        other => Err(AppError::BadRequest(anyhow::anyhow!(
            "Unknown allocation status '{}'",
            other
        ))),
    }
}
