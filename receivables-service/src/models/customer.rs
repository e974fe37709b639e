//! Customer model for receivables-service.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Customer status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CustomerStatus {
    Active,
    Inactive,
}

impl CustomerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CustomerStatus::Active => "active",
            CustomerStatus::Inactive => "inactive",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "inactive" => CustomerStatus::Inactive,
            _ => CustomerStatus::Active,
        }
    }
}

/// Customer record.
///
/// `opening_balance` is the debt figure recorded once at onboarding. It is
/// never updated; the amount still owed against it is derived from
/// `opening_balance_payments` rows (see [`crate::services::Database::effective_opening_balance`]).
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Customer {
    pub customer_id: Uuid,
    pub name: String,
    pub route: Option<String>,
    pub status: String,
    pub opening_balance: Decimal,
    pub created_utc: DateTime<Utc>,
}

impl Customer {
    /// The historical debt the customer started with. Immutable.
    ///
    /// Outstanding calculations must not use this directly; they go through
    /// the effective figure that accounts for opening-balance allocations.
    pub fn original_opening_balance(&self) -> Decimal {
        self.opening_balance
    }
}

/// Input for onboarding a customer.
#[derive(Debug, Clone)]
pub struct CreateCustomer {
    pub name: String,
    pub route: Option<String>,
    pub opening_balance: Decimal,
}

/// Point-in-time view of everything a customer owes.
///
/// `total_outstanding = effective_opening_balance + invoice_outstanding`.
/// `unapplied_credit` is reported alongside but never netted against the
/// total; showing the credit is the caller's job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutstandingSummary {
    pub customer_id: Uuid,
    pub original_opening_balance: Decimal,
    pub effective_opening_balance: Decimal,
    pub invoice_outstanding: Decimal,
    pub total_outstanding: Decimal,
    pub unapplied_credit: Decimal,
}
