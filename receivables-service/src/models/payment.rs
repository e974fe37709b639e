//! Payment model for receivables-service.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// How much of a payment's face value has been allocated to debts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationStatus {
    Unapplied,
    PartiallyApplied,
    FullyApplied,
}

impl AllocationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AllocationStatus::Unapplied => "unapplied",
            AllocationStatus::PartiallyApplied => "partially_applied",
            AllocationStatus::FullyApplied => "fully_applied",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "partially_applied" => AllocationStatus::PartiallyApplied,
            "fully_applied" => AllocationStatus::FullyApplied,
            _ => AllocationStatus::Unapplied,
        }
    }

    /// Status implied by the applied/unapplied split.
    pub fn from_amounts(amount_applied: Decimal, amount_unapplied: Decimal) -> Self {
        if amount_applied == Decimal::ZERO {
            AllocationStatus::Unapplied
        } else if amount_unapplied == Decimal::ZERO {
            AllocationStatus::FullyApplied
        } else {
            AllocationStatus::PartiallyApplied
        }
    }
}

impl std::fmt::Display for AllocationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Payment row.
///
/// `amount` is the immutable face value (mutable only through the reversal
/// flow's amount-edit path). `amount_applied + amount_unapplied == amount`
/// holds after every operation; both counters are rewritten from the
/// authoritative allocation rows, never incremented blindly.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Payment {
    pub payment_id: Uuid,
    pub customer_id: Uuid,
    pub amount: Decimal,
    pub amount_applied: Decimal,
    pub amount_unapplied: Decimal,
    pub allocation_status: String,
    pub payment_method: Option<String>,
    pub payment_reference: Option<String>,
    pub payment_date: NaiveDate,
    pub notes: Option<String>,
    pub created_utc: DateTime<Utc>,
}

impl Payment {
    pub fn parsed_allocation_status(&self) -> AllocationStatus {
        AllocationStatus::from_string(&self.allocation_status)
    }

    /// Portion of the face value still available for allocation.
    pub fn remaining(&self) -> Decimal {
        self.amount - self.amount_applied
    }

    pub fn has_allocations(&self) -> bool {
        self.amount_applied > Decimal::ZERO
    }
}

/// Input for recording a payment.
#[derive(Debug, Clone)]
pub struct CreatePayment {
    pub customer_id: Uuid,
    pub amount: Decimal,
    pub payment_method: Option<String>,
    pub payment_reference: Option<String>,
    pub payment_date: NaiveDate,
    pub notes: Option<String>,
}

/// Filter parameters for listing payments.
#[derive(Debug, Clone, Default)]
pub struct ListPaymentsFilter {
    pub customer_id: Option<Uuid>,
    pub allocation_status: Option<AllocationStatus>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub page_size: i32,
    pub page_token: Option<Uuid>,
}
