//! Allocation rows and allocation-plan validation.
//!
//! Allocation rows are the authoritative record of how payment value was
//! distributed; every aggregate on invoices and payments is a sum over them.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use service_core::error::AppError;
use sqlx::FromRow;
use thiserror::Error;
use uuid::Uuid;

/// One (invoice, payment) allocation row. Append-only except during
/// reversal, when all rows for a payment are deleted wholesale.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct InvoicePaymentAllocation {
    pub invoice_id: Uuid,
    pub payment_id: Uuid,
    pub amount_allocated: Decimal,
    pub created_utc: DateTime<Utc>,
}

/// Allocation of payment value against a customer's opening balance.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct OpeningBalancePaymentAllocation {
    pub customer_id: Uuid,
    pub payment_id: Uuid,
    pub amount: Decimal,
    pub created_utc: DateTime<Utc>,
}

/// Materialized leftover-credit row; exists iff the payment's
/// `amount_unapplied > 0`.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct UnappliedPayment {
    pub payment_id: Uuid,
    pub customer_id: Uuid,
    pub amount_unapplied: Decimal,
    pub reason: String,
    pub updated_utc: DateTime<Utc>,
}

/// Debt a single allocation is aimed at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocationTarget {
    Invoice(Uuid),
    OpeningBalance,
}

/// One requested split of a payment's value.
#[derive(Debug, Clone)]
pub struct AllocationRequest {
    pub target: AllocationTarget,
    pub amount: Decimal,
}

/// Failures of the allocation, reversal and amount-edit operations.
///
/// All of these are detected before any row is written; a failing operation
/// rolls its transaction back in full.
#[derive(Debug, Error)]
pub enum AllocationError {
    #[error("allocation total {requested} exceeds the payment's unapplied remainder {available}")]
    ExceedsPayment {
        requested: Decimal,
        available: Decimal,
    },

    #[error(
        "opening-balance allocations would total {requested}, exceeding the \
         customer's opening balance of {opening_balance}"
    )]
    ExceedsOpeningBalance {
        requested: Decimal,
        opening_balance: Decimal,
    },

    #[error("allocation target not found: {0}")]
    TargetNotFound(String),

    #[error(
        "payment has allocations applied; a new allocation breakdown must be \
         supplied to change its amount"
    )]
    ReallocationRequired,

    #[error("invalid allocation amount: {0}")]
    InvalidAmount(String),
}

impl From<AllocationError> for AppError {
    fn from(err: AllocationError) -> Self {
        match err {
            AllocationError::TargetNotFound(_) => AppError::NotFound(anyhow::anyhow!("{}", err)),
            AllocationError::InvalidAmount(_) => AppError::BadRequest(anyhow::anyhow!("{}", err)),
            AllocationError::ReallocationRequired => {
                AppError::Conflict(anyhow::anyhow!("{}", err))
            }
            AllocationError::ExceedsPayment { .. }
            | AllocationError::ExceedsOpeningBalance { .. } => {
                AppError::Unprocessable(anyhow::anyhow!("{}", err))
            }
        }
    }
}

/// Validate a requested allocation plan against the payment's remaining
/// unapplied amount. Returns the plan total.
///
/// Checks, in order: the plan is non-empty, every amount is strictly
/// positive, no invoice is targeted twice, and the total does not exceed
/// `available`. Purely arithmetic so callers can run it before touching the
/// database.
pub fn validate_plan(
    requests: &[AllocationRequest],
    available: Decimal,
) -> Result<Decimal, AllocationError> {
    if requests.is_empty() {
        return Err(AllocationError::InvalidAmount(
            "at least one allocation is required".to_string(),
        ));
    }

    let mut total = Decimal::ZERO;
    let mut seen_invoices: Vec<Uuid> = Vec::with_capacity(requests.len());
    let mut seen_opening_balance = false;

    for request in requests {
        if request.amount <= Decimal::ZERO {
            return Err(AllocationError::InvalidAmount(format!(
                "allocation amounts must be positive, got {}",
                request.amount
            )));
        }
        match request.target {
            AllocationTarget::Invoice(invoice_id) => {
                if seen_invoices.contains(&invoice_id) {
                    return Err(AllocationError::InvalidAmount(format!(
                        "invoice {} is targeted more than once",
                        invoice_id
                    )));
                }
                seen_invoices.push(invoice_id);
            }
            AllocationTarget::OpeningBalance => {
                if seen_opening_balance {
                    return Err(AllocationError::InvalidAmount(
                        "the opening balance is targeted more than once".to_string(),
                    ));
                }
                seen_opening_balance = true;
            }
        }
        total += request.amount;
    }

    if total > available {
        return Err(AllocationError::ExceedsPayment {
            requested: total,
            available,
        });
    }

    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invoice_alloc(amount: i64) -> AllocationRequest {
        AllocationRequest {
            target: AllocationTarget::Invoice(Uuid::new_v4()),
            amount: Decimal::from(amount),
        }
    }

    #[test]
    fn plan_within_remainder_passes() {
        let plan = vec![invoice_alloc(600), invoice_alloc(400)];
        let total = validate_plan(&plan, Decimal::from(1000)).unwrap();
        assert_eq!(total, Decimal::from(1000));
    }

    #[test]
    fn plan_exceeding_remainder_is_rejected() {
        let plan = vec![invoice_alloc(600), invoice_alloc(300)];
        let err = validate_plan(&plan, Decimal::from(800)).unwrap_err();
        match err {
            AllocationError::ExceedsPayment {
                requested,
                available,
            } => {
                assert_eq!(requested, Decimal::from(900));
                assert_eq!(available, Decimal::from(800));
            }
            other => panic!("expected ExceedsPayment, got {other:?}"),
        }
    }

    #[test]
    fn plan_exceeding_partially_applied_remainder_is_rejected() {
        // 1000 face value with 400 already applied leaves 600 available.
        let plan = vec![invoice_alloc(300), invoice_alloc(400)];
        let err = validate_plan(&plan, Decimal::from(600)).unwrap_err();
        assert!(matches!(err, AllocationError::ExceedsPayment { .. }));
    }

    #[test]
    fn empty_plan_is_rejected() {
        let err = validate_plan(&[], Decimal::from(100)).unwrap_err();
        assert!(matches!(err, AllocationError::InvalidAmount(_)));
    }

    #[test]
    fn negative_amount_is_rejected() {
        let plan = vec![AllocationRequest {
            target: AllocationTarget::OpeningBalance,
            amount: Decimal::from(-5),
        }];
        let err = validate_plan(&plan, Decimal::from(100)).unwrap_err();
        assert!(matches!(err, AllocationError::InvalidAmount(_)));
    }

    #[test]
    fn zero_amount_is_rejected() {
        let plan = vec![AllocationRequest {
            target: AllocationTarget::OpeningBalance,
            amount: Decimal::ZERO,
        }];
        let err = validate_plan(&plan, Decimal::from(100)).unwrap_err();
        assert!(matches!(err, AllocationError::InvalidAmount(_)));
    }

    #[test]
    fn duplicate_invoice_target_is_rejected() {
        let invoice_id = Uuid::new_v4();
        let plan = vec![
            AllocationRequest {
                target: AllocationTarget::Invoice(invoice_id),
                amount: Decimal::from(10),
            },
            AllocationRequest {
                target: AllocationTarget::Invoice(invoice_id),
                amount: Decimal::from(20),
            },
        ];
        let err = validate_plan(&plan, Decimal::from(100)).unwrap_err();
        assert!(matches!(err, AllocationError::InvalidAmount(_)));
    }

    #[test]
    fn duplicate_opening_balance_target_is_rejected() {
        let plan = vec![
            AllocationRequest {
                target: AllocationTarget::OpeningBalance,
                amount: Decimal::from(10),
            },
            AllocationRequest {
                target: AllocationTarget::OpeningBalance,
                amount: Decimal::from(20),
            },
        ];
        let err = validate_plan(&plan, Decimal::from(100)).unwrap_err();
        assert!(matches!(err, AllocationError::InvalidAmount(_)));
    }

    #[test]
    fn exact_remainder_is_allowed() {
        let plan = vec![invoice_alloc(100)];
        assert!(validate_plan(&plan, Decimal::from(100)).is_ok());
    }
}
