//! Invoice model for receivables-service.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Invoice status.
///
/// `Pending`, `Sent` and `Overdue` are lifecycle states owned by invoice
/// generation and due-date logic; the allocation engine only moves invoices
/// into and out of `PartiallyPaid`/`Paid`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Pending,
    PartiallyPaid,
    Overdue,
    Sent,
    Paid,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Pending => "pending",
            InvoiceStatus::PartiallyPaid => "partially_paid",
            InvoiceStatus::Overdue => "overdue",
            InvoiceStatus::Sent => "sent",
            InvoiceStatus::Paid => "paid",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "partially_paid" => InvoiceStatus::PartiallyPaid,
            "overdue" => InvoiceStatus::Overdue,
            "sent" => InvoiceStatus::Sent,
            "paid" => InvoiceStatus::Paid,
            _ => InvoiceStatus::Pending,
        }
    }

    /// Recompute the status after allocation rows for the invoice changed.
    ///
    /// Fully settled invoices become `Paid` and partially settled ones
    /// `PartiallyPaid`. When every allocation has been reversed the invoice
    /// falls back to its due-date state: `Overdue` once past due, otherwise
    /// the stored pre-payment status (`Pending`/`Sent`). A stored
    /// paid-family status with no surviving allocations degrades to
    /// `Pending` rather than lying about settlement.
    pub fn recompute(
        stored: InvoiceStatus,
        amount_paid: Decimal,
        amount_outstanding: Decimal,
        due_date: Option<NaiveDate>,
        today: NaiveDate,
    ) -> InvoiceStatus {
        if amount_outstanding == Decimal::ZERO {
            return InvoiceStatus::Paid;
        }
        if amount_paid > Decimal::ZERO {
            return InvoiceStatus::PartiallyPaid;
        }
        if let Some(due) = due_date {
            if due < today {
                return InvoiceStatus::Overdue;
            }
        }
        match stored {
            InvoiceStatus::Pending | InvoiceStatus::Sent | InvoiceStatus::Overdue => stored,
            InvoiceStatus::PartiallyPaid | InvoiceStatus::Paid => InvoiceStatus::Pending,
        }
    }
}

impl std::fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Invoice metadata row.
///
/// `amount_paid` and `amount_outstanding` are caches of a sum over
/// `invoice_payments` rows; they are only ever rewritten from that sum,
/// never incremented in place.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Invoice {
    pub invoice_id: Uuid,
    pub customer_id: Uuid,
    pub invoice_date: NaiveDate,
    pub due_date: Option<NaiveDate>,
    pub total_amount: Decimal,
    pub amount_paid: Decimal,
    pub amount_outstanding: Decimal,
    pub invoice_status: String,
    pub created_utc: DateTime<Utc>,
}

impl Invoice {
    pub fn parsed_status(&self) -> InvoiceStatus {
        InvoiceStatus::from_string(&self.invoice_status)
    }

    pub fn is_settled(&self) -> bool {
        self.amount_outstanding == Decimal::ZERO
    }
}

/// Input for creating an invoice.
#[derive(Debug, Clone)]
pub struct CreateInvoice {
    pub customer_id: Uuid,
    pub invoice_date: NaiveDate,
    pub due_date: Option<NaiveDate>,
    pub total_amount: Decimal,
}

/// Filter parameters for listing invoices.
#[derive(Debug, Clone, Default)]
pub struct ListInvoicesFilter {
    pub customer_id: Option<Uuid>,
    pub status: Option<InvoiceStatus>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub page_size: i32,
    pub page_token: Option<Uuid>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(n: i64) -> Decimal {
        Decimal::from(n)
    }

    fn date(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    #[test]
    fn fully_settled_invoice_is_paid() {
        let status = InvoiceStatus::recompute(
            InvoiceStatus::Sent,
            d(500),
            d(0),
            Some(date("2026-09-15")),
            date("2026-08-30"),
        );
        assert_eq!(status, InvoiceStatus::Paid);
    }

    #[test]
    fn partial_settlement_wins_over_due_date() {
        let status = InvoiceStatus::recompute(
            InvoiceStatus::Overdue,
            d(100),
            d(400),
            Some(date("2026-01-01")),
            date("2026-08-30"),
        );
        assert_eq!(status, InvoiceStatus::PartiallyPaid);
    }

    #[test]
    fn reversal_to_zero_restores_overdue_when_past_due() {
        let status = InvoiceStatus::recompute(
            InvoiceStatus::PartiallyPaid,
            d(0),
            d(500),
            Some(date("2026-01-01")),
            date("2026-08-30"),
        );
        assert_eq!(status, InvoiceStatus::Overdue);
    }

    #[test]
    fn reversal_to_zero_keeps_sent_when_not_due() {
        let status = InvoiceStatus::recompute(
            InvoiceStatus::Sent,
            d(0),
            d(500),
            Some(date("2026-12-31")),
            date("2026-08-30"),
        );
        assert_eq!(status, InvoiceStatus::Sent);
    }

    #[test]
    fn stale_paid_status_degrades_to_pending() {
        let status = InvoiceStatus::recompute(
            InvoiceStatus::Paid,
            d(0),
            d(500),
            None,
            date("2026-08-30"),
        );
        assert_eq!(status, InvoiceStatus::Pending);
    }
}
