//! Database service for receivables-service.
//!
//! Every mutating operation runs as a single transaction; the payment row is
//! locked with `SELECT ... FOR UPDATE` for the duration of any operation that
//! reads its remaining unapplied amount before writing, so concurrent
//! allocations of the same payment serialize instead of racing the
//! check-then-act sequence.

use crate::models::{
    AllocationError, AllocationRequest, AllocationStatus, AllocationTarget, CreateCustomer,
    CreateInvoice, CreatePayment, Customer, CustomerStatus, Invoice, InvoicePaymentAllocation,
    InvoiceStatus, ListInvoicesFilter, ListPaymentsFilter, OpeningBalancePaymentAllocation,
    OutstandingSummary, Payment, UnappliedPayment,
};
use crate::services::metrics::{
    record_allocation_operation, record_reversal_operation, DB_QUERY_DURATION,
};
use rust_decimal::Decimal;
use service_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Transaction};
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;

/// Reason recorded on tracker rows for credit that has not been allocated.
const UNAPPLIED_REASON: &str = "payment not fully allocated";

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "receivables-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Check database health.
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Health check failed: {}", e)))?;
        Ok(())
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Customer Operations
    // -------------------------------------------------------------------------

    /// Onboard a customer. The opening balance recorded here is immutable.
    #[instrument(skip(self, input), fields(name = %input.name))]
    pub async fn create_customer(&self, input: &CreateCustomer) -> Result<Customer, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_customer"])
            .start_timer();

        if input.opening_balance < Decimal::ZERO {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Opening balance must not be negative, got {}",
                input.opening_balance
            )));
        }

        let customer_id = Uuid::new_v4();
        let customer = sqlx::query_as::<_, Customer>(
            r#"
            INSERT INTO customers (customer_id, name, route, status, opening_balance)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING customer_id, name, route, status, opening_balance, created_utc
            "#,
        )
        .bind(customer_id)
        .bind(&input.name)
        .bind(&input.route)
        .bind(CustomerStatus::Active.as_str())
        .bind(input.opening_balance)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to create customer: {}", e)))?;

        timer.observe_duration();

        info!(
            customer_id = %customer.customer_id,
            opening_balance = %customer.opening_balance,
            "Customer onboarded"
        );

        Ok(customer)
    }

    /// Get a customer by ID.
    #[instrument(skip(self), fields(customer_id = %customer_id))]
    pub async fn get_customer(&self, customer_id: Uuid) -> Result<Option<Customer>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_customer"])
            .start_timer();

        let customer = sqlx::query_as::<_, Customer>(
            r#"
            SELECT customer_id, name, route, status, opening_balance, created_utc
            FROM customers
            WHERE customer_id = $1
            "#,
        )
        .bind(customer_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get customer: {}", e)))?;

        timer.observe_duration();

        Ok(customer)
    }

    // -------------------------------------------------------------------------
    // Invoice Operations
    // -------------------------------------------------------------------------

    /// Create an invoice with nothing paid against it yet.
    #[instrument(skip(self, input), fields(customer_id = %input.customer_id))]
    pub async fn create_invoice(&self, input: &CreateInvoice) -> Result<Invoice, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_invoice"])
            .start_timer();

        if input.total_amount < Decimal::ZERO {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Invoice total must not be negative, got {}",
                input.total_amount
            )));
        }

        let customer = self.get_customer(input.customer_id).await?;
        if customer.is_none() {
            return Err(AppError::NotFound(anyhow::anyhow!(
                "Customer {} not found",
                input.customer_id
            )));
        }

        let invoice_id = Uuid::new_v4();
        let invoice = sqlx::query_as::<_, Invoice>(
            r#"
            INSERT INTO invoice_metadata (
                invoice_id, customer_id, invoice_date, due_date,
                total_amount, amount_paid, amount_outstanding, invoice_status
            )
            VALUES ($1, $2, $3, $4, $5, 0, $5, 'pending')
            RETURNING invoice_id, customer_id, invoice_date, due_date, total_amount,
                amount_paid, amount_outstanding, invoice_status, created_utc
            "#,
        )
        .bind(invoice_id)
        .bind(input.customer_id)
        .bind(input.invoice_date)
        .bind(input.due_date)
        .bind(input.total_amount)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to create invoice: {}", e)))?;

        timer.observe_duration();

        info!(
            invoice_id = %invoice.invoice_id,
            total_amount = %invoice.total_amount,
            "Invoice created"
        );

        Ok(invoice)
    }

    /// Get an invoice by ID.
    #[instrument(skip(self), fields(invoice_id = %invoice_id))]
    pub async fn get_invoice(&self, invoice_id: Uuid) -> Result<Option<Invoice>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_invoice"])
            .start_timer();

        let invoice = sqlx::query_as::<_, Invoice>(
            r#"
            SELECT invoice_id, customer_id, invoice_date, due_date, total_amount,
                amount_paid, amount_outstanding, invoice_status, created_utc
            FROM invoice_metadata
            WHERE invoice_id = $1
            "#,
        )
        .bind(invoice_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get invoice: {}", e)))?;

        timer.observe_duration();

        Ok(invoice)
    }

    /// List invoices with optional filters.
    #[instrument(skip(self, filter))]
    pub async fn list_invoices(
        &self,
        filter: &ListInvoicesFilter,
    ) -> Result<Vec<Invoice>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_invoices"])
            .start_timer();

        let limit = filter.page_size.clamp(1, 100) as i64;

        let invoices = if let Some(cursor) = filter.page_token {
            sqlx::query_as::<_, Invoice>(
                r#"
                SELECT invoice_id, customer_id, invoice_date, due_date, total_amount,
                    amount_paid, amount_outstanding, invoice_status, created_utc
                FROM invoice_metadata
                WHERE ($1::uuid IS NULL OR customer_id = $1)
                  AND ($2::varchar IS NULL OR invoice_status = $2)
                  AND ($3::date IS NULL OR invoice_date >= $3)
                  AND ($4::date IS NULL OR invoice_date <= $4)
                  AND invoice_id > $5
                ORDER BY invoice_id
                LIMIT $6
                "#,
            )
            .bind(filter.customer_id)
            .bind(filter.status.map(|s| s.as_str()))
            .bind(filter.start_date)
            .bind(filter.end_date)
            .bind(cursor)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
        } else {
            sqlx::query_as::<_, Invoice>(
                r#"
                SELECT invoice_id, customer_id, invoice_date, due_date, total_amount,
                    amount_paid, amount_outstanding, invoice_status, created_utc
                FROM invoice_metadata
                WHERE ($1::uuid IS NULL OR customer_id = $1)
                  AND ($2::varchar IS NULL OR invoice_status = $2)
                  AND ($3::date IS NULL OR invoice_date >= $3)
                  AND ($4::date IS NULL OR invoice_date <= $4)
                ORDER BY invoice_id
                LIMIT $5
                "#,
            )
            .bind(filter.customer_id)
            .bind(filter.status.map(|s| s.as_str()))
            .bind(filter.start_date)
            .bind(filter.end_date)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
        }
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to list invoices: {}", e)))?;

        timer.observe_duration();

        Ok(invoices)
    }

    /// Delete an invoice, reversing the allocations of every payment that
    /// touches it first so no allocation row is orphaned.
    ///
    /// Reversal is per payment and wholesale: a payment that was split across
    /// this and other invoices returns fully to `unapplied` and must be
    /// re-allocated by the caller.
    #[instrument(skip(self), fields(invoice_id = %invoice_id))]
    pub async fn delete_invoice(&self, invoice_id: Uuid) -> Result<Vec<Payment>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["delete_invoice"])
            .start_timer();

        let mut tx = self.begin().await?;

        let invoice = sqlx::query_as::<_, Invoice>(
            r#"
            SELECT invoice_id, customer_id, invoice_date, due_date, total_amount,
                amount_paid, amount_outstanding, invoice_status, created_utc
            FROM invoice_metadata
            WHERE invoice_id = $1
            FOR UPDATE
            "#,
        )
        .bind(invoice_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to lock invoice: {}", e)))?;

        if invoice.is_none() {
            return Err(AppError::NotFound(anyhow::anyhow!(
                "Invoice {} not found",
                invoice_id
            )));
        }

        let payment_ids: Vec<Uuid> = sqlx::query_scalar(
            "SELECT payment_id FROM invoice_payments WHERE invoice_id = $1 ORDER BY payment_id",
        )
        .bind(invoice_id)
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to list invoice payments: {}", e))
        })?;

        let mut reversed = Vec::with_capacity(payment_ids.len());
        for payment_id in payment_ids {
            let payment = self.reverse_allocations_in_tx(&mut tx, payment_id).await?;
            reversed.push(payment);
        }

        sqlx::query("DELETE FROM invoice_metadata WHERE invoice_id = $1")
            .bind(invoice_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to delete invoice: {}", e))
            })?;

        self.commit(tx).await?;
        timer.observe_duration();

        info!(
            invoice_id = %invoice_id,
            reversed_payments = reversed.len(),
            "Invoice deleted"
        );

        Ok(reversed)
    }

    // -------------------------------------------------------------------------
    // Payment Operations
    // -------------------------------------------------------------------------

    /// Record a payment. It starts fully unapplied, so the tracker row is
    /// created in the same transaction.
    #[instrument(skip(self, input), fields(customer_id = %input.customer_id, amount = %input.amount))]
    pub async fn create_payment(&self, input: &CreatePayment) -> Result<Payment, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_payment"])
            .start_timer();

        if input.amount <= Decimal::ZERO {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Payment amount must be positive, got {}",
                input.amount
            )));
        }

        let customer = self.get_customer(input.customer_id).await?;
        if customer.is_none() {
            return Err(AppError::NotFound(anyhow::anyhow!(
                "Customer {} not found",
                input.customer_id
            )));
        }

        let mut tx = self.begin().await?;

        let payment_id = Uuid::new_v4();
        let payment = sqlx::query_as::<_, Payment>(
            r#"
            INSERT INTO payments (
                payment_id, customer_id, amount, amount_applied, amount_unapplied,
                allocation_status, payment_method, payment_reference, payment_date, notes
            )
            VALUES ($1, $2, $3, 0, $3, 'unapplied', $4, $5, $6, $7)
            RETURNING payment_id, customer_id, amount, amount_applied, amount_unapplied,
                allocation_status, payment_method, payment_reference, payment_date,
                notes, created_utc
            "#,
        )
        .bind(payment_id)
        .bind(input.customer_id)
        .bind(input.amount)
        .bind(&input.payment_method)
        .bind(&input.payment_reference)
        .bind(input.payment_date)
        .bind(&input.notes)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to create payment: {}", e)))?;

        self.reconcile_unapplied_in_tx(&mut tx, &payment).await?;
        self.commit(tx).await?;

        timer.observe_duration();

        info!(
            payment_id = %payment.payment_id,
            amount = %payment.amount,
            "Payment recorded"
        );

        Ok(payment)
    }

    /// Get a payment by ID.
    #[instrument(skip(self), fields(payment_id = %payment_id))]
    pub async fn get_payment(&self, payment_id: Uuid) -> Result<Option<Payment>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_payment"])
            .start_timer();

        let payment = sqlx::query_as::<_, Payment>(
            r#"
            SELECT payment_id, customer_id, amount, amount_applied, amount_unapplied,
                allocation_status, payment_method, payment_reference, payment_date,
                notes, created_utc
            FROM payments
            WHERE payment_id = $1
            "#,
        )
        .bind(payment_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get payment: {}", e)))?;

        timer.observe_duration();

        Ok(payment)
    }

    /// List payments with optional filters.
    #[instrument(skip(self, filter))]
    pub async fn list_payments(
        &self,
        filter: &ListPaymentsFilter,
    ) -> Result<Vec<Payment>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_payments"])
            .start_timer();

        let limit = filter.page_size.clamp(1, 100) as i64;

        let payments = if let Some(cursor) = filter.page_token {
            sqlx::query_as::<_, Payment>(
                r#"
                SELECT payment_id, customer_id, amount, amount_applied, amount_unapplied,
                    allocation_status, payment_method, payment_reference, payment_date,
                    notes, created_utc
                FROM payments
                WHERE ($1::uuid IS NULL OR customer_id = $1)
                  AND ($2::varchar IS NULL OR allocation_status = $2)
                  AND ($3::date IS NULL OR payment_date >= $3)
                  AND ($4::date IS NULL OR payment_date <= $4)
                  AND payment_id > $5
                ORDER BY payment_id
                LIMIT $6
                "#,
            )
            .bind(filter.customer_id)
            .bind(filter.allocation_status.map(|s| s.as_str()))
            .bind(filter.start_date)
            .bind(filter.end_date)
            .bind(cursor)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
        } else {
            sqlx::query_as::<_, Payment>(
                r#"
                SELECT payment_id, customer_id, amount, amount_applied, amount_unapplied,
                    allocation_status, payment_method, payment_reference, payment_date,
                    notes, created_utc
                FROM payments
                WHERE ($1::uuid IS NULL OR customer_id = $1)
                  AND ($2::varchar IS NULL OR allocation_status = $2)
                  AND ($3::date IS NULL OR payment_date >= $3)
                  AND ($4::date IS NULL OR payment_date <= $4)
                ORDER BY payment_id
                LIMIT $5
                "#,
            )
            .bind(filter.customer_id)
            .bind(filter.allocation_status.map(|s| s.as_str()))
            .bind(filter.start_date)
            .bind(filter.end_date)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
        }
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to list payments: {}", e)))?;

        timer.observe_duration();

        Ok(payments)
    }

    /// All invoice allocation rows for a payment.
    #[instrument(skip(self), fields(payment_id = %payment_id))]
    pub async fn list_invoice_allocations(
        &self,
        payment_id: Uuid,
    ) -> Result<Vec<InvoicePaymentAllocation>, AppError> {
        let rows = sqlx::query_as::<_, InvoicePaymentAllocation>(
            r#"
            SELECT invoice_id, payment_id, amount_allocated, created_utc
            FROM invoice_payments
            WHERE payment_id = $1
            ORDER BY invoice_id
            "#,
        )
        .bind(payment_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to list allocations: {}", e))
        })?;

        Ok(rows)
    }

    /// All opening-balance allocation rows for a payment.
    #[instrument(skip(self), fields(payment_id = %payment_id))]
    pub async fn list_opening_balance_allocations(
        &self,
        payment_id: Uuid,
    ) -> Result<Vec<OpeningBalancePaymentAllocation>, AppError> {
        let rows = sqlx::query_as::<_, OpeningBalancePaymentAllocation>(
            r#"
            SELECT customer_id, payment_id, amount, created_utc
            FROM opening_balance_payments
            WHERE payment_id = $1
            "#,
        )
        .bind(payment_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!(
                "Failed to list opening-balance allocations: {}",
                e
            ))
        })?;

        Ok(rows)
    }

    // -------------------------------------------------------------------------
    // Allocation Engine
    // -------------------------------------------------------------------------

    /// Distribute part or all of a payment's unapplied remainder across
    /// invoices and/or the customer's opening balance.
    ///
    /// The same payment may be allocated incrementally over several calls;
    /// each call is checked against the remainder left by earlier ones. The
    /// whole operation is one transaction: all rows and counter updates
    /// commit together or not at all.
    #[instrument(skip(self, requests), fields(payment_id = %payment_id, request_count = requests.len()))]
    pub async fn allocate(
        &self,
        payment_id: Uuid,
        requests: &[AllocationRequest],
    ) -> Result<(Payment, Vec<Invoice>), AppError> {
        let result = self.allocate_inner(payment_id, requests).await;
        record_allocation_operation(
            "allocate",
            if result.is_ok() { "success" } else { "error" },
        );
        result
    }

    async fn allocate_inner(
        &self,
        payment_id: Uuid,
        requests: &[AllocationRequest],
    ) -> Result<(Payment, Vec<Invoice>), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["allocate"])
            .start_timer();

        let mut tx = self.begin().await?;

        let payment = self.lock_payment(&mut tx, payment_id).await?;
        let total = crate::models::allocation::validate_plan(requests, payment.remaining())
            .map_err(AppError::from)?;

        let touched_invoices = self
            .apply_allocations_in_tx(&mut tx, &payment, requests)
            .await?;

        let payment = self.recompute_payment_in_tx(&mut tx, payment_id).await?;
        self.reconcile_unapplied_in_tx(&mut tx, &payment).await?;
        self.commit(tx).await?;

        timer.observe_duration();

        info!(
            payment_id = %payment_id,
            allocated = %total,
            amount_unapplied = %payment.amount_unapplied,
            allocation_status = %payment.allocation_status,
            "Payment allocated"
        );

        Ok((payment, touched_invoices))
    }

    // -------------------------------------------------------------------------
    // Unapplied-Payment Tracker
    // -------------------------------------------------------------------------

    /// Bring the tracker row for a payment in line with its current
    /// unapplied amount. Idempotent; safe to run as a standalone repair.
    #[instrument(skip(self), fields(payment_id = %payment_id))]
    pub async fn reconcile_unapplied_payment(
        &self,
        payment_id: Uuid,
    ) -> Result<Option<UnappliedPayment>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["reconcile_unapplied_payment"])
            .start_timer();

        let mut tx = self.begin().await?;
        let payment = self.lock_payment(&mut tx, payment_id).await?;
        let row = self.reconcile_unapplied_in_tx(&mut tx, &payment).await?;
        self.commit(tx).await?;

        timer.observe_duration();

        Ok(row)
    }

    /// Tracker rows for one customer ("credit available" displays).
    #[instrument(skip(self), fields(customer_id = %customer_id))]
    pub async fn list_unapplied_payments(
        &self,
        customer_id: Uuid,
    ) -> Result<Vec<UnappliedPayment>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_unapplied_payments"])
            .start_timer();

        let rows = sqlx::query_as::<_, UnappliedPayment>(
            r#"
            SELECT payment_id, customer_id, amount_unapplied, reason, updated_utc
            FROM unapplied_payments
            WHERE customer_id = $1
            ORDER BY payment_id
            "#,
        )
        .bind(customer_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to list unapplied payments: {}", e))
        })?;

        timer.observe_duration();

        Ok(rows)
    }

    // -------------------------------------------------------------------------
    // Outstanding Calculator
    // -------------------------------------------------------------------------

    /// Opening balance still owed: `max(0, opening_balance - Σ allocations)`.
    ///
    /// Recomputed from source rows on every call. Callers wanting the
    /// historical onboarding figure use
    /// [`Customer::original_opening_balance`] instead.
    #[instrument(skip(self), fields(customer_id = %customer_id))]
    pub async fn effective_opening_balance(&self, customer_id: Uuid) -> Result<Decimal, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["effective_opening_balance"])
            .start_timer();

        let customer = self.get_customer(customer_id).await?.ok_or_else(|| {
            AppError::NotFound(anyhow::anyhow!("Customer {} not found", customer_id))
        })?;

        let allocated: Option<Decimal> = sqlx::query_scalar(
            "SELECT COALESCE(SUM(amount), 0) FROM opening_balance_payments WHERE customer_id = $1",
        )
        .bind(customer_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!(
                "Failed to sum opening-balance allocations: {}",
                e
            ))
        })?;

        timer.observe_duration();

        let remaining = customer.opening_balance - allocated.unwrap_or(Decimal::ZERO);
        Ok(remaining.max(Decimal::ZERO))
    }

    /// Everything the customer currently owes plus the credit sitting
    /// unapplied on their payments.
    #[instrument(skip(self), fields(customer_id = %customer_id))]
    pub async fn total_outstanding(
        &self,
        customer_id: Uuid,
    ) -> Result<OutstandingSummary, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["total_outstanding"])
            .start_timer();

        let customer = self.get_customer(customer_id).await?.ok_or_else(|| {
            AppError::NotFound(anyhow::anyhow!("Customer {} not found", customer_id))
        })?;

        let effective_opening_balance = self.effective_opening_balance(customer_id).await?;

        let invoice_outstanding: Option<Decimal> = sqlx::query_scalar(
            r#"
            SELECT COALESCE(SUM(amount_outstanding), 0)
            FROM invoice_metadata
            WHERE customer_id = $1
              AND invoice_status <> 'paid'
            "#,
        )
        .bind(customer_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!(
                "Failed to sum invoice outstanding: {}",
                e
            ))
        })?;

        let unapplied_credit: Option<Decimal> = sqlx::query_scalar(
            "SELECT COALESCE(SUM(amount_unapplied), 0) FROM unapplied_payments WHERE customer_id = $1",
        )
        .bind(customer_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to sum unapplied credit: {}", e))
        })?;

        timer.observe_duration();

        let invoice_outstanding = invoice_outstanding.unwrap_or(Decimal::ZERO);
        Ok(OutstandingSummary {
            customer_id,
            original_opening_balance: customer.original_opening_balance(),
            effective_opening_balance,
            invoice_outstanding,
            total_outstanding: effective_opening_balance + invoice_outstanding,
            unapplied_credit: unapplied_credit.unwrap_or(Decimal::ZERO),
        })
    }

    // -------------------------------------------------------------------------
    // Reallocation / Reversal Flow
    // -------------------------------------------------------------------------

    /// Undo every allocation tied to a payment, returning it to the
    /// unapplied state and recomputing each touched invoice from the
    /// allocation rows other payments left behind.
    #[instrument(skip(self), fields(payment_id = %payment_id))]
    pub async fn reverse_allocations(&self, payment_id: Uuid) -> Result<Payment, AppError> {
        let result = self.reverse_allocations_inner(payment_id).await;
        record_reversal_operation(
            "reverse_allocations",
            if result.is_ok() { "success" } else { "error" },
        );
        result
    }

    async fn reverse_allocations_inner(&self, payment_id: Uuid) -> Result<Payment, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["reverse_allocations"])
            .start_timer();

        let mut tx = self.begin().await?;
        let payment = self.reverse_allocations_in_tx(&mut tx, payment_id).await?;
        self.commit(tx).await?;

        timer.observe_duration();

        info!(
            payment_id = %payment_id,
            amount_unapplied = %payment.amount_unapplied,
            "Allocations reversed"
        );

        Ok(payment)
    }

    /// Change a payment's face amount.
    ///
    /// Unapplied payments are edited in place. When a breakdown accompanies
    /// the new amount it is validated against that amount, any existing
    /// allocations are reversed and the breakdown applied in the same
    /// transaction. Changing the amount of an allocated payment without a
    /// breakdown is rejected with `ReallocationRequired`.
    #[instrument(skip(self, new_allocations), fields(payment_id = %payment_id, new_amount = %new_amount))]
    pub async fn update_payment_amount(
        &self,
        payment_id: Uuid,
        new_amount: Decimal,
        new_allocations: Option<&[AllocationRequest]>,
    ) -> Result<(Payment, Vec<Invoice>), AppError> {
        let result = self
            .update_payment_amount_inner(payment_id, new_amount, new_allocations)
            .await;
        record_reversal_operation(
            "update_payment_amount",
            if result.is_ok() { "success" } else { "error" },
        );
        result
    }

    async fn update_payment_amount_inner(
        &self,
        payment_id: Uuid,
        new_amount: Decimal,
        new_allocations: Option<&[AllocationRequest]>,
    ) -> Result<(Payment, Vec<Invoice>), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["update_payment_amount"])
            .start_timer();

        if new_amount <= Decimal::ZERO {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Payment amount must be positive, got {}",
                new_amount
            )));
        }

        let mut tx = self.begin().await?;
        let payment = self.lock_payment(&mut tx, payment_id).await?;

        if !payment.has_allocations() && new_allocations.is_none() {
            // Trivial path: nothing to unwind, just restate the face value.
            let payment = sqlx::query_as::<_, Payment>(
                r#"
                UPDATE payments
                SET amount = $2, amount_unapplied = $2
                WHERE payment_id = $1
                RETURNING payment_id, customer_id, amount, amount_applied, amount_unapplied,
                    allocation_status, payment_method, payment_reference, payment_date,
                    notes, created_utc
                "#,
            )
            .bind(payment_id)
            .bind(new_amount)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to update payment: {}", e))
            })?;

            self.reconcile_unapplied_in_tx(&mut tx, &payment).await?;
            self.commit(tx).await?;
            timer.observe_duration();
            return Ok((payment, Vec::new()));
        }

        if payment.has_allocations() && new_amount == payment.amount && new_allocations.is_none() {
            // Amount unchanged, nothing requested.
            timer.observe_duration();
            return Ok((payment, Vec::new()));
        }

        let requests = match new_allocations {
            Some(requests) => requests,
            None => return Err(AllocationError::ReallocationRequired.into()),
        };

        // Validate the replacement plan against the new face value before
        // any row is touched.
        crate::models::allocation::validate_plan(requests, new_amount)
            .map_err(AppError::from)?;

        self.reverse_allocations_in_tx(&mut tx, payment_id).await?;

        let payment = sqlx::query_as::<_, Payment>(
            r#"
            UPDATE payments
            SET amount = $2, amount_applied = 0, amount_unapplied = $2,
                allocation_status = 'unapplied'
            WHERE payment_id = $1
            RETURNING payment_id, customer_id, amount, amount_applied, amount_unapplied,
                allocation_status, payment_method, payment_reference, payment_date,
                notes, created_utc
            "#,
        )
        .bind(payment_id)
        .bind(new_amount)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to update payment amount: {}", e))
        })?;

        let touched_invoices = self
            .apply_allocations_in_tx(&mut tx, &payment, requests)
            .await?;
        let payment = self.recompute_payment_in_tx(&mut tx, payment_id).await?;
        self.reconcile_unapplied_in_tx(&mut tx, &payment).await?;
        self.commit(tx).await?;

        timer.observe_duration();

        info!(
            payment_id = %payment_id,
            new_amount = %new_amount,
            allocation_status = %payment.allocation_status,
            "Payment amount updated"
        );

        Ok((payment, touched_invoices))
    }

    // -------------------------------------------------------------------------
    // Transaction helpers
    // -------------------------------------------------------------------------

    async fn begin(&self) -> Result<Transaction<'static, Postgres>, AppError> {
        self.pool.begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })
    }

    async fn commit(&self, tx: Transaction<'static, Postgres>) -> Result<(), AppError> {
        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit transaction: {}", e))
        })
    }

    /// Lock the payment row for the duration of the transaction.
    async fn lock_payment(
        &self,
        tx: &mut Transaction<'static, Postgres>,
        payment_id: Uuid,
    ) -> Result<Payment, AppError> {
        let payment = sqlx::query_as::<_, Payment>(
            r#"
            SELECT payment_id, customer_id, amount, amount_applied, amount_unapplied,
                allocation_status, payment_method, payment_reference, payment_date,
                notes, created_utc
            FROM payments
            WHERE payment_id = $1
            FOR UPDATE
            "#,
        )
        .bind(payment_id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to lock payment: {}", e)))?;

        payment.ok_or_else(|| {
            AllocationError::TargetNotFound(format!("payment {}", payment_id)).into()
        })
    }

    /// Insert allocation rows for the plan and recompute each touched
    /// invoice from its allocation rows. Caller holds the payment lock.
    async fn apply_allocations_in_tx(
        &self,
        tx: &mut Transaction<'static, Postgres>,
        payment: &Payment,
        requests: &[AllocationRequest],
    ) -> Result<Vec<Invoice>, AppError> {
        let mut touched_invoices = Vec::new();

        for request in requests {
            match request.target {
                AllocationTarget::Invoice(invoice_id) => {
                    let invoice = self
                        .allocate_to_invoice_in_tx(tx, payment, invoice_id, request.amount)
                        .await?;
                    touched_invoices.push(invoice);
                }
                AllocationTarget::OpeningBalance => {
                    self.allocate_to_opening_balance_in_tx(tx, payment, request.amount)
                        .await?;
                }
            }
        }

        Ok(touched_invoices)
    }

    async fn allocate_to_invoice_in_tx(
        &self,
        tx: &mut Transaction<'static, Postgres>,
        payment: &Payment,
        invoice_id: Uuid,
        amount: Decimal,
    ) -> Result<Invoice, AppError> {
        let invoice = sqlx::query_as::<_, Invoice>(
            r#"
            SELECT invoice_id, customer_id, invoice_date, due_date, total_amount,
                amount_paid, amount_outstanding, invoice_status, created_utc
            FROM invoice_metadata
            WHERE invoice_id = $1 AND customer_id = $2
            FOR UPDATE
            "#,
        )
        .bind(invoice_id)
        .bind(payment.customer_id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to lock invoice: {}", e)))?
        .ok_or_else(|| {
            AppError::from(AllocationError::TargetNotFound(format!(
                "invoice {} for customer {}",
                invoice_id, payment.customer_id
            )))
        })?;

        if amount > invoice.amount_outstanding {
            return Err(AllocationError::InvalidAmount(format!(
                "allocation {} exceeds invoice {} outstanding amount {}",
                amount, invoice_id, invoice.amount_outstanding
            ))
            .into());
        }

        // One row per (invoice, payment) pair; a later incremental
        // allocation from the same payment folds into the existing row.
        sqlx::query(
            r#"
            INSERT INTO invoice_payments (invoice_id, payment_id, amount_allocated)
            VALUES ($1, $2, $3)
            ON CONFLICT (invoice_id, payment_id)
            DO UPDATE SET amount_allocated = invoice_payments.amount_allocated + EXCLUDED.amount_allocated
            "#,
        )
        .bind(invoice_id)
        .bind(payment.payment_id)
        .bind(amount)
        .execute(&mut **tx)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to insert allocation row: {}", e))
        })?;

        self.recompute_invoice_in_tx(tx, invoice_id).await
    }

    async fn allocate_to_opening_balance_in_tx(
        &self,
        tx: &mut Transaction<'static, Postgres>,
        payment: &Payment,
        amount: Decimal,
    ) -> Result<(), AppError> {
        // Lock the customer row so the running-total check cannot race a
        // concurrent opening-balance allocation from another payment.
        let customer = sqlx::query_as::<_, Customer>(
            r#"
            SELECT customer_id, name, route, status, opening_balance, created_utc
            FROM customers
            WHERE customer_id = $1
            FOR UPDATE
            "#,
        )
        .bind(payment.customer_id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to lock customer: {}", e)))?
        .ok_or_else(|| {
            AppError::from(AllocationError::TargetNotFound(format!(
                "customer {}",
                payment.customer_id
            )))
        })?;

        let already_allocated: Option<Decimal> = sqlx::query_scalar(
            "SELECT COALESCE(SUM(amount), 0) FROM opening_balance_payments WHERE customer_id = $1",
        )
        .bind(payment.customer_id)
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!(
                "Failed to sum opening-balance allocations: {}",
                e
            ))
        })?;

        let requested = already_allocated.unwrap_or(Decimal::ZERO) + amount;
        if requested > customer.opening_balance {
            return Err(AllocationError::ExceedsOpeningBalance {
                requested,
                opening_balance: customer.opening_balance,
            }
            .into());
        }

        sqlx::query(
            r#"
            INSERT INTO opening_balance_payments (customer_id, payment_id, amount)
            VALUES ($1, $2, $3)
            ON CONFLICT (customer_id, payment_id)
            DO UPDATE SET amount = opening_balance_payments.amount + EXCLUDED.amount
            "#,
        )
        .bind(payment.customer_id)
        .bind(payment.payment_id)
        .bind(amount)
        .execute(&mut **tx)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!(
                "Failed to insert opening-balance allocation: {}",
                e
            ))
        })?;

        Ok(())
    }

    /// Rewrite an invoice's aggregates and status from the sum over its
    /// allocation rows. Never increments in place.
    async fn recompute_invoice_in_tx(
        &self,
        tx: &mut Transaction<'static, Postgres>,
        invoice_id: Uuid,
    ) -> Result<Invoice, AppError> {
        let invoice = sqlx::query_as::<_, Invoice>(
            r#"
            SELECT invoice_id, customer_id, invoice_date, due_date, total_amount,
                amount_paid, amount_outstanding, invoice_status, created_utc
            FROM invoice_metadata
            WHERE invoice_id = $1
            FOR UPDATE
            "#,
        )
        .bind(invoice_id)
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to fetch invoice: {}", e)))?;

        let allocated: Option<Decimal> = sqlx::query_scalar(
            "SELECT COALESCE(SUM(amount_allocated), 0) FROM invoice_payments WHERE invoice_id = $1",
        )
        .bind(invoice_id)
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to sum invoice allocations: {}", e))
        })?;

        let amount_paid = allocated.unwrap_or(Decimal::ZERO);
        let amount_outstanding = invoice.total_amount - amount_paid;
        let status = InvoiceStatus::recompute(
            invoice.parsed_status(),
            amount_paid,
            amount_outstanding,
            invoice.due_date,
            chrono::Utc::now().date_naive(),
        );

        let updated = sqlx::query_as::<_, Invoice>(
            r#"
            UPDATE invoice_metadata
            SET amount_paid = $2, amount_outstanding = $3, invoice_status = $4
            WHERE invoice_id = $1
            RETURNING invoice_id, customer_id, invoice_date, due_date, total_amount,
                amount_paid, amount_outstanding, invoice_status, created_utc
            "#,
        )
        .bind(invoice_id)
        .bind(amount_paid)
        .bind(amount_outstanding)
        .bind(status.as_str())
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to update invoice: {}", e))
        })?;

        Ok(updated)
    }

    /// Rewrite the payment's applied/unapplied counters from the sums over
    /// both allocation-row kinds.
    async fn recompute_payment_in_tx(
        &self,
        tx: &mut Transaction<'static, Postgres>,
        payment_id: Uuid,
    ) -> Result<Payment, AppError> {
        let invoice_allocated: Option<Decimal> = sqlx::query_scalar(
            "SELECT COALESCE(SUM(amount_allocated), 0) FROM invoice_payments WHERE payment_id = $1",
        )
        .bind(payment_id)
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to sum invoice allocations: {}", e))
        })?;

        let opening_balance_allocated: Option<Decimal> = sqlx::query_scalar(
            "SELECT COALESCE(SUM(amount), 0) FROM opening_balance_payments WHERE payment_id = $1",
        )
        .bind(payment_id)
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!(
                "Failed to sum opening-balance allocations: {}",
                e
            ))
        })?;

        let face_amount: Decimal =
            sqlx::query_scalar("SELECT amount FROM payments WHERE payment_id = $1")
                .bind(payment_id)
                .fetch_one(&mut **tx)
                .await
                .map_err(|e| {
                    AppError::DatabaseError(anyhow::anyhow!("Failed to fetch payment: {}", e))
                })?;

        let amount_applied = invoice_allocated.unwrap_or(Decimal::ZERO)
            + opening_balance_allocated.unwrap_or(Decimal::ZERO);
        let amount_unapplied = face_amount - amount_applied;
        let status = AllocationStatus::from_amounts(amount_applied, amount_unapplied);

        let payment = sqlx::query_as::<_, Payment>(
            r#"
            UPDATE payments
            SET amount_applied = $2,
                amount_unapplied = $3,
                allocation_status = $4
            WHERE payment_id = $1
            RETURNING payment_id, customer_id, amount, amount_applied, amount_unapplied,
                allocation_status, payment_method, payment_reference, payment_date,
                notes, created_utc
            "#,
        )
        .bind(payment_id)
        .bind(amount_applied)
        .bind(amount_unapplied)
        .bind(status.as_str())
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to update payment: {}", e))
        })?;

        Ok(payment)
    }

    /// Reversal core: delete both allocation-row kinds, recompute every
    /// invoice that lost a row, and reset the payment.
    async fn reverse_allocations_in_tx(
        &self,
        tx: &mut Transaction<'static, Postgres>,
        payment_id: Uuid,
    ) -> Result<Payment, AppError> {
        let payment = self.lock_payment(tx, payment_id).await?;

        let invoice_ids: Vec<Uuid> = sqlx::query_scalar(
            "SELECT invoice_id FROM invoice_payments WHERE payment_id = $1",
        )
        .bind(payment_id)
        .fetch_all(&mut **tx)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to list allocated invoices: {}", e))
        })?;

        sqlx::query("DELETE FROM invoice_payments WHERE payment_id = $1")
            .bind(payment_id)
            .execute(&mut **tx)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to delete allocations: {}", e))
            })?;

        sqlx::query("DELETE FROM opening_balance_payments WHERE payment_id = $1")
            .bind(payment_id)
            .execute(&mut **tx)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!(
                    "Failed to delete opening-balance allocations: {}",
                    e
                ))
            })?;

        for invoice_id in invoice_ids {
            self.recompute_invoice_in_tx(tx, invoice_id).await?;
        }

        let payment = sqlx::query_as::<_, Payment>(
            r#"
            UPDATE payments
            SET amount_applied = 0,
                amount_unapplied = amount,
                allocation_status = 'unapplied'
            WHERE payment_id = $1
            RETURNING payment_id, customer_id, amount, amount_applied, amount_unapplied,
                allocation_status, payment_method, payment_reference, payment_date,
                notes, created_utc
            "#,
        )
        .bind(payment.payment_id)
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to reset payment: {}", e))
        })?;

        self.reconcile_unapplied_in_tx(tx, &payment).await?;

        Ok(payment)
    }

    /// Tracker core: upsert the row while unapplied credit remains, delete
    /// it once the payment is fully applied. Idempotent.
    async fn reconcile_unapplied_in_tx(
        &self,
        tx: &mut Transaction<'static, Postgres>,
        payment: &Payment,
    ) -> Result<Option<UnappliedPayment>, AppError> {
        if payment.amount_unapplied > Decimal::ZERO {
            let row = sqlx::query_as::<_, UnappliedPayment>(
                r#"
                INSERT INTO unapplied_payments (payment_id, customer_id, amount_unapplied, reason, updated_utc)
                VALUES ($1, $2, $3, $4, now())
                ON CONFLICT (payment_id)
                DO UPDATE SET amount_unapplied = EXCLUDED.amount_unapplied, updated_utc = now()
                RETURNING payment_id, customer_id, amount_unapplied, reason, updated_utc
                "#,
            )
            .bind(payment.payment_id)
            .bind(payment.customer_id)
            .bind(payment.amount_unapplied)
            .bind(UNAPPLIED_REASON)
            .fetch_one(&mut **tx)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!(
                    "Failed to upsert unapplied payment: {}",
                    e
                ))
            })?;

            Ok(Some(row))
        } else {
            sqlx::query("DELETE FROM unapplied_payments WHERE payment_id = $1")
                .bind(payment.payment_id)
                .execute(&mut **tx)
                .await
                .map_err(|e| {
                    AppError::DatabaseError(anyhow::anyhow!(
                        "Failed to delete unapplied payment: {}",
                        e
                    ))
                })?;

            Ok(None)
        }
    }
}
