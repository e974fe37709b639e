//! Data models for receivables-service.

pub mod allocation;
pub mod customer;
pub mod invoice;
pub mod payment;

pub use allocation::{
    AllocationError, AllocationRequest, AllocationTarget, InvoicePaymentAllocation,
    OpeningBalancePaymentAllocation, UnappliedPayment,
};
pub use customer::{CreateCustomer, Customer, CustomerStatus, OutstandingSummary};
pub use invoice::{CreateInvoice, Invoice, InvoiceStatus, ListInvoicesFilter};
pub use payment::{AllocationStatus, CreatePayment, ListPaymentsFilter, Payment};
