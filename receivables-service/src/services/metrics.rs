//! Prometheus metrics for receivables-service.

use once_cell::sync::Lazy;
use prometheus::{register_counter_vec, register_histogram_vec, CounterVec, HistogramVec};

/// Histogram for database query duration by operation.
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "receivables_db_query_duration_seconds",
        "Database query duration in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]
    )
    .expect("Failed to register DB_QUERY_DURATION")
});

/// Counter for allocation engine operations.
pub static ALLOCATION_OPERATIONS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "receivables_allocation_operations_total",
        "Total number of allocation engine operations",
        &["operation", "status"]
    )
    .expect("Failed to register ALLOCATION_OPERATIONS")
});

/// Counter for reversal flow operations.
pub static REVERSAL_OPERATIONS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "receivables_reversal_operations_total",
        "Total number of reversal flow operations",
        &["operation", "status"]
    )
    .expect("Failed to register REVERSAL_OPERATIONS")
});

/// Initialize all metrics (forces lazy initialization).
pub fn init_metrics() {
    Lazy::force(&DB_QUERY_DURATION);
    Lazy::force(&ALLOCATION_OPERATIONS);
    Lazy::force(&REVERSAL_OPERATIONS);
}

/// Record an allocation engine operation.
pub fn record_allocation_operation(operation: &str, status: &str) {
    ALLOCATION_OPERATIONS
        .with_label_values(&[operation, status])
        .inc();
}

/// Record a reversal flow operation.
pub fn record_reversal_operation(operation: &str, status: &str) {
    REVERSAL_OPERATIONS
        .with_label_values(&[operation, status])
        .inc();
}
