//! Outstanding-balance calculation integration tests.

mod common;

use common::{dec, spawn_app};
use serde_json::json;

/// Outstanding = effective opening balance + unpaid invoice amounts, with
/// unapplied credit reported alongside but never netted off.
#[tokio::test]
async fn outstanding_combines_opening_balance_and_invoices() {
    let Some(app) = spawn_app().await else { return };

    let customer = app.create_customer("500.00").await;
    app.create_invoice(customer.customer_id, "400.00").await;
    app.create_invoice(customer.customer_id, "100.00").await;

    let outstanding = app.get_outstanding(customer.customer_id).await;
    assert_eq!(
        dec(outstanding["total_outstanding"].as_str().unwrap()),
        dec("1000.00")
    );
    assert_eq!(
        dec(outstanding["effective_opening_balance"].as_str().unwrap()),
        dec("500.00")
    );
    assert_eq!(
        dec(outstanding["invoice_outstanding"].as_str().unwrap()),
        dec("500.00")
    );
    assert_eq!(
        dec(outstanding["unapplied_credit"].as_str().unwrap()),
        dec("0")
    );
}

/// Allocations shrink the effective figures; the onboarding figure is
/// reported unchanged.
#[tokio::test]
async fn allocations_reduce_outstanding_but_not_original_figure() {
    let Some(app) = spawn_app().await else { return };

    let customer = app.create_customer("500.00").await;
    let invoice = app.create_invoice(customer.customer_id, "400.00").await;
    let payment = app.create_payment(customer.customer_id, "600.00").await;

    app.allocate_ok(
        payment.payment_id,
        json!([
            { "target_type": "invoice", "invoice_id": invoice.invoice_id, "amount": "400.00" },
            { "target_type": "opening_balance", "amount": "200.00" },
        ]),
    )
    .await;

    let outstanding = app.get_outstanding(customer.customer_id).await;
    assert_eq!(
        dec(outstanding["original_opening_balance"].as_str().unwrap()),
        dec("500.00")
    );
    assert_eq!(
        dec(outstanding["effective_opening_balance"].as_str().unwrap()),
        dec("300.00")
    );
    assert_eq!(
        dec(outstanding["invoice_outstanding"].as_str().unwrap()),
        dec("0")
    );
    assert_eq!(
        dec(outstanding["total_outstanding"].as_str().unwrap()),
        dec("300.00")
    );
}

/// A customer holding only unapplied credit owes their full debts; the
/// credit shows up in its own field.
#[tokio::test]
async fn unapplied_credit_does_not_reduce_outstanding() {
    let Some(app) = spawn_app().await else { return };

    let customer = app.create_customer("0").await;
    app.create_invoice(customer.customer_id, "250.00").await;
    app.create_payment(customer.customer_id, "250.00").await;

    // Payment recorded but never allocated.
    let outstanding = app.get_outstanding(customer.customer_id).await;
    assert_eq!(
        dec(outstanding["total_outstanding"].as_str().unwrap()),
        dec("250.00")
    );
    assert_eq!(
        dec(outstanding["unapplied_credit"].as_str().unwrap()),
        dec("250.00")
    );
}

/// Unknown customers are a 404, not an empty summary.
#[tokio::test]
async fn outstanding_for_unknown_customer_is_not_found() {
    let Some(app) = spawn_app().await else { return };

    let response = app
        .client
        .get(format!(
            "{}/customers/{}/outstanding",
            app.address,
            uuid::Uuid::new_v4()
        ))
        .send()
        .await
        .expect("Failed to query outstanding");
    assert_eq!(response.status(), 404);
}
