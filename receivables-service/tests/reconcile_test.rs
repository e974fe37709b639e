//! Unapplied-payment tracker integration tests.

mod common;

use common::{dec, spawn_app};
use serde_json::json;
use uuid::Uuid;

/// Reconcile is idempotent: repeated calls settle on the same row.
#[tokio::test]
async fn reconcile_is_idempotent() {
    let Some(app) = spawn_app().await else { return };

    let customer = app.create_customer("0").await;
    let payment = app.create_payment(customer.customer_id, "120.00").await;

    for _ in 0..3 {
        let response = app
            .client
            .post(format!(
                "{}/payments/{}/reconcile",
                app.address, payment.payment_id
            ))
            .send()
            .await
            .expect("Failed to reconcile");
        assert_eq!(response.status(), 200);

        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["tracked"], true);
        assert_eq!(dec(body["amount_unapplied"].as_str().unwrap()), dec("120.00"));
    }

    let unapplied = app.list_unapplied(customer.customer_id).await;
    assert_eq!(unapplied.len(), 1);
}

/// Once a payment is fully applied, reconcile reports it untracked.
#[tokio::test]
async fn fully_applied_payment_is_untracked() {
    let Some(app) = spawn_app().await else { return };

    let customer = app.create_customer("0").await;
    let invoice = app.create_invoice(customer.customer_id, "80.00").await;
    let payment = app.create_payment(customer.customer_id, "80.00").await;

    app.allocate_ok(
        payment.payment_id,
        json!([{ "target_type": "invoice", "invoice_id": invoice.invoice_id, "amount": "80.00" }]),
    )
    .await;

    let response = app
        .client
        .post(format!(
            "{}/payments/{}/reconcile",
            app.address, payment.payment_id
        ))
        .send()
        .await
        .expect("Failed to reconcile");
    assert_eq!(response.status(), 200);

    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["tracked"], false);

    let unapplied = app.list_unapplied(customer.customer_id).await;
    assert!(unapplied.is_empty());
}

/// The tracker follows the payment through allocate and reverse.
#[tokio::test]
async fn tracker_follows_allocation_lifecycle() {
    let Some(app) = spawn_app().await else { return };

    let customer = app.create_customer("0").await;
    let invoice = app.create_invoice(customer.customer_id, "100.00").await;
    let payment = app.create_payment(customer.customer_id, "100.00").await;

    // Recorded: tracked in full.
    let unapplied = app.list_unapplied(customer.customer_id).await;
    assert_eq!(unapplied.len(), 1);
    assert_eq!(unapplied[0].amount_unapplied, dec("100.00"));

    // Fully allocated: row removed.
    app.allocate_ok(
        payment.payment_id,
        json!([{ "target_type": "invoice", "invoice_id": invoice.invoice_id, "amount": "100.00" }]),
    )
    .await;
    assert!(app.list_unapplied(customer.customer_id).await.is_empty());

    // Reversed: tracked in full again.
    app.reverse_allocations(payment.payment_id).await;
    let unapplied = app.list_unapplied(customer.customer_id).await;
    assert_eq!(unapplied.len(), 1);
    assert_eq!(unapplied[0].amount_unapplied, dec("100.00"));
}

/// Reconciling an unknown payment is a 404.
#[tokio::test]
async fn reconcile_unknown_payment_is_not_found() {
    let Some(app) = spawn_app().await else { return };

    let response = app
        .client
        .post(format!(
            "{}/payments/{}/reconcile",
            app.address,
            Uuid::new_v4()
        ))
        .send()
        .await
        .expect("Failed to reconcile");
    assert_eq!(response.status(), 404);
}
