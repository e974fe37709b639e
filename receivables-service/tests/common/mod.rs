//! Common test utilities for receivables-service integration tests.

#![allow(dead_code)]

use receivables_service::config::{DatabaseConfig, ReceivablesConfig};
use receivables_service::models::{Customer, Invoice, Payment, UnappliedPayment};
use receivables_service::startup::Application;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use service_core::config::Config as CommonConfig;
use std::sync::Once;
use uuid::Uuid;

static INIT: Once = Once::new();

/// Initialize tracing for tests (only once).
pub fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter("info,receivables_service=debug,sqlx=warn")
            .with_test_writer()
            .try_init()
            .ok();
    });
}

pub struct TestApp {
    pub address: String,
    pub client: reqwest::Client,
}

/// Spawn a test application against TEST_DATABASE_URL.
///
/// Returns `None` when TEST_DATABASE_URL is unset so the suite can run
/// without a database; callers skip in that case.
pub async fn spawn_app() -> Option<TestApp> {
    init_tracing();

    let database_url = match std::env::var("TEST_DATABASE_URL") {
        Ok(url) => url,
        Err(_) => {
            eprintln!("TEST_DATABASE_URL not set; skipping integration test");
            return None;
        }
    };

    let config = ReceivablesConfig {
        common: CommonConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
        },
        service_name: "receivables-service-test".to_string(),
        service_version: "test".to_string(),
        log_level: "debug".to_string(),
        otlp_endpoint: None,
        database: DatabaseConfig {
            url: database_url,
            max_connections: 2,
            min_connections: 1,
        },
    };

    let app = Application::build(config)
        .await
        .expect("Failed to build application");

    let address = format!("http://127.0.0.1:{}", app.http_port());

    tokio::spawn(async move {
        app.run_until_stopped().await.ok();
    });

    let client = reqwest::Client::new();

    // Wait for the server to accept connections.
    let mut attempts = 0;
    loop {
        match client.get(format!("{}/health", address)).send().await {
            Ok(_) => break,
            Err(_) if attempts < 20 => {
                attempts += 1;
                tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;
            }
            Err(e) => panic!("Server did not come up after 20 attempts: {}", e),
        }
    }

    Some(TestApp { address, client })
}

impl TestApp {
    /// Onboard a customer with the given opening balance.
    pub async fn create_customer(&self, opening_balance: &str) -> Customer {
        let response = self
            .client
            .post(format!("{}/customers", self.address))
            .json(&json!({
                "name": format!("Dairy Customer {}", Uuid::new_v4()),
                "route": "route-7",
                "opening_balance": opening_balance,
            }))
            .send()
            .await
            .expect("Failed to create customer");
        assert_eq!(response.status(), 201, "customer creation should succeed");
        response.json().await.expect("Invalid customer response")
    }

    pub async fn create_invoice(&self, customer_id: Uuid, total_amount: &str) -> Invoice {
        let response = self
            .client
            .post(format!("{}/invoices", self.address))
            .json(&json!({
                "customer_id": customer_id,
                "invoice_date": "2026-08-01",
                "due_date": "2026-08-15",
                "total_amount": total_amount,
            }))
            .send()
            .await
            .expect("Failed to create invoice");
        assert_eq!(response.status(), 201, "invoice creation should succeed");
        response.json().await.expect("Invalid invoice response")
    }

    pub async fn create_payment(&self, customer_id: Uuid, amount: &str) -> Payment {
        let response = self
            .client
            .post(format!("{}/payments", self.address))
            .json(&json!({
                "customer_id": customer_id,
                "amount": amount,
                "payment_method": "cash",
                "payment_date": "2026-08-20",
            }))
            .send()
            .await
            .expect("Failed to create payment");
        assert_eq!(response.status(), 201, "payment creation should succeed");
        response.json().await.expect("Invalid payment response")
    }

    /// POST an allocation plan; returns the raw response for status checks.
    pub async fn allocate(&self, payment_id: Uuid, allocations: Value) -> reqwest::Response {
        self.client
            .post(format!("{}/payments/{}/allocations", self.address, payment_id))
            .json(&json!({ "allocations": allocations }))
            .send()
            .await
            .expect("Failed to send allocation request")
    }

    /// Allocate and expect success; returns the updated payment.
    pub async fn allocate_ok(&self, payment_id: Uuid, allocations: Value) -> Payment {
        let response = self.allocate(payment_id, allocations).await;
        assert_eq!(response.status(), 200, "allocation should succeed");
        let body: Value = response.json().await.expect("Invalid allocation response");
        serde_json::from_value(body["payment"].clone()).expect("Invalid payment in response")
    }

    pub async fn reverse_allocations(&self, payment_id: Uuid) -> reqwest::Response {
        self.client
            .delete(format!("{}/payments/{}/allocations", self.address, payment_id))
            .send()
            .await
            .expect("Failed to send reversal request")
    }

    pub async fn update_payment_amount(
        &self,
        payment_id: Uuid,
        body: Value,
    ) -> reqwest::Response {
        self.client
            .put(format!("{}/payments/{}/amount", self.address, payment_id))
            .json(&body)
            .send()
            .await
            .expect("Failed to send amount update")
    }

    pub async fn get_payment(&self, payment_id: Uuid) -> Payment {
        self.client
            .get(format!("{}/payments/{}", self.address, payment_id))
            .send()
            .await
            .expect("Failed to get payment")
            .json()
            .await
            .expect("Invalid payment response")
    }

    pub async fn get_invoice(&self, invoice_id: Uuid) -> Invoice {
        self.client
            .get(format!("{}/invoices/{}", self.address, invoice_id))
            .send()
            .await
            .expect("Failed to get invoice")
            .json()
            .await
            .expect("Invalid invoice response")
    }

    pub async fn get_outstanding(&self, customer_id: Uuid) -> Value {
        self.client
            .get(format!("{}/customers/{}/outstanding", self.address, customer_id))
            .send()
            .await
            .expect("Failed to get outstanding")
            .json()
            .await
            .expect("Invalid outstanding response")
    }

    pub async fn list_unapplied(&self, customer_id: Uuid) -> Vec<UnappliedPayment> {
        self.client
            .get(format!(
                "{}/customers/{}/unapplied-payments",
                self.address, customer_id
            ))
            .send()
            .await
            .expect("Failed to list unapplied payments")
            .json()
            .await
            .expect("Invalid unapplied payments response")
    }
}

pub fn dec(s: &str) -> Decimal {
    s.parse().expect("Invalid decimal literal")
}
