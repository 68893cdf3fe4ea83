//! Integration tests for PartsFlow.
//!
//! # Running Tests
//!
//! ```bash
//! # Apply migrations and start the server
//! cargo run -p partsflow-cli -- migrate
//! cargo run -p partsflow-server
//!
//! # Run the end-to-end tests
//! cargo test -p partsflow-integration-tests -- --ignored
//! ```
//!
//! # Environment Variables
//!
//! - `PARTSFLOW_BASE_URL` - Server under test (default: `http://localhost:3002`)
//! - `PARTSFLOW_DATABASE_URL` - Database the server uses; tests seed master data into it
//!
//! Every test seeds its own service center and parts under fresh codes, so
//! tests never share document-number scopes and can run in parallel.

use partsflow_core::{CatalogPart, PartId};
use partsflow_server::db::CatalogRepository;
use partsflow_server::db::catalog::ServiceCenter;
use reqwest::{Client, Method, StatusCode};
use rust_decimal::Decimal;
use secrecy::SecretString;
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

/// Actor headers used by the tests, as `(id, role)`.
pub mod actors {
    pub const TECHNICIAN: (&str, &str) = ("tech-it", "technician");
    pub const SERVICE_MANAGER: (&str, &str) = ("manager-it", "service_manager");
    pub const CENTRAL_ADMIN: (&str, &str) = ("admin-it", "central_admin");
    pub const WAREHOUSE: (&str, &str) = ("warehouse-it", "warehouse");
}

/// Shared handles for one test.
pub struct TestContext {
    pub client: Client,
    pub base_url: String,
    pub pool: PgPool,
}

impl TestContext {
    /// Connect to the server and database under test.
    ///
    /// # Panics
    ///
    /// Panics if the database URL is missing or the database is unreachable.
    pub async fn new() -> Self {
        let base_url = std::env::var("PARTSFLOW_BASE_URL")
            .unwrap_or_else(|_| "http://localhost:3002".to_string());
        let database_url = std::env::var("PARTSFLOW_DATABASE_URL")
            .or_else(|_| std::env::var("DATABASE_URL"))
            .map(SecretString::from)
            .expect("PARTSFLOW_DATABASE_URL must be set for integration tests");
        let pool = partsflow_server::db::create_pool(&database_url, 4)
            .await
            .expect("Failed to connect to test database");

        Self {
            client: Client::new(),
            base_url,
            pool,
        }
    }

    /// Register a service center under a code no other test uses.
    ///
    /// # Panics
    ///
    /// Panics if the insert fails.
    pub async fn seed_service_center(&self) -> ServiceCenter {
        let code = format!("IT{}", &unique_suffix()[..8]);
        CatalogRepository::new(&self.pool)
            .upsert_service_center(&code, "Integration Test Workshop")
            .await
            .expect("Failed to seed service center")
    }

    /// Add a part with the given price and on-hand stock.
    ///
    /// # Panics
    ///
    /// Panics if the insert fails.
    pub async fn seed_part(&self, unit_price: i64, on_hand: i32) -> CatalogPart {
        let catalog = CatalogRepository::new(&self.pool);
        let part = catalog
            .upsert_part(&CatalogPart {
                part_id: PartId::new(0),
                part_name: "Integration test part".to_string(),
                part_number: Some(format!("IT-{}", unique_suffix())),
                hsn_code: Some("8708".to_string()),
                unit_price: Decimal::new(unit_price, 0),
            })
            .await
            .expect("Failed to seed part");
        catalog
            .set_stock(part.part_id, on_hand)
            .await
            .expect("Failed to seed stock");
        part
    }

    /// Send a JSON request as `actor` and return the status and body.
    ///
    /// # Panics
    ///
    /// Panics if the request cannot be sent or the body is not JSON.
    pub async fn send(
        &self,
        method: Method,
        path: &str,
        actor: (&str, &str),
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut request = self
            .client
            .request(method, format!("{}{path}", self.base_url))
            .header("X-Actor-Id", actor.0)
            .header("X-Actor-Role", actor.1);
        if let Some(body) = body {
            request = request.json(&body);
        }
        let response = request.send().await.expect("Request failed");
        let status = response.status();
        let body = response.json().await.unwrap_or(Value::Null);
        (status, body)
    }

    /// Open a job card in `service_center_id`.
    ///
    /// # Panics
    ///
    /// Panics unless the server answers 201.
    pub async fn create_job_card(&self, service_center_id: i32) -> Value {
        let (status, body) = self
            .send(
                Method::POST,
                "/job-cards",
                actors::SERVICE_MANAGER,
                Some(serde_json::json!({ "serviceCenterId": service_center_id })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        body
    }

    /// Open a request for `quantity` units of `part` on a fresh job card.
    ///
    /// # Panics
    ///
    /// Panics unless both calls succeed.
    pub async fn create_request(&self, service_center_id: i32, part: &CatalogPart, quantity: i32) -> Value {
        let job_card = self.create_job_card(service_center_id).await;
        let (status, body) = self
            .send(
                Method::POST,
                "/parts-issues",
                actors::TECHNICIAN,
                Some(serde_json::json!({
                    "jobCardId": job_card["id"],
                    "items": [{ "partId": part.part_id.as_i32(), "quantity": quantity }],
                })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        body
    }

    /// Create a request and take it through both approvals, approving
    /// `approved` of the `requested` units.
    ///
    /// # Panics
    ///
    /// Panics unless every call succeeds.
    pub async fn approved_request(
        &self,
        service_center_id: i32,
        part: &CatalogPart,
        requested: i32,
        approved: i32,
    ) -> Value {
        let created = self.create_request(service_center_id, part, requested).await;
        let id = &created["id"];

        let (status, body) = self
            .send(
                Method::PATCH,
                &format!("/parts-issues/{id}/sc-approve"),
                actors::SERVICE_MANAGER,
                Some(serde_json::json!({ "version": created["version"] })),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{body}");

        let (status, body) = self
            .send(
                Method::PATCH,
                &format!("/parts-issues/{id}/admin-approve"),
                actors::CENTRAL_ADMIN,
                Some(serde_json::json!({
                    "version": body["version"],
                    "items": [{ "itemId": body["items"][0]["id"], "approvedQty": approved }],
                })),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        body
    }
}

/// A fresh hex string for codes and keys.
#[must_use]
pub fn unique_suffix() -> String {
    Uuid::new_v4().simple().to_string().to_uppercase()
}
