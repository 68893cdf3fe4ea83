//! Reads racing with writes.
//!
//! These tests require a running server and database.
//! Run with: `cargo test -p partsflow-integration-tests -- --ignored`

#![allow(clippy::unwrap_used)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use partsflow_integration_tests::{TestContext, actors};
use reqwest::{Method, StatusCode};
use rust_decimal::Decimal;
use serde_json::{Value, json};
use tokio::task::JoinSet;

/// Header and items of one listed request must come from the same version.
fn assert_whole(request: &Value) {
    let approved = request["items"][0]["approvedQty"].as_i64().unwrap();
    let expected = match request["status"].as_str().unwrap() {
        "PENDING_ADMIN_APPROVAL" => 10,
        "ADMIN_APPROVED" => 3,
        other => panic!("unexpected status {other}"),
    };
    assert_eq!(approved, expected, "{request}");
    let total: Decimal = request["totalAmount"].as_str().unwrap().parse().unwrap();
    assert_eq!(total, Decimal::from(approved * 40), "{request}");
}

#[tokio::test]
#[ignore = "Requires running server and database"]
async fn test_polling_during_admin_approval_sees_whole_requests() {
    let ctx = Arc::new(TestContext::new().await);
    let center = ctx.seed_service_center().await;
    let part = ctx.seed_part(40, 1000).await;

    let mut forwarded = Vec::new();
    for _ in 0..40 {
        let created = ctx.create_request(center.id.as_i32(), &part, 10).await;
        let (status, body) = ctx
            .send(
                Method::PATCH,
                &format!("/parts-issues/{}/sc-approve", created["id"]),
                actors::SERVICE_MANAGER,
                Some(json!({ "version": created["version"] })),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        forwarded.push(body);
    }

    let done = Arc::new(AtomicBool::new(false));
    let mut readers = JoinSet::new();
    for reader in 0..4 {
        let ctx = Arc::clone(&ctx);
        let done = Arc::clone(&done);
        let center_id = center.id.as_i32();
        readers.spawn(async move {
            let mut reads = 0;
            while !done.load(Ordering::Relaxed) {
                let path = if reader % 2 == 0 {
                    format!("/parts-issues?serviceCenterId={center_id}&limit=500")
                } else {
                    format!("/parts-issues/summary?serviceCenterId={center_id}")
                };
                let (status, body) = ctx.send(Method::GET, &path, actors::CENTRAL_ADMIN, None).await;
                assert_eq!(status, StatusCode::OK, "read {reads}: {body}");
                if let Some(requests) = body.as_array() {
                    requests.iter().for_each(assert_whole);
                }
                reads += 1;
            }
            reads
        });
    }

    for request in &forwarded {
        let (status, body) = ctx
            .send(
                Method::PATCH,
                &format!("/parts-issues/{}/admin-approve", request["id"]),
                actors::CENTRAL_ADMIN,
                Some(json!({
                    "version": request["version"],
                    "items": [{ "itemId": request["items"][0]["id"], "approvedQty": 3 }],
                })),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{body}");
    }
    done.store(true, Ordering::Relaxed);

    let mut total_reads = 0;
    while let Some(reads) = readers.join_next().await {
        total_reads += reads.unwrap();
    }
    assert!(total_reads > 0);
}
