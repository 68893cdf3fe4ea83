//! Document numbering and concurrent mutation tests.
//!
//! These tests require a running server and database.
//! Run with: `cargo test -p partsflow-integration-tests -- --ignored`

#![allow(clippy::unwrap_used)]

use std::collections::HashSet;
use std::sync::Arc;

use partsflow_integration_tests::{TestContext, actors};
use reqwest::{Method, StatusCode};
use serde_json::json;
use tokio::task::JoinSet;

#[tokio::test]
#[ignore = "Requires running server and database"]
async fn test_job_card_numbers_use_service_center_code() {
    let ctx = TestContext::new().await;
    let center = ctx.seed_service_center().await;

    let mut numbers = Vec::new();
    for claimed in ["ELSEWHERE", "SC999"] {
        let (status, body) = ctx
            .send(
                Method::POST,
                "/job-cards",
                actors::TECHNICIAN,
                Some(json!({
                    "serviceCenterId": center.id.as_i32(),
                    "locationCode": claimed,
                    "vehicleRegistration": "KA05MN4321",
                })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        numbers.push(body["jobCardNumber"].as_str().unwrap().to_string());
    }

    assert!(numbers[0].starts_with(&format!("{}-", center.code)), "{numbers:?}");
    assert!(numbers[0].ends_with("-0001"), "{numbers:?}");
    assert!(numbers[1].ends_with("-0002"), "{numbers:?}");
    assert_eq!(numbers[0][..numbers[0].len() - 4], numbers[1][..numbers[1].len() - 4]);
}

#[tokio::test]
#[ignore = "Requires running server and database"]
async fn test_concurrent_requests_get_distinct_numbers() {
    let ctx = Arc::new(TestContext::new().await);
    let center = ctx.seed_service_center().await;
    let part = ctx.seed_part(10, 100).await;

    let mut tasks = JoinSet::new();
    for _ in 0..8 {
        let ctx = Arc::clone(&ctx);
        let part = part.clone();
        let center_id = center.id.as_i32();
        tasks.spawn(async move { ctx.create_request(center_id, &part, 1).await });
    }

    let mut numbers = HashSet::new();
    while let Some(created) = tasks.join_next().await {
        let created = created.unwrap();
        numbers.insert(created["issueNumber"].as_str().unwrap().to_string());
    }
    assert_eq!(numbers.len(), 8);
}

#[tokio::test]
#[ignore = "Requires running server and database"]
async fn test_concurrent_dispatch_applies_once() {
    let ctx = TestContext::new().await;
    let center = ctx.seed_service_center().await;
    let part = ctx.seed_part(10, 100).await;
    let approved = ctx.approved_request(center.id.as_i32(), &part, 4, 4).await;

    let body = json!({
        "version": approved["version"],
        "items": [{ "itemId": approved["items"][0]["id"], "quantity": 3 }],
    });
    let path = format!("/parts-issues/{}/dispatch", approved["id"]);

    let (first, second) = tokio::join!(
        ctx.send(Method::PATCH, &path, actors::WAREHOUSE, Some(body.clone())),
        ctx.send(Method::PATCH, &path, actors::WAREHOUSE, Some(body.clone())),
    );

    let statuses = [first.0, second.0];
    assert_eq!(
        statuses.iter().filter(|s| **s == StatusCode::OK).count(),
        1,
        "{statuses:?}"
    );
    assert!(statuses.contains(&StatusCode::CONFLICT), "{statuses:?}");

    let (_, current) = ctx
        .send(
            Method::GET,
            &format!("/parts-issues/{}", approved["id"]),
            actors::WAREHOUSE,
            None,
        )
        .await;
    assert_eq!(current["items"][0]["issuedQty"], 3);
}
