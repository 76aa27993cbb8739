//! HTTP integration tests for purchasing, status polling, discovery and the
//! counterparty pull callback.

#![allow(clippy::expect_used, clippy::unwrap_used)]

mod support;

use axum::http::{Method, StatusCode};
use serde_json::json;
use support::{eventually, spawn_app};

#[tokio::test]
async fn test_health() {
    let app = spawn_app();
    let (status, body) = app.get("/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_priced_purchase_returns_invoice_and_pending_ticket() {
    let app = spawn_app();
    let event = app.seed_event(10, 2_500).await;

    let (status, body) = app.purchase(&event, Some("$alice@example.com")).await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["payment_required"], true);
    assert_eq!(body["ticket"]["status"], "pending");
    assert_eq!(body["payment"]["status"], "pending");
    assert_eq!(body["invoice"]["amount"], 2_500);
    assert_eq!(body["payment"]["invoice"], body["invoice"]["encoded"]);

    let ticket_id = body["ticket"]["id"].as_str().unwrap();
    assert_eq!(app.ticket_status(ticket_id).await, "pending");
}

#[tokio::test]
async fn test_free_event_issues_ticket_without_payment() {
    let app = spawn_app();
    let event = app.seed_event(10, 0).await;

    let (status, body) = app.purchase(&event, None).await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["payment_required"], false);
    assert_eq!(body["ticket"]["status"], "free");
    assert!(body["payment"].is_null());
    assert!(body["invoice"].is_null());
    assert_eq!(app.processor.issued_count(), 0);
}

#[tokio::test]
async fn test_capacity_boundary_rejects_extra_purchase() {
    let app = spawn_app();
    let event = app.seed_event(3, 1_000).await;

    for _ in 0..3 {
        let (status, _) = app.purchase(&event, Some("$bob@example.com")).await;
        assert_eq!(status, StatusCode::CREATED);
    }
    let (status, body) = app.purchase(&event, Some("$bob@example.com")).await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "SOLD_OUT");
    assert_eq!(app.processor.issued_count(), 3);
}

#[tokio::test]
async fn test_malformed_addresses_rejected_before_issuance() {
    let app = spawn_app();
    let event = app.seed_event(10, 1_000).await;

    for bad in ["alice@example.com", "invalid"] {
        let (status, body) = app.purchase(&event, Some(bad)).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY, "{bad}");
        assert_eq!(body["code"], "VALIDATION_ERROR");
    }
    assert_eq!(app.processor.issued_count(), 0);

    let (status, _) = app.purchase(&event, Some("$alice@example.com")).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(app.processor.issued_count(), 1);
}

#[tokio::test]
async fn test_unknown_event_and_ticket_are_404() {
    let app = spawn_app();

    let (status, _) = app
        .send_json(
            Method::POST,
            &format!("/api/events/{}/purchase", uuid::Uuid::new_v4()),
            &json!({ "user_id": uuid::Uuid::new_v4(), "buyer_address": "$a@b.example" }),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = app.get(&format!("/api/tickets/{}", uuid::Uuid::new_v4())).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_processor_outage_is_503_and_stores_nothing() {
    let app = spawn_app();
    let event = app.seed_event(1, 1_000).await;
    app.processor.fail_next_invoice();

    let (status, _) = app.purchase(&event, Some("$alice@example.com")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

    // The single slot is still available
    let (status, _) = app.purchase(&event, Some("$alice@example.com")).await;
    assert_eq!(status, StatusCode::CREATED);
}

#[tokio::test]
async fn test_push_carries_ticket_callback() {
    let app = spawn_app();
    let event = app.seed_event(10, 1_000).await;

    let (_, body) = app.purchase(&event, Some("$carol@wallet.example")).await;
    let ticket_id = body["ticket"]["id"].as_str().unwrap().to_string();

    let uma = app.uma.clone();
    eventually(|| uma.pushed().len() == 1).await;
    let pushed = app.uma.pushed();
    assert_eq!(
        pushed[0].callback,
        format!("https://tickets.example/api/uma/payreq/{ticket_id}")
    );
    assert_eq!(pushed[0].receiver_uma, "$tickets@tickets.example");
    assert_eq!(app.uma.discovered(), vec!["wallet.example".to_string()]);
}

#[tokio::test]
async fn test_pull_callback_returns_stored_invoice() {
    let app = spawn_app();
    let event = app.seed_event(10, 1_000).await;
    let (_, body) = app.purchase(&event, Some("$carol@wallet.example")).await;
    let ticket_id = body["ticket"]["id"].as_str().unwrap();
    let encoded = body["invoice"]["encoded"].as_str().unwrap();
    let uri = format!("/api/uma/payreq/{ticket_id}");

    let (status, bare) = app
        .send_json(Method::POST, &uri, &json!({ "amount": 1_000_000 }))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(bare, json!({ "pr": encoded, "routes": [] }));

    let (status, rich) = app
        .send_json(
            Method::POST,
            &uri,
            &json!({
                "amount": 1_000_000,
                "receivingCurrencyCode": "SAT",
                "payerData": { "identifier": "$carol@wallet.example" },
                "umaMajorVersion": 1
            }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(rich["pr"], encoded);
    assert_eq!(rich["converted"]["amount"], 1_000);
    assert_eq!(rich["umaMajorVersion"], 1);

    let (status, query) = app.get(&format!("{uri}?amount=1000000")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(query["pr"], encoded);
}

#[tokio::test]
async fn test_pull_callback_errors_are_200_envelopes() {
    let app = spawn_app();

    let (status, body) = app
        .send_json(
            Method::POST,
            &format!("/api/uma/payreq/{}", uuid::Uuid::new_v4()),
            &json!({ "amount": 1_000 }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ERROR");

    let event = app.seed_event(10, 1_000).await;
    let (_, purchase) = app.purchase(&event, Some("$carol@wallet.example")).await;
    let ticket_id = purchase["ticket"]["id"].as_str().unwrap();

    let (status, body) = app
        .send(
            axum::http::Request::builder()
                .method(Method::POST)
                .uri(format!("/api/uma/payreq/{ticket_id}"))
                .body(axum::body::Body::from("not json"))
                .unwrap(),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ERROR");
}

#[tokio::test]
async fn test_discovery_documents() {
    let app = spawn_app();

    let (status, lnurlp) = app.get("/.well-known/lnurlp/tickets").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(lnurlp["tag"], "payRequest");
    assert_eq!(lnurlp["callback"], "https://tickets.example/api/uma/callback");
    assert_eq!(lnurlp["umaVersion"], "1.0,0.0");

    let (status, _) = app.get("/.well-known/lnurlp/someone").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, configuration) = app.get("/.well-known/uma-configuration").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(configuration["uma_major_versions"], json!([1, 0]));
}

#[tokio::test]
async fn test_amount_callback_matches_oldest_pending() {
    let app = spawn_app();
    let event = app.seed_event(10, 4_200).await;
    let (_, body) = app.purchase(&event, Some("$dan@wallet.example")).await;

    let (status, response) = app.get("/api/uma/callback?amount=4200000").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(response["pr"], body["invoice"]["encoded"]);

    let (status, missing) = app.get("/api/uma/callback?amount=1000").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(missing["status"], "ERROR");
}
