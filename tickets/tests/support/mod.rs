//! Shared setup for HTTP integration tests: the full router over in-memory
//! storage and mock collaborators.

#![allow(dead_code)]

use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;
use uma_tickets::bootstrap::{Resources, assemble};
use uma_tickets::config::Config;
use uma_tickets::mocks::{MockLightningProcessor, MockUmaClient, MockWalletConnector, RecordingNotifier};
use uma_tickets::store::{InMemoryTicketStore, TicketStore};
use uma_tickets::{Event, EventId, Sats};
use uma_tickets_core::environment::Clock;
use uma_tickets_testing::test_clock;

pub const WEBHOOK_SECRET: &str = "integration-secret";

pub struct TestApp {
    pub app: Router,
    pub store: Arc<InMemoryTicketStore>,
    pub processor: Arc<MockLightningProcessor>,
    pub wallet: Arc<MockWalletConnector>,
    pub uma: Arc<MockUmaClient>,
    pub notifier: Arc<RecordingNotifier>,
}

pub fn config() -> Config {
    let mut config = Config::from_env();
    config.uma.base_url = "https://tickets.example".to_string();
    config.uma.receiving_address = "$tickets@tickets.example".to_string();
    config.uma.supported_versions = vec![1, 0];
    config.lightning.webhook_secret = WEBHOOK_SECRET.to_string();
    config.lightning.invoice_expiry_secs = 600;
    config
}

pub fn spawn_app() -> TestApp {
    spawn_app_with(MockWalletConnector::new(), MockUmaClient::new())
}

pub fn spawn_app_with(wallet: MockWalletConnector, uma: MockUmaClient) -> TestApp {
    let store = Arc::new(InMemoryTicketStore::new());
    let processor = MockLightningProcessor::shared();
    let wallet = Arc::new(wallet);
    let uma = Arc::new(uma);
    let notifier = Arc::new(RecordingNotifier::new());

    let resources = Resources::with_store(
        store.clone(),
        processor.clone(),
        wallet.clone(),
        uma.clone(),
        notifier.clone(),
    )
    .with_clock(Arc::new(test_clock()));
    let services = assemble(resources, &config()).expect("services assemble");

    TestApp {
        app: uma_tickets::server::build_router(services.state),
        store,
        processor,
        wallet,
        uma,
        notifier,
    }
}

impl TestApp {
    pub async fn seed_event(&self, capacity: u32, price: u64) -> Event {
        let now = test_clock().now();
        let event = Event {
            id: EventId::new(),
            title: "Lightning Summit".to_string(),
            starts_at: now,
            ends_at: now,
            capacity,
            price: Sats::new(price),
            active: true,
        };
        self.store.put_event(&event).await.expect("seed event");
        event
    }

    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.app.clone().oneshot(request).await.expect("router responds");
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("read body");
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).expect("JSON body")
        };
        (status, body)
    }

    pub async fn get(&self, uri: &str) -> (StatusCode, Value) {
        self.send(
            Request::builder()
                .uri(uri)
                .body(Body::empty())
                .expect("request"),
        )
        .await
    }

    pub async fn send_json(&self, method: Method, uri: &str, body: &Value) -> (StatusCode, Value) {
        self.send(
            Request::builder()
                .method(method)
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .expect("request"),
        )
        .await
    }

    pub async fn purchase(&self, event: &Event, buyer: Option<&str>) -> (StatusCode, Value) {
        self.send_json(
            Method::POST,
            &format!("/api/events/{}/purchase", event.id),
            &serde_json::json!({
                "user_id": uuid::Uuid::new_v4(),
                "buyer_address": buyer,
            }),
        )
        .await
    }

    pub async fn ticket_status(&self, ticket_id: &str) -> String {
        let (status, body) = self.get(&format!("/api/tickets/{ticket_id}")).await;
        assert_eq!(status, StatusCode::OK);
        body["ticket"]["status"].as_str().unwrap_or_default().to_string()
    }
}

/// Poll `check` until it holds; background dispatches finish asynchronously.
pub async fn eventually<F>(mut check: F)
where
    F: FnMut() -> bool,
{
    for _ in 0..100 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(check(), "condition not reached in time");
}
