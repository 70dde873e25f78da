//! Ingest HTTP surface exercised through the real router, asserting not
//! just status codes but that accepted events actually reach the bus and
//! rejected ones never do.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use qos_pipeline::bus::InMemoryBus;
use qos_pipeline::clock::FakeClock;
use qos_pipeline::config::IngestConfig;
use qos_pipeline::ingest::{build_router, IngestState, RateLimiter};
use qos_pipeline::metrics::Metrics;
use tower::ServiceExt;

fn config() -> IngestConfig {
    IngestConfig {
        listen_addr: "0.0.0.0:0".to_string(),
        rate_limit_rps: 100.0,
        rate_limit_burst: 20,
        body_max_bytes: 65_536,
        publish_timeout_ms: 5_000,
        strict_schema_version: false,
        auth_tokens: Vec::new(),
    }
}

fn state_with(bus: Arc<InMemoryBus>, config: IngestConfig) -> (IngestState, Arc<InMemoryBus>) {
    let state = IngestState {
        bus: bus.clone(),
        clock: Arc::new(FakeClock::new(1_700_000_000_000)),
        config: config.clone(),
        rate_limiter: Arc::new(RateLimiter::new(config.rate_limit_rps, config.rate_limit_burst)),
        metrics: Arc::new(Metrics::new()),
    };
    (state, bus)
}

fn valid_body(client_id: &str) -> String {
    serde_json::json!({
        "schema_version": "1.0",
        "event_id": uuid::Uuid::new_v4(),
        "client_id": client_id,
        "target": "example.com",
        "ts_ms": 1_700_000_000_000i64,
        "timings": {"dns_ms": 10.0, "tcp_ms": 20.0, "tls_ms": 30.0, "ttfb_ms": 40.0}
    })
    .to_string()
}

fn post(body: String) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/events")
        .header("content-type", "application/json")
        .body(Body::from(body))
        .unwrap()
}

#[tokio::test]
async fn accepted_event_is_published_to_the_bus() {
    let bus = Arc::new(InMemoryBus::new());
    let (state, bus) = state_with(bus, config());
    let router = build_router(state);

    let response = router.oneshot(post(valid_body("client-a"))).await.unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert_eq!(bus.pending_len().await, 1);
}

#[tokio::test]
async fn rate_limited_client_never_reaches_the_bus() {
    let bus = Arc::new(InMemoryBus::new());
    let mut cfg = config();
    cfg.rate_limit_burst = 1;
    let (state, bus) = state_with(bus, cfg);
    let router = build_router(state);

    let first = router.clone().oneshot(post(valid_body("client-a"))).await.unwrap();
    assert_eq!(first.status(), StatusCode::ACCEPTED);

    let second = router.oneshot(post(valid_body("client-a"))).await.unwrap();
    assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(bus.pending_len().await, 1);
}

#[tokio::test]
async fn missing_bearer_token_is_rejected_before_publish() {
    let bus = Arc::new(InMemoryBus::new());
    let mut cfg = config();
    cfg.auth_tokens = vec!["secret".to_string()];
    let (state, bus) = state_with(bus, cfg);
    let router = build_router(state);

    let response = router.oneshot(post(valid_body("client-a"))).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(bus.pending_len().await, 0);
}
