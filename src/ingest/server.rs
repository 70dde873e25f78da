use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use tracing::{debug, warn};

use super::auth::check_bearer;
use super::rate_limit::RateLimiter;
use super::publish::publish_with_retry;
use crate::bus::EventBus;
use crate::clock::SharedClock;
use crate::config::IngestConfig;
use crate::error::IngestError;
use crate::metrics::Metrics;
use crate::telemetry::{SchemaVersionOutcome, TelemetryEvent, ValidationError};

#[derive(Clone)]
pub struct IngestState {
    pub bus: Arc<dyn EventBus>,
    pub clock: SharedClock,
    pub config: IngestConfig,
    pub rate_limiter: Arc<RateLimiter>,
    pub metrics: Arc<Metrics>,
}

pub fn build_router(state: IngestState) -> Router {
    Router::new()
        .route("/events", post(post_event))
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .layer(tower_http::limit::RequestBodyLimitLayer::new(state.config.body_max_bytes))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct AcceptedResponse {
    status: &'static str,
    event_id: uuid::Uuid,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

async fn post_event(
    State(state): State<IngestState>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Response {
    let now_ms = state.clock.now_ms();

    if body.len() > state.config.body_max_bytes {
        state.metrics.ingest_requests_total.with_label_values(&["413"]).inc();
        return status_error(StatusCode::PAYLOAD_TOO_LARGE, "request body exceeds configured maximum");
    }

    let mut event: TelemetryEvent = match serde_json::from_slice(&body) {
        Ok(event) => event,
        Err(e) => {
            state.metrics.ingest_requests_total.with_label_values(&["400"]).inc();
            return status_error(StatusCode::BAD_REQUEST, &format!("malformed event payload: {e}"));
        }
    };

    match event.validate(now_ms, state.config.strict_schema_version) {
        Ok(SchemaVersionOutcome::Future) => {
            debug!(event_id = %event.event_id, schema_version = %event.schema_version, "accepted forward-compatible schema_version");
        }
        Ok(_) => {}
        Err(e) => {
            state.metrics.ingest_requests_total.with_label_values(&["400"]).inc();
            return status_error(StatusCode::BAD_REQUEST, &validation_message(&e));
        }
    }

    if let Err(IngestError::Unauthorized) = check_bearer(&headers, &state.config.auth_tokens) {
        state.metrics.ingest_requests_total.with_label_values(&["401"]).inc();
        return status_error(StatusCode::UNAUTHORIZED, "missing or invalid bearer token");
    }

    if let Err(retry_after_ms) = state.rate_limiter.check_and_consume(&event.client_id, now_ms) {
        state.metrics.rate_limit_drops_total.inc();
        state.metrics.ingest_requests_total.with_label_values(&["429"]).inc();
        let mut response = status_error(StatusCode::TOO_MANY_REQUESTS, "rate limit exceeded");
        if let Ok(value) = retry_after_ms.to_string().parse::<axum::http::HeaderValue>() {
            response.headers_mut().insert("retry-after-ms", value);
        }
        return response;
    }

    event.recv_ts_ms = Some(now_ms);

    if let Err(e) = publish_with_retry(state.bus.as_ref(), &event, state.config.publish_timeout_ms).await {
        warn!(error = %e, event_id = %event.event_id, "publish failed after retry");
        state.metrics.publish_failures_total.with_label_values(&["deadline_or_bus_error"]).inc();
        state.metrics.ingest_requests_total.with_label_values(&["500"]).inc();
        return status_error(StatusCode::INTERNAL_SERVER_ERROR, "publish failed, please retry");
    }

    state.metrics.ingest_requests_total.with_label_values(&["202"]).inc();
    (
        StatusCode::ACCEPTED,
        Json(AcceptedResponse {
            status: "accepted",
            event_id: event.event_id,
        }),
    )
        .into_response()
}

fn validation_message(e: &ValidationError) -> String {
    e.to_string()
}

fn status_error(status: StatusCode, message: &str) -> Response {
    (status, Json(ErrorResponse { error: message.to_string() })).into_response()
}

async fn health() -> impl IntoResponse {
    StatusCode::OK
}

async fn metrics(State(state): State<IngestState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        state.metrics.encode(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::InMemoryBus;
    use crate::clock::FakeClock;
    use crate::config::IngestConfig;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn test_state() -> IngestState {
        IngestState {
            bus: Arc::new(InMemoryBus::new()),
            clock: Arc::new(FakeClock::new(1_700_000_000_000)),
            config: IngestConfig {
                listen_addr: "0.0.0.0:0".to_string(),
                rate_limit_rps: 100.0,
                rate_limit_burst: 20,
                body_max_bytes: 65_536,
                publish_timeout_ms: 5_000,
                strict_schema_version: false,
                auth_tokens: Vec::new(),
            },
            rate_limiter: Arc::new(RateLimiter::new(100.0, 20)),
            metrics: Arc::new(Metrics::new()),
        }
    }

    fn valid_body() -> String {
        serde_json::json!({
            "schema_version": "1.0",
            "event_id": uuid::Uuid::new_v4(),
            "client_id": "client-a",
            "target": "example.com",
            "ts_ms": 1_700_000_000_000i64,
            "timings": {"dns_ms": 10.0, "tcp_ms": 20.0, "tls_ms": 30.0, "ttfb_ms": 40.0}
        })
        .to_string()
    }

    #[tokio::test]
    async fn accepts_valid_event() {
        let router = build_router(test_state());
        let response = router
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/events")
                    .header("content-type", "application/json")
                    .body(Body::from(valid_body()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn rejects_malformed_json() {
        let router = build_router(test_state());
        let response = router
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/events")
                    .header("content-type", "application/json")
                    .body(Body::from("not json"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn health_endpoint_returns_ok() {
        let router = build_router(test_state());
        let response = router
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
