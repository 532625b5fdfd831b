use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use chrono::{Duration as ChronoDuration, Utc};
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use tembea_api::middleware::{CustomerClaims, RateLimiter};
use tembea_api::{app, AppState, AuthConfig};
use tembea_catalog::ResourceInventory;
use tembea_core::notify::RecordingNotifier;
use tembea_core::{BookableUnit, PaymentMetadata, PaymentMethod, PaymentStatus};
use tembea_gateway::MockGateway;
use tembea_order::{
    BookingLifecycle, GatewayRegistry, PaymentReconciler, ReservationEngine,
};
use tembea_store::app_config::RateLimitConfig;
use tembea_store::MemoryStore;
use tower::ServiceExt;

const SECRET: &str = "test-secret";

struct TestApp {
    router: Router,
    gateway: Arc<MockGateway>,
    notifier: Arc<RecordingNotifier>,
}

/// Turns every caller away.
struct ClosedLimiter;

#[async_trait]
impl RateLimiter for ClosedLimiter {
    async fn allow(&self, _caller: &str, _limit: i64, _window_seconds: i64) -> anyhow::Result<bool> {
        Ok(false)
    }
}

async fn test_app() -> TestApp {
    test_app_with(None).await
}

async fn test_app_with(rate_limiter: Option<Arc<dyn RateLimiter>>) -> TestApp {
    let store = Arc::new(MemoryStore::new());
    let inventory = Arc::new(ResourceInventory::new(store.clone()));
    inventory
        .register(
            &BookableUnit::flight("FL100", 2, 20_000, "KES")
                .with_slots(vec!["12A".to_string(), "12B".to_string()]),
        )
        .await
        .unwrap();

    let gateway = Arc::new(MockGateway::new(PaymentMethod::Paystack));
    let notifier = Arc::new(RecordingNotifier::new());
    let lifecycle = Arc::new(BookingLifecycle::new(store.clone()));
    let registry = GatewayRegistry::new(Duration::from_secs(1), 5, Duration::from_secs(30))
        .with(gateway.clone());
    let reconciler = Arc::new(PaymentReconciler::new(
        store,
        lifecycle.clone(),
        Arc::new(registry),
        notifier.clone(),
        "KES",
    ));
    let reservations = Arc::new(ReservationEngine::new(
        inventory,
        lifecycle.clone(),
        notifier.clone(),
    ));

    let state = AppState {
        reservations,
        lifecycle,
        reconciler,
        rate_limiter,
        rate_limit: RateLimitConfig::default(),
        auth: AuthConfig {
            secret: SECRET.to_string(),
        },
    };

    TestApp {
        router: app(state),
        gateway,
        notifier,
    }
}

fn token(user: &str) -> String {
    let claims = CustomerClaims {
        sub: user.to_string(),
        email: Some(format!("{}@example.com", user)),
        role: "CUSTOMER".to_string(),
        exp: (Utc::now() + ChronoDuration::hours(1)).timestamp() as usize,
    };
    encode(&Header::default(), &claims, &EncodingKey::from_secret(SECRET.as_bytes())).unwrap()
}

async fn send(app: &TestApp, method: &str, uri: &str, user: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(user) = user {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token(user)));
    }
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

async fn book_seat(app: &TestApp, user: &str, seat: &str) -> (StatusCode, Value) {
    send(
        app,
        "POST",
        "/v1/bookings",
        Some(user),
        Some(json!({"kind": "flight", "flight_number": "FL100", "seat_number": seat})),
    )
    .await
}

#[tokio::test]
async fn test_requests_without_token_are_rejected() {
    let app = test_app().await;
    let (status, _) = send(&app, "GET", "/v1/bookings", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_seat_cannot_be_booked_twice() {
    let app = test_app().await;

    let (status, booking) = book_seat(&app, "alice", "12A").await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(booking["status"], "pending");
    assert_eq!(booking["amount"], 20_000);

    let (status, body) = book_seat(&app, "bob", "12a").await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["error"].as_str().unwrap().contains("12A"));

    let (status, seats) = send(&app, "GET", "/v1/flights/fl100/seats", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(seats["available"], 1);
    assert_eq!(seats["seats"], json!(["12B"]));
}

#[tokio::test]
async fn test_booking_lifecycle_over_http() {
    let app = test_app().await;
    let (_, booking) = book_seat(&app, "alice", "12A").await;
    let id = booking["id"].as_str().unwrap().to_string();

    let (status, _) = send(&app, "POST", &format!("/v1/bookings/{}/check-in", id), Some("alice"), None).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    // Other requesters cannot see or touch it
    let (status, _) = send(&app, "POST", &format!("/v1/bookings/{}/cancel", id), Some("mallory"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    for _ in 0..2 {
        let (status, cancelled) =
            send(&app, "POST", &format!("/v1/bookings/{}/cancel", id), Some("alice"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(cancelled["status"], "cancelled");
    }

    let (_, seats) = send(&app, "GET", "/v1/flights/FL100/seats", None, None).await;
    assert_eq!(seats["available"], 2);

    let (status, list) = send(&app, "GET", "/v1/bookings", Some("alice"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_payment_confirms_booking_once() {
    let app = test_app().await;
    let (_, booking) = book_seat(&app, "alice", "12B").await;
    let id = booking["id"].as_str().unwrap().to_string();

    let (status, session) = send(
        &app,
        "POST",
        "/v1/payments",
        Some("alice"),
        Some(json!({"booking_id": id, "method": "paystack"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let reference = session["payment"]["reference"].as_str().unwrap().to_string();
    assert!(reference.starts_with("pay-"));

    let body = MockGateway::event_body(&reference, PaymentStatus::Success, &PaymentMetadata::default());
    for _ in 0..2 {
        let request = Request::builder()
            .method("POST")
            .uri("/v1/webhooks/paystack")
            .body(Body::from(body.clone()))
            .unwrap();
        let response = app.router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    app.gateway.set_outcome(&reference, PaymentStatus::Success);
    let (status, payment) = send(
        &app,
        "GET",
        &format!("/v1/payments/{}/verify", reference),
        Some("alice"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(payment["status"], "success");

    let (_, confirmed) = send(&app, "GET", &format!("/v1/bookings/{}", id), Some("alice"), None).await;
    assert_eq!(confirmed["status"], "confirmed");
    assert_eq!(app.notifier.sent().await.len(), 1);

    // Paid bookings cannot be paid again
    let (status, _) = send(
        &app,
        "POST",
        "/v1/payments",
        Some("alice"),
        Some(json!({"booking_id": id, "method": "paystack"})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = send(
        &app,
        "GET",
        &format!("/v1/payments/{}/verify", reference),
        Some("mallory"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_webhooks_are_always_acknowledged() {
    let app = test_app().await;

    for (provider, body) in [
        ("paystack", "not json".to_string()),
        ("paystack", json!({"reference": "pay-ffffffffff", "status": "success"}).to_string()),
        ("stripe", "{}".to_string()),
        ("carrier-pigeon", "{}".to_string()),
    ] {
        let request = Request::builder()
            .method("POST")
            .uri(format!("/v1/webhooks/{}", provider))
            .body(Body::from(body))
            .unwrap();
        let response = app.router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK, "provider {}", provider);
    }
    assert!(app.notifier.sent().await.is_empty());
}

#[tokio::test]
async fn test_gateway_outage_is_service_unavailable() {
    let app = test_app().await;
    let (_, booking) = book_seat(&app, "alice", "12A").await;
    app.gateway.set_failing(true);

    let (status, body) = send(
        &app,
        "POST",
        "/v1/payments",
        Some("alice"),
        Some(json!({"booking_id": booking["id"], "method": "paystack"})),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(body["error"].is_string());

    let (status, _) = send(
        &app,
        "POST",
        "/v1/payments",
        Some("alice"),
        Some(json!({"booking_id": booking["id"], "method": "stripe"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_metrics_are_exposed() {
    let app = test_app().await;
    book_seat(&app, "alice", "12A").await;

    let request = Request::builder().uri("/metrics").body(Body::empty()).unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let text = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert!(String::from_utf8_lossy(&text).contains("tembea_reservations_total"));
}

#[tokio::test]
async fn test_webhooks_bypass_the_rate_limiter() {
    let app = test_app_with(Some(Arc::new(ClosedLimiter))).await;

    let (status, _) = send(&app, "GET", "/v1/bookings", Some("alice"), None).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    let (status, _) = send(&app, "GET", "/v1/flights/FL100/seats", None, None).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);

    let request = Request::builder()
        .method("POST")
        .uri("/v1/webhooks/paystack")
        .body(Body::from(json!({"event": "charge.success"}).to_string()))
        .unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_second_charge_waits_for_the_first() {
    let app = test_app().await;
    let (_, booking) = book_seat(&app, "alice", "12A").await;
    let pay = json!({"booking_id": booking["id"], "method": "paystack"});

    let (status, _) = send(&app, "POST", "/v1/payments", Some("alice"), Some(pay.clone())).await;
    assert_eq!(status, StatusCode::CREATED);
    let (status, _) = send(&app, "POST", "/v1/payments", Some("alice"), Some(pay)).await;
    assert_eq!(status, StatusCode::CONFLICT);
}
