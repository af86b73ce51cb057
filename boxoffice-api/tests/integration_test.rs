use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
    Router,
};
use chrono::Utc;
use jsonwebtoken::{encode, EncodingKey, Header};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

use boxoffice_api::middleware::{Claims, RateLimiter};
use boxoffice_api::{app, AppState, AuthConfig};
use boxoffice_core::{Clock, ManualClock, SeatCategory};
use boxoffice_reservation::{EngineParts, ReservationEngine, ReservationSettings, RoomHub};
use boxoffice_store::memory::SeededEvent;
use boxoffice_store::{MemoryJobQueue, MemoryLedger, MemoryLockService};

const SECRET: &str = "test-secret";

/// Counts calls per key in process.
#[derive(Default)]
struct CountingLimiter {
    counts: Mutex<HashMap<String, i64>>,
}

#[async_trait]
impl RateLimiter for CountingLimiter {
    async fn allow(&self, key: &str, limit: i64, _window_seconds: i64) -> bool {
        let mut counts = self.counts.lock().unwrap();
        let count = counts.entry(key.to_string()).or_insert(0);
        *count += 1;
        *count <= limit
    }
}

struct TestApp {
    router: Router,
    ledger: MemoryLedger,
    clock: Arc<ManualClock>,
}

impl TestApp {
    fn new(booking_per_minute: i64) -> Self {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let ledger = MemoryLedger::new();
        let hub = Arc::new(RoomHub::new(16));

        let engine = Arc::new(ReservationEngine::new(
            EngineParts {
                ledger: Arc::new(ledger.clone()),
                bookings: Arc::new(ledger.clone()),
                locks: Arc::new(MemoryLockService::new(clock.clone())),
                jobs: Arc::new(MemoryJobQueue::new(clock.clone(), Duration::from_secs(30))),
                fanout: hub.clone(),
                clock: clock.clone(),
            },
            ReservationSettings::default(),
        ));

        let state = AppState {
            engine,
            hub: hub.clone(),
            fanout: hub,
            rate_limiter: Arc::new(CountingLimiter::default()),
            booking_per_minute,
            auth: AuthConfig {
                secret: SECRET.to_string(),
            },
        };

        Self {
            router: app(state),
            ledger,
            clock,
        }
    }

    fn show(&self, seats: i32, starts_in: chrono::Duration) -> SeededEvent {
        self.ledger.seed_event(
            self.clock.now() + starts_in,
            dec!(100),
            &[("A", seats, SeatCategory::Standard)],
        )
    }

    async fn call(&self, method: &str, uri: &str, user: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(user) = user {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token(user)));
        }
        let body = match body {
            Some(json) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(serde_json::to_vec(&json).unwrap())
            }
            None => Body::empty(),
        };

        let response = self.router.clone().oneshot(builder.body(body).unwrap()).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, value)
    }
}

fn token(sub: &str) -> String {
    let claims = Claims {
        sub: sub.to_string(),
        role: "customer".to_string(),
        exp: (Utc::now() + chrono::Duration::hours(1)).timestamp() as usize,
    };
    encode(&Header::default(), &claims, &EncodingKey::from_secret(SECRET.as_bytes())).unwrap()
}

fn decimal(value: &Value) -> Decimal {
    Decimal::from_str(value.as_str().unwrap()).unwrap()
}

#[tokio::test]
async fn test_health() {
    let app = TestApp::new(0);
    let (status, body) = app.call("GET", "/health", None, None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "status": "ok" }));
}

#[tokio::test]
async fn test_seat_map_is_public() {
    let app = TestApp::new(0);
    let show = app.show(3, chrono::Duration::days(1));

    let (status, body) = app
        .call("GET", &format!("/v1/events/{}/seats", show.event_id), None, None)
        .await;

    assert_eq!(status, StatusCode::OK);
    let seats = body["seats"].as_array().unwrap();
    assert_eq!(seats.len(), 3);
    assert!(seats.iter().all(|s| s["status"] == "available"));
    assert_eq!(seats[0]["seat_number"], 1);
}

#[tokio::test]
async fn test_protected_routes_require_token() {
    let app = TestApp::new(0);
    let show = app.show(1, chrono::Duration::days(1));
    let uri = format!("/v1/events/{}/holds", show.event_id);

    let (status, _) = app
        .call("POST", &uri, None, Some(json!({ "seat_ids": show.seat_ids })))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let request = Request::builder()
        .method("GET")
        .uri("/v1/bookings")
        .header(header::AUTHORIZATION, "Bearer not-a-jwt")
        .body(Body::empty())
        .unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_hold_confirm_cancel_flow() {
    let app = TestApp::new(0);
    let show = app.show(2, chrono::Duration::days(1));
    let event_id = show.event_id;

    // 1. Hold
    let (status, receipt) = app
        .call(
            "POST",
            &format!("/v1/events/{}/holds", event_id),
            Some("alice"),
            Some(json!({ "seat_ids": show.seat_ids })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(receipt["seat_ids"].as_array().unwrap().len(), 2);
    assert!(receipt["expires_at"].is_string());

    let (status, hold) = app
        .call("GET", &format!("/v1/events/{}/holds/me", event_id), Some("alice"), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(hold["holder_id"], "alice");

    let (_, seats) = app
        .call("GET", &format!("/v1/events/{}/seats", event_id), None, None)
        .await;
    assert!(seats["seats"].as_array().unwrap().iter().all(|s| s["status"] == "held"));

    // 2. Confirm
    let (status, booking) = app
        .call(
            "POST",
            "/v1/bookings/confirm",
            Some("alice"),
            Some(json!({ "event_id": event_id, "seat_ids": show.seat_ids, "payment_ref": "pay_123" })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(decimal(&booking["total_amount"]), dec!(200));
    let booking_id = booking["booking_id"].as_str().unwrap().to_string();

    // 3. Reads are scoped to the owner
    let (status, list) = app.call("GET", "/v1/bookings", Some("alice"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list.as_array().unwrap().len(), 1);
    assert_eq!(list[0]["status"], "confirmed");

    let (status, details) = app
        .call("GET", &format!("/v1/bookings/{}", booking_id), Some("alice"), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(details["seats"].as_array().unwrap().len(), 2);

    let (status, _) = app
        .call("GET", &format!("/v1/bookings/{}", booking_id), Some("bob"), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // 4. Cancel, then cancel again
    let (status, cancelled) = app
        .call("POST", &format!("/v1/bookings/{}/cancel", booking_id), Some("alice"), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cancelled["seat_ids"].as_array().unwrap().len(), 2);

    let (status, body) = app
        .call("POST", &format!("/v1/bookings/{}/cancel", booking_id), Some("alice"), None)
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["error"].is_string());

    let (_, seats) = app
        .call("GET", &format!("/v1/events/{}/seats", event_id), None, None)
        .await;
    assert!(seats["seats"].as_array().unwrap().iter().all(|s| s["status"] == "available"));
}

#[tokio::test]
async fn test_conflict_names_blocking_seats() {
    let app = TestApp::new(0);
    let show = app.show(2, chrono::Duration::days(1));
    let uri = format!("/v1/events/{}/holds", show.event_id);

    let (status, _) = app
        .call("POST", &uri, Some("alice"), Some(json!({ "seat_ids": [show.seat_ids[0]] })))
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = app
        .call("POST", &uri, Some("bob"), Some(json!({ "seat_ids": show.seat_ids })))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["seats"][0]["seat_id"], json!(show.seat_ids[0]));
    assert_eq!(body["seats"][0]["reason"], "unavailable");

    // Bob's other seat was not taken
    let (_, seats) = app
        .call("GET", &format!("/v1/events/{}/seats", show.event_id), None, None)
        .await;
    let available = seats["seats"]
        .as_array()
        .unwrap()
        .iter()
        .filter(|s| s["status"] == "available")
        .count();
    assert_eq!(available, 1);
}

#[tokio::test]
async fn test_bad_requests() {
    let app = TestApp::new(0);
    let show = app.show(1, chrono::Duration::days(1));

    let (status, body) = app
        .call(
            "POST",
            &format!("/v1/events/{}/holds", show.event_id),
            Some("alice"),
            Some(json!({ "seat_ids": [] })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());

    let (status, _) = app
        .call(
            "POST",
            &format!("/v1/events/{}/holds", show.event_id),
            Some("alice"),
            Some(json!({ "seat_ids": [Uuid::new_v4()] })),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = app
        .call("GET", &format!("/v1/events/{}/holds/me", show.event_id), Some("alice"), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_confirm_without_payment_ref() {
    let app = TestApp::new(0);
    let show = app.show(1, chrono::Duration::days(1));

    app.call(
        "POST",
        &format!("/v1/events/{}/holds", show.event_id),
        Some("alice"),
        Some(json!({ "seat_ids": show.seat_ids })),
    )
    .await;

    let (status, booking) = app
        .call(
            "POST",
            "/v1/bookings/confirm",
            Some("alice"),
            Some(json!({ "event_id": show.event_id, "seat_ids": show.seat_ids })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let (_, details) = app
        .call("GET", &format!("/v1/bookings/{}", booking["booking_id"].as_str().unwrap()), Some("alice"), None)
        .await;
    assert_eq!(details["payment_ref"], "");
}

#[tokio::test]
async fn test_release_returns_changed_seats() {
    let app = TestApp::new(0);
    let show = app.show(2, chrono::Duration::days(1));

    app.call(
        "POST",
        &format!("/v1/events/{}/holds", show.event_id),
        Some("alice"),
        Some(json!({ "seat_ids": [show.seat_ids[0]] })),
    )
    .await;

    let (status, body) = app
        .call(
            "POST",
            &format!("/v1/events/{}/holds/release", show.event_id),
            Some("alice"),
            Some(json!({ "seat_ids": show.seat_ids })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["released"], json!([show.seat_ids[0]]));
}

#[tokio::test]
async fn test_cancel_after_show_start_is_rejected() {
    let app = TestApp::new(0);
    let show = app.show(1, chrono::Duration::hours(1));

    app.call(
        "POST",
        &format!("/v1/events/{}/holds", show.event_id),
        Some("alice"),
        Some(json!({ "seat_ids": show.seat_ids })),
    )
    .await;
    let (_, booking) = app
        .call(
            "POST",
            "/v1/bookings/confirm",
            Some("alice"),
            Some(json!({ "event_id": show.event_id, "seat_ids": show.seat_ids, "payment_ref": "pay" })),
        )
        .await;

    app.clock.advance(chrono::Duration::hours(2));

    let (status, body) = app
        .call(
            "POST",
            &format!("/v1/bookings/{}/cancel", booking["booking_id"].as_str().unwrap()),
            Some("alice"),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "cannot cancel after the show has started");
}

#[tokio::test]
async fn test_booking_routes_are_rate_limited() {
    let app = TestApp::new(2);
    let show = app.show(3, chrono::Duration::days(1));
    let uri = format!("/v1/events/{}/holds", show.event_id);

    for seat in &show.seat_ids[..2] {
        let (status, _) = app
            .call("POST", &uri, Some("alice"), Some(json!({ "seat_ids": [seat] })))
            .await;
        assert_eq!(status, StatusCode::CREATED);
    }

    let (status, body) = app
        .call("POST", &uri, Some("alice"), Some(json!({ "seat_ids": [show.seat_ids[2]] })))
        .await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["error"], "Rate limit exceeded");

    // Other requesters and unlimited routes are unaffected
    let (status, _) = app
        .call("POST", &uri, Some("bob"), Some(json!({ "seat_ids": [show.seat_ids[2]] })))
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, _) = app.call("GET", "/v1/bookings", Some("alice"), None).await;
    assert_eq!(status, StatusCode::OK);
}
