//! End-to-end cart flows over the axum router with the in-memory store.
//!
//! These tests exercise the same wiring as `main`: cache, pending markers,
//! bus, and one reconciliation consumer per partition - only the durable
//! store is the in-memory implementation.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use pycshop_core::{ProductId, UserId};
use secrecy::SecretString;
use serde_json::{Value, json};
use tower::ServiceExt;

use pycshop_cart::cache::CartCache;
use pycshop_cart::config::CartConfig;
use pycshop_cart::db::MemoryCartStore;
use pycshop_cart::models::CartContents;
use pycshop_cart::routes;
use pycshop_cart::state::AppState;
use pycshop_cart::sync::{PendingSet, ReconcileConsumer, SyncBus, Sweeper};

struct TestApp {
    router: Router,
    cache: CartCache,
    store: Arc<MemoryCartStore>,
    pending: PendingSet,
    // Keeps the consumer's shutdown channel alive for the test's duration
    _shutdown_tx: tokio::sync::watch::Sender<bool>,
}

fn test_app(checkout_blocking: bool) -> TestApp {
    let mut config = CartConfig::local_defaults(SecretString::from(
        "postgres://localhost/pycshop_cart_test",
    ));
    config.checkout_blocking = checkout_blocking;

    // Lazy pool: never connected, readiness is not under test here
    let pool = sqlx::postgres::PgPoolOptions::new()
        .connect_lazy("postgres://localhost/pycshop_cart_test")
        .expect("lazy pool");

    let store = Arc::new(MemoryCartStore::new());
    let pending = PendingSet::new();
    let cache = CartCache::new(config.cart_ttl, store.clone(), pending.clone());
    let (producer, mut receivers) = SyncBus::new(1, 64);

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let consumer = ReconcileConsumer::new(cache.clone(), store.clone(), pending.clone());
    let receiver = receivers.remove(0);
    tokio::spawn(consumer.run(0, receiver, shutdown_rx));

    let state = AppState::new(
        config,
        pool,
        cache.clone(),
        store.clone(),
        producer,
        pending.clone(),
    );
    let router = Router::new().merge(routes::routes()).with_state(state);

    TestApp {
        router,
        cache,
        store,
        pending,
        _shutdown_tx: shutdown_tx,
    }
}

fn request(method: &str, uri: &str, user_id: Option<i32>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(user_id) = user_id {
        builder = builder.header("x-user-id", user_id.to_string());
    }
    match body {
        Some(value) => builder
            .header("content-type", "application/json")
            .body(Body::from(value.to_string()))
            .expect("request"),
        None => builder.body(Body::empty()).expect("request"),
    }
}

async fn send(router: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(req).await.expect("response");
    let status = response.status();
    let bytes = response.into_body().collect().await.expect("body").to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).expect("json body")
    };
    (status, value)
}

async fn add_item(app: &TestApp, user: i32, product: &str, quantity: i64) -> (StatusCode, Value) {
    send(
        &app.router,
        request(
            "POST",
            "/cart/add",
            Some(user),
            Some(json!({ "product_id": product, "quantity": quantity })),
        ),
    )
    .await
}

/// Poll until the durable store satisfies the predicate or time runs out.
async fn eventually_durable<F>(app: &TestApp, user: UserId, predicate: F) -> bool
where
    F: Fn(&CartContents) -> bool,
{
    for _ in 0..200 {
        let stored = app.store.stored_cart(user).await;
        if predicate(&stored) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    false
}

#[tokio::test]
async fn add_then_view_returns_snapshot() {
    let app = test_app(false);

    let (status, body) = send(
        &app.router,
        request(
            "POST",
            "/cart/add",
            Some(1),
            Some(json!({
                "product_id": "P1",
                "quantity": 2,
                "product": { "name": "Widget", "price": 100 }
            })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["total_items"], 1);

    let (status, body) = send(&app.router, request("GET", "/cart/view", Some(1), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["total_items"], 1);
    let entry = &body["data"]["items"]["P1"];
    assert_eq!(entry["quantity"], 2);
    assert_eq!(entry["product"]["name"], "Widget");
    assert_eq!(entry["product"]["price"]["amount"], "100");
}

#[tokio::test]
async fn repeated_add_accumulates() {
    let app = test_app(false);

    add_item(&app, 1, "P1", 2).await;
    add_item(&app, 1, "P1", 2).await;

    let (_, body) = send(&app.router, request("GET", "/cart/view", Some(1), None)).await;
    assert_eq!(body["data"]["items"]["P1"]["quantity"], 4);

    let (_, body) = send(
        &app.router,
        request("GET", "/cart/total-quantity", Some(1), None),
    )
    .await;
    assert_eq!(body["data"]["total_quantity"], 4);
}

#[tokio::test]
async fn concurrent_adds_do_not_lose_updates() {
    let app = test_app(false);

    let first = send(
        &app.router,
        request(
            "POST",
            "/cart/add",
            Some(1),
            Some(json!({ "product_id": "P1", "quantity": 1 })),
        ),
    );
    let second = send(
        &app.router,
        request(
            "POST",
            "/cart/add",
            Some(1),
            Some(json!({ "product_id": "P1", "quantity": 1 })),
        ),
    );
    let ((status_a, _), (status_b, _)) = tokio::join!(first, second);
    assert_eq!(status_a, StatusCode::OK);
    assert_eq!(status_b, StatusCode::OK);

    let (_, body) = send(&app.router, request("GET", "/cart/view", Some(1), None)).await;
    assert_eq!(body["data"]["items"]["P1"]["quantity"], 2);
}

#[tokio::test]
async fn update_zero_removes_item() {
    let app = test_app(false);
    add_item(&app, 1, "P1", 3).await;

    let (status, body) = send(
        &app.router,
        request(
            "PUT",
            "/cart/update",
            Some(1),
            Some(json!({ "product_id": "P1", "quantity": 0 })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Item removed from cart");

    let (_, body) = send(&app.router, request("GET", "/cart/view", Some(1), None)).await;
    assert_eq!(body["data"]["total_items"], 0);
    assert!(body["data"]["items"]["P1"].is_null());
}

#[tokio::test]
async fn update_overwrites_quantity() {
    let app = test_app(false);
    add_item(&app, 1, "P1", 3).await;

    let (_, body) = send(
        &app.router,
        request(
            "PUT",
            "/cart/update",
            Some(1),
            Some(json!({ "product_id": "P1", "quantity": 5 })),
        ),
    )
    .await;
    assert_eq!(body["message"], "Cart item updated");

    let (_, body) = send(&app.router, request("GET", "/cart/view", Some(1), None)).await;
    assert_eq!(body["data"]["items"]["P1"]["quantity"], 5);
}

#[tokio::test]
async fn remove_unknown_product_is_idempotent() {
    let app = test_app(false);
    add_item(&app, 1, "P1", 1).await;

    let (status, body) = send(
        &app.router,
        request("DELETE", "/cart/remove/ghost", Some(1), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);

    let (_, body) = send(&app.router, request("GET", "/cart/view", Some(1), None)).await;
    assert_eq!(body["data"]["total_items"], 1);
    assert_eq!(body["data"]["items"]["P1"]["quantity"], 1);
}

#[tokio::test]
async fn cold_cache_restores_from_durable_store() {
    let app = test_app(false);
    let user = UserId::new(7);

    let mut durable = CartContents::new();
    durable.accumulate(ProductId::from("P1"), 2, None);
    durable.accumulate(ProductId::from("P2"), 1, None);
    app.store.seed_cart(user, durable).await;

    let (status, body) = send(&app.router, request("GET", "/cart/view", Some(7), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["total_items"], 2);
    assert_eq!(body["data"]["items"]["P1"]["quantity"], 2);

    // The restore populated the cache itself, not just the response
    let cached = app.cache.peek(user).await;
    assert_eq!(cached.get(&ProductId::from("P1")).map(|e| e.quantity), Some(2));
    assert_eq!(cached.get(&ProductId::from("P2")).map(|e| e.quantity), Some(1));
}

#[tokio::test]
async fn checkout_empties_cart_and_converges_durable_store() {
    let app = test_app(false);
    let user = UserId::new(1);

    add_item(&app, 1, "P1", 2).await;
    assert!(
        eventually_durable(&app, user, |cart| !cart.is_empty()).await,
        "add should reach the durable store via the consumer"
    );

    let (status, body) = send(
        &app.router,
        request(
            "POST",
            "/cart/checkout",
            Some(1),
            Some(json!({ "address": "12 Main St" })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["items"]["P1"]["quantity"], 2);

    let (_, body) = send(&app.router, request("GET", "/cart/view", Some(1), None)).await;
    assert_eq!(body["data"]["total_items"], 0);
    let (_, body) = send(&app.router, request("GET", "/cart/count", Some(1), None)).await;
    assert_eq!(body["data"]["total_items"], 0);

    assert!(
        eventually_durable(&app, user, CartContents::is_empty).await,
        "checkout should empty the durable cart"
    );
}

#[tokio::test]
async fn blocking_checkout_persists_before_responding() {
    let app = test_app(true);
    let user = UserId::new(1);

    // Seed the cache directly so the checkout event is the only bus traffic
    app.cache.add_item(user, ProductId::from("P1"), 2, None).await;
    let mut durable = CartContents::new();
    durable.accumulate(ProductId::from("P1"), 2, None);
    app.store.seed_cart(user, durable).await;

    let (status, _) = send(
        &app.router,
        request("POST", "/cart/checkout", Some(1), Some(json!({}))),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    // No polling: the handler awaited the durable clear
    assert!(app.store.stored_cart(user).await.is_empty());
}

#[tokio::test]
async fn blocking_checkout_failure_leaves_cart_intact() {
    let app = test_app(true);
    let user = UserId::new(1);

    app.cache.add_item(user, ProductId::from("P1"), 2, None).await;
    app.store.set_fail_writes(true);

    let (status, body) = send(
        &app.router,
        request("POST", "/cart/checkout", Some(1), Some(json!({}))),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["success"], false);

    // The durable clear failed before the cache was touched, so the cart
    // is still there and the checkout can be retried
    let (_, body) = send(&app.router, request("GET", "/cart/view", Some(1), None)).await;
    assert_eq!(body["data"]["items"]["P1"]["quantity"], 2);

    app.store.set_fail_writes(false);
    let (status, _) = send(
        &app.router,
        request("POST", "/cart/checkout", Some(1), Some(json!({}))),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(app.store.stored_cart(user).await.is_empty());
}

#[tokio::test]
async fn empty_checkout_rejected() {
    let app = test_app(false);

    let (status, body) = send(
        &app.router,
        request("POST", "/cart/checkout", Some(2), Some(json!({}))),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn clear_converges_durable_store() {
    let app = test_app(false);
    let user = UserId::new(1);

    add_item(&app, 1, "P1", 2).await;
    let (status, _) = send(&app.router, request("DELETE", "/cart/clear", Some(1), None)).await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = send(&app.router, request("GET", "/cart/view", Some(1), None)).await;
    assert_eq!(body["data"]["total_items"], 0);

    assert!(
        eventually_durable(&app, user, CartContents::is_empty).await,
        "clear should empty the durable cart"
    );
}

#[tokio::test]
async fn clear_converges_via_sweep_without_bus() {
    let app = test_app(false);
    let user = UserId::new(1);

    // Seed durable state and a warm cache, then clear only the cache side
    let mut durable = CartContents::new();
    durable.accumulate(ProductId::from("P1"), 2, None);
    app.store.seed_cart(user, durable).await;
    app.cache.clear(user).await;

    // No event was published; the sweep alone must converge
    let sweeper = Sweeper::new(
        app.cache.clone(),
        app.store.clone(),
        app.pending.clone(),
        Duration::from_secs(300),
    );
    sweeper.sweep().await;

    assert!(app.store.stored_cart(user).await.is_empty());
    assert!(app.pending.is_empty());
}

#[tokio::test]
async fn sync_endpoint_persists_immediately() {
    let app = test_app(false);
    let user = UserId::new(3);

    add_item(&app, 3, "P1", 4).await;
    let (status, body) = send(&app.router, request("POST", "/cart/sync", Some(3), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["total_items"], 1);

    let stored = app.store.stored_cart(user).await;
    assert_eq!(stored.get(&ProductId::from("P1")).map(|e| e.quantity), Some(4));
}

#[tokio::test]
async fn debug_view_needs_no_identity_header() {
    let app = test_app(false);
    add_item(&app, 9, "P1", 1).await;

    let (status, body) = send(&app.router, request("GET", "/cart/view/9", None, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["total_items"], 1);
}

#[tokio::test]
async fn missing_identity_header_unauthorized() {
    let app = test_app(false);

    let (status, body) = send(&app.router, request("GET", "/cart/view", None, None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn add_rejects_invalid_input() {
    let app = test_app(false);

    let (status, _) = add_item(&app, 1, "P1", 0).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = add_item(&app, 1, "P1", -2).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = add_item(&app, 1, "  ", 1).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, body) = send(&app.router, request("GET", "/cart/view", Some(1), None)).await;
    assert_eq!(body["data"]["total_items"], 0);
}

#[tokio::test]
async fn update_rejects_negative_quantity() {
    let app = test_app(false);
    add_item(&app, 1, "P1", 1).await;

    let (status, _) = send(
        &app.router,
        request(
            "PUT",
            "/cart/update",
            Some(1),
            Some(json!({ "product_id": "P1", "quantity": -1 })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, body) = send(&app.router, request("GET", "/cart/view", Some(1), None)).await;
    assert_eq!(body["data"]["items"]["P1"]["quantity"], 1);
}
