//! PycShop Cart Service - cache-first cart with asynchronous durability.
//!
//! This binary serves the cart API on port 3002, behind the PycShop gateway.
//!
//! # Architecture
//!
//! - Axum web framework, JSON request/response envelopes
//! - moka in-process cache as the primary cart read/write path
//! - `PostgreSQL` as the durable store, written only by reconciliation
//! - Partitioned in-process event bus + periodic sweep for convergence
//!
//! # Consistency
//!
//! Cart mutations return as soon as the cache is updated. Durable
//! persistence is eventual, bounded by the sweep interval; logout and
//! (optionally) checkout force a synchronous reconciliation.

#![cfg_attr(not(test), forbid(unsafe_code))]

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::{Router, routing::get};
use sentry::integrations::tracing as sentry_tracing;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pycshop_cart::cache::CartCache;
use pycshop_cart::config::CartConfig;
use pycshop_cart::db::{self, PgCartStore};
use pycshop_cart::routes;
use pycshop_cart::state::AppState;
use pycshop_cart::sync::{PendingSet, ReconcileConsumer, Sweeper, SyncBus};

/// Initialize Sentry error tracking and return guard that must be kept alive.
fn init_sentry(config: &CartConfig) -> Option<sentry::ClientInitGuard> {
    let dsn = config.sentry_dsn.as_ref()?;

    let guard = sentry::init((
        dsn.as_str(),
        sentry::ClientOptions {
            release: sentry::release_name!(),
            environment: config
                .sentry_environment
                .clone()
                .map(std::borrow::Cow::Owned),
            attach_stacktrace: true,
            ..Default::default()
        },
    ));

    tracing::info!("Sentry initialized");
    Some(guard)
}

/// Filter tracing events to Sentry event types.
fn sentry_event_filter(metadata: &tracing::Metadata<'_>) -> sentry_tracing::EventFilter {
    match *metadata.level() {
        tracing::Level::ERROR | tracing::Level::WARN => sentry_tracing::EventFilter::Event,
        tracing::Level::INFO | tracing::Level::DEBUG => sentry_tracing::EventFilter::Breadcrumb,
        _ => sentry_tracing::EventFilter::Ignore,
    }
}

#[tokio::main]
async fn main() {
    // Load configuration from environment (needed for Sentry init)
    let config = CartConfig::from_env().expect("Failed to load configuration");

    // Initialize Sentry (must be done before tracing subscriber)
    let _sentry_guard = init_sentry(&config);

    // Initialize tracing with EnvFilter and Sentry integration
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "pycshop_cart=info,tower_http=debug".into());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer().event_filter(sentry_event_filter))
        .init();

    // Initialize database connection pool
    let pool = db::create_pool(&config.database_url)
        .await
        .expect("Failed to create database pool");
    tracing::info!("Database pool created");

    // NOTE: Migrations are NOT run automatically on startup.
    // Run them explicitly via: sqlx migrate run --source crates/cart/migrations

    // Construct the injected service objects once, at process start
    let store: Arc<dyn pycshop_cart::db::DurableCartStore> =
        Arc::new(PgCartStore::new(pool.clone()));
    let pending = PendingSet::new();
    let cache = CartCache::new(config.cart_ttl, store.clone(), pending.clone());
    let (producer, receivers) = SyncBus::new(config.sync_partitions, config.sync_queue_capacity);

    // Startup audit: how many users have durable carts right now
    match store.active_cart_user_ids().await {
        Ok(user_ids) => tracing::info!(count = user_ids.len(), "active durable carts at startup"),
        Err(error) => tracing::warn!(%error, "could not audit durable carts at startup"),
    }

    // Background tasks: one reconciliation consumer per partition + sweep
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut background = Vec::new();
    for (partition, receiver) in receivers.into_iter().enumerate() {
        let consumer = ReconcileConsumer::new(cache.clone(), store.clone(), pending.clone());
        background.push(tokio::spawn(consumer.run(
            partition,
            receiver,
            shutdown_rx.clone(),
        )));
    }
    let sweeper = Sweeper::new(
        cache.clone(),
        store.clone(),
        pending.clone(),
        config.sweep_interval,
    );
    background.push(tokio::spawn(sweeper.run(shutdown_rx)));

    // Build application state
    let state = AppState::new(config.clone(), pool, cache, store, producer, pending);

    // Build router
    let app = Router::new()
        .route("/health", get(health))
        .route("/health/ready", get(readiness))
        .merge(routes::routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
        // Sentry layers (outermost for full request coverage)
        .layer(sentry_tower::NewSentryLayer::new_from_top())
        .layer(sentry_tower::SentryHttpLayer::new().enable_transaction());

    // Start server
    let addr = config.socket_addr();
    tracing::info!("cart service listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    // Stop background reconciliation cleanly: consumers drain their
    // partitions, the sweeper flushes remaining markers
    let _ = shutdown_tx.send(true);
    for task in background {
        if let Err(error) = task.await {
            tracing::error!(%error, "background task panicked during shutdown");
        }
    }
    tracing::info!("shutdown complete");
}

/// Liveness health check endpoint.
///
/// Returns "ok" if the server is running. Does not check dependencies.
async fn health() -> &'static str {
    "ok"
}

/// Readiness health check endpoint.
///
/// Verifies database connectivity before returning OK.
/// Returns 503 Service Unavailable if the database is not reachable.
async fn readiness(State(state): State<AppState>) -> StatusCode {
    match sqlx::query("SELECT 1").fetch_one(state.pool()).await {
        Ok(_) => StatusCode::OK,
        Err(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("Shutdown signal received, starting graceful shutdown");
}
