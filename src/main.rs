use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{routing::get, Router};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod api;
mod config;
mod ledger;
mod metrics;
mod models;
mod services;
mod store;
mod utils;

use crate::config::{AppConfig, StoreBackend};
use crate::ledger::listener::EventListener;
use crate::ledger::{HttpLedgerClient, LedgerClient};
use crate::services::worker::spawn_supervised;
use crate::services::{
    CancelDriver, EventDriver, ExpiryDriver, ExpiryScanner, LockDriver, MatchDriver, SettleDriver,
};
use crate::store::{MemoryStore, OrderStore, RedisStore, Store};

pub struct AppState {
    pub config: AppConfig,
    pub store: Arc<OrderStore>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "currex_backend=debug,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = AppConfig::load()?;

    tracing::info!("Starting currex backend v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Environment: {}", config.environment);

    // Metrics recorder
    let metrics_handle = metrics::init_metrics();

    // Coordination store
    let raw_store: Arc<dyn Store> = match config.store.backend {
        StoreBackend::Redis => {
            let store = RedisStore::from_url(&config.store.url).await?;
            if store.ping().await? {
                tracing::info!("Store connected at {}", config.store.url);
            }
            Arc::new(store)
        }
        StoreBackend::Memory => {
            tracing::warn!("Using in-process store; state will not survive a restart");
            Arc::new(MemoryStore::new())
        }
    };
    let store = Arc::new(OrderStore::new(raw_store.clone()));

    // Ledger adaptor client
    let ledger: Arc<dyn LedgerClient> = Arc::new(HttpLedgerClient::new(
        &config.ledger.url,
        config.ledger.timeout(),
    )?);
    tracing::info!(
        "Ledger adaptor at {} (deadline {}ms)",
        config.ledger.url,
        config.ledger.timeout_ms
    );

    // Ledger event feed -> store
    if config.ledger.events_url.is_empty() {
        tracing::warn!("Ledger event feed disabled; results must be injected externally");
    } else {
        let listener = EventListener::new(raw_store.clone(), &config.ledger.events_url);
        tokio::spawn(listener.run());
        tracing::info!("Ledger event listener started at {}", config.ledger.events_url);
    }

    // Drivers
    let scale = config.amount_scale;
    let lock_driver = Arc::new(LockDriver::new(
        store.clone(),
        ledger.clone(),
        config.batch.pending,
        scale,
    ));
    let settle_driver = Arc::new(SettleDriver::new(
        store.clone(),
        ledger.clone(),
        config.batch.matched,
        scale,
    ));
    let expiry_driver = Arc::new(ExpiryDriver::new(
        store.clone(),
        ledger.clone(),
        config.batch.expired,
        scale,
    ));
    let cancel_driver = Arc::new(CancelDriver::new(
        store.clone(),
        ledger.clone(),
        config.batch.cancel,
        scale,
    ));
    let match_driver = Arc::new(MatchDriver::new(store.clone(), scale));
    let expiry_scanner = Arc::new(ExpiryScanner::new(store.clone()));
    let event_driver = Arc::new(EventDriver::new(
        store.clone(),
        lock_driver.clone(),
        settle_driver.clone(),
        expiry_driver.clone(),
        cancel_driver.clone(),
        config.batch.event,
    ));

    // One supervised periodic worker per driver
    let cooldown = Duration::from_millis(config.worker_cooldown_ms);
    {
        let driver = lock_driver.clone();
        spawn_supervised("lock", config.poll.lock(), cooldown, move || {
            let driver = driver.clone();
            async move { driver.run_once().await }
        });
    }
    {
        let driver = match_driver.clone();
        spawn_supervised("match", config.poll.matching(), cooldown, move || {
            let driver = driver.clone();
            async move { driver.run_once().await }
        });
    }
    {
        let driver = settle_driver.clone();
        spawn_supervised("exec", config.poll.exec(), cooldown, move || {
            let driver = driver.clone();
            async move { driver.run_once().await }
        });
    }
    {
        let driver = expiry_scanner.clone();
        spawn_supervised("find-expired", config.poll.findexpired(), cooldown, move || {
            let driver = driver.clone();
            async move { driver.run_once().await }
        });
    }
    {
        let driver = expiry_driver.clone();
        spawn_supervised("expired", config.poll.expired(), cooldown, move || {
            let driver = driver.clone();
            async move { driver.run_once().await }
        });
    }
    {
        let driver = cancel_driver.clone();
        spawn_supervised("cancel", config.poll.cancel(), cooldown, move || {
            let driver = driver.clone();
            async move { driver.run_once().await }
        });
    }
    {
        let driver = event_driver.clone();
        spawn_supervised("event", config.poll.event(), cooldown, move || {
            let driver = driver.clone();
            async move { driver.run_once().await }
        });
    }
    tracing::info!("Worker pipeline started");

    // Build application state and router
    let port = config.port;
    let state = Arc::new(AppState {
        config,
        store,
    });

    let app = Router::new()
        .route("/health", get(health_check))
        .route(
            "/metrics",
            get(move || {
                let handle = metrics_handle.clone();
                async move { handle.render() }
            }),
        )
        .nest("/api/v1", api::routes::create_router())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn health_check() -> &'static str {
    "OK"
}
