use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tembea_api::middleware::RateLimiter;
use tembea_api::{app, gateways::gateway_registry, AppState, AuthConfig};
use tembea_catalog::ResourceInventory;
use tembea_core::notify::{LogNotifier, Notifier};
use tembea_core::{BookableUnit, BookingRepository, InventoryRepository, PaymentRepository};
use tembea_order::{BookingLifecycle, HoldSweeper, PaymentReconciler, ReservationEngine};
use tembea_store::app_config::{Config, StorageBackend};
use tembea_store::{
    DbClient, EventProducer, KafkaNotifier, MemoryStore, RedisClient, RetryPolicy,
    StoreBookingRepository, StoreInventoryRepository, StorePaymentRepository,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Units registered at start-up when present. Registration is an upsert.
const SEED_FILE: &str = "config/units.json";

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tembea_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load().expect("Failed to load config");
    tracing::info!("Starting Tembea API on port {}", config.server.port);

    let (inventory_repo, booking_repo, payment_repo) = match config.storage.backend {
        StorageBackend::Postgres => {
            let db = DbClient::new(&config.database)
                .await
                .expect("Failed to connect to Postgres");
            db.migrate().await.expect("Failed to run migrations");
            let retry = RetryPolicy::from(config.retry.clone());

            let inventory: Arc<dyn InventoryRepository> =
                Arc::new(StoreInventoryRepository::new(db.pool.clone(), retry.clone()));
            let bookings: Arc<dyn BookingRepository> =
                Arc::new(StoreBookingRepository::new(db.pool.clone(), retry.clone()));
            let payments: Arc<dyn PaymentRepository> =
                Arc::new(StorePaymentRepository::new(db.pool.clone(), retry));
            (inventory, bookings, payments)
        }
        StorageBackend::Memory => {
            tracing::warn!("Using in-memory storage; nothing survives a restart");
            let store = Arc::new(MemoryStore::new());
            let inventory: Arc<dyn InventoryRepository> = store.clone();
            let bookings: Arc<dyn BookingRepository> = store.clone();
            let payments: Arc<dyn PaymentRepository> = store;
            (inventory, bookings, payments)
        }
    };

    // Notifications go to Kafka when a broker is configured
    let notifier: Arc<dyn Notifier> = if config.kafka.brokers.is_empty() {
        Arc::new(LogNotifier)
    } else {
        let producer = EventProducer::new(&config.kafka.brokers)
            .expect("Failed to create Kafka producer");
        Arc::new(KafkaNotifier::new(producer))
    };

    let rate_limiter: Option<Arc<dyn RateLimiter>> = match RedisClient::new(&config.redis.url) {
        Ok(client) => {
            let limiter: Arc<dyn RateLimiter> = Arc::new(client);
            Some(limiter)
        }
        Err(e) => {
            tracing::warn!("Rate limiting disabled, bad Redis URL: {}", e);
            None
        }
    };

    let inventory = Arc::new(ResourceInventory::new(inventory_repo));
    seed_units(&inventory, Path::new(SEED_FILE)).await;

    let lifecycle = Arc::new(BookingLifecycle::new(booking_repo));
    let registry = gateway_registry(&config.payments).expect("Failed to build payment gateways");
    let reconciler = Arc::new(PaymentReconciler::new(
        payment_repo,
        lifecycle.clone(),
        Arc::new(registry),
        notifier.clone(),
        &config.payments.default_currency,
    ));
    let reservations = Arc::new(ReservationEngine::new(inventory, lifecycle.clone(), notifier));

    if config.reservations.hold_seconds > 0 {
        let sweeper = Arc::new(HoldSweeper::new(
            lifecycle.clone(),
            Duration::from_secs(config.reservations.hold_seconds),
        ));
        sweeper.spawn(Duration::from_secs(config.reservations.sweep_interval_secs.max(1)));
    }

    let app_state = AppState {
        reservations,
        lifecycle,
        reconciler,
        rate_limiter,
        rate_limit: config.rate_limit.clone(),
        auth: AuthConfig {
            secret: config.auth.jwt_secret.clone(),
        },
    };

    let app = app(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind listener");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .expect("Server error");
}

async fn seed_units(inventory: &ResourceInventory, path: &Path) {
    let raw = match tokio::fs::read_to_string(path).await {
        Ok(raw) => raw,
        Err(_) => {
            tracing::debug!("No unit seed file at {}", path.display());
            return;
        }
    };

    let units: Vec<BookableUnit> = match serde_json::from_str(&raw) {
        Ok(units) => units,
        Err(e) => {
            tracing::error!("Ignoring malformed seed file {}: {}", path.display(), e);
            return;
        }
    };

    for unit in &units {
        if let Err(e) = inventory.register(unit).await {
            tracing::error!("Failed to seed {}: {}", unit.key, e);
        }
    }
}
