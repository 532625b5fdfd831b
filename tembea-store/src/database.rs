use rand::Rng;
use sqlx::postgres::PgPoolOptions;
use sqlx::{Pool, Postgres};
use std::future::Future;
use std::time::Duration;
use tembea_core::{BookingError, StoreError};
use tracing::{info, warn};

use crate::app_config::{DatabaseConfig, RetryConfig};

#[derive(Clone)]
pub struct DbClient {
    pub pool: Pool<Postgres>,
}

impl DbClient {
    pub async fn new(config: &DatabaseConfig) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(3))
            .connect(&config.url)
            .await?;

        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        info!("Running database migrations...");
        sqlx::migrate!("../migrations").run(&self.pool).await?;
        info!("Migrations completed successfully.");
        Ok(())
    }
}

/// Exponential backoff for transactions that lose a serialization race or a pool slot.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: usize,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryConfig::default().into()
    }
}

impl From<RetryConfig> for RetryPolicy {
    fn from(cfg: RetryConfig) -> Self {
        Self {
            max_retries: cfg.max_retries,
            initial_delay: Duration::from_millis(cfg.initial_delay_ms),
            max_delay: Duration::from_millis(cfg.max_delay_ms),
            multiplier: cfg.multiplier,
        }
    }
}

impl RetryPolicy {
    /// `initial_delay * multiplier^attempt`, capped at `max_delay`, plus up to 50% jitter.
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        let base_ms = self.initial_delay.as_millis() as f64 * self.multiplier.powi(attempt as i32);
        let capped = Duration::from_millis(base_ms as u64).min(self.max_delay);
        let jitter_ms = rand::thread_rng().gen_range(0..=capped.as_millis() as u64 / 2);
        capped + Duration::from_millis(jitter_ms)
    }
}

/// Failure inside a retried transaction: either the database or the business rule said no.
#[derive(Debug)]
pub enum TxError<E> {
    Db(sqlx::Error),
    Domain(E),
}

impl<E> From<sqlx::Error> for TxError<E> {
    fn from(e: sqlx::Error) -> Self {
        TxError::Db(e)
    }
}

/// Serialization failures, deadlocks and pool exhaustion are worth another attempt.
pub fn is_transient(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => true,
        sqlx::Error::Database(db) => matches!(db.code().as_deref(), Some("40001") | Some("40P01")),
        _ => false,
    }
}

pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.code().as_deref() == Some("23505"))
}

pub fn store_error(err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            StoreError::Unavailable(err.to_string())
        }
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
            StoreError::Corrupt(err.to_string())
        }
        e if is_unique_violation(&e) => StoreError::Duplicate(e.to_string()),
        e => StoreError::Backend(e.to_string()),
    }
}

/// JSON for a jsonb column. A value that cannot be encoded is refused rather than stored as null.
pub fn json_column<T: serde::Serialize>(value: &T, column: &str) -> Result<serde_json::Value, StoreError> {
    serde_json::to_value(value)
        .map_err(|e| StoreError::Backend(format!("cannot encode {}: {}", column, e)))
}

impl From<TxError<StoreError>> for StoreError {
    fn from(e: TxError<StoreError>) -> Self {
        match e {
            TxError::Db(db) => store_error(db),
            TxError::Domain(d) => d,
        }
    }
}

impl From<TxError<BookingError>> for BookingError {
    fn from(e: TxError<BookingError>) -> Self {
        match e {
            TxError::Db(db) => BookingError::Store(store_error(db)),
            TxError::Domain(d) => d,
        }
    }
}

/// Run `op` until it succeeds, fails for a domain reason, or exhausts the policy.
pub async fn with_retry<T, E, F, Fut>(policy: &RetryPolicy, what: &str, mut op: F) -> Result<T, TxError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, TxError<E>>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Err(TxError::Db(e)) if is_transient(&e) && attempt < policy.max_retries => {
                let delay = policy.delay_for_attempt(attempt);
                warn!("{} hit transient error ({}), retrying in {:?}", what, e, delay);
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            other => return other,
        }
    }
}
