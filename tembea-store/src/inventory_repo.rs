use async_trait::async_trait;
use serde_json::Value;
use sqlx::{PgPool, Postgres, Transaction};
use tembea_core::{
    BookableUnit, Booking, BookingError, InventoryRepository, StoreError, UnitAvailability, UnitKey,
};
use tracing::{debug, info};
use uuid::Uuid;

use crate::booking_repo::insert_booking;
use crate::database::{is_unique_violation, store_error, with_retry, RetryPolicy, TxError};

pub struct StoreInventoryRepository {
    pool: PgPool,
    retry: RetryPolicy,
}

impl StoreInventoryRepository {
    pub fn new(pool: PgPool, retry: RetryPolicy) -> Self {
        Self { pool, retry }
    }
}

#[derive(sqlx::FromRow)]
struct UnitRow {
    unit_key: String,
    unit: Value,
    capacity: i32,
    slots: Option<Value>,
    price: i64,
    currency: String,
}

impl TryFrom<UnitRow> for BookableUnit {
    type Error = StoreError;

    fn try_from(row: UnitRow) -> Result<Self, Self::Error> {
        let key: UnitKey = serde_json::from_value(row.unit)
            .map_err(|e| StoreError::Corrupt(format!("unit {}: {}", row.unit_key, e)))?;
        let slots = row
            .slots
            .map(serde_json::from_value::<Vec<String>>)
            .transpose()
            .map_err(|e| StoreError::Corrupt(format!("slots of {}: {}", row.unit_key, e)))?;

        Ok(BookableUnit {
            key,
            capacity: row.capacity,
            slots,
            price: row.price,
            currency: row.currency,
        })
    }
}

const UNIT_COLUMNS: &str = "unit_key, unit, capacity, slots, price, currency";

async fn lock_unit(
    tx: &mut Transaction<'_, Postgres>,
    key: &UnitKey,
) -> Result<Option<BookableUnit>, TxError<BookingError>> {
    let row: Option<UnitRow> = sqlx::query_as(&format!(
        "SELECT {} FROM bookable_units WHERE unit_key = $1 FOR UPDATE",
        UNIT_COLUMNS
    ))
    .bind(key.to_string())
    .fetch_optional(&mut **tx)
    .await?;

    row.map(BookableUnit::try_from)
        .transpose()
        .map_err(|e| TxError::Domain(e.into()))
}

async fn active_slots<'e, E>(executor: E, key: &UnitKey) -> Result<Vec<String>, sqlx::Error>
where
    E: sqlx::Executor<'e, Database = Postgres>,
{
    let rows: Vec<(String,)> =
        sqlx::query_as("SELECT slot FROM allocations WHERE unit_key = $1 AND released_at IS NULL")
            .bind(key.to_string())
            .fetch_all(executor)
            .await?;
    Ok(rows.into_iter().map(|(slot,)| slot).collect())
}

impl StoreInventoryRepository {
    async fn reserve_once(&self, booking: &Booking) -> Result<UnitAvailability, TxError<BookingError>> {
        let mut tx = self.pool.begin().await?;

        let unit = lock_unit(&mut tx, &booking.unit)
            .await?
            .ok_or_else(|| TxError::Domain(BookingError::UnitNotFound(booking.unit.to_string())))?;

        let held = active_slots(&mut *tx, &booking.unit).await?;
        unit.check_reserve(&booking.allocation, held.as_slice())
            .map_err(TxError::Domain)?;

        insert_booking(&mut tx, booking).await.map_err(|e| match e {
            TxError::Db(e) if is_unique_violation(&e) => {
                TxError::Domain(StoreError::Duplicate(booking.id.to_string()).into())
            }
            TxError::Db(e) => TxError::Db(e),
            TxError::Domain(e) => TxError::Domain(e.into()),
        })?;

        let slot = booking.allocation.slot();
        sqlx::query("INSERT INTO allocations (booking_id, unit_key, slot) VALUES ($1, $2, $3)")
            .bind(booking.id)
            .bind(booking.unit.to_string())
            .bind(slot)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                // The partial unique index backs up the check above
                if is_unique_violation(&e) {
                    TxError::Domain(BookingError::AlreadyAllocated {
                        unit: booking.unit.to_string(),
                        slot: slot.to_string(),
                    })
                } else {
                    TxError::Db(e)
                }
            })?;

        tx.commit().await?;
        Ok(unit.availability(held.len() as i32 + 1))
    }

    async fn release_once(&self, key: &UnitKey, booking_id: Uuid) -> Result<bool, TxError<StoreError>> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("SELECT unit_key FROM bookable_units WHERE unit_key = $1 FOR UPDATE")
            .bind(key.to_string())
            .execute(&mut *tx)
            .await?;

        let released = sqlx::query(
            "UPDATE allocations SET released_at = NOW() WHERE booking_id = $1 AND unit_key = $2 AND released_at IS NULL",
        )
        .bind(booking_id)
        .bind(key.to_string())
        .execute(&mut *tx)
        .await?
        .rows_affected();

        tx.commit().await?;
        Ok(released > 0)
    }
}

#[async_trait]
impl InventoryRepository for StoreInventoryRepository {
    async fn register_unit(&self, unit: &BookableUnit) -> Result<(), StoreError> {
        let key = serde_json::to_value(&unit.key).map_err(|e| StoreError::Backend(e.to_string()))?;
        let slots = unit
            .slots
            .as_ref()
            .map(serde_json::to_value)
            .transpose()
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO bookable_units (unit_key, unit, capacity, slots, price, currency)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (unit_key) DO UPDATE
            SET capacity = EXCLUDED.capacity,
                slots = EXCLUDED.slots,
                price = EXCLUDED.price,
                currency = EXCLUDED.currency,
                updated_at = NOW()
            "#,
        )
        .bind(unit.key.to_string())
        .bind(key)
        .bind(unit.capacity)
        .bind(slots)
        .bind(unit.price)
        .bind(&unit.currency)
        .execute(&self.pool)
        .await
        .map_err(store_error)?;

        info!("Unit {} stored with capacity {}", unit.key, unit.capacity);
        Ok(())
    }

    async fn get_unit(&self, key: &UnitKey) -> Result<Option<BookableUnit>, StoreError> {
        let row: Option<UnitRow> = sqlx::query_as(&format!(
            "SELECT {} FROM bookable_units WHERE unit_key = $1",
            UNIT_COLUMNS
        ))
        .bind(key.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(store_error)?;

        row.map(BookableUnit::try_from).transpose()
    }

    async fn availability(&self, key: &UnitKey) -> Result<Option<UnitAvailability>, StoreError> {
        let Some(unit) = self.get_unit(key).await? else {
            return Ok(None);
        };

        let (reserved,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM allocations WHERE unit_key = $1 AND released_at IS NULL",
        )
        .bind(key.to_string())
        .fetch_one(&self.pool)
        .await
        .map_err(store_error)?;

        Ok(Some(unit.availability(reserved as i32)))
    }

    async fn held_slots(&self, key: &UnitKey) -> Result<Vec<String>, StoreError> {
        active_slots(&self.pool, key).await.map_err(store_error)
    }

    async fn reserve(&self, booking: &Booking) -> Result<UnitAvailability, BookingError> {
        let availability = with_retry(&self.retry, "reservation", || self.reserve_once(booking))
            .await
            .map_err(BookingError::from)?;
        debug!("{} now has {} available", booking.unit, availability.available);
        Ok(availability)
    }

    async fn release(&self, key: &UnitKey, booking_id: Uuid) -> Result<bool, StoreError> {
        with_retry(&self.retry, "release", || self.release_once(key, booking_id))
            .await
            .map_err(StoreError::from)
    }
}
