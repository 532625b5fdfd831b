use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{PgPool, Postgres, Transaction};
use tembea_core::{
    Booking, BookingError, BookingEvent, BookingRepository, BookingStatus, Requester, StoreError,
    Transition,
};
use tracing::debug;
use uuid::Uuid;

use crate::database::{json_column, store_error, with_retry, RetryPolicy, TxError};

pub struct StoreBookingRepository {
    pool: PgPool,
    retry: RetryPolicy,
}

impl StoreBookingRepository {
    pub fn new(pool: PgPool, retry: RetryPolicy) -> Self {
        Self { pool, retry }
    }
}

pub(crate) const BOOKING_COLUMNS: &str = "id, unit, requester_id, requester_email, allocation, \
     status, amount, currency, created_at, updated_at";

#[derive(sqlx::FromRow)]
pub(crate) struct BookingRow {
    id: Uuid,
    unit: Value,
    requester_id: String,
    requester_email: Option<String>,
    allocation: Value,
    status: String,
    amount: i64,
    currency: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<BookingRow> for Booking {
    type Error = StoreError;

    fn try_from(row: BookingRow) -> Result<Self, Self::Error> {
        let corrupt = |e: serde_json::Error| StoreError::Corrupt(format!("booking {}: {}", row.id, e));
        Ok(Booking {
            id: row.id,
            unit: serde_json::from_value(row.unit.clone()).map_err(corrupt)?,
            requester: Requester::new(row.requester_id.clone(), row.requester_email.clone()),
            allocation: serde_json::from_value(row.allocation.clone()).map_err(corrupt)?,
            status: row.status.parse()?,
            amount: row.amount,
            currency: row.currency,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

pub(crate) async fn insert_booking(
    tx: &mut Transaction<'_, Postgres>,
    booking: &Booking,
) -> Result<(), TxError<StoreError>> {
    let unit = json_column(&booking.unit, "unit").map_err(TxError::Domain)?;
    let allocation = json_column(&booking.allocation, "allocation").map_err(TxError::Domain)?;

    sqlx::query(
        r#"
        INSERT INTO bookings (id, unit_key, unit, requester_id, requester_email, allocation, status, amount, currency, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        "#,
    )
    .bind(booking.id)
    .bind(booking.unit.to_string())
    .bind(unit)
    .bind(&booking.requester.user_id)
    .bind(booking.requester.email.as_ref().map(|e| e.expose().clone()))
    .bind(allocation)
    .bind(booking.status.as_str())
    .bind(booking.amount)
    .bind(&booking.currency)
    .bind(booking.created_at)
    .bind(booking.updated_at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

impl StoreBookingRepository {
    async fn apply_once(
        &self,
        id: Uuid,
        event: BookingEvent,
    ) -> Result<(Booking, Transition), TxError<BookingError>> {
        let mut tx = self.pool.begin().await?;

        let row: Option<BookingRow> = sqlx::query_as(&format!(
            "SELECT {} FROM bookings WHERE id = $1 FOR UPDATE",
            BOOKING_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;

        let mut booking: Booking = row
            .ok_or(TxError::Domain(BookingError::NotFound(id)))?
            .try_into()
            .map_err(|e: StoreError| TxError::Domain(e.into()))?;

        let transition = booking.apply(event).map_err(TxError::Domain)?;
        if transition.is_noop() {
            return Ok((booking, transition));
        }

        sqlx::query("UPDATE bookings SET status = $1, updated_at = $2 WHERE id = $3")
            .bind(booking.status.as_str())
            .bind(booking.updated_at)
            .bind(id)
            .execute(&mut *tx)
            .await?;

        if transition.releases {
            // booking row first, then the unit row
            sqlx::query("SELECT unit_key FROM bookable_units WHERE unit_key = $1 FOR UPDATE")
                .bind(booking.unit.to_string())
                .execute(&mut *tx)
                .await?;

            let released = sqlx::query(
                "UPDATE allocations SET released_at = NOW() WHERE booking_id = $1 AND released_at IS NULL",
            )
            .bind(id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
            debug!("Booking {} released {} allocation(s)", id, released);
        }

        tx.commit().await?;
        Ok((booking, transition))
    }
}

#[async_trait]
impl BookingRepository for StoreBookingRepository {
    async fn get_booking(&self, id: Uuid) -> Result<Option<Booking>, StoreError> {
        let row: Option<BookingRow> = sqlx::query_as(&format!(
            "SELECT {} FROM bookings WHERE id = $1",
            BOOKING_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_error)?;

        row.map(Booking::try_from).transpose()
    }

    async fn list_for_requester(&self, user_id: &str) -> Result<Vec<Booking>, StoreError> {
        let rows: Vec<BookingRow> = sqlx::query_as(&format!(
            "SELECT {} FROM bookings WHERE requester_id = $1 ORDER BY created_at DESC",
            BOOKING_COLUMNS
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(store_error)?;

        rows.into_iter().map(Booking::try_from).collect()
    }

    async fn apply_event(
        &self,
        id: Uuid,
        event: BookingEvent,
    ) -> Result<(Booking, Transition), BookingError> {
        with_retry(&self.retry, "booking transition", || self.apply_once(id, event))
            .await
            .map_err(BookingError::from)
    }

    async fn stale_pending(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Uuid>, StoreError> {
        let ids: Vec<(Uuid,)> = sqlx::query_as(
            "SELECT id FROM bookings WHERE status = $1 AND created_at < $2 ORDER BY created_at LIMIT $3",
        )
        .bind(BookingStatus::Pending.as_str())
        .bind(cutoff)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(store_error)?;

        Ok(ids.into_iter().map(|(id,)| id).collect())
    }
}
