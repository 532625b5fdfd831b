use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use tembea_core::{
    OutcomeSource, Payment, PaymentRepository, PaymentStatus, Requester, Settlement, StoreError,
};
use tracing::{debug, info};
use uuid::Uuid;

use crate::database::{is_unique_violation, store_error, with_retry, RetryPolicy, TxError};

pub struct StorePaymentRepository {
    pool: PgPool,
    retry: RetryPolicy,
}

impl StorePaymentRepository {
    pub fn new(pool: PgPool, retry: RetryPolicy) -> Self {
        Self { pool, retry }
    }
}

const PAYMENT_COLUMNS: &str = "id, reference, amount, currency, method, status, booking_id, \
     requester_id, requester_email, settled_by, settled_at, created_at, updated_at";

#[derive(sqlx::FromRow)]
struct PaymentRow {
    id: Uuid,
    reference: String,
    amount: i64,
    currency: String,
    method: String,
    status: String,
    booking_id: Option<Uuid>,
    requester_id: Option<String>,
    requester_email: Option<String>,
    settled_by: Option<String>,
    settled_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<PaymentRow> for Payment {
    type Error = StoreError;

    fn try_from(row: PaymentRow) -> Result<Self, Self::Error> {
        Ok(Payment {
            id: row.id,
            reference: row.reference,
            amount: row.amount,
            currency: row.currency,
            method: row.method.parse()?,
            status: row.status.parse()?,
            booking_id: row.booking_id,
            requester: row
                .requester_id
                .map(|user_id| Requester::new(user_id, row.requester_email)),
            settled_by: row.settled_by.as_deref().map(str::parse::<OutcomeSource>).transpose()?,
            settled_at: row.settled_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

async fn insert_payment_row(
    tx: &mut Transaction<'_, Postgres>,
    payment: &Payment,
    on_conflict_ignore: bool,
) -> Result<u64, sqlx::Error> {
    let sql = format!(
        r#"
        INSERT INTO payments (id, reference, amount, currency, method, status, booking_id, requester_id, requester_email, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        {}
        "#,
        if on_conflict_ignore { "ON CONFLICT (reference) DO NOTHING" } else { "" }
    );

    let requester = payment.requester.as_ref();
    let result = sqlx::query(&sql)
        .bind(payment.id)
        .bind(&payment.reference)
        .bind(payment.amount)
        .bind(&payment.currency)
        .bind(payment.method.as_str())
        .bind(payment.status.as_str())
        .bind(payment.booking_id)
        .bind(requester.map(|r| r.user_id.clone()))
        .bind(requester.and_then(|r| r.email.as_ref()).map(|e| e.expose().clone()))
        .bind(payment.created_at)
        .bind(payment.updated_at)
        .execute(&mut **tx)
        .await?;
    Ok(result.rows_affected())
}

impl StorePaymentRepository {
    async fn insert_once(&self, payment: &Payment) -> Result<(), TxError<StoreError>> {
        let mut tx = self.pool.begin().await?;
        insert_payment_row(&mut tx, payment, false).await.map_err(|e| {
            if is_unique_violation(&e) {
                TxError::Domain(StoreError::Duplicate(payment.reference.clone()))
            } else {
                TxError::Db(e)
            }
        })?;
        tx.commit().await?;
        Ok(())
    }

    async fn settle_once(
        &self,
        seed: &Payment,
        status: PaymentStatus,
        source: OutcomeSource,
    ) -> Result<(Payment, Settlement), TxError<StoreError>> {
        let mut tx = self.pool.begin().await?;

        if insert_payment_row(&mut tx, seed, true).await? > 0 {
            info!("Payment {} first seen through {}", seed.reference, source);
        }

        let row: PaymentRow = sqlx::query_as(&format!(
            "SELECT {} FROM payments WHERE reference = $1 FOR UPDATE",
            PAYMENT_COLUMNS
        ))
        .bind(&seed.reference)
        .fetch_one(&mut *tx)
        .await?;

        let mut payment = Payment::try_from(row).map_err(TxError::Domain)?;
        let settlement = payment.settle(status, source);

        if let Settlement::Applied(_) = settlement {
            sqlx::query(
                "UPDATE payments SET status = $1, settled_by = $2, settled_at = $3, updated_at = $4 WHERE id = $5",
            )
            .bind(payment.status.as_str())
            .bind(source.as_str())
            .bind(payment.settled_at)
            .bind(payment.updated_at)
            .bind(payment.id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        debug!("Payment {} offered {} via {}: {:?}", payment.reference, status, source, settlement);
        Ok((payment, settlement))
    }
}

#[async_trait]
impl PaymentRepository for StorePaymentRepository {
    async fn insert_payment(&self, payment: &Payment) -> Result<(), StoreError> {
        with_retry(&self.retry, "payment insert", || self.insert_once(payment))
            .await
            .map_err(StoreError::from)
    }

    async fn get_payment(&self, reference: &str) -> Result<Option<Payment>, StoreError> {
        let row: Option<PaymentRow> = sqlx::query_as(&format!(
            "SELECT {} FROM payments WHERE reference = $1",
            PAYMENT_COLUMNS
        ))
        .bind(reference)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_error)?;

        row.map(Payment::try_from).transpose()
    }

    async fn settle(
        &self,
        seed: &Payment,
        status: PaymentStatus,
        source: OutcomeSource,
    ) -> Result<(Payment, Settlement), StoreError> {
        with_retry(&self.retry, "payment settlement", || {
            self.settle_once(seed, status, source)
        })
        .await
        .map_err(StoreError::from)
    }

    async fn list_for_booking(&self, booking_id: Uuid) -> Result<Vec<Payment>, StoreError> {
        let rows: Vec<PaymentRow> = sqlx::query_as(&format!(
            "SELECT {} FROM payments WHERE booking_id = $1 ORDER BY created_at",
            PAYMENT_COLUMNS
        ))
        .bind(booking_id)
        .fetch_all(&self.pool)
        .await
        .map_err(store_error)?;

        rows.into_iter().map(Payment::try_from).collect()
    }
}
