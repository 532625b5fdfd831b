use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::booking::{Booking, BookingError, BookingEvent, Transition};
use crate::payment::{OutcomeSource, Payment, PaymentStatus, Settlement};
use crate::unit::{BookableUnit, UnitAvailability, UnitKey};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error("Duplicate record: {0}")]
    Duplicate(String),

    #[error("Corrupt record: {0}")]
    Corrupt(String),

    #[error("Storage error: {0}")]
    Backend(String),
}

/// Capacity and allocations per bookable unit.
///
/// Every method that mutates a unit runs under that unit's row lock and nothing wider.
#[async_trait]
pub trait InventoryRepository: Send + Sync {
    async fn register_unit(&self, unit: &BookableUnit) -> Result<(), StoreError>;

    async fn get_unit(&self, key: &UnitKey) -> Result<Option<BookableUnit>, StoreError>;

    async fn availability(&self, key: &UnitKey) -> Result<Option<UnitAvailability>, StoreError>;

    /// Slots held by active bookings on the unit
    async fn held_slots(&self, key: &UnitKey) -> Result<Vec<String>, StoreError>;

    /// Atomically check the booking's allocation against the unit and persist both the hold and
    /// the pending booking. Fails with `AlreadyAllocated`, `CapacityExceeded`,
    /// `InvalidAllocation` or `UnitNotFound`.
    async fn reserve(&self, booking: &Booking) -> Result<UnitAvailability, BookingError>;

    /// Drop the hold a booking has on a unit. Returns `false` when there was nothing to release.
    async fn release(&self, key: &UnitKey, booking_id: Uuid) -> Result<bool, StoreError>;
}

#[async_trait]
pub trait BookingRepository: Send + Sync {
    async fn get_booking(&self, id: Uuid) -> Result<Option<Booking>, StoreError>;

    async fn list_for_requester(&self, user_id: &str) -> Result<Vec<Booking>, StoreError>;

    /// Read the booking for update, apply the event, persist. When the transition releases the
    /// allocation, the release happens in the same unit of work.
    async fn apply_event(
        &self,
        id: Uuid,
        event: BookingEvent,
    ) -> Result<(Booking, Transition), BookingError>;

    /// Pending bookings created before `cutoff`, oldest first.
    async fn stale_pending(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Uuid>, StoreError>;
}

#[async_trait]
pub trait PaymentRepository: Send + Sync {
    /// Insert a new pending payment. `Duplicate` if the reference exists.
    async fn insert_payment(&self, payment: &Payment) -> Result<(), StoreError>;

    async fn get_payment(&self, reference: &str) -> Result<Option<Payment>, StoreError>;

    /// Insert `seed` if its reference is unknown, then lock the row and offer the outcome.
    /// Concurrent callers for one reference are serialized; exactly one of them can observe
    /// `Settlement::Applied`.
    async fn settle(
        &self,
        seed: &Payment,
        status: PaymentStatus,
        source: OutcomeSource,
    ) -> Result<(Payment, Settlement), StoreError>;

    async fn list_for_booking(&self, booking_id: Uuid) -> Result<Vec<Payment>, StoreError>;
}
