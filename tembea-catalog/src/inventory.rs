use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tembea_core::{
    BookableUnit, Booking, BookingError, InventoryRepository, UnitAvailability, UnitKey,
};
use tracing::{debug, info};
use uuid::Uuid;

/// A hold granted on a unit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Reserved {
    pub booking_id: Uuid,
    pub unit: UnitKey,
    pub slot: String,
    pub available: i32,
}

/// Capacity tracking for bookable units, backed by transactional storage
pub struct ResourceInventory {
    repo: Arc<dyn InventoryRepository>,
}

impl ResourceInventory {
    pub fn new(repo: Arc<dyn InventoryRepository>) -> Self {
        Self { repo }
    }

    /// Seed a unit (flight or place stay)
    pub async fn register(&self, unit: &BookableUnit) -> Result<(), BookingError> {
        if unit.capacity < 0 {
            return Err(BookingError::InvalidAllocation(format!(
                "negative capacity on {}",
                unit.key
            )));
        }
        self.repo.register_unit(unit).await?;
        info!("Registered {} with capacity {}", unit.key, unit.capacity);
        Ok(())
    }

    pub async fn get_unit(&self, key: &UnitKey) -> Result<BookableUnit, BookingError> {
        self.repo
            .get_unit(key)
            .await?
            .ok_or_else(|| BookingError::UnitNotFound(key.to_string()))
    }

    pub async fn availability(&self, key: &UnitKey) -> Result<UnitAvailability, BookingError> {
        self.repo
            .availability(key)
            .await?
            .ok_or_else(|| BookingError::UnitNotFound(key.to_string()))
    }

    pub async fn available(&self, key: &UnitKey) -> Result<i32, BookingError> {
        Ok(self.availability(key).await?.available)
    }

    /// Free slot labels, in slot-map order
    pub async fn available_slots(&self, key: &UnitKey) -> Result<Vec<String>, BookingError> {
        let unit = self.get_unit(key).await?;
        let held = self.repo.held_slots(key).await?;
        let remaining = (unit.capacity - held.len() as i32).max(0) as usize;

        Ok(unit
            .slot_labels()
            .into_iter()
            .filter(|slot| !held.contains(slot))
            .take(remaining)
            .collect())
    }

    /// Claim the booking's allocation and persist the pending booking in one atomic step.
    pub async fn try_reserve(&self, booking: &Booking) -> Result<Reserved, BookingError> {
        let availability = self.repo.reserve(booking).await?;
        debug!(
            "Reserved {} on {} for booking {} ({} left)",
            booking.allocation, booking.unit, booking.id, availability.available
        );

        Ok(Reserved {
            booking_id: booking.id,
            unit: booking.unit.clone(),
            slot: booking.allocation.slot().to_string(),
            available: availability.available,
        })
    }

    /// Give a booking's hold back. Releasing twice is a no-op.
    pub async fn release(&self, key: &UnitKey, booking_id: Uuid) -> Result<(), BookingError> {
        if self.repo.release(key, booking_id).await? {
            info!("Released hold of booking {} on {}", booking_id, key);
        } else {
            debug!("Hold of booking {} on {} already released", booking_id, key);
        }
        Ok(())
    }
}
