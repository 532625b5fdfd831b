use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tembea_core::{
    BookableUnit, Booking, BookingError, BookingEvent, BookingRepository, BookingStatus,
    InventoryRepository, OutcomeSource, Payment, PaymentRepository, PaymentStatus, Settlement,
    StoreError, Transition, UnitAvailability, UnitKey,
};
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

struct UnitRow {
    unit: BookableUnit,
    /// slot -> booking holding it
    holds: HashMap<String, Uuid>,
}

impl UnitRow {
    fn availability(&self) -> UnitAvailability {
        self.unit.availability(self.holds.len() as i32)
    }
}

/// Process-local store with one lock per row.
///
/// The maps are only locked long enough to find or insert a row; all checks run under the row's
/// own mutex. When both are needed, a booking row is always locked before its unit row.
#[derive(Default)]
pub struct MemoryStore {
    units: RwLock<HashMap<UnitKey, Arc<Mutex<UnitRow>>>>,
    bookings: RwLock<HashMap<Uuid, Arc<Mutex<Booking>>>>,
    payments: RwLock<HashMap<String, Arc<Mutex<Payment>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn unit_row(&self, key: &UnitKey) -> Option<Arc<Mutex<UnitRow>>> {
        self.units.read().await.get(key).cloned()
    }

    async fn booking_row(&self, id: Uuid) -> Option<Arc<Mutex<Booking>>> {
        self.bookings.read().await.get(&id).cloned()
    }
}

#[async_trait]
impl InventoryRepository for MemoryStore {
    async fn register_unit(&self, unit: &BookableUnit) -> Result<(), StoreError> {
        let existing = {
            let mut units = self.units.write().await;
            match units.get(&unit.key) {
                Some(row) => row.clone(),
                None => {
                    units.insert(
                        unit.key.clone(),
                        Arc::new(Mutex::new(UnitRow {
                            unit: unit.clone(),
                            holds: HashMap::new(),
                        })),
                    );
                    return Ok(());
                }
            }
        };

        // Re-registering updates the definition and keeps existing holds
        existing.lock().await.unit = unit.clone();
        Ok(())
    }

    async fn get_unit(&self, key: &UnitKey) -> Result<Option<BookableUnit>, StoreError> {
        match self.unit_row(key).await {
            Some(row) => Ok(Some(row.lock().await.unit.clone())),
            None => Ok(None),
        }
    }

    async fn availability(&self, key: &UnitKey) -> Result<Option<UnitAvailability>, StoreError> {
        match self.unit_row(key).await {
            Some(row) => Ok(Some(row.lock().await.availability())),
            None => Ok(None),
        }
    }

    async fn held_slots(&self, key: &UnitKey) -> Result<Vec<String>, StoreError> {
        match self.unit_row(key).await {
            Some(row) => Ok(row.lock().await.holds.keys().cloned().collect()),
            None => Ok(Vec::new()),
        }
    }

    async fn reserve(&self, booking: &Booking) -> Result<UnitAvailability, BookingError> {
        let row = self
            .unit_row(&booking.unit)
            .await
            .ok_or_else(|| BookingError::UnitNotFound(booking.unit.to_string()))?;
        let mut row = row.lock().await;

        let held: Vec<&String> = row.holds.keys().collect();
        row.unit.check_reserve(&booking.allocation, held.as_slice())?;

        {
            let mut bookings = self.bookings.write().await;
            if bookings.contains_key(&booking.id) {
                return Err(StoreError::Duplicate(booking.id.to_string()).into());
            }
            bookings.insert(booking.id, Arc::new(Mutex::new(booking.clone())));
        }
        row.holds
            .insert(booking.allocation.slot().to_string(), booking.id);

        Ok(row.availability())
    }

    async fn release(&self, key: &UnitKey, booking_id: Uuid) -> Result<bool, StoreError> {
        let Some(row) = self.unit_row(key).await else {
            return Ok(false);
        };
        let mut row = row.lock().await;
        let before = row.holds.len();
        row.holds.retain(|_, holder| *holder != booking_id);
        Ok(row.holds.len() != before)
    }
}

#[async_trait]
impl BookingRepository for MemoryStore {
    async fn get_booking(&self, id: Uuid) -> Result<Option<Booking>, StoreError> {
        match self.booking_row(id).await {
            Some(row) => Ok(Some(row.lock().await.clone())),
            None => Ok(None),
        }
    }

    async fn list_for_requester(&self, user_id: &str) -> Result<Vec<Booking>, StoreError> {
        let rows: Vec<_> = self.bookings.read().await.values().cloned().collect();
        let mut found = Vec::new();
        for row in rows {
            let booking = row.lock().await;
            if booking.requester.user_id == user_id {
                found.push(booking.clone());
            }
        }
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(found)
    }

    async fn apply_event(
        &self,
        id: Uuid,
        event: BookingEvent,
    ) -> Result<(Booking, Transition), BookingError> {
        let row = self.booking_row(id).await.ok_or(BookingError::NotFound(id))?;
        let mut booking = row.lock().await;

        // Work on a copy so a failed transition leaves the row untouched
        let mut next = booking.clone();
        let transition = next.apply(event)?;

        if transition.releases {
            if let Some(unit) = self.unit_row(&next.unit).await {
                unit.lock().await.holds.retain(|_, holder| *holder != id);
            }
        }

        *booking = next;
        Ok((booking.clone(), transition))
    }

    async fn stale_pending(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Uuid>, StoreError> {
        let rows: Vec<_> = self.bookings.read().await.values().cloned().collect();
        let mut stale = Vec::new();
        for row in rows {
            let booking = row.lock().await;
            if booking.status == BookingStatus::Pending && booking.created_at < cutoff {
                stale.push((booking.created_at, booking.id));
            }
        }
        stale.sort();
        Ok(stale
            .into_iter()
            .take(limit.max(0) as usize)
            .map(|(_, id)| id)
            .collect())
    }
}

#[async_trait]
impl PaymentRepository for MemoryStore {
    async fn insert_payment(&self, payment: &Payment) -> Result<(), StoreError> {
        let mut payments = self.payments.write().await;
        if payments.contains_key(&payment.reference) {
            return Err(StoreError::Duplicate(payment.reference.clone()));
        }
        payments.insert(
            payment.reference.clone(),
            Arc::new(Mutex::new(payment.clone())),
        );
        Ok(())
    }

    async fn get_payment(&self, reference: &str) -> Result<Option<Payment>, StoreError> {
        let row = self.payments.read().await.get(reference).cloned();
        match row {
            Some(row) => Ok(Some(row.lock().await.clone())),
            None => Ok(None),
        }
    }

    async fn settle(
        &self,
        seed: &Payment,
        status: PaymentStatus,
        source: OutcomeSource,
    ) -> Result<(Payment, Settlement), StoreError> {
        let row = self
            .payments
            .write()
            .await
            .entry(seed.reference.clone())
            .or_insert_with(|| Arc::new(Mutex::new(seed.clone())))
            .clone();

        let mut payment = row.lock().await;
        let settlement = payment.settle(status, source);
        Ok((payment.clone(), settlement))
    }

    async fn list_for_booking(&self, booking_id: Uuid) -> Result<Vec<Payment>, StoreError> {
        let rows: Vec<_> = self.payments.read().await.values().cloned().collect();
        let mut found = Vec::new();
        for row in rows {
            let payment = row.lock().await;
            if payment.booking_id == Some(booking_id) {
                found.push(payment.clone());
            }
        }
        found.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::future::join_all;
    use tembea_core::{Allocation, PaymentMethod, Requester};

    fn booking_for(unit: &UnitKey, seat: &str) -> Booking {
        Booking::new(
            unit.clone(),
            Requester::new("user-1", None),
            Allocation::seat(seat),
            10_000,
            "KES",
        )
    }

    async fn store_with_flight(capacity: i32) -> (Arc<MemoryStore>, UnitKey) {
        let store = Arc::new(MemoryStore::new());
        let unit = BookableUnit::flight("FL100", capacity, 10_000, "KES");
        store.register_unit(&unit).await.unwrap();
        (store, unit.key)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_same_seat_race_has_one_winner() {
        let (store, key) = store_with_flight(10).await;

        let attempts = (0..50).map(|_| {
            let store = store.clone();
            let b = booking_for(&key, "12A");
            tokio::spawn(async move { store.reserve(&b).await })
        });
        let results: Vec<_> = join_all(attempts)
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .collect();

        let winners = results.iter().filter(|r| r.is_ok()).count();
        let duplicates = results
            .iter()
            .filter(|r| matches!(r, Err(BookingError::AlreadyAllocated { .. })))
            .count();
        assert_eq!(winners, 1);
        assert_eq!(duplicates, 49);

        let availability = store.availability(&key).await.unwrap().unwrap();
        assert_eq!(availability.available, 9);
    }

    #[tokio::test]
    async fn test_duplicate_seat_on_full_unit() {
        let (store, key) = store_with_flight(1).await;
        store.reserve(&booking_for(&key, "1")).await.unwrap();

        assert!(matches!(
            store.reserve(&booking_for(&key, "1")).await,
            Err(BookingError::AlreadyAllocated { .. })
        ));
        assert!(matches!(
            store.reserve(&booking_for(&key, "2")).await,
            Err(BookingError::CapacityExceeded { .. })
        ));
    }

    #[tokio::test]
    async fn test_cancel_releases_with_status_change() {
        let (store, key) = store_with_flight(1).await;
        let b = booking_for(&key, "1");
        store.reserve(&b).await.unwrap();

        let (cancelled, t) = store.apply_event(b.id, BookingEvent::Cancel).await.unwrap();
        assert_eq!(cancelled.status, BookingStatus::Cancelled);
        assert!(t.releases);
        assert!(store.held_slots(&key).await.unwrap().is_empty());

        // Second cancel is a no-op and the seat is free for someone else
        let (_, t) = store.apply_event(b.id, BookingEvent::Cancel).await.unwrap();
        assert!(t.is_noop());
        store.reserve(&booking_for(&key, "1")).await.unwrap();
        assert_eq!(store.availability(&key).await.unwrap().unwrap().available, 0);
    }

    #[tokio::test]
    async fn test_rejected_transition_leaves_row_untouched() {
        let (store, key) = store_with_flight(2).await;
        let b = booking_for(&key, "1");
        store.reserve(&b).await.unwrap();

        assert!(matches!(
            store.apply_event(b.id, BookingEvent::CheckIn).await,
            Err(BookingError::InvalidTransition { .. })
        ));
        let stored = store.get_booking(b.id).await.unwrap().unwrap();
        assert_eq!(stored.status, BookingStatus::Pending);
        assert_eq!(stored.updated_at, b.updated_at);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_settle_applies_once() {
        let store = Arc::new(MemoryStore::new());
        let seed = Payment::pending("pay-race", 10_000, "KES", PaymentMethod::Paystack, None, None);

        let attempts = (0..20).map(|n| {
            let store = store.clone();
            let seed = seed.clone();
            let source = if n % 2 == 0 { OutcomeSource::Webhook } else { OutcomeSource::Poll };
            tokio::spawn(async move { store.settle(&seed, PaymentStatus::Success, source).await })
        });
        let applied = join_all(attempts)
            .await
            .into_iter()
            .map(|r| r.unwrap().unwrap().1)
            .filter(|s| matches!(s, Settlement::Applied(_)))
            .count();

        assert_eq!(applied, 1);
        let stored = store.get_payment("pay-race").await.unwrap().unwrap();
        assert_eq!(stored.status, PaymentStatus::Success);
    }

    #[tokio::test]
    async fn test_insert_payment_rejects_duplicate_reference() {
        let store = MemoryStore::new();
        let p = Payment::pending("pay-1", 500, "KES", PaymentMethod::Mpesa, None, None);
        store.insert_payment(&p).await.unwrap();
        assert!(matches!(
            store.insert_payment(&p).await,
            Err(StoreError::Duplicate(_))
        ));
    }

    #[tokio::test]
    async fn test_stale_pending_skips_settled_bookings() {
        let (store, key) = store_with_flight(3).await;
        let old = booking_for(&key, "1");
        let confirmed = booking_for(&key, "2");
        store.reserve(&old).await.unwrap();
        store.reserve(&confirmed).await.unwrap();
        store.apply_event(confirmed.id, BookingEvent::Confirm).await.unwrap();

        let stale = store
            .stale_pending(Utc::now() + chrono::Duration::seconds(1), 10)
            .await
            .unwrap();
        assert_eq!(stale, vec![old.id]);
        assert!(store
            .stale_pending(old.created_at, 10)
            .await
            .unwrap()
            .is_empty());
    }
}
