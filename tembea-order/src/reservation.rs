use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tembea_catalog::{quote, ResourceInventory};
use tembea_core::notify::Notifier;
use tembea_core::{Allocation, Booking, BookingError, Requester, UnitKey};
use tracing::{debug, info, warn};

use crate::lifecycle::{booking_summary, deliver, BookingLifecycle};
use crate::metrics;

/// Auto-assignment races other requesters for the same free slot; give up after this many losses.
const AUTO_ASSIGN_ATTEMPTS: usize = 5;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReservationRequest {
    pub unit: UnitKey,
    pub requester: Requester,
    /// Seat or room label. Assigned from the free slots when absent.
    pub slot: Option<String>,
    /// Guests in the room; places only.
    pub guests: Option<u32>,
}

/// Turns a reservation request into a pending booking holding a unit allocation.
pub struct ReservationEngine {
    inventory: Arc<ResourceInventory>,
    lifecycle: Arc<BookingLifecycle>,
    notifier: Arc<dyn Notifier>,
}

impl ReservationEngine {
    pub fn new(
        inventory: Arc<ResourceInventory>,
        lifecycle: Arc<BookingLifecycle>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            inventory,
            lifecycle,
            notifier,
        }
    }

    pub fn inventory(&self) -> &ResourceInventory {
        &self.inventory
    }

    /// Reserve a slot and persist the pending booking.
    ///
    /// Bookings that cost nothing are confirmed on the spot.
    pub async fn reserve(&self, request: ReservationRequest) -> Result<Booking, BookingError> {
        let result = match &request.slot {
            Some(slot) => self.reserve_slot(&request, slot).await,
            None => self.reserve_any(&request).await,
        };

        let booking = match result {
            Ok(booking) => booking,
            Err(e) => {
                metrics::record_reservation(outcome_label(&e));
                debug!("Reservation on {} refused: {}", request.unit, e);
                return Err(e);
            }
        };
        metrics::record_reservation("reserved");

        if booking.requires_payment() {
            return Ok(booking);
        }

        let (confirmed, transition) = self.lifecycle.confirm(booking.id).await?;
        if !transition.is_noop() {
            deliver(
                self.notifier.as_ref(),
                &confirmed.requester,
                &booking_summary(&confirmed, None),
            )
            .await;
        }
        Ok(confirmed)
    }

    async fn reserve_slot(
        &self,
        request: &ReservationRequest,
        slot: &str,
    ) -> Result<Booking, BookingError> {
        let unit = self.inventory.get_unit(&request.unit).await?;
        let allocation = allocation_for(&request.unit, slot, request.guests);
        let price = quote(&unit, &allocation)?;

        let booking = Booking::new(
            request.unit.clone(),
            request.requester.clone(),
            allocation,
            price.amount,
            &price.currency,
        );
        let reserved = self.inventory.try_reserve(&booking).await?;
        info!(
            "Booking {} holds {} on {} for user {} ({} left)",
            booking.id, reserved.slot, reserved.unit, booking.requester.user_id, reserved.available
        );
        Ok(booking)
    }

    async fn reserve_any(&self, request: &ReservationRequest) -> Result<Booking, BookingError> {
        for attempt in 1..=AUTO_ASSIGN_ATTEMPTS {
            let free = self.inventory.available_slots(&request.unit).await?;
            // Random pick keeps concurrent requesters from all chasing the first free slot
            let Some(slot) = free.choose(&mut rand::thread_rng()).cloned() else {
                return Err(BookingError::CapacityExceeded {
                    unit: request.unit.to_string(),
                });
            };

            match self.reserve_slot(request, &slot).await {
                Err(BookingError::AlreadyAllocated { .. }) => {
                    debug!(
                        "Slot {} on {} taken under us (attempt {})",
                        slot, request.unit, attempt
                    );
                }
                other => return other,
            }
        }

        warn!(
            "Gave up auto-assigning on {} after {} attempts",
            request.unit, AUTO_ASSIGN_ATTEMPTS
        );
        Err(BookingError::CapacityExceeded {
            unit: request.unit.to_string(),
        })
    }
}

fn allocation_for(unit: &UnitKey, slot: &str, guests: Option<u32>) -> Allocation {
    match unit {
        UnitKey::Flight { .. } => Allocation::seat(slot),
        UnitKey::Place { .. } => Allocation::room(slot, guests.unwrap_or(1)),
    }
}

fn outcome_label(e: &BookingError) -> &'static str {
    match e {
        BookingError::AlreadyAllocated { .. } => "already_allocated",
        BookingError::CapacityExceeded { .. } => "capacity_exceeded",
        BookingError::UnitNotFound(_) => "unit_not_found",
        BookingError::InvalidAllocation(_) => "invalid_allocation",
        _ => "error",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use futures_util::future::join_all;
    use std::collections::HashSet;
    use tembea_core::notify::RecordingNotifier;
    use tembea_core::{BookableUnit, BookingStatus};
    use tembea_store::MemoryStore;

    struct Harness {
        engine: Arc<ReservationEngine>,
        notifier: Arc<RecordingNotifier>,
    }

    async fn harness(units: Vec<BookableUnit>) -> Harness {
        let store = Arc::new(MemoryStore::new());
        let inventory = Arc::new(ResourceInventory::new(store.clone()));
        for unit in &units {
            inventory.register(unit).await.unwrap();
        }
        let notifier = Arc::new(RecordingNotifier::new());
        let engine = ReservationEngine::new(
            inventory,
            Arc::new(BookingLifecycle::new(store)),
            notifier.clone(),
        );
        Harness {
            engine: Arc::new(engine),
            notifier,
        }
    }

    fn seat_request(user: &str, seat: Option<&str>) -> ReservationRequest {
        ReservationRequest {
            unit: UnitKey::flight("FL100"),
            requester: Requester::new(user, None),
            slot: seat.map(str::to_string),
            guests: None,
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_two_requesters_race_for_the_last_seat() {
        let h = harness(vec![BookableUnit::flight("FL100", 1, 20_000, "KES")]).await;

        let attempts = ["alice", "bob"].map(|user| {
            let engine = h.engine.clone();
            tokio::spawn(async move { engine.reserve(seat_request(user, Some("12A"))).await })
        });
        let results: Vec<_> = join_all(attempts)
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .collect();

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .any(|r| matches!(r, Err(BookingError::AlreadyAllocated { .. }))));
        assert_eq!(h.engine.inventory().available(&UnitKey::flight("FL100")).await.unwrap(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_auto_assignment_never_double_allocates() {
        let h = harness(vec![BookableUnit::flight("FL200", 6, 15_000, "KES")
            .with_slots((1..=6).map(|n| format!("{}A", n)).collect())])
        .await;

        let attempts = (0..10).map(|i| {
            let engine = h.engine.clone();
            tokio::spawn(async move {
                engine
                    .reserve(ReservationRequest {
                        unit: UnitKey::flight("FL200"),
                        requester: Requester::new(format!("user-{}", i), None),
                        slot: None,
                        guests: None,
                    })
                    .await
            })
        });
        let granted: Vec<Booking> = join_all(attempts)
            .await
            .into_iter()
            .filter_map(|r| r.unwrap().ok())
            .collect();

        let seats: HashSet<_> = granted.iter().map(|b| b.allocation.slot().to_string()).collect();
        assert!(!granted.is_empty());
        assert_eq!(seats.len(), granted.len());

        let key = UnitKey::flight("FL200");
        let left = h.engine.inventory().available(&key).await.unwrap();
        assert_eq!(left as usize, 6 - granted.len());
        assert_eq!(h.engine.inventory().available_slots(&key).await.unwrap().len(), left as usize);
    }

    #[tokio::test]
    async fn test_stay_is_priced_per_night_and_stays_pending() {
        let check_in = NaiveDate::from_ymd_opt(2026, 3, 1).unwrap();
        let check_out = NaiveDate::from_ymd_opt(2026, 3, 4).unwrap();
        let unit = BookableUnit::place_stay(7, check_in, check_out, 2, 5_000, "KES").unwrap();
        let h = harness(vec![unit.clone()]).await;

        let booking = h
            .engine
            .reserve(ReservationRequest {
                unit: unit.key.clone(),
                requester: Requester::new("guest", None),
                slot: Some("1".to_string()),
                guests: Some(2),
            })
            .await
            .unwrap();

        assert_eq!(booking.amount, 15_000);
        assert_eq!(booking.status, BookingStatus::Pending);
        assert_eq!(booking.allocation, Allocation::room("1", 2));
        assert!(h.notifier.sent().await.is_empty());
    }

    #[tokio::test]
    async fn test_free_booking_is_confirmed_and_notified() {
        let h = harness(vec![BookableUnit::flight("FL100", 3, 0, "KES")]).await;

        let booking = h.engine.reserve(seat_request("alice", Some("1C"))).await.unwrap();
        assert_eq!(booking.status, BookingStatus::Confirmed);

        let sent = h.notifier.sent().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1.booking_id, Some(booking.id));
        assert_eq!(sent[0].1.payment_reference, None);
    }

    #[tokio::test]
    async fn test_full_unit_reports_capacity() {
        let h = harness(vec![BookableUnit::flight("FL100", 1, 20_000, "KES")]).await;
        h.engine.reserve(seat_request("alice", None)).await.unwrap();

        assert!(matches!(
            h.engine.reserve(seat_request("bob", None)).await,
            Err(BookingError::CapacityExceeded { .. })
        ));
        assert!(matches!(
            h.engine.reserve(seat_request("bob", Some("9F"))).await,
            Err(BookingError::CapacityExceeded { .. })
        ));
    }
}
