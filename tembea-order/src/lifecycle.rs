use chrono::{DateTime, Utc};
use std::sync::Arc;
use tembea_core::notify::{BookingSummary, Notifier};
use tembea_core::{
    Booking, BookingError, BookingEvent, BookingRepository, Payment, Requester, Transition,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::metrics;

/// Drives bookings through their lifecycle. Every transition is a locked read-modify-write in
/// the repository; cancellation releases the hold in the same unit of work.
pub struct BookingLifecycle {
    bookings: Arc<dyn BookingRepository>,
}

impl BookingLifecycle {
    pub fn new(bookings: Arc<dyn BookingRepository>) -> Self {
        Self { bookings }
    }

    pub async fn get(&self, id: Uuid) -> Result<Booking, BookingError> {
        self.bookings
            .get_booking(id)
            .await?
            .ok_or(BookingError::NotFound(id))
    }

    pub async fn list_for(&self, user_id: &str) -> Result<Vec<Booking>, BookingError> {
        Ok(self.bookings.list_for_requester(user_id).await?)
    }

    pub async fn transition(
        &self,
        id: Uuid,
        event: BookingEvent,
    ) -> Result<(Booking, Transition), BookingError> {
        let (booking, transition) = match self.bookings.apply_event(id, event).await {
            Ok(applied) => applied,
            Err(e) => {
                debug!("Booking {} refused {}: {}", id, event, e);
                return Err(e);
            }
        };

        if transition.is_noop() {
            debug!("Booking {} already {}, {} ignored", id, transition.to, event);
        } else {
            info!(
                "Booking {} {} -> {}{}",
                id,
                transition.from,
                transition.to,
                if transition.releases { " (hold released)" } else { "" }
            );
            metrics::record_transition(&event.to_string(), transition.to.as_str());
        }
        Ok((booking, transition))
    }

    pub async fn confirm(&self, id: Uuid) -> Result<(Booking, Transition), BookingError> {
        self.transition(id, BookingEvent::Confirm).await
    }

    /// Cancelling a cancelled booking returns it unchanged.
    pub async fn cancel(&self, id: Uuid) -> Result<Booking, BookingError> {
        Ok(self.transition(id, BookingEvent::Cancel).await?.0)
    }

    pub async fn check_in(&self, id: Uuid) -> Result<Booking, BookingError> {
        Ok(self.transition(id, BookingEvent::CheckIn).await?.0)
    }

    pub async fn stale_pending(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Uuid>, BookingError> {
        Ok(self.bookings.stale_pending(cutoff, limit).await?)
    }
}

pub(crate) fn booking_summary(booking: &Booking, payment: Option<&Payment>) -> BookingSummary {
    BookingSummary {
        booking_id: Some(booking.id),
        unit: Some(booking.unit.to_string()),
        slot: Some(booking.allocation.slot().to_string()),
        payment_reference: payment.map(|p| p.reference.clone()),
        method: payment.map(|p| p.method),
        amount: payment.map(|p| p.amount).unwrap_or(booking.amount),
        currency: booking.currency.clone(),
    }
}

/// Fire-and-forget delivery; a failed notification never fails the caller.
pub(crate) async fn deliver(notifier: &dyn Notifier, recipient: &Requester, summary: &BookingSummary) {
    if let Err(e) = notifier.notify(recipient, summary).await {
        warn!(
            "Notification for {:?} to user {} failed: {}",
            summary.booking_id, recipient.user_id, e
        );
    }
}
