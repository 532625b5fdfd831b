use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tembea_shared::Masked;
use uuid::Uuid;

use crate::repository::StoreError;
use crate::unit::{Allocation, UnitKey};

/// The user on whose behalf a booking or payment exists.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Requester {
    pub user_id: String,
    pub email: Option<Masked<String>>,
}

impl Requester {
    pub fn new(user_id: impl Into<String>, email: Option<String>) -> Self {
        Self {
            user_id: user_id.into(),
            email: email.map(Masked::new),
        }
    }
}

/// Booking status in the lifecycle
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    CheckedIn,
    Cancelled,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::CheckedIn => "checked_in",
            BookingStatus::Cancelled => "cancelled",
        }
    }

    /// Whether the booking still holds its allocation.
    pub fn is_active(&self) -> bool {
        !matches!(self, BookingStatus::Cancelled)
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BookingStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(BookingStatus::Pending),
            "confirmed" => Ok(BookingStatus::Confirmed),
            "checked_in" => Ok(BookingStatus::CheckedIn),
            "cancelled" => Ok(BookingStatus::Cancelled),
            other => Err(StoreError::Corrupt(format!("unknown booking status {}", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BookingEvent {
    /// Payment succeeded, or no payment was required.
    Confirm,
    CheckIn,
    Cancel,
    /// Cancel only if the booking is still unpaid.
    Expire,
}

impl fmt::Display for BookingEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BookingEvent::Confirm => "confirm",
            BookingEvent::CheckIn => "check in",
            BookingEvent::Cancel => "cancel",
            BookingEvent::Expire => "expire",
        })
    }
}

/// Result of applying an event. `from == to` means nothing changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: BookingStatus,
    pub to: BookingStatus,
    /// The held allocation must be released in the same unit of work.
    pub releases: bool,
}

impl Transition {
    pub fn is_noop(&self) -> bool {
        self.from == self.to
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Booking {
    pub id: Uuid,
    pub unit: UnitKey,
    pub requester: Requester,
    pub allocation: Allocation,
    pub status: BookingStatus,
    pub amount: i64,
    pub currency: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Booking {
    pub fn new(
        unit: UnitKey,
        requester: Requester,
        allocation: Allocation,
        amount: i64,
        currency: &str,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            unit,
            requester,
            allocation,
            status: BookingStatus::Pending,
            amount,
            currency: currency.to_string(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn requires_payment(&self) -> bool {
        self.amount > 0
    }

    /// Applies a lifecycle event.
    ///
    /// ```text
    /// pending    --confirm--> confirmed
    /// pending    --cancel---> cancelled   (releases)
    /// confirmed  --check in-> checked_in
    /// confirmed  --cancel---> cancelled   (releases)
    /// cancelled  --cancel---> cancelled   (no-op)
    /// pending    --expire---> cancelled   (releases)
    /// cancelled  --expire---> cancelled   (no-op)
    /// ```
    /// Repeating confirm or check-in on a booking that is already past that point yields
    /// `AlreadyProcessed`; everything else is an `InvalidTransition`.
    pub fn apply(&mut self, event: BookingEvent) -> Result<Transition, BookingError> {
        use BookingStatus::*;

        let from = self.status;
        let (to, releases) = match (from, event) {
            (Pending, BookingEvent::Confirm) => (Confirmed, false),
            (Confirmed, BookingEvent::CheckIn) => (CheckedIn, false),
            (Pending | Confirmed, BookingEvent::Cancel) | (Pending, BookingEvent::Expire) => {
                (Cancelled, true)
            }
            (Cancelled, BookingEvent::Cancel | BookingEvent::Expire) => (Cancelled, false),
            (Confirmed | CheckedIn, BookingEvent::Confirm | BookingEvent::Expire)
            | (CheckedIn, BookingEvent::CheckIn) => {
                return Err(BookingError::AlreadyProcessed { status: from })
            }
            (Pending | Cancelled, BookingEvent::CheckIn)
            | (Cancelled, BookingEvent::Confirm)
            | (CheckedIn, BookingEvent::Cancel) => {
                return Err(BookingError::InvalidTransition { from, event })
            }
        };

        if to != from {
            self.status = to;
            self.updated_at = Utc::now();
        }

        Ok(Transition { from, to, releases })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BookingError {
    #[error("Unit not found: {0}")]
    UnitNotFound(String),

    #[error("Booking not found: {0}")]
    NotFound(Uuid),

    #[error("No capacity left on {unit}")]
    CapacityExceeded { unit: String },

    #[error("{slot} is already allocated on {unit}")]
    AlreadyAllocated { unit: String, slot: String },

    #[error("Invalid allocation: {0}")]
    InvalidAllocation(String),

    #[error("Cannot {event} a {from} booking")]
    InvalidTransition {
        from: BookingStatus,
        event: BookingEvent,
    },

    #[error("Booking already {status}")]
    AlreadyProcessed { status: BookingStatus },

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending_booking() -> Booking {
        Booking::new(
            UnitKey::flight("FL100"),
            Requester::new("user-1", Some("user@example.com".to_string())),
            Allocation::seat("12A"),
            20_000,
            "KES",
        )
    }

    #[test]
    fn test_booking_lifecycle() {
        let mut booking = pending_booking();

        // Pending → Confirmed
        let t = booking.apply(BookingEvent::Confirm).unwrap();
        assert_eq!((t.from, t.to, t.releases), (BookingStatus::Pending, BookingStatus::Confirmed, false));

        // Confirmed → CheckedIn
        booking.apply(BookingEvent::CheckIn).unwrap();
        assert_eq!(booking.status, BookingStatus::CheckedIn);

        // Repeat check-in is rejected
        let err = booking.apply(BookingEvent::CheckIn).unwrap_err();
        assert!(matches!(err, BookingError::AlreadyProcessed { status: BookingStatus::CheckedIn }));

        // Checked-in is terminal
        let err = booking.apply(BookingEvent::Cancel).unwrap_err();
        assert!(matches!(err, BookingError::InvalidTransition { .. }));
    }

    #[test]
    fn test_check_in_requires_confirmation() {
        let mut booking = pending_booking();
        let err = booking.apply(BookingEvent::CheckIn).unwrap_err();
        assert!(matches!(
            err,
            BookingError::InvalidTransition { from: BookingStatus::Pending, event: BookingEvent::CheckIn }
        ));
        assert_eq!(booking.status, BookingStatus::Pending);
    }

    #[test]
    fn test_cancel_releases_once() {
        let mut booking = pending_booking();

        let first = booking.apply(BookingEvent::Cancel).unwrap();
        assert!(first.releases);
        assert!(!first.is_noop());

        let second = booking.apply(BookingEvent::Cancel).unwrap();
        assert!(!second.releases);
        assert!(second.is_noop());

        // A cancelled booking can never be confirmed
        assert!(matches!(
            booking.apply(BookingEvent::Confirm),
            Err(BookingError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_expire_never_touches_paid_bookings() {
        let mut booking = pending_booking();
        booking.apply(BookingEvent::Confirm).unwrap();
        assert!(matches!(
            booking.apply(BookingEvent::Expire),
            Err(BookingError::AlreadyProcessed { status: BookingStatus::Confirmed })
        ));

        let mut unpaid = pending_booking();
        assert!(unpaid.apply(BookingEvent::Expire).unwrap().releases);
        assert!(unpaid.apply(BookingEvent::Expire).unwrap().is_noop());
    }

    #[test]
    fn test_repeat_confirmation_detected() {
        let mut booking = pending_booking();
        booking.apply(BookingEvent::Confirm).unwrap();
        let updated_at = booking.updated_at;

        assert!(matches!(
            booking.apply(BookingEvent::Confirm),
            Err(BookingError::AlreadyProcessed { status: BookingStatus::Confirmed })
        ));
        assert_eq!(booking.updated_at, updated_at);
    }
}
