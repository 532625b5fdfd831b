use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::booking::BookingError;
use crate::{CoreError, CoreResult};

/// Stable identity of something with finite capacity: a flight, or a place over a date range.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UnitKey {
    Flight {
        flight_number: String,
    },
    Place {
        place_id: i64,
        check_in: NaiveDate,
        check_out: NaiveDate,
    },
}

impl UnitKey {
    pub fn flight(flight_number: impl Into<String>) -> Self {
        UnitKey::Flight {
            flight_number: flight_number.into().trim().to_uppercase(),
        }
    }

    pub fn place(place_id: i64, check_in: NaiveDate, check_out: NaiveDate) -> CoreResult<Self> {
        if check_out <= check_in {
            return Err(CoreError::ValidationError(format!(
                "check-out {} must be after check-in {}",
                check_out, check_in
            )));
        }
        Ok(UnitKey::Place {
            place_id,
            check_in,
            check_out,
        })
    }

    /// Number of nights for a stay; flights count as one.
    pub fn nights(&self) -> i64 {
        match self {
            UnitKey::Flight { .. } => 1,
            UnitKey::Place {
                check_in,
                check_out,
                ..
            } => (*check_out - *check_in).num_days(),
        }
    }

    pub fn is_flight(&self) -> bool {
        matches!(self, UnitKey::Flight { .. })
    }
}

impl fmt::Display for UnitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnitKey::Flight { flight_number } => write!(f, "flight:{}", flight_number),
            UnitKey::Place {
                place_id,
                check_in,
                check_out,
            } => write!(f, "place:{}:{}:{}", place_id, check_in, check_out),
        }
    }
}

impl FromStr for UnitKey {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').collect();
        match parts.as_slice() {
            ["flight", number] if !number.is_empty() => Ok(UnitKey::flight(*number)),
            ["place", id, check_in, check_out] => {
                let place_id = id
                    .parse::<i64>()
                    .map_err(|_| CoreError::MalformedKey(s.to_string()))?;
                let check_in = NaiveDate::parse_from_str(check_in, "%Y-%m-%d")
                    .map_err(|_| CoreError::MalformedKey(s.to_string()))?;
                let check_out = NaiveDate::parse_from_str(check_out, "%Y-%m-%d")
                    .map_err(|_| CoreError::MalformedKey(s.to_string()))?;
                UnitKey::place(place_id, check_in, check_out)
            }
            _ => Err(CoreError::MalformedKey(s.to_string())),
        }
    }
}

/// The specific resource claimed inside a unit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Allocation {
    Seat { seat_number: String },
    Room { room: String, guests: u32 },
}

impl Allocation {
    pub fn seat(seat_number: impl Into<String>) -> Self {
        Allocation::Seat {
            seat_number: seat_number.into().trim().to_uppercase(),
        }
    }

    pub fn room(room: impl Into<String>, guests: u32) -> Self {
        Allocation::Room {
            room: room.into().trim().to_uppercase(),
            guests,
        }
    }

    /// Uniqueness key inside the unit.
    pub fn slot(&self) -> &str {
        match self {
            Allocation::Seat { seat_number } => seat_number,
            Allocation::Room { room, .. } => room,
        }
    }
}

impl fmt::Display for Allocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Allocation::Seat { seat_number } => write!(f, "seat {}", seat_number),
            Allocation::Room { room, guests } => write!(f, "room {} ({} guests)", room, guests),
        }
    }
}

/// A flight or place-with-dates with finite capacity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BookableUnit {
    pub key: UnitKey,
    pub capacity: i32,
    /// Valid seat or room labels. `None` accepts any label.
    pub slots: Option<Vec<String>>,
    /// Minor currency units per seat, or per room-night for places.
    pub price: i64,
    pub currency: String,
}

impl BookableUnit {
    pub fn flight(flight_number: &str, capacity: i32, price: i64, currency: &str) -> Self {
        Self {
            key: UnitKey::flight(flight_number),
            capacity,
            slots: None,
            price,
            currency: currency.to_string(),
        }
    }

    pub fn place_stay(
        place_id: i64,
        check_in: NaiveDate,
        check_out: NaiveDate,
        rooms: i32,
        nightly_price: i64,
        currency: &str,
    ) -> CoreResult<Self> {
        Ok(Self {
            key: UnitKey::place(place_id, check_in, check_out)?,
            capacity: rooms,
            slots: None,
            price: nightly_price,
            currency: currency.to_string(),
        })
    }

    pub fn with_slots(mut self, slots: Vec<String>) -> Self {
        self.slots = Some(slots.into_iter().map(|s| s.trim().to_uppercase()).collect());
        self
    }

    /// The labels a requester may pick from: the slot map, or `1..=capacity`.
    pub fn slot_labels(&self) -> Vec<String> {
        match &self.slots {
            Some(slots) => slots.clone(),
            None => (1..=self.capacity.max(0)).map(|n| n.to_string()).collect(),
        }
    }

    pub fn admits(&self, slot: &str) -> bool {
        match &self.slots {
            Some(slots) => slots.iter().any(|s| s == slot),
            None => true,
        }
    }

    /// Validates an allocation against the slots currently held on this unit.
    ///
    /// Must run under the unit's lock. Duplicates are reported before capacity so that two
    /// requests for the same seat on a full unit still see `AlreadyAllocated`.
    pub fn check_reserve<S: AsRef<str>>(
        &self,
        allocation: &Allocation,
        held: &[S],
    ) -> Result<(), BookingError> {
        match (&self.key, allocation) {
            (UnitKey::Flight { .. }, Allocation::Seat { .. }) => {}
            (UnitKey::Place { .. }, Allocation::Room { guests, .. }) => {
                if *guests == 0 {
                    return Err(BookingError::InvalidAllocation(
                        "a room booking needs at least one guest".to_string(),
                    ));
                }
            }
            _ => {
                return Err(BookingError::InvalidAllocation(format!(
                    "{} cannot be booked on {}",
                    allocation, self.key
                )))
            }
        }

        let slot = allocation.slot();
        if slot.is_empty() {
            return Err(BookingError::InvalidAllocation("empty slot label".to_string()));
        }
        if !self.admits(slot) {
            return Err(BookingError::InvalidAllocation(format!(
                "{} does not exist on {}",
                slot, self.key
            )));
        }

        if held.iter().any(|h| h.as_ref() == slot) {
            return Err(BookingError::AlreadyAllocated {
                unit: self.key.to_string(),
                slot: slot.to_string(),
            });
        }

        if self.capacity - held.len() as i32 <= 0 {
            return Err(BookingError::CapacityExceeded {
                unit: self.key.to_string(),
            });
        }

        Ok(())
    }

    pub fn availability(&self, reserved: i32) -> UnitAvailability {
        UnitAvailability {
            key: self.key.clone(),
            capacity: self.capacity,
            reserved,
            available: (self.capacity - reserved).max(0),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UnitAvailability {
    pub key: UnitKey,
    pub capacity: i32,
    pub reserved: i32,
    pub available: i32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_unit_key_storage_format() {
        let flight = UnitKey::flight("fl100");
        assert_eq!(flight.to_string(), "flight:FL100");
        assert_eq!("flight:FL100".parse::<UnitKey>().unwrap(), flight);

        let stay = UnitKey::place(42, date("2026-03-01"), date("2026-03-05")).unwrap();
        assert_eq!(stay.to_string(), "place:42:2026-03-01:2026-03-05");
        assert_eq!(stay.to_string().parse::<UnitKey>().unwrap(), stay);
        assert_eq!(stay.nights(), 4);

        assert!("boat:1".parse::<UnitKey>().is_err());
        assert!(UnitKey::place(42, date("2026-03-05"), date("2026-03-05")).is_err());
    }

    #[test]
    fn test_duplicate_reported_before_capacity() {
        let unit = BookableUnit::flight("FL100", 1, 20_000, "KES");
        let err = unit
            .check_reserve(&Allocation::seat("12A"), &["12A"])
            .unwrap_err();
        assert!(matches!(err, BookingError::AlreadyAllocated { .. }));

        let err = unit
            .check_reserve(&Allocation::seat("12B"), &["12A"])
            .unwrap_err();
        assert!(matches!(err, BookingError::CapacityExceeded { .. }));
    }

    #[test]
    fn test_slot_map_and_kind_validation() {
        let unit = BookableUnit::flight("FL200", 4, 20_000, "KES")
            .with_slots(vec!["1a".into(), "1b".into(), "2a".into(), "2b".into()]);
        let none: [&str; 0] = [];

        assert!(unit.check_reserve(&Allocation::seat("1A"), &none).is_ok());
        assert!(matches!(
            unit.check_reserve(&Allocation::seat("9Z"), &none),
            Err(BookingError::InvalidAllocation(_))
        ));
        assert!(matches!(
            unit.check_reserve(&Allocation::room("101", 2), &none),
            Err(BookingError::InvalidAllocation(_))
        ));

        let stay = BookableUnit::place_stay(7, date("2026-01-01"), date("2026-01-03"), 2, 5_000, "KES")
            .unwrap();
        assert!(matches!(
            stay.check_reserve(&Allocation::room("1", 0), &none),
            Err(BookingError::InvalidAllocation(_))
        ));
        assert!(stay.check_reserve(&Allocation::room("1", 2), &none).is_ok());
        assert_eq!(stay.slot_labels(), vec!["1".to_string(), "2".to_string()]);
    }
}
