use serde::{Deserialize, Serialize};
use tembea_core::{Allocation, BookableUnit, BookingError};

/// Price of one allocation, in minor currency units.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Quote {
    pub amount: i64,
    pub currency: String,
}

/// Flights are priced per seat; stays per room-night.
pub fn quote(unit: &BookableUnit, allocation: &Allocation) -> Result<Quote, BookingError> {
    let multiplier = match allocation {
        Allocation::Seat { .. } => 1,
        Allocation::Room { .. } => unit.key.nights(),
    };

    let amount = unit.price.checked_mul(multiplier).ok_or_else(|| {
        BookingError::InvalidAllocation(format!("price overflow on {}", unit.key))
    })?;

    if amount < 0 {
        return Err(BookingError::InvalidAllocation(format!(
            "negative price on {}",
            unit.key
        )));
    }

    Ok(Quote {
        amount,
        currency: unit.currency.clone(),
    })
}
