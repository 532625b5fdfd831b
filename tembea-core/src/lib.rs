pub mod unit;
pub mod booking;
pub mod payment;
pub mod repository;
pub mod notify;

pub use booking::{Booking, BookingError, BookingEvent, BookingStatus, Requester, Transition};
pub use payment::{
    GatewayAdapter, GatewayError, GatewayOutcome, InitiateRequest, Initiated, OutcomeSource,
    Payment, PaymentMetadata, PaymentMethod, PaymentStatus, Settlement,
};
pub use repository::{BookingRepository, InventoryRepository, PaymentRepository, StoreError};
pub use unit::{Allocation, BookableUnit, UnitAvailability, UnitKey};

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Validation failed: {0}")]
    ValidationError(String),
    #[error("Malformed unit key: {0}")]
    MalformedKey(String),
}

pub type CoreResult<T> = Result<T, CoreError>;
