pub mod breaker;
pub mod expiry;
pub mod lifecycle;
pub mod metrics;
pub mod reconciler;
pub mod registry;
pub mod reservation;

pub use breaker::{CircuitBreaker, CircuitState};
pub use expiry::HoldSweeper;
pub use lifecycle::BookingLifecycle;
pub use reconciler::{OutcomeReport, PaymentReconciler, PaymentSession, ReconcileError};
pub use registry::GatewayRegistry;
pub use reservation::{ReservationEngine, ReservationRequest};
