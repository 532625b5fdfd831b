use std::sync::Arc;
use tembea_order::{BookingLifecycle, PaymentReconciler, ReservationEngine};
use tembea_store::app_config::RateLimitConfig;

use crate::middleware::RateLimiter;

#[derive(Clone)]
pub struct AuthConfig {
    pub secret: String,
}

#[derive(Clone)]
pub struct AppState {
    pub reservations: Arc<ReservationEngine>,
    pub lifecycle: Arc<BookingLifecycle>,
    pub reconciler: Arc<PaymentReconciler>,
    /// Rate limiting is off without a limiter.
    pub rate_limiter: Option<Arc<dyn RateLimiter>>,
    pub rate_limit: RateLimitConfig,
    pub auth: AuthConfig,
}
