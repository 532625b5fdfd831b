use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tembea_core::{BookingError, BookingEvent};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::lifecycle::BookingLifecycle;
use crate::metrics;

/// Bookings swept per pass.
const SWEEP_BATCH: i64 = 100;

/// Cancels unpaid bookings whose hold has run out, giving their slots back.
///
/// Goes through the regular locked transition, so a booking that gets paid while the sweeper is
/// looking at it stays confirmed.
pub struct HoldSweeper {
    lifecycle: Arc<BookingLifecycle>,
    hold: chrono::Duration,
}

impl HoldSweeper {
    pub fn new(lifecycle: Arc<BookingLifecycle>, hold: Duration) -> Self {
        Self {
            lifecycle,
            hold: chrono::Duration::from_std(hold).unwrap_or_else(|_| chrono::Duration::days(365)),
        }
    }

    /// One pass over holds older than the hold period at `now`. Returns how many were released.
    pub async fn sweep_once(&self, now: DateTime<Utc>) -> Result<usize, BookingError> {
        let cutoff = now - self.hold;
        let stale = self.lifecycle.stale_pending(cutoff, SWEEP_BATCH).await?;
        let mut released = 0;

        for id in stale {
            match self.lifecycle.transition(id, BookingEvent::Expire).await {
                Ok((_, transition)) if transition.releases => {
                    released += 1;
                    metrics::record_hold_expired();
                }
                Ok(_) => {}
                Err(BookingError::AlreadyProcessed { status }) => {
                    debug!("Booking {} became {} before its hold expired", id, status);
                }
                Err(e) => error!("Failed to expire booking {}: {}", id, e),
            }
        }

        if released > 0 {
            info!("Expired {} unpaid holds", released);
        }
        Ok(released)
    }

    pub fn spawn(self: Arc<Self>, every: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                ticker.tick().await;
                if let Err(e) = self.sweep_once(Utc::now()).await {
                    error!("Hold sweep failed: {}", e);
                }
            }
        })
    }
}
