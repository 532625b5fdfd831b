use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::booking::Requester;
use crate::payment::{OutcomeSource, PaymentMethod, PaymentStatus};

/// What a requester is told when a booking is confirmed or a payment settles.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct BookingSummary {
    pub booking_id: Option<Uuid>,
    pub unit: Option<String>,
    pub slot: Option<String>,
    pub payment_reference: Option<String>,
    pub method: Option<PaymentMethod>,
    pub amount: i64,
    pub currency: String,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum InconsistencyKind {
    /// Two signals reported different terminal outcomes for one reference.
    ConflictingOutcome,
    /// Money was taken for a booking that had already been cancelled.
    PaidCancelledBooking,
    /// Provider amount differs from the amount we asked for.
    AmountMismatch,
    /// A second charge succeeded for a booking another payment already confirmed.
    DuplicatePayment,
}

impl InconsistencyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            InconsistencyKind::ConflictingOutcome => "conflicting_outcome",
            InconsistencyKind::PaidCancelledBooking => "paid_cancelled_booking",
            InconsistencyKind::AmountMismatch => "amount_mismatch",
            InconsistencyKind::DuplicatePayment => "duplicate_payment",
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct InconsistencyAlert {
    pub kind: InconsistencyKind,
    pub reference: String,
    pub stored_status: PaymentStatus,
    pub incoming_status: PaymentStatus,
    pub source: OutcomeSource,
    pub detail: String,
    pub detected_at: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("Notification delivery failed: {0}")]
    Delivery(String),
}

/// Outbound notifications. Callers log failures and move on.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, recipient: &Requester, summary: &BookingSummary) -> Result<(), NotifyError>;

    async fn alert(&self, alert: &InconsistencyAlert) -> Result<(), NotifyError>;
}

/// Writes notifications to the log. Used when no broker is configured.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, recipient: &Requester, summary: &BookingSummary) -> Result<(), NotifyError> {
        tracing::info!(
            user_id = %recipient.user_id,
            email = ?recipient.email,
            booking_id = ?summary.booking_id,
            reference = ?summary.payment_reference,
            "Confirmation for {} {}",
            summary.amount,
            summary.currency
        );
        Ok(())
    }

    async fn alert(&self, alert: &InconsistencyAlert) -> Result<(), NotifyError> {
        tracing::warn!(
            reference = %alert.reference,
            kind = alert.kind.as_str(),
            "Payment inconsistency: {}",
            alert.detail
        );
        Ok(())
    }
}

/// Keeps everything it is handed. Lets tests count side effects.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<(Requester, BookingSummary)>>,
    alerts: Mutex<Vec<InconsistencyAlert>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn sent(&self) -> Vec<(Requester, BookingSummary)> {
        self.sent.lock().await.clone()
    }

    pub async fn alerts(&self) -> Vec<InconsistencyAlert> {
        self.alerts.lock().await.clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, recipient: &Requester, summary: &BookingSummary) -> Result<(), NotifyError> {
        self.sent.lock().await.push((recipient.clone(), summary.clone()));
        Ok(())
    }

    async fn alert(&self, alert: &InconsistencyAlert) -> Result<(), NotifyError> {
        self.alerts.lock().await.push(alert.clone());
        Ok(())
    }
}
