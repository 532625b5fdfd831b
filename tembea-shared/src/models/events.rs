use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::pii::Masked;

pub const TOPIC_BOOKING_CONFIRMED: &str = "booking.confirmed";
pub const TOPIC_PAYMENT_SUCCEEDED: &str = "payment.succeeded";
pub const TOPIC_PAYMENT_INCONSISTENCY: &str = "payment.inconsistency";

/// Published once per booking, when the first successful payment confirms it.
#[derive(Debug, serde::Serialize, serde::Deserialize, Clone)]
pub struct BookingConfirmedEvent {
    pub booking_id: Uuid,
    pub unit: String,
    pub slot: String,
    pub requester_id: String,
    pub requester_email: Option<Masked<String>>,
    pub payment_reference: Option<String>,
    pub amount: i64,
    pub currency: String,
    pub timestamp: i64,
}

/// Published for payments that settle without a linked booking.
#[derive(Debug, serde::Serialize, serde::Deserialize, Clone)]
pub struct PaymentSucceededEvent {
    pub reference: String,
    pub requester_id: String,
    pub requester_email: Option<Masked<String>>,
    pub amount: i64,
    pub currency: String,
    pub method: String,
    pub timestamp: i64,
}

/// A reconciliation anomaly for one reference. The stored status is kept.
#[derive(Debug, serde::Serialize, serde::Deserialize, Clone)]
pub struct PaymentInconsistencyEvent {
    pub reference: String,
    pub kind: String,
    pub stored_status: String,
    pub incoming_status: String,
    pub source: String,
    pub detail: String,
    pub detected_at: DateTime<Utc>,
}
