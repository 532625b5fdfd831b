use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::booking::Requester;
use crate::repository::StoreError;

/// Provider tag selecting the gateway adapter.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    Mpesa,
    #[serde(alias = "card", alias = "visa")]
    Stripe,
    Paystack,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Mpesa => "mpesa",
            PaymentMethod::Stripe => "stripe",
            PaymentMethod::Paystack => "paystack",
        }
    }

    /// Prefix for system-generated references.
    pub fn reference_prefix(&self) -> &'static str {
        match self {
            PaymentMethod::Mpesa => "mpesa",
            PaymentMethod::Stripe | PaymentMethod::Paystack => "pay",
        }
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentMethod {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mpesa" => Ok(PaymentMethod::Mpesa),
            "stripe" | "card" | "visa" => Ok(PaymentMethod::Stripe),
            "paystack" => Ok(PaymentMethod::Paystack),
            other => Err(StoreError::Corrupt(format!("unknown payment method {}", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Success,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Success => "success",
            PaymentStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, PaymentStatus::Pending)
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PaymentStatus::Pending),
            "success" => Ok(PaymentStatus::Success),
            "failed" => Ok(PaymentStatus::Failed),
            other => Err(StoreError::Corrupt(format!("unknown payment status {}", other))),
        }
    }
}

/// Which signal carried an outcome.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeSource {
    Initiation,
    Webhook,
    Poll,
}

impl OutcomeSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeSource::Initiation => "initiation",
            OutcomeSource::Webhook => "webhook",
            OutcomeSource::Poll => "poll",
        }
    }
}

impl fmt::Display for OutcomeSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutcomeSource {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "initiation" => Ok(OutcomeSource::Initiation),
            "webhook" => Ok(OutcomeSource::Webhook),
            "poll" => Ok(OutcomeSource::Poll),
            other => Err(StoreError::Corrupt(format!("unknown outcome source {}", other))),
        }
    }
}

/// What we send to a provider and expect back on webhooks and verification.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PaymentMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub booking_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl PaymentMetadata {
    /// Lenient extraction from a provider metadata object. Providers echo ids back as strings or
    /// numbers, and sometimes send an empty string instead of an object.
    pub fn from_json(value: &Value) -> Self {
        let text = |key: &str| match value.get(key) {
            Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        };

        Self {
            booking_id: text("booking_id").and_then(|s| Uuid::parse_str(&s).ok()),
            user_id: text("user_id"),
            email: text("email"),
        }
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Payment {
    pub id: Uuid,
    pub reference: String,
    pub amount: i64,
    pub currency: String,
    pub method: PaymentMethod,
    pub status: PaymentStatus,
    pub booking_id: Option<Uuid>,
    pub requester: Option<Requester>,
    pub settled_by: Option<OutcomeSource>,
    pub settled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Result of offering an outcome to a stored payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    /// First terminal write for this reference.
    Applied(PaymentStatus),
    /// Already terminal and the incoming outcome agrees, or carries no news.
    Unchanged(PaymentStatus),
    /// Already terminal and the incoming outcome contradicts it. Stored status kept.
    Conflict {
        stored: PaymentStatus,
        incoming: PaymentStatus,
    },
    StillPending,
}

impl Payment {
    pub fn pending(
        reference: impl Into<String>,
        amount: i64,
        currency: &str,
        method: PaymentMethod,
        booking_id: Option<Uuid>,
        requester: Option<Requester>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            reference: reference.into(),
            amount,
            currency: currency.to_string(),
            method,
            status: PaymentStatus::Pending,
            booking_id,
            requester,
            settled_by: None,
            settled_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// First terminal write wins; the status never moves back.
    pub fn settle(&mut self, incoming: PaymentStatus, source: OutcomeSource) -> Settlement {
        match (self.status, incoming) {
            (PaymentStatus::Pending, PaymentStatus::Pending) => Settlement::StillPending,
            (PaymentStatus::Pending, terminal) => {
                let now = Utc::now();
                self.status = terminal;
                self.settled_by = Some(source);
                self.settled_at = Some(now);
                self.updated_at = now;
                Settlement::Applied(terminal)
            }
            (stored, PaymentStatus::Pending) => Settlement::Unchanged(stored),
            (stored, incoming) if stored == incoming => Settlement::Unchanged(stored),
            (stored, incoming) => Settlement::Conflict { stored, incoming },
        }
    }
}

/// Request handed to a gateway adapter.
#[derive(Debug, Clone)]
pub struct InitiateRequest {
    /// Proposed reference; adapters that mint their own ids return a different one.
    pub reference: String,
    pub amount: i64,
    pub currency: String,
    pub method: PaymentMethod,
    pub metadata: PaymentMetadata,
    pub email: Option<String>,
    pub phone: Option<String>,
}

/// What an adapter returns when a charge has been opened.
#[derive(Debug, Clone)]
pub struct Initiated {
    pub reference: String,
    /// Synchronous outcome, when the provider settles inside the initiation call.
    pub status: PaymentStatus,
    pub checkout_url: Option<String>,
    pub client_secret: Option<String>,
    pub raw: Value,
}

/// A provider's view of one reference, from verification or a webhook.
#[derive(Debug, Clone)]
pub struct GatewayOutcome {
    pub reference: String,
    pub status: PaymentStatus,
    pub amount: Option<i64>,
    pub metadata: PaymentMetadata,
    pub raw: Value,
}

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Gateway unavailable: {0}")]
    Unavailable(String),

    #[error("Gateway call timed out")]
    Timeout,

    #[error("Gateway rejected the request: {0}")]
    Rejected(String),

    #[error("Invalid gateway payload: {0}")]
    InvalidPayload(String),

    #[error("Webhook signature verification failed")]
    InvalidSignature,

    #[error("No gateway configured for {0}")]
    NotConfigured(PaymentMethod),
}

impl GatewayError {
    /// Errors worth retrying later; the payment stays pending.
    pub fn is_transient(&self) -> bool {
        matches!(self, GatewayError::Unavailable(_) | GatewayError::Timeout)
    }
}

/// One payment provider. Implementations are selected by [`PaymentMethod`].
#[async_trait]
pub trait GatewayAdapter: Send + Sync {
    fn method(&self) -> PaymentMethod;

    /// Open a charge with the provider
    async fn initiate(&self, request: &InitiateRequest) -> Result<Initiated, GatewayError>;

    /// Ask the provider for the current state of a reference
    async fn verify(&self, reference: &str) -> Result<GatewayOutcome, GatewayError>;

    /// Parse and authenticate a webhook delivery. `Ok(None)` for events that carry no outcome.
    fn parse_webhook(
        &self,
        signature: Option<&str>,
        body: &[u8],
    ) -> Result<Option<GatewayOutcome>, GatewayError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payment() -> Payment {
        Payment::pending("pay-abc", 20_000, "KES", PaymentMethod::Paystack, None, None)
    }

    #[test]
    fn test_first_terminal_write_wins() {
        let mut p = payment();
        assert_eq!(p.settle(PaymentStatus::Pending, OutcomeSource::Poll), Settlement::StillPending);
        assert_eq!(
            p.settle(PaymentStatus::Success, OutcomeSource::Webhook),
            Settlement::Applied(PaymentStatus::Success)
        );
        assert_eq!(p.settled_by, Some(OutcomeSource::Webhook));

        assert_eq!(
            p.settle(PaymentStatus::Success, OutcomeSource::Poll),
            Settlement::Unchanged(PaymentStatus::Success)
        );
        assert_eq!(
            p.settle(PaymentStatus::Failed, OutcomeSource::Poll),
            Settlement::Conflict { stored: PaymentStatus::Success, incoming: PaymentStatus::Failed }
        );
        assert_eq!(p.status, PaymentStatus::Success);
        assert_eq!(p.settled_by, Some(OutcomeSource::Webhook));
    }

    #[test]
    fn test_failed_is_never_reversed() {
        let mut p = payment();
        p.settle(PaymentStatus::Failed, OutcomeSource::Poll);
        assert!(matches!(
            p.settle(PaymentStatus::Success, OutcomeSource::Webhook),
            Settlement::Conflict { .. }
        ));
        assert_eq!(
            p.settle(PaymentStatus::Pending, OutcomeSource::Poll),
            Settlement::Unchanged(PaymentStatus::Failed)
        );
        assert_eq!(p.status, PaymentStatus::Failed);
    }

    #[test]
    fn test_metadata_accepts_numeric_ids() {
        let booking_id = Uuid::new_v4();
        let meta = PaymentMetadata::from_json(&json!({
            "user_id": 17,
            "booking_id": booking_id.to_string(),
            "place_id": null,
        }));
        assert_eq!(meta.user_id.as_deref(), Some("17"));
        assert_eq!(meta.booking_id, Some(booking_id));

        assert_eq!(PaymentMetadata::from_json(&json!("")), PaymentMetadata::default());
    }

    #[test]
    fn test_method_aliases() {
        let m: PaymentMethod = serde_json::from_value(json!("visa")).unwrap();
        assert_eq!(m, PaymentMethod::Stripe);
        assert_eq!("MPESA".parse::<PaymentMethod>().unwrap(), PaymentMethod::Mpesa);
        assert_eq!(PaymentMethod::Mpesa.reference_prefix(), "mpesa");
    }
}
