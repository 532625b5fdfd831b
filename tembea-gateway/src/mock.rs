use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tembea_core::{
    GatewayAdapter, GatewayError, GatewayOutcome, InitiateRequest, Initiated, PaymentMetadata,
    PaymentMethod, PaymentStatus,
};

use crate::signature::verify_sha256;

/// Scripted stand-in for a provider.
///
/// `verify` answers from the script (pending when unscripted). Failures and latency can be
/// injected to exercise timeouts and the circuit breaker. Webhook bodies are the JSON form of
/// [`MockEvent`], optionally signed with HMAC-SHA256.
pub struct MockGateway {
    method: PaymentMethod,
    initiation_status: Mutex<PaymentStatus>,
    outcomes: Mutex<HashMap<String, (PaymentStatus, Option<i64>)>>,
    failing: Mutex<bool>,
    delay: Mutex<Option<Duration>>,
    webhook_secret: Option<String>,
    initiate_calls: AtomicUsize,
    verify_calls: AtomicUsize,
}

#[derive(Debug, Deserialize)]
pub struct MockEvent {
    pub reference: String,
    pub status: PaymentStatus,
    #[serde(default)]
    pub amount: Option<i64>,
    #[serde(default)]
    pub metadata: Value,
}

impl MockGateway {
    pub fn new(method: PaymentMethod) -> Self {
        Self {
            method,
            initiation_status: Mutex::new(PaymentStatus::Pending),
            outcomes: Mutex::new(HashMap::new()),
            failing: Mutex::new(false),
            delay: Mutex::new(None),
            webhook_secret: None,
            initiate_calls: AtomicUsize::new(0),
            verify_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_webhook_secret(mut self, secret: &str) -> Self {
        self.webhook_secret = Some(secret.to_string());
        self
    }

    /// Status returned synchronously by `initiate`.
    pub fn set_initiation_status(&self, status: PaymentStatus) {
        *lock(&self.initiation_status) = status;
    }

    pub fn set_outcome(&self, reference: &str, status: PaymentStatus) {
        lock(&self.outcomes).insert(reference.to_string(), (status, None));
    }

    pub fn set_outcome_with_amount(&self, reference: &str, status: PaymentStatus, amount: i64) {
        lock(&self.outcomes).insert(reference.to_string(), (status, Some(amount)));
    }

    /// Every call fails with `Unavailable` until switched back.
    pub fn set_failing(&self, failing: bool) {
        *lock(&self.failing) = failing;
    }

    pub fn set_delay(&self, delay: Option<Duration>) {
        *lock(&self.delay) = delay;
    }

    pub fn initiate_calls(&self) -> usize {
        self.initiate_calls.load(Ordering::SeqCst)
    }

    pub fn verify_calls(&self) -> usize {
        self.verify_calls.load(Ordering::SeqCst)
    }

    /// Webhook body the mock understands.
    pub fn event_body(reference: &str, status: PaymentStatus, metadata: &PaymentMetadata) -> Vec<u8> {
        json!({
            "reference": reference,
            "status": status,
            "metadata": metadata.to_json(),
        })
        .to_string()
        .into_bytes()
    }

    async fn simulate(&self) -> Result<(), GatewayError> {
        let delay = *lock(&self.delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if *lock(&self.failing) {
            return Err(GatewayError::Unavailable("mock gateway is down".to_string()));
        }
        Ok(())
    }
}

// A poisoned script lock only means a test panicked mid-update; the data is still usable.
fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl GatewayAdapter for MockGateway {
    fn method(&self) -> PaymentMethod {
        self.method
    }

    async fn initiate(&self, request: &InitiateRequest) -> Result<Initiated, GatewayError> {
        self.initiate_calls.fetch_add(1, Ordering::SeqCst);
        self.simulate().await?;

        let status = *lock(&self.initiation_status);
        Ok(Initiated {
            reference: request.reference.clone(),
            status,
            checkout_url: Some(format!("https://mock.invalid/checkout/{}", request.reference)),
            client_secret: None,
            raw: json!({"reference": request.reference, "status": status}),
        })
    }

    async fn verify(&self, reference: &str) -> Result<GatewayOutcome, GatewayError> {
        self.verify_calls.fetch_add(1, Ordering::SeqCst);
        self.simulate().await?;

        let (status, amount) = lock(&self.outcomes)
            .get(reference)
            .copied()
            .unwrap_or((PaymentStatus::Pending, None));
        Ok(GatewayOutcome {
            reference: reference.to_string(),
            status,
            amount,
            metadata: PaymentMetadata::default(),
            raw: json!({"reference": reference, "status": status}),
        })
    }

    fn parse_webhook(
        &self,
        signature: Option<&str>,
        body: &[u8],
    ) -> Result<Option<GatewayOutcome>, GatewayError> {
        if let Some(secret) = &self.webhook_secret {
            let valid = signature
                .map(|sig| verify_sha256(secret.as_bytes(), body, sig))
                .unwrap_or(false);
            if !valid {
                return Err(GatewayError::InvalidSignature);
            }
        }

        let raw: Value =
            serde_json::from_slice(body).map_err(|e| GatewayError::InvalidPayload(e.to_string()))?;
        let event: MockEvent =
            serde_json::from_value(raw.clone()).map_err(|e| GatewayError::InvalidPayload(e.to_string()))?;
        if !event.status.is_terminal() {
            return Ok(None);
        }

        Ok(Some(GatewayOutcome {
            reference: event.reference,
            status: event.status,
            amount: event.amount,
            metadata: PaymentMetadata::from_json(&event.metadata),
            raw,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signature::sign_sha256;

    #[tokio::test]
    async fn test_scripted_outcomes() {
        let gateway = MockGateway::new(PaymentMethod::Paystack);
        assert_eq!(gateway.verify("pay-1").await.unwrap().status, PaymentStatus::Pending);

        gateway.set_outcome("pay-1", PaymentStatus::Failed);
        assert_eq!(gateway.verify("pay-1").await.unwrap().status, PaymentStatus::Failed);
        assert_eq!(gateway.verify_calls(), 2);

        gateway.set_failing(true);
        assert!(gateway.verify("pay-1").await.unwrap_err().is_transient());
    }

    #[test]
    fn test_signed_webhooks() {
        let gateway = MockGateway::new(PaymentMethod::Mpesa).with_webhook_secret("s3cret");
        let body = MockGateway::event_body("mpesa-1", PaymentStatus::Success, &PaymentMetadata::default());

        assert!(matches!(
            gateway.parse_webhook(None, &body),
            Err(GatewayError::InvalidSignature)
        ));
        let sig = sign_sha256(b"s3cret", &body);
        let outcome = gateway.parse_webhook(Some(&sig), &body).unwrap().unwrap();
        assert_eq!(outcome.reference, "mpesa-1");

        let pending = MockGateway::event_body("mpesa-1", PaymentStatus::Pending, &PaymentMetadata::default());
        let sig = sign_sha256(b"s3cret", &pending);
        assert!(gateway.parse_webhook(Some(&sig), &pending).unwrap().is_none());
    }
}
