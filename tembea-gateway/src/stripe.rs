use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tembea_core::{
    GatewayAdapter, GatewayError, GatewayOutcome, InitiateRequest, Initiated, PaymentMetadata,
    PaymentMethod, PaymentStatus,
};
use tracing::{debug, info, warn};

use crate::client::{read_json, transport_error};
use crate::signature::verify_sha256;

/// Deliveries older than this are treated as replays.
const SIGNATURE_TOLERANCE_SECS: i64 = 300;

/// Card payments through Stripe PaymentIntents. Stripe mints the reference (`pi_...`).
pub struct StripeGateway {
    client: reqwest::Client,
    secret_key: String,
    webhook_secret: Option<String>,
    base_url: String,
}

impl StripeGateway {
    pub fn new(
        client: reqwest::Client,
        secret_key: &str,
        webhook_secret: Option<String>,
        base_url: &str,
    ) -> Self {
        Self {
            client,
            secret_key: secret_key.to_string(),
            webhook_secret,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

pub fn map_status(status: &str) -> PaymentStatus {
    match status {
        "succeeded" => PaymentStatus::Success,
        "canceled" => PaymentStatus::Failed,
        _ => PaymentStatus::Pending,
    }
}

fn outcome_from_intent(intent: &Value, status: PaymentStatus) -> Result<GatewayOutcome, GatewayError> {
    let reference = intent
        .get("id")
        .and_then(Value::as_str)
        .ok_or_else(|| GatewayError::InvalidPayload("payment intent without id".to_string()))?;

    let amount = intent
        .get("amount_received")
        .and_then(Value::as_i64)
        .filter(|a| *a > 0)
        .or_else(|| intent.get("amount").and_then(Value::as_i64));

    Ok(GatewayOutcome {
        reference: reference.to_string(),
        status,
        amount,
        metadata: intent
            .get("metadata")
            .map(PaymentMetadata::from_json)
            .unwrap_or_default(),
        raw: intent.clone(),
    })
}

/// Splits `t=1700000000,v1=abc,v1=def` into the timestamp and the v1 signatures.
fn parse_signature_header(header: &str) -> Option<(i64, Vec<&str>)> {
    let mut timestamp = None;
    let mut signatures = Vec::new();
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", t)) => timestamp = t.parse().ok(),
            Some(("v1", sig)) => signatures.push(sig),
            _ => {}
        }
    }
    Some((timestamp?, signatures))
}

#[async_trait]
impl GatewayAdapter for StripeGateway {
    fn method(&self) -> PaymentMethod {
        PaymentMethod::Stripe
    }

    async fn initiate(&self, request: &InitiateRequest) -> Result<Initiated, GatewayError> {
        let mut form = vec![
            ("amount".to_string(), request.amount.to_string()),
            ("currency".to_string(), request.currency.to_lowercase()),
            ("automatic_payment_methods[enabled]".to_string(), "true".to_string()),
            ("metadata[reference]".to_string(), request.reference.clone()),
        ];
        if let Some(booking_id) = request.metadata.booking_id {
            form.push(("metadata[booking_id]".to_string(), booking_id.to_string()));
        }
        if let Some(user_id) = &request.metadata.user_id {
            form.push(("metadata[user_id]".to_string(), user_id.clone()));
        }
        if let Some(email) = &request.email {
            form.push(("receipt_email".to_string(), email.clone()));
        }

        let response = self
            .client
            .post(format!("{}/v1/payment_intents", self.base_url))
            .bearer_auth(&self.secret_key)
            // Retries of one initiation must not open two intents
            .header("Idempotency-Key", &request.reference)
            .form(&form)
            .send()
            .await
            .map_err(transport_error)?;
        let intent = read_json("stripe", response).await?;

        let reference = intent
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| GatewayError::InvalidPayload("payment intent without id".to_string()))?
            .to_string();
        let status = map_status(intent.get("status").and_then(Value::as_str).unwrap_or_default());

        info!("Stripe intent {} opened for {}", reference, request.reference);
        Ok(Initiated {
            reference,
            status,
            checkout_url: None,
            client_secret: intent
                .get("client_secret")
                .and_then(Value::as_str)
                .map(str::to_string),
            raw: intent,
        })
    }

    async fn verify(&self, reference: &str) -> Result<GatewayOutcome, GatewayError> {
        let response = self
            .client
            .get(format!("{}/v1/payment_intents/{}", self.base_url, reference))
            .bearer_auth(&self.secret_key)
            .send()
            .await
            .map_err(transport_error)?;
        let intent = read_json("stripe", response).await?;

        let status = map_status(intent.get("status").and_then(Value::as_str).unwrap_or_default());
        debug!("Stripe reports {} for {}", status, reference);
        outcome_from_intent(&intent, status)
    }

    fn parse_webhook(
        &self,
        signature: Option<&str>,
        body: &[u8],
    ) -> Result<Option<GatewayOutcome>, GatewayError> {
        let secret = self
            .webhook_secret
            .as_deref()
            .ok_or(GatewayError::NotConfigured(PaymentMethod::Stripe))?;
        let (timestamp, signatures) = signature
            .and_then(parse_signature_header)
            .ok_or(GatewayError::InvalidSignature)?;

        if (Utc::now().timestamp() - timestamp).abs() > SIGNATURE_TOLERANCE_SECS {
            warn!("Rejected Stripe webhook outside the replay window");
            return Err(GatewayError::InvalidSignature);
        }

        let mut signed = format!("{}.", timestamp).into_bytes();
        signed.extend_from_slice(body);
        if !signatures
            .iter()
            .any(|sig| verify_sha256(secret.as_bytes(), &signed, sig))
        {
            warn!("Rejected Stripe webhook with bad signature");
            return Err(GatewayError::InvalidSignature);
        }

        let event: Value =
            serde_json::from_slice(body).map_err(|e| GatewayError::InvalidPayload(e.to_string()))?;
        let status = match event.get("type").and_then(Value::as_str) {
            Some("payment_intent.succeeded") => PaymentStatus::Success,
            Some("payment_intent.canceled") => PaymentStatus::Failed,
            // A declined attempt returns the intent to requires_payment_method; it can still succeed
            Some("payment_intent.payment_failed") => {
                debug!("Stripe attempt declined, intent stays open");
                return Ok(None);
            }
            other => {
                debug!("Ignoring Stripe event {:?}", other);
                return Ok(None);
            }
        };

        let intent = event
            .pointer("/data/object")
            .ok_or_else(|| GatewayError::InvalidPayload("event without data.object".to_string()))?;
        outcome_from_intent(intent, status).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signature::sign_sha256;
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const WHSEC: &str = "whsec_test";

    fn gateway(base_url: &str) -> StripeGateway {
        StripeGateway::new(
            reqwest::Client::new(),
            "sk_test_stripe",
            Some(WHSEC.to_string()),
            base_url,
        )
    }

    fn signed(body: &[u8], timestamp: i64) -> String {
        let mut payload = format!("{}.", timestamp).into_bytes();
        payload.extend_from_slice(body);
        format!("t={},v1={}", timestamp, sign_sha256(WHSEC.as_bytes(), &payload))
    }

    #[tokio::test]
    async fn test_initiate_returns_intent_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/payment_intents"))
            .and(header("idempotency-key", "pay-abcdef0123"))
            .and(body_string_contains("amount=9900"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "pi_123",
                "status": "requires_payment_method",
                "client_secret": "pi_123_secret_x"
            })))
            .mount(&server)
            .await;

        let request = InitiateRequest {
            reference: "pay-abcdef0123".to_string(),
            amount: 9_900,
            currency: "KES".to_string(),
            method: PaymentMethod::Stripe,
            metadata: PaymentMetadata::default(),
            email: None,
            phone: None,
        };
        let initiated = gateway(&server.uri()).initiate(&request).await.unwrap();
        assert_eq!(initiated.reference, "pi_123");
        assert_eq!(initiated.status, PaymentStatus::Pending);
        assert_eq!(initiated.client_secret.as_deref(), Some("pi_123_secret_x"));
    }

    #[tokio::test]
    async fn test_verify_rejected_reference() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/payment_intents/pi_missing"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "error": {"message": "No such payment_intent: 'pi_missing'"}
            })))
            .mount(&server)
            .await;

        let err = gateway(&server.uri()).verify("pi_missing").await.unwrap_err();
        assert!(matches!(err, GatewayError::Rejected(m) if m.contains("No such payment_intent")));
    }

    #[test]
    fn test_webhook_signature() {
        let body = serde_json::to_vec(&json!({
            "type": "payment_intent.succeeded",
            "data": {"object": {"id": "pi_9", "amount": 500, "amount_received": 500, "metadata": {}}}
        }))
        .unwrap();
        let gw = gateway("http://unused");
        let now = Utc::now().timestamp();

        let outcome = gw.parse_webhook(Some(&signed(&body, now)), &body).unwrap().unwrap();
        assert_eq!(outcome.reference, "pi_9");
        assert_eq!(outcome.status, PaymentStatus::Success);
        assert_eq!(outcome.amount, Some(500));

        // Stale timestamp
        assert!(matches!(
            gw.parse_webhook(Some(&signed(&body, now - 3_600)), &body),
            Err(GatewayError::InvalidSignature)
        ));
        // Wrong secret
        assert!(matches!(
            gw.parse_webhook(Some(&format!("t={},v1=00ff", now)), &body),
            Err(GatewayError::InvalidSignature)
        ));
    }

    #[test]
    fn test_unrelated_events_are_ignored() {
        let body = serde_json::to_vec(&json!({"type": "charge.refunded", "data": {"object": {}}})).unwrap();
        let now = Utc::now().timestamp();
        assert!(gateway("http://unused")
            .parse_webhook(Some(&signed(&body, now)), &body)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_declined_attempt_is_not_final() {
        let gw = gateway("http://unused");
        let now = Utc::now().timestamp();
        let declined = serde_json::to_vec(&json!({
            "type": "payment_intent.payment_failed",
            "data": {"object": {"id": "pi_7", "status": "requires_payment_method", "amount": 900}}
        }))
        .unwrap();
        assert!(gw.parse_webhook(Some(&signed(&declined, now)), &declined).unwrap().is_none());
        assert_eq!(map_status("requires_payment_method"), PaymentStatus::Pending);

        let canceled = serde_json::to_vec(&json!({
            "type": "payment_intent.canceled",
            "data": {"object": {"id": "pi_7", "status": "canceled", "amount": 900}}
        }))
        .unwrap();
        let outcome = gw.parse_webhook(Some(&signed(&canceled, now)), &canceled).unwrap().unwrap();
        assert_eq!(outcome.status, PaymentStatus::Failed);
    }

    #[test]
    fn test_signature_header_parsing() {
        let (t, sigs) = parse_signature_header("t=12,v1=aa,v0=zz,v1=bb").unwrap();
        assert_eq!(t, 12);
        assert_eq!(sigs, vec!["aa", "bb"]);
        assert!(parse_signature_header("v1=aa").is_none());
    }
}
