use async_trait::async_trait;
use serde_json::{json, Value};
use tembea_core::{
    GatewayAdapter, GatewayError, GatewayOutcome, InitiateRequest, Initiated, PaymentMetadata,
    PaymentMethod, PaymentStatus,
};
use tracing::{debug, info, warn};

use crate::client::{read_json, transport_error};
use crate::signature::verify_sha512;

/// Paystack card checkout, or M-Pesa STK push through Paystack mobile money.
///
/// One instance serves one method: `Paystack` opens a hosted checkout through
/// `/transaction/initialize`, `Mpesa` charges the phone directly through `/charge`.
pub struct PaystackGateway {
    client: reqwest::Client,
    secret_key: String,
    base_url: String,
    callback_url: Option<String>,
    method: PaymentMethod,
}

impl PaystackGateway {
    pub fn card(client: reqwest::Client, secret_key: &str, base_url: &str) -> Self {
        Self::new(client, secret_key, base_url, PaymentMethod::Paystack)
    }

    pub fn mpesa(client: reqwest::Client, secret_key: &str, base_url: &str) -> Self {
        Self::new(client, secret_key, base_url, PaymentMethod::Mpesa)
    }

    fn new(client: reqwest::Client, secret_key: &str, base_url: &str, method: PaymentMethod) -> Self {
        Self {
            client,
            secret_key: secret_key.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            callback_url: None,
            method,
        }
    }

    pub fn with_callback_url(mut self, url: Option<String>) -> Self {
        self.callback_url = url;
        self
    }

    async fn post(&self, path: &str, payload: &Value) -> Result<Value, GatewayError> {
        let response = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .bearer_auth(&self.secret_key)
            .json(payload)
            .send()
            .await
            .map_err(transport_error)?;
        read_json("paystack", response).await
    }

    fn charge_payload(&self, request: &InitiateRequest) -> Result<(&'static str, Value), GatewayError> {
        let mut metadata = request.metadata.to_json();
        if metadata.is_null() {
            metadata = json!({});
        }

        match self.method {
            PaymentMethod::Mpesa => {
                let phone = request.phone.as_deref().ok_or_else(|| {
                    GatewayError::Rejected("a phone number is required for M-Pesa".to_string())
                })?;
                Ok((
                    "/charge",
                    json!({
                        "email": request.email,
                        "amount": request.amount,
                        "currency": request.currency,
                        "mobile_money": { "phone": phone, "provider": "mpesa" },
                        "reference": request.reference,
                        "metadata": metadata,
                    }),
                ))
            }
            _ => {
                let email = request.email.as_deref().ok_or_else(|| {
                    GatewayError::Rejected("an email address is required for card checkout".to_string())
                })?;
                let mut payload = json!({
                    "email": email,
                    "amount": request.amount,
                    "currency": request.currency,
                    "reference": request.reference,
                    "metadata": metadata,
                });
                if let Some(url) = &self.callback_url {
                    payload["callback_url"] = json!(url);
                }
                Ok(("/transaction/initialize", payload))
            }
        }
    }
}

/// Paystack reports many intermediate states; only these two are final.
pub fn map_status(status: &str) -> PaymentStatus {
    match status {
        "success" => PaymentStatus::Success,
        "failed" => PaymentStatus::Failed,
        _ => PaymentStatus::Pending,
    }
}

fn outcome_from_transaction(data: &Value, status: PaymentStatus) -> Result<GatewayOutcome, GatewayError> {
    let reference = data
        .get("reference")
        .and_then(Value::as_str)
        .ok_or_else(|| GatewayError::InvalidPayload("transaction without reference".to_string()))?;

    let metadata = match data.get("metadata") {
        // Metadata sometimes arrives as a JSON string
        Some(Value::String(s)) => serde_json::from_str::<Value>(s)
            .map(|v| PaymentMetadata::from_json(&v))
            .unwrap_or_default(),
        Some(v) => PaymentMetadata::from_json(v),
        None => PaymentMetadata::default(),
    };

    Ok(GatewayOutcome {
        reference: reference.to_string(),
        status,
        amount: data.get("amount").and_then(Value::as_i64),
        metadata,
        raw: data.clone(),
    })
}

#[async_trait]
impl GatewayAdapter for PaystackGateway {
    fn method(&self) -> PaymentMethod {
        self.method
    }

    async fn initiate(&self, request: &InitiateRequest) -> Result<Initiated, GatewayError> {
        let (path, payload) = self.charge_payload(request)?;
        let body = self.post(path, &payload).await?;

        if body.get("status").and_then(Value::as_bool) == Some(false) {
            let message = body.get("message").and_then(Value::as_str).unwrap_or("charge refused");
            return Err(GatewayError::Rejected(message.to_string()));
        }

        let data = body.get("data").cloned().unwrap_or(Value::Null);
        let reference = data
            .get("reference")
            .and_then(Value::as_str)
            .unwrap_or(&request.reference)
            .to_string();
        let status = data
            .get("status")
            .and_then(Value::as_str)
            .map(map_status)
            .unwrap_or(PaymentStatus::Pending);

        info!("Paystack {} charge opened for {}", self.method, reference);
        Ok(Initiated {
            reference,
            status,
            checkout_url: data
                .get("authorization_url")
                .and_then(Value::as_str)
                .map(str::to_string),
            client_secret: data.get("access_code").and_then(Value::as_str).map(str::to_string),
            raw: body,
        })
    }

    async fn verify(&self, reference: &str) -> Result<GatewayOutcome, GatewayError> {
        let response = self
            .client
            .get(format!("{}/transaction/verify/{}", self.base_url, reference))
            .bearer_auth(&self.secret_key)
            .send()
            .await
            .map_err(transport_error)?;
        let body = read_json("paystack", response).await?;

        let data = body
            .get("data")
            .ok_or_else(|| GatewayError::InvalidPayload("verification without data".to_string()))?;
        let status = map_status(data.get("status").and_then(Value::as_str).unwrap_or_default());
        debug!("Paystack reports {} for {}", status, reference);

        outcome_from_transaction(data, status)
    }

    fn parse_webhook(
        &self,
        signature: Option<&str>,
        body: &[u8],
    ) -> Result<Option<GatewayOutcome>, GatewayError> {
        let signature = signature.ok_or(GatewayError::InvalidSignature)?;
        if !verify_sha512(self.secret_key.as_bytes(), body, signature) {
            warn!("Rejected Paystack webhook with bad signature");
            return Err(GatewayError::InvalidSignature);
        }

        let payload: Value =
            serde_json::from_slice(body).map_err(|e| GatewayError::InvalidPayload(e.to_string()))?;
        let status = match payload.get("event").and_then(Value::as_str) {
            Some("charge.success") => PaymentStatus::Success,
            Some("charge.failed") => PaymentStatus::Failed,
            other => {
                debug!("Ignoring Paystack event {:?}", other);
                return Ok(None);
            }
        };

        let data = payload
            .get("data")
            .ok_or_else(|| GatewayError::InvalidPayload("event without data".to_string()))?;
        outcome_from_transaction(data, status).map(Some)
    }
}
