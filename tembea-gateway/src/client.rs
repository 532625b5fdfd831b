use reqwest::{Response, StatusCode};
use serde_json::Value;
use std::time::Duration;
use tembea_core::GatewayError;
use tracing::warn;

/// Shared HTTP client for provider calls. The reconciler enforces its own deadline on top.
pub fn http_client(timeout: Duration) -> Result<reqwest::Client, GatewayError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| GatewayError::Unavailable(e.to_string()))
}

pub(crate) fn transport_error(err: reqwest::Error) -> GatewayError {
    if err.is_timeout() {
        GatewayError::Timeout
    } else {
        GatewayError::Unavailable(err.to_string())
    }
}

/// Reads a provider JSON response, sorting failures into transient and permanent.
pub(crate) async fn read_json(provider: &str, response: Response) -> Result<Value, GatewayError> {
    let status = response.status();
    let body: Value = match response.json().await {
        Ok(body) => body,
        Err(e) if status.is_success() => return Err(GatewayError::InvalidPayload(e.to_string())),
        Err(_) => Value::Null,
    };

    if status.is_success() {
        return Ok(body);
    }

    let message = provider_message(&body).unwrap_or_else(|| status.to_string());
    warn!("{} returned {}: {}", provider, status, message);

    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        Err(GatewayError::Unavailable(message))
    } else {
        Err(GatewayError::Rejected(message))
    }
}

fn provider_message(body: &Value) -> Option<String> {
    body.get("message")
        .or_else(|| body.pointer("/error/message"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_provider_message_shapes() {
        assert_eq!(
            provider_message(&json!({"status": false, "message": "Invalid key"})).as_deref(),
            Some("Invalid key")
        );
        assert_eq!(
            provider_message(&json!({"error": {"message": "No such payment_intent"}})).as_deref(),
            Some("No such payment_intent")
        );
        assert!(provider_message(&Value::Null).is_none());
    }
}
