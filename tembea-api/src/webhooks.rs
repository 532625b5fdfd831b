use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    routing::post,
    Json, Router,
};
use serde_json::{json, Value};
use tembea_core::PaymentMethod;

use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new().route("/v1/webhooks/{provider}", post(handle_webhook))
}

fn signature_header(method: PaymentMethod) -> &'static str {
    match method {
        // M-Pesa charges are collected through Paystack
        PaymentMethod::Paystack | PaymentMethod::Mpesa => "x-paystack-signature",
        PaymentMethod::Stripe => "stripe-signature",
    }
}

/// POST /v1/webhooks/{provider}
///
/// Always acknowledged. Providers retry on anything but 2xx, and nothing they could resend
/// would fix a bad signature or a reference we cannot place.
pub async fn handle_webhook(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Json<Value>) {
    let ack = (StatusCode::OK, Json(json!({ "received": true })));

    let method = match provider.parse::<PaymentMethod>() {
        Ok(method) => method,
        Err(_) => {
            tracing::warn!("Webhook for unknown provider {}", provider);
            return ack;
        }
    };

    let signature = headers
        .get(signature_header(method))
        .and_then(|v| v.to_str().ok());

    match state.reconciler.on_webhook(method, signature, &body).await {
        Ok(Some(payment)) => {
            tracing::info!(
                "Webhook from {} recorded {} as {}",
                method,
                payment.reference,
                payment.status
            );
        }
        Ok(None) => {}
        Err(e) => tracing::warn!("Webhook from {} not applied: {}", method, e),
    }
    ack
}
