use std::sync::Arc;
use std::time::Duration;
use tembea_core::{GatewayError, PaymentMethod};
use tembea_gateway::client::http_client;
use tembea_gateway::{MockGateway, PaystackGateway, StripeGateway};
use tembea_order::GatewayRegistry;
use tembea_store::app_config::PaymentsConfig;

/// Adapters for every provider with credentials. Without a Paystack key, card and M-Pesa fall
/// back to scripted mocks so a development stack still runs end to end.
pub fn gateway_registry(payments: &PaymentsConfig) -> Result<GatewayRegistry, GatewayError> {
    let mut registry = GatewayRegistry::new(
        payments.gateway_timeout(),
        payments.breaker_threshold,
        Duration::from_secs(payments.breaker_reset_secs),
    );
    let client = http_client(payments.gateway_timeout())?;

    match payments.paystack_secret_key.as_deref().filter(|k| !k.is_empty()) {
        Some(key) => {
            registry.register(Arc::new(
                PaystackGateway::card(client.clone(), key, &payments.paystack_base_url)
                    .with_callback_url(payments.callback_url.clone()),
            ));
            registry.register(Arc::new(
                PaystackGateway::mpesa(client.clone(), key, &payments.paystack_base_url)
                    .with_callback_url(payments.callback_url.clone()),
            ));
        }
        None => {
            tracing::warn!("No Paystack key configured; card and M-Pesa payments use the mock gateway");
            registry.register(Arc::new(MockGateway::new(PaymentMethod::Paystack)));
            registry.register(Arc::new(MockGateway::new(PaymentMethod::Mpesa)));
        }
    }

    if let Some(key) = payments.stripe_secret_key.as_deref().filter(|k| !k.is_empty()) {
        registry.register(Arc::new(StripeGateway::new(
            client,
            key,
            payments.stripe_webhook_secret.clone(),
            &payments.stripe_base_url,
        )));
    }

    Ok(registry)
}
