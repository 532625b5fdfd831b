use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tembea_core::{
    GatewayAdapter, GatewayError, GatewayOutcome, InitiateRequest, Initiated, PaymentMethod,
};

use crate::breaker::CircuitBreaker;

struct Entry {
    adapter: Arc<dyn GatewayAdapter>,
    breaker: CircuitBreaker,
}

/// Gateway adapters selected by payment method, each behind its own breaker and deadline.
pub struct GatewayRegistry {
    gateways: HashMap<PaymentMethod, Entry>,
    timeout: Duration,
    breaker_threshold: usize,
    breaker_reset: Duration,
}

impl GatewayRegistry {
    pub fn new(timeout: Duration, breaker_threshold: usize, breaker_reset: Duration) -> Self {
        Self {
            gateways: HashMap::new(),
            timeout,
            breaker_threshold,
            breaker_reset,
        }
    }

    /// Registers an adapter under the method it reports. A later registration replaces it.
    pub fn register(&mut self, adapter: Arc<dyn GatewayAdapter>) {
        let method = adapter.method();
        let breaker = CircuitBreaker::new(method.as_str(), self.breaker_threshold, self.breaker_reset);
        tracing::info!("Registered {} gateway", method);
        self.gateways.insert(method, Entry { adapter, breaker });
    }

    pub fn with(mut self, adapter: Arc<dyn GatewayAdapter>) -> Self {
        self.register(adapter);
        self
    }

    pub fn methods(&self) -> Vec<PaymentMethod> {
        let mut methods: Vec<_> = self.gateways.keys().copied().collect();
        methods.sort_by_key(|m| m.as_str());
        methods
    }

    fn entry(&self, method: PaymentMethod) -> Result<&Entry, GatewayError> {
        self.gateways
            .get(&method)
            .ok_or(GatewayError::NotConfigured(method))
    }

    pub fn get(&self, method: PaymentMethod) -> Result<Arc<dyn GatewayAdapter>, GatewayError> {
        Ok(self.entry(method)?.adapter.clone())
    }

    pub fn breaker(&self, method: PaymentMethod) -> Result<&CircuitBreaker, GatewayError> {
        Ok(&self.entry(method)?.breaker)
    }

    pub async fn initiate(
        &self,
        method: PaymentMethod,
        request: &InitiateRequest,
    ) -> Result<Initiated, GatewayError> {
        let entry = self.entry(method)?;
        entry
            .breaker
            .guard(self.timeout, entry.adapter.initiate(request))
            .await
    }

    pub async fn verify(
        &self,
        method: PaymentMethod,
        reference: &str,
    ) -> Result<GatewayOutcome, GatewayError> {
        let entry = self.entry(method)?;
        entry
            .breaker
            .guard(self.timeout, entry.adapter.verify(reference))
            .await
    }

    /// Webhook parsing is local work; it does not go through the breaker.
    pub fn parse_webhook(
        &self,
        method: PaymentMethod,
        signature: Option<&str>,
        body: &[u8],
    ) -> Result<Option<GatewayOutcome>, GatewayError> {
        self.entry(method)?.adapter.parse_webhook(signature, body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breaker::CircuitState;
    use tembea_gateway::MockGateway;

    fn registry(mock: Arc<MockGateway>) -> GatewayRegistry {
        GatewayRegistry::new(Duration::from_millis(100), 2, Duration::from_secs(30)).with(mock)
    }

    #[tokio::test]
    async fn test_unknown_method_is_not_configured() {
        let reg = registry(Arc::new(MockGateway::new(PaymentMethod::Paystack)));
        assert_eq!(reg.methods(), vec![PaymentMethod::Paystack]);
        assert!(matches!(
            reg.verify(PaymentMethod::Stripe, "pi_1").await,
            Err(GatewayError::NotConfigured(PaymentMethod::Stripe))
        ));
    }

    #[tokio::test]
    async fn test_breaker_is_per_method() {
        let mpesa = Arc::new(MockGateway::new(PaymentMethod::Mpesa));
        let paystack = Arc::new(MockGateway::new(PaymentMethod::Paystack));
        let reg = registry(mpesa.clone()).with(paystack.clone());

        mpesa.set_failing(true);
        for _ in 0..2 {
            assert!(reg.verify(PaymentMethod::Mpesa, "mpesa-1").await.is_err());
        }
        assert_eq!(
            reg.breaker(PaymentMethod::Mpesa).unwrap().state().await,
            CircuitState::Open
        );

        // Open breaker short-circuits before reaching the adapter
        assert!(reg.verify(PaymentMethod::Mpesa, "mpesa-1").await.is_err());
        assert_eq!(mpesa.verify_calls(), 2);

        assert!(reg.verify(PaymentMethod::Paystack, "pay-1").await.is_ok());
    }

    #[tokio::test]
    async fn test_slow_gateway_times_out() {
        let mock = Arc::new(MockGateway::new(PaymentMethod::Paystack));
        mock.set_delay(Some(Duration::from_millis(500)));
        let reg = registry(mock);

        assert!(matches!(
            reg.verify(PaymentMethod::Paystack, "pay-1").await,
            Err(GatewayError::Timeout)
        ));
    }
}
