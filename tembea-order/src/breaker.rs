use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tembea_core::GatewayError;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CircuitState {
    Closed,   // Normal operation
    Open,     // Failing fast
    HalfOpen, // Probing whether the provider is back
}

/// Per-provider breaker. Opens after `failure_threshold` consecutive transient failures and stays
/// open for `reset_timeout` before letting a probe through.
pub struct CircuitBreaker {
    pub name: String,
    state: RwLock<CircuitState>,
    failure_count: AtomicUsize,
    failure_threshold: usize,
    reset_timeout: Duration,
    last_failure: RwLock<Option<Instant>>,
}

impl CircuitBreaker {
    pub fn new(name: &str, threshold: usize, reset_timeout: Duration) -> Self {
        Self {
            name: name.to_string(),
            state: RwLock::new(CircuitState::Closed),
            failure_count: AtomicUsize::new(0),
            failure_threshold: threshold.max(1),
            reset_timeout,
            last_failure: RwLock::new(None),
        }
    }

    pub async fn state(&self) -> CircuitState {
        *self.state.read().await
    }

    pub async fn check(&self) -> bool {
        let state = *self.state.read().await;
        if state == CircuitState::Closed {
            return true;
        }

        if state == CircuitState::Open {
            let last_fail = *self.last_failure.read().await;
            if let Some(instant) = last_fail {
                if instant.elapsed() > self.reset_timeout {
                    let mut s = self.state.write().await;
                    *s = CircuitState::HalfOpen;
                    tracing::info!("Circuit breaker [{}] moving to half-open", self.name);
                    return true;
                }
            }
            return false;
        }

        // Half-open lets the probe through
        true
    }

    pub async fn record_success(&self) {
        let mut state = self.state.write().await;
        if *state == CircuitState::HalfOpen {
            *state = CircuitState::Closed;
            self.failure_count.store(0, Ordering::SeqCst);
            tracing::info!("Circuit breaker [{}] recovered to closed", self.name);
        } else if *state == CircuitState::Closed {
            self.failure_count.store(0, Ordering::SeqCst);
        }
    }

    pub async fn record_failure(&self) {
        let count = self.failure_count.fetch_add(1, Ordering::SeqCst) + 1;
        let mut state = self.state.write().await;

        if count >= self.failure_threshold || *state == CircuitState::HalfOpen {
            if *state != CircuitState::Open {
                tracing::error!("Circuit breaker [{}] tripped open after {} failures", self.name, count);
            }
            *state = CircuitState::Open;
            let mut last = self.last_failure.write().await;
            *last = Some(Instant::now());
        }
    }

    /// Runs one provider call under the breaker and a deadline.
    ///
    /// Only transient errors count as failures; a provider that answers with a rejection is up.
    pub async fn guard<T, F>(&self, timeout: Duration, call: F) -> Result<T, GatewayError>
    where
        F: Future<Output = Result<T, GatewayError>>,
    {
        if !self.check().await {
            return Err(GatewayError::Unavailable(format!(
                "circuit open for {}",
                self.name
            )));
        }

        let result = match tokio::time::timeout(timeout, call).await {
            Ok(result) => result,
            Err(_) => {
                tracing::error!("{} call exceeded {:?}", self.name, timeout);
                Err(GatewayError::Timeout)
            }
        };

        match &result {
            Err(e) if e.is_transient() => self.record_failure().await,
            _ => self.record_success().await,
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_trips_after_threshold_and_recovers() {
        let breaker = CircuitBreaker::new("paystack", 2, Duration::from_millis(50));
        let down = || async { Err::<(), _>(GatewayError::Unavailable("503".to_string())) };

        assert!(breaker.guard(Duration::from_secs(1), down()).await.is_err());
        assert_eq!(breaker.state().await, CircuitState::Closed);
        assert!(breaker.guard(Duration::from_secs(1), down()).await.is_err());
        assert_eq!(breaker.state().await, CircuitState::Open);

        // Fails fast without running the call
        let err = breaker
            .guard(Duration::from_secs(1), async { Ok::<_, GatewayError>(1) })
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Unavailable(m) if m.contains("circuit open")));

        tokio::time::sleep(Duration::from_millis(80)).await;
        let value = breaker
            .guard(Duration::from_secs(1), async { Ok::<_, GatewayError>(7) })
            .await
            .unwrap();
        assert_eq!(value, 7);
        assert_eq!(breaker.state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_timeout_counts_as_failure() {
        let breaker = CircuitBreaker::new("stripe", 1, Duration::from_secs(30));
        let slow = async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok::<_, GatewayError>(())
        };

        let err = breaker.guard(Duration::from_millis(20), slow).await.unwrap_err();
        assert!(matches!(err, GatewayError::Timeout));
        assert_eq!(breaker.state().await, CircuitState::Open);
    }

    #[tokio::test]
    async fn test_rejections_keep_circuit_closed() {
        let breaker = CircuitBreaker::new("mpesa", 1, Duration::from_secs(30));
        let rejected = async { Err::<(), _>(GatewayError::Rejected("bad phone".to_string())) };

        assert!(breaker.guard(Duration::from_secs(1), rejected).await.is_err());
        assert_eq!(breaker.state().await, CircuitState::Closed);
    }
}
