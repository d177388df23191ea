//! Circuit breaker for outbound gateway calls
//!
//! Each gateway owns exactly one breaker instance; there is no shared
//! global state, so one dependency tripping never darkens another and
//! tests never interfere with each other.
//!
//! The breaker is a classic three-state machine:
//!
//! - **Closed**: calls flow; consecutive failures are counted
//! - **Open**: calls fail immediately without touching the network
//! - **HalfOpen**: after the reset timeout, one probe is let through;
//!   success closes the circuit, failure re-opens it
//!
//! Every admitted call also runs under a hard timeout; a timed-out call
//! counts as a failure like any other.

use std::future::Future;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::error::GatewayError;

/// Breaker tuning knobs
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that trip the circuit
    pub failure_threshold: u32,
    /// How long the circuit stays open before a half-open probe
    pub reset_timeout: Duration,
    /// Hard per-call timeout
    pub call_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(30),
            call_timeout: Duration::from_secs(10),
        }
    }
}

/// Observable breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
}

/// A circuit breaker guarding one external dependency
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    /// Create a breaker named after the dependency it guards
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
            }),
        }
    }

    /// Name of the guarded dependency
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state, transitioning open -> half-open if the reset
    /// timeout has elapsed
    pub fn state(&self) -> CircuitState {
        let mut inner = self.inner.lock().unwrap();
        self.refresh_state(&mut inner);
        inner.state
    }

    /// Run `fut` under the breaker: admission check, hard timeout,
    /// outcome bookkeeping
    pub async fn call<T, F>(&self, fut: F) -> Result<T, GatewayError>
    where
        F: Future<Output = Result<T, GatewayError>>,
    {
        self.admit()?;

        let outcome = tokio::time::timeout(self.config.call_timeout, fut).await;

        match outcome {
            Ok(Ok(value)) => {
                self.record_success();
                Ok(value)
            }
            Ok(Err(err)) => {
                self.record_failure(&err.to_string());
                Err(err)
            }
            Err(_) => {
                let err = GatewayError::Timeout {
                    gateway: self.name.clone(),
                    timeout: self.config.call_timeout,
                };
                self.record_failure(&err.to_string());
                Err(err)
            }
        }
    }

    fn admit(&self) -> Result<(), GatewayError> {
        let mut inner = self.inner.lock().unwrap();
        self.refresh_state(&mut inner);

        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => Ok(()),
            CircuitState::Open => Err(GatewayError::CircuitOpen(self.name.clone())),
        }
    }

    fn refresh_state(&self, inner: &mut BreakerInner) {
        if inner.state == CircuitState::Open {
            if let Some(opened_at) = inner.opened_at {
                if opened_at.elapsed() >= self.config.reset_timeout {
                    info!(breaker = %self.name, "Circuit half-open, allowing probe");
                    inner.state = CircuitState::HalfOpen;
                }
            }
        }
    }

    fn record_success(&self) {
        let mut inner = self.inner.lock().unwrap();
        if inner.state != CircuitState::Closed {
            info!(breaker = %self.name, "Circuit closed after successful probe");
        }
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
    }

    fn record_failure(&self, reason: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.consecutive_failures += 1;

        let trip = inner.state == CircuitState::HalfOpen
            || inner.consecutive_failures >= self.config.failure_threshold;

        if trip {
            warn!(
                breaker = %self.name,
                failures = inner.consecutive_failures,
                reason = %reason,
                "Circuit opened"
            );
            inner.state = CircuitState::Open;
            inner.opened_at = Some(Instant::now());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_config() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: 2,
            reset_timeout: Duration::from_millis(50),
            call_timeout: Duration::from_millis(100),
        }
    }

    async fn failing_call(breaker: &CircuitBreaker) -> Result<(), GatewayError> {
        breaker
            .call(async { Err::<(), _>(GatewayError::Http("boom".into())) })
            .await
    }

    #[tokio::test]
    async fn test_trips_after_threshold() {
        let breaker = CircuitBreaker::new("test", fast_config());

        assert_eq!(breaker.state(), CircuitState::Closed);
        let _ = failing_call(&breaker).await;
        assert_eq!(breaker.state(), CircuitState::Closed);
        let _ = failing_call(&breaker).await;
        assert_eq!(breaker.state(), CircuitState::Open);

        // calls while open fail fast without running the future
        let result = breaker.call(async { Ok::<_, GatewayError>(42) }).await;
        assert!(matches!(result, Err(GatewayError::CircuitOpen(_))));
    }

    #[tokio::test]
    async fn test_half_open_probe_closes_on_success() {
        let breaker = CircuitBreaker::new("test", fast_config());
        let _ = failing_call(&breaker).await;
        let _ = failing_call(&breaker).await;
        assert_eq!(breaker.state(), CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        let result = breaker.call(async { Ok::<_, GatewayError>("ok") }).await;
        assert!(result.is_ok());
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_half_open_probe_reopens_on_failure() {
        let breaker = CircuitBreaker::new("test", fast_config());
        let _ = failing_call(&breaker).await;
        let _ = failing_call(&breaker).await;

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        let _ = failing_call(&breaker).await;
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn test_timeout_counts_as_failure() {
        let breaker = CircuitBreaker::new("test", fast_config());

        let result = breaker
            .call(async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<_, GatewayError>(())
            })
            .await;

        assert!(matches!(result, Err(GatewayError::Timeout { .. })));
    }

    #[tokio::test]
    async fn test_success_resets_failure_count() {
        let breaker = CircuitBreaker::new("test", fast_config());

        let _ = failing_call(&breaker).await;
        let _ = breaker.call(async { Ok::<_, GatewayError>(()) }).await;
        let _ = failing_call(&breaker).await;

        // one failure after a success is below the threshold of two
        assert_eq!(breaker.state(), CircuitState::Closed);
    }
}
