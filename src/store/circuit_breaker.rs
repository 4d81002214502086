use crate::error::{ViewRankError, ViewRankResult};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    opened_at: Option<Instant>,
}

/// Fails store calls fast after repeated transport failures.
///
/// After `failure_threshold` consecutive failures the circuit opens and calls
/// are rejected until `reset_timeout` has passed; the next call then probes
/// the store in half-open state.
#[derive(Debug)]
pub struct CircuitBreaker {
    inner: RwLock<BreakerState>,
    failure_count: AtomicU32,
    failure_threshold: u32,
    reset_timeout: Duration,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, reset_timeout: Duration) -> Self {
        Self {
            inner: RwLock::new(BreakerState {
                state: CircuitState::Closed,
                opened_at: None,
            }),
            failure_count: AtomicU32::new(0),
            failure_threshold: failure_threshold.max(1),
            reset_timeout,
        }
    }

    pub async fn can_execute(&self) -> bool {
        {
            let inner = self.inner.read().await;
            match inner.state {
                CircuitState::Closed | CircuitState::HalfOpen => return true,
                CircuitState::Open => {
                    let expired = inner
                        .opened_at
                        .map(|at| at.elapsed() >= self.reset_timeout)
                        .unwrap_or(true);
                    if !expired {
                        return false;
                    }
                }
            }
        }

        let mut inner = self.inner.write().await;
        if inner.state == CircuitState::Open {
            debug!("Circuit breaker transitioning to half-open");
            inner.state = CircuitState::HalfOpen;
        }
        true
    }

    /// Reject the call with `StoreUnavailable` while the circuit is open.
    pub async fn guard(&self, store_op: &str) -> ViewRankResult<()> {
        if self.can_execute().await {
            Ok(())
        } else {
            Err(ViewRankError::StoreUnavailable(format!(
                "circuit breaker open, {} rejected",
                store_op
            )))
        }
    }

    /// Returns true when this success closed a previously open circuit.
    pub async fn record_success(&self) -> bool {
        self.failure_count.store(0, Ordering::SeqCst);
        let mut inner = self.inner.write().await;
        if inner.state != CircuitState::Closed {
            debug!("Circuit breaker closing");
            inner.state = CircuitState::Closed;
            inner.opened_at = None;
            true
        } else {
            false
        }
    }

    /// Returns true when this failure opened the circuit.
    pub async fn record_failure(&self) -> bool {
        let count = self.failure_count.fetch_add(1, Ordering::SeqCst) + 1;
        let mut inner = self.inner.write().await;
        let should_open = inner.state == CircuitState::HalfOpen
            || (inner.state == CircuitState::Closed && count >= self.failure_threshold);
        if should_open {
            warn!(
                "Circuit breaker opened after {} consecutive failures",
                count
            );
            inner.state = CircuitState::Open;
            inner.opened_at = Some(Instant::now());
        }
        should_open
    }

    pub async fn state(&self) -> CircuitState {
        self.inner.read().await.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_opens_after_threshold() {
        let breaker = CircuitBreaker::new(3, Duration::from_secs(60));

        assert!(!breaker.record_failure().await);
        assert!(!breaker.record_failure().await);
        assert_eq!(breaker.state().await, CircuitState::Closed);
        assert!(breaker.record_failure().await);
        assert_eq!(breaker.state().await, CircuitState::Open);

        assert!(!breaker.can_execute().await);
        let err = breaker.guard("incr").await.unwrap_err();
        assert!(err.is_store_failure());
    }

    #[tokio::test]
    async fn test_success_resets_failure_count() {
        let breaker = CircuitBreaker::new(2, Duration::from_secs(60));

        breaker.record_failure().await;
        assert!(!breaker.record_success().await);
        breaker.record_failure().await;
        assert_eq!(breaker.state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_half_open_after_timeout() {
        let breaker = CircuitBreaker::new(1, Duration::from_millis(20));
        breaker.record_failure().await;
        assert!(!breaker.can_execute().await);

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(breaker.can_execute().await);
        assert_eq!(breaker.state().await, CircuitState::HalfOpen);

        assert!(breaker.record_success().await);
        assert_eq!(breaker.state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_half_open_failure_reopens() {
        let breaker = CircuitBreaker::new(5, Duration::from_millis(10));
        for _ in 0..5 {
            breaker.record_failure().await;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(breaker.can_execute().await);

        assert!(breaker.record_failure().await);
        assert_eq!(breaker.state().await, CircuitState::Open);
    }

    #[test]
    fn test_state_display() {
        assert_eq!(CircuitState::HalfOpen.to_string(), "half_open");
    }
}
