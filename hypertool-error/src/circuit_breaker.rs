use std::time::Duration;
use std::time::Instant;

use tokio::sync::Mutex;
use tracing::info;

use crate::error::ProxyError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerThresholds {
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub recovery_timeout: Duration,
}

impl Default for CircuitBreakerThresholds {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 1,
            recovery_timeout: Duration::from_secs(30),
        }
    }
}

struct Inner {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_failure_time: Option<Instant>,
    /// Set while a HALF_OPEN probe is outstanding so only one call is ever
    /// admitted as the probe; cleared when that call's outcome lands.
    probe_in_flight: bool,
}

/// Per-`(server, operation-class)` gate. One instance
/// guards one downstream server's calls; the connection pool owns one per
/// server name.
pub struct CircuitBreaker {
    pub name: String,
    thresholds: CircuitBreakerThresholds,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, thresholds: CircuitBreakerThresholds) -> Self {
        Self {
            name: name.into(),
            thresholds,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                last_failure_time: None,
                probe_in_flight: false,
            }),
        }
    }

    pub async fn state(&self) -> CircuitState {
        self.inner.lock().await.state
    }

    /// Determines whether a call is currently allowed through the breaker,
    /// transitioning `Open` -> `HalfOpen` if the recovery timeout has
    /// elapsed. Returns `Err(CircuitOpenError)` otherwise. At most one call
    /// is ever admitted while `HalfOpen` — the sole probe; every other
    /// caller is refused until that probe's outcome lands.
    pub async fn before_call(&self) -> Result<(), ProxyError> {
        let mut inner = self.inner.lock().await;
        match inner.state {
            CircuitState::Closed => Ok(()),
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    Err(ProxyError::connection_fatal(format!(
                        "circuit '{}' is half-open with a probe already in flight",
                        self.name
                    )))
                } else {
                    inner.probe_in_flight = true;
                    Ok(())
                }
            }
            CircuitState::Open => {
                let elapsed = inner
                    .last_failure_time
                    .map(|t| t.elapsed())
                    .unwrap_or(Duration::MAX);
                if elapsed >= self.thresholds.recovery_timeout {
                    info!(breaker = %self.name, "recovery timeout elapsed, probing");
                    inner.state = CircuitState::HalfOpen;
                    inner.success_count = 0;
                    inner.probe_in_flight = true;
                    Ok(())
                } else {
                    Err(ProxyError::connection_fatal(format!(
                        "circuit '{}' is open",
                        self.name
                    )))
                }
            }
        }
    }

    pub async fn on_success(&self) {
        let mut inner = self.inner.lock().await;
        match inner.state {
            CircuitState::Closed => {
                inner.failure_count = 0;
            }
            CircuitState::HalfOpen => {
                inner.probe_in_flight = false;
                inner.success_count += 1;
                if inner.success_count >= self.thresholds.success_threshold {
                    info!(breaker = %self.name, from = ?CircuitState::HalfOpen, to = ?CircuitState::Closed, "circuit closed");
                    inner.state = CircuitState::Closed;
                    inner.failure_count = 0;
                    inner.success_count = 0;
                }
            }
            CircuitState::Open => {}
        }
    }

    pub async fn on_failure(&self) {
        let mut inner = self.inner.lock().await;
        inner.last_failure_time = Some(Instant::now());
        match inner.state {
            CircuitState::Closed => {
                inner.failure_count += 1;
                if inner.failure_count >= self.thresholds.failure_threshold {
                    info!(breaker = %self.name, from = ?CircuitState::Closed, to = ?CircuitState::Open, "circuit opened");
                    inner.state = CircuitState::Open;
                }
            }
            CircuitState::HalfOpen => {
                info!(breaker = %self.name, from = ?CircuitState::HalfOpen, to = ?CircuitState::Open, "probe failed, circuit re-opened");
                inner.state = CircuitState::Open;
                inner.success_count = 0;
                inner.probe_in_flight = false;
            }
            CircuitState::Open => {}
        }
    }

    /// Runs `op` through the breaker: refuses if open, records the outcome
    /// on success/failure.
    pub async fn call<T, F, Fut>(&self, op: F) -> Result<T, ProxyError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, ProxyError>>,
    {
        self.before_call().await?;
        match op().await {
            Ok(value) => {
                self.on_success().await;
                Ok(value)
            }
            Err(err) => {
                self.on_failure().await;
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn thresholds() -> CircuitBreakerThresholds {
        CircuitBreakerThresholds {
            failure_threshold: 3,
            success_threshold: 1,
            recovery_timeout: Duration::from_millis(50),
        }
    }

    #[tokio::test]
    async fn trips_open_after_failure_threshold() {
        let breaker = CircuitBreaker::new("git", thresholds());
        for _ in 0..3 {
            breaker.on_failure().await;
        }
        assert_eq!(breaker.state().await, CircuitState::Open);
        assert!(breaker.before_call().await.is_err());
    }

    #[tokio::test]
    async fn half_open_probe_after_recovery_timeout() {
        let breaker = CircuitBreaker::new("git", thresholds());
        for _ in 0..3 {
            breaker.on_failure().await;
        }
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(breaker.before_call().await.is_ok());
        assert_eq!(breaker.state().await, CircuitState::HalfOpen);
    }

    #[tokio::test]
    async fn half_open_admits_only_one_concurrent_probe() {
        let breaker = CircuitBreaker::new("git", thresholds());
        for _ in 0..3 {
            breaker.on_failure().await;
        }
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(breaker.before_call().await.is_ok());
        assert_eq!(breaker.state().await, CircuitState::HalfOpen);
        // A second caller arriving while the probe is still outstanding is
        // refused, not admitted as a concurrent probe.
        assert!(breaker.before_call().await.is_err());
        breaker.on_success().await;
        assert_eq!(breaker.state().await, CircuitState::Closed);
        // Once the probe resolves and the breaker closes, normal calls pass.
        assert!(breaker.before_call().await.is_ok());
    }

    #[tokio::test]
    async fn half_open_success_closes_circuit() {
        let breaker = CircuitBreaker::new("git", thresholds());
        for _ in 0..3 {
            breaker.on_failure().await;
        }
        tokio::time::sleep(Duration::from_millis(60)).await;
        breaker.before_call().await.unwrap_or(());
        breaker.on_success().await;
        assert_eq!(breaker.state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn half_open_failure_reopens_and_resets_timer() {
        let breaker = CircuitBreaker::new("git", thresholds());
        for _ in 0..3 {
            breaker.on_failure().await;
        }
        tokio::time::sleep(Duration::from_millis(60)).await;
        breaker.before_call().await.unwrap_or(());
        breaker.on_failure().await;
        assert_eq!(breaker.state().await, CircuitState::Open);
        // Immediately after re-opening, calls are still refused.
        assert!(breaker.before_call().await.is_err());
    }

    #[tokio::test]
    async fn closed_circuit_resets_failure_count_on_success() {
        let breaker = CircuitBreaker::new("git", thresholds());
        breaker.on_failure().await;
        breaker.on_success().await;
        breaker.on_failure().await;
        breaker.on_failure().await;
        // Only 2 consecutive failures since the reset; threshold is 3.
        assert_eq!(breaker.state().await, CircuitState::Closed);
    }
}
