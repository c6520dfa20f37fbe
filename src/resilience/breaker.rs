//! Circuit breaker for external operations.
//!
//! Closed → Open on consecutive failures, Open → HalfOpen after the reset
//! timeout, HalfOpen → Closed after enough successful probes (any probe
//! failure reopens the circuit).

use crate::clock::Clock;
use crate::defaults;
use crate::error::{AttuneError, Result};
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Breaker tuning parameters.
#[derive(Debug, Clone, Copy)]
pub struct BreakerConfig {
    /// Consecutive failures before the circuit opens.
    pub failure_threshold: u32,
    /// How long the circuit stays open before a probe call is allowed.
    pub reset_timeout: Duration,
    /// Successful probes required to close a half-open circuit.
    pub half_open_probes: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: defaults::BREAKER_FAILURE_THRESHOLD,
            reset_timeout: Duration::from_secs(defaults::BREAKER_RESET_TIMEOUT_SECS),
            half_open_probes: defaults::BREAKER_HALF_OPEN_PROBES,
        }
    }
}

/// Observable breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct BreakerInner {
    state: BreakerState,
    consecutive_failures: u32,
    probe_successes: u32,
    last_failure: Option<Instant>,
}

/// Per-operation circuit breaker.
pub struct CircuitBreaker {
    operation: String,
    config: BreakerConfig,
    clock: Arc<dyn Clock>,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    /// Creates a breaker for the named operation.
    pub fn new(operation: impl Into<String>, config: BreakerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            operation: operation.into(),
            config,
            clock,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                probe_successes: 0,
                last_failure: None,
            }),
        }
    }

    /// The operation this breaker guards.
    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Gate a call: `Ok` if the call may proceed, `CircuitOpen` otherwise.
    ///
    /// An open circuit past its reset timeout admits the call and moves to
    /// half-open.
    pub fn check(&self) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            BreakerState::Closed | BreakerState::HalfOpen => Ok(()),
            BreakerState::Open => {
                let elapsed = inner
                    .last_failure
                    .map(|at| self.clock.now().duration_since(at))
                    .unwrap_or(Duration::ZERO);
                if elapsed >= self.config.reset_timeout {
                    inner.state = BreakerState::HalfOpen;
                    inner.probe_successes = 0;
                    Ok(())
                } else {
                    Err(AttuneError::CircuitOpen {
                        operation: self.operation.clone(),
                    })
                }
            }
        }
    }

    /// Record a successful call.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            BreakerState::Closed => {
                inner.consecutive_failures = 0;
            }
            BreakerState::HalfOpen => {
                inner.probe_successes += 1;
                if inner.probe_successes >= self.config.half_open_probes {
                    inner.state = BreakerState::Closed;
                    inner.consecutive_failures = 0;
                    inner.probe_successes = 0;
                    inner.last_failure = None;
                }
            }
            BreakerState::Open => {}
        }
    }

    /// Record a failed call.
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.last_failure = Some(self.clock.now());
        match inner.state {
            BreakerState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.failure_threshold {
                    inner.state = BreakerState::Open;
                }
            }
            BreakerState::HalfOpen => {
                inner.state = BreakerState::Open;
                inner.probe_successes = 0;
            }
            BreakerState::Open => {}
        }
    }

    /// Current breaker state.
    pub fn state(&self) -> BreakerState {
        self.inner.lock().unwrap().state
    }

    /// Run `op` through the breaker, recording the outcome.
    pub async fn call<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        self.check()?;
        match op().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(e) => {
                self.record_failure();
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;

    fn breaker_with_clock(clock: MockClock) -> CircuitBreaker {
        CircuitBreaker::new(
            "stt",
            BreakerConfig {
                failure_threshold: 5,
                reset_timeout: Duration::from_secs(30),
                half_open_probes: 3,
            },
            Arc::new(clock),
        )
    }

    #[test]
    fn test_breaker_starts_closed() {
        let breaker = breaker_with_clock(MockClock::new());
        assert_eq!(breaker.state(), BreakerState::Closed);
        assert!(breaker.check().is_ok());
    }

    #[test]
    fn test_breaker_opens_at_threshold() {
        let breaker = breaker_with_clock(MockClock::new());

        for _ in 0..4 {
            breaker.record_failure();
            assert_eq!(breaker.state(), BreakerState::Closed);
        }
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Open);
    }

    #[test]
    fn test_open_breaker_rejects_calls() {
        let breaker = breaker_with_clock(MockClock::new());
        for _ in 0..5 {
            breaker.record_failure();
        }

        let result = breaker.check();
        match result {
            Err(AttuneError::CircuitOpen { operation }) => assert_eq!(operation, "stt"),
            other => panic!("expected CircuitOpen, got {other:?}"),
        }
    }

    #[test]
    fn test_success_resets_closed_failure_count() {
        let breaker = breaker_with_clock(MockClock::new());
        for _ in 0..4 {
            breaker.record_failure();
        }
        breaker.record_success();
        for _ in 0..4 {
            breaker.record_failure();
        }
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[test]
    fn test_reset_timeout_admits_probe_and_half_opens() {
        let clock = MockClock::new();
        let breaker = breaker_with_clock(clock.clone());
        for _ in 0..5 {
            breaker.record_failure();
        }

        // Not yet past the reset timeout
        clock.advance(Duration::from_secs(29));
        assert!(breaker.check().is_err());
        assert_eq!(breaker.state(), BreakerState::Open);

        clock.advance(Duration::from_secs(1));
        assert!(breaker.check().is_ok());
        assert_eq!(breaker.state(), BreakerState::HalfOpen);
    }

    #[test]
    fn test_half_open_closes_after_probe_successes() {
        let clock = MockClock::new();
        let breaker = breaker_with_clock(clock.clone());
        for _ in 0..5 {
            breaker.record_failure();
        }
        clock.advance(Duration::from_secs(30));
        breaker.check().unwrap();

        breaker.record_success();
        breaker.record_success();
        assert_eq!(breaker.state(), BreakerState::HalfOpen);
        breaker.record_success();
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[test]
    fn test_half_open_failure_reopens() {
        let clock = MockClock::new();
        let breaker = breaker_with_clock(clock.clone());
        for _ in 0..5 {
            breaker.record_failure();
        }
        clock.advance(Duration::from_secs(30));
        breaker.check().unwrap();
        breaker.record_success();

        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Open);
        assert!(breaker.check().is_err());
    }

    #[test]
    fn test_closed_after_recovery_requires_full_threshold_again() {
        let clock = MockClock::new();
        let breaker = breaker_with_clock(clock.clone());
        for _ in 0..5 {
            breaker.record_failure();
        }
        clock.advance(Duration::from_secs(30));
        breaker.check().unwrap();
        for _ in 0..3 {
            breaker.record_success();
        }
        assert_eq!(breaker.state(), BreakerState::Closed);

        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[tokio::test]
    async fn test_call_records_outcomes() {
        let breaker = breaker_with_clock(MockClock::new());

        let ok: Result<u32> = breaker.call(|| async { Ok(7) }).await;
        assert_eq!(ok.unwrap(), 7);

        for _ in 0..5 {
            let _: Result<u32> = breaker
                .call(|| async {
                    Err(AttuneError::SttUnavailable {
                        message: "down".to_string(),
                    })
                })
                .await;
        }
        assert_eq!(breaker.state(), BreakerState::Open);

        // Gated before the op runs
        let rejected: Result<u32> = breaker.call(|| async { Ok(1) }).await;
        assert!(matches!(rejected, Err(AttuneError::CircuitOpen { .. })));
    }
}
