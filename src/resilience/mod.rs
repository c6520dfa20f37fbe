//! Cross-cutting resilience layer.
//!
//! Failure counters with warning events, per-operation circuit breakers, and
//! retry/fallback helpers. One `Resilience` instance is constructed at
//! startup and injected into every component that talks to the outside
//! world; tests construct their own.

pub mod breaker;
pub mod retry;

pub use breaker::{BreakerConfig, BreakerState, CircuitBreaker};
pub use retry::{with_fallback, with_retry, RetryPolicy};

use crate::clock::{Clock, SystemClock};
use crate::defaults;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::broadcast;
use tracing::warn;

/// Warning emitted when an operation keeps failing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Warning {
    pub operation: String,
    pub count: u32,
    pub message: String,
}

#[derive(Debug)]
struct FailureEntry {
    count: u32,
    last_failure: Instant,
    last_message: String,
    warned: bool,
}

/// Point-in-time failure counter state, as reported by the control API.
#[derive(Debug, Clone, Serialize)]
pub struct FailureStatus {
    pub operation: String,
    pub count: u32,
    pub last_message: String,
    pub seconds_since_last: u64,
}

/// Point-in-time breaker state, as reported by the control API.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerStatus {
    pub operation: String,
    pub state: BreakerState,
}

/// Combined `/errors` report.
#[derive(Debug, Clone, Serialize)]
pub struct ResilienceSnapshot {
    pub failures: Vec<FailureStatus>,
    pub breakers: Vec<BreakerStatus>,
}

/// Injected failure tracking and circuit breaking.
pub struct Resilience {
    clock: Arc<dyn Clock>,
    warning_threshold: u32,
    entries: Mutex<HashMap<String, FailureEntry>>,
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
    warning_tx: broadcast::Sender<Warning>,
}

impl Resilience {
    /// Creates a resilience layer on the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Creates a resilience layer on the given clock (for tests).
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        let (warning_tx, _) = broadcast::channel(256);
        Self {
            clock,
            warning_threshold: defaults::FAILURE_WARNING_THRESHOLD,
            entries: Mutex::new(HashMap::new()),
            breakers: Mutex::new(HashMap::new()),
            warning_tx,
        }
    }

    /// Subscribe to warning events.
    pub fn subscribe_warnings(&self) -> broadcast::Receiver<Warning> {
        self.warning_tx.subscribe()
    }

    /// Record a failure for the named operation.
    ///
    /// The first time the consecutive count reaches the threshold a single
    /// warning event fires; a success re-arms it.
    pub fn record_failure(&self, operation: &str, message: &str) {
        let mut entries = self.entries.lock().unwrap();
        let entry = entries
            .entry(operation.to_string())
            .or_insert_with(|| FailureEntry {
                count: 0,
                last_failure: self.clock.now(),
                last_message: String::new(),
                warned: false,
            });
        entry.count += 1;
        entry.last_failure = self.clock.now();
        entry.last_message = message.to_string();

        if entry.count >= self.warning_threshold && !entry.warned {
            entry.warned = true;
            let warning = Warning {
                operation: operation.to_string(),
                count: entry.count,
                message: message.to_string(),
            };
            warn!(operation, count = entry.count, message, "repeated failures");
            // No subscribers is fine
            let _ = self.warning_tx.send(warning);
        }
    }

    /// Record a success, resetting the operation's counter.
    pub fn record_success(&self, operation: &str) {
        let mut entries = self.entries.lock().unwrap();
        if let Some(entry) = entries.get_mut(operation) {
            entry.count = 0;
            entry.warned = false;
        }
    }

    /// Get or create the breaker guarding the named operation.
    pub fn breaker(&self, operation: &str) -> Arc<CircuitBreaker> {
        let mut breakers = self.breakers.lock().unwrap();
        Arc::clone(breakers.entry(operation.to_string()).or_insert_with(|| {
            Arc::new(CircuitBreaker::new(
                operation,
                BreakerConfig::default(),
                Arc::clone(&self.clock),
            ))
        }))
    }

    /// Snapshot counters and breaker states for the control API.
    pub fn snapshot(&self) -> ResilienceSnapshot {
        let now = self.clock.now();
        let mut failures: Vec<FailureStatus> = self
            .entries
            .lock()
            .unwrap()
            .iter()
            .map(|(operation, entry)| FailureStatus {
                operation: operation.clone(),
                count: entry.count,
                last_message: entry.last_message.clone(),
                seconds_since_last: now.duration_since(entry.last_failure).as_secs(),
            })
            .collect();
        failures.sort_by(|a, b| a.operation.cmp(&b.operation));

        let mut breakers: Vec<BreakerStatus> = self
            .breakers
            .lock()
            .unwrap()
            .values()
            .map(|breaker| BreakerStatus {
                operation: breaker.operation().to_string(),
                state: breaker.state(),
            })
            .collect();
        breakers.sort_by(|a, b| a.operation.cmp(&b.operation));

        ResilienceSnapshot { failures, breakers }
    }
}

impl Default for Resilience {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;

    #[test]
    fn test_warning_fires_exactly_once_at_threshold() {
        let resilience = Resilience::new();
        let mut warnings = resilience.subscribe_warnings();

        resilience.record_failure("stt_send", "timeout");
        resilience.record_failure("stt_send", "timeout");
        assert!(warnings.try_recv().is_err());

        resilience.record_failure("stt_send", "timeout");
        let warning = warnings.try_recv().unwrap();
        assert_eq!(warning.operation, "stt_send");
        assert_eq!(warning.count, 3);

        // Further failures do not re-warn
        resilience.record_failure("stt_send", "timeout");
        resilience.record_failure("stt_send", "timeout");
        assert!(warnings.try_recv().is_err());
    }

    #[test]
    fn test_success_rearms_warning() {
        let resilience = Resilience::new();
        let mut warnings = resilience.subscribe_warnings();

        for _ in 0..3 {
            resilience.record_failure("llm", "refused");
        }
        assert!(warnings.try_recv().is_ok());

        resilience.record_success("llm");
        for _ in 0..3 {
            resilience.record_failure("llm", "refused");
        }
        let warning = warnings.try_recv().unwrap();
        assert_eq!(warning.count, 3);
    }

    #[test]
    fn test_counters_are_independent_per_operation() {
        let resilience = Resilience::new();
        let mut warnings = resilience.subscribe_warnings();

        resilience.record_failure("a", "x");
        resilience.record_failure("a", "x");
        resilience.record_failure("b", "y");
        assert!(warnings.try_recv().is_err());

        resilience.record_failure("a", "x");
        assert_eq!(warnings.try_recv().unwrap().operation, "a");
    }

    #[test]
    fn test_breaker_is_shared_per_operation() {
        let resilience = Resilience::new();
        let first = resilience.breaker("stt");
        let second = resilience.breaker("stt");
        for _ in 0..5 {
            first.record_failure();
        }
        assert_eq!(second.state(), BreakerState::Open);
    }

    #[test]
    fn test_snapshot_reports_counters_and_breakers() {
        let clock = MockClock::new();
        let resilience = Resilience::with_clock(Arc::new(clock.clone()));

        resilience.record_failure("stt_send", "connection reset");
        resilience.breaker("llm");
        clock.advance(std::time::Duration::from_secs(7));

        let snapshot = resilience.snapshot();
        assert_eq!(snapshot.failures.len(), 1);
        assert_eq!(snapshot.failures[0].operation, "stt_send");
        assert_eq!(snapshot.failures[0].count, 1);
        assert_eq!(snapshot.failures[0].seconds_since_last, 7);
        assert_eq!(snapshot.breakers.len(), 1);
        assert_eq!(snapshot.breakers[0].state, BreakerState::Closed);
    }

    #[test]
    fn test_snapshot_serializes() {
        let resilience = Resilience::new();
        resilience.record_failure("stt", "boom");
        resilience.breaker("stt");
        let json = serde_json::to_string(&resilience.snapshot()).unwrap();
        assert!(json.contains("\"failures\""));
        assert!(json.contains("\"closed\""));
    }
}
