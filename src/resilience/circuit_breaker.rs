//! Circuit breaker for database protection.
//!
//! # States
//! - Closed: normal operation, consecutive failures are counted
//! - Open: downstream assumed down, calls fail fast
//! - Half-Open: a bounded number of trial calls probe recovery
//!
//! # State Transitions
//! ```text
//! Closed → Open: failure_count >= failure_threshold
//! Open → Half-Open: next call after reset_timeout since the last failure
//! Half-Open → Closed: success_threshold consecutive successes
//! Half-Open → Open: any failure, or half_open_max trials used up
//! ```
//!
//! # Design Decisions
//! - One breaker per protected resource, owned by whoever wraps that resource
//! - Open → Half-Open is evaluated lazily on the next call, no timer task
//! - The lock is never held across the wrapped call

use std::fmt;
use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use crate::config::CircuitBreakerConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    /// Numeric encoding used by the metrics gauge.
    pub fn as_gauge(&self) -> u8 {
        match self {
            CircuitState::Closed => 0,
            CircuitState::HalfOpen => 1,
            CircuitState::Open => 2,
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "CLOSED"),
            CircuitState::Open => write!(f, "OPEN"),
            CircuitState::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Error returned by [`CircuitBreaker::call`].
#[derive(Debug, thiserror::Error)]
pub enum BreakerError<E> {
    /// Rejected without invoking the operation.
    #[error("circuit breaker {name} is OPEN: service temporarily unavailable")]
    Open { name: String },
    /// Half-open trial budget used up; the breaker has reopened.
    #[error("circuit breaker {name} is HALF_OPEN: trial limit reached")]
    HalfOpenExhausted { name: String },
    /// The wrapped operation failed.
    #[error(transparent)]
    Inner(E),
}

impl<E> BreakerError<E> {
    pub fn is_rejection(&self) -> bool {
        !matches!(self, BreakerError::Inner(_))
    }
}

/// Point-in-time view of a breaker.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerSnapshot {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    /// Milliseconds since the last recorded failure, if any.
    pub last_failure_ms_ago: Option<u64>,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    half_open_attempts: u32,
    last_failure: Option<Instant>,
}

/// Why a call was refused before running.
enum Rejection {
    Open,
    HalfOpenExhausted,
}

pub struct CircuitBreaker {
    name: String,
    failure_threshold: u32,
    success_threshold: u32,
    half_open_max: u32,
    reset_timeout: Duration,
    inner: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: &CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            failure_threshold: config.failure_threshold.max(1),
            success_threshold: config.success_threshold.max(1),
            half_open_max: config.half_open_max.max(1),
            reset_timeout: Duration::from_secs(config.reset_timeout_secs),
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                half_open_attempts: 0,
                last_failure: None,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run `op` through the breaker.
    ///
    /// While open (and before the reset timeout) `op` is never invoked.
    pub async fn call<F, Fut, T, E>(&self, op: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.call_classified(op, |_| true).await
    }

    /// Like [`call`](Self::call), but only errors for which `is_failure`
    /// returns true count against the downstream. Other errors prove the
    /// downstream answered and are recorded as successes.
    pub async fn call_classified<F, Fut, T, E, C>(
        &self,
        op: F,
        is_failure: C,
    ) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        C: FnOnce(&E) -> bool,
    {
        if let Err(rejection) = self.admit() {
            return Err(match rejection {
                Rejection::Open => BreakerError::Open { name: self.name.clone() },
                Rejection::HalfOpenExhausted => {
                    BreakerError::HalfOpenExhausted { name: self.name.clone() }
                }
            });
        }

        match op().await {
            Ok(value) => {
                self.on_success();
                Ok(value)
            }
            Err(e) => {
                if is_failure(&e) {
                    self.on_failure();
                } else {
                    self.on_success();
                }
                Err(BreakerError::Inner(e))
            }
        }
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.lock();
        BreakerSnapshot {
            name: self.name.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            last_failure_ms_ago: inner
                .last_failure
                .map(|at| at.elapsed().as_millis() as u64),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn admit(&self) -> Result<(), Rejection> {
        let mut inner = self.lock();

        if inner.state == CircuitState::Open {
            let cooled_down = inner
                .last_failure
                .map(|at| at.elapsed() >= self.reset_timeout)
                .unwrap_or(true);
            if !cooled_down {
                return Err(Rejection::Open);
            }
            inner.state = CircuitState::HalfOpen;
            inner.half_open_attempts = 0;
            inner.success_count = 0;
            tracing::info!(breaker = %self.name, "Circuit half-open, probing downstream");
        }

        if inner.state == CircuitState::HalfOpen {
            if inner.half_open_attempts >= self.half_open_max {
                inner.state = CircuitState::Open;
                inner.last_failure = Some(Instant::now());
                tracing::warn!(
                    breaker = %self.name,
                    trials = inner.half_open_attempts,
                    "Circuit reopened, half-open trial limit reached"
                );
                return Err(Rejection::HalfOpenExhausted);
            }
            inner.half_open_attempts += 1;
        }

        Ok(())
    }

    fn on_success(&self) {
        let mut inner = self.lock();
        inner.failure_count = 0;

        if inner.state == CircuitState::HalfOpen {
            inner.success_count += 1;
            if inner.success_count >= self.success_threshold {
                inner.state = CircuitState::Closed;
                inner.success_count = 0;
                inner.half_open_attempts = 0;
                tracing::info!(breaker = %self.name, "Circuit closed, downstream recovered");
            }
        }
    }

    fn on_failure(&self) {
        let mut inner = self.lock();
        inner.failure_count += 1;
        inner.last_failure = Some(Instant::now());

        match inner.state {
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.success_count = 0;
                tracing::warn!(breaker = %self.name, "Circuit opened, failure while half-open");
            }
            CircuitState::Closed if inner.failure_count >= self.failure_threshold => {
                inner.state = CircuitState::Open;
                tracing::warn!(
                    breaker = %self.name,
                    failures = inner.failure_count,
                    "Circuit opened after consecutive failures"
                );
            }
            _ => {}
        }
    }
}
