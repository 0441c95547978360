//! Breaker, deadline and metrics around a single database statement.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use crate::db::{is_schema_missing, StoreError};
use crate::observability::metrics::MetricsRegistry;
use crate::resilience::circuit_breaker::CircuitBreaker;
use crate::resilience::timeouts::{QueryTimeout, TimeoutError};

pub struct StatementGuard {
    breaker: Arc<CircuitBreaker>,
    timeout: QueryTimeout,
    metrics: Arc<MetricsRegistry>,
}

impl StatementGuard {
    pub fn new(breaker: Arc<CircuitBreaker>, timeout: QueryTimeout, metrics: Arc<MetricsRegistry>) -> Self {
        Self {
            breaker,
            timeout,
            metrics,
        }
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Run one statement. Its duration is recorded under `operation` whatever
    /// the outcome; failures are also counted by kind.
    ///
    /// A missing table or column is answered by a healthy server, so it is
    /// reported as [`StoreError::SchemaMissing`] without tripping the breaker.
    pub async fn run<T, F, Fut>(&self, operation: &'static str, sql: &str, op: F) -> Result<T, StoreError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, sqlx::Error>>,
    {
        let start = Instant::now();
        let result = self
            .breaker
            .call_classified(
                || self.timeout.run(sql, op()),
                |e: &TimeoutError<sqlx::Error>| {
                    !matches!(e, TimeoutError::Inner(inner) if is_schema_missing(inner))
                },
            )
            .await
            .map_err(StoreError::from);
        self.metrics.record_db_query(operation, start.elapsed());

        if let Err(e) = &result {
            let kind = match e {
                StoreError::Timeout(_) => "db_timeout",
                StoreError::CircuitOpen(_) => "db_circuit_open",
                StoreError::SchemaMissing(_) => "db_schema_missing",
                _ => "db_error",
            };
            self.metrics.record_error(kind);
            tracing::debug!(operation, error = %e, "Database operation failed");
        }
        result
    }
}
