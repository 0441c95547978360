//! Query timeout enforcement.
//!
//! # Responsibilities
//! - Race every non-DDL statement against a deadline
//! - Exempt DDL (CREATE/ALTER/DROP/TRUNCATE), which is administrative and may be slow
//! - Surface a timeout error that names the limit and the statement
//!
//! # Design Decisions
//! - Uses Tokio's timeout facilities
//! - On expiry the awaited future is dropped; the statement is NOT killed
//!   server-side and may keep running against the database
//! - Timeout errors are distinct from the wrapped error

use std::future::Future;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;

static DDL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(CREATE|ALTER|DROP|TRUNCATE)\b").expect("valid DDL pattern")
});

/// Characters of the statement echoed in the timeout message.
const STATEMENT_PREVIEW_CHARS: usize = 100;

/// Error returned by [`QueryTimeout::run`].
#[derive(Debug, thiserror::Error)]
pub enum TimeoutError<E> {
    #[error("query timed out after {limit_ms}ms: {statement}...")]
    Elapsed { limit_ms: u64, statement: String },
    #[error(transparent)]
    Inner(E),
}

/// Returns true for statements exempt from the timeout.
pub fn is_ddl(sql: &str) -> bool {
    DDL_PATTERN.is_match(sql)
}

/// Deadline applied to database statements.
#[derive(Debug, Clone, Copy)]
pub struct QueryTimeout {
    limit: Duration,
}

impl QueryTimeout {
    pub fn new(limit: Duration) -> Self {
        Self { limit }
    }

    pub fn from_millis(ms: u64) -> Self {
        Self::new(Duration::from_millis(ms))
    }

    pub fn limit(&self) -> Duration {
        self.limit
    }

    /// Await `fut`, failing with [`TimeoutError::Elapsed`] once the limit passes.
    /// DDL statements are awaited without a deadline.
    pub async fn run<F, T, E>(&self, sql: &str, fut: F) -> Result<T, TimeoutError<E>>
    where
        F: Future<Output = Result<T, E>>,
    {
        if is_ddl(sql) {
            return fut.await.map_err(TimeoutError::Inner);
        }

        match tokio::time::timeout(self.limit, fut).await {
            Ok(result) => result.map_err(TimeoutError::Inner),
            Err(_) => {
                let statement: String = sql.chars().take(STATEMENT_PREVIEW_CHARS).collect();
                tracing::warn!(
                    limit_ms = self.limit.as_millis() as u64,
                    statement = %statement,
                    "Query timed out"
                );
                Err(TimeoutError::Elapsed {
                    limit_ms: self.limit.as_millis() as u64,
                    statement,
                })
            }
        }
    }
}

impl Default for QueryTimeout {
    fn default() -> Self {
        Self::from_millis(15_000)
    }
}
