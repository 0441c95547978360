//! Database access subsystem.
//!
//! # Data Flow
//! ```text
//! auth / health / pool monitor
//!     → store traits (GrantStore, OwnerStore, DbProbe)
//!     → mysql.rs (MySqlStore)
//!     → CircuitBreaker → QueryTimeout → sqlx MySqlPool
//! ```
//!
//! # Design Decisions
//! - Consumers depend on the traits, so tests run against in-memory fakes
//! - RBAC tables may not exist yet; a missing table or column surfaces as
//!   `SchemaMissing` and does not count against the circuit breaker
//! - Every statement is timed and counted in the metrics registry

pub mod guard;
pub mod mysql;

use async_trait::async_trait;
use serde::Serialize;

use crate::resilience::circuit_breaker::BreakerError;
use crate::resilience::timeouts::TimeoutError;

pub use guard::StatementGuard;
pub use mysql::MySqlStore;

/// SQLSTATE for MySQL 1146 (no such table) and 1054 (unknown column).
const SCHEMA_MISSING_SQLSTATES: [&str; 2] = ["42S02", "42S22"];

/// Errors surfaced by the stores.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("{0}")]
    Timeout(String),
    #[error("{0}")]
    CircuitOpen(String),
    #[error("schema missing: {0}")]
    SchemaMissing(String),
    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),
}

impl From<BreakerError<TimeoutError<sqlx::Error>>> for StoreError {
    fn from(err: BreakerError<TimeoutError<sqlx::Error>>) -> Self {
        match err {
            BreakerError::Inner(TimeoutError::Inner(e)) if is_schema_missing(&e) => {
                StoreError::SchemaMissing(e.to_string())
            }
            BreakerError::Inner(TimeoutError::Inner(e)) => StoreError::Database(e),
            BreakerError::Inner(elapsed @ TimeoutError::Elapsed { .. }) => {
                StoreError::Timeout(elapsed.to_string())
            }
            rejected => StoreError::CircuitOpen(rejected.to_string()),
        }
    }
}

/// One RBAC grant: `action` allowed on `module`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleGrant {
    pub module: String,
    pub action: String,
}

impl ModuleGrant {
    pub fn new(module: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            action: action.into(),
        }
    }
}

/// Identifies the owner column of one row.
#[derive(Debug, Clone, Copy)]
pub struct OwnerLookup<'a> {
    pub table: &'a str,
    pub owner_field: &'a str,
    pub id_field: &'a str,
    pub id: &'a str,
}

/// Owner column value of an existing row. `None` when the column is NULL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceOwner(pub Option<String>);

/// Connection pool occupancy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub total: u32,
    pub free: u32,
    pub queued: u32,
    pub acquiring: u32,
}

/// Source of RBAC grants.
#[async_trait]
pub trait GrantStore: Send + Sync {
    /// All active (module, action) grants reachable from the user's roles.
    async fn module_grants(&self, user_id: i64) -> Result<Vec<ModuleGrant>, StoreError>;
}

/// Primary-key lookup of a resource's owner.
#[async_trait]
pub trait OwnerStore: Send + Sync {
    /// `Ok(None)` when no row has the given id.
    async fn resource_owner(
        &self,
        lookup: OwnerLookup<'_>,
    ) -> Result<Option<ResourceOwner>, StoreError>;
}

/// Liveness and pool introspection.
#[async_trait]
pub trait DbProbe: Send + Sync {
    async fn ping(&self) -> Result<(), StoreError>;

    fn pool_stats(&self) -> PoolStats;
}

/// True when the server rejected a statement because a table or column does not exist.
pub fn is_schema_missing(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .and_then(|db| db.code())
        .is_some_and(|code| SCHEMA_MISSING_SQLSTATES.contains(&code.as_ref()))
}

/// Accepts plain SQL identifiers (letters, digits, underscore; not starting with a digit).
pub fn is_valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    name.len() <= 64 && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
