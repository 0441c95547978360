//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Database statement:
//!     → circuit_breaker.rs (fail fast while the database is considered down)
//!     → timeouts.rs (race the statement against its deadline, DDL exempt)
//!     → sqlx pool
//!
//! Background:
//!     → pool_monitor.rs (periodic pool occupancy warnings)
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every non-DDL statement has a deadline
//! - No automatic retries; a failed statement fails the caller
//! - Breaker and timeout are generic over the wrapped error

pub mod circuit_breaker;
pub mod pool_monitor;
pub mod timeouts;
