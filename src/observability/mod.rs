//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events)
//!     → metrics.rs (counters, duration samples)
//!
//! HTTP requests:
//!     → middleware.rs (route normalization, per-request counters)
//!
//! Consumers:
//!     → stdout (pretty or JSON)
//!     → GET /metrics (Prometheus scrape)
//!     → GET /health (process readings from process.rs)
//! ```
//!
//! # Design Decisions
//! - Structured logging (JSON) for machine parsing
//! - Request ID flows through all log lines of a request
//! - Metrics registry is constructed once and shared by `Arc`

pub mod logging;
pub mod metrics;
pub mod middleware;
pub mod process;
