//! ERP authorization gateway and resilience layer.
//!
//! Two cross-cutting components for the ERP's HTTP routes:
//! - [`auth`]: token authentication, module authorization, ownership checks
//!   and list scoping, backed by a TTL permission cache
//! - [`resilience`] + [`observability`]: circuit breaker and query timeouts
//!   around MySQL, pool monitoring, metrics and health reporting

// Core subsystems
pub mod auth;
pub mod config;
pub mod db;
pub mod http;
pub mod net;

// Cross-cutting concerns
pub mod admin;
pub mod lifecycle;
pub mod observability;
pub mod resilience;

pub use config::schema::GatewayConfig;
pub use http::HttpServer;
pub use lifecycle::{Services, Shutdown};
