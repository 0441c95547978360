//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML) + environment
//!     → loader.rs (parse, deserialize, env overrides)
//!     → validation.rs (semantic checks)
//!     → GatewayConfig (validated, immutable)
//!     → shared via Arc to all subsystems
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → atomic swap of the authorization policy (ArcSwap)
//! ```
//!
//! # Design Decisions
//! - Only the authorization tables are hot-reloaded; everything else needs a restart
//! - All fields have defaults to allow minimal configs
//! - Secrets come from the environment, never logged or serialized

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use schema::{
    AdminConfig, AuthConfig, AuthzConfig, CircuitBreakerConfig, DatabaseConfig, GatewayConfig,
    ListenerConfig, ObservabilityConfig, PoolMonitorConfig, TimeoutConfig,
};
