//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Load config → Validate → Build services → Spawn background tasks → Serve
//!
//! Shutdown (shutdown.rs):
//!     Signal received → Broadcast → Background tasks exit → Server drains
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Ordered startup: config first, then services, then listeners
//! - Every background task subscribes to the same shutdown broadcast
//! - Shutdown has timeout: in-flight requests get a bounded drain

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
pub use startup::{Services, StartupError, Stores};
