//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP/TLS connection
//!     → server.rs (Axum setup, tower-http layers, metrics middleware)
//!     → health.rs (GET /health)
//!     → handlers.rs (GET /metrics, GET /api/me)
//!     → admin router (when enabled)
//! ```

pub mod handlers;
pub mod health;
pub mod server;

pub use server::{AppState, HttpServer, ServerError};
