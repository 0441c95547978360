//! Network layer subsystem.
//!
//! Plain TCP listeners are bound by the HTTP server directly; this module
//! only prepares the optional TLS configuration.

pub mod tls;
