//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, ratios within bounds)
//! - Check the role tables are usable
//! - Refuse weak token secrets in production
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::fmt;

use crate::config::schema::GatewayConfig;

/// Minimum secret length accepted in production.
pub const MIN_SECRET_LENGTH: usize = 32;

/// Secrets known to have leaked or shipped as placeholders.
const COMPROMISED_SECRETS: &[&str] = &[
    "dev-only-secret-change-in-production-2026",
    "secret",
    "jwt-secret",
    "your-secret-key",
];

/// A single semantic violation, tagged with the offending field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validate a fully loaded configuration.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::new("timeouts.request_secs", "must be greater than 0"));
    }

    if config.auth.permission_cache_ttl_secs == 0 {
        errors.push(ValidationError::new(
            "auth.permission_cache_ttl_secs",
            "must be greater than 0",
        ));
    }
    if config.auth.cache_sweep_interval_secs == 0 {
        errors.push(ValidationError::new(
            "auth.cache_sweep_interval_secs",
            "must be greater than 0",
        ));
    }

    if let Some(secret) = &config.auth.jwt_secret {
        if config.auth.is_production() {
            if secret.len() < MIN_SECRET_LENGTH {
                errors.push(ValidationError::new(
                    "auth.jwt_secret",
                    format!("must be at least {} bytes in production", MIN_SECRET_LENGTH),
                ));
            }
            if COMPROMISED_SECRETS.contains(&secret.as_str()) {
                errors.push(ValidationError::new(
                    "auth.jwt_secret",
                    "is on the list of compromised secrets",
                ));
            }
        }
    }

    if config.authz.role_modules.keys().any(|role| role.trim().is_empty()) {
        errors.push(ValidationError::new("authz.role_modules", "role names must not be empty"));
    }
    if config
        .authz
        .role_modules
        .values()
        .any(|modules| modules.iter().any(|m| m.trim().is_empty()))
    {
        errors.push(ValidationError::new("authz.role_modules", "module names must not be empty"));
    }

    if config.database.query_timeout_ms == 0 {
        errors.push(ValidationError::new("database.query_timeout_ms", "must be greater than 0"));
    }
    if config.database.max_connections == 0 {
        errors.push(ValidationError::new("database.max_connections", "must be greater than 0"));
    }

    let breaker = &config.circuit_breaker;
    if breaker.failure_threshold == 0 {
        errors.push(ValidationError::new(
            "circuit_breaker.failure_threshold",
            "must be greater than 0",
        ));
    }
    if breaker.success_threshold == 0 {
        errors.push(ValidationError::new(
            "circuit_breaker.success_threshold",
            "must be greater than 0",
        ));
    }
    if breaker.half_open_max == 0 {
        errors.push(ValidationError::new(
            "circuit_breaker.half_open_max",
            "must be greater than 0",
        ));
    }
    if breaker.success_threshold > breaker.half_open_max {
        // The half-open budget would run out before the breaker could close.
        errors.push(ValidationError::new(
            "circuit_breaker.success_threshold",
            format!(
                "must not exceed circuit_breaker.half_open_max ({})",
                breaker.half_open_max
            ),
        ));
    }

    if config.pool_monitor.interval_secs == 0 {
        errors.push(ValidationError::new("pool_monitor.interval_secs", "must be greater than 0"));
    }
    if !(0.0..=1.0).contains(&config.pool_monitor.low_free_ratio) {
        errors.push(ValidationError::new(
            "pool_monitor.low_free_ratio",
            "must be between 0.0 and 1.0",
        ));
    }

    let obs = &config.observability;
    if !matches!(obs.log_format.as_str(), "pretty" | "json") {
        errors.push(ValidationError::new(
            "observability.log_format",
            format!("unknown format '{}', expected 'pretty' or 'json'", obs.log_format),
        ));
    }
    if obs.sample_window_secs == 0 {
        errors.push(ValidationError::new(
            "observability.sample_window_secs",
            "must be greater than 0",
        ));
    }
    if obs.max_samples == 0 {
        errors.push(ValidationError::new("observability.max_samples", "must be greater than 0"));
    }

    if config.admin.enabled {
        let key = config.admin.api_key.trim();
        if key.is_empty() {
            errors.push(ValidationError::new(
                "admin.api_key",
                "must not be empty when the admin API is enabled",
            ));
        } else if key == "CHANGE_ME_IN_PRODUCTION" {
            errors.push(ValidationError::new(
                "admin.api_key",
                "placeholder key must be replaced when the admin API is enabled",
            ));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
