//! `GET /health`.
//!
//! Reports process, database, cache and breaker state. Answers 503 when the
//! database is not configured or does not answer `SELECT 1`, 200 otherwise.

use axum::{extract::State, http::StatusCode, Json};
use chrono::Utc;
use serde::Serialize;
use tokio::time::Instant;

use crate::auth::CacheStats;
use crate::db::PoolStats;
use crate::http::server::AppState;
use crate::observability::process;
use crate::resilience::circuit_breaker::BreakerSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Ok,
    Degraded,
}

#[derive(Debug, Serialize)]
pub struct DatabaseHealth {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub timestamp: String,
    pub uptime_secs: u64,
    pub version: &'static str,
    pub pid: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_rss_bytes: Option<u64>,
    pub database: DatabaseHealth,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pool: Option<PoolStats>,
    pub cache: CacheStats,
    pub circuit_breaker: BreakerSnapshot,
}

pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthReport>) {
    let services = &state.services;

    let (database, pool) = match &services.probe {
        Some(probe) => {
            let start = Instant::now();
            let database = match probe.ping().await {
                Ok(()) => DatabaseHealth {
                    status: "connected",
                    latency_ms: Some(start.elapsed().as_millis() as u64),
                    error: None,
                },
                Err(e) => {
                    tracing::warn!(error = %e, "Health check database ping failed");
                    DatabaseHealth {
                        status: "disconnected",
                        latency_ms: None,
                        error: Some(e.to_string()),
                    }
                }
            };
            (database, Some(probe.pool_stats()))
        }
        None => (
            DatabaseHealth {
                status: "not_configured",
                latency_ms: None,
                error: None,
            },
            None,
        ),
    };

    let status = if database.status == "connected" {
        HealthStatus::Ok
    } else {
        HealthStatus::Degraded
    };

    let report = HealthReport {
        status,
        timestamp: Utc::now().to_rfc3339(),
        uptime_secs: state.uptime().as_secs(),
        version: env!("CARGO_PKG_VERSION"),
        pid: std::process::id(),
        memory_rss_bytes: process::resident_memory_bytes(),
        database,
        pool,
        cache: services.cache.stats(),
        circuit_breaker: services.breaker.snapshot(),
    };

    let code = match status {
        HealthStatus::Ok => StatusCode::OK,
        HealthStatus::Degraded => StatusCode::SERVICE_UNAVAILABLE,
    };
    (code, Json(report))
}
