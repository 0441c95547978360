use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;

use crate::auth::CacheStats;
use crate::http::server::AppState;
use crate::resilience::circuit_breaker::BreakerSnapshot;

#[derive(Debug, Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub environment: String,
    pub uptime_secs: u64,
    pub database_configured: bool,
    pub active_requests: u64,
}

#[derive(Debug, Serialize)]
pub struct FlushResult {
    pub flushed: usize,
}

#[derive(Debug, Serialize)]
pub struct InvalidateResult {
    pub user_id: i64,
    pub removed: bool,
}

pub async fn get_status(State(state): State<AppState>) -> Json<SystemStatus> {
    let services = &state.services;
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        environment: services.config.auth.environment.clone(),
        uptime_secs: state.uptime().as_secs(),
        database_configured: services.probe.is_some(),
        active_requests: services.metrics.active_connections(),
    })
}

pub async fn get_cache(State(state): State<AppState>) -> Json<CacheStats> {
    Json(state.services.cache.stats())
}

pub async fn flush_cache(State(state): State<AppState>) -> Json<FlushResult> {
    Json(FlushResult {
        flushed: state.services.cache.invalidate_all(),
    })
}

pub async fn invalidate_user(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
) -> Json<InvalidateResult> {
    Json(InvalidateResult {
        user_id,
        removed: state.services.cache.invalidate(user_id),
    })
}

pub async fn get_breaker(State(state): State<AppState>) -> Json<BreakerSnapshot> {
    Json(state.services.breaker.snapshot())
}
