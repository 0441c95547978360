//! Gateway endpoints other than health.

use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Extension, Json,
};
use serde::Serialize;

use crate::auth::{Capabilities, Identity, UserPermissions};
use crate::http::server::AppState;
use crate::observability::metrics::{RuntimeSnapshot, CONTENT_TYPE};
use crate::observability::process;

/// `GET /metrics`: Prometheus text exposition.
pub async fn metrics(State(state): State<AppState>) -> Response {
    let services = &state.services;
    let runtime = RuntimeSnapshot {
        uptime: state.uptime(),
        resident_memory_bytes: process::resident_memory_bytes(),
        cache: Some(services.cache.stats()),
        pool: services.probe.as_ref().map(|p| p.pool_stats()),
        breakers: vec![services.breaker.snapshot()],
    };

    match services.metrics.render(&runtime) {
        Ok(body) => ([(header::CONTENT_TYPE, CONTENT_TYPE)], body).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MeResponse {
    pub user: Identity,
    pub is_admin: bool,
    pub global_access: bool,
    pub capabilities: Capabilities,
    pub permissions: UserPermissions,
}

/// `GET /api/me`: the authenticated caller as the gateway sees them.
pub async fn me(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Extension(permissions): Extension<Arc<UserPermissions>>,
) -> Json<MeResponse> {
    let policy = state.services.policy.load();
    Json(MeResponse {
        is_admin: policy.is_admin(&identity),
        global_access: policy.has_global_access(&identity),
        capabilities: policy.capabilities(&identity),
        permissions: permissions.as_ref().clone(),
        user: identity,
    })
}
