//! Admin API for operators and permission editors.
//!
//! Mounted under `/admin` when `admin.enabled` is set, behind the API key.

pub mod auth;
pub mod handlers;

use axum::{middleware, routing::get, Router};

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::http::server::AppState;

pub fn router(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/cache", get(get_cache).delete(flush_cache))
        .route("/admin/cache/{user_id}", axum::routing::delete(invalidate_user))
        .route("/admin/breaker", get(get_breaker))
        .route_layer(middleware::from_fn_with_state(state, admin_auth_middleware))
}
