use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, StatusCode},
    middleware::Next,
    response::Response,
};

use crate::http::server::AppState;

/// Require `Authorization: Bearer <admin.api_key>`.
pub async fn admin_auth_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let expected = &state.services.config.admin.api_key;

    let provided = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    match provided {
        Some(key) if keys_match(key.as_bytes(), expected.as_bytes()) => Ok(next.run(request).await),
        _ => {
            tracing::warn!(
                target: "audit",
                path = %request.uri().path(),
                "Admin API request rejected"
            );
            Err(StatusCode::UNAUTHORIZED)
        }
    }
}

/// Compare without exiting at the first differing byte. Only the length leaks.
fn keys_match(provided: &[u8], expected: &[u8]) -> bool {
    if expected.is_empty() || provided.len() != expected.len() {
        return false;
    }
    provided
        .iter()
        .zip(expected)
        .fold(0u8, |diff, (a, b)| diff | (a ^ b))
        == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_match() {
        assert!(keys_match(b"integration-admin-key", b"integration-admin-key"));
        assert!(!keys_match(b"integration-admin-kez", b"integration-admin-key"));
        assert!(!keys_match(b"integration", b"integration-admin-key"));
        assert!(!keys_match(b"", b""));
    }
}
