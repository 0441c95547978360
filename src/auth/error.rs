//! Authentication and authorization failures.
//!
//! Every variant renders as `{"message": ..., "code": ...}` with a fixed
//! status. Messages stay generic so a denial never reveals whether a
//! resource exists (the explicit 404 is the only exception).

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("authentication token not provided")]
    Missing,
    #[error("authentication token expired")]
    Expired,
    #[error("authentication token invalid")]
    Invalid,
    #[error("authentication required")]
    Required,
    #[error("access denied to module {module}")]
    Denied { module: String },
    #[error("access denied to resource")]
    IdorDenied,
    #[error("resource not found")]
    NotFound,
    #[error("ownership check failed")]
    OwnershipCheckFailed,
}

/// JSON body returned for every auth failure.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub message: &'static str,
    pub code: &'static str,
}

impl AuthError {
    pub fn status(&self) -> StatusCode {
        match self {
            AuthError::Missing | AuthError::Expired | AuthError::Required => {
                StatusCode::UNAUTHORIZED
            }
            AuthError::Invalid | AuthError::Denied { .. } | AuthError::IdorDenied => {
                StatusCode::FORBIDDEN
            }
            AuthError::NotFound => StatusCode::NOT_FOUND,
            AuthError::OwnershipCheckFailed => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AuthError::Missing => "AUTH_MISSING",
            AuthError::Expired => "AUTH_EXPIRED",
            AuthError::Invalid => "AUTH_INVALID",
            AuthError::Required => "AUTH_REQUIRED",
            AuthError::Denied { .. } => "AUTHZ_DENIED",
            AuthError::IdorDenied => "IDOR_DENIED",
            AuthError::NotFound => "NOT_FOUND",
            AuthError::OwnershipCheckFailed => "OWNERSHIP_CHECK_FAILED",
        }
    }

    /// Client-facing message. Never includes module or resource details.
    pub fn public_message(&self) -> &'static str {
        match self {
            AuthError::Missing => "Authentication token not provided",
            AuthError::Expired => "Session expired, please sign in again",
            AuthError::Invalid => "Invalid authentication token",
            AuthError::Required => "Authentication required",
            AuthError::Denied { .. } => "You do not have permission to access this module",
            AuthError::IdorDenied => "You do not have permission to access this resource",
            AuthError::NotFound => "Resource not found",
            AuthError::OwnershipCheckFailed => "Could not verify resource permissions",
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            message: self.public_message(),
            code: self.code(),
        };
        (self.status(), Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_and_code_table() {
        let cases = [
            (AuthError::Missing, 401, "AUTH_MISSING"),
            (AuthError::Expired, 401, "AUTH_EXPIRED"),
            (AuthError::Invalid, 403, "AUTH_INVALID"),
            (AuthError::Required, 401, "AUTH_REQUIRED"),
            (AuthError::Denied { module: "vendas".into() }, 403, "AUTHZ_DENIED"),
            (AuthError::IdorDenied, 403, "IDOR_DENIED"),
            (AuthError::NotFound, 404, "NOT_FOUND"),
            (AuthError::OwnershipCheckFailed, 500, "OWNERSHIP_CHECK_FAILED"),
        ];

        for (err, status, code) in cases {
            assert_eq!(err.status().as_u16(), status, "{code}");
            assert_eq!(err.code(), code);
        }
    }

    #[test]
    fn test_denied_message_hides_module() {
        let err = AuthError::Denied { module: "financeiro".into() };
        assert!(!err.public_message().contains("financeiro"));
    }
}
