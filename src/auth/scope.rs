//! List scoping.
//!
//! Handlers append [`UserScope::filter`] to their `WHERE` clause and bind
//! [`UserScope::params`]. Callers with global access get an empty scope.

use std::sync::Arc;

use arc_swap::ArcSwap;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use serde::Serialize;

use crate::auth::error::AuthError;
use crate::auth::ownership::{identifier, InvalidIdentifier};
use crate::auth::policy::AuthzPolicy;
use crate::auth::token::Identity;

/// SQL fragment restricting a listing to the caller's rows.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UserScope {
    pub filter: String,
    pub params: Vec<i64>,
}

impl UserScope {
    pub fn unrestricted() -> Self {
        Self::default()
    }

    pub fn is_unrestricted(&self) -> bool {
        self.filter.is_empty()
    }
}

#[derive(Clone)]
pub struct ScopeRule {
    owner_field: Arc<str>,
    policy: Arc<ArcSwap<AuthzPolicy>>,
}

impl ScopeRule {
    pub fn new(owner_field: &str, policy: Arc<ArcSwap<AuthzPolicy>>) -> Result<Self, InvalidIdentifier> {
        Ok(Self {
            owner_field: identifier(owner_field)?.into(),
            policy,
        })
    }

    pub fn scope_for(&self, identity: Option<&Identity>) -> Result<UserScope, AuthError> {
        let identity = identity.ok_or(AuthError::Required)?;

        if self.policy.load().has_global_access(identity) {
            return Ok(UserScope::unrestricted());
        }

        Ok(UserScope {
            filter: format!(" AND {} = ?", self.owner_field),
            params: vec![identity.id],
        })
    }
}

/// Attach a [`UserScope`] to the request extensions.
pub async fn scope_to_user(
    State(rule): State<ScopeRule>,
    mut request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let scope = rule.scope_for(request.extensions().get::<Identity>())?;
    request.extensions_mut().insert(scope);
    Ok(next.run(request).await)
}
