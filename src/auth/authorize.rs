//! Module-level authorization.
//!
//! # Decision order
//! ```text
//! no identity                 → 401 AUTH_REQUIRED
//! admin (role or flag)        → allow, full capabilities
//! RBAC permissions present    → allow iff module grants action or "*", else 403
//! static role table           → allow on wildcard or module membership
//! otherwise                   → 403 AUTHZ_DENIED
//! ```
//! RBAC is authoritative: once a user has grants, the static table is never
//! consulted for them.

use std::sync::Arc;

use arc_swap::ArcSwap;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};

use crate::auth::error::AuthError;
use crate::auth::permissions::{Action, UserPermissions};
use crate::auth::policy::{AuthzPolicy, Capabilities};
use crate::auth::token::Identity;

/// Per-route authorization requirement.
#[derive(Clone)]
pub struct ModuleGate {
    policy: Arc<ArcSwap<AuthzPolicy>>,
    module: Arc<str>,
    action: Action,
}

impl ModuleGate {
    pub fn new(policy: Arc<ArcSwap<AuthzPolicy>>, module: &str, action: Action) -> Self {
        Self {
            policy,
            module: module.trim().to_lowercase().into(),
            action,
        }
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn action(&self) -> Action {
        self.action
    }

    pub fn check(
        &self,
        identity: Option<&Identity>,
        permissions: Option<&UserPermissions>,
    ) -> Result<Capabilities, AuthError> {
        decide(&self.policy.load(), identity, permissions, &self.module, self.action)
    }
}

/// Pure authorization decision.
pub fn decide(
    policy: &AuthzPolicy,
    identity: Option<&Identity>,
    permissions: Option<&UserPermissions>,
    module: &str,
    action: Action,
) -> Result<Capabilities, AuthError> {
    let identity = identity.ok_or(AuthError::Required)?;

    if policy.is_admin(identity) {
        return Ok(Capabilities::full());
    }

    if let Some(allowed) = permissions.and_then(|p| p.rbac_allows(module, action)) {
        return if allowed {
            Ok(Capabilities::full())
        } else {
            Err(AuthError::Denied { module: module.to_string() })
        };
    }

    if policy.role_allows(&identity.role, module) {
        return Ok(policy.capabilities(identity));
    }

    Err(AuthError::Denied { module: module.to_string() })
}

/// Enforce a [`ModuleGate`]. Attaches [`Capabilities`] on success.
pub async fn authorize_module(
    State(gate): State<ModuleGate>,
    mut request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let extensions = request.extensions();
    let identity = extensions.get::<Identity>();
    let permissions = extensions.get::<Arc<UserPermissions>>().map(Arc::as_ref);

    let capabilities = match gate.check(identity, permissions) {
        Ok(capabilities) => capabilities,
        Err(e) => {
            tracing::info!(
                user_id = identity.map(|i| i.id),
                role = identity.map(|i| i.role.as_str()),
                module = gate.module(),
                action = %gate.action(),
                "Module access denied"
            );
            return Err(e);
        }
    };

    request.extensions_mut().insert(capabilities);
    Ok(next.run(request).await)
}
