//! Token authentication middleware.

use std::sync::Arc;

use arc_swap::ArcSwap;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};

use crate::auth::authorize::ModuleGate;
use crate::auth::error::AuthError;
use crate::auth::ownership::{InvalidIdentifier, OwnershipCheck, OwnershipRule};
use crate::auth::permissions::{Action, PermissionResolver, UserPermissions};
use crate::auth::policy::AuthzPolicy;
use crate::auth::scope::ScopeRule;
use crate::auth::token::{extract_token, Identity, JwtKeys};
use crate::db::OwnerStore;

/// Shared state of the authorization steps.
///
/// Cloned into every middleware instance; all fields are reference counted.
#[derive(Clone)]
pub struct AuthState {
    keys: Arc<JwtKeys>,
    resolver: Arc<PermissionResolver>,
    policy: Arc<ArcSwap<AuthzPolicy>>,
    owners: Option<Arc<dyn OwnerStore>>,
    cookie_names: Arc<[String]>,
}

impl AuthState {
    pub fn new(
        keys: Arc<JwtKeys>,
        resolver: Arc<PermissionResolver>,
        policy: Arc<ArcSwap<AuthzPolicy>>,
        owners: Option<Arc<dyn OwnerStore>>,
        cookie_names: Vec<String>,
    ) -> Self {
        Self {
            keys,
            resolver,
            policy,
            owners,
            cookie_names: cookie_names.into(),
        }
    }

    pub fn keys(&self) -> &JwtKeys {
        &self.keys
    }

    pub fn resolver(&self) -> &PermissionResolver {
        &self.resolver
    }

    pub fn policy(&self) -> &Arc<ArcSwap<AuthzPolicy>> {
        &self.policy
    }

    /// State for [`authorize_module`](crate::auth::authorize::authorize_module).
    pub fn gate(&self, module: &str, action: Action) -> ModuleGate {
        ModuleGate::new(self.policy.clone(), module, action)
    }

    /// State for [`check_ownership`](crate::auth::ownership::check_ownership).
    pub fn ownership(&self, rule: OwnershipRule) -> OwnershipCheck {
        OwnershipCheck::new(rule, self.owners.clone(), self.policy.clone())
    }

    /// State for [`scope_to_user`](crate::auth::scope::scope_to_user).
    pub fn scope(&self, owner_field: &str) -> Result<ScopeRule, InvalidIdentifier> {
        ScopeRule::new(owner_field, self.policy.clone())
    }

    /// Verify the request's token and load the caller's permissions.
    pub async fn identify(
        &self,
        headers: &axum::http::HeaderMap,
    ) -> Result<(Identity, Arc<UserPermissions>), AuthError> {
        let token = extract_token(headers, &self.cookie_names).ok_or(AuthError::Missing)?;
        let identity = self.keys.verify(&token)?;
        let permissions = self.resolver.resolve(identity.id).await;
        Ok((identity, permissions))
    }
}

/// Reject requests without a valid token; attach [`Identity`] and
/// `Arc<UserPermissions>` to the request extensions otherwise.
pub async fn authenticate(
    State(auth): State<AuthState>,
    request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let (mut parts, body) = request.into_parts();

    let (identity, permissions) = match auth.identify(&parts.headers).await {
        Ok(found) => found,
        Err(e) => {
            tracing::debug!(
                path = %parts.uri.path(),
                code = e.code(),
                "Authentication rejected"
            );
            return Err(e);
        }
    };

    tracing::debug!(
        user_id = identity.id,
        role = %identity.role,
        source = ?permissions.source,
        "Request authenticated"
    );

    parts.extensions.insert(identity);
    parts.extensions.insert(permissions);
    Ok(next.run(Request::from_parts(parts, body)).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use axum::http::{header, HeaderMap, HeaderValue};

    use crate::auth::cache::PermissionCache;
    use crate::auth::permissions::GrantSource;

    const SECRET: &[u8] = b"authenticate-test-secret-0123456789";

    fn state() -> AuthState {
        let cache = Arc::new(PermissionCache::new(Duration::from_secs(300)));
        AuthState::new(
            Arc::new(JwtKeys::new(SECRET)),
            Arc::new(PermissionResolver::new(None, cache)),
            Arc::new(ArcSwap::from_pointee(AuthzPolicy::default())),
            None,
            vec!["authToken".to_string()],
        )
    }

    fn bearer(token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {token}")).unwrap(),
        );
        headers
    }

    #[tokio::test]
    async fn test_identify_without_token() {
        let result = state().identify(&HeaderMap::new()).await;
        assert_eq!(result.unwrap_err(), AuthError::Missing);
    }

    #[tokio::test]
    async fn test_identify_role_claim_mode() {
        let auth = state();
        let identity = Identity {
            id: 41,
            email: None,
            name: None,
            role: "financeiro".to_string(),
            sector: None,
            is_admin: false,
        };
        let token = auth.keys().sign(&identity, 600).unwrap();

        let (found, permissions) = auth.identify(&bearer(&token)).await.unwrap();
        assert_eq!(found, identity);
        assert_eq!(permissions.source, GrantSource::RoleClaim);
        // Nothing to cache without a grant store.
        assert!(auth.resolver().cache().is_empty());
    }

    #[tokio::test]
    async fn test_identify_rejects_garbage() {
        let result = state().identify(&bearer("not.a.jwt")).await;
        assert_eq!(result.unwrap_err(), AuthError::Invalid);
    }
}
