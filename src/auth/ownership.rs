//! Ownership checks against insecure direct object references.
//!
//! A rule names the table, the owner column and the path parameter carrying
//! the resource id. Callers with global access skip the check; everybody else
//! must own the row. Lookup failures deny.

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use axum::{
    extract::{rejection::PathRejection, Path, Request, State},
    middleware::Next,
    response::Response,
};

use crate::auth::error::AuthError;
use crate::auth::policy::AuthzPolicy;
use crate::auth::token::Identity;
use crate::db::{is_valid_identifier, OwnerLookup, OwnerStore, ResourceOwner};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid SQL identifier: {0:?}")]
pub struct InvalidIdentifier(pub String);

pub(crate) fn identifier(name: &str) -> Result<String, InvalidIdentifier> {
    if is_valid_identifier(name) {
        Ok(name.to_string())
    } else {
        Err(InvalidIdentifier(name.to_string()))
    }
}

/// Where a resource's owner is stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnershipRule {
    table: String,
    owner_field: String,
    param: String,
    id_field: String,
}

impl OwnershipRule {
    /// Rule for `table.owner_field`, keyed by path parameter `param` matched
    /// against the `id` column.
    pub fn new(table: &str, owner_field: &str, param: &str) -> Result<Self, InvalidIdentifier> {
        Ok(Self {
            table: identifier(table)?,
            owner_field: identifier(owner_field)?,
            param: param.to_string(),
            id_field: "id".to_string(),
        })
    }

    /// Match the parameter against another primary-key column.
    pub fn with_id_field(mut self, id_field: &str) -> Result<Self, InvalidIdentifier> {
        self.id_field = identifier(id_field)?;
        Ok(self)
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn param(&self) -> &str {
        &self.param
    }
}

/// Middleware state for one ownership rule.
#[derive(Clone)]
pub struct OwnershipCheck {
    rule: Arc<OwnershipRule>,
    owners: Option<Arc<dyn OwnerStore>>,
    policy: Arc<ArcSwap<AuthzPolicy>>,
}

impl OwnershipCheck {
    pub fn new(
        rule: OwnershipRule,
        owners: Option<Arc<dyn OwnerStore>>,
        policy: Arc<ArcSwap<AuthzPolicy>>,
    ) -> Self {
        Self {
            rule: Arc::new(rule),
            owners,
            policy,
        }
    }

    /// Decide whether `identity` may touch the resource named by `params`.
    pub async fn verify(
        &self,
        identity: Option<&Identity>,
        params: &HashMap<String, String>,
    ) -> Result<(), AuthError> {
        let identity = identity.ok_or(AuthError::Required)?;

        if self.policy.load().has_global_access(identity) {
            return Ok(());
        }

        // No id in the path: a list endpoint, scoped separately.
        let Some(resource_id) = params.get(&self.rule.param) else {
            return Ok(());
        };

        let Some(owners) = &self.owners else {
            tracing::error!(table = %self.rule.table, "Ownership check without a database");
            return Err(AuthError::OwnershipCheckFailed);
        };

        let lookup = OwnerLookup {
            table: &self.rule.table,
            owner_field: &self.rule.owner_field,
            id_field: &self.rule.id_field,
            id: resource_id,
        };

        match owners.resource_owner(lookup).await {
            Ok(None) => Err(AuthError::NotFound),
            Ok(Some(ResourceOwner(owner))) => {
                let caller = identity.id.to_string();
                if owner.as_deref().map(str::trim) == Some(caller.as_str()) {
                    Ok(())
                } else {
                    tracing::warn!(
                        target: "audit",
                        user_id = identity.id,
                        role = %identity.role,
                        table = %self.rule.table,
                        resource_id = %resource_id,
                        owner = owner.as_deref().unwrap_or("NULL"),
                        "IDOR attempt blocked"
                    );
                    Err(AuthError::IdorDenied)
                }
            }
            Err(e) => {
                tracing::error!(
                    table = %self.rule.table,
                    resource_id = %resource_id,
                    error = %e,
                    "Ownership lookup failed"
                );
                Err(AuthError::OwnershipCheckFailed)
            }
        }
    }
}

/// Enforce an [`OwnershipCheck`] on routes with a resource id parameter.
pub async fn check_ownership(
    State(check): State<OwnershipCheck>,
    params: Result<Path<HashMap<String, String>>, PathRejection>,
    request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let params = params.map(|Path(p)| p).unwrap_or_default();
    let identity = request.extensions().get::<Identity>().cloned();
    check.verify(identity.as_ref(), &params).await?;
    Ok(next.run(request).await)
}
