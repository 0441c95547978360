//! Permission model and resolution.
//!
//! A caller's permissions come from one of two places:
//! - RBAC grants stored in the database (`Rbac`), authoritative when present
//! - the static role table applied to the token's role claim (`RoleClaim`)
//!
//! Resolution never fails a request. Store errors and empty results fall back
//! to role-claim mode. Successful lookups are cached, and so is a missing RBAC
//! schema, which will not appear between two requests.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::auth::cache::PermissionCache;
use crate::db::{GrantStore, ModuleGrant, StoreError};

/// Module operation being authorized. Wire codes are the RBAC table values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Action {
    #[default]
    #[serde(rename = "visualizar")]
    View,
    #[serde(rename = "criar")]
    Create,
    #[serde(rename = "editar")]
    Edit,
    #[serde(rename = "excluir")]
    Delete,
    #[serde(rename = "aprovar")]
    Approve,
}

impl Action {
    pub fn code(&self) -> &'static str {
        match self {
            Action::View => "visualizar",
            Action::Create => "criar",
            Action::Edit => "editar",
            Action::Delete => "excluir",
            Action::Approve => "aprovar",
        }
    }

    /// True for actions a read-only role may not perform.
    pub fn is_mutation(&self) -> bool {
        !matches!(self, Action::View)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown action: {0}")]
pub struct UnknownAction(pub String);

impl FromStr for Action {
    type Err = UnknownAction;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "visualizar" | "view" | "read" | "ver" => Ok(Action::View),
            "criar" | "create" => Ok(Action::Create),
            "editar" | "edit" | "update" => Ok(Action::Edit),
            "excluir" | "delete" | "remove" => Ok(Action::Delete),
            "aprovar" | "approve" => Ok(Action::Approve),
            other => Err(UnknownAction(other.to_string())),
        }
    }
}

/// Where a caller's permissions came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantSource {
    Rbac,
    RoleClaim,
}

/// Resolved permissions of one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserPermissions {
    pub source: GrantSource,
    /// module -> allowed action codes. `None` in role-claim mode.
    pub modules: Option<HashMap<String, HashSet<String>>>,
}

impl UserPermissions {
    pub fn role_claim() -> Self {
        Self {
            source: GrantSource::RoleClaim,
            modules: None,
        }
    }

    /// Group grants by module. Action aliases are stored under their wire code.
    pub fn from_grants(grants: Vec<ModuleGrant>) -> Self {
        let mut modules: HashMap<String, HashSet<String>> = HashMap::new();
        for grant in grants {
            let action = match grant.action.parse::<Action>() {
                Ok(action) => action.code().to_string(),
                Err(_) => grant.action.trim().to_lowercase(),
            };
            modules
                .entry(grant.module.trim().to_lowercase())
                .or_default()
                .insert(action);
        }

        Self {
            source: GrantSource::Rbac,
            modules: Some(modules),
        }
    }

    /// RBAC verdict for `module`/`action`; `None` when not in RBAC mode.
    pub fn rbac_allows(&self, module: &str, action: Action) -> Option<bool> {
        let modules = self.modules.as_ref()?;
        let allowed = modules
            .get(module)
            .map(|actions| actions.contains(action.code()) || actions.contains("*"))
            .unwrap_or(false);
        Some(allowed)
    }
}

/// Cache-backed permission loader.
pub struct PermissionResolver {
    store: Option<Arc<dyn GrantStore>>,
    cache: Arc<PermissionCache>,
}

impl PermissionResolver {
    pub fn new(store: Option<Arc<dyn GrantStore>>, cache: Arc<PermissionCache>) -> Self {
        Self { store, cache }
    }

    pub fn cache(&self) -> &Arc<PermissionCache> {
        &self.cache
    }

    pub async fn resolve(&self, user_id: i64) -> Arc<UserPermissions> {
        if let Some(cached) = self.cache.get(user_id) {
            return cached;
        }

        let Some(store) = &self.store else {
            return Arc::new(UserPermissions::role_claim());
        };

        match store.module_grants(user_id).await {
            Ok(grants) => {
                let permissions = if grants.is_empty() {
                    UserPermissions::role_claim()
                } else {
                    UserPermissions::from_grants(grants)
                };
                tracing::debug!(
                    user_id,
                    source = ?permissions.source,
                    "Permissions loaded"
                );
                self.cache.insert(user_id, permissions)
            }
            Err(StoreError::SchemaMissing(e)) => {
                tracing::debug!(user_id, error = %e, "RBAC schema not installed, using role claim");
                self.cache.insert(user_id, UserPermissions::role_claim())
            }
            Err(e) => {
                tracing::warn!(
                    user_id,
                    error = %e,
                    "RBAC lookup failed, falling back to role claim"
                );
                Arc::new(UserPermissions::role_claim())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    enum Reply {
        Grants(Vec<ModuleGrant>),
        Fail,
        NoSchema,
    }

    struct FakeGrants {
        reply: Reply,
        calls: AtomicU32,
    }

    #[async_trait]
    impl GrantStore for FakeGrants {
        async fn module_grants(&self, _user_id: i64) -> Result<Vec<ModuleGrant>, StoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.reply {
                Reply::Grants(g) => Ok(g.clone()),
                Reply::Fail => Err(StoreError::Timeout("query timed out after 15000ms".into())),
                Reply::NoSchema => Err(StoreError::SchemaMissing(
                    "Table 'erp.usuario_roles' doesn't exist".into(),
                )),
            }
        }
    }

    fn resolver(reply: Reply) -> (PermissionResolver, Arc<FakeGrants>) {
        let store = Arc::new(FakeGrants {
            reply,
            calls: AtomicU32::new(0),
        });
        let cache = Arc::new(PermissionCache::new(Duration::from_secs(300)));
        (PermissionResolver::new(Some(store.clone()), cache), store)
    }

    #[test]
    fn test_action_parsing() {
        assert_eq!("visualizar".parse::<Action>().unwrap(), Action::View);
        assert_eq!("VIEW".parse::<Action>().unwrap(), Action::View);
        assert_eq!("delete".parse::<Action>().unwrap(), Action::Delete);
        assert_eq!(" aprovar ".parse::<Action>().unwrap(), Action::Approve);
        assert!("launch".parse::<Action>().is_err());
        assert_eq!(Action::default(), Action::View);
        assert_eq!(Action::Edit.to_string(), "editar");
    }

    #[test]
    fn test_grants_grouped_by_module() {
        let perms = UserPermissions::from_grants(vec![
            ModuleGrant::new("vendas", "visualizar"),
            ModuleGrant::new("vendas", "create"),
            ModuleGrant::new("Financeiro", "*"),
        ]);

        assert_eq!(perms.source, GrantSource::Rbac);
        assert_eq!(perms.rbac_allows("vendas", Action::View), Some(true));
        assert_eq!(perms.rbac_allows("vendas", Action::Create), Some(true));
        assert_eq!(perms.rbac_allows("vendas", Action::Delete), Some(false));
        assert_eq!(perms.rbac_allows("financeiro", Action::Approve), Some(true));
        assert_eq!(perms.rbac_allows("compras", Action::View), Some(false));
        assert_eq!(UserPermissions::role_claim().rbac_allows("vendas", Action::View), None);
    }

    #[tokio::test]
    async fn test_rbac_result_cached() {
        let (resolver, store) = resolver(Reply::Grants(vec![ModuleGrant::new("vendas", "visualizar")]));

        let first = resolver.resolve(5).await;
        let second = resolver.resolve(5).await;

        assert_eq!(first.source, GrantSource::Rbac);
        assert_eq!(first, second);
        assert_eq!(store.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_empty_result_is_role_claim_and_cached() {
        let (resolver, store) = resolver(Reply::Grants(vec![]));

        assert_eq!(resolver.resolve(5).await.source, GrantSource::RoleClaim);
        assert_eq!(resolver.resolve(5).await.source, GrantSource::RoleClaim);
        assert_eq!(store.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_store_error_is_role_claim_not_cached() {
        let (resolver, store) = resolver(Reply::Fail);

        assert_eq!(resolver.resolve(5).await.source, GrantSource::RoleClaim);
        assert_eq!(resolver.resolve(5).await.source, GrantSource::RoleClaim);
        assert_eq!(store.calls.load(Ordering::SeqCst), 2);
        assert_eq!(resolver.cache().len(), 0);
    }

    #[tokio::test]
    async fn test_missing_schema_is_role_claim_and_cached() {
        let (resolver, store) = resolver(Reply::NoSchema);

        assert_eq!(resolver.resolve(5).await.source, GrantSource::RoleClaim);
        assert_eq!(resolver.resolve(5).await.source, GrantSource::RoleClaim);
        assert_eq!(store.calls.load(Ordering::SeqCst), 1);
        assert_eq!(resolver.cache().len(), 1);
    }

    #[tokio::test]
    async fn test_no_store_is_role_claim() {
        let cache = Arc::new(PermissionCache::new(Duration::from_secs(300)));
        let resolver = PermissionResolver::new(None, cache);
        assert_eq!(resolver.resolve(1).await.source, GrantSource::RoleClaim);
    }
}
