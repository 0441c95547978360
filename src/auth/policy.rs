//! Static role tables compiled from `[authz]` config.
//!
//! Held behind `ArcSwap` so the config watcher can replace it without
//! restarting. Role names are compared case-insensitively.

use std::collections::{HashMap, HashSet};

use serde::Serialize;

use crate::auth::token::Identity;
use crate::config::AuthzConfig;

const WILDCARD: &str = "*";

#[derive(Debug, Clone, PartialEq, Eq)]
enum RoleModules {
    All,
    Only(HashSet<String>),
}

/// What the caller may do inside a module they were admitted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Capabilities {
    pub can_create: bool,
    pub can_edit: bool,
    pub can_delete: bool,
    pub read_only: bool,
}

impl Capabilities {
    pub fn full() -> Self {
        Self {
            can_create: true,
            can_edit: true,
            can_delete: true,
            read_only: false,
        }
    }

    pub fn read_only() -> Self {
        Self {
            can_create: false,
            can_edit: false,
            can_delete: false,
            read_only: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AuthzPolicy {
    admin_roles: HashSet<String>,
    global_access_roles: HashSet<String>,
    read_only_roles: HashSet<String>,
    role_modules: HashMap<String, RoleModules>,
}

fn lowercase_set(values: &[String]) -> HashSet<String> {
    values.iter().map(|v| v.trim().to_lowercase()).collect()
}

impl AuthzPolicy {
    pub fn from_config(config: &AuthzConfig) -> Self {
        let role_modules = config
            .role_modules
            .iter()
            .map(|(role, modules)| {
                let entry = if modules.iter().any(|m| m == WILDCARD) {
                    RoleModules::All
                } else {
                    RoleModules::Only(lowercase_set(modules))
                };
                (role.trim().to_lowercase(), entry)
            })
            .collect();

        Self {
            admin_roles: lowercase_set(&config.admin_roles),
            global_access_roles: lowercase_set(&config.global_access_roles),
            read_only_roles: lowercase_set(&config.read_only_roles),
            role_modules,
        }
    }

    /// Admin role or the normalized `is_admin` flag.
    pub fn is_admin(&self, identity: &Identity) -> bool {
        identity.is_admin || self.admin_roles.contains(&identity.role)
    }

    /// Admins and roles that bypass ownership and scoping.
    pub fn has_global_access(&self, identity: &Identity) -> bool {
        self.is_admin(identity) || self.global_access_roles.contains(&identity.role)
    }

    pub fn is_read_only(&self, identity: &Identity) -> bool {
        !self.is_admin(identity) && self.read_only_roles.contains(&identity.role)
    }

    /// Static-table verdict for `role` on `module`.
    pub fn role_allows(&self, role: &str, module: &str) -> bool {
        match self.role_modules.get(role) {
            Some(RoleModules::All) => true,
            Some(RoleModules::Only(modules)) => modules.contains(module),
            None => false,
        }
    }

    pub fn capabilities(&self, identity: &Identity) -> Capabilities {
        if self.is_read_only(identity) {
            Capabilities::read_only()
        } else {
            Capabilities::full()
        }
    }
}

impl Default for AuthzPolicy {
    fn default() -> Self {
        Self::from_config(&AuthzConfig::default())
    }
}
