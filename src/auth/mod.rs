//! Authorization gateway subsystem.
//!
//! # Data Flow
//! ```text
//! request
//!     → authenticate.rs (token → Identity, PermissionResolver → UserPermissions)
//!         → cache.rs (TTL cache, miss → GrantStore)
//!     → authorize.rs (module + action against RBAC or the static policy)
//!     → ownership.rs (row owner must match caller, unless global access)
//!     → scope.rs (SQL filter for list endpoints)
//!     → handler
//! ```
//!
//! # Wiring
//! Layers run outermost-first, so `authenticate` is added last:
//! ```ignore
//! Router::new()
//!     .route("/api/pedidos/{id}", get(show))
//!     .route_layer(from_fn_with_state(auth.ownership(rule), check_ownership))
//!     .route_layer(from_fn_with_state(auth.gate("vendas", Action::View), authorize_module))
//!     .route_layer(from_fn_with_state(auth.clone(), authenticate))
//! ```
//!
//! # Design Decisions
//! - Fail closed: unknown roles, lookup errors and missing identities deny
//! - Permission loading never fails a request; it degrades to the role claim
//! - Denials are logged; IDOR attempts go to the `audit` target

pub mod authenticate;
pub mod authorize;
pub mod cache;
pub mod error;
pub mod ownership;
pub mod permissions;
pub mod policy;
pub mod scope;
pub mod token;

pub use authenticate::{authenticate, AuthState};
pub use authorize::{authorize_module, ModuleGate};
pub use cache::{CacheStats, PermissionCache};
pub use error::AuthError;
pub use ownership::{check_ownership, OwnershipCheck, OwnershipRule};
pub use permissions::{Action, GrantSource, PermissionResolver, UserPermissions};
pub use policy::{AuthzPolicy, Capabilities};
pub use scope::{scope_to_user, ScopeRule, UserScope};
pub use token::{Identity, JwtKeys};
