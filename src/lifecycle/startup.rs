//! Startup orchestration.
//!
//! # Responsibilities
//! - Build every shared service from a validated configuration
//! - Wire the database stores behind the circuit breaker and query timeout
//! - Start background tasks (cache sweeper, pool monitor)
//!
//! # Design Decisions
//! - Fail fast: a missing token secret is fatal
//! - An unreachable database is not fatal; the pool connects lazily
//! - Services are constructed explicitly and shared by `Arc`, no globals

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use tokio::task::JoinHandle;

use crate::auth::token::KeyError;
use crate::auth::{AuthState, AuthzPolicy, JwtKeys, PermissionCache, PermissionResolver};
use crate::config::GatewayConfig;
use crate::db::{DbProbe, GrantStore, MySqlStore, OwnerStore, StoreError};
use crate::lifecycle::Shutdown;
use crate::observability::metrics::MetricsRegistry;
use crate::resilience::circuit_breaker::CircuitBreaker;
use crate::resilience::pool_monitor::PoolMonitor;

/// Name of the breaker guarding the database.
pub const DB_BREAKER: &str = "mysql";

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error(transparent)]
    Keys(#[from] KeyError),
    #[error("database setup failed: {0}")]
    Database(#[from] StoreError),
}

/// Database collaborators. All `None` when no database is configured.
#[derive(Clone, Default)]
pub struct Stores {
    pub grants: Option<Arc<dyn GrantStore>>,
    pub owners: Option<Arc<dyn OwnerStore>>,
    pub probe: Option<Arc<dyn DbProbe>>,
}

impl Stores {
    fn mysql(store: Arc<MySqlStore>) -> Self {
        Self {
            grants: Some(store.clone()),
            owners: Some(store.clone()),
            probe: Some(store),
        }
    }
}

/// Everything the HTTP layer and background tasks share.
pub struct Services {
    pub config: Arc<GatewayConfig>,
    pub policy: Arc<ArcSwap<AuthzPolicy>>,
    pub cache: Arc<PermissionCache>,
    pub metrics: Arc<MetricsRegistry>,
    pub breaker: Arc<CircuitBreaker>,
    pub probe: Option<Arc<dyn DbProbe>>,
    pub auth: AuthState,
}

impl Services {
    /// Build services against MySQL when `database.url` is set.
    pub fn build(config: GatewayConfig) -> Result<Self, StartupError> {
        let metrics = Arc::new(MetricsRegistry::new(
            Duration::from_secs(config.observability.sample_window_secs),
            config.observability.max_samples,
        ));
        let breaker = Arc::new(CircuitBreaker::new(DB_BREAKER, &config.circuit_breaker));

        let stores = match config.database.url.as_deref() {
            Some(url) => {
                let store =
                    MySqlStore::connect_lazy(url, &config.database, breaker.clone(), metrics.clone())?;
                Stores::mysql(Arc::new(store))
            }
            None => {
                tracing::warn!("No database configured, permissions fall back to role claims");
                Stores::default()
            }
        };

        Self::assemble(config, stores, metrics, breaker)
    }

    /// Build services around caller-supplied stores.
    pub fn with_stores(config: GatewayConfig, stores: Stores) -> Result<Self, StartupError> {
        let metrics = Arc::new(MetricsRegistry::new(
            Duration::from_secs(config.observability.sample_window_secs),
            config.observability.max_samples,
        ));
        let breaker = Arc::new(CircuitBreaker::new(DB_BREAKER, &config.circuit_breaker));
        Self::assemble(config, stores, metrics, breaker)
    }

    fn assemble(
        config: GatewayConfig,
        stores: Stores,
        metrics: Arc<MetricsRegistry>,
        breaker: Arc<CircuitBreaker>,
    ) -> Result<Self, StartupError> {
        let keys = Arc::new(JwtKeys::from_config(&config.auth)?);
        let policy = Arc::new(ArcSwap::from_pointee(AuthzPolicy::from_config(&config.authz)));
        let cache = Arc::new(PermissionCache::new(Duration::from_secs(
            config.auth.permission_cache_ttl_secs,
        )));
        let resolver = Arc::new(PermissionResolver::new(stores.grants, cache.clone()));

        let auth = AuthState::new(
            keys,
            resolver,
            policy.clone(),
            stores.owners,
            config.auth.cookie_names.clone(),
        );

        tracing::info!(
            environment = %config.auth.environment,
            database = stores.probe.is_some(),
            cache_ttl_secs = config.auth.permission_cache_ttl_secs,
            "Services initialized"
        );

        Ok(Self {
            config: Arc::new(config),
            policy,
            cache,
            metrics,
            breaker,
            probe: stores.probe,
            auth,
        })
    }

    /// Replace the authorization policy with one built from `config`.
    pub fn reload_policy(&self, config: &GatewayConfig) {
        self.policy.store(Arc::new(AuthzPolicy::from_config(&config.authz)));
        tracing::info!(
            roles = config.authz.role_modules.len(),
            "Authorization policy reloaded"
        );
    }

    /// Start the cache sweeper and, with a database, the pool monitor.
    pub fn spawn_background(&self, shutdown: &Shutdown) -> Vec<JoinHandle<()>> {
        let mut tasks = vec![self.cache.clone().spawn_sweeper(
            Duration::from_secs(self.config.auth.cache_sweep_interval_secs),
            shutdown.subscribe(),
        )];

        if let (Some(probe), true) = (&self.probe, self.config.pool_monitor.enabled) {
            let monitor = PoolMonitor::new(probe.clone(), &self.config.pool_monitor);
            tasks.push(monitor.spawn(shutdown.subscribe()));
        }

        tasks
    }
}
