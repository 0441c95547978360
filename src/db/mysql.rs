//! MySQL-backed stores.
//!
//! Every statement runs through a [`StatementGuard`]: circuit breaker, query
//! timeout, and a duration recorded in the metrics registry under an operation name.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::mysql::{MySql, MySqlPool, MySqlPoolOptions};
use sqlx::pool::PoolConnection;

use crate::config::DatabaseConfig;
use crate::db::{
    is_valid_identifier, DbProbe, GrantStore, ModuleGrant, OwnerLookup, OwnerStore, PoolStats,
    ResourceOwner, StatementGuard, StoreError,
};
use crate::observability::metrics::MetricsRegistry;
use crate::resilience::circuit_breaker::CircuitBreaker;
use crate::resilience::timeouts::QueryTimeout;

const RBAC_GRANTS_SQL: &str = "\
    SELECT DISTINCT m.codigo, p.acao \
    FROM usuario_roles ur \
    JOIN role_permissoes rp ON ur.role_id = rp.role_id \
    JOIN permissoes p ON rp.permissao_id = p.id \
    JOIN modulos m ON p.modulo_id = m.id \
    WHERE ur.usuario_id = ? AND ur.ativo = 1";

const PING_SQL: &str = "SELECT 1";

pub struct MySqlStore {
    pool: MySqlPool,
    guard: StatementGuard,
    acquiring: Arc<AtomicU32>,
}

/// Decrements the in-flight acquire counter even if the acquire future is dropped.
struct AcquireGuard(Arc<AtomicU32>);

impl AcquireGuard {
    fn new(counter: &Arc<AtomicU32>) -> Self {
        counter.fetch_add(1, Ordering::Relaxed);
        Self(counter.clone())
    }
}

impl Drop for AcquireGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

impl MySqlStore {
    /// Build the pool without connecting. An unreachable database does not
    /// abort startup; the first statements fail and trip the breaker instead.
    pub fn connect_lazy(
        url: &str,
        config: &DatabaseConfig,
        breaker: Arc<CircuitBreaker>,
        metrics: Arc<MetricsRegistry>,
    ) -> Result<Self, StoreError> {
        let pool = MySqlPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
            .connect_lazy(url)?;

        tracing::info!(
            max_connections = config.max_connections,
            query_timeout_ms = config.query_timeout_ms,
            "MySQL pool configured"
        );

        Ok(Self {
            pool,
            guard: StatementGuard::new(
                breaker,
                QueryTimeout::from_millis(config.query_timeout_ms),
                metrics,
            ),
            acquiring: Arc::new(AtomicU32::new(0)),
        })
    }

    pub fn pool(&self) -> &MySqlPool {
        &self.pool
    }

    async fn acquire(&self) -> Result<PoolConnection<MySql>, sqlx::Error> {
        let _guard = AcquireGuard::new(&self.acquiring);
        self.pool.acquire().await
    }
}

#[async_trait]
impl GrantStore for MySqlStore {
    async fn module_grants(&self, user_id: i64) -> Result<Vec<ModuleGrant>, StoreError> {
        let rows = self
            .guard
            .run("rbac_grants", RBAC_GRANTS_SQL, || async move {
                let mut conn = self.acquire().await?;
                sqlx::query_as::<_, (String, String)>(RBAC_GRANTS_SQL)
                    .bind(user_id)
                    .fetch_all(&mut *conn)
                    .await
            })
            .await?;

        Ok(rows
            .into_iter()
            .map(|(module, action)| ModuleGrant { module, action })
            .collect())
    }
}

#[async_trait]
impl OwnerStore for MySqlStore {
    async fn resource_owner(
        &self,
        lookup: OwnerLookup<'_>,
    ) -> Result<Option<ResourceOwner>, StoreError> {
        for name in [lookup.table, lookup.owner_field, lookup.id_field] {
            if !is_valid_identifier(name) {
                return Err(StoreError::InvalidIdentifier(name.to_string()));
            }
        }

        let sql = format!(
            "SELECT CAST(`{}` AS CHAR) FROM `{}` WHERE `{}` = ? LIMIT 1",
            lookup.owner_field, lookup.table, lookup.id_field
        );
        let statement = sql.as_str();
        let id = lookup.id;

        let row = self
            .guard
            .run("ownership_lookup", statement, || async move {
                let mut conn = self.acquire().await?;
                sqlx::query_scalar::<_, Option<String>>(statement)
                    .bind(id)
                    .fetch_optional(&mut *conn)
                    .await
            })
            .await?;

        Ok(row.map(ResourceOwner))
    }
}

#[async_trait]
impl DbProbe for MySqlStore {
    async fn ping(&self) -> Result<(), StoreError> {
        self.guard.run("ping", PING_SQL, || async move {
            let mut conn = self.acquire().await?;
            sqlx::query(PING_SQL).execute(&mut *conn).await.map(|_| ())
        })
        .await
    }

    fn pool_stats(&self) -> PoolStats {
        let total = self.pool.size();
        let free = self.pool.num_idle() as u32;
        let acquiring = self.acquiring.load(Ordering::Relaxed);
        PoolStats {
            total,
            free,
            // sqlx does not expose its wait queue; callers blocked in acquire
            // while nothing is idle are the queue.
            queued: if free == 0 { acquiring } else { 0 },
            acquiring,
        }
    }
}
