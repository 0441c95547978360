//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, Response};
use tokio::net::TcpListener;

use erp_gateway::auth::{Identity, JwtKeys};
use erp_gateway::db::{
    DbProbe, GrantStore, ModuleGrant, OwnerLookup, OwnerStore, PoolStats, ResourceOwner,
    StoreError,
};
use erp_gateway::lifecycle::{Services, Stores};
use erp_gateway::{GatewayConfig, HttpServer, Shutdown};

pub const SECRET: &str = "integration-secret-0123456789abcdef";

/// In-memory database standing in for MySQL.
#[derive(Default)]
pub struct FakeDb {
    /// user id -> grants. Users without an entry get an empty result.
    pub grants: Mutex<HashMap<i64, Vec<ModuleGrant>>>,
    /// (table, id) -> owner column value.
    pub owners: Mutex<HashMap<(String, String), Option<String>>>,
    pub fail_grants: Mutex<bool>,
    /// RBAC tables not installed.
    pub no_rbac_schema: Mutex<bool>,
    pub fail_owners: Mutex<bool>,
    pub ping_fails: Mutex<bool>,
    pub grant_calls: AtomicU32,
}

impl FakeDb {
    pub fn grant(&self, user_id: i64, module: &str, action: &str) {
        self.grants
            .lock()
            .unwrap()
            .entry(user_id)
            .or_default()
            .push(ModuleGrant::new(module, action));
    }

    pub fn own(&self, table: &str, id: &str, owner: Option<&str>) {
        self.owners
            .lock()
            .unwrap()
            .insert((table.to_string(), id.to_string()), owner.map(String::from));
    }

    pub fn grant_calls(&self) -> u32 {
        self.grant_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GrantStore for FakeDb {
    async fn module_grants(&self, user_id: i64) -> Result<Vec<ModuleGrant>, StoreError> {
        self.grant_calls.fetch_add(1, Ordering::SeqCst);
        if *self.fail_grants.lock().unwrap() {
            return Err(StoreError::Timeout(
                "query timed out after 15000ms: SELECT DISTINCT m.codigo".into(),
            ));
        }
        if *self.no_rbac_schema.lock().unwrap() {
            return Err(StoreError::SchemaMissing(
                "Table 'erp.usuario_roles' doesn't exist".into(),
            ));
        }
        Ok(self.grants.lock().unwrap().get(&user_id).cloned().unwrap_or_default())
    }
}

#[async_trait]
impl OwnerStore for FakeDb {
    async fn resource_owner(
        &self,
        lookup: OwnerLookup<'_>,
    ) -> Result<Option<ResourceOwner>, StoreError> {
        if *self.fail_owners.lock().unwrap() {
            return Err(StoreError::CircuitOpen(
                "circuit breaker mysql is OPEN: service temporarily unavailable".into(),
            ));
        }
        Ok(self
            .owners
            .lock()
            .unwrap()
            .get(&(lookup.table.to_string(), lookup.id.to_string()))
            .cloned()
            .map(ResourceOwner))
    }
}

#[async_trait]
impl DbProbe for FakeDb {
    async fn ping(&self) -> Result<(), StoreError> {
        if *self.ping_fails.lock().unwrap() {
            Err(StoreError::CircuitOpen("circuit breaker mysql is OPEN".into()))
        } else {
            Ok(())
        }
    }

    fn pool_stats(&self) -> PoolStats {
        PoolStats {
            total: 4,
            free: 3,
            queued: 0,
            acquiring: 0,
        }
    }
}

pub fn config() -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.auth.jwt_secret = Some(SECRET.to_string());
    config
}

pub fn stores(db: &Arc<FakeDb>) -> Stores {
    Stores {
        grants: Some(db.clone()),
        owners: Some(db.clone()),
        probe: Some(db.clone()),
    }
}

pub fn services(config: GatewayConfig, stores: Stores) -> Arc<Services> {
    Arc::new(Services::with_stores(config, stores).unwrap())
}

pub fn user(id: i64, role: &str) -> Identity {
    Identity {
        id,
        email: Some(format!("user{id}@erp.local")),
        name: Some(format!("User {id}")),
        role: role.to_string(),
        sector: None,
        is_admin: false,
    }
}

pub fn token(identity: &Identity) -> String {
    JwtKeys::new(SECRET.as_bytes()).sign(identity, 3600).unwrap()
}

pub fn get(uri: &str, bearer: Option<&str>) -> Request<Body> {
    let mut builder = Request::get(uri);
    if let Some(token) = bearer {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }
    builder.body(Body::empty()).unwrap()
}

pub async fn json_body(response: Response<Body>) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

/// Run the full gateway on `addr` until the returned handle is triggered.
pub async fn spawn_server(services: Arc<Services>, addr: SocketAddr) -> Shutdown {
    let listener = TcpListener::bind(addr).await.unwrap();
    let shutdown = Shutdown::new();
    let server = HttpServer::new(services);
    let signalled = shutdown.signalled();
    tokio::spawn(async move {
        server.serve(listener, signalled).await.unwrap();
    });
    shutdown
}
