//! Process-local permission cache.
//!
//! Entries live for a fixed TTL from insertion. Expired entries are dropped
//! lazily on lookup and in bulk by a periodic sweep. The cache is never
//! persisted; a restart starts cold.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::auth::permissions::UserPermissions;

#[derive(Debug)]
struct CacheEntry {
    permissions: Arc<UserPermissions>,
    inserted_at: Instant,
}

/// Counters exposed through health, metrics and the admin API.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub ttl_secs: u64,
}

impl CacheStats {
    /// Hits over lookups, 0 when nothing was looked up yet.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Debug)]
pub struct PermissionCache {
    entries: DashMap<i64, CacheEntry>,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl PermissionCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Live entry for `user_id`, if any. Counts a hit or a miss.
    pub fn get(&self, user_id: i64) -> Option<Arc<UserPermissions>> {
        let now = Instant::now();

        if let Some(entry) = self.entries.get(&user_id) {
            if now.duration_since(entry.inserted_at) < self.ttl {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Some(entry.permissions.clone());
            }
        }

        self.entries
            .remove_if(&user_id, |_, entry| now.duration_since(entry.inserted_at) >= self.ttl);
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Store `permissions`, replacing any previous entry.
    pub fn insert(&self, user_id: i64, permissions: UserPermissions) -> Arc<UserPermissions> {
        let permissions = Arc::new(permissions);
        self.entries.insert(
            user_id,
            CacheEntry {
                permissions: permissions.clone(),
                inserted_at: Instant::now(),
            },
        );
        permissions
    }

    /// Drop one user's entry. Returns whether an entry existed.
    pub fn invalidate(&self, user_id: i64) -> bool {
        let removed = self.entries.remove(&user_id).is_some();
        tracing::info!(user_id, removed, "Permission cache invalidated for user");
        removed
    }

    /// Drop every entry. Returns how many were removed.
    pub fn invalidate_all(&self) -> usize {
        let count = self.entries.len();
        self.entries.clear();
        tracing::info!(count, "Permission cache flushed");
        count
    }

    /// Remove entries older than the TTL. Returns how many were evicted.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| now.duration_since(entry.inserted_at) < self.ttl);
        before.saturating_sub(self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            ttl_secs: self.ttl.as_secs(),
        }
    }

    /// Run [`sweep_expired`](Self::sweep_expired) every `interval` until shutdown.
    pub fn spawn_sweeper(
        self: Arc<Self>,
        interval: Duration,
        mut shutdown: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // First tick completes immediately.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let evicted = self.sweep_expired();
                        if evicted > 0 {
                            tracing::debug!(evicted, remaining = self.len(), "Permission cache swept");
                        }
                    }
                    _ = shutdown.recv() => {
                        tracing::debug!("Permission cache sweeper stopping");
                        break;
                    }
                }
            }
        })
    }
}
