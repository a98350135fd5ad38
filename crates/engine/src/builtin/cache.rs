//! In-memory cache budget and process-wide shared cache pools.

use std::collections::HashMap;

use dashmap::DashMap;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use strata_core::{StrataError, StrataResult};
use tracing::{debug, info};
use uuid::Uuid;

use crate::connection::ConnectionConfig;
use crate::session::Session;
use crate::subsystem::Cache;

/// Members of one named pool: connection id to contributed bytes.
#[derive(Debug, Default)]
struct SharedCachePool {
    members: Mutex<HashMap<Uuid, u64>>,
}

/// Named cache pools shared by connections in this process.
static SHARED_POOLS: Lazy<DashMap<String, SharedCachePool>> = Lazy::new(DashMap::new);

/// Connections currently in the pool `name`.
pub fn shared_pool_members(name: &str) -> usize {
    SHARED_POOLS
        .get(name)
        .map_or(0, |pool| pool.members.lock().len())
}

/// Bytes contributed to the pool `name`.
pub fn shared_pool_bytes(name: &str) -> u64 {
    SHARED_POOLS
        .get(name)
        .map_or(0, |pool| pool.members.lock().values().sum())
}

/// The built-in [`Cache`]: a byte budget, optionally pooled.
#[derive(Debug, Default)]
pub struct MemoryCache {
    budget: u64,
    created: bool,
    pool: Option<(String, Uuid)>,
}

impl MemoryCache {
    /// An uncreated cache.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Cache for MemoryCache {
    fn create(&mut self, session: &Session, config: &ConnectionConfig) -> StrataResult<()> {
        self.budget = config.cache_size_bytes();
        if let Some(name) = &config.shared_cache {
            let id = session.connection().id();
            // The shard lock is held while inserting so a concurrent leave
            // cannot drop the pool out from under us.
            let pool = SHARED_POOLS.entry(name.clone()).or_default();
            pool.members.lock().insert(id, self.budget);
            drop(pool);
            info!(target: "strata::conn", pool = %name, bytes = self.budget, "Joined shared cache pool");
            self.pool = Some((name.clone(), id));
        }
        self.created = true;
        debug!(target: "strata::conn", bytes = self.budget, "Cache created");
        Ok(())
    }

    fn disconnect_shared_pool(&mut self, _session: &Session) -> StrataResult<()> {
        let Some((name, id)) = self.pool.take() else {
            return Ok(());
        };
        if let Some(pool) = SHARED_POOLS.get(&name) {
            pool.members.lock().remove(&id);
        }
        SHARED_POOLS.remove_if(&name, |_, pool| pool.members.lock().is_empty());
        info!(target: "strata::conn", pool = %name, "Left shared cache pool");
        Ok(())
    }

    fn destroy(&mut self, _session: &Session) -> StrataResult<()> {
        if let Some((name, _)) = &self.pool {
            return Err(StrataError::subsystem(
                "cache",
                format!("destroyed while still a member of shared pool '{}'", name),
            ));
        }
        if self.created {
            debug!(target: "strata::conn", bytes = self.budget, "Cache destroyed");
        }
        self.created = false;
        self.budget = 0;
        Ok(())
    }
}
