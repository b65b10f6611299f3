// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Connection Pool Manager
 * Named pools, a default pool and aggregate stats. Single writer, many
 * readers; callbacks run outside the registry lock.
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary
 */

use parking_lot::RwLock;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tracing::info;

use crate::broker::pool::{AmqpConnection, AmqpPool, ConnectionPoolStats, PooledHandle};
use crate::errors::{AsmError, AsmResult, PoolError};

#[derive(Default)]
pub struct PoolManager {
    pools: RwLock<HashMap<String, Arc<AmqpPool>>>,
    default_pool: RwLock<Option<String>>,
}

impl PoolManager {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn register_pool(&self, name: &str, pool: Arc<AmqpPool>) {
        self.pools.write().insert(name.to_string(), pool);
        info!(pool = name, "registered connection pool");
    }

    pub fn set_default(&self, name: &str) -> Result<(), PoolError> {
        if !self.pools.read().contains_key(name) {
            return Err(PoolError::NotFound {
                pool: name.to_string(),
            });
        }
        *self.default_pool.write() = Some(name.to_string());
        Ok(())
    }

    pub fn get_pool(&self, name: &str) -> Result<Arc<AmqpPool>, PoolError> {
        self.pools
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| PoolError::NotFound {
                pool: name.to_string(),
            })
    }

    pub fn list_pools(&self) -> Vec<String> {
        self.pools.read().keys().cloned().collect()
    }

    pub async fn get_connection(&self, name: &str) -> Result<PooledHandle<AmqpConnection>, PoolError> {
        let pool = self.get_pool(name)?;
        pool.get_connection().await
    }

    pub fn return_connection(
        &self,
        name: &str,
        handle: PooledHandle<AmqpConnection>,
    ) -> Result<(), PoolError> {
        let pool = self.get_pool(name)?;
        pool.return_connection(handle);
        Ok(())
    }

    pub fn get_pool_stats(&self, name: &str) -> Result<ConnectionPoolStats, PoolError> {
        Ok(self.get_pool(name)?.stats())
    }

    pub fn get_all_pool_stats(&self) -> HashMap<String, ConnectionPoolStats> {
        self.pools
            .read()
            .iter()
            .map(|(name, pool)| (name.clone(), pool.stats()))
            .collect()
    }

    pub async fn health_check_all_pools(&self) {
        let pools: Vec<Arc<AmqpPool>> = self.pools.read().values().cloned().collect();
        for pool in pools {
            pool.health_check().await;
        }
    }

    pub async fn close_pool(&self, name: &str) -> Result<(), PoolError> {
        let pool = {
            let mut pools = self.pools.write();
            pools.remove(name).ok_or_else(|| PoolError::NotFound {
                pool: name.to_string(),
            })?
        };
        {
            let mut default = self.default_pool.write();
            if default.as_deref() == Some(name) {
                *default = None;
            }
        }
        pool.close().await;
        Ok(())
    }

    pub async fn close_all(&self) {
        let names = self.list_pools();
        for name in names {
            let _ = self.close_pool(&name).await;
        }
    }

    fn default_pool_name(&self) -> Result<String, PoolError> {
        self.default_pool.read().clone().ok_or(PoolError::NoDefault)
    }

    pub async fn get_default_connection(&self) -> Result<PooledHandle<AmqpConnection>, PoolError> {
        let name = self.default_pool_name()?;
        self.get_connection(&name).await
    }

    /// Borrow from the default pool, run the callback outside the
    /// registry lock, and return the connection whether or not the
    /// callback succeeded.
    pub async fn with_pooled_connection<F, Fut, T>(&self, f: F) -> AsmResult<T>
    where
        F: FnOnce(PooledHandle<AmqpConnection>) -> Fut,
        Fut: Future<Output = AsmResult<T>>,
    {
        let name = self.default_pool_name().map_err(AsmError::from)?;
        let pool = self.get_pool(&name).map_err(AsmError::from)?;
        let handle = pool.get_connection().await.map_err(AsmError::from)?;
        let out = f(handle.clone()).await;
        pool.return_connection(handle);
        out
    }
}
