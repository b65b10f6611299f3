// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - AMQP Connection Pool
 * Bounded pool of broker connections with lifecycle management,
 * periodic health checking and fixed-delay connect retries.
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary
 */

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::{watch, Notify};
use tracing::{debug, error, info, warn};

use crate::errors::{BrokerError, PoolError};

/// A connection the pool can manage. Production connections wrap lapin;
/// tests substitute a fake.
#[async_trait]
pub trait PoolableConnection: Send + Sync + 'static {
    async fn is_alive(&self) -> bool;
    async fn close(&self);
}

/// Factory for pool connections
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Conn: PoolableConnection;

    async fn connect(&self, url: &str) -> Result<Self::Conn, BrokerError>;
}

#[derive(Debug, Clone)]
pub struct ConnectionPoolConfig {
    pub max_connections: usize,
    pub min_connections: usize,
    pub max_idle_time: Duration,
    pub max_lifetime: Duration,
    pub health_check_period: Duration,
    pub connection_timeout: Duration,
    pub retry_attempts: u32,
    /// Fixed delay between connect attempts
    pub retry_delay: Duration,
}

impl Default for ConnectionPoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 2,
            max_idle_time: Duration::from_secs(60 * 60),
            max_lifetime: Duration::from_secs(2 * 60 * 60),
            health_check_period: Duration::from_secs(30 * 60),
            connection_timeout: Duration::from_secs(30),
            retry_attempts: 10,
            retry_delay: Duration::from_secs(2),
        }
    }
}

/// Point-in-time pool counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionPoolStats {
    pub active_connections: usize,
    pub idle_connections: usize,
    pub total_created: u64,
    pub total_destroyed: u64,
    pub total_borrowed: u64,
    pub total_returned: u64,
    pub healthy_connections: usize,
}

struct PoolEntry<C> {
    id: u64,
    conn: Arc<C>,
    in_use: bool,
    created_at: Instant,
    last_used: Instant,
    usage_count: u64,
    healthy: Arc<AtomicBool>,
}

struct PoolInner<C> {
    entries: Vec<PoolEntry<C>>,
    /// Creations in flight, counted so concurrent borrows never
    /// overshoot `max_connections`
    pending: usize,
}

/// Borrowed connection. The caller must hand it back through
/// `return_connection`; a connection marked unhealthy is destroyed on
/// return instead of parked.
pub struct PooledHandle<C> {
    id: u64,
    conn: Arc<C>,
    healthy: Arc<AtomicBool>,
}

impl<C> Clone for PooledHandle<C> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            conn: self.conn.clone(),
            healthy: self.healthy.clone(),
        }
    }
}

impl<C> PooledHandle<C> {
    pub fn connection(&self) -> &C {
        &self.conn
    }

    /// Poison the connection; the next return destroys it
    pub fn mark_unhealthy(&self) {
        self.healthy.store(false, Ordering::Relaxed);
    }
}

#[derive(Default)]
struct PoolCounters {
    created: AtomicU64,
    destroyed: AtomicU64,
    borrowed: AtomicU64,
    returned: AtomicU64,
}

pub struct ConnectionPool<K: Connector> {
    config: ConnectionPoolConfig,
    url: String,
    connector: K,
    inner: Mutex<PoolInner<K::Conn>>,
    returned: Notify,
    counters: PoolCounters,
    closed: AtomicBool,
    next_id: AtomicU64,
    stop_tx: watch::Sender<bool>,
}

impl<K: Connector> std::fmt::Debug for ConnectionPool<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("url", &self.url)
            .field("config", &self.config)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}

impl<K: Connector> ConnectionPool<K> {
    /// Create the pool, synchronously establishing `min_connections`
    /// connections and starting the background health task.
    pub async fn new(
        config: ConnectionPoolConfig,
        url: impl Into<String>,
        connector: K,
    ) -> Result<Arc<Self>, PoolError> {
        let (stop_tx, stop_rx) = watch::channel(false);
        let pool = Arc::new(Self {
            config,
            url: url.into(),
            connector,
            inner: Mutex::new(PoolInner {
                entries: Vec::new(),
                pending: 0,
            }),
            returned: Notify::new(),
            counters: PoolCounters::default(),
            closed: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
            stop_tx,
        });

        for _ in 0..pool.config.min_connections {
            let conn = pool
                .connector
                .connect(&pool.url)
                .await
                .map_err(|e| PoolError::Init {
                    reason: e.to_string(),
                })?;
            pool.park_new(conn, false);
        }

        info!(
            min = pool.config.min_connections,
            max = pool.config.max_connections,
            "connection pool initialized"
        );

        Self::spawn_health_task(Arc::downgrade(&pool), stop_rx);
        Ok(pool)
    }

    fn spawn_health_task(pool: Weak<Self>, mut stop_rx: watch::Receiver<bool>) {
        let period = match pool.upgrade() {
            Some(p) => p.config.health_check_period,
            None => return,
        };
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let Some(pool) = pool.upgrade() else { break };
                        pool.health_check().await;
                    }
                    _ = stop_rx.changed() => break,
                }
            }
            debug!("connection pool health task stopped");
        });
    }

    fn park_new(&self, conn: K::Conn, in_use: bool) -> PooledHandle<K::Conn> {
        let entry = PoolEntry {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            conn: Arc::new(conn),
            in_use,
            created_at: Instant::now(),
            last_used: Instant::now(),
            usage_count: u64::from(in_use),
            healthy: Arc::new(AtomicBool::new(true)),
        };
        let handle = PooledHandle {
            id: entry.id,
            conn: entry.conn.clone(),
            healthy: entry.healthy.clone(),
        };
        self.inner.lock().entries.push(entry);
        self.counters.created.fetch_add(1, Ordering::Relaxed);
        handle
    }

    /// Borrow an unused healthy connection. Creates a new one when the
    /// pool has headroom; otherwise blocks up to `connection_timeout`
    /// for a return.
    pub async fn get_connection(&self) -> Result<PooledHandle<K::Conn>, PoolError> {
        let started = Instant::now();
        let deadline = started + self.config.connection_timeout;

        loop {
            if self.closed.load(Ordering::Relaxed) {
                return Err(PoolError::Closed);
            }

            let mut may_create = false;
            {
                let mut inner = self.inner.lock();
                if let Some(entry) = inner
                    .entries
                    .iter_mut()
                    .find(|e| !e.in_use && e.healthy.load(Ordering::Relaxed))
                {
                    entry.in_use = true;
                    entry.usage_count += 1;
                    entry.last_used = Instant::now();
                    let handle = PooledHandle {
                        id: entry.id,
                        conn: entry.conn.clone(),
                        healthy: entry.healthy.clone(),
                    };
                    self.counters.borrowed.fetch_add(1, Ordering::Relaxed);
                    return Ok(handle);
                }
                if inner.entries.len() + inner.pending < self.config.max_connections {
                    inner.pending += 1;
                    may_create = true;
                }
            }

            if may_create {
                let created = self.create_with_retry(deadline).await;
                self.inner.lock().pending -= 1;
                return match created {
                    Ok(conn) => {
                        let handle = self.park_new(conn, true);
                        self.counters.borrowed.fetch_add(1, Ordering::Relaxed);
                        Ok(handle)
                    }
                    Err(e) => Err(e),
                };
            }

            // At capacity: wait for a return, bounded by the deadline
            let now = Instant::now();
            if now >= deadline {
                return Err(PoolError::Exhausted {
                    waited: started.elapsed(),
                });
            }
            if tokio::time::timeout(deadline - now, self.returned.notified())
                .await
                .is_err()
            {
                return Err(PoolError::Exhausted {
                    waited: started.elapsed(),
                });
            }
        }
    }

    async fn create_with_retry(&self, deadline: Instant) -> Result<K::Conn, PoolError> {
        let max_attempts = self.config.retry_attempts.max(1);
        let mut attempts = 0;
        let mut last_error = String::new();
        while attempts < max_attempts {
            attempts += 1;
            match self.connector.connect(&self.url).await {
                Ok(conn) => return Ok(conn),
                Err(e) => {
                    warn!(attempt = attempts, error = %e, "broker connect attempt failed");
                    last_error = e.to_string();
                }
            }
            if attempts < max_attempts && Instant::now() + self.config.retry_delay < deadline {
                tokio::time::sleep(self.config.retry_delay).await;
            } else {
                break;
            }
        }
        Err(PoolError::Connect {
            attempts,
            reason: last_error,
        })
    }

    /// Hand a borrowed connection back. Unhealthy and over-lifetime
    /// connections are destroyed instead of parked; so are idle-expired
    /// ones while the pool is above `min_connections`.
    pub fn return_connection(&self, handle: PooledHandle<K::Conn>) {
        let mut destroyed = None;
        {
            let mut inner = self.inner.lock();
            let len = inner.entries.len();
            if let Some(pos) = inner.entries.iter().position(|e| e.id == handle.id) {
                self.counters.returned.fetch_add(1, Ordering::Relaxed);
                let destroy = {
                    let entry = &inner.entries[pos];
                    !entry.healthy.load(Ordering::Relaxed)
                        || entry.created_at.elapsed() > self.config.max_lifetime
                        || (entry.last_used.elapsed() > self.config.max_idle_time
                            && len > self.config.min_connections)
                        || self.closed.load(Ordering::Relaxed)
                };
                if destroy {
                    destroyed = Some(inner.entries.remove(pos));
                } else {
                    let entry = &mut inner.entries[pos];
                    entry.in_use = false;
                    entry.last_used = Instant::now();
                }
            }
        }
        if let Some(entry) = destroyed {
            self.destroy(entry);
        }
        self.returned.notify_one();
    }

    fn destroy(&self, entry: PoolEntry<K::Conn>) {
        self.counters.destroyed.fetch_add(1, Ordering::Relaxed);
        debug!(
            connection_id = entry.id,
            usage = entry.usage_count,
            "destroying pooled connection"
        );
        let conn = entry.conn;
        tokio::spawn(async move {
            conn.close().await;
        });
    }

    /// Ping every parked connection, drop the ones that fail and
    /// replenish back up to `min_connections`.
    pub async fn health_check(&self) {
        let parked: Vec<(u64, Arc<K::Conn>, Arc<AtomicBool>)> = {
            let inner = self.inner.lock();
            inner
                .entries
                .iter()
                .filter(|e| !e.in_use)
                .map(|e| (e.id, e.conn.clone(), e.healthy.clone()))
                .collect()
        };

        for (id, conn, healthy) in parked {
            if !conn.is_alive().await {
                warn!(connection_id = id, "pooled connection failed health check");
                healthy.store(false, Ordering::Relaxed);
            }
        }

        let removed: Vec<PoolEntry<K::Conn>> = {
            let mut inner = self.inner.lock();
            let min = self.config.min_connections;
            let mut removed = Vec::new();
            let mut index = 0;
            while index < inner.entries.len() {
                let len = inner.entries.len();
                let entry = &inner.entries[index];
                let expired = !entry.in_use
                    && (!entry.healthy.load(Ordering::Relaxed)
                        || entry.created_at.elapsed() > self.config.max_lifetime
                        || (entry.last_used.elapsed() > self.config.max_idle_time && len > min));
                if expired {
                    removed.push(inner.entries.remove(index));
                } else {
                    index += 1;
                }
            }
            removed
        };
        for entry in removed {
            self.destroy(entry);
        }

        while !self.closed.load(Ordering::Relaxed)
            && self.inner.lock().entries.len() < self.config.min_connections
        {
            match self.connector.connect(&self.url).await {
                Ok(conn) => {
                    self.park_new(conn, false);
                }
                Err(e) => {
                    error!(error = %e, "failed to replenish connection pool");
                    break;
                }
            }
        }
    }

    pub fn stats(&self) -> ConnectionPoolStats {
        let inner = self.inner.lock();
        let active = inner.entries.iter().filter(|e| e.in_use).count();
        let healthy = inner
            .entries
            .iter()
            .filter(|e| e.healthy.load(Ordering::Relaxed))
            .count();
        ConnectionPoolStats {
            active_connections: active,
            idle_connections: inner.entries.len() - active,
            total_created: self.counters.created.load(Ordering::Relaxed),
            total_destroyed: self.counters.destroyed.load(Ordering::Relaxed),
            total_borrowed: self.counters.borrowed.load(Ordering::Relaxed),
            total_returned: self.counters.returned.load(Ordering::Relaxed),
            healthy_connections: healthy,
        }
    }

    /// Refuse new borrows, wait (bounded) for in-use connections to
    /// come back, then destroy everything and stop the health task.
    pub async fn close(&self) {
        self.closed.store(true, Ordering::Relaxed);
        let _ = self.stop_tx.send(true);
        self.returned.notify_waiters();

        let deadline = Instant::now() + self.config.connection_timeout;
        loop {
            let in_use = self.inner.lock().entries.iter().filter(|e| e.in_use).count();
            if in_use == 0 {
                break;
            }
            let now = Instant::now();
            if now >= deadline {
                warn!(in_use, "closing pool with connections still in use");
                break;
            }
            let _ = tokio::time::timeout(deadline - now, self.returned.notified()).await;
        }

        let entries = {
            let mut inner = self.inner.lock();
            std::mem::take(&mut inner.entries)
        };
        for entry in entries {
            self.counters.destroyed.fetch_add(1, Ordering::Relaxed);
            entry.conn.close().await;
        }
        info!("connection pool closed");
    }
}

/// Production connection wrapping lapin
pub struct AmqpConnection {
    inner: lapin::Connection,
}

impl AmqpConnection {
    pub async fn create_channel(&self) -> Result<lapin::Channel, BrokerError> {
        self.inner.create_channel().await.map_err(Into::into)
    }
}

#[async_trait]
impl PoolableConnection for AmqpConnection {
    async fn is_alive(&self) -> bool {
        self.inner.status().connected()
    }

    async fn close(&self) {
        if let Err(e) = self.inner.close(200, "connection pool shutdown").await {
            debug!(error = %e, "error closing AMQP connection");
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AmqpConnector;

#[async_trait]
impl Connector for AmqpConnector {
    type Conn = AmqpConnection;

    async fn connect(&self, url: &str) -> Result<AmqpConnection, BrokerError> {
        let conn = lapin::Connection::connect(url, lapin::ConnectionProperties::default())
            .await
            .map_err(|e| BrokerError::Connect {
                reason: e.to_string(),
            })?;
        Ok(AmqpConnection { inner: conn })
    }
}

pub type AmqpPool = ConnectionPool<AmqpConnector>;
