//! Connection Cache
//!
//! Process-wide registry of live connection handles keyed by the
//! canonicalized `ConnectionConfig`. This is the only place handles are
//! created or destroyed; DAOs borrow them through `Arc`.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mongodb::Client as MongoClient;
use sqlx::mysql::MySqlPool;
use sqlx::postgres::PgPool;
use tokio::sync::{Mutex, OnceCell};
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

use crate::engine::error::{EngineError, EngineResult};
use crate::engine::ssh_tunnel::SshTunnel;
use crate::engine::types::{ConnectionConfig, ConnectionKey, ConnectionStatus};

/// Something the cache can release on invalidation
#[async_trait]
pub trait CachedHandle: Send + Sync + 'static {
    async fn close(&self);
}

/// Driver-specific pool
pub enum EnginePool {
    Postgres(PgPool),
    MySql(MySqlPool),
    Mongo(MongoClient),
}

/// An open pool plus the tunnel it runs through, if any
pub struct ConnectionHandle {
    pool: EnginePool,
    tunnel: Mutex<Option<SshTunnel>>,
}

impl ConnectionHandle {
    pub fn new(pool: EnginePool, tunnel: Option<SshTunnel>) -> Self {
        Self {
            pool,
            tunnel: Mutex::new(tunnel),
        }
    }

    pub fn postgres(&self) -> EngineResult<&PgPool> {
        match &self.pool {
            EnginePool::Postgres(pool) => Ok(pool),
            _ => Err(EngineError::internal("cached handle is not a PostgreSQL pool")),
        }
    }

    pub fn mysql(&self) -> EngineResult<&MySqlPool> {
        match &self.pool {
            EnginePool::MySql(pool) => Ok(pool),
            _ => Err(EngineError::internal("cached handle is not a MySQL pool")),
        }
    }

    pub fn mongo(&self) -> EngineResult<&MongoClient> {
        match &self.pool {
            EnginePool::Mongo(client) => Ok(client),
            _ => Err(EngineError::internal("cached handle is not a MongoDB client")),
        }
    }
}

#[async_trait]
impl CachedHandle for ConnectionHandle {
    /// Closes the pool first; checked-out connections are waited for
    async fn close(&self) {
        match &self.pool {
            EnginePool::Postgres(pool) => pool.close().await,
            EnginePool::MySql(pool) => pool.close().await,
            EnginePool::Mongo(client) => client.clone().shutdown().await,
        }

        if let Some(mut tunnel) = self.tunnel.lock().await.take() {
            if let Err(e) = tunnel.close().await {
                warn!(error = %e, "failed to close SSH tunnel");
            }
        }
    }
}

/// Opens a handle for `config`, through a tunnel when a gateway is configured
///
/// The whole attempt is bounded by `connect_timeout`. A tunnel opened for a
/// failed attempt is torn down before returning.
#[instrument(
    skip(config, connect),
    fields(
        driver = %config.driver,
        host = %config.host,
        port = config.port,
        database = ?config.database,
        ssh = config.ssh_tunnel.is_some()
    )
)]
pub async fn establish<F, Fut>(
    config: &ConnectionConfig,
    connect_timeout: Duration,
    connect: F,
) -> EngineResult<ConnectionHandle>
where
    F: FnOnce(ConnectionConfig) -> Fut,
    Fut: Future<Output = EngineResult<EnginePool>>,
{
    let attempt = async {
        let (effective, mut tunnel) = match &config.ssh_tunnel {
            Some(ssh) => {
                let (tunnel, forwarded) = SshTunnel::establish(config, ssh).await?;
                (forwarded, Some(tunnel))
            }
            None => (config.clone(), None),
        };

        match connect(effective).await {
            Ok(pool) => Ok(ConnectionHandle::new(pool, tunnel)),
            Err(e) => {
                if let Some(tunnel) = tunnel.as_mut() {
                    let _ = tunnel.close().await;
                }
                Err(e)
            }
        }
    };

    match timeout(connect_timeout, attempt).await {
        Ok(result) => result,
        Err(_) => Err(EngineError::Timeout {
            timeout_ms: connect_timeout.as_millis() as u64,
        }),
    }
}

/// Runs a connection check within `budget`, folding every failure into the status
pub async fn probe<Fut>(budget: Duration, check: Fut) -> ConnectionStatus
where
    Fut: Future<Output = EngineResult<()>>,
{
    match timeout(budget, check).await {
        Ok(Ok(())) => ConnectionStatus::success(),
        Ok(Err(e)) => {
            warn!(error = %e, "connection test failed");
            ConnectionStatus::failure(e.to_string())
        }
        Err(_) => {
            let e = EngineError::Timeout {
                timeout_ms: budget.as_millis() as u64,
            };
            warn!(error = %e, "connection test timed out");
            ConnectionStatus::failure(e.to_string())
        }
    }
}

type Slot<H> = Arc<OnceCell<EngineResult<Arc<H>>>>;

/// Key to handle registry
///
/// Concurrent `get_or_create` calls for one key share a single slot: only
/// the first caller runs its factory, the others wait for its outcome.
/// Failed slots are removed so a later call starts afresh.
pub struct ConnectionCache<H: CachedHandle = ConnectionHandle> {
    entries: Mutex<HashMap<ConnectionKey, Slot<H>>>,
}

impl<H: CachedHandle> ConnectionCache<H> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the cached handle, if one is ready
    pub async fn get(&self, config: &ConnectionConfig) -> Option<Arc<H>> {
        let entries = self.entries.lock().await;
        match entries.get(&config.cache_key()).and_then(|slot| slot.get()) {
            Some(Ok(handle)) => Some(handle.clone()),
            _ => None,
        }
    }

    pub async fn contains(&self, config: &ConnectionConfig) -> bool {
        self.get(config).await.is_some()
    }

    /// Number of ready handles
    pub async fn len(&self) -> usize {
        let entries = self.entries.lock().await;
        entries
            .values()
            .filter(|slot| matches!(slot.get(), Some(Ok(_))))
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Returns the cached handle or creates it with `factory`
    pub async fn get_or_create<F, Fut>(&self, config: &ConnectionConfig, factory: F) -> EngineResult<Arc<H>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = EngineResult<H>>,
    {
        let key = config.cache_key();
        let slot = {
            let mut entries = self.entries.lock().await;
            entries
                .entry(key.clone())
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone()
        };

        let outcome = slot
            .get_or_init(|| async {
                debug!(key = ?key, "opening new connection handle");
                let created = factory().await.map(Arc::new);

                let mut entries = self.entries.lock().await;
                let attached = entries.get(&key).is_some_and(|current| Arc::ptr_eq(current, &slot));

                match created {
                    Ok(handle) if attached => {
                        info!(key = ?key, "connection handle cached");
                        Ok(handle)
                    }
                    Ok(handle) => {
                        drop(entries);
                        handle.close().await;
                        Err(EngineError::connection_failed(
                            "Connection was invalidated while it was being established",
                        ))
                    }
                    Err(e) => {
                        if attached {
                            entries.remove(&key);
                        }
                        Err(e)
                    }
                }
            })
            .await;

        outcome.clone()
    }

    /// Closes and removes the handle for `config`; returns whether one existed
    #[instrument(skip(self, config), fields(driver = %config.driver, host = %config.host))]
    pub async fn invalidate(&self, config: &ConnectionConfig) -> bool {
        let removed = {
            let mut entries = self.entries.lock().await;
            entries.remove(&config.cache_key())
        };

        match removed.as_ref().and_then(|slot| slot.get()) {
            Some(Ok(handle)) => {
                handle.close().await;
                info!("connection handle invalidated");
                true
            }
            _ => removed.is_some(),
        }
    }

    /// Closes and removes every handle
    pub async fn clear_all(&self) -> usize {
        let drained: Vec<Slot<H>> = {
            let mut entries = self.entries.lock().await;
            entries.drain().map(|(_, slot)| slot).collect()
        };

        let mut closed = 0;
        for slot in drained {
            if let Some(Ok(handle)) = slot.get() {
                handle.close().await;
                closed += 1;
            }
        }
        info!(closed, "connection cache cleared");
        closed
    }
}

impl<H: CachedHandle> Default for ConnectionCache<H> {
    fn default() -> Self {
        Self::new()
    }
}
