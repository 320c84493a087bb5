//! Fixed-size pool of exclusive connections.

use std::collections::VecDeque;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use fxrates_common::StorageError;
use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, instrument, warn};

use crate::config::PoolConfig;
use crate::manager::{IsolationLevel, ManageConnection};
use crate::metrics::{PoolMetrics, PoolStats};

/// A connection waiting in the pool. `dirty` connections came back without
/// going through `release` and are reset before they are lent again.
struct IdleConnection<C> {
    id: usize,
    conn: C,
    dirty: bool,
}

struct PoolInner<M: ManageConnection> {
    manager: M,
    config: PoolConfig,
    idle: Mutex<VecDeque<IdleConnection<M::Connection>>>,
    /// One permit per idle connection.
    permits: Arc<Semaphore>,
    closed: AtomicBool,
    metrics: PoolMetrics,
}

impl<M: ManageConnection> PoolInner<M> {
    /// Queue a returned connection. Once the pool is shut down the connection
    /// is handed back instead, for the caller to close.
    fn put_back(&self, id: usize, conn: M::Connection, dirty: bool) -> Option<M::Connection> {
        let mut idle = self.idle.lock();
        // Checked under the idle lock so `shutdown` cannot drain in between.
        let rejected = if self.is_closed() {
            Some(conn)
        } else {
            idle.push_back(IdleConnection { id, conn, dirty });
            None
        };
        drop(idle);

        self.metrics.returned(dirty);
        rejected
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// A bounded pool of connections opened up front.
///
/// The pool is the sole owner of its connections; borrowers get a
/// [`PooledConnection`] that goes back to the pool when released or dropped.
pub struct ConnectionPool<M: ManageConnection> {
    inner: Arc<PoolInner<M>>,
}

impl<M: ManageConnection> Clone for ConnectionPool<M> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<M: ManageConnection> fmt::Debug for ConnectionPool<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("stats", &self.stats())
            .field("closed", &self.inner.is_closed())
            .finish()
    }
}

impl<M: ManageConnection> ConnectionPool<M> {
    /// Open `config.size` connections. Fails if any of them cannot be opened,
    /// closing the ones that were.
    #[instrument(skip(manager, config), fields(size = config.size))]
    pub async fn initialize(manager: M, config: PoolConfig) -> Result<Self, StorageError> {
        config.validate().map_err(StorageError::Configuration)?;

        let mut idle = VecDeque::with_capacity(config.size);
        for id in 0..config.size {
            match manager.connect().await {
                Ok(conn) => idle.push_back(IdleConnection {
                    id,
                    conn,
                    dirty: false,
                }),
                Err(e) => {
                    warn!(error = %e, opened = idle.len(), "Failed to open pooled connection");
                    for entry in idle.drain(..) {
                        if let Err(close_err) = manager.close(entry.conn).await {
                            warn!(connection_id = entry.id, error = %close_err, "Failed to close connection");
                        }
                    }
                    return Err(e);
                }
            }
        }

        info!("Connection pool initialized");

        Ok(Self {
            inner: Arc::new(PoolInner {
                manager,
                permits: Arc::new(Semaphore::new(config.size)),
                config,
                idle: Mutex::new(idle),
                closed: AtomicBool::new(false),
                metrics: PoolMetrics::new(),
            }),
        })
    }

    /// Borrow a connection, waiting until one is free.
    ///
    /// Waits forever unless the pool was configured with an acquire timeout.
    pub async fn borrow(&self) -> Result<PooledConnection<M>, StorageError> {
        if self.inner.is_closed() {
            return Err(StorageError::PoolClosed);
        }

        let acquire = Arc::clone(&self.inner.permits).acquire_owned();
        let permit = match self.inner.config.acquire_timeout {
            Some(timeout) => match tokio::time::timeout(timeout, acquire).await {
                Ok(permit) => permit,
                Err(_) => {
                    self.inner.metrics.timed_out();
                    warn!(?timeout, "Timed out waiting for a pooled connection");
                    return Err(StorageError::AcquireTimeout(timeout));
                }
            },
            None => acquire.await,
        }
        .map_err(|_| StorageError::PoolClosed)?;

        // Holding a permit guarantees an idle entry unless the pool was shut down.
        let entry = self
            .inner
            .idle
            .lock()
            .pop_front()
            .ok_or(StorageError::PoolClosed)?;

        self.inner.metrics.borrowed();
        let mut conn = PooledConnection {
            id: entry.id,
            conn: Some(entry.conn),
            pool: Arc::clone(&self.inner),
            _permit: permit,
        };

        if entry.dirty {
            debug!(connection_id = conn.id, "Resetting connection returned without release");
            conn.reset().await?;
        }

        debug!(connection_id = conn.id, "Connection borrowed");
        Ok(conn)
    }

    /// Reset a borrowed connection and put it back.
    pub async fn release(&self, conn: PooledConnection<M>) -> Result<(), StorageError> {
        conn.release().await
    }

    /// Close every idle connection and refuse further borrows.
    ///
    /// Connections still lent out are closed when they come back.
    #[instrument(skip(self))]
    pub async fn shutdown(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.permits.close();

        let idle: Vec<_> = self.inner.idle.lock().drain(..).collect();
        let count = idle.len();
        for entry in idle {
            if let Err(e) = self.inner.manager.close(entry.conn).await {
                warn!(connection_id = entry.id, error = %e, "Failed to close connection");
            }
        }

        info!(closed = count, "Connection pool shut down");
    }

    /// Check whether `shutdown` has been called.
    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// Get the pool configuration.
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Get the backend manager.
    pub fn manager(&self) -> &M {
        &self.inner.manager
    }

    /// Get current pool statistics.
    pub fn stats(&self) -> PoolStats {
        let idle = self.inner.idle.lock().len();
        self.inner.metrics.snapshot(self.inner.config.size, idle)
    }
}

/// Exclusive custody of one pooled connection.
///
/// Dereferences to the backend connection. Dropping the handle returns the
/// connection to the pool marked dirty, so the next borrower resets it first;
/// [`PooledConnection::release`] resets it eagerly instead.
pub struct PooledConnection<M: ManageConnection> {
    id: usize,
    conn: Option<M::Connection>,
    pool: Arc<PoolInner<M>>,
    _permit: OwnedSemaphorePermit,
}

impl<M: ManageConnection> PooledConnection<M> {
    /// Pool-local connection id, stable for the pool's lifetime.
    pub fn id(&self) -> usize {
        self.id
    }

    /// Reset the connection and return it to the pool.
    ///
    /// The connection goes back even if the reset fails; it is then marked
    /// dirty and the reset is retried by the next borrower.
    pub async fn release(mut self) -> Result<(), StorageError> {
        let result = self.reset().await;

        if let Some(conn) = self.conn.take() {
            if let Some(conn) = self.pool.put_back(self.id, conn, result.is_err()) {
                if let Err(e) = self.pool.manager.close(conn).await {
                    warn!(connection_id = self.id, error = %e, "Failed to close connection");
                }
            }
        }

        debug!(connection_id = self.id, "Connection released");
        result
    }

    pub(crate) async fn begin(&mut self, isolation: IsolationLevel) -> Result<(), StorageError> {
        match self.conn.as_mut() {
            Some(conn) => self.pool.manager.begin(conn, isolation).await,
            None => Err(StorageError::PoolClosed),
        }
    }

    pub(crate) async fn commit(&mut self) -> Result<(), StorageError> {
        match self.conn.as_mut() {
            Some(conn) => self.pool.manager.commit(conn).await,
            None => Err(StorageError::PoolClosed),
        }
    }

    pub(crate) async fn rollback(&mut self) -> Result<(), StorageError> {
        match self.conn.as_mut() {
            Some(conn) => self.pool.manager.rollback(conn).await,
            None => Err(StorageError::PoolClosed),
        }
    }

    async fn reset(&mut self) -> Result<(), StorageError> {
        let Some(conn) = self.conn.as_mut() else {
            return Ok(());
        };

        let result = self.pool.manager.reset(conn).await;
        self.pool.metrics.reset(result.is_ok());
        if let Err(e) = &result {
            warn!(connection_id = self.id, error = %e, "Failed to reset connection");
        }
        result
    }
}

impl<M: ManageConnection> Deref for PooledConnection<M> {
    type Target = M::Connection;

    fn deref(&self) -> &Self::Target {
        self.conn
            .as_ref()
            .expect("pooled connection is present until released")
    }
}

impl<M: ManageConnection> DerefMut for PooledConnection<M> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn
            .as_mut()
            .expect("pooled connection is present until released")
    }
}

impl<M: ManageConnection> fmt::Debug for PooledConnection<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

impl<M: ManageConnection> Drop for PooledConnection<M> {
    fn drop(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };

        debug!(connection_id = self.id, "Connection returned without release");
        let Some(conn) = self.pool.put_back(self.id, conn, true) else {
            return;
        };

        // The pool is shut down; close on the runtime since `drop` cannot await.
        // Without a runtime the connection is dropped without a clean close.
        let id = self.id;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let pool = Arc::clone(&self.pool);
                handle.spawn(async move {
                    if let Err(e) = pool.manager.close(conn).await {
                        warn!(connection_id = id, error = %e, "Failed to close connection");
                    }
                });
            }
            Err(_) => {
                warn!(connection_id = id, "No runtime to close connection, dropping it");
                drop(conn);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestManager;
    use std::time::Duration;

    async fn pool(size: usize) -> (ConnectionPool<TestManager>, TestManager) {
        let manager = TestManager::new();
        let pool = ConnectionPool::initialize(manager.clone(), PoolConfig::with_size(size))
            .await
            .unwrap();
        (pool, manager)
    }

    #[tokio::test]
    async fn test_initialize_opens_all_connections() {
        let (pool, manager) = pool(3).await;

        assert_eq!(manager.connects(), 3);
        let stats = pool.stats();
        assert_eq!(stats.size, 3);
        assert_eq!(stats.idle, 3);
        assert_eq!(stats.in_use, 0);
    }

    #[tokio::test]
    async fn test_initialize_failure_closes_opened() {
        let manager = TestManager::new().fail_connect_after(2);

        let result = ConnectionPool::initialize(manager.clone(), PoolConfig::with_size(4)).await;

        assert!(matches!(result, Err(StorageError::Connect(_))));
        assert_eq!(manager.closes(), 2);
    }

    #[tokio::test]
    async fn test_initialize_rejects_zero_size() {
        let result = ConnectionPool::initialize(TestManager::new(), PoolConfig::with_size(0)).await;
        assert!(matches!(result, Err(StorageError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_release_resets_connection() {
        let (pool, manager) = pool(1).await;

        let mut conn = pool.borrow().await.unwrap();
        conn.autocommit = false;
        conn.isolation = Some(IsolationLevel::Serializable);
        pool.release(conn).await.unwrap();

        let conn = pool.borrow().await.unwrap();
        assert!(conn.autocommit);
        assert_eq!(conn.isolation, None);
        assert_eq!(manager.resets(), 1);
        conn.release().await.unwrap();
    }

    #[tokio::test]
    async fn test_dropped_connection_is_reset_before_next_borrow() {
        let (pool, manager) = pool(1).await;

        {
            let mut conn = pool.borrow().await.unwrap();
            conn.autocommit = false;
            conn.in_transaction = true;
        }
        assert_eq!(pool.stats().dirty_returns, 1);
        assert_eq!(manager.resets(), 0);

        let conn = pool.borrow().await.unwrap();
        assert!(conn.autocommit);
        assert!(!conn.in_transaction);
        assert_eq!(manager.resets(), 1);
    }

    #[tokio::test]
    async fn test_borrow_waits_for_release() {
        let (pool, _) = pool(1).await;
        let held = pool.borrow().await.unwrap();

        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.borrow().await.map(|c| c.id()) })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        let id = held.id();
        held.release().await.unwrap();
        assert_eq!(waiter.await.unwrap().unwrap(), id);
    }

    #[tokio::test]
    async fn test_borrow_timeout() {
        let manager = TestManager::new();
        let config = PoolConfig::with_size(1).acquire_timeout(Duration::from_millis(10));
        let pool = ConnectionPool::initialize(manager, config).await.unwrap();

        let _held = pool.borrow().await.unwrap();
        let result = pool.borrow().await;

        assert!(matches!(result, Err(StorageError::AcquireTimeout(_))));
        assert_eq!(pool.stats().timeouts, 1);
    }

    #[tokio::test]
    async fn test_failed_reset_keeps_connection() {
        let (pool, manager) = pool(1).await;
        manager.set_fail_reset(true);

        let conn = pool.borrow().await.unwrap();
        assert!(matches!(conn.release().await, Err(StorageError::Reset(_))));
        assert_eq!(pool.stats().idle, 1);

        manager.set_fail_reset(false);
        let conn = pool.borrow().await.unwrap();
        assert!(conn.autocommit);
        assert_eq!(pool.stats().reset_failures, 1);
    }

    #[tokio::test]
    async fn test_shutdown_closes_connections() {
        let (pool, manager) = pool(2).await;
        let held = pool.borrow().await.unwrap();

        pool.shutdown().await;
        assert_eq!(manager.closes(), 1);
        assert!(matches!(pool.borrow().await, Err(StorageError::PoolClosed)));

        held.release().await.unwrap();
        assert_eq!(manager.closes(), 2);
        assert_eq!(pool.stats().idle, 0);
    }

    #[tokio::test]
    async fn test_dropped_connection_closed_after_shutdown() {
        let (pool, manager) = pool(2).await;
        let held = pool.borrow().await.unwrap();

        pool.shutdown().await;
        assert_eq!(manager.closes(), 1);

        drop(held);
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(manager.closes(), 2);
        let stats = pool.stats();
        assert_eq!(stats.idle, 0);
        assert_eq!(stats.in_use, 0);
        assert_eq!(stats.releases, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_release_racing_shutdown_closes_every_connection() {
        for _ in 0..20 {
            let (pool, manager) = pool(4).await;
            let mut held = Vec::new();
            for _ in 0..4 {
                held.push(pool.borrow().await.unwrap());
            }

            let releases: Vec<_> = held
                .into_iter()
                .map(|conn| tokio::spawn(async move { conn.release().await }))
                .collect();
            pool.shutdown().await;
            for release in releases {
                release.await.unwrap().unwrap();
            }

            assert_eq!(manager.closes(), 4);
            assert_eq!(pool.stats().idle, 0);
        }
    }

    #[tokio::test]
    async fn test_shutdown_wakes_waiters() {
        let (pool, _) = pool(1).await;
        let _held = pool.borrow().await.unwrap();

        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.borrow().await.map(|c| c.id()) })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        pool.shutdown().await;
        assert!(matches!(waiter.await.unwrap(), Err(StorageError::PoolClosed)));
    }
}
