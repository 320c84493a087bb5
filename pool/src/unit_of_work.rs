//! Transaction-scoped custody of one pooled connection.

use std::fmt;
use std::ops::{Deref, DerefMut};

use fxrates_common::StorageError;
use tracing::{debug, warn};

use crate::manager::{IsolationLevel, ManageConnection};
use crate::pool::{ConnectionPool, PooledConnection};

/// One atomic, isolated sequence of store operations on a single connection.
///
/// A unit of work dereferences to the backend connection, so every store call
/// made through it runs inside its transaction. It must be finished with
/// [`commit`](UnitOfWork::commit), [`abort`](UnitOfWork::abort) or
/// [`finish`](UnitOfWork::finish); if it is dropped instead, the connection
/// still goes back to the pool and is rolled back before its next use.
pub struct UnitOfWork<M: ManageConnection> {
    conn: Option<PooledConnection<M>>,
    isolation: IsolationLevel,
}

impl<M: ManageConnection> UnitOfWork<M> {
    /// Borrow a connection and open a READ COMMITTED transaction on it.
    pub async fn begin(pool: &ConnectionPool<M>) -> Result<Self, StorageError> {
        Self::begin_with(pool, IsolationLevel::ReadCommitted).await
    }

    /// Borrow a connection and open a transaction at `isolation`.
    pub async fn begin_with(
        pool: &ConnectionPool<M>,
        isolation: IsolationLevel,
    ) -> Result<Self, StorageError> {
        let mut conn = pool.borrow().await?;

        if let Err(e) = conn.begin(isolation).await {
            warn!(connection_id = conn.id(), error = %e, "Failed to begin transaction");
            if let Err(release_err) = conn.release().await {
                warn!(error = %release_err, "Failed to release connection after begin failure");
            }
            return Err(e);
        }

        debug!(connection_id = conn.id(), %isolation, "Unit of work started");
        Ok(Self {
            conn: Some(conn),
            isolation,
        })
    }

    /// Isolation level of the open transaction.
    pub fn isolation(&self) -> IsolationLevel {
        self.isolation
    }

    /// Id of the bound pooled connection.
    pub fn connection_id(&self) -> usize {
        self.conn.as_ref().map_or(usize::MAX, |c| c.id())
    }

    /// Commit and return the connection to the pool.
    pub async fn commit(mut self) -> Result<(), StorageError> {
        let Some(mut conn) = self.conn.take() else {
            return Ok(());
        };

        let committed = conn.commit().await;
        match &committed {
            Ok(()) => debug!(connection_id = conn.id(), "Unit of work committed"),
            Err(e) => warn!(connection_id = conn.id(), error = %e, "Commit failed"),
        }

        release(conn).await;
        committed
    }

    /// Roll back and return the connection to the pool.
    pub async fn abort(mut self) -> Result<(), StorageError> {
        let Some(mut conn) = self.conn.take() else {
            return Ok(());
        };

        let rolled_back = conn.rollback().await;
        match &rolled_back {
            Ok(()) => debug!(connection_id = conn.id(), "Unit of work rolled back"),
            Err(e) => warn!(connection_id = conn.id(), error = %e, "Rollback failed"),
        }

        release(conn).await;
        rolled_back
    }

    /// Commit on `Ok`, roll back on `Err`, and hand the result through.
    ///
    /// A failed commit or rollback replaces the result with the storage error.
    pub async fn finish<T, E>(self, result: Result<T, E>) -> Result<T, E>
    where
        E: From<StorageError> + fmt::Display,
    {
        match result {
            Ok(value) => {
                self.commit().await?;
                Ok(value)
            }
            Err(err) => match self.abort().await {
                Ok(()) => Err(err),
                Err(abort_err) => {
                    warn!(cause = %err, error = %abort_err, "Rollback after failure failed");
                    Err(abort_err.into())
                }
            },
        }
    }
}

/// Hand the connection back once the transaction is over.
///
/// A failed reset leaves the connection dirty in the pool, where the next
/// borrower resets it, so it does not fail the finished transaction.
async fn release<M: ManageConnection>(conn: PooledConnection<M>) {
    let id = conn.id();
    if let Err(e) = conn.release().await {
        warn!(connection_id = id, error = %e, "Reset after transaction failed");
    }
}

impl<M: ManageConnection> Deref for UnitOfWork<M> {
    type Target = M::Connection;

    fn deref(&self) -> &Self::Target {
        self.conn
            .as_deref()
            .expect("unit of work holds its connection until finished")
    }
}

impl<M: ManageConnection> DerefMut for UnitOfWork<M> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn
            .as_deref_mut()
            .expect("unit of work holds its connection until finished")
    }
}

impl<M: ManageConnection> fmt::Debug for UnitOfWork<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnitOfWork")
            .field("connection_id", &self.connection_id())
            .field("isolation", &self.isolation)
            .finish()
    }
}

impl<M: ManageConnection> Drop for UnitOfWork<M> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            warn!(
                connection_id = conn.id(),
                "Unit of work dropped without commit or abort, rolling back on return"
            );
        }
    }
}
