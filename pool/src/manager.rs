//! Backend hooks the pool drives: opening, transaction control, reset, close.

use async_trait::async_trait;
use fxrates_common::StorageError;
use std::fmt;

/// Transaction isolation level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IsolationLevel {
    ReadUncommitted,
    /// Default for units of work.
    #[default]
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    /// SQL spelling, as used after `ISOLATION LEVEL`.
    pub fn as_sql(&self) -> &'static str {
        match self {
            IsolationLevel::ReadUncommitted => "READ UNCOMMITTED",
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
            IsolationLevel::Serializable => "SERIALIZABLE",
        }
    }
}

impl fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

/// A backend the pool can manage connections for.
///
/// Implementations own the physical side: the pool only calls these hooks and
/// never inspects the connection itself.
#[async_trait]
pub trait ManageConnection: Send + Sync + 'static {
    /// The physical connection type.
    type Connection: Send + 'static;

    /// Open a new physical connection.
    async fn connect(&self) -> Result<Self::Connection, StorageError>;

    /// Disable autocommit and open a transaction at `isolation`.
    async fn begin(
        &self,
        conn: &mut Self::Connection,
        isolation: IsolationLevel,
    ) -> Result<(), StorageError>;

    /// Commit the open transaction.
    async fn commit(&self, conn: &mut Self::Connection) -> Result<(), StorageError>;

    /// Roll back the open transaction.
    async fn rollback(&self, conn: &mut Self::Connection) -> Result<(), StorageError>;

    /// Discard any open transaction and restore autocommit and the default
    /// isolation level.
    async fn reset(&self, conn: &mut Self::Connection) -> Result<(), StorageError>;

    /// Close the physical connection.
    async fn close(&self, conn: Self::Connection) -> Result<(), StorageError>;
}
