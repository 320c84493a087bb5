//! fxrates connection pool
//!
//! A fixed set of connections opened at startup, lent out one borrower at a
//! time, plus the [`UnitOfWork`] that wraps a borrowed connection in a
//! transaction.
//!
//! # Example
//!
//! ```rust,ignore
//! use fxrates_pool::{ConnectionPool, PoolConfig, UnitOfWork};
//!
//! let pool = ConnectionPool::initialize(manager, PoolConfig::with_size(5)).await?;
//!
//! let mut uow = UnitOfWork::begin(&pool).await?;
//! let result = uow.save_rate(rate).await;
//! let saved = uow.finish(result).await?;
//! ```

pub mod config;
pub mod manager;
pub mod metrics;
pub mod pool;
pub mod unit_of_work;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use config::PoolConfig;
pub use manager::{IsolationLevel, ManageConnection};
pub use metrics::{PoolMetrics, PoolStats};
pub use pool::{ConnectionPool, PooledConnection};
pub use unit_of_work::UnitOfWork;
