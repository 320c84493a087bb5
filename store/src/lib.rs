//! fxrates stores
//!
//! The [`CurrencyStore`] and [`RateStore`] contracts and the two backends
//! that implement them: PostgreSQL through `sqlx`, and an in-memory database
//! for tests and database-less runs.

pub mod memory;
pub mod migrations;
pub mod postgres;
pub mod traits;

pub use memory::{MemoryConnection, MemoryConnectionManager, MemoryDatabase};
pub use postgres::PgConnectionManager;
pub use traits::{CurrencyStore, RateStore, LIST_LIMIT};
