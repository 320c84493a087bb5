//! fxrates engine
//!
//! Exchange rate resolution and currency conversion over the fxrates stores.
//!
//! # Features
//!
//! - Direct, inverse and cross rate resolution inside one transaction
//! - Conversions rounded to the shared decimal scale contract
//! - Currency and rate maintenance operations
//!
//! # Example
//!
//! ```rust,ignore
//! use fxrates_engine::ExchangeService;
//! use fxrates_pool::{ConnectionPool, PoolConfig};
//! use fxrates_store::MemoryConnectionManager;
//!
//! let pool = ConnectionPool::initialize(MemoryConnectionManager::new(), PoolConfig::default()).await?;
//! let service = ExchangeService::new(pool);
//!
//! let conversion = service.convert("USD", "EUR", dec!(100)).await?;
//! ```

pub mod config;
pub mod conversion;
pub mod resolver;
pub mod service;

pub use config::{Backend, ServiceConfig};
pub use conversion::Conversion;
pub use resolver::{RateResolver, ResolvedRate, ResolverStats, Strategy};
pub use service::{ExchangeService, ServiceStats};
