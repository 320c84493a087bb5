//! fxrates common types
//!
//! Shared currency and exchange rate records, the decimal scale contract,
//! and the error taxonomy used by every fxrates crate.

pub mod error;
pub mod identifiers;
pub mod model;
pub mod monetary;

pub use error::*;
pub use identifiers::*;
pub use model::*;
pub use monetary::*;
