//! Error types for fxrates.

use std::time::Duration;

use thiserror::Error;

use crate::CurrencyPair;

/// Boxed lower-level error carried as a source.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Failure of the backing store, the connection pool or a transaction.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Opening a physical connection failed.
    #[error("Failed to open connection: {0}")]
    Connect(#[source] BoxError),

    /// A statement failed and could not be classified further.
    #[error("Query failed: {0}")]
    Query(#[source] BoxError),

    /// Beginning, committing or rolling back a transaction failed.
    #[error("Failed to {action} transaction: {source}")]
    Transaction {
        action: &'static str,
        #[source]
        source: BoxError,
    },

    /// Restoring a connection's default session state failed.
    #[error("Failed to reset connection: {0}")]
    Reset(#[source] BoxError),

    /// No connection became available within the configured wait.
    #[error("Timed out after {0:?} waiting for a pooled connection")]
    AcquireTimeout(Duration),

    /// The pool has been shut down.
    #[error("Connection pool is closed")]
    PoolClosed,

    /// Invalid pool or connection settings.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A row did not have the expected shape.
    #[error("Malformed row: {0}")]
    MalformedRow(String),
}

impl StorageError {
    /// Wrap a failed statement.
    pub fn query(err: impl Into<BoxError>) -> Self {
        StorageError::Query(err.into())
    }

    /// Wrap a failed transaction control statement.
    pub fn transaction(action: &'static str, err: impl Into<BoxError>) -> Self {
        StorageError::Transaction {
            action,
            source: err.into(),
        }
    }

    /// Get error code for boundary responses.
    pub fn error_code(&self) -> &'static str {
        match self {
            StorageError::Connect(_) => "CONNECTION_FAILED",
            StorageError::Query(_) => "QUERY_FAILED",
            StorageError::Transaction { .. } => "TRANSACTION_FAILED",
            StorageError::Reset(_) => "CONNECTION_RESET_FAILED",
            StorageError::AcquireTimeout(_) => "POOL_TIMEOUT",
            StorageError::PoolClosed => "POOL_CLOSED",
            StorageError::Configuration(_) => "CONFIGURATION_ERROR",
            StorageError::MalformedRow(_) => "MALFORMED_ROW",
        }
    }
}

/// Main error type for fxrates operations.
#[derive(Error, Debug)]
pub enum FxRatesError {
    /// No currency with the given code (or id).
    #[error("Currency not found: {0}")]
    CurrencyNotFound(String),

    /// No exchange rate could be found or derived for the pair.
    #[error("Exchange rate not found for {0}")]
    RateNotFound(CurrencyPair),

    /// A currency with the same code is already stored.
    #[error("Currency already exists: {0}")]
    CurrencyAlreadyExists(String),

    /// A rate for the same (base, target) pair is already stored.
    #[error("Exchange rate already exists for {0}")]
    RateAlreadyExists(CurrencyPair),

    /// Malformed input rejected before touching the store.
    #[error("Invalid {field}: {message}")]
    Validation { field: String, message: String },

    /// Lower-level storage failure.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl FxRatesError {
    /// Create a validation error for a field.
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        FxRatesError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Check if this error is a not-found condition.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            FxRatesError::CurrencyNotFound(_) | FxRatesError::RateNotFound(_)
        )
    }

    /// Check if the caller can recover (everything except storage failures).
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, FxRatesError::Storage(_))
    }

    /// Get error code for boundary responses.
    pub fn error_code(&self) -> &'static str {
        match self {
            FxRatesError::CurrencyNotFound(_) => "CURRENCY_NOT_FOUND",
            FxRatesError::RateNotFound(_) => "RATE_NOT_FOUND",
            FxRatesError::CurrencyAlreadyExists(_) => "CURRENCY_ALREADY_EXISTS",
            FxRatesError::RateAlreadyExists(_) => "RATE_ALREADY_EXISTS",
            FxRatesError::Validation { .. } => "VALIDATION_FAILED",
            FxRatesError::Storage(e) => e.error_code(),
        }
    }

    /// Get the HTTP status the boundary layer should answer with.
    pub fn http_status(&self) -> u16 {
        match self {
            FxRatesError::CurrencyNotFound(_) | FxRatesError::RateNotFound(_) => 404,
            FxRatesError::CurrencyAlreadyExists(_) | FxRatesError::RateAlreadyExists(_) => 409,
            FxRatesError::Validation { .. } => 400,
            FxRatesError::Storage(_) => 500,
        }
    }
}

/// Result type alias for fxrates operations.
pub type Result<T> = std::result::Result<T, FxRatesError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let pair = CurrencyPair::new("USD", "EUR");
        assert_eq!(FxRatesError::RateNotFound(pair.clone()).http_status(), 404);
        assert_eq!(FxRatesError::RateAlreadyExists(pair).http_status(), 409);
        assert_eq!(FxRatesError::validation("rate", "must be positive").http_status(), 400);
        assert_eq!(FxRatesError::from(StorageError::PoolClosed).http_status(), 500);
    }

    #[test]
    fn test_storage_is_not_recoverable() {
        let err: FxRatesError = StorageError::AcquireTimeout(Duration::from_secs(1)).into();
        assert!(!err.is_recoverable());
        assert_eq!(err.error_code(), "POOL_TIMEOUT");

        let err = FxRatesError::CurrencyNotFound("XYZ".to_string());
        assert!(err.is_recoverable());
        assert!(err.is_not_found());
    }

    #[test]
    fn test_rate_not_found_names_pair() {
        let err = FxRatesError::RateNotFound(CurrencyPair::new("usd", "jpy"));
        assert_eq!(err.to_string(), "Exchange rate not found for USD/JPY");
    }
}
