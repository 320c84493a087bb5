//! Pool configuration.

use std::time::Duration;

/// Default number of physical connections.
pub const DEFAULT_POOL_SIZE: usize = 5;

/// Connection pool configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Number of connections opened up front.
    pub size: usize,
    /// Maximum wait in `borrow()`. `None` waits until a connection frees up.
    pub acquire_timeout: Option<Duration>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            size: DEFAULT_POOL_SIZE,
            acquire_timeout: None,
        }
    }
}

impl PoolConfig {
    /// Create a configuration with the given size and no acquire timeout.
    pub fn with_size(size: usize) -> Self {
        Self {
            size,
            ..Default::default()
        }
    }

    /// Bound the wait in `borrow()`.
    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = Some(timeout);
        self
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(size) = std::env::var("DATABASE_POOL_SIZE") {
            if let Ok(size) = size.parse() {
                config.size = size;
            }
        }

        if let Ok(ms) = std::env::var("DATABASE_ACQUIRE_TIMEOUT_MS") {
            if let Ok(ms) = ms.parse() {
                config.acquire_timeout = Some(Duration::from_millis(ms));
            }
        }

        config
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.size == 0 {
            return Err("Pool size must be at least 1".to_string());
        }

        if self.acquire_timeout == Some(Duration::ZERO) {
            return Err("Acquire timeout cannot be zero".to_string());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PoolConfig::default();
        assert_eq!(config.size, 5);
        assert!(config.acquire_timeout.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_config() {
        assert!(PoolConfig::with_size(0).validate().is_err());
        assert!(PoolConfig::with_size(2)
            .acquire_timeout(Duration::ZERO)
            .validate()
            .is_err());
    }
}
