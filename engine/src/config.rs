//! Service configuration.

use fxrates_pool::PoolConfig;

/// Storage backend selected by the database URL scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Postgres,
    Memory,
}

impl Backend {
    /// Pick the backend for a URL, or `None` for an unknown scheme.
    pub fn from_url(url: &str) -> Option<Self> {
        let (scheme, _) = url.split_once(':')?;
        match scheme {
            "postgres" | "postgresql" => Some(Backend::Postgres),
            "memory" => Some(Backend::Memory),
            _ => None,
        }
    }
}

/// Main service configuration.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Database URL; `memory:` runs without a database.
    pub database_url: String,
    /// Overrides the user in the URL.
    pub username: Option<String>,
    /// Overrides the password in the URL.
    pub password: Option<String>,
    /// Connection pool configuration.
    pub pool: PoolConfig,
    /// Log level used when `RUST_LOG` is unset.
    pub log_level: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            database_url: "postgres://localhost/currency_exchange".to_string(),
            username: None,
            password: None,
            pool: PoolConfig::default(),
            log_level: "info".to_string(),
        }
    }
}

impl ServiceConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(url) = std::env::var("DATABASE_URL") {
            config.database_url = url;
        }

        if let Ok(username) = std::env::var("DATABASE_USERNAME") {
            config.username = Some(username);
        }

        if let Ok(password) = std::env::var("DATABASE_PASSWORD") {
            config.password = Some(password);
        }

        if let Ok(level) = std::env::var("LOG_LEVEL") {
            config.log_level = level;
        }

        config.pool = PoolConfig::from_env();
        config
    }

    /// Backend named by the database URL.
    pub fn backend(&self) -> Option<Backend> {
        Backend::from_url(&self.database_url)
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.database_url.trim().is_empty() {
            return Err("Database URL cannot be empty".to_string());
        }

        if self.backend().is_none() {
            return Err(format!(
                "Unsupported database URL scheme: {}",
                self.database_url.split(':').next().unwrap_or_default()
            ));
        }

        self.pool.validate()
    }
}
