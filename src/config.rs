use serde::Deserialize;
use std::env;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub catalog: CatalogConfig,
    pub storage: StorageConfig,
    pub cache: CacheConfig,
    pub query: QueryConfig,
    pub security: SecurityConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// SQLite file holding the data source catalog
#[derive(Debug, Clone, Deserialize)]
pub struct CatalogConfig {
    pub url: String,
}

/// Where uploaded files are read from
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub environment: String,
    pub upload_dir: String,
    pub blob_base_url: Option<String>,
}

impl StorageConfig {
    /// Development reads from the local upload directory; other environments use blob storage
    pub fn uses_local_files(&self) -> bool {
        self.environment.eq_ignore_ascii_case("development")
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    pub default_ttl_secs: u64,
    pub max_entries: usize,
    pub sweep_interval_secs: u64,
}

impl CacheConfig {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueryConfig {
    pub timeout_secs: u64,
    pub default_limit: u64,
}

impl QueryConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Clone, Deserialize)]
pub struct SecurityConfig {
    pub encryption_key: Option<String>,
}

impl std::fmt::Debug for SecurityConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecurityConfig")
            .field("encryption_key", &self.encryption_key.as_ref().map(|_| "***"))
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

/// Environment variables that override configuration keys
const ENV_OVERRIDES: &[(&str, &str)] = &[
    ("HOST", "server.host"),
    ("DATABASE_URL", "catalog.url"),
    ("APP_ENV", "storage.environment"),
    ("UPLOAD_DIR", "storage.upload_dir"),
    ("BLOB_BASE_URL", "storage.blob_base_url"),
    ("ENCRYPTION_KEY", "security.encryption_key"),
    ("RUST_LOG", "logging.level"),
];

/// Numeric overrides; values that do not parse are ignored
const NUMERIC_ENV_OVERRIDES: &[(&str, &str)] = &[
    ("PORT", "server.port"),
    ("CACHE_TTL_SECS", "cache.default_ttl_secs"),
    ("CACHE_MAX_ENTRIES", "cache.max_entries"),
    ("QUERY_TIMEOUT_SECS", "query.timeout_secs"),
];

impl Config {
    pub fn from_env() -> Result<Self, config::ConfigError> {
        // Try to load from .env file
        let _ = dotenv::dotenv();

        let mut builder = config::Config::builder()
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 3000)?
            .set_default("catalog.url", "./catalog.db")?
            .set_default("storage.environment", "development")?
            .set_default("storage.upload_dir", "./uploads")?
            .set_default("cache.default_ttl_secs", 300)?
            .set_default("cache.max_entries", 1000)?
            .set_default("cache.sweep_interval_secs", 300)?
            .set_default("query.timeout_secs", 30)?
            .set_default("query.default_limit", 1000)?
            .set_default("logging.level", "info")?;

        for (var, key) in ENV_OVERRIDES {
            if let Ok(value) = env::var(var) {
                builder = builder.set_override(*key, value)?;
            }
        }

        for (var, key) in NUMERIC_ENV_OVERRIDES {
            if let Some(value) = env::var(var).ok().and_then(|v| v.trim().parse::<u64>().ok()) {
                builder = builder.set_override(*key, value)?;
            }
        }

        builder.build()?.try_deserialize()
    }

    pub fn server_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
