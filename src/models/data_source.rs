use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use url::Url;
use uuid::Uuid;

use crate::api::middleware::AppError;
use crate::models::query::SqlDialect;

/// Kind of origin a data source reads from
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum SourceType {
    File,
    Database,
    Api,
    Cloud,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::File => "FILE",
            SourceType::Database => "DATABASE",
            SourceType::Api => "API",
            SourceType::Cloud => "CLOUD",
        }
    }
}

impl FromStr for SourceType {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "FILE" => Ok(SourceType::File),
            "DATABASE" => Ok(SourceType::Database),
            "API" => Ok(SourceType::Api),
            "CLOUD" => Ok(SourceType::Cloud),
            _ => Err(AppError::Validation(format!("Unsupported data source type: {}", s))),
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Database engine behind a DATABASE source
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum DatabaseProvider {
    #[serde(alias = "postgresql", alias = "postgres", alias = "POSTGRES")]
    PostgreSQL,
    #[serde(alias = "mysql")]
    MySQL,
    #[serde(alias = "sqlserver", alias = "mssql", alias = "MSSQL")]
    SqlServer,
    #[serde(alias = "mongodb", alias = "mongo")]
    MongoDB,
}

impl DatabaseProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            DatabaseProvider::PostgreSQL => "postgresql",
            DatabaseProvider::MySQL => "mysql",
            DatabaseProvider::SqlServer => "sqlserver",
            DatabaseProvider::MongoDB => "mongodb",
        }
    }

    /// SQL dialect spoken by the provider; MongoDB has none.
    pub fn dialect(&self) -> Option<SqlDialect> {
        match self {
            DatabaseProvider::PostgreSQL => Some(SqlDialect::PostgreSQL),
            DatabaseProvider::MySQL => Some(SqlDialect::MySQL),
            DatabaseProvider::SqlServer => Some(SqlDialect::SqlServer),
            DatabaseProvider::MongoDB => None,
        }
    }

    /// Driver crate that implements the provider
    pub fn driver_name(&self) -> &'static str {
        match self {
            DatabaseProvider::PostgreSQL => "tokio-postgres",
            DatabaseProvider::MySQL => "mysql_async",
            DatabaseProvider::SqlServer => "tiberius",
            DatabaseProvider::MongoDB => "mongodb",
        }
    }

    /// Cargo feature that compiles the driver in, if it is optional
    pub fn cargo_feature(&self) -> Option<&'static str> {
        match self {
            DatabaseProvider::SqlServer => Some("mssql"),
            DatabaseProvider::MongoDB => Some("mongodb"),
            _ => None,
        }
    }

    fn url_scheme(&self) -> &'static str {
        match self {
            DatabaseProvider::PostgreSQL => "postgresql",
            DatabaseProvider::MySQL => "mysql",
            DatabaseProvider::SqlServer => "mssql",
            DatabaseProvider::MongoDB => "mongodb",
        }
    }

    pub fn default_port(&self) -> u16 {
        match self {
            DatabaseProvider::PostgreSQL => 5432,
            DatabaseProvider::MySQL => 3306,
            DatabaseProvider::SqlServer => 1433,
            DatabaseProvider::MongoDB => 27017,
        }
    }
}

impl FromStr for DatabaseProvider {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "postgresql" | "postgres" => Ok(DatabaseProvider::PostgreSQL),
            "mysql" => Ok(DatabaseProvider::MySQL),
            "sqlserver" | "mssql" => Ok(DatabaseProvider::SqlServer),
            "mongodb" | "mongo" => Ok(DatabaseProvider::MongoDB),
            _ => Err(AppError::Validation(format!("Unsupported database provider: {}", s))),
        }
    }
}

impl fmt::Display for DatabaseProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decrypted connection settings for one data source.
///
/// Either `connection_string` or the discrete host fields are used for
/// databases; `base_url`, `api_key` and `headers` apply to API sources.
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_string: Option<String>,
    #[serde(default)]
    pub ssl: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redact = |v: &Option<String>| v.as_ref().map(|_| "***");
        f.debug_struct("ConnectionConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("password", &redact(&self.password))
            .field("connection_string", &redact(&self.connection_string))
            .field("ssl", &self.ssl)
            .field("base_url", &self.base_url)
            .field("api_key", &redact(&self.api_key))
            .finish()
    }
}

impl ConnectionConfig {
    /// Copy safe to return to callers: secrets are replaced with `***`
    pub fn redacted(&self) -> Self {
        let mask = |v: &Option<String>| v.as_ref().map(|_| "***".to_string());
        Self {
            password: mask(&self.password),
            connection_string: mask(&self.connection_string),
            api_key: mask(&self.api_key),
            ..self.clone()
        }
    }

    /// Connection URL for `provider`, preferring an explicit connection string.
    pub fn connection_url(&self, provider: DatabaseProvider) -> Result<String, AppError> {
        if let Some(conn_str) = self.connection_string.as_deref().filter(|s| !s.trim().is_empty()) {
            return Ok(conn_str.trim().to_string());
        }

        let host = self
            .host
            .as_deref()
            .filter(|h| !h.trim().is_empty())
            .ok_or_else(|| {
                AppError::Validation(format!(
                    "Connection config for {} requires either connectionString or host",
                    provider
                ))
            })?;

        let mut url = Url::parse(&format!("{}://{}", provider.url_scheme(), host.trim()))
            .map_err(|e| AppError::Validation(format!("Invalid host '{}': {}", host, e)))?;

        url.set_port(Some(self.port.unwrap_or_else(|| provider.default_port())))
            .map_err(|_| AppError::Validation(format!("Cannot set port on host '{}'", host)))?;

        if let Some(username) = self.username.as_deref() {
            url.set_username(username)
                .map_err(|_| AppError::Validation("Cannot set username on connection URL".to_string()))?;
        }
        if let Some(password) = self.password.as_deref() {
            url.set_password(Some(password))
                .map_err(|_| AppError::Validation("Cannot set password on connection URL".to_string()))?;
        }
        if let Some(database) = self.database.as_deref() {
            url.set_path(database);
        }

        Ok(url.to_string())
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    #[serde(alias = "get")]
    Get,
    #[serde(alias = "post")]
    Post,
}

/// Per-call location of the data inside a source
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceConfig {
    /// Storage key of an uploaded file
    #[serde(default)]
    pub file_path: Option<String>,
    /// Original file name; its extension selects the parser
    #[serde(default)]
    pub file_name: Option<String>,
    /// Table or collection for DATABASE sources (defaults to `dataset`)
    #[serde(default)]
    pub table: Option<String>,
    /// Endpoint for API sources, absolute or relative to `baseUrl`
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub method: HttpMethod,
    #[serde(default)]
    pub body: Option<serde_json::Value>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

/// A catalog record describing where data lives
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataSource {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub source_type: SourceType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<DatabaseProvider>,
    #[serde(default)]
    pub connection_config: ConnectionConfig,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DataSource {
    pub fn new(
        name: String,
        source_type: SourceType,
        provider: Option<DatabaseProvider>,
        connection_config: ConnectionConfig,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            name,
            source_type,
            provider,
            connection_config,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn redacted(&self) -> Self {
        Self {
            connection_config: self.connection_config.redacted(),
            ..self.clone()
        }
    }

    /// Provider of a DATABASE source, required for database operations
    pub fn require_provider(&self) -> Result<DatabaseProvider, AppError> {
        self.provider.ok_or_else(|| {
            AppError::Validation(format!("Data source '{}' has no database provider", self.name))
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateDataSourceRequest {
    pub name: String,
    #[serde(rename = "type")]
    pub source_type: SourceType,
    #[serde(default)]
    pub provider: Option<DatabaseProvider>,
    #[serde(default)]
    pub connection_config: ConnectionConfig,
}

impl CreateDataSourceRequest {
    pub fn validate(&self) -> Result<(), AppError> {
        if self.name.trim().is_empty() {
            return Err(AppError::Validation("Data source name cannot be empty".to_string()));
        }
        match (self.source_type, self.provider) {
            (SourceType::Database, None) => Err(AppError::Validation(
                "Database sources require a provider".to_string(),
            )),
            (SourceType::Database, Some(_)) | (_, None) => Ok(()),
            (other, Some(_)) => Err(AppError::Validation(format!(
                "Provider is only valid for DATABASE sources, not {}",
                other
            ))),
        }
    }

    pub fn into_data_source(self) -> DataSource {
        DataSource::new(
            self.name.trim().to_string(),
            self.source_type,
            self.provider,
            self.connection_config,
        )
    }
}

/// Partial update; omitted fields keep their stored value
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateDataSourceRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub connection_config: Option<ConnectionConfig>,
}

impl UpdateDataSourceRequest {
    /// Apply to `source`, bumping `updated_at`
    pub fn apply(self, source: &mut DataSource) -> Result<(), AppError> {
        if let Some(name) = self.name {
            if name.trim().is_empty() {
                return Err(AppError::Validation("Data source name cannot be empty".to_string()));
            }
            source.name = name.trim().to_string();
        }
        if let Some(config) = self.connection_config {
            source.connection_config = config;
        }
        source.updated_at = Utc::now();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_parsing() {
        assert_eq!("postgres".parse::<DatabaseProvider>().unwrap(), DatabaseProvider::PostgreSQL);
        assert_eq!("MSSQL".parse::<DatabaseProvider>().unwrap(), DatabaseProvider::SqlServer);
        assert!("oracle".parse::<DatabaseProvider>().is_err());

        let provider: DatabaseProvider = serde_json::from_str("\"MONGODB\"").unwrap();
        assert_eq!(provider, DatabaseProvider::MongoDB);
    }

    #[test]
    fn test_connection_url_from_parts() {
        let config = ConnectionConfig {
            host: Some("db.internal".to_string()),
            database: Some("reports".to_string()),
            username: Some("analyst".to_string()),
            password: Some("p@ss word".to_string()),
            ..Default::default()
        };
        let url = config.connection_url(DatabaseProvider::PostgreSQL).unwrap();
        assert!(url.starts_with("postgresql://analyst:"));
        assert!(url.ends_with("@db.internal:5432/reports"));
        assert!(!url.contains("p@ss word"));
    }

    #[test]
    fn test_connection_url_requires_host() {
        let config = ConnectionConfig::default();
        assert!(matches!(
            config.connection_url(DatabaseProvider::MySQL),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let config = ConnectionConfig {
            password: Some("hunter2".to_string()),
            api_key: Some("sk-live".to_string()),
            ..Default::default()
        };
        let debug = format!("{:?}", config);
        assert!(!debug.contains("hunter2"));
        assert!(!debug.contains("sk-live"));
    }

    #[test]
    fn test_data_source_deserializes_type_field() {
        let json = serde_json::json!({
            "id": "ds-1",
            "name": "Sales",
            "type": "DATABASE",
            "provider": "MYSQL",
            "connectionConfig": { "host": "localhost", "database": "sales" },
            "createdAt": "2024-01-01T00:00:00Z",
            "updatedAt": "2024-01-01T00:00:00Z"
        });
        let source: DataSource = serde_json::from_value(json).unwrap();
        assert_eq!(source.source_type, SourceType::Database);
        assert_eq!(source.require_provider().unwrap(), DatabaseProvider::MySQL);
    }

    #[test]
    fn test_create_request_validation() {
        let request: CreateDataSourceRequest = serde_json::from_value(serde_json::json!({
            "name": "Sales",
            "type": "DATABASE"
        }))
        .unwrap();
        assert!(request.validate().is_err());

        let request: CreateDataSourceRequest = serde_json::from_value(serde_json::json!({
            "name": "Upload",
            "type": "FILE",
            "provider": "POSTGRESQL"
        }))
        .unwrap();
        assert!(request.validate().is_err());

        let request: CreateDataSourceRequest = serde_json::from_value(serde_json::json!({
            "name": " Orders ",
            "type": "API",
            "connectionConfig": { "baseUrl": "https://api.example.com" }
        }))
        .unwrap();
        assert!(request.validate().is_ok());
        assert_eq!(request.into_data_source().name, "Orders");
    }

    #[test]
    fn test_update_bumps_timestamp() {
        let mut source = DataSource::new("a".to_string(), SourceType::File, None, ConnectionConfig::default());
        let before = source.updated_at;
        UpdateDataSourceRequest {
            name: Some("b".to_string()),
            ..Default::default()
        }
        .apply(&mut source)
        .unwrap();
        assert_eq!(source.name, "b");
        assert!(source.updated_at >= before);

        let blank = UpdateDataSourceRequest {
            name: Some("  ".to_string()),
            ..Default::default()
        };
        assert!(blank.apply(&mut source).is_err());
    }

    #[test]
    fn test_redacted_source() {
        let source = DataSource::new(
            "db".to_string(),
            SourceType::Database,
            Some(DatabaseProvider::MySQL),
            ConnectionConfig {
                host: Some("localhost".to_string()),
                password: Some("hunter2".to_string()),
                ..Default::default()
            },
        );
        let redacted = source.redacted();
        assert_eq!(redacted.connection_config.password.as_deref(), Some("***"));
        assert_eq!(redacted.connection_config.host.as_deref(), Some("localhost"));
        assert!(redacted.connection_config.api_key.is_none());
    }
}
