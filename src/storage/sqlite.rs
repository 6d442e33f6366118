use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row as SqliteRow};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::api::middleware::AppError;
use crate::models::{ConnectionConfig, DataSource, DatabaseProvider, SourceType};
use crate::services::SecretCipher;

const SELECT_DATA_SOURCE: &str = "SELECT id, name, source_type, provider, connection_config, created_at, updated_at FROM data_sources";

/// SQLite catalog of data sources.
/// Uses tokio::Mutex for async-friendly locking
pub struct SqliteStorage {
    conn: Arc<Mutex<Connection>>,
    cipher: Option<SecretCipher>,
}

impl SqliteStorage {
    /// Open (or create) the catalog at `db_path`.
    ///
    /// With a cipher, secret fields of each connection config are encrypted
    /// before they are written and decrypted when read back.
    pub async fn new<P: AsRef<Path>>(db_path: P, cipher: Option<SecretCipher>) -> Result<Self, AppError> {
        // Handle SQLite URL format (sqlite:./path or sqlite://path)
        let path_str = db_path.as_ref().to_string_lossy();
        let clean_path = path_str.trim_start_matches("sqlite:").trim_start_matches("//");

        let conn = Connection::open(clean_path)?;
        if cipher.is_none() {
            tracing::warn!("No encryption key configured; connection secrets are stored in plain text");
        }

        let storage = Self {
            conn: Arc::new(Mutex::new(conn)),
            cipher,
        };
        storage.init_schema().await?;
        Ok(storage)
    }

    async fn init_schema(&self) -> Result<(), AppError> {
        let conn = self.conn.lock().await;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS data_sources (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                source_type TEXT NOT NULL,
                provider TEXT,
                connection_config TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_data_sources_created ON data_sources(created_at DESC)",
            [],
        )?;

        Ok(())
    }

    /// Insert or replace a data source
    pub async fn save_data_source(&self, source: &DataSource) -> Result<(), AppError> {
        let config = match &self.cipher {
            Some(cipher) => cipher.seal_config(&source.connection_config)?,
            None => source.connection_config.clone(),
        };
        let config_json = serde_json::to_string(&config)
            .map_err(|e| AppError::Internal(format!("Failed to serialize connection config: {}", e)))?;

        let conn = self.conn.lock().await;
        conn.execute(
            r#"
            INSERT OR REPLACE INTO data_sources
            (id, name, source_type, provider, connection_config, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            rusqlite::params![
                source.id,
                source.name,
                source.source_type.as_str(),
                source.provider.map(|p| p.as_str()),
                config_json,
                source.created_at.to_rfc3339(),
                source.updated_at.to_rfc3339(),
            ],
        )?;
        tracing::debug!("Saved data source {} ({})", source.name, source.id);
        Ok(())
    }

    /// Get a data source by ID, with its secrets decrypted
    pub async fn get_data_source(&self, id: &str) -> Result<Option<DataSource>, AppError> {
        let stored = {
            let conn = self.conn.lock().await;
            let mut stmt = conn.prepare(&format!("{} WHERE id = ?1", SELECT_DATA_SOURCE))?;
            stmt.query_row(rusqlite::params![id], StoredDataSource::from_row)
                .optional()?
        };

        stored.map(|s| self.open(s)).transpose()
    }

    /// List all data sources, newest first
    pub async fn list_data_sources(&self) -> Result<Vec<DataSource>, AppError> {
        let stored = {
            let conn = self.conn.lock().await;
            let mut stmt = conn.prepare(&format!("{} ORDER BY created_at DESC", SELECT_DATA_SOURCE))?;
            let rows = stmt.query_map([], StoredDataSource::from_row)?;
            rows.collect::<Result<Vec<_>, _>>()?
        };

        stored.into_iter().map(|s| self.open(s)).collect()
    }

    /// Delete a data source; returns whether it existed
    pub async fn delete_data_source(&self, id: &str) -> Result<bool, AppError> {
        let conn = self.conn.lock().await;
        let rows_affected = conn.execute("DELETE FROM data_sources WHERE id = ?1", rusqlite::params![id])?;
        Ok(rows_affected > 0)
    }

    fn open(&self, stored: StoredDataSource) -> Result<DataSource, AppError> {
        let source_type: SourceType = stored.source_type.parse()?;
        let provider = stored
            .provider
            .as_deref()
            .map(str::parse::<DatabaseProvider>)
            .transpose()?;

        let config: ConnectionConfig = serde_json::from_str(&stored.connection_config).map_err(|e| {
            AppError::Storage(format!("Corrupt connection config for data source {}: {}", stored.id, e))
        })?;
        let connection_config = match &self.cipher {
            Some(cipher) => cipher.open_config(&config)?,
            None => config,
        };

        Ok(DataSource {
            id: stored.id,
            name: stored.name,
            source_type,
            provider,
            connection_config,
            created_at: parse_timestamp(&stored.created_at)?,
            updated_at: parse_timestamp(&stored.updated_at)?,
        })
    }
}

/// Catalog row before decoding and decryption
struct StoredDataSource {
    id: String,
    name: String,
    source_type: String,
    provider: Option<String>,
    connection_config: String,
    created_at: String,
    updated_at: String,
}

impl StoredDataSource {
    fn from_row(row: &SqliteRow<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            source_type: row.get(2)?,
            provider: row.get(3)?,
            connection_config: row.get(4)?,
            created_at: row.get(5)?,
            updated_at: row.get(6)?,
        })
    }
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, AppError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| AppError::Storage(format!("Invalid timestamp '{}': {}", value, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn postgres_source() -> DataSource {
        DataSource::new(
            "warehouse".to_string(),
            SourceType::Database,
            Some(DatabaseProvider::PostgreSQL),
            ConnectionConfig {
                host: Some("db.internal".to_string()),
                username: Some("analyst".to_string()),
                password: Some("s3cret".to_string()),
                ..Default::default()
            },
        )
    }

    #[tokio::test]
    async fn test_data_source_crud_operations() {
        let dir = tempdir().unwrap();
        let storage = SqliteStorage::new(dir.path().join("catalog.db"), None).await.unwrap();

        let source = postgres_source();
        storage.save_data_source(&source).await.unwrap();

        let loaded = storage.get_data_source(&source.id).await.unwrap().unwrap();
        assert_eq!(loaded.name, "warehouse");
        assert_eq!(loaded.provider, Some(DatabaseProvider::PostgreSQL));
        assert_eq!(loaded.connection_config, source.connection_config);
        assert_eq!(loaded.created_at.timestamp(), source.created_at.timestamp());

        let file = DataSource::new("upload".to_string(), SourceType::File, None, ConnectionConfig::default());
        storage.save_data_source(&file).await.unwrap();
        assert_eq!(storage.list_data_sources().await.unwrap().len(), 2);

        assert!(storage.delete_data_source(&source.id).await.unwrap());
        assert!(!storage.delete_data_source(&source.id).await.unwrap());
        assert!(storage.get_data_source(&source.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_secrets_are_encrypted_at_rest() {
        let dir = tempdir().unwrap();
        let cipher = SecretCipher::from_secret("catalog-key").unwrap();
        let storage = SqliteStorage::new(dir.path().join("catalog.db"), Some(cipher))
            .await
            .unwrap();

        let source = postgres_source();
        storage.save_data_source(&source).await.unwrap();

        let raw: String = {
            let conn = storage.conn.lock().await;
            conn.query_row(
                "SELECT connection_config FROM data_sources WHERE id = ?1",
                rusqlite::params![source.id],
                |row| row.get(0),
            )
            .unwrap()
        };
        assert!(!raw.contains("s3cret"));
        assert!(raw.contains("analyst"));

        let loaded = storage.get_data_source(&source.id).await.unwrap().unwrap();
        assert_eq!(loaded.connection_config.password.as_deref(), Some("s3cret"));
    }

    #[tokio::test]
    async fn test_wrong_key_fails_to_open() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("catalog.db");
        let source = postgres_source();

        let writer = SqliteStorage::new(&path, Some(SecretCipher::from_secret("key-a").unwrap()))
            .await
            .unwrap();
        writer.save_data_source(&source).await.unwrap();
        drop(writer);

        let reader = SqliteStorage::new(&path, Some(SecretCipher::from_secret("key-b").unwrap()))
            .await
            .unwrap();
        let result = reader.get_data_source(&source.id).await;
        assert!(matches!(result, Err(AppError::Encryption(_))));
    }
}
