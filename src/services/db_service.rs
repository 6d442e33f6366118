use std::sync::Arc;
use std::time::Instant;

use crate::api::middleware::AppError;
use crate::models::{
    ConnectionConfig, ConnectionTestResult, DatabaseProvider, DatabaseTable, ParameterizedQuery,
    QueryResult, SourceType, TableSchema,
};
use crate::services::api_source::ApiClient;
use crate::services::database::{ConnectorRegistry, MongoFindSpec};
use crate::validation::SqlValidator;

/// Database service: connection checks, introspection and query execution
/// for every provider, dispatched through the connector registry
pub struct DbService {
    registry: ConnectorRegistry,
    api_client: Arc<ApiClient>,
    default_limit: u64,
}

impl DbService {
    pub fn new(registry: ConnectorRegistry, api_client: Arc<ApiClient>, default_limit: u64) -> Self {
        Self {
            registry,
            api_client,
            default_limit,
        }
    }

    pub fn registry(&self) -> &ConnectorRegistry {
        &self.registry
    }

    /// Test whether a source is reachable.
    ///
    /// Failures are reported in the result rather than as an error.
    pub async fn test_connection(
        &self,
        source_type: SourceType,
        provider: Option<DatabaseProvider>,
        config: &ConnectionConfig,
    ) -> ConnectionTestResult {
        let start = Instant::now();

        let outcome: Result<String, AppError> = match source_type {
            SourceType::File => Ok("File sources do not need a connection".to_string()),
            SourceType::Api => self
                .api_client
                .ping(config)
                .await
                .map(|_| "API endpoint is reachable".to_string()),
            SourceType::Cloud => Err(AppError::Validation(
                "Cloud storage sources are not supported".to_string(),
            )),
            SourceType::Database => match provider {
                Some(provider) => self.test_database(provider, config).await,
                None => Err(AppError::Validation("Database sources require a provider".to_string())),
            },
        };

        let latency = start.elapsed().as_millis() as u64;
        match outcome {
            Ok(message) => {
                tracing::info!("Connection test succeeded for {} source in {}ms", source_type, latency);
                ConnectionTestResult {
                    success: true,
                    message,
                    latency,
                    error: None,
                }
            }
            Err(e) => {
                tracing::warn!("Connection test failed for {} source: {}", source_type, e);
                ConnectionTestResult {
                    success: false,
                    message: "Connection failed".to_string(),
                    latency,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    async fn test_database(&self, provider: DatabaseProvider, config: &ConnectionConfig) -> Result<String, AppError> {
        let connector = self.registry.get(provider)?;
        connector.test_connection(config).await?;
        Ok(format!("Successfully connected to {}", provider))
    }

    pub async fn list_tables(
        &self,
        provider: DatabaseProvider,
        config: &ConnectionConfig,
    ) -> Result<Vec<DatabaseTable>, AppError> {
        let tables = self.registry.get(provider)?.list_tables(config).await?;
        tracing::info!("Listed {} tables from {} database", tables.len(), provider);
        tracing::debug!(
            "Tables: {:?}",
            tables.iter().map(DatabaseTable::qualified_name).collect::<Vec<_>>()
        );
        Ok(tables)
    }

    /// Run a caller-supplied read query with a row limit.
    ///
    /// SQL must be a single SELECT; a limit (`limit` or the configured
    /// default) is added only when the query has none. MongoDB takes a JSON
    /// find specification and gets the limit when it sets none.
    pub async fn execute_query(
        &self,
        provider: DatabaseProvider,
        config: &ConnectionConfig,
        sql: &str,
        limit: Option<u64>,
    ) -> Result<QueryResult, AppError> {
        let limit = limit.unwrap_or(self.default_limit);

        let query = match provider.dialect() {
            Some(dialect) => {
                SqlValidator::validate_select_only(dialect, sql)?;
                let (limited_sql, applied) = SqlValidator::apply_row_limit(dialect, sql, limit);
                if applied {
                    tracing::debug!("Added row limit {} to {} query", limit, provider);
                }
                ParameterizedQuery::raw(limited_sql)
            }
            None => {
                let mut spec = MongoFindSpec::from_query_text(sql)?;
                spec.limit.get_or_insert(limit);
                ParameterizedQuery::raw(spec.to_query_text()?)
            }
        };

        self.run(provider, config, &query).await
    }

    /// Run a query produced by the fetch path; it is trusted and not re-validated
    pub async fn run(
        &self,
        provider: DatabaseProvider,
        config: &ConnectionConfig,
        query: &ParameterizedQuery,
    ) -> Result<QueryResult, AppError> {
        let connector = self.registry.get(provider)?;
        let result = connector.execute_query(config, query).await.map_err(|e| {
            tracing::error!("{} query failed: {}", provider, e);
            e
        })?;

        tracing::info!(
            "{} query returned {} rows in {}ms",
            provider,
            result.row_count,
            result.execution_time_ms
        );
        Ok(result)
    }

    pub async fn get_table_schema(
        &self,
        provider: DatabaseProvider,
        config: &ConnectionConfig,
        table_name: &str,
    ) -> Result<TableSchema, AppError> {
        if table_name.trim().is_empty() {
            return Err(AppError::Validation("Table name is required".to_string()));
        }
        self.registry.get(provider)?.get_table_schema(config, table_name).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::time::Duration;

    use crate::models::{TableColumn, TableKind};
    use crate::services::database::DatabaseConnector;

    /// Connector that records queries and answers with canned rows
    struct RecordingConnector {
        provider: DatabaseProvider,
        queries: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl DatabaseConnector for RecordingConnector {
        fn provider(&self) -> DatabaseProvider {
            self.provider
        }

        async fn test_connection(&self, config: &ConnectionConfig) -> Result<(), AppError> {
            match config.host.as_deref() {
                Some("down") => Err(AppError::Connection("connection refused".to_string())),
                _ => Ok(()),
            }
        }

        async fn list_tables(&self, _config: &ConnectionConfig) -> Result<Vec<DatabaseTable>, AppError> {
            Ok(vec![DatabaseTable {
                name: "users".to_string(),
                schema: Some("public".to_string()),
                table_type: TableKind::Table,
            }])
        }

        async fn execute_query(
            &self,
            _config: &ConnectionConfig,
            query: &ParameterizedQuery,
        ) -> Result<QueryResult, AppError> {
            self.queries.lock().push(query.sql.clone());
            let row = crate::models::row_from_pairs(vec![("id".to_string(), json!(1))]);
            Ok(QueryResult::new(vec!["id".to_string()], vec![row], 1))
        }

        async fn get_table_schema(
            &self,
            _config: &ConnectionConfig,
            table_name: &str,
        ) -> Result<TableSchema, AppError> {
            Ok(TableSchema {
                table_name: table_name.to_string(),
                columns: vec![TableColumn {
                    name: "id".to_string(),
                    data_type: "integer".to_string(),
                    is_nullable: false,
                    is_primary_key: true,
                    default_value: None,
                    max_length: None,
                }],
            })
        }
    }

    fn service(provider: DatabaseProvider) -> (DbService, Arc<RecordingConnector>) {
        let connector = Arc::new(RecordingConnector {
            provider,
            queries: Mutex::new(Vec::new()),
        });
        let mut registry = ConnectorRegistry::default();
        registry.register(connector.clone());
        let api = Arc::new(ApiClient::new(Duration::from_secs(1)).unwrap());
        (DbService::new(registry, api, 1000), connector)
    }

    fn host(host: &str) -> ConnectionConfig {
        ConnectionConfig {
            host: Some(host.to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_connection_results() {
        let (service, _) = service(DatabaseProvider::PostgreSQL);

        let ok = service
            .test_connection(SourceType::Database, Some(DatabaseProvider::PostgreSQL), &host("db"))
            .await;
        assert!(ok.success);
        assert!(ok.error.is_none());

        let down = service
            .test_connection(SourceType::Database, Some(DatabaseProvider::PostgreSQL), &host("down"))
            .await;
        assert!(!down.success);
        assert!(down.error.unwrap().contains("connection refused"));

        let file = service.test_connection(SourceType::File, None, &ConnectionConfig::default()).await;
        assert!(file.success);

        let cloud = service.test_connection(SourceType::Cloud, None, &ConnectionConfig::default()).await;
        assert!(!cloud.success);
    }

    #[tokio::test]
    async fn test_missing_driver_is_reported() {
        let (service, _) = service(DatabaseProvider::PostgreSQL);
        let result = service
            .test_connection(SourceType::Database, Some(DatabaseProvider::MongoDB), &host("db"))
            .await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("--features mongodb"));

        let err = service.list_tables(DatabaseProvider::MongoDB, &host("db")).await.unwrap_err();
        assert!(matches!(err, AppError::DriverNotInstalled { .. }));
    }

    #[tokio::test]
    async fn test_execute_query_adds_limit_once() {
        let (service, connector) = service(DatabaseProvider::PostgreSQL);
        let config = host("db");

        service
            .execute_query(DatabaseProvider::PostgreSQL, &config, "SELECT * FROM users", None)
            .await
            .unwrap();
        service
            .execute_query(DatabaseProvider::PostgreSQL, &config, "SELECT * FROM users LIMIT 5", Some(50))
            .await
            .unwrap();

        let queries = connector.queries.lock().clone();
        assert_eq!(queries, vec!["SELECT * FROM users LIMIT 1000", "SELECT * FROM users LIMIT 5"]);
    }

    #[tokio::test]
    async fn test_sql_server_uses_top() {
        let (service, connector) = service(DatabaseProvider::SqlServer);
        service
            .execute_query(DatabaseProvider::SqlServer, &host("db"), "SELECT name FROM users", Some(10))
            .await
            .unwrap();
        assert_eq!(connector.queries.lock()[0], "SELECT TOP 10 name FROM users");
    }

    #[tokio::test]
    async fn test_execute_query_rejects_writes() {
        let (service, connector) = service(DatabaseProvider::MySQL);
        let result = service
            .execute_query(DatabaseProvider::MySQL, &host("db"), "DROP TABLE users", None)
            .await;
        assert!(matches!(result, Err(AppError::Validation(_))));
        assert!(connector.queries.lock().is_empty());
    }

    #[tokio::test]
    async fn test_mongo_query_gets_default_limit() {
        let (service, connector) = service(DatabaseProvider::MongoDB);
        service
            .execute_query(DatabaseProvider::MongoDB, &host("db"), r#"{"collection":"users"}"#, Some(25))
            .await
            .unwrap();
        let sent = MongoFindSpec::from_query_text(&connector.queries.lock()[0]).unwrap();
        assert_eq!(sent.limit, Some(25));
    }

    #[tokio::test]
    async fn test_table_schema_requires_name() {
        let (service, _) = service(DatabaseProvider::PostgreSQL);
        assert!(service
            .get_table_schema(DatabaseProvider::PostgreSQL, &host("db"), " ")
            .await
            .is_err());
        let schema = service
            .get_table_schema(DatabaseProvider::PostgreSQL, &host("db"), "users")
            .await
            .unwrap();
        assert!(schema.columns[0].is_primary_key);
    }
}
