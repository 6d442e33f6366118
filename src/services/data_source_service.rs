// Data source orchestration.
//
// `fetch_data` dispatches on the source type. FILE and API rows are
// materialized here and run through the in-memory pipeline; DATABASE sources
// receive a parameterized query and their rows are returned as the database
// produced them.

use serde_json::json;
use std::sync::Arc;

use crate::api::middleware::AppError;
use crate::models::{
    DataProfile, DataSource, DatabaseProvider, FetchOptions, FetchResult, ParseOptions,
    ParsedFileData, SchemaDetectionResult, SourceConfig, SourceType,
};
use crate::services::api_source::ApiClient;
use crate::services::data_profiler;
use crate::services::database::{build_mongo_fetch, build_sql_fetch};
use crate::services::db_service::DbService;
use crate::services::file_parser::FileParser;
use crate::services::file_store::FileStore;
use crate::services::query_cache::QueryCache;
use crate::services::query_optimizer::QueryOptimizer;
use crate::services::row_pipeline;
use crate::services::schema_detector;

const FETCH_CACHE_PREFIX: &str = "fetch";

pub struct DataSourceService {
    db_service: Arc<DbService>,
    api_client: Arc<ApiClient>,
    file_store: Arc<dyn FileStore>,
    cache: Arc<QueryCache>,
}

impl DataSourceService {
    pub fn new(
        db_service: Arc<DbService>,
        api_client: Arc<ApiClient>,
        file_store: Arc<dyn FileStore>,
        cache: Arc<QueryCache>,
    ) -> Self {
        Self {
            db_service,
            api_client,
            file_store,
            cache,
        }
    }

    pub fn cache(&self) -> &Arc<QueryCache> {
        &self.cache
    }

    pub fn db_service(&self) -> &Arc<DbService> {
        &self.db_service
    }

    /// Fetch rows from a source with projection, filters, ordering and paging
    pub async fn fetch_data(
        &self,
        source: &DataSource,
        source_config: &SourceConfig,
        options: &FetchOptions,
    ) -> Result<FetchResult, AppError> {
        options.validate()?;

        match source.source_type {
            SourceType::File => self
                .fetch_from_file(source_config, options)
                .await
                .map_err(|e| e.context("Failed to fetch data from file")),
            SourceType::Database => self
                .fetch_from_database(source, source_config, options)
                .await
                .map_err(|e| e.context("Failed to fetch data from database")),
            SourceType::Api => self
                .fetch_from_api(source, source_config, options)
                .await
                .map_err(|e| e.context("Failed to fetch data from API")),
            SourceType::Cloud => Err(AppError::Validation(
                "Cloud storage sources are not supported".to_string(),
            )),
        }
    }

    /// `fetch_data` through the shared cache.
    ///
    /// Keys include the source's `updated_at`, so editing a source stops
    /// serving its old results even before they expire.
    pub async fn fetch_data_cached(
        &self,
        source: &DataSource,
        source_config: &SourceConfig,
        options: &FetchOptions,
    ) -> Result<FetchResult, AppError> {
        let key = QueryCache::generate_key(
            &Self::cache_prefix(&source.id),
            &json!({
                "updatedAt": source.updated_at,
                "sourceConfig": source_config,
                "options": options,
            }),
        );

        self.cache
            .get_or_set(&key, || self.fetch_data(source, source_config, options), None)
            .await
    }

    /// Drop every cached result for one source; returns how many were removed
    pub fn invalidate_source(&self, source_id: &str) -> usize {
        self.cache.invalidate(&Self::cache_prefix(source_id))
    }

    fn cache_prefix(source_id: &str) -> String {
        format!("{}:{}", FETCH_CACHE_PREFIX, source_id)
    }

    /// Load and parse the file behind a FILE source
    pub async fn parse_file(
        &self,
        source_config: &SourceConfig,
        parse_options: ParseOptions,
    ) -> Result<ParsedFileData, AppError> {
        let file_path = source_config
            .file_path
            .clone()
            .filter(|p| !p.trim().is_empty())
            .ok_or_else(|| AppError::Validation("File sources require filePath".to_string()))?;
        let file_name = source_config
            .file_name
            .clone()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| file_path.clone());

        let bytes = self.file_store.read(&file_path).await?;
        tracing::debug!(
            "Read {} bytes for {} from {} store",
            bytes.len(),
            file_name,
            self.file_store.name()
        );

        // Parsing is CPU-bound
        tokio::task::spawn_blocking(move || FileParser::parse(&bytes, &file_name, &parse_options))
            .await
            .map_err(|e| AppError::Internal(format!("File parser task failed: {}", e)))?
    }

    async fn fetch_from_file(
        &self,
        source_config: &SourceConfig,
        options: &FetchOptions,
    ) -> Result<FetchResult, AppError> {
        let parsed = self.parse_file(source_config, ParseOptions::default()).await?;
        let total_count = parsed.row_count;
        let columns = if options.columns.is_empty() {
            parsed.column_names()
        } else {
            options.columns.clone()
        };

        let output = row_pipeline::apply(parsed.rows, options)?;
        Ok(FetchResult {
            columns,
            row_count: output.rows.len(),
            rows: output.rows,
            total_count: Some(total_count),
            filtered_count: Some(output.filtered_count),
        })
    }

    async fn fetch_from_database(
        &self,
        source: &DataSource,
        source_config: &SourceConfig,
        options: &FetchOptions,
    ) -> Result<FetchResult, AppError> {
        let provider = source.require_provider()?;
        let table = source_config.table.as_deref();

        let query = match provider.dialect() {
            Some(dialect) => {
                let query = build_sql_fetch(dialect, table, options)?;
                // Advisory only; the built query runs unchanged
                let plan = QueryOptimizer::optimize(&query.sql, None);
                tracing::debug!(
                    "Fetch query for {}: estimated cost {}, {} rows",
                    source.name,
                    plan.estimated_cost,
                    plan.estimated_rows
                );
                query
            }
            None => {
                let spec = build_mongo_fetch(table, options)?;
                crate::models::ParameterizedQuery::raw(spec.to_query_text()?)
            }
        };

        let result = self
            .db_service
            .run(provider, &source.connection_config, &query)
            .await?;

        let columns = if result.columns.is_empty() && provider == DatabaseProvider::MongoDB {
            options.columns.clone()
        } else {
            result.columns
        };

        Ok(FetchResult {
            columns,
            row_count: result.row_count,
            rows: result.rows,
            total_count: None,
            filtered_count: None,
        })
    }

    async fn fetch_from_api(
        &self,
        source: &DataSource,
        source_config: &SourceConfig,
        options: &FetchOptions,
    ) -> Result<FetchResult, AppError> {
        let rows = self
            .api_client
            .fetch_rows(&source.connection_config, source_config)
            .await?;
        let total_count = rows.len();

        let output = row_pipeline::apply(rows, options)?;
        let columns = output
            .rows
            .first()
            .map(|row| row.keys().cloned().collect())
            .unwrap_or_default();

        Ok(FetchResult {
            columns,
            row_count: output.rows.len(),
            rows: output.rows,
            total_count: Some(total_count),
            filtered_count: Some(output.filtered_count),
        })
    }

    /// Column types, primary key candidates and relationships of a FILE source
    pub async fn detect_schema(
        &self,
        source: &DataSource,
        source_config: &SourceConfig,
    ) -> Result<SchemaDetectionResult, AppError> {
        if source.source_type != SourceType::File {
            return Err(AppError::Validation(format!(
                "Schema detection needs a FILE source, got {}",
                source.source_type
            )));
        }
        let parsed = self
            .parse_file(source_config, ParseOptions::default())
            .await
            .map_err(|e| e.context("Failed to detect schema"))?;
        Ok(schema_detector::detect_schema(&parsed))
    }

    /// Profile the rows a fetch returns.
    ///
    /// FILE sources are profiled with their detected column types; other
    /// sources infer types from the fetched rows.
    pub async fn profile(
        &self,
        source: &DataSource,
        source_config: &SourceConfig,
        options: &FetchOptions,
    ) -> Result<DataProfile, AppError> {
        if source.source_type == SourceType::File && options.columns.is_empty() {
            let parsed = self
                .parse_file(source_config, ParseOptions::default())
                .await
                .map_err(|e| e.context("Failed to profile data"))?;
            let output = row_pipeline::apply(parsed.rows, options)?;
            return Ok(data_profiler::profile_data(&output.rows, &parsed.columns));
        }

        let fetched = self.fetch_data(source, source_config, options).await?;
        Ok(data_profiler::profile_rows(&fetched.rows))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::time::Duration;

    use crate::models::{
        ColumnType, ConnectionConfig, DatabaseTable, FilterCondition, FilterOperator,
        OrderByClause, ParameterizedQuery, QueryResult, SortDirection, TableSchema,
    };
    use crate::services::database::{ConnectorRegistry, DatabaseConnector};

    /// In-memory file store
    #[derive(Default)]
    struct MemoryStore {
        files: Mutex<HashMap<String, Vec<u8>>>,
    }

    #[async_trait]
    impl FileStore for MemoryStore {
        async fn read(&self, key: &str) -> Result<Vec<u8>, AppError> {
            self.files
                .lock()
                .get(key)
                .cloned()
                .ok_or_else(|| AppError::NotFound(format!("File not found: {}", key)))
        }

        async fn write(&self, key: &str, bytes: &[u8]) -> Result<(), AppError> {
            self.files.lock().insert(key.to_string(), bytes.to_vec());
            Ok(())
        }

        fn name(&self) -> &'static str {
            "memory"
        }
    }

    /// Connector that records the query it was sent
    #[derive(Default)]
    struct CapturingConnector {
        last: Mutex<Option<ParameterizedQuery>>,
    }

    #[async_trait]
    impl DatabaseConnector for CapturingConnector {
        fn provider(&self) -> DatabaseProvider {
            DatabaseProvider::PostgreSQL
        }

        async fn test_connection(&self, _config: &ConnectionConfig) -> Result<(), AppError> {
            Ok(())
        }

        async fn list_tables(&self, _config: &ConnectionConfig) -> Result<Vec<DatabaseTable>, AppError> {
            Ok(Vec::new())
        }

        async fn execute_query(
            &self,
            _config: &ConnectionConfig,
            query: &ParameterizedQuery,
        ) -> Result<QueryResult, AppError> {
            *self.last.lock() = Some(query.clone());
            let rows = vec![crate::models::row_from_pairs(vec![("name".to_string(), json!("Alice"))])];
            Ok(QueryResult::new(vec!["name".to_string()], rows, 2))
        }

        async fn get_table_schema(
            &self,
            _config: &ConnectionConfig,
            table_name: &str,
        ) -> Result<TableSchema, AppError> {
            Err(AppError::NotFound(table_name.to_string()))
        }
    }

    struct Fixture {
        service: DataSourceService,
        store: Arc<MemoryStore>,
        connector: Arc<CapturingConnector>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::default());
        let connector = Arc::new(CapturingConnector::default());
        let mut registry = ConnectorRegistry::default();
        registry.register(connector.clone());

        let api = Arc::new(ApiClient::new(Duration::from_secs(1)).unwrap());
        let db = Arc::new(DbService::new(registry, api.clone(), 1000));
        let cache = Arc::new(QueryCache::new(100, Duration::from_secs(60)));
        Fixture {
            service: DataSourceService::new(db, api, store.clone(), cache),
            store,
            connector,
        }
    }

    fn file_source() -> (DataSource, SourceConfig) {
        let source = DataSource::new(
            "people".to_string(),
            SourceType::File,
            None,
            ConnectionConfig::default(),
        );
        let config = SourceConfig {
            file_path: Some("uploads/people.csv".to_string()),
            file_name: Some("people.csv".to_string()),
            ..Default::default()
        };
        (source, config)
    }

    /// 20 rows: id 1..=20, name "user_<id>" with "team" on even ids, score = id * 10
    fn twenty_row_csv() -> Vec<u8> {
        let mut csv = String::from("id,name,score\n");
        for id in 1..=20 {
            let name = if id % 2 == 0 { format!("team_{}", id) } else { format!("user_{}", id) };
            csv.push_str(&format!("{},{},{}\n", id, name, id * 10));
        }
        csv.into_bytes()
    }

    #[tokio::test]
    async fn test_file_fetch_filters_orders_and_pages() {
        let fx = fixture();
        fx.store.write("uploads/people.csv", &twenty_row_csv()).await.unwrap();
        let (source, config) = file_source();

        let options = FetchOptions {
            filters: vec![FilterCondition::new("name", FilterOperator::Contains, json!("TEAM"))],
            order_by: vec![OrderByClause::new("score", SortDirection::Desc)],
            offset: Some(2),
            limit: Some(3),
            columns: vec!["id".to_string(), "score".to_string()],
        };
        let result = fx.service.fetch_data(&source, &config, &options).await.unwrap();

        let ids: Vec<i64> = result.rows.iter().map(|r| r["id"].as_i64().unwrap()).collect();
        assert_eq!(ids, vec![16, 14, 12]);
        assert_eq!(result.columns, vec!["id", "score"]);
        assert_eq!(result.row_count, 3);
        assert_eq!(result.total_count, Some(20));
        assert_eq!(result.filtered_count, Some(10));
        assert!(!result.rows[0].contains_key("name"));
    }

    #[tokio::test]
    async fn test_file_errors_are_wrapped() {
        let fx = fixture();
        let (source, config) = file_source();

        let err = fx
            .service
            .fetch_data(&source, &config, &FetchOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(ref msg) if msg.starts_with("Failed to fetch data from file")));

        fx.store.write("uploads/people.csv", b"x").await.unwrap();
        let parquet = SourceConfig {
            file_name: Some("people.parquet".to_string()),
            ..config
        };
        let err = fx
            .service
            .fetch_data(&source, &parquet, &FetchOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::UnsupportedFormat(_)));
    }

    #[tokio::test]
    async fn test_database_fetch_is_parameterized_and_verbatim() {
        let fx = fixture();
        let source = DataSource::new(
            "warehouse".to_string(),
            SourceType::Database,
            Some(DatabaseProvider::PostgreSQL),
            ConnectionConfig::default(),
        );
        let options = FetchOptions {
            filters: vec![FilterCondition::new("name", FilterOperator::Equals, json!("O'Brien"))],
            limit: Some(5),
            ..Default::default()
        };

        let result = fx
            .service
            .fetch_data(&source, &SourceConfig::default(), &options)
            .await
            .unwrap();
        assert_eq!(result.row_count, 1);
        assert_eq!(result.total_count, None);
        assert_eq!(result.filtered_count, None);

        let sent = fx.connector.last.lock().clone().unwrap();
        assert_eq!(sent.sql, "SELECT * FROM \"dataset\" WHERE \"name\" = $1 LIMIT 5");
        assert_eq!(sent.params, vec![json!("O'Brien")]);
    }

    #[tokio::test]
    async fn test_database_fetch_without_driver() {
        let fx = fixture();
        let source = DataSource::new(
            "orders".to_string(),
            SourceType::Database,
            Some(DatabaseProvider::MongoDB),
            ConnectionConfig::default(),
        );
        let err = fx
            .service
            .fetch_data(&source, &SourceConfig::default(), &FetchOptions::default())
            .await
            .unwrap_err();
        match err {
            AppError::DriverNotInstalled { driver, .. } => {
                assert!(driver.starts_with("Failed to fetch data from database"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_cloud_sources_are_rejected() {
        let fx = fixture();
        let source = DataSource::new(
            "bucket".to_string(),
            SourceType::Cloud,
            None,
            ConnectionConfig::default(),
        );
        let result = fx
            .service
            .fetch_data(&source, &SourceConfig::default(), &FetchOptions::default())
            .await;
        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn test_cached_fetch_and_invalidation() {
        let fx = fixture();
        fx.store.write("uploads/people.csv", &twenty_row_csv()).await.unwrap();
        let (source, config) = file_source();
        let options = FetchOptions {
            limit: Some(2),
            ..Default::default()
        };

        let first = fx.service.fetch_data_cached(&source, &config, &options).await.unwrap();
        // Served from cache even though the file changed
        fx.store.write("uploads/people.csv", b"id\n1\n").await.unwrap();
        let second = fx.service.fetch_data_cached(&source, &config, &options).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(fx.service.cache().get_stats().hits, 1);

        assert_eq!(fx.service.invalidate_source(&source.id), 1);
        let third = fx.service.fetch_data_cached(&source, &config, &options).await.unwrap();
        assert_eq!(third.total_count, Some(1));
    }

    #[tokio::test]
    async fn test_detect_schema_and_profile_for_file() {
        let fx = fixture();
        fx.store
            .write("uploads/people.csv", b"name,age\nAlice,30\nBob,\nCarol,25\n")
            .await
            .unwrap();
        let (source, config) = file_source();

        let schema = fx.service.detect_schema(&source, &config).await.unwrap();
        let age = schema.columns.iter().find(|c| c.column_name == "age").unwrap();
        assert_eq!(age.data_type, ColumnType::Integer);
        assert!(!schema.primary_keys.iter().any(|pk| pk.column_name == "age"));

        let profile = fx
            .service
            .profile(&source, &config, &FetchOptions::default())
            .await
            .unwrap();
        assert_eq!(profile.total_rows, 3);
    }
}
