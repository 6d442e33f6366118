use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::api::handlers::{cache, data_source, query, AppState};
use crate::api::middleware::AppError;
use crate::config::Config;
use crate::services::database::ConnectorRegistry;
use crate::services::{
    ApiClient, ConnectionPoolManager, DataSourceService, DbService, FileStore, HttpBlobStore,
    LocalFileStore, QueryCache, SecretCipher,
};
use crate::storage::SqliteStorage;

/// Wire services from configuration
pub async fn build_state(config: Config) -> Result<AppState, AppError> {
    let cipher = config
        .security
        .encryption_key
        .as_deref()
        .filter(|k| !k.is_empty())
        .map(SecretCipher::from_secret)
        .transpose()?;
    let storage = Arc::new(SqliteStorage::new(&config.catalog.url, cipher).await?);

    let file_store: Arc<dyn FileStore> = if config.storage.uses_local_files() {
        tracing::info!("Reading uploaded files from {}", config.storage.upload_dir);
        Arc::new(LocalFileStore::new(&config.storage.upload_dir))
    } else {
        let base_url = config.storage.blob_base_url.as_deref().ok_or_else(|| {
            AppError::Validation(format!(
                "BLOB_BASE_URL is required when APP_ENV is {}",
                config.storage.environment
            ))
        })?;
        tracing::info!("Reading uploaded files from blob storage at {}", base_url);
        Arc::new(HttpBlobStore::new(base_url, config.query.timeout())?)
    };

    let pool_manager = Arc::new(ConnectionPoolManager::new());
    let registry = ConnectorRegistry::with_defaults(pool_manager.clone(), config.query.timeout());
    let api_client = Arc::new(ApiClient::new(config.query.timeout())?);
    let db_service = Arc::new(DbService::new(
        registry,
        api_client.clone(),
        config.query.default_limit,
    ));
    let cache = Arc::new(QueryCache::new(
        config.cache.max_entries,
        config.cache.default_ttl(),
    ));

    Ok(AppState {
        storage,
        data_sources: Arc::new(DataSourceService::new(db_service, api_client, file_store, cache)),
        pool_manager,
        config,
    })
}

/// Create router with application state
pub fn create_router_with_state(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route(
            "/api/datasources",
            get(data_source::list_data_sources).post(data_source::create_data_source),
        )
        .route("/api/datasources/test", post(data_source::test_connection_settings))
        .route(
            "/api/datasources/{id}",
            get(data_source::get_data_source)
                .put(data_source::update_data_source)
                .delete(data_source::delete_data_source),
        )
        .route("/api/datasources/{id}/data", post(data_source::fetch_data))
        .route("/api/datasources/{id}/test", post(data_source::test_data_source))
        .route("/api/datasources/{id}/tables", get(data_source::list_tables))
        .route(
            "/api/datasources/{id}/tables/{table}/schema",
            get(data_source::get_table_schema),
        )
        .route("/api/datasources/{id}/query", post(query::execute_query))
        .route("/api/datasources/{id}/schema", post(data_source::detect_schema))
        .route("/api/datasources/{id}/profile", post(data_source::profile_data))
        .route("/api/query/build", post(query::build_query))
        .route("/api/query/validate", post(query::validate_query))
        .route("/api/query/parse", post(query::parse_query))
        .route("/api/query/optimize", post(query::optimize_query))
        .route("/api/query/suggestions", post(query::suggest_optimizations))
        .route("/api/query/analyze", post(query::analyze_performance))
        .route("/api/cache/stats", get(cache::cache_stats))
        .route("/api/cache/invalidate", post(cache::invalidate_cache))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> &'static str {
    "OK"
}
