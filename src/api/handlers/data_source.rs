use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use std::sync::Arc;

use crate::api::middleware::AppError;
use crate::config::Config;
use crate::models::{
    ConnectionTestResult, CreateDataSourceRequest, DataProfile, DataSource, DatabaseTable,
    FetchOptions, FetchResult, SchemaDetectionResult, SourceConfig, TableSchema,
    UpdateDataSourceRequest,
};
use crate::services::{ConnectionPoolManager, DataSourceService, DbService};
use crate::storage::SqliteStorage;

/// Application state
#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<SqliteStorage>,
    pub data_sources: Arc<DataSourceService>,
    pub pool_manager: Arc<ConnectionPoolManager>,
    pub config: Config,
}

impl AppState {
    pub fn db_service(&self) -> &Arc<DbService> {
        self.data_sources.db_service()
    }

    pub async fn load_source(&self, id: &str) -> Result<DataSource, AppError> {
        self.storage
            .get_data_source(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Data source {} not found", id)))
    }
}

/// Body of a fetch or profile request
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchDataRequest {
    #[serde(default)]
    pub source_config: SourceConfig,
    #[serde(default)]
    pub options: FetchOptions,
    #[serde(default = "default_use_cache")]
    pub use_cache: bool,
}

fn default_use_cache() -> bool {
    true
}

/// List all data sources
pub async fn list_data_sources(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    let sources: Vec<DataSource> = state
        .storage
        .list_data_sources()
        .await?
        .iter()
        .map(DataSource::redacted)
        .collect();

    Ok(Json(serde_json::json!({
        "dataSources": sources
    })))
}

/// Create a new data source
pub async fn create_data_source(
    State(state): State<AppState>,
    Json(payload): Json<CreateDataSourceRequest>,
) -> Result<(StatusCode, Json<DataSource>), AppError> {
    payload.validate()?;

    let source = payload.into_data_source();
    state.storage.save_data_source(&source).await?;
    tracing::info!("Created {} data source {} ({})", source.source_type, source.name, source.id);

    Ok((StatusCode::CREATED, Json(source.redacted())))
}

pub async fn get_data_source(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DataSource>, AppError> {
    let source = state.load_source(&id).await?;
    Ok(Json(source.redacted()))
}

/// Update name or connection settings; cached results of the source are dropped
pub async fn update_data_source(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<UpdateDataSourceRequest>,
) -> Result<Json<DataSource>, AppError> {
    let mut source = state.load_source(&id).await?;
    payload.apply(&mut source)?;
    state.storage.save_data_source(&source).await?;

    let removed = state.data_sources.invalidate_source(&id);
    tracing::info!("Updated data source {} ({} cached results dropped)", id, removed);

    Ok(Json(source.redacted()))
}

pub async fn delete_data_source(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    let source = state.load_source(&id).await?;
    state.storage.delete_data_source(&id).await?;
    state.data_sources.invalidate_source(&id);

    // Drop pooled connections held for the source's URL
    if let Some(provider) = source.provider {
        if let Ok(url) = source.connection_config.connection_url(provider) {
            state.pool_manager.remove_pool(&url).await;
        }
    }

    tracing::info!("Deleted data source {}", id);
    Ok(StatusCode::NO_CONTENT)
}

/// Test a stored data source
pub async fn test_data_source(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ConnectionTestResult>, AppError> {
    let source = state.load_source(&id).await?;
    let result = state
        .db_service()
        .test_connection(source.source_type, source.provider, &source.connection_config)
        .await;
    Ok(Json(result))
}

/// Test connection settings before saving them
pub async fn test_connection_settings(
    State(state): State<AppState>,
    Json(payload): Json<CreateDataSourceRequest>,
) -> Result<Json<ConnectionTestResult>, AppError> {
    let result = state
        .db_service()
        .test_connection(payload.source_type, payload.provider, &payload.connection_config)
        .await;
    Ok(Json(result))
}

pub async fn fetch_data(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<FetchDataRequest>,
) -> Result<Json<FetchResult>, AppError> {
    let source = state.load_source(&id).await?;

    let result = if payload.use_cache {
        state
            .data_sources
            .fetch_data_cached(&source, &payload.source_config, &payload.options)
            .await?
    } else {
        state
            .data_sources
            .fetch_data(&source, &payload.source_config, &payload.options)
            .await?
    };

    Ok(Json(result))
}

pub async fn list_tables(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<DatabaseTable>>, AppError> {
    let source = state.load_source(&id).await?;
    let provider = source.require_provider()?;
    let tables = state
        .db_service()
        .list_tables(provider, &source.connection_config)
        .await?;
    Ok(Json(tables))
}

pub async fn get_table_schema(
    State(state): State<AppState>,
    Path((id, table)): Path<(String, String)>,
) -> Result<Json<TableSchema>, AppError> {
    let source = state.load_source(&id).await?;
    let provider = source.require_provider()?;
    let schema = state
        .db_service()
        .get_table_schema(provider, &source.connection_config, &table)
        .await?;
    Ok(Json(schema))
}

/// Detect column types, keys and relationships of a FILE source
pub async fn detect_schema(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(source_config): Json<SourceConfig>,
) -> Result<Json<SchemaDetectionResult>, AppError> {
    let source = state.load_source(&id).await?;
    let result = state.data_sources.detect_schema(&source, &source_config).await?;
    Ok(Json(result))
}

pub async fn profile_data(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<FetchDataRequest>,
) -> Result<Json<DataProfile>, AppError> {
    let source = state.load_source(&id).await?;
    let profile = state
        .data_sources
        .profile(&source, &payload.source_config, &payload.options)
        .await?;
    Ok(Json(profile))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_request_defaults() {
        let request: FetchDataRequest = serde_json::from_value(serde_json::json!({})).unwrap();
        assert!(request.use_cache);
        assert!(request.options.filters.is_empty());
        assert!(request.source_config.file_path.is_none());

        let request: FetchDataRequest = serde_json::from_value(serde_json::json!({
            "sourceConfig": { "filePath": "a.csv" },
            "options": { "limit": 10, "orderBy": [{ "column": "id", "direction": "desc" }] },
            "useCache": false
        }))
        .unwrap();
        assert!(!request.use_cache);
        assert_eq!(request.options.limit, Some(10));
        assert_eq!(request.source_config.file_path.as_deref(), Some("a.csv"));
    }
}
