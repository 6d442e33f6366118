use axum::{
    extract::{Path, State},
    Json,
};
use serde::Deserialize;

use crate::api::handlers::data_source::AppState;
use crate::api::middleware::AppError;
use crate::models::{
    OptimizationContext, PerformanceAnalysis, QueryBuilderConfig, QueryPlan, QueryResult,
    QueryStatistics, SqlDialect, ValidationResult,
};
use crate::services::{QueryOptimizer, SqlBuilder};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildQueryRequest {
    pub config: QueryBuilderConfig,
    #[serde(default)]
    pub dialect: SqlDialect,
    /// Return placeholders plus a parameter list instead of inlined literals
    #[serde(default)]
    pub parameterized: bool,
}

#[derive(Debug, Deserialize)]
pub struct SqlRequest {
    pub sql: String,
}

#[derive(Debug, Deserialize)]
pub struct OptimizeRequest {
    pub query: String,
    #[serde(default)]
    pub context: Option<OptimizationContext>,
}

#[derive(Debug, Deserialize)]
pub struct AnalyzeRequest {
    pub statistics: QueryStatistics,
    pub plan: QueryPlan,
}

#[derive(Debug, Deserialize)]
pub struct ExecuteQueryRequest {
    pub query: String,
    #[serde(default)]
    pub limit: Option<u64>,
}

/// Render a builder config as SQL
pub async fn build_query(
    Json(payload): Json<BuildQueryRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let validation = SqlBuilder::validate(&payload.config);
    if !validation.valid {
        return Err(AppError::Validation(validation.errors.join("; ")));
    }

    if payload.parameterized {
        let query = SqlBuilder::build_parameterized(&payload.config, payload.dialect)?;
        return Ok(Json(serde_json::json!({
            "sql": query.sql,
            "params": query.params,
        })));
    }

    let sql = SqlBuilder::build(&payload.config, payload.dialect)?;
    Ok(Json(serde_json::json!({ "sql": sql })))
}

pub async fn validate_query(Json(config): Json<QueryBuilderConfig>) -> Json<ValidationResult> {
    Json(SqlBuilder::validate(&config))
}

/// Recover a builder config from SQL text
pub async fn parse_query(
    Json(payload): Json<SqlRequest>,
) -> Result<Json<QueryBuilderConfig>, AppError> {
    Ok(Json(SqlBuilder::parse_sql_query(&payload.sql)?))
}

pub async fn optimize_query(Json(payload): Json<OptimizeRequest>) -> Json<QueryPlan> {
    Json(QueryOptimizer::optimize(&payload.query, payload.context.as_ref()))
}

pub async fn suggest_optimizations(Json(payload): Json<SqlRequest>) -> Json<serde_json::Value> {
    let suggestions = QueryOptimizer::suggest_optimizations(&payload.sql);
    Json(serde_json::json!({ "suggestions": suggestions }))
}

pub async fn analyze_performance(Json(payload): Json<AnalyzeRequest>) -> Json<PerformanceAnalysis> {
    Json(QueryOptimizer::analyze_query_performance(
        &payload.statistics,
        &payload.plan,
    ))
}

/// Execute a read-only query against a DATABASE source
pub async fn execute_query(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<ExecuteQueryRequest>,
) -> Result<Json<QueryResult>, AppError> {
    tracing::info!("Executing query for data source: {}", id);

    let query = payload.query.trim();
    if query.is_empty() {
        return Err(AppError::Validation("Query cannot be empty".to_string()));
    }

    let source = state.load_source(&id).await?;
    let provider = source.require_provider()?;
    let result = state
        .db_service()
        .execute_query(provider, &source.connection_config, query, payload.limit)
        .await?;

    Ok(Json(result))
}
