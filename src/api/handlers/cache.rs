use axum::{extract::State, Json};
use serde::Deserialize;

use crate::api::handlers::data_source::AppState;
use crate::services::CacheStats;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvalidateRequest {
    /// Drop results of one data source
    #[serde(default)]
    pub data_source_id: Option<String>,
    /// Drop every key starting with this prefix
    #[serde(default)]
    pub prefix: Option<String>,
}

pub async fn cache_stats(State(state): State<AppState>) -> Json<CacheStats> {
    Json(state.data_sources.cache().get_stats())
}

/// Invalidate by data source or key prefix; with neither, clear the cache
pub async fn invalidate_cache(
    State(state): State<AppState>,
    Json(payload): Json<InvalidateRequest>,
) -> Json<serde_json::Value> {
    let cache = state.data_sources.cache();
    let removed = match (payload.data_source_id, payload.prefix) {
        (Some(id), _) => state.data_sources.invalidate_source(&id),
        (None, Some(prefix)) => cache.invalidate(&prefix),
        (None, None) => {
            let size = cache.size();
            cache.clear();
            size
        }
    };

    tracing::info!("Invalidated {} cache entries", removed);
    Json(serde_json::json!({ "removed": removed }))
}
