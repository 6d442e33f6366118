use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;

use crate::api::middleware::AppError;
use crate::models::{
    ConnectionConfig, DatabaseProvider, DatabaseTable, ParameterizedQuery, QueryResult, TableSchema,
};

/// Provider-specific access to one kind of database.
///
/// Every call receives the decrypted connection settings; implementations
/// release the connection they use before returning, on success and failure.
#[async_trait]
pub trait DatabaseConnector: Send + Sync {
    fn provider(&self) -> DatabaseProvider;

    /// Open a connection and run a trivial round trip
    async fn test_connection(&self, config: &ConnectionConfig) -> Result<(), AppError>;

    /// Tables and views (or collections) visible to the configured user
    async fn list_tables(&self, config: &ConnectionConfig) -> Result<Vec<DatabaseTable>, AppError>;

    /// Run a read query. For SQL providers `query.sql` is SQL text with
    /// dialect placeholders; for MongoDB it is a JSON find specification.
    async fn execute_query(
        &self,
        config: &ConnectionConfig,
        query: &ParameterizedQuery,
    ) -> Result<QueryResult, AppError>;

    async fn get_table_schema(
        &self,
        config: &ConnectionConfig,
        table_name: &str,
    ) -> Result<TableSchema, AppError>;
}

/// Bound a database call by `timeout`; dropping the future cancels the I/O
pub async fn with_timeout<T, F>(timeout: Duration, future: F) -> Result<T, AppError>
where
    F: Future<Output = Result<T, AppError>>,
{
    tokio::time::timeout(timeout, future).await.map_err(|_| {
        AppError::QueryExecution(format!("Query timeout after {} seconds", timeout.as_secs()))
    })?
}

/// Split `schema.table` into its parts
pub fn split_table_name(table_name: &str) -> (Option<&str>, &str) {
    match table_name.rsplit_once('.') {
        Some((schema, table)) if !schema.is_empty() => (Some(schema), table),
        _ => (None, table_name),
    }
}
