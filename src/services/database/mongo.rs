// MongoDB connector.
//
// Queries arrive as JSON find specifications. Each call builds its own client
// under the source's connection slot and shuts it down before returning.

use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::bson::{doc, Bson, Document};
use mongodb::options::ClientOptions;
use mongodb::{Client, Database};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::connector::{with_timeout, DatabaseConnector};
use super::fetch_query::MongoFindSpec;
use crate::api::middleware::AppError;
use crate::models::{
    ConnectionConfig, DatabaseProvider, DatabaseTable, ParameterizedQuery, QueryResult, Row,
    TableColumn, TableKind, TableSchema,
};
use crate::services::ConnectionPoolManager;

/// Documents sampled to describe a collection's fields
const SCHEMA_SAMPLE_SIZE: i64 = 100;

pub struct MongoConnector {
    pool_manager: Arc<ConnectionPoolManager>,
    timeout: Duration,
}

impl MongoConnector {
    pub fn new(pool_manager: Arc<ConnectionPoolManager>, timeout: Duration) -> Self {
        Self { pool_manager, timeout }
    }

    /// Run `work` against the configured database, shutting the client down afterwards
    async fn with_database<T, F, Fut>(&self, config: &ConnectionConfig, work: F) -> Result<T, AppError>
    where
        F: FnOnce(Database) -> Fut + Send,
        Fut: Future<Output = Result<T, AppError>> + Send,
        T: Send,
    {
        let url = config.connection_url(DatabaseProvider::MongoDB)?;
        let _slot = self.pool_manager.acquire_slot(&url).await?;

        with_timeout(self.timeout, async {
            let options = ClientOptions::parse(&url)
                .await
                .map_err(|e| AppError::Validation(format!("Invalid MongoDB connection string: {}", e)))?;
            let database_name = config
                .database
                .clone()
                .or_else(|| options.default_database.clone())
                .ok_or_else(|| AppError::Validation("MongoDB connection requires a database name".to_string()))?;

            let client = Client::with_options(options)
                .map_err(|e| AppError::Connection(format!("Failed to create MongoDB client: {}", e)))?;
            let result = work(client.database(&database_name)).await;
            client.shutdown().await;
            result
        })
        .await
    }

    fn document_to_row(document: Document) -> Row {
        match Bson::Document(document).into_relaxed_extjson() {
            Value::Object(map) => map,
            _ => Row::new(),
        }
    }

    fn json_document(map: &Map<String, Value>, what: &str) -> Result<Document, AppError> {
        mongodb::bson::to_document(map)
            .map_err(|e| AppError::Validation(format!("Invalid MongoDB {}: {}", what, e)))
    }
}

#[async_trait]
impl DatabaseConnector for MongoConnector {
    fn provider(&self) -> DatabaseProvider {
        DatabaseProvider::MongoDB
    }

    async fn test_connection(&self, config: &ConnectionConfig) -> Result<(), AppError> {
        self.with_database(config, |db| async move {
            db.run_command(doc! { "ping": 1 })
                .await
                .map(|_| ())
                .map_err(|e| AppError::Connection(format!("MongoDB ping failed: {}", e)))
        })
        .await
    }

    async fn list_tables(&self, config: &ConnectionConfig) -> Result<Vec<DatabaseTable>, AppError> {
        self.with_database(config, |db| async move {
            let mut names = db
                .list_collection_names()
                .await
                .map_err(|e| AppError::QueryExecution(format!("Failed to list collections: {}", e)))?;
            names.sort();
            Ok(names
                .into_iter()
                .map(|name| DatabaseTable {
                    name,
                    schema: None,
                    table_type: TableKind::Collection,
                })
                .collect())
        })
        .await
    }

    async fn execute_query(
        &self,
        config: &ConnectionConfig,
        query: &ParameterizedQuery,
    ) -> Result<QueryResult, AppError> {
        let spec = MongoFindSpec::from_query_text(&query.sql)?;
        tracing::debug!("Executing MongoDB find on {}: {:?}", spec.collection, spec.filter);

        self.with_database(config, |db| async move {
            let start_time = Instant::now();
            let collection = db.collection::<Document>(&spec.collection);

            let mut find = collection.find(Self::json_document(&spec.filter, "filter")?);
            if let Some(projection) = &spec.projection {
                find = find.projection(Self::json_document(projection, "projection")?);
            }
            if let Some(sort) = &spec.sort {
                find = find.sort(Self::json_document(sort, "sort")?);
            }
            if let Some(skip) = spec.skip {
                find = find.skip(skip);
            }
            if let Some(limit) = spec.limit {
                find = find.limit(i64::try_from(limit).unwrap_or(i64::MAX));
            }

            let documents: Vec<Document> = find
                .await
                .map_err(|e| AppError::QueryExecution(format!("Query execution failed: {}", e)))?
                .try_collect()
                .await
                .map_err(|e| AppError::QueryExecution(format!("Failed to read results: {}", e)))?;

            let rows: Vec<Row> = documents.into_iter().map(Self::document_to_row).collect();
            let mut columns: Vec<String> = Vec::new();
            for row in &rows {
                for key in row.keys() {
                    if !columns.contains(key) {
                        columns.push(key.clone());
                    }
                }
            }

            Ok(QueryResult::new(columns, rows, start_time.elapsed().as_millis() as u64))
        })
        .await
    }

    async fn get_table_schema(
        &self,
        config: &ConnectionConfig,
        table_name: &str,
    ) -> Result<TableSchema, AppError> {
        let name = table_name.to_string();

        self.with_database(config, |db| async move {
            let documents: Vec<Document> = db
                .collection::<Document>(&name)
                .find(doc! {})
                .limit(SCHEMA_SAMPLE_SIZE)
                .await
                .map_err(|e| AppError::QueryExecution(format!("Failed to sample collection: {}", e)))?
                .try_collect()
                .await
                .map_err(|e| AppError::QueryExecution(format!("Failed to sample collection: {}", e)))?;

            if documents.is_empty() {
                return Err(AppError::NotFound(format!("Collection is empty or missing: {}", name)));
            }

            Ok(TableSchema {
                table_name: name,
                columns: describe_fields(&documents),
            })
        })
        .await
    }
}

/// Field list of a document sample; fields missing from some documents are nullable
fn describe_fields(documents: &[Document]) -> Vec<TableColumn> {
    let mut order: Vec<String> = Vec::new();
    let mut seen: BTreeMap<String, (String, usize, bool)> = BTreeMap::new();

    for document in documents {
        for (key, value) in document {
            let entry = seen.entry(key.clone()).or_insert_with(|| {
                order.push(key.clone());
                (bson_type_name(value).to_string(), 0, false)
            });
            entry.1 += 1;
            if matches!(value, Bson::Null) {
                entry.2 = true;
            } else if entry.0 == "null" {
                entry.0 = bson_type_name(value).to_string();
            }
        }
    }

    order
        .into_iter()
        .filter_map(|name| {
            let (data_type, count, has_null) = seen.remove(&name)?;
            Some(TableColumn {
                is_primary_key: name == "_id",
                is_nullable: has_null || count < documents.len(),
                data_type,
                default_value: None,
                max_length: None,
                name,
            })
        })
        .collect()
}

fn bson_type_name(value: &Bson) -> &'static str {
    match value {
        Bson::Double(_) => "double",
        Bson::String(_) => "string",
        Bson::Array(_) => "array",
        Bson::Document(_) => "object",
        Bson::Boolean(_) => "bool",
        Bson::Null => "null",
        Bson::Int32(_) => "int",
        Bson::Int64(_) => "long",
        Bson::Decimal128(_) => "decimal",
        Bson::DateTime(_) => "date",
        Bson::ObjectId(_) => "objectId",
        Bson::Binary(_) => "binData",
        Bson::Timestamp(_) => "timestamp",
        _ => "unknown",
    }
}
