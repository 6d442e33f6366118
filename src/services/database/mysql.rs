// MySQL connector using connection pooling
use async_trait::async_trait;
use mysql_async::{prelude::*, Conn, Params, Row as MySqlRow, Value as MySqlValue};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::connector::{split_table_name, with_timeout, DatabaseConnector};
use crate::api::middleware::AppError;
use crate::models::{
    ConnectionConfig, DatabaseProvider, DatabaseTable, ParameterizedQuery, QueryResult, Row,
    TableColumn, TableKind, TableSchema,
};
use crate::services::ConnectionPoolManager;

const SYSTEM_SCHEMAS: &str = "('information_schema', 'mysql', 'performance_schema', 'sys')";

pub struct MySqlConnector {
    pool_manager: Arc<ConnectionPoolManager>,
    timeout: Duration,
}

impl MySqlConnector {
    pub fn new(pool_manager: Arc<ConnectionPoolManager>, timeout: Duration) -> Self {
        Self { pool_manager, timeout }
    }

    /// Get a connection from the pool for this source
    async fn get_conn(&self, config: &ConnectionConfig) -> Result<Conn, AppError> {
        let url = config.connection_url(DatabaseProvider::MySQL)?;
        let pool = self.pool_manager.get_mysql_pool(&url).await?;
        pool.get_conn()
            .await
            .map_err(|e| AppError::Connection(format!("Failed to get MySQL connection from pool: {}", e)))
    }

    /// Helper function to convert a MySQL value to JSON
    fn mysql_value_to_json(mysql_val: MySqlValue) -> Value {
        match mysql_val {
            MySqlValue::NULL => Value::Null,
            MySqlValue::Bytes(bytes) => match String::from_utf8(bytes) {
                Ok(s) => json!(s),
                Err(e) => json!(hex::encode(e.into_bytes())),
            },
            MySqlValue::Int(i) => json!(i),
            MySqlValue::UInt(u) => json!(u),
            MySqlValue::Float(f) => json!(f),
            MySqlValue::Double(d) => json!(d),
            MySqlValue::Date(y, m, d, 0, 0, 0, 0) => json!(format!("{:04}-{:02}-{:02}", y, m, d)),
            MySqlValue::Date(y, m, d, h, min, s, _) => {
                json!(format!("{:04}-{:02}-{:02} {:02}:{:02}:{:02}", y, m, d, h, min, s))
            }
            MySqlValue::Time(is_neg, d, h, m, s, _) => {
                let sign = if is_neg { "-" } else { "" };
                let total_hours = d * 24 + h as u32;
                json!(format!("{}{}:{:02}:{:02}", sign, total_hours, m, s))
            }
        }
    }

    /// Convert a bind value to its MySQL wire value
    fn json_to_mysql_value(value: &Value) -> MySqlValue {
        match value {
            Value::Null => MySqlValue::NULL,
            Value::Bool(b) => MySqlValue::Int(i64::from(*b)),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    MySqlValue::Int(i)
                } else if let Some(u) = n.as_u64() {
                    MySqlValue::UInt(u)
                } else {
                    MySqlValue::Double(n.as_f64().unwrap_or_default())
                }
            }
            Value::String(s) => MySqlValue::Bytes(s.as_bytes().to_vec()),
            other => MySqlValue::Bytes(other.to_string().into_bytes()),
        }
    }

    fn row_to_json(row: MySqlRow) -> Row {
        let columns = row.columns();
        let values = row.unwrap();
        columns
            .iter()
            .zip(values)
            .map(|(column, value)| (column.name_str().to_string(), Self::mysql_value_to_json(value)))
            .collect()
    }
}

#[async_trait]
impl DatabaseConnector for MySqlConnector {
    fn provider(&self) -> DatabaseProvider {
        DatabaseProvider::MySQL
    }

    async fn test_connection(&self, config: &ConnectionConfig) -> Result<(), AppError> {
        with_timeout(self.timeout, async {
            let mut conn = self.get_conn(config).await?;
            conn.ping()
                .await
                .map_err(|e| AppError::Connection(format!("MySQL ping failed: {}", e)))
        })
        .await
    }

    async fn list_tables(&self, config: &ConnectionConfig) -> Result<Vec<DatabaseTable>, AppError> {
        with_timeout(self.timeout, async {
            let mut conn = self.get_conn(config).await?;

            // Restrict to the configured database when there is one
            let rows: Vec<(String, String, String)> = match config.database.as_deref() {
                Some(database) => conn
                    .exec(
                        r#"
                        SELECT TABLE_SCHEMA, TABLE_NAME, TABLE_TYPE
                        FROM information_schema.TABLES
                        WHERE TABLE_SCHEMA = ?
                        ORDER BY TABLE_NAME
                        "#,
                        (database,),
                    )
                    .await,
                None => conn
                    .query(format!(
                        r#"
                        SELECT TABLE_SCHEMA, TABLE_NAME, TABLE_TYPE
                        FROM information_schema.TABLES
                        WHERE TABLE_SCHEMA NOT IN {}
                        ORDER BY TABLE_SCHEMA, TABLE_NAME
                        "#,
                        SYSTEM_SCHEMAS
                    ))
                    .await,
            }
            .map_err(|e| AppError::QueryExecution(format!("Failed to get tables: {}", e)))?;

            Ok(rows
                .into_iter()
                .map(|(schema, name, table_type)| DatabaseTable {
                    name,
                    schema: Some(schema),
                    table_type: if table_type == "VIEW" { TableKind::View } else { TableKind::Table },
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
        with_timeout(self.timeout, async {
            let mut conn = self.get_conn(config).await?;
            let start_time = Instant::now();

            tracing::debug!("Executing MySQL query: {}", query.sql);
            let params = if query.params.is_empty() {
                Params::Empty
            } else {
                Params::Positional(query.params.iter().map(Self::json_to_mysql_value).collect())
            };
            let mut result = conn
                .exec_iter(query.sql.as_str(), params)
                .await
                .map_err(|e| AppError::QueryExecution(format!("Query execution failed: {}", e)))?;

            let columns = result
                .columns()
                .map(|cols| cols.iter().map(|c| c.name_str().to_string()).collect())
                .unwrap_or_default();
            let rows: Vec<MySqlRow> = result
                .collect()
                .await
                .map_err(|e| AppError::QueryExecution(format!("Query execution failed: {}", e)))?;
            result
                .drop_result()
                .await
                .map_err(|e| AppError::QueryExecution(format!("Failed to drain result: {}", e)))?;

            let json_rows = rows.into_iter().map(Self::row_to_json).collect();
            Ok(QueryResult::new(columns, json_rows, start_time.elapsed().as_millis() as u64))
        })
        .await
    }

    async fn get_table_schema(
        &self,
        config: &ConnectionConfig,
        table_name: &str,
    ) -> Result<TableSchema, AppError> {
        let (schema, table) = split_table_name(table_name);

        with_timeout(self.timeout, async {
            let mut conn = self.get_conn(config).await?;
            let query = r#"
                SELECT
                    c.COLUMN_NAME,
                    c.DATA_TYPE,
                    c.IS_NULLABLE,
                    c.COLUMN_DEFAULT,
                    CASE WHEN c.COLUMN_KEY = 'PRI' THEN 1 ELSE 0 END AS is_primary_key,
                    c.CHARACTER_MAXIMUM_LENGTH
                FROM information_schema.COLUMNS c
                WHERE c.TABLE_SCHEMA = COALESCE(?, DATABASE()) AND c.TABLE_NAME = ?
                ORDER BY c.ORDINAL_POSITION
            "#;

            let rows: Vec<(String, String, String, Option<String>, u8, Option<u64>)> = conn
                .exec(query, (schema, table))
                .await
                .map_err(|e| AppError::QueryExecution(format!("Failed to get columns: {}", e)))?;

            if rows.is_empty() {
                return Err(AppError::NotFound(format!("Table not found: {}", table_name)));
            }

            let columns = rows
                .into_iter()
                .map(|(name, data_type, is_nullable, default_value, is_pk, max_length)| TableColumn {
                    name,
                    data_type,
                    is_nullable: is_nullable == "YES",
                    default_value,
                    is_primary_key: is_pk == 1,
                    max_length: max_length.and_then(|v| i32::try_from(v).ok()),
                })
                .collect();

            Ok(TableSchema {
                table_name: table_name.to_string(),
                columns,
            })
        })
        .await
    }
}
