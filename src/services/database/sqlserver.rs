// SQL Server connector.
//
// Opens a fresh TDS connection per call under the source's connection slot
// and closes it on every exit path.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tiberius::{AuthMethod, Client, ColumnData, Config, EncryptionLevel, FromSql, Query};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};

use super::connector::{split_table_name, with_timeout, DatabaseConnector};
use crate::api::middleware::AppError;
use crate::models::{
    ConnectionConfig, DatabaseProvider, DatabaseTable, ParameterizedQuery, QueryResult, Row,
    TableColumn, TableKind, TableSchema,
};
use crate::services::type_inference::value_to_string;
use crate::services::ConnectionPoolManager;

type SqlServerClient = Client<Compat<TcpStream>>;

pub struct SqlServerConnector {
    pool_manager: Arc<ConnectionPoolManager>,
    timeout: Duration,
}

impl SqlServerConnector {
    pub fn new(pool_manager: Arc<ConnectionPoolManager>, timeout: Duration) -> Self {
        Self { pool_manager, timeout }
    }

    fn tds_config(config: &ConnectionConfig) -> Result<Config, AppError> {
        if let Some(ado) = config.connection_string.as_deref().filter(|s| !s.trim().is_empty()) {
            return Config::from_ado_string(ado)
                .map_err(|e| AppError::Validation(format!("Invalid SQL Server connection string: {}", e)));
        }

        let host = config
            .host
            .as_deref()
            .filter(|h| !h.trim().is_empty())
            .ok_or_else(|| {
                AppError::Validation("SQL Server connection requires either connectionString or host".to_string())
            })?;

        let mut tds = Config::new();
        tds.host(host);
        tds.port(config.port.unwrap_or_else(|| DatabaseProvider::SqlServer.default_port()));
        if let Some(database) = config.database.as_deref() {
            tds.database(database);
        }
        tds.authentication(AuthMethod::sql_server(
            config.username.as_deref().unwrap_or_default(),
            config.password.as_deref().unwrap_or_default(),
        ));
        if config.ssl {
            tds.encryption(EncryptionLevel::Required);
        } else {
            tds.encryption(EncryptionLevel::NotSupported);
        }
        tds.trust_cert();
        Ok(tds)
    }

    async fn connect(tds: Config) -> Result<SqlServerClient, AppError> {
        let tcp = TcpStream::connect(tds.get_addr())
            .await
            .map_err(|e| AppError::Connection(format!("Failed to reach SQL Server: {}", e)))?;
        tcp.set_nodelay(true)
            .map_err(|e| AppError::Connection(format!("Failed to configure socket: {}", e)))?;

        Client::connect(tds, tcp.compat_write())
            .await
            .map_err(|e| AppError::Connection(format!("SQL Server login failed: {}", e)))
    }

    /// Run `work` on a fresh connection, closing it whether or not `work` fails
    async fn with_client<T, F, Fut>(&self, config: &ConnectionConfig, work: F) -> Result<T, AppError>
    where
        F: FnOnce(SqlServerClient) -> Fut + Send,
        Fut: Future<Output = (SqlServerClient, Result<T, AppError>)> + Send,
        T: Send,
    {
        let tds = Self::tds_config(config)?;
        let slot_key = format!("mssql://{}", tds.get_addr());
        let _slot = self.pool_manager.acquire_slot(&slot_key).await?;

        with_timeout(self.timeout, async {
            let client = Self::connect(tds).await?;
            let (client, result) = work(client).await;
            if let Err(e) = client.close().await {
                tracing::warn!("Error closing SQL Server connection: {}", e);
            }
            result
        })
        .await
    }

    async fn fetch_rows(
        client: &mut SqlServerClient,
        sql: &str,
        params: &[Value],
    ) -> Result<(Vec<String>, Vec<Row>), AppError> {
        let mut query = Query::new(sql);
        for param in params {
            match param {
                Value::Null => query.bind(Option::<String>::None),
                Value::Bool(b) => query.bind(*b),
                Value::Number(n) => match n.as_i64() {
                    Some(i) => query.bind(i),
                    None => query.bind(n.as_f64().unwrap_or_default()),
                },
                other => query.bind(value_to_string(other)),
            }
        }

        let stream = query
            .query(client)
            .await
            .map_err(|e| AppError::QueryExecution(format!("Query execution failed: {}", e)))?;
        let rows = stream
            .into_first_result()
            .await
            .map_err(|e| AppError::QueryExecution(format!("Query execution failed: {}", e)))?;

        let columns: Vec<String> = rows
            .first()
            .map(|row| row.columns().iter().map(|c| c.name().to_string()).collect())
            .unwrap_or_default();

        let json_rows = rows
            .into_iter()
            .map(|row| {
                let names: Vec<String> = row.columns().iter().map(|c| c.name().to_string()).collect();
                names
                    .into_iter()
                    .zip(row)
                    .map(|(name, data)| (name, column_data_to_json(data)))
                    .collect()
            })
            .collect();

        Ok((columns, json_rows))
    }
}

#[async_trait]
impl DatabaseConnector for SqlServerConnector {
    fn provider(&self) -> DatabaseProvider {
        DatabaseProvider::SqlServer
    }

    async fn test_connection(&self, config: &ConnectionConfig) -> Result<(), AppError> {
        self.with_client(config, |mut client| async move {
            let result = Self::fetch_rows(&mut client, "SELECT 1 AS ok", &[]).await.map(|_| ());
            (client, result)
        })
        .await
    }

    async fn list_tables(&self, config: &ConnectionConfig) -> Result<Vec<DatabaseTable>, AppError> {
        self.with_client(config, |mut client| async move {
            let result = Self::fetch_rows(
                &mut client,
                "SELECT TABLE_SCHEMA, TABLE_NAME, TABLE_TYPE FROM INFORMATION_SCHEMA.TABLES ORDER BY TABLE_SCHEMA, TABLE_NAME",
                &[],
            )
            .await
            .map(|(_, rows)| {
                rows.iter()
                    .map(|row| DatabaseTable {
                        schema: row.get("TABLE_SCHEMA").and_then(Value::as_str).map(str::to_string),
                        name: row.get("TABLE_NAME").map(value_to_string).unwrap_or_default(),
                        table_type: match row.get("TABLE_TYPE").and_then(Value::as_str) {
                            Some("VIEW") => TableKind::View,
                            _ => TableKind::Table,
                        },
                    })
                    .collect()
            });
            (client, result)
        })
        .await
    }

    async fn execute_query(
        &self,
        config: &ConnectionConfig,
        query: &ParameterizedQuery,
    ) -> Result<QueryResult, AppError> {
        let sql = query.sql.clone();
        let params = query.params.clone();
        tracing::debug!("Executing SQL Server query: {}", sql);

        self.with_client(config, |mut client| async move {
            let start_time = Instant::now();
            let result = Self::fetch_rows(&mut client, &sql, &params)
                .await
                .map(|(columns, rows)| QueryResult::new(columns, rows, start_time.elapsed().as_millis() as u64));
            (client, result)
        })
        .await
    }

    async fn get_table_schema(
        &self,
        config: &ConnectionConfig,
        table_name: &str,
    ) -> Result<TableSchema, AppError> {
        let (schema, table) = split_table_name(table_name);
        let params = vec![json!(schema.unwrap_or("dbo")), json!(table)];
        let owned_name = table_name.to_string();

        self.with_client(config, |mut client| async move {
            let result = Self::fetch_rows(
                &mut client,
                r#"
                SELECT
                    c.COLUMN_NAME,
                    c.DATA_TYPE,
                    c.IS_NULLABLE,
                    c.COLUMN_DEFAULT,
                    c.CHARACTER_MAXIMUM_LENGTH,
                    CASE WHEN pk.COLUMN_NAME IS NOT NULL THEN 1 ELSE 0 END AS IS_PRIMARY_KEY
                FROM INFORMATION_SCHEMA.COLUMNS c
                LEFT JOIN (
                    SELECT ku.COLUMN_NAME
                    FROM INFORMATION_SCHEMA.TABLE_CONSTRAINTS tc
                    JOIN INFORMATION_SCHEMA.KEY_COLUMN_USAGE ku
                        ON tc.CONSTRAINT_NAME = ku.CONSTRAINT_NAME
                    WHERE tc.CONSTRAINT_TYPE = 'PRIMARY KEY'
                        AND tc.TABLE_SCHEMA = @P1 AND tc.TABLE_NAME = @P2
                ) pk ON c.COLUMN_NAME = pk.COLUMN_NAME
                WHERE c.TABLE_SCHEMA = @P1 AND c.TABLE_NAME = @P2
                ORDER BY c.ORDINAL_POSITION
                "#,
                &params,
            )
            .await
            .and_then(|(_, rows)| {
                if rows.is_empty() {
                    return Err(AppError::NotFound(format!("Table not found: {}", owned_name)));
                }
                let columns = rows
                    .iter()
                    .map(|row| TableColumn {
                        name: row.get("COLUMN_NAME").map(value_to_string).unwrap_or_default(),
                        data_type: row.get("DATA_TYPE").map(value_to_string).unwrap_or_default(),
                        is_nullable: row.get("IS_NULLABLE").and_then(Value::as_str) == Some("YES"),
                        default_value: row.get("COLUMN_DEFAULT").and_then(Value::as_str).map(str::to_string),
                        max_length: row
                            .get("CHARACTER_MAXIMUM_LENGTH")
                            .and_then(Value::as_i64)
                            .and_then(|v| i32::try_from(v).ok()),
                        is_primary_key: row.get("IS_PRIMARY_KEY").and_then(Value::as_i64) == Some(1),
                    })
                    .collect();
                Ok(TableSchema {
                    table_name: owned_name,
                    columns,
                })
            });
            (client, result)
        })
        .await
    }
}

/// Convert one TDS cell to JSON
fn column_data_to_json(data: ColumnData<'static>) -> Value {
    match &data {
        ColumnData::U8(v) => v.map(|v| json!(v)).unwrap_or(Value::Null),
        ColumnData::I16(v) => v.map(|v| json!(v)).unwrap_or(Value::Null),
        ColumnData::I32(v) => v.map(|v| json!(v)).unwrap_or(Value::Null),
        ColumnData::I64(v) => v.map(|v| json!(v)).unwrap_or(Value::Null),
        ColumnData::F32(v) => v.map(|v| json!(v)).unwrap_or(Value::Null),
        ColumnData::F64(v) => v.map(|v| json!(v)).unwrap_or(Value::Null),
        ColumnData::Bit(v) => v.map(|v| json!(v)).unwrap_or(Value::Null),
        ColumnData::String(v) => v.as_ref().map(|s| json!(s.as_ref())).unwrap_or(Value::Null),
        ColumnData::Guid(v) => v.map(|g| json!(g.to_string())).unwrap_or(Value::Null),
        ColumnData::Numeric(v) => v.map(|n| json!(n.to_string())).unwrap_or(Value::Null),
        ColumnData::Binary(v) => v.as_ref().map(|b| json!(hex::encode(b.as_ref()))).unwrap_or(Value::Null),
        _ => temporal_to_json(&data),
    }
}

fn temporal_to_json(data: &ColumnData<'static>) -> Value {
    if let Ok(Some(ts)) = chrono::NaiveDateTime::from_sql(data) {
        return json!(ts.format("%Y-%m-%dT%H:%M:%S%.f").to_string());
    }
    if let Ok(Some(date)) = chrono::NaiveDate::from_sql(data) {
        return json!(date.to_string());
    }
    if let Ok(Some(ts)) = chrono::DateTime::<chrono::FixedOffset>::from_sql(data) {
        return json!(ts.to_rfc3339());
    }
    if let Ok(Some(time)) = chrono::NaiveTime::from_sql(data) {
        return json!(time.to_string());
    }
    tracing::warn!("Unsupported SQL Server column type returned as null");
    Value::Null
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::borrow::Cow;

    #[test]
    fn test_column_data_to_json() {
        assert_eq!(column_data_to_json(ColumnData::I32(Some(7))), json!(7));
        assert_eq!(column_data_to_json(ColumnData::I32(None)), Value::Null);
        assert_eq!(column_data_to_json(ColumnData::Bit(Some(true))), json!(true));
        assert_eq!(
            column_data_to_json(ColumnData::String(Some(Cow::Borrowed("Alice")))),
            json!("Alice")
        );
    }

    #[test]
    fn test_tds_config_requires_host() {
        let result = SqlServerConnector::tds_config(&ConnectionConfig::default());
        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[test]
    fn test_tds_config_from_parts() {
        let config = ConnectionConfig {
            host: Some("sql.internal".to_string()),
            database: Some("sales".to_string()),
            username: Some("sa".to_string()),
            password: Some("secret".to_string()),
            ..Default::default()
        };
        let tds = SqlServerConnector::tds_config(&config).unwrap();
        assert_eq!(tds.get_addr(), "sql.internal:1433");
    }
}
