// PostgreSQL connector using connection pooling
use async_trait::async_trait;
use bytes::BytesMut;
use deadpool_postgres::Object;
use serde_json::{json, Value};
use std::error::Error;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_postgres::types::{Format, IsNull, ToSql, Type};
use tokio_postgres::Row as PgRow;

use super::connector::{split_table_name, with_timeout, DatabaseConnector};
use crate::api::middleware::AppError;
use crate::models::{
    ConnectionConfig, DatabaseProvider, DatabaseTable, ParameterizedQuery, QueryResult, Row,
    TableColumn, TableKind, TableSchema,
};
use crate::services::type_inference::value_to_string;
use crate::services::ConnectionPoolManager;

pub struct PostgresConnector {
    pool_manager: Arc<ConnectionPoolManager>,
    timeout: Duration,
}

impl PostgresConnector {
    pub fn new(pool_manager: Arc<ConnectionPoolManager>, timeout: Duration) -> Self {
        Self { pool_manager, timeout }
    }

    /// Get a connection from the pool for this source
    async fn client(&self, config: &ConnectionConfig) -> Result<Object, AppError> {
        let url = config.connection_url(DatabaseProvider::PostgreSQL)?;
        let pool = self.pool_manager.get_postgres_pool(&url).await?;
        pool.get()
            .await
            .map_err(|e| AppError::Connection(format!("Failed to get connection from pool: {}", e)))
    }

    fn query_error(e: tokio_postgres::Error) -> AppError {
        let details = match e.as_db_error() {
            Some(db_error) => format!("Code: {}, Message: {}", db_error.code().code(), db_error.message()),
            None => e.to_string(),
        };
        AppError::QueryExecution(format!("Query execution failed: {}", details))
    }
}

#[async_trait]
impl DatabaseConnector for PostgresConnector {
    fn provider(&self) -> DatabaseProvider {
        DatabaseProvider::PostgreSQL
    }

    async fn test_connection(&self, config: &ConnectionConfig) -> Result<(), AppError> {
        with_timeout(self.timeout, async {
            let client = self.client(config).await?;
            client
                .simple_query("SELECT 1")
                .await
                .map_err(|e| AppError::Connection(format!("PostgreSQL ping failed: {}", e)))?;
            Ok(())
        })
        .await
    }

    async fn list_tables(&self, config: &ConnectionConfig) -> Result<Vec<DatabaseTable>, AppError> {
        with_timeout(self.timeout, async {
            let client = self.client(config).await?;
            let rows = client
                .query(
                    r#"
                    SELECT table_schema::text, table_name::text, table_type::text
                    FROM information_schema.tables
                    WHERE table_schema NOT IN ('pg_catalog', 'information_schema', 'pg_toast')
                    ORDER BY table_schema, table_name
                    "#,
                    &[],
                )
                .await
                .map_err(|e| AppError::QueryExecution(format!("Failed to get tables: {}", e)))?;

            Ok(rows
                .iter()
                .map(|row| {
                    let table_type: String = row.get(2);
                    DatabaseTable {
                        schema: Some(row.get(0)),
                        name: row.get(1),
                        table_type: if table_type == "VIEW" { TableKind::View } else { TableKind::Table },
                    }
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
            let client = self.client(config).await?;
            let start_time = Instant::now();

            let params: Vec<TextParam> = query.params.iter().map(TextParam::from_json).collect();
            let refs: Vec<&(dyn ToSql + Sync)> = params.iter().map(|p| p as &(dyn ToSql + Sync)).collect();

            tracing::debug!("Executing PostgreSQL query: {}", query.sql);
            let statement = client.prepare(&query.sql).await.map_err(Self::query_error)?;
            let rows = client.query(&statement, &refs).await.map_err(Self::query_error)?;

            let columns = statement.columns().iter().map(|c| c.name().to_string()).collect();
            let json_rows = rows.iter().map(row_to_json).collect();

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
        let schema = schema.unwrap_or("public");

        with_timeout(self.timeout, async {
            let client = self.client(config).await?;
            let rows = client
                .query(
                    r#"
                    SELECT
                        c.column_name::text,
                        c.data_type::text,
                        c.is_nullable::text,
                        c.column_default::text,
                        c.character_maximum_length::int4,
                        CASE WHEN pk.column_name IS NOT NULL THEN true ELSE false END AS is_primary_key
                    FROM information_schema.columns c
                    LEFT JOIN (
                        SELECT ku.column_name
                        FROM information_schema.table_constraints tc
                        JOIN information_schema.key_column_usage ku
                            ON tc.constraint_name = ku.constraint_name
                            AND tc.table_schema = ku.table_schema
                        WHERE tc.constraint_type = 'PRIMARY KEY'
                            AND tc.table_schema = $1::text
                            AND tc.table_name = $2::text
                    ) pk ON c.column_name = pk.column_name
                    WHERE c.table_schema = $1::text AND c.table_name = $2::text
                    ORDER BY c.ordinal_position
                    "#,
                    &[&schema, &table],
                )
                .await
                .map_err(|e| AppError::QueryExecution(format!("Failed to get columns: {}", e)))?;

            if rows.is_empty() {
                return Err(AppError::NotFound(format!("Table not found: {}", table_name)));
            }

            let columns = rows
                .iter()
                .map(|row| TableColumn {
                    name: row.get(0),
                    data_type: row.get(1),
                    is_nullable: row.get::<_, String>(2) == "YES",
                    default_value: row.get(3),
                    max_length: row.get(4),
                    is_primary_key: row.get(5),
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

/// A bind parameter sent in text format.
///
/// The server parses the text for whatever type it inferred for the
/// placeholder, so one representation serves integer, numeric, date and
/// text columns alike.
#[derive(Debug)]
struct TextParam(Option<String>);

impl TextParam {
    fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => TextParam(None),
            other => TextParam(Some(value_to_string(other))),
        }
    }
}

impl ToSql for TextParam {
    fn to_sql(&self, _ty: &Type, out: &mut BytesMut) -> Result<IsNull, Box<dyn Error + Sync + Send>> {
        match &self.0 {
            Some(text) => {
                out.extend_from_slice(text.as_bytes());
                Ok(IsNull::No)
            }
            None => Ok(IsNull::Yes),
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    fn to_sql_checked(&self, ty: &Type, out: &mut BytesMut) -> Result<IsNull, Box<dyn Error + Sync + Send>> {
        self.to_sql(ty, out)
    }

    fn encode_format(&self, _ty: &Type) -> Format {
        Format::Text
    }
}

/// Convert a result row to JSON, keeping column order
fn row_to_json(row: &PgRow) -> Row {
    let mut row_obj = Row::new();
    for (idx, column) in row.columns().iter().enumerate() {
        row_obj.insert(column.name().to_string(), cell_to_json(row, idx, column.type_()));
    }
    row_obj
}

fn cell_to_json(row: &PgRow, idx: usize, ty: &Type) -> Value {
    fn opt<T: serde::Serialize>(value: Result<Option<T>, tokio_postgres::Error>) -> Value {
        match value {
            Ok(Some(v)) => json!(v),
            _ => Value::Null,
        }
    }

    match *ty {
        Type::INT2 => opt(row.try_get::<_, Option<i16>>(idx)),
        Type::INT4 => opt(row.try_get::<_, Option<i32>>(idx)),
        Type::INT8 => opt(row.try_get::<_, Option<i64>>(idx)),
        Type::FLOAT4 => opt(row.try_get::<_, Option<f32>>(idx)),
        Type::FLOAT8 => opt(row.try_get::<_, Option<f64>>(idx)),
        Type::BOOL => opt(row.try_get::<_, Option<bool>>(idx)),
        Type::NUMERIC => opt(row.try_get::<_, Option<PgNumeric>>(idx).map(|v| v.map(|n| n.0))),
        Type::TIMESTAMP => opt(
            row.try_get::<_, Option<chrono::NaiveDateTime>>(idx)
                .map(|v| v.map(|ts| ts.format("%Y-%m-%dT%H:%M:%S%.f").to_string())),
        ),
        Type::TIMESTAMPTZ => opt(
            row.try_get::<_, Option<chrono::DateTime<chrono::Utc>>>(idx)
                .map(|v| v.map(|ts| ts.to_rfc3339())),
        ),
        Type::DATE => opt(
            row.try_get::<_, Option<chrono::NaiveDate>>(idx)
                .map(|v| v.map(|d| d.to_string())),
        ),
        Type::UUID => opt(row.try_get::<_, Option<uuid::Uuid>>(idx).map(|v| v.map(|u| u.to_string()))),
        Type::JSON | Type::JSONB => row
            .try_get::<_, Option<Value>>(idx)
            .ok()
            .flatten()
            .unwrap_or(Value::Null),
        _ => match row.try_get::<_, Option<String>>(idx) {
            Ok(Some(v)) => json!(v),
            Ok(None) => Value::Null,
            Err(_) => {
                tracing::warn!("Unsupported PostgreSQL type '{}' returned as placeholder", ty.name());
                json!(format!("<{}>", ty.name()))
            }
        },
    }
}

/// NUMERIC decoded from the binary wire format into its decimal text
struct PgNumeric(String);

impl<'a> tokio_postgres::types::FromSql<'a> for PgNumeric {
    fn from_sql(_ty: &Type, raw: &'a [u8]) -> Result<Self, Box<dyn Error + Sync + Send>> {
        Ok(PgNumeric(decode_numeric(raw)?))
    }

    fn accepts(ty: &Type) -> bool {
        *ty == Type::NUMERIC
    }
}

const NUMERIC_NEG: u16 = 0x4000;
const NUMERIC_NAN: u16 = 0xC000;

/// Decode `ndigits, weight, sign, dscale, digits[]` (base 10000 digits)
fn decode_numeric(raw: &[u8]) -> Result<String, Box<dyn Error + Sync + Send>> {
    let read_u16 = |pos: usize| -> Result<u16, Box<dyn Error + Sync + Send>> {
        raw.get(pos..pos + 2)
            .map(|b| u16::from_be_bytes([b[0], b[1]]))
            .ok_or_else(|| "truncated numeric value".into())
    };

    let ndigits = read_u16(0)? as usize;
    let weight = read_u16(2)? as i16 as i32;
    let sign = read_u16(4)?;
    let dscale = read_u16(6)? as usize;

    if sign == NUMERIC_NAN {
        return Ok("NaN".to_string());
    }

    let digits = (0..ndigits)
        .map(|i| read_u16(8 + i * 2))
        .collect::<Result<Vec<_>, _>>()?;

    let mut integer = String::new();
    for position in 0..=weight.max(0) {
        let digit = if weight >= 0 {
            digits.get(position as usize).copied().unwrap_or(0)
        } else {
            0
        };
        if integer.is_empty() {
            if digit != 0 || position == weight.max(0) {
                integer.push_str(&digit.to_string());
            }
        } else {
            integer.push_str(&format!("{:04}", digit));
        }
    }
    if integer.is_empty() {
        integer.push('0');
    }

    let mut fraction = String::new();
    if dscale > 0 {
        let mut index = weight + 1;
        while fraction.len() < dscale {
            let digit = if index >= 0 {
                digits.get(index as usize).copied().unwrap_or(0)
            } else {
                0
            };
            fraction.push_str(&format!("{:04}", digit));
            index += 1;
        }
        fraction.truncate(dscale);
    }

    let mut text = String::new();
    if sign == NUMERIC_NEG {
        text.push('-');
    }
    text.push_str(&integer);
    if !fraction.is_empty() {
        text.push('.');
        text.push_str(&fraction);
    }
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numeric(ndigits: u16, weight: i16, sign: u16, dscale: u16, digits: &[u16]) -> Vec<u8> {
        let mut raw = Vec::new();
        for part in [ndigits, weight as u16, sign, dscale] {
            raw.extend_from_slice(&part.to_be_bytes());
        }
        for digit in digits {
            raw.extend_from_slice(&digit.to_be_bytes());
        }
        raw
    }

    #[test]
    fn test_decode_numeric() {
        // 12345.678 = [1, 2345, 6780] with weight 1
        let raw = numeric(3, 1, 0, 3, &[1, 2345, 6780]);
        assert_eq!(decode_numeric(&raw).unwrap(), "12345.678");

        // -0.05 = [500] with weight -1
        let raw = numeric(1, -1, NUMERIC_NEG, 2, &[500]);
        assert_eq!(decode_numeric(&raw).unwrap(), "-0.05");

        // 20000 = [2] with weight 1 (trailing zero groups omitted)
        let raw = numeric(1, 1, 0, 0, &[2]);
        assert_eq!(decode_numeric(&raw).unwrap(), "20000");

        let raw = numeric(0, 0, 0, 0, &[]);
        assert_eq!(decode_numeric(&raw).unwrap(), "0");
    }

    #[test]
    fn test_decode_numeric_rejects_truncated_input() {
        assert!(decode_numeric(&[0, 1]).is_err());
    }

    #[test]
    fn test_text_params() {
        let mut buf = BytesMut::new();
        let param = TextParam::from_json(&json!(42));
        assert!(matches!(param.to_sql(&Type::INT4, &mut buf), Ok(IsNull::No)));
        assert_eq!(&buf[..], b"42");
        assert!(matches!(param.encode_format(&Type::INT4), Format::Text));

        let null = TextParam::from_json(&Value::Null);
        assert!(matches!(null.to_sql(&Type::TEXT, &mut BytesMut::new()), Ok(IsNull::Yes)));

        let text = TextParam::from_json(&json!("O'Brien"));
        let mut buf = BytesMut::new();
        text.to_sql(&Type::TEXT, &mut buf).unwrap();
        assert_eq!(&buf[..], b"O'Brien");
    }
}
