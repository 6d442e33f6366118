use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use super::dataset::{FilterCondition, FilterOperator, OrderByClause};
use crate::api::middleware::AppError;

/// SQL syntax variant of a relational engine
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SqlDialect {
    #[default]
    #[serde(alias = "postgres")]
    PostgreSQL,
    MySQL,
    #[serde(alias = "mssql")]
    SqlServer,
}

impl SqlDialect {
    pub fn as_str(&self) -> &'static str {
        match self {
            SqlDialect::PostgreSQL => "postgresql",
            SqlDialect::MySQL => "mysql",
            SqlDialect::SqlServer => "sqlserver",
        }
    }

    /// Quote an identifier, handling `schema.table` paths and `*`.
    pub fn quote_identifier(&self, identifier: &str) -> String {
        identifier
            .split('.')
            .map(|part| {
                let part = part.trim();
                if part == "*" {
                    return part.to_string();
                }
                match self {
                    SqlDialect::PostgreSQL => format!("\"{}\"", part.replace('"', "\"\"")),
                    SqlDialect::MySQL => format!("`{}`", part.replace('`', "``")),
                    SqlDialect::SqlServer => format!("[{}]", part.replace(']', "]]")),
                }
            })
            .collect::<Vec<_>>()
            .join(".")
    }

    /// Bind placeholder for the 1-based parameter `index`
    pub fn placeholder(&self, index: usize) -> String {
        match self {
            SqlDialect::PostgreSQL => format!("${}", index),
            SqlDialect::MySQL => "?".to_string(),
            SqlDialect::SqlServer => format!("@P{}", index),
        }
    }

    /// Boolean literal; SQL Server has no TRUE/FALSE keywords
    pub fn bool_literal(&self, value: bool) -> &'static str {
        match (self, value) {
            (SqlDialect::SqlServer, true) => "1",
            (SqlDialect::SqlServer, false) => "0",
            (_, true) => "TRUE",
            (_, false) => "FALSE",
        }
    }
}

impl FromStr for SqlDialect {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "postgresql" | "postgres" => Ok(SqlDialect::PostgreSQL),
            "mysql" => Ok(SqlDialect::MySQL),
            "sqlserver" | "mssql" => Ok(SqlDialect::SqlServer),
            _ => Err(AppError::Validation(format!("Unsupported SQL dialect: {}", s))),
        }
    }
}

impl fmt::Display for SqlDialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum AggregateFunction {
    #[serde(alias = "count")]
    Count,
    #[serde(alias = "sum")]
    Sum,
    #[serde(alias = "avg")]
    Avg,
    #[serde(alias = "min")]
    Min,
    #[serde(alias = "max")]
    Max,
    #[serde(rename = "COUNT_DISTINCT", alias = "countDistinct")]
    CountDistinct,
}

impl AggregateFunction {
    /// Wrap an already-quoted column expression
    pub fn apply(&self, expr: &str) -> String {
        match self {
            AggregateFunction::Count => format!("COUNT({})", expr),
            AggregateFunction::Sum => format!("SUM({})", expr),
            AggregateFunction::Avg => format!("AVG({})", expr),
            AggregateFunction::Min => format!("MIN({})", expr),
            AggregateFunction::Max => format!("MAX({})", expr),
            AggregateFunction::CountDistinct => format!("COUNT(DISTINCT {})", expr),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SelectColumn {
    pub column: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregate: Option<AggregateFunction>,
}

impl SelectColumn {
    pub fn new(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            alias: None,
            aggregate: None,
        }
    }

    pub fn aggregated(column: impl Into<String>, aggregate: AggregateFunction) -> Self {
        Self {
            column: column.into(),
            alias: None,
            aggregate: Some(aggregate),
        }
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum JoinType {
    #[default]
    #[serde(alias = "inner")]
    Inner,
    #[serde(alias = "left")]
    Left,
    #[serde(alias = "right")]
    Right,
    #[serde(alias = "full")]
    Full,
}

impl JoinType {
    pub fn as_sql(&self) -> &'static str {
        match self {
            JoinType::Inner => "INNER JOIN",
            JoinType::Left => "LEFT JOIN",
            JoinType::Right => "RIGHT JOIN",
            JoinType::Full => "FULL OUTER JOIN",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JoinClause {
    #[serde(default)]
    pub join_type: JoinType,
    pub table: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    /// Column on the left side of the ON condition, e.g. `orders.customer_id`
    pub left_column: String,
    /// Column on the right side of the ON condition, e.g. `customers.id`
    pub right_column: String,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum FilterLogic {
    #[default]
    #[serde(alias = "and")]
    And,
    #[serde(alias = "or")]
    Or,
}

impl FilterLogic {
    pub fn as_sql(&self) -> &'static str {
        match self {
            FilterLogic::And => " AND ",
            FilterLogic::Or => " OR ",
        }
    }
}

/// Predicate on an aggregate, rendered into HAVING
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HavingCondition {
    pub aggregate: AggregateFunction,
    pub column: String,
    pub operator: FilterOperator,
    #[serde(default)]
    pub value: Value,
}

/// Structured description of a SELECT statement
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QueryBuilderConfig {
    pub table: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table_alias: Option<String>,
    #[serde(default)]
    pub distinct: bool,
    #[serde(default)]
    pub columns: Vec<SelectColumn>,
    #[serde(default)]
    pub joins: Vec<JoinClause>,
    #[serde(default)]
    pub filters: Vec<FilterCondition>,
    #[serde(default)]
    pub filter_logic: FilterLogic,
    #[serde(default)]
    pub group_by: Vec<String>,
    #[serde(default)]
    pub having: Vec<HavingCondition>,
    #[serde(default)]
    pub order_by: Vec<OrderByClause>,
    #[serde(default)]
    pub limit: Option<u64>,
    #[serde(default)]
    pub offset: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<String>,
}

impl ValidationResult {
    pub fn from_errors(errors: Vec<String>) -> Self {
        Self {
            valid: errors.is_empty(),
            errors,
        }
    }
}

/// SQL text plus the values bound to its placeholders, in order
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ParameterizedQuery {
    pub sql: String,
    pub params: Vec<Value>,
}

impl ParameterizedQuery {
    pub fn raw(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }
}

/// Hints the optimizer may use
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OptimizationContext {
    #[serde(default)]
    pub available_indexes: Vec<String>,
    #[serde(default)]
    pub table_row_count: Option<u64>,
    #[serde(default)]
    pub common_filters: Vec<String>,
}

/// Advisory plan; never blocks execution
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QueryPlan {
    pub optimized_query: String,
    pub estimated_rows: u64,
    pub estimated_cost: f64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub indexes: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QueryStatistics {
    pub execution_time_ms: u64,
    #[serde(default)]
    pub rows_scanned: u64,
    #[serde(default)]
    pub rows_returned: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PerformanceRating {
    Excellent,
    Good,
    Fair,
    Poor,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PerformanceAnalysis {
    pub performance: PerformanceRating,
    pub recommendations: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier_quoting_per_dialect() {
        assert_eq!(SqlDialect::PostgreSQL.quote_identifier("public.users"), "\"public\".\"users\"");
        assert_eq!(SqlDialect::MySQL.quote_identifier("users"), "`users`");
        assert_eq!(SqlDialect::SqlServer.quote_identifier("dbo.users"), "[dbo].[users]");
        assert_eq!(SqlDialect::PostgreSQL.quote_identifier("u.*"), "\"u\".*");
    }

    #[test]
    fn test_identifier_quote_characters_are_doubled() {
        assert_eq!(SqlDialect::PostgreSQL.quote_identifier("we\"ird"), "\"we\"\"ird\"");
        assert_eq!(SqlDialect::SqlServer.quote_identifier("a]b"), "[a]]b]");
    }

    #[test]
    fn test_placeholders() {
        assert_eq!(SqlDialect::PostgreSQL.placeholder(2), "$2");
        assert_eq!(SqlDialect::MySQL.placeholder(2), "?");
        assert_eq!(SqlDialect::SqlServer.placeholder(2), "@P2");
    }
}
