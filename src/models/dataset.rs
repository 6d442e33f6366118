use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::api::middleware::AppError;

/// One tabular record: column name to scalar value
pub type Row = serde_json::Map<String, Value>;

/// Inferred logical type of a column
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Integer,
    Decimal,
    String,
    Boolean,
    Date,
}

impl ColumnType {
    pub fn is_numeric(&self) -> bool {
        matches!(self, ColumnType::Integer | ColumnType::Decimal)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnType::Integer => "integer",
            ColumnType::Decimal => "decimal",
            ColumnType::String => "string",
            ColumnType::Boolean => "boolean",
            ColumnType::Date => "date",
        }
    }
}

/// Column description produced by the parser and schema detector
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ColumnDefinition {
    pub column_name: String,
    pub data_type: ColumnType,
    pub is_nullable: bool,
    pub is_primary_key: bool,
    pub sample_values: Vec<Value>,
    /// The only field callers may edit after detection
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum FilterOperator {
    Equals,
    NotEquals,
    Contains,
    StartsWith,
    EndsWith,
    GreaterThan,
    GreaterThanOrEqual,
    LessThan,
    LessThanOrEqual,
    Between,
    In,
    NotIn,
    IsNull,
    IsNotNull,
}

impl FilterOperator {
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterOperator::Equals => "equals",
            FilterOperator::NotEquals => "notEquals",
            FilterOperator::Contains => "contains",
            FilterOperator::StartsWith => "startsWith",
            FilterOperator::EndsWith => "endsWith",
            FilterOperator::GreaterThan => "greaterThan",
            FilterOperator::GreaterThanOrEqual => "greaterThanOrEqual",
            FilterOperator::LessThan => "lessThan",
            FilterOperator::LessThanOrEqual => "lessThanOrEqual",
            FilterOperator::Between => "between",
            FilterOperator::In => "in",
            FilterOperator::NotIn => "notIn",
            FilterOperator::IsNull => "isNull",
            FilterOperator::IsNotNull => "isNotNull",
        }
    }

    /// Whether the operator ignores its value
    pub fn is_unary(&self) -> bool {
        matches!(self, FilterOperator::IsNull | FilterOperator::IsNotNull)
    }
}

impl fmt::Display for FilterOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single predicate on one column
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FilterCondition {
    pub column: String,
    pub operator: FilterOperator,
    #[serde(default)]
    pub value: Value,
}

impl FilterCondition {
    pub fn new(column: impl Into<String>, operator: FilterOperator, value: Value) -> Self {
        Self {
            column: column.into(),
            operator,
            value,
        }
    }

    /// Check the value shape the operator requires.
    ///
    /// `between` needs a two-element array, `in`/`notIn` a non-empty array.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.column.trim().is_empty() {
            return Err(AppError::Validation("Filter column cannot be empty".to_string()));
        }

        match self.operator {
            FilterOperator::Between => match &self.value {
                Value::Array(items) if items.len() == 2 => Ok(()),
                _ => Err(AppError::Validation(format!(
                    "Operator 'between' on column '{}' requires an array of exactly two values",
                    self.column
                ))),
            },
            FilterOperator::In | FilterOperator::NotIn => match &self.value {
                Value::Array(items) if !items.is_empty() => Ok(()),
                _ => Err(AppError::Validation(format!(
                    "Operator '{}' on column '{}' requires a non-empty array value",
                    self.operator, self.column
                ))),
            },
            _ => Ok(()),
        }
    }

    /// The two bounds of a validated `between` filter
    pub fn between_bounds(&self) -> Result<(&Value, &Value), AppError> {
        match &self.value {
            Value::Array(items) if items.len() == 2 => Ok((&items[0], &items[1])),
            _ => Err(AppError::Validation(format!(
                "Operator 'between' on column '{}' requires an array of exactly two values",
                self.column
            ))),
        }
    }

    /// The members of a validated `in`/`notIn` filter
    pub fn list_values(&self) -> Result<&[Value], AppError> {
        match &self.value {
            Value::Array(items) if !items.is_empty() => Ok(items.as_slice()),
            _ => Err(AppError::Validation(format!(
                "Operator '{}' on column '{}' requires a non-empty array value",
                self.operator, self.column
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    #[serde(alias = "ASC")]
    Asc,
    #[serde(alias = "DESC")]
    Desc,
}

impl SortDirection {
    pub fn as_sql(&self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderByClause {
    pub column: String,
    #[serde(default)]
    pub direction: SortDirection,
}

impl OrderByClause {
    pub fn new(column: impl Into<String>, direction: SortDirection) -> Self {
        Self {
            column: column.into(),
            direction,
        }
    }
}

/// Projection, filtering, ordering and pagination for one fetch
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FetchOptions {
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: Option<usize>,
    #[serde(default)]
    pub columns: Vec<String>,
    #[serde(default)]
    pub filters: Vec<FilterCondition>,
    #[serde(default)]
    pub order_by: Vec<OrderByClause>,
}

impl FetchOptions {
    pub fn validate(&self) -> Result<(), AppError> {
        for filter in &self.filters {
            filter.validate()?;
        }
        if let Some(empty) = self.order_by.iter().find(|o| o.column.trim().is_empty()) {
            return Err(AppError::Validation(format!(
                "Order by column cannot be empty (direction {})",
                empty.direction.as_sql()
            )));
        }
        Ok(())
    }
}

/// Rows returned by a fetch.
///
/// `total_count` counts rows before any processing and `filtered_count` rows
/// matching the filters before pagination. Both are only set where the engine
/// materializes the data itself (file and API sources).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FetchResult {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
    pub row_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filtered_count: Option<usize>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ParseOptions {
    /// Truncate the returned rows; `row_count` still reports the full length
    #[serde(default)]
    pub limit: Option<usize>,
    /// Infer column types and coerce values (all columns are strings otherwise)
    #[serde(default = "default_detect_schema")]
    pub detect_schema: bool,
}

fn default_detect_schema() -> bool {
    true
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            limit: None,
            detect_schema: true,
        }
    }
}

/// Decoded file contents
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ParsedFileData {
    pub rows: Vec<Row>,
    pub columns: Vec<ColumnDefinition>,
    pub row_count: usize,
    pub column_count: usize,
    pub sample_data: Vec<Row>,
}

impl ParsedFileData {
    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.column_name.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_between_requires_two_values() {
        let ok = FilterCondition::new("age", FilterOperator::Between, json!([18, 65]));
        assert!(ok.validate().is_ok());

        let bad = FilterCondition::new("age", FilterOperator::Between, json!([18]));
        assert!(matches!(bad.validate(), Err(AppError::Validation(_))));

        let scalar = FilterCondition::new("age", FilterOperator::Between, json!(18));
        assert!(scalar.validate().is_err());
    }

    #[test]
    fn test_in_requires_array() {
        let bad = FilterCondition::new("region", FilterOperator::NotIn, json!("EU"));
        assert!(bad.validate().is_err());
        let ok = FilterCondition::new("region", FilterOperator::In, json!(["EU", "US"]));
        assert_eq!(ok.list_values().unwrap().len(), 2);
    }

    #[test]
    fn test_fetch_options_deserialize_camel_case() {
        let options: FetchOptions = serde_json::from_value(json!({
            "limit": 10,
            "filters": [{ "column": "name", "operator": "startsWith", "value": "A" }],
            "orderBy": [{ "column": "age", "direction": "desc" }]
        }))
        .unwrap();
        assert_eq!(options.limit, Some(10));
        assert_eq!(options.filters[0].operator, FilterOperator::StartsWith);
        assert_eq!(options.order_by[0].direction, SortDirection::Desc);
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_unary_operators_skip_value() {
        let filter: FilterCondition =
            serde_json::from_value(json!({ "column": "email", "operator": "isNull" })).unwrap();
        assert!(filter.operator.is_unary());
        assert_eq!(filter.value, Value::Null);
        assert!(filter.validate().is_ok());
    }
}
