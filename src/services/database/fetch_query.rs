// Queries for the DATABASE fetch path.
//
// Fetch options (projection, filters, ordering, pagination) become either a
// parameterized SELECT for the SQL providers or a find specification for
// MongoDB. Both target the source's table, `dataset` when none is named.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::api::middleware::AppError;
use crate::models::{
    FetchOptions, FilterCondition, FilterOperator, ParameterizedQuery, QueryBuilderConfig,
    SelectColumn, SortDirection, SqlDialect,
};
use crate::services::sql_builder::SqlBuilder;
use crate::services::type_inference::value_to_string;

pub const DEFAULT_DATASET_TABLE: &str = "dataset";

fn target_table(table: Option<&str>) -> String {
    table
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .unwrap_or(DEFAULT_DATASET_TABLE)
        .to_string()
}

/// Build the parameterized SELECT for a SQL provider
pub fn build_sql_fetch(
    dialect: SqlDialect,
    table: Option<&str>,
    options: &FetchOptions,
) -> Result<ParameterizedQuery, AppError> {
    options.validate()?;

    let config = QueryBuilderConfig {
        table: target_table(table),
        columns: options.columns.iter().map(SelectColumn::new).collect(),
        filters: options.filters.clone(),
        order_by: options.order_by.clone(),
        limit: options.limit.map(|l| l as u64),
        offset: options.offset.map(|o| o as u64),
        ..Default::default()
    };

    SqlBuilder::build_parameterized(&config, dialect)
}

/// A MongoDB `find` call described as JSON
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MongoFindSpec {
    pub collection: String,
    #[serde(default)]
    pub filter: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub projection: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
}

impl MongoFindSpec {
    /// Parse the JSON carried in a query's `sql` field
    pub fn from_query_text(text: &str) -> Result<Self, AppError> {
        let spec: MongoFindSpec = serde_json::from_str(text).map_err(|e| {
            AppError::Validation(format!("MongoDB queries must be a JSON find specification: {}", e))
        })?;
        if spec.collection.trim().is_empty() {
            return Err(AppError::Validation("MongoDB find specification needs a collection".to_string()));
        }
        Ok(spec)
    }

    pub fn to_query_text(&self) -> Result<String, AppError> {
        serde_json::to_string(self)
            .map_err(|e| AppError::Internal(format!("Failed to serialize find specification: {}", e)))
    }
}

/// Build the find specification for a MongoDB source
pub fn build_mongo_fetch(collection: Option<&str>, options: &FetchOptions) -> Result<MongoFindSpec, AppError> {
    options.validate()?;

    let clauses = options
        .filters
        .iter()
        .map(mongo_clause)
        .collect::<Result<Vec<_>, _>>()?;

    let filter = match clauses.len() {
        0 => Map::new(),
        1 => clauses.into_iter().next().unwrap_or_default(),
        _ => {
            let mut combined = Map::new();
            combined.insert(
                "$and".to_string(),
                Value::Array(clauses.into_iter().map(Value::Object).collect()),
            );
            combined
        }
    };

    let projection = (!options.columns.is_empty()).then(|| {
        options
            .columns
            .iter()
            .map(|c| (c.clone(), json!(1)))
            .collect::<Map<_, _>>()
    });

    let sort = (!options.order_by.is_empty()).then(|| {
        options
            .order_by
            .iter()
            .map(|o| {
                let direction = match o.direction {
                    SortDirection::Asc => 1,
                    SortDirection::Desc => -1,
                };
                (o.column.clone(), json!(direction))
            })
            .collect::<Map<_, _>>()
    });

    Ok(MongoFindSpec {
        collection: target_table(collection),
        filter,
        projection,
        sort,
        skip: options.offset.map(|o| o as u64),
        limit: options.limit.map(|l| l as u64),
    })
}

fn mongo_clause(filter: &FilterCondition) -> Result<Map<String, Value>, AppError> {
    let pattern = |prefix: &str, suffix: &str| {
        json!({
            "$regex": format!("{}{}{}", prefix, regex::escape(&value_to_string(&filter.value)), suffix),
            "$options": "i"
        })
    };

    let condition = match filter.operator {
        FilterOperator::Equals => filter.value.clone(),
        FilterOperator::NotEquals => json!({ "$ne": filter.value }),
        FilterOperator::Contains => pattern("", ""),
        FilterOperator::StartsWith => pattern("^", ""),
        FilterOperator::EndsWith => pattern("", "$"),
        FilterOperator::GreaterThan => json!({ "$gt": filter.value }),
        FilterOperator::GreaterThanOrEqual => json!({ "$gte": filter.value }),
        FilterOperator::LessThan => json!({ "$lt": filter.value }),
        FilterOperator::LessThanOrEqual => json!({ "$lte": filter.value }),
        FilterOperator::Between => {
            let (low, high) = filter.between_bounds()?;
            json!({ "$gte": low, "$lte": high })
        }
        FilterOperator::In => json!({ "$in": filter.list_values()? }),
        FilterOperator::NotIn => json!({ "$nin": filter.list_values()? }),
        FilterOperator::IsNull => Value::Null,
        FilterOperator::IsNotNull => json!({ "$ne": null }),
    };

    let mut clause = Map::new();
    clause.insert(filter.column.clone(), condition);
    Ok(clause)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::OrderByClause;

    fn options() -> FetchOptions {
        FetchOptions {
            limit: Some(10),
            offset: Some(20),
            columns: vec!["name".to_string(), "age".to_string()],
            filters: vec![
                FilterCondition::new("name", FilterOperator::Contains, json!("o'b")),
                FilterCondition::new("age", FilterOperator::Between, json!([18, 65])),
            ],
            order_by: vec![OrderByClause::new("age", SortDirection::Desc)],
        }
    }

    #[test]
    fn test_sql_fetch_defaults_to_dataset_table() {
        let query = build_sql_fetch(SqlDialect::PostgreSQL, None, &FetchOptions::default()).unwrap();
        assert_eq!(query.sql, "SELECT * FROM \"dataset\"");
        assert!(query.params.is_empty());
    }

    #[test]
    fn test_sql_fetch_binds_filter_values() {
        let query = build_sql_fetch(SqlDialect::MySQL, Some("people"), &options()).unwrap();
        assert!(query.sql.starts_with("SELECT `name`, `age` FROM `people` WHERE "));
        assert!(query.sql.contains("`name` LIKE ?"));
        assert!(query.sql.contains("`age` BETWEEN ? AND ?"));
        assert!(!query.sql.contains("o'b"));
        assert_eq!(query.params, vec![json!("%o'b%"), json!(18), json!(65)]);
    }

    #[test]
    fn test_sql_fetch_rejects_bad_filters() {
        let mut opts = options();
        opts.filters = vec![FilterCondition::new("age", FilterOperator::Between, json!([1]))];
        assert!(matches!(
            build_sql_fetch(SqlDialect::PostgreSQL, None, &opts),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn test_mongo_fetch_spec() {
        let spec = build_mongo_fetch(Some("people"), &options()).unwrap();
        assert_eq!(spec.collection, "people");
        assert_eq!(spec.skip, Some(20));
        assert_eq!(spec.limit, Some(10));
        assert_eq!(spec.sort.unwrap()["age"], json!(-1));
        assert_eq!(spec.projection.unwrap()["name"], json!(1));

        let and = spec.filter["$and"].as_array().unwrap();
        assert_eq!(and[0]["name"]["$regex"], json!("o'b"));
        assert_eq!(and[0]["name"]["$options"], json!("i"));
        assert_eq!(and[1]["age"], json!({ "$gte": 18, "$lte": 65 }));
    }

    #[test]
    fn test_mongo_single_filter_and_escaping() {
        let opts = FetchOptions {
            filters: vec![FilterCondition::new("email", FilterOperator::EndsWith, json!(".com"))],
            ..Default::default()
        };
        let spec = build_mongo_fetch(None, &opts).unwrap();
        assert_eq!(spec.collection, "dataset");
        assert_eq!(spec.filter["email"]["$regex"], json!("\\.com$"));
        assert!(spec.projection.is_none());
    }

    #[test]
    fn test_find_spec_text_round_trip() {
        let spec = build_mongo_fetch(Some("people"), &FetchOptions::default()).unwrap();
        let text = spec.to_query_text().unwrap();
        assert_eq!(MongoFindSpec::from_query_text(&text).unwrap(), spec);
        assert!(MongoFindSpec::from_query_text("SELECT 1").is_err());
        assert!(MongoFindSpec::from_query_text("{\"collection\": \"\"}").is_err());
    }
}
