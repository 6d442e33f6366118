// SQL Builder
//
// Renders a `QueryBuilderConfig` as dialect-correct SELECT text, either with
// escaped inline literals or with bind placeholders plus an ordered parameter
// list. A regex-based reverse parser recovers an approximate config from SQL.

use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

use crate::api::middleware::AppError;
use crate::models::{
    AggregateFunction, FilterCondition, FilterLogic, FilterOperator, OrderByClause,
    ParameterizedQuery, QueryBuilderConfig, SelectColumn, SortDirection, SqlDialect,
    ValidationResult,
};

/// MySQL has no OFFSET without LIMIT; this is its documented "no limit" value
const MYSQL_MAX_LIMIT: &str = "18446744073709551615";

pub struct SqlBuilder;

impl SqlBuilder {
    /// Build SQL with escaped literals inlined.
    pub fn build(config: &QueryBuilderConfig, dialect: SqlDialect) -> Result<String, AppError> {
        let mut renderer = Renderer::inline(dialect);
        renderer.select(config)
    }

    /// Build SQL with bind placeholders; values are returned in placeholder order.
    pub fn build_parameterized(
        config: &QueryBuilderConfig,
        dialect: SqlDialect,
    ) -> Result<ParameterizedQuery, AppError> {
        let mut renderer = Renderer::binding(dialect);
        let sql = renderer.select(config)?;
        Ok(ParameterizedQuery {
            sql,
            params: renderer.params,
        })
    }

    /// Check a config for structural errors without rendering it
    pub fn validate(config: &QueryBuilderConfig) -> ValidationResult {
        let mut errors = Vec::new();

        if config.table.trim().is_empty() {
            errors.push("Table name is required".to_string());
        }

        for filter in &config.filters {
            if let Err(e) = filter.validate() {
                errors.push(validation_message(e));
            } else if needs_value(filter.operator) && filter.value.is_null() {
                errors.push(format!(
                    "Operator '{}' on column '{}' requires a value",
                    filter.operator, filter.column
                ));
            }
        }

        for join in &config.joins {
            if join.table.trim().is_empty() {
                errors.push("Join table is required".to_string());
            }
            if join.left_column.trim().is_empty() || join.right_column.trim().is_empty() {
                errors.push(format!("Join on '{}' requires both join columns", join.table));
            }
        }

        if !config.having.is_empty() && config.group_by.is_empty() {
            errors.push("HAVING requires at least one GROUP BY column".to_string());
        }
        for having in &config.having {
            let as_filter = FilterCondition::new(having.column.clone(), having.operator, having.value.clone());
            if let Err(e) = as_filter.validate() {
                errors.push(validation_message(e));
            }
        }

        let has_aggregates = config.columns.iter().any(|c| c.aggregate.is_some());
        if has_aggregates {
            for column in config.columns.iter().filter(|c| c.aggregate.is_none()) {
                if !config.group_by.iter().any(|g| g == &column.column) {
                    errors.push(format!(
                        "Column '{}' must appear in GROUP BY or be aggregated",
                        column.column
                    ));
                }
            }
        }

        if config.order_by.iter().any(|o| o.column.trim().is_empty()) {
            errors.push("Order by column cannot be empty".to_string());
        }

        ValidationResult::from_errors(errors)
    }

    /// Escape a value as an inline SQL literal
    pub fn escape_value(value: &Value, dialect: SqlDialect) -> String {
        match value {
            Value::Null => "NULL".to_string(),
            Value::Bool(b) => dialect.bool_literal(*b).to_string(),
            Value::Number(n) => n.to_string(),
            Value::String(s) => quote_string(s),
            nested => quote_string(&nested.to_string()),
        }
    }

    /// Recover an approximate config from SQL text.
    ///
    /// Advisory only: subqueries, expressions and nested conditions are not
    /// understood and are dropped or kept as raw column text.
    pub fn parse_sql_query(sql: &str) -> Result<QueryBuilderConfig, AppError> {
        let captures = SELECT_FROM_RE
            .captures(sql)
            .ok_or_else(|| AppError::Validation("Unable to parse SQL query: expected SELECT ... FROM".to_string()))?;

        let mut config = QueryBuilderConfig {
            distinct: captures.get(1).is_some(),
            ..Default::default()
        };

        let select_list = captures.get(2).map_or("*", |m| m.as_str()).trim();
        if select_list != "*" {
            config.columns = split_top_level(select_list)
                .into_iter()
                .map(|item| parse_select_item(&item))
                .collect();
        }

        let table = captures.get(3).map_or("", |m| m.as_str());
        let table_parts: Vec<String> = table.split('.').map(unquote_identifier).collect();
        match table_parts.as_slice() {
            [schema, name] => {
                config.schema = Some(schema.clone());
                config.table = name.clone();
            }
            _ => config.table = unquote_identifier(table),
        }
        if let Some(alias) = captures.get(4).map(|m| m.as_str()) {
            if !is_clause_keyword(alias) {
                config.table_alias = Some(alias.to_string());
            }
        }

        if let Some(where_clause) = WHERE_RE.captures(sql).and_then(|c| c.get(1)) {
            let text = where_clause.as_str();
            let (logic, parts) = if OR_SPLIT_RE.is_match(text) && !AND_SPLIT_RE.is_match(text) {
                (FilterLogic::Or, OR_SPLIT_RE.split(text).collect::<Vec<_>>())
            } else {
                (FilterLogic::And, AND_SPLIT_RE.split(text).collect::<Vec<_>>())
            };
            config.filter_logic = logic;
            config.filters = parts.into_iter().filter_map(parse_condition).collect();
        }

        if let Some(group_by) = GROUP_BY_RE.captures(sql).and_then(|c| c.get(1)) {
            config.group_by = group_by
                .as_str()
                .split(',')
                .map(|c| unquote_identifier(c.trim()))
                .filter(|c| !c.is_empty())
                .collect();
        }

        if let Some(order_by) = ORDER_BY_RE.captures(sql).and_then(|c| c.get(1)) {
            config.order_by = order_by
                .as_str()
                .split(',')
                .filter_map(|item| {
                    let mut words = item.split_whitespace();
                    let column = unquote_identifier(words.next()?);
                    let direction = match words.next().map(|w| w.to_uppercase()) {
                        Some(d) if d == "DESC" => SortDirection::Desc,
                        _ => SortDirection::Asc,
                    };
                    Some(OrderByClause::new(column, direction))
                })
                .collect();
        }

        config.limit = LIMIT_RE
            .captures(sql)
            .or_else(|| TOP_RE.captures(sql))
            .or_else(|| FETCH_RE.captures(sql))
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse().ok());
        config.offset = OFFSET_RE
            .captures(sql)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse().ok());

        Ok(config)
    }
}

fn validation_message(error: AppError) -> String {
    match error {
        AppError::Validation(msg) => msg,
        other => other.to_string(),
    }
}

fn needs_value(operator: FilterOperator) -> bool {
    matches!(
        operator,
        FilterOperator::Contains
            | FilterOperator::StartsWith
            | FilterOperator::EndsWith
            | FilterOperator::GreaterThan
            | FilterOperator::GreaterThanOrEqual
            | FilterOperator::LessThan
            | FilterOperator::LessThanOrEqual
    )
}

/// Single-quote a string, doubling quotes and backslashes
fn quote_string(s: &str) -> String {
    format!("'{}'", s.replace('\\', "\\\\").replace('\'', "''"))
}

/// Escape character emitted with every generated LIKE
const LIKE_ESCAPE: char = '!';

/// Operand text with LIKE wildcards escaped so they match literally
fn like_text(value: &Value) -> String {
    let raw = match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    };
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '%' | '_' | '[') || c == LIKE_ESCAPE {
            escaped.push(LIKE_ESCAPE);
        }
        escaped.push(c);
    }
    escaped
}

/// Split a LIKE pattern into (leading %, literal text, trailing %)
fn split_like_pattern(pattern: &str, escape: Option<char>) -> (bool, String, bool) {
    // (char, is_wildcard)
    let mut tokens: Vec<(char, bool)> = Vec::new();
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        if Some(c) == escape {
            if let Some(next) = chars.next() {
                tokens.push((next, false));
                continue;
            }
        }
        tokens.push((c, c == '%'));
    }

    let leading = matches!(tokens.first(), Some((_, true)));
    let trailing = tokens.len() > 1 && matches!(tokens.last(), Some((_, true)));
    let start = usize::from(leading);
    let end = tokens.len() - usize::from(trailing);
    let inner = tokens
        .get(start..end)
        .unwrap_or_default()
        .iter()
        .map(|(c, _)| *c)
        .collect();
    (leading, inner, trailing)
}

/// Clause renderer; collects bind parameters when `bind` is set
struct Renderer {
    dialect: SqlDialect,
    bind: bool,
    params: Vec<Value>,
}

impl Renderer {
    fn inline(dialect: SqlDialect) -> Self {
        Self {
            dialect,
            bind: false,
            params: Vec::new(),
        }
    }

    fn binding(dialect: SqlDialect) -> Self {
        Self {
            dialect,
            bind: true,
            params: Vec::new(),
        }
    }

    fn value(&mut self, value: &Value) -> String {
        if self.bind {
            self.params.push(value.clone());
            self.dialect.placeholder(self.params.len())
        } else {
            SqlBuilder::escape_value(value, self.dialect)
        }
    }

    fn column(&self, name: &str) -> String {
        self.dialect.quote_identifier(name)
    }

    fn select(&mut self, config: &QueryBuilderConfig) -> Result<String, AppError> {
        let validation = SqlBuilder::validate(config);
        if !validation.valid {
            return Err(AppError::Validation(validation.errors.join("; ")));
        }

        let mut sql = String::from("SELECT ");
        if config.distinct {
            sql.push_str("DISTINCT ");
        }
        sql.push_str(&self.select_list(&config.columns));

        sql.push_str(" FROM ");
        let table = match &config.schema {
            Some(schema) => format!("{}.{}", schema, config.table),
            None => config.table.clone(),
        };
        sql.push_str(&self.column(&table));
        if let Some(alias) = &config.table_alias {
            sql.push_str(&format!(" AS {}", self.column(alias)));
        }

        for join in &config.joins {
            sql.push(' ');
            sql.push_str(join.join_type.as_sql());
            sql.push(' ');
            sql.push_str(&self.column(&join.table));
            if let Some(alias) = &join.alias {
                sql.push_str(&format!(" AS {}", self.column(alias)));
            }
            sql.push_str(&format!(
                " ON {} = {}",
                self.column(&join.left_column),
                self.column(&join.right_column)
            ));
        }

        if !config.filters.is_empty() {
            let mut predicates = Vec::with_capacity(config.filters.len());
            for filter in &config.filters {
                let expr = self.column(&filter.column);
                predicates.push(self.predicate(&expr, filter)?);
            }
            sql.push_str(" WHERE ");
            sql.push_str(&predicates.join(config.filter_logic.as_sql()));
        }

        if !config.group_by.is_empty() {
            let columns: Vec<String> = config.group_by.iter().map(|c| self.column(c)).collect();
            sql.push_str(" GROUP BY ");
            sql.push_str(&columns.join(", "));
        }

        if !config.having.is_empty() {
            let mut predicates = Vec::with_capacity(config.having.len());
            for having in &config.having {
                let expr = having.aggregate.apply(&self.column(&having.column));
                let filter = FilterCondition::new(having.column.clone(), having.operator, having.value.clone());
                predicates.push(self.predicate(&expr, &filter)?);
            }
            sql.push_str(" HAVING ");
            sql.push_str(&predicates.join(" AND "));
        }

        if !config.order_by.is_empty() {
            let clauses: Vec<String> = config
                .order_by
                .iter()
                .map(|o| format!("{} {}", self.column(&o.column), o.direction.as_sql()))
                .collect();
            sql.push_str(" ORDER BY ");
            sql.push_str(&clauses.join(", "));
        }

        sql.push_str(&self.pagination(config));
        Ok(sql)
    }

    fn select_list(&self, columns: &[SelectColumn]) -> String {
        if columns.is_empty() {
            return "*".to_string();
        }
        columns
            .iter()
            .map(|c| {
                let base = self.column(&c.column);
                let expr = match c.aggregate {
                    Some(aggregate) => aggregate.apply(&base),
                    None => base,
                };
                match &c.alias {
                    Some(alias) => format!("{} AS {}", expr, self.column(alias)),
                    None => expr,
                }
            })
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn predicate(&mut self, expr: &str, filter: &FilterCondition) -> Result<String, AppError> {
        filter.validate()?;

        let clause = match filter.operator {
            FilterOperator::Equals if filter.value.is_null() => format!("{} IS NULL", expr),
            FilterOperator::NotEquals if filter.value.is_null() => format!("{} IS NOT NULL", expr),
            FilterOperator::Equals => format!("{} = {}", expr, self.value(&filter.value)),
            FilterOperator::NotEquals => format!("{} <> {}", expr, self.value(&filter.value)),
            FilterOperator::Contains => {
                let pattern = Value::String(format!("%{}%", like_text(&filter.value)));
                format!("{} LIKE {} ESCAPE '{}'", expr, self.value(&pattern), LIKE_ESCAPE)
            }
            FilterOperator::StartsWith => {
                let pattern = Value::String(format!("{}%", like_text(&filter.value)));
                format!("{} LIKE {} ESCAPE '{}'", expr, self.value(&pattern), LIKE_ESCAPE)
            }
            FilterOperator::EndsWith => {
                let pattern = Value::String(format!("%{}", like_text(&filter.value)));
                format!("{} LIKE {} ESCAPE '{}'", expr, self.value(&pattern), LIKE_ESCAPE)
            }
            FilterOperator::GreaterThan => format!("{} > {}", expr, self.value(&filter.value)),
            FilterOperator::GreaterThanOrEqual => format!("{} >= {}", expr, self.value(&filter.value)),
            FilterOperator::LessThan => format!("{} < {}", expr, self.value(&filter.value)),
            FilterOperator::LessThanOrEqual => format!("{} <= {}", expr, self.value(&filter.value)),
            FilterOperator::Between => {
                let (low, high) = filter.between_bounds()?;
                let low = self.value(low);
                let high = self.value(high);
                format!("{} BETWEEN {} AND {}", expr, low, high)
            }
            FilterOperator::In | FilterOperator::NotIn => {
                let items: Vec<String> = filter
                    .list_values()?
                    .iter()
                    .map(|v| self.value(v))
                    .collect();
                let keyword = if filter.operator == FilterOperator::In { "IN" } else { "NOT IN" };
                format!("{} {} ({})", expr, keyword, items.join(", "))
            }
            FilterOperator::IsNull => format!("{} IS NULL", expr),
            FilterOperator::IsNotNull => format!("{} IS NOT NULL", expr),
        };
        Ok(clause)
    }

    fn pagination(&self, config: &QueryBuilderConfig) -> String {
        if config.limit.is_none() && config.offset.is_none() {
            return String::new();
        }

        match self.dialect {
            SqlDialect::SqlServer => {
                let mut clause = String::new();
                if config.order_by.is_empty() {
                    clause.push_str(" ORDER BY (SELECT NULL)");
                }
                clause.push_str(&format!(" OFFSET {} ROWS", config.offset.unwrap_or(0)));
                if let Some(limit) = config.limit {
                    clause.push_str(&format!(" FETCH NEXT {} ROWS ONLY", limit));
                }
                clause
            }
            SqlDialect::PostgreSQL | SqlDialect::MySQL => {
                let mut clause = String::new();
                match (config.limit, self.dialect) {
                    (Some(limit), _) => clause.push_str(&format!(" LIMIT {}", limit)),
                    (None, SqlDialect::MySQL) => clause.push_str(&format!(" LIMIT {}", MYSQL_MAX_LIMIT)),
                    (None, _) => {}
                }
                if let Some(offset) = config.offset {
                    clause.push_str(&format!(" OFFSET {}", offset));
                }
                clause
            }
        }
    }
}

static SELECT_FROM_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?is)^\s*SELECT\s+(?:TOP\s+\d+\s+)?(DISTINCT\s+)?(.+?)\s+FROM\s+([^\s;,()]+)(?:\s+(?:AS\s+)?([A-Za-z_][A-Za-z0-9_]*))?"#,
    )
    .expect("valid regex")
});
static WHERE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)\bWHERE\s+(.+?)(?:\s+GROUP\s+BY\b|\s+HAVING\b|\s+ORDER\s+BY\b|\s+LIMIT\b|\s+OFFSET\b|\s*;|\s*$)")
        .expect("valid regex")
});
static GROUP_BY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)\bGROUP\s+BY\s+(.+?)(?:\s+HAVING\b|\s+ORDER\s+BY\b|\s+LIMIT\b|\s+OFFSET\b|\s*;|\s*$)")
        .expect("valid regex")
});
static ORDER_BY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)\bORDER\s+BY\s+(.+?)(?:\s+LIMIT\b|\s+OFFSET\b|\s+FETCH\b|\s*;|\s*$)").expect("valid regex")
});
static LIMIT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bLIMIT\s+(\d+)").expect("valid regex"));
static TOP_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*SELECT\s+TOP\s+(\d+)").expect("valid regex"));
static FETCH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bFETCH\s+(?:NEXT|FIRST)\s+(\d+)\s+ROWS?\s+ONLY").expect("valid regex"));
static OFFSET_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bOFFSET\s+(\d+)").expect("valid regex"));
static AND_SPLIT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\s+AND\s+").expect("valid regex"));
static OR_SPLIT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\s+OR\s+").expect("valid regex"));
static LIKE_ESCAPE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)^(.*?)\s+ESCAPE\s+'(.)'$").expect("valid regex"));
static CONDITION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?is)^\s*([A-Za-z_"`\[][\w."`\[\]]*)\s*(IS\s+NOT\s+NULL|IS\s+NULL|NOT\s+LIKE|LIKE|<>|!=|>=|<=|=|>|<)\s*(.*?)\s*$"#,
    )
    .expect("valid regex")
});
static AGGREGATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)^(COUNT|SUM|AVG|MIN|MAX)\s*\(\s*(DISTINCT\s+)?(.+?)\s*\)(?:\s+(?:AS\s+)?([\w"`\[\]]+))?$"#)
        .expect("valid regex")
});
static ALIAS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?is)^(.+?)\s+(?:AS\s+)?([\w"`\[\]]+)$"#).expect("valid regex"));

const CLAUSE_KEYWORDS: &[&str] = &[
    "WHERE", "JOIN", "INNER", "LEFT", "RIGHT", "FULL", "CROSS", "GROUP", "ORDER", "LIMIT", "OFFSET",
    "HAVING", "UNION", "ON",
];

fn is_clause_keyword(word: &str) -> bool {
    CLAUSE_KEYWORDS.contains(&word.to_uppercase().as_str())
}

fn unquote_identifier(identifier: &str) -> String {
    identifier
        .trim()
        .trim_matches(|c| matches!(c, '"' | '`' | '[' | ']'))
        .replace("\".\"", ".")
        .replace("`.`", ".")
        .replace("].[", ".")
}

/// Split on commas that are not inside parentheses
fn split_top_level(list: &str) -> Vec<String> {
    let mut items = Vec::new();
    let mut depth = 0i32;
    let mut current = String::new();
    for ch in list.chars() {
        match ch {
            '(' => depth += 1,
            ')' => depth -= 1,
            ',' if depth == 0 => {
                items.push(current.trim().to_string());
                current.clear();
                continue;
            }
            _ => {}
        }
        current.push(ch);
    }
    if !current.trim().is_empty() {
        items.push(current.trim().to_string());
    }
    items
}

fn parse_select_item(item: &str) -> SelectColumn {
    if let Some(c) = AGGREGATE_RE.captures(item) {
        let function = c.get(1).map_or("", |m| m.as_str()).to_uppercase();
        let distinct = c.get(2).is_some();
        let aggregate = match (function.as_str(), distinct) {
            ("COUNT", true) => AggregateFunction::CountDistinct,
            ("COUNT", false) => AggregateFunction::Count,
            ("SUM", _) => AggregateFunction::Sum,
            ("AVG", _) => AggregateFunction::Avg,
            ("MIN", _) => AggregateFunction::Min,
            _ => AggregateFunction::Max,
        };
        let column = SelectColumn::aggregated(unquote_identifier(c.get(3).map_or("*", |m| m.as_str())), aggregate);
        return match c.get(4) {
            Some(alias) => column.with_alias(unquote_identifier(alias.as_str())),
            None => column,
        };
    }

    if let Some(c) = ALIAS_RE.captures(item) {
        let expr = c.get(1).map_or("", |m| m.as_str());
        let alias = c.get(2).map_or("", |m| m.as_str());
        return SelectColumn::new(unquote_identifier(expr)).with_alias(unquote_identifier(alias));
    }

    SelectColumn::new(unquote_identifier(item))
}

fn parse_condition(text: &str) -> Option<FilterCondition> {
    let c = CONDITION_RE.captures(text)?;
    let column = unquote_identifier(c.get(1)?.as_str());
    let op = c.get(2)?.as_str().split_whitespace().collect::<Vec<_>>().join(" ").to_uppercase();
    let raw = c.get(3).map_or("", |m| m.as_str());

    let (operator, value) = match op.as_str() {
        "IS NULL" => (FilterOperator::IsNull, Value::Null),
        "IS NOT NULL" => (FilterOperator::IsNotNull, Value::Null),
        "=" => (FilterOperator::Equals, parse_literal(raw)),
        "<>" | "!=" => (FilterOperator::NotEquals, parse_literal(raw)),
        ">" => (FilterOperator::GreaterThan, parse_literal(raw)),
        ">=" => (FilterOperator::GreaterThanOrEqual, parse_literal(raw)),
        "<" => (FilterOperator::LessThan, parse_literal(raw)),
        "<=" => (FilterOperator::LessThanOrEqual, parse_literal(raw)),
        "LIKE" => {
            let (raw, escape) = match LIKE_ESCAPE_RE.captures(raw) {
                Some(caps) => (
                    caps.get(1).map_or("", |m| m.as_str()),
                    caps.get(2).and_then(|m| m.as_str().chars().next()),
                ),
                None => (raw, None),
            };
            let pattern = match parse_literal(raw) {
                Value::String(s) => s,
                other => other.to_string(),
            };
            let (leading, inner, trailing) = split_like_pattern(&pattern, escape);
            let operator = match (leading, trailing) {
                (true, true) => FilterOperator::Contains,
                (false, true) => FilterOperator::StartsWith,
                (true, false) => FilterOperator::EndsWith,
                (false, false) => FilterOperator::Equals,
            };
            (operator, Value::String(inner))
        }
        _ => return None,
    };

    Some(FilterCondition::new(column, operator, value))
}

/// Parse a SQL literal: quoted string, number, boolean or NULL
fn parse_literal(raw: &str) -> Value {
    let raw = raw.trim();
    if raw.len() >= 2 && raw.starts_with('\'') && raw.ends_with('\'') {
        let inner = &raw[1..raw.len() - 1];
        return Value::String(inner.replace("''", "'").replace("\\\\", "\\"));
    }
    match raw.to_uppercase().as_str() {
        "NULL" => return Value::Null,
        "TRUE" => return Value::Bool(true),
        "FALSE" => return Value::Bool(false),
        _ => {}
    }
    if let Ok(i) = raw.parse::<i64>() {
        return Value::from(i);
    }
    if let Ok(f) = raw.parse::<f64>() {
        if let Some(n) = serde_json::Number::from_f64(f) {
            return Value::Number(n);
        }
    }
    Value::String(raw.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{HavingCondition, JoinClause, JoinType};
    use serde_json::json;

    fn users() -> QueryBuilderConfig {
        QueryBuilderConfig {
            table: "users".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_quote_doubling_in_values() {
        let mut config = users();
        config.filters = vec![FilterCondition::new("name", FilterOperator::Equals, json!("O'Brien"))];

        let sql = SqlBuilder::build(&config, SqlDialect::PostgreSQL).unwrap();
        assert!(sql.contains("'O''Brien'"));
        assert!(!sql.contains("O'B"));
    }

    #[test]
    fn test_backslashes_are_doubled() {
        assert_eq!(SqlBuilder::escape_value(&json!(r"a\b"), SqlDialect::MySQL), r"'a\\b'");
        assert_eq!(SqlBuilder::escape_value(&Value::Null, SqlDialect::MySQL), "NULL");
        assert_eq!(SqlBuilder::escape_value(&json!(true), SqlDialect::SqlServer), "1");
        assert_eq!(SqlBuilder::escape_value(&json!(2.5), SqlDialect::PostgreSQL), "2.5");
    }

    #[test]
    fn test_postgres_full_query() {
        let mut config = users();
        config.columns = vec![SelectColumn::new("id"), SelectColumn::new("name")];
        config.filters = vec![FilterCondition::new("age", FilterOperator::GreaterThan, json!(18))];
        config.order_by = vec![OrderByClause::new("name", SortDirection::Asc)];
        config.limit = Some(10);
        config.offset = Some(20);

        let sql = SqlBuilder::build(&config, SqlDialect::PostgreSQL).unwrap();
        assert_eq!(
            sql,
            r#"SELECT "id", "name" FROM "users" WHERE "age" > 18 ORDER BY "name" ASC LIMIT 10 OFFSET 20"#
        );
    }

    #[test]
    fn test_sql_server_pagination() {
        let config = QueryBuilderConfig {
            table: "users".to_string(),
            schema: Some("dbo".to_string()),
            columns: vec![SelectColumn::new("id")],
            limit: Some(5),
            ..Default::default()
        };

        let sql = SqlBuilder::build(&config, SqlDialect::SqlServer).unwrap();
        assert_eq!(
            sql,
            "SELECT [id] FROM [dbo].[users] ORDER BY (SELECT NULL) OFFSET 0 ROWS FETCH NEXT 5 ROWS ONLY"
        );
    }

    #[test]
    fn test_mysql_operators() {
        let mut config = users();
        config.filters = vec![
            FilterCondition::new("active", FilterOperator::Equals, json!(true)),
            FilterCondition::new("region", FilterOperator::In, json!(["EU", "US"])),
            FilterCondition::new("email", FilterOperator::EndsWith, json!("@x.io")),
            FilterCondition::new("deleted_at", FilterOperator::IsNull, Value::Null),
        ];
        config.offset = Some(5);

        let sql = SqlBuilder::build(&config, SqlDialect::MySQL).unwrap();
        assert_eq!(
            sql,
            "SELECT * FROM `users` WHERE `active` = TRUE AND `region` IN ('EU', 'US') \
             AND `email` LIKE '%@x.io' ESCAPE '!' AND `deleted_at` IS NULL LIMIT 18446744073709551615 OFFSET 5"
        );
    }

    #[test]
    fn test_invalid_between_fails() {
        let mut config = users();
        config.filters = vec![FilterCondition::new("age", FilterOperator::Between, json!([1, 2, 3]))];
        assert!(matches!(
            SqlBuilder::build(&config, SqlDialect::PostgreSQL),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn test_parameterized_build() {
        let mut config = users();
        config.filters = vec![
            FilterCondition::new("name", FilterOperator::Contains, json!("O'Brien")),
            FilterCondition::new("age", FilterOperator::Between, json!([18, 65])),
        ];

        let query = SqlBuilder::build_parameterized(&config, SqlDialect::PostgreSQL).unwrap();
        assert_eq!(
            query.sql,
            r#"SELECT * FROM "users" WHERE "name" LIKE $1 ESCAPE '!' AND "age" BETWEEN $2 AND $3"#
        );
        assert_eq!(query.params, vec![json!("%O'Brien%"), json!(18), json!(65)]);

        let query = SqlBuilder::build_parameterized(&config, SqlDialect::SqlServer).unwrap();
        assert!(query.sql.contains("LIKE @P1"));
    }

    #[test]
    fn test_aggregates_joins_group_by_having() {
        let config = QueryBuilderConfig {
            table: "orders".to_string(),
            table_alias: Some("o".to_string()),
            columns: vec![
                SelectColumn::new("c.name"),
                SelectColumn::aggregated("o.total", AggregateFunction::Sum).with_alias("revenue"),
            ],
            joins: vec![JoinClause {
                join_type: JoinType::Left,
                table: "customers".to_string(),
                alias: Some("c".to_string()),
                left_column: "o.customer_id".to_string(),
                right_column: "c.id".to_string(),
            }],
            group_by: vec!["c.name".to_string()],
            having: vec![HavingCondition {
                aggregate: AggregateFunction::Sum,
                column: "o.total".to_string(),
                operator: FilterOperator::GreaterThan,
                value: json!(1000),
            }],
            order_by: vec![OrderByClause::new("revenue", SortDirection::Desc)],
            ..Default::default()
        };

        let sql = SqlBuilder::build(&config, SqlDialect::PostgreSQL).unwrap();
        assert_eq!(
            sql,
            r#"SELECT "c"."name", SUM("o"."total") AS "revenue" FROM "orders" AS "o" LEFT JOIN "customers" AS "c" ON "o"."customer_id" = "c"."id" GROUP BY "c"."name" HAVING SUM("o"."total") > 1000 ORDER BY "revenue" DESC"#
        );
    }

    #[test]
    fn test_validate_reports_all_errors() {
        let config = QueryBuilderConfig {
            columns: vec![
                SelectColumn::new("region"),
                SelectColumn::aggregated("amount", AggregateFunction::Sum),
            ],
            filters: vec![FilterCondition::new("x", FilterOperator::In, json!([]))],
            having: vec![HavingCondition {
                aggregate: AggregateFunction::Count,
                column: "*".to_string(),
                operator: FilterOperator::GreaterThan,
                value: json!(1),
            }],
            ..Default::default()
        };

        let result = SqlBuilder::validate(&config);
        assert!(!result.valid);
        assert_eq!(result.errors.len(), 4);
        assert!(SqlBuilder::validate(&users()).valid);
    }

    #[test]
    fn test_parse_sql_query() {
        let config = SqlBuilder::parse_sql_query(
            "SELECT id, COUNT(DISTINCT email) AS emails FROM public.users u \
             WHERE age >= 21 AND name LIKE 'Jo%' AND deleted_at IS NULL \
             GROUP BY id ORDER BY id DESC LIMIT 50 OFFSET 10",
        )
        .unwrap();

        assert_eq!(config.schema.as_deref(), Some("public"));
        assert_eq!(config.table, "users");
        assert_eq!(config.table_alias.as_deref(), Some("u"));
        assert_eq!(config.columns.len(), 2);
        assert_eq!(config.columns[1].aggregate, Some(AggregateFunction::CountDistinct));
        assert_eq!(config.columns[1].alias.as_deref(), Some("emails"));
        assert_eq!(config.filters.len(), 3);
        assert_eq!(config.filters[0].operator, FilterOperator::GreaterThanOrEqual);
        assert_eq!(config.filters[0].value, json!(21));
        assert_eq!(config.filters[1].operator, FilterOperator::StartsWith);
        assert_eq!(config.filters[1].value, json!("Jo"));
        assert_eq!(config.filters[2].operator, FilterOperator::IsNull);
        assert_eq!(config.group_by, vec!["id".to_string()]);
        assert_eq!(config.order_by[0].direction, SortDirection::Desc);
        assert_eq!(config.limit, Some(50));
        assert_eq!(config.offset, Some(10));
    }

    #[test]
    fn test_like_wildcards_in_values_are_literal() {
        let mut config = users();
        config.filters = vec![
            FilterCondition::new("code", FilterOperator::Contains, json!("50%_off!")),
            FilterCondition::new("sku", FilterOperator::StartsWith, json!("[A]")),
        ];

        let query = SqlBuilder::build_parameterized(&config, SqlDialect::PostgreSQL).unwrap();
        assert_eq!(
            query.sql,
            r#"SELECT * FROM "users" WHERE "code" LIKE $1 ESCAPE '!' AND "sku" LIKE $2 ESCAPE '!'"#
        );
        assert_eq!(query.params, vec![json!("%50!%!_off!!%"), json!("![A]%")]);

        let sql = SqlBuilder::build(&config, SqlDialect::SqlServer).unwrap();
        assert!(sql.contains("[code] LIKE '%50!%!_off!!%' ESCAPE '!'"));

        // Generated SQL parses back to the original operands
        let parsed = SqlBuilder::parse_sql_query(&SqlBuilder::build(&config, SqlDialect::MySQL).unwrap()).unwrap();
        assert_eq!(parsed.filters[0].operator, FilterOperator::Contains);
        assert_eq!(parsed.filters[0].value, json!("50%_off!"));
        assert_eq!(parsed.filters[1].operator, FilterOperator::StartsWith);
        assert_eq!(parsed.filters[1].value, json!("[A]"));
    }

    #[test]
    fn test_parse_rejects_non_select() {
        assert!(SqlBuilder::parse_sql_query("DELETE FROM users").is_err());
        let config = SqlBuilder::parse_sql_query("select * from orders where total > 10;").unwrap();
        assert!(config.columns.is_empty());
        assert!(config.table_alias.is_none());
        assert_eq!(config.filters.len(), 1);
    }
}
