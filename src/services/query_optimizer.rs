// Heuristic query optimizer.
//
// Lexical rules only: no statistics beyond what the caller passes in, and the
// resulting plan is advisory.

use regex::Regex;
use std::sync::LazyLock;

use crate::models::{
    OptimizationContext, PerformanceAnalysis, PerformanceRating, QueryPlan, QueryStatistics,
};

/// Row count assumed when the caller does not know the table size
pub const DEFAULT_TABLE_ROWS: u64 = 1_000;
/// Tables above this size get a default LIMIT when the query has none
pub const LARGE_TABLE_ROWS: u64 = 10_000;
pub const DEFAULT_LIMIT: u64 = 1_000;

const FILTER_SELECTIVITY: f64 = 0.9;

const KEYWORDS: &[&str] = &[
    "SELECT", "DISTINCT", "FROM", "WHERE", "AND", "OR", "NOT", "IN", "IS", "NULL", "LIKE", "BETWEEN",
    "JOIN", "INNER", "LEFT", "RIGHT", "FULL", "OUTER", "CROSS", "ON", "GROUP", "BY", "HAVING",
    "ORDER", "ASC", "DESC", "LIMIT", "OFFSET", "AS", "COUNT", "SUM", "AVG", "MIN", "MAX", "TOP",
    "FETCH", "NEXT", "FIRST", "ROWS", "ROW", "ONLY", "UNION", "ALL", "CASE", "WHEN", "THEN", "ELSE",
    "END", "EXISTS", "WITH",
];

static LIMIT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bLIMIT\s+(\d+)|^\s*SELECT\s+TOP\s+(\d+)|\bFETCH\s+(?:NEXT|FIRST)\s+(\d+)")
        .expect("valid regex")
});
static WHERE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\bWHERE\b").expect("valid regex"));
static AND_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\bAND\b").expect("valid regex"));
static JOIN_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\bJOIN\b").expect("valid regex"));
static GROUP_BY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bGROUP\s+BY\b").expect("valid regex"));
static ORDER_BY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bORDER\s+BY\b").expect("valid regex"));
static SELECT_STAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bSELECT\s+(?:DISTINCT\s+)?\*").expect("valid regex"));
static LEADING_WILDCARD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bLIKE\s+'%").expect("valid regex"));
static SELECT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*(SELECT|WITH)\b").expect("valid regex"));

pub struct QueryOptimizer;

impl QueryOptimizer {
    /// Produce an advisory plan for `query`
    pub fn optimize(query: &str, context: Option<&OptimizationContext>) -> QueryPlan {
        let default_context = OptimizationContext::default();
        let context = context.unwrap_or(&default_context);

        let mut optimized = normalize_query(query);
        let mut warnings = Vec::new();
        let row_count = context.table_row_count.unwrap_or(DEFAULT_TABLE_ROWS);

        let mut limit = extract_limit(&optimized);
        if limit.is_none() && row_count > LARGE_TABLE_ROWS && SELECT_RE.is_match(&optimized) {
            let trimmed = optimized.trim_end_matches(';').trim_end().to_string();
            optimized = format!("{} LIMIT {}", trimmed, DEFAULT_LIMIT);
            limit = Some(DEFAULT_LIMIT);
            warnings.push(format!(
                "Table has {} rows and the query has no LIMIT; added LIMIT {}",
                row_count, DEFAULT_LIMIT
            ));
        }

        let filter_clauses = WHERE_RE.find_iter(&optimized).count() + AND_RE.find_iter(&optimized).count();
        let mut estimated_rows = (row_count as f64 * FILTER_SELECTIVITY.powi(filter_clauses as i32)).round() as u64;
        if let Some(limit) = limit {
            estimated_rows = estimated_rows.min(limit);
        }

        let mut cost = 1.0;
        cost += 2.0 * JOIN_RE.find_iter(&optimized).count() as f64;
        if GROUP_BY_RE.is_match(&optimized) {
            cost += 1.0;
        }
        if ORDER_BY_RE.is_match(&optimized) {
            cost += 0.5;
        }

        let indexes: Vec<String> = context
            .available_indexes
            .iter()
            .filter(|index| references_word(&optimized, index))
            .cloned()
            .collect();
        if !indexes.is_empty() {
            cost /= 2.0;
        }

        let where_text = where_clause(&optimized);
        for column in &context.common_filters {
            let indexed = context
                .available_indexes
                .iter()
                .any(|i| i.eq_ignore_ascii_case(column));
            if !indexed && where_text.is_some_and(|w| references_word(w, column)) {
                warnings.push(format!(
                    "Column '{}' is frequently filtered but has no index; consider adding one",
                    column
                ));
            }
        }

        for warning in &warnings {
            tracing::warn!("Query optimizer: {}", warning);
        }

        QueryPlan {
            optimized_query: optimized,
            estimated_rows,
            estimated_cost: (cost * 100.0).round() / 100.0,
            indexes,
            warnings,
        }
    }

    /// Rate an executed query and suggest follow-ups
    pub fn analyze_query_performance(statistics: &QueryStatistics, plan: &QueryPlan) -> PerformanceAnalysis {
        let performance = match statistics.execution_time_ms {
            t if t < 100 => PerformanceRating::Excellent,
            t if t < 500 => PerformanceRating::Good,
            t if t < 2000 => PerformanceRating::Fair,
            _ => PerformanceRating::Poor,
        };

        let mut recommendations = Vec::new();
        if statistics.rows_scanned > 0
            && (statistics.rows_returned as f64) < statistics.rows_scanned as f64 * 0.1
        {
            recommendations.push(format!(
                "Query scanned {} rows to return {}; add selective filters or indexes",
                statistics.rows_scanned, statistics.rows_returned
            ));
        }
        if plan.indexes.is_empty() && statistics.rows_scanned > LARGE_TABLE_ROWS {
            recommendations.push("No index matched the query; index the filtered columns".to_string());
        }
        if plan.estimated_cost > 5.0 {
            recommendations.push("High estimated cost; reduce joins or aggregations".to_string());
        }
        if matches!(performance, PerformanceRating::Fair | PerformanceRating::Poor) {
            recommendations.push("Cache the results of this query".to_string());
        }
        recommendations.extend(plan.warnings.iter().cloned());

        PerformanceAnalysis {
            performance,
            recommendations,
        }
    }

    /// Static rule checks; the query is never modified
    pub fn suggest_optimizations(query: &str) -> Vec<String> {
        let mut suggestions = Vec::new();

        if SELECT_STAR_RE.is_match(query) {
            suggestions.push("Select only the columns you need instead of SELECT *".to_string());
        }
        if !WHERE_RE.is_match(query) {
            suggestions.push("Add a WHERE clause to reduce the rows scanned".to_string());
        }
        let joins = JOIN_RE.find_iter(query).count();
        if joins > 3 {
            suggestions.push(format!(
                "Query has {} joins; consider splitting it or denormalizing",
                joins
            ));
        }
        if ORDER_BY_RE.is_match(query) && extract_limit(query).is_none() {
            suggestions.push("ORDER BY without LIMIT sorts the whole result; add a LIMIT".to_string());
        }
        if LEADING_WILDCARD_RE.is_match(query) {
            suggestions.push("LIKE patterns starting with % cannot use an index".to_string());
        }

        suggestions
    }
}

fn extract_limit(query: &str) -> Option<u64> {
    let captures = LIMIT_RE.captures(query)?;
    (1..=3)
        .filter_map(|i| captures.get(i))
        .find_map(|m| m.as_str().parse().ok())
}

/// Text between WHERE and the next clause keyword
fn where_clause(query: &str) -> Option<&str> {
    let start = WHERE_RE.find(query)?.end();
    let rest = &query[start..];
    let end = ["GROUP BY", "ORDER BY", "HAVING", "LIMIT", "OFFSET"]
        .iter()
        .filter_map(|k| rest.find(k))
        .min()
        .unwrap_or(rest.len());
    Some(&rest[..end])
}

/// Case-insensitive whole-word match, ignoring identifier quotes
fn references_word(text: &str, word: &str) -> bool {
    let pattern = format!(r"(?i)\b{}\b", regex::escape(word));
    Regex::new(&pattern).map(|re| re.is_match(text)).unwrap_or(false)
}

/// Collapse whitespace and uppercase keywords outside quoted text
pub fn normalize_query(query: &str) -> String {
    let mut out = String::with_capacity(query.len());
    let mut word = String::new();
    let mut quote: Option<char> = None;
    let mut pending_space = false;

    let flush_word = |word: &mut String, out: &mut String| {
        if word.is_empty() {
            return;
        }
        let upper = word.to_uppercase();
        if KEYWORDS.contains(&upper.as_str()) {
            out.push_str(&upper);
        } else {
            out.push_str(word);
        }
        word.clear();
    };

    for ch in query.chars() {
        if let Some(q) = quote {
            out.push(ch);
            if ch == q {
                quote = None;
            }
            continue;
        }

        if ch.is_whitespace() {
            flush_word(&mut word, &mut out);
            pending_space = !out.is_empty();
            continue;
        }

        if pending_space {
            out.push(' ');
            pending_space = false;
        }

        if ch.is_alphanumeric() || ch == '_' {
            word.push(ch);
            continue;
        }

        flush_word(&mut word, &mut out);
        match ch {
            '\'' | '"' | '`' => quote = Some(ch),
            '[' => quote = Some(']'),
            _ => {}
        }
        out.push(ch);
    }
    flush_word(&mut word, &mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalization_keeps_quoted_text() {
        let normalized = normalize_query("select  id,\n name from users where name = 'select  me'");
        assert_eq!(normalized, "SELECT id, name FROM users WHERE name = 'select  me'");
    }

    #[test]
    fn test_large_table_gets_default_limit() {
        let context = OptimizationContext {
            table_row_count: Some(50_000),
            ..Default::default()
        };
        let plan = QueryOptimizer::optimize("select * from events", Some(&context));

        assert_eq!(plan.optimized_query, "SELECT * FROM events LIMIT 1000");
        assert_eq!(plan.estimated_rows, 1000);
        assert_eq!(plan.warnings.len(), 1);
    }

    #[test]
    fn test_small_table_is_not_limited() {
        let plan = QueryOptimizer::optimize("SELECT * FROM t", None);
        assert_eq!(plan.optimized_query, "SELECT * FROM t");
        assert_eq!(plan.estimated_rows, DEFAULT_TABLE_ROWS);
        assert!(plan.warnings.is_empty());
    }

    #[test]
    fn test_row_estimate_and_cost() {
        let context = OptimizationContext {
            table_row_count: Some(10_000),
            available_indexes: vec!["customer_id".to_string()],
            ..Default::default()
        };
        let plan = QueryOptimizer::optimize(
            "SELECT o.id FROM orders o JOIN customers c ON o.customer_id = c.id \
             WHERE o.total > 10 AND c.region = 'EU' GROUP BY o.id ORDER BY o.id",
            Some(&context),
        );

        // WHERE + one AND: 10000 * 0.9^2
        assert_eq!(plan.estimated_rows, 8100);
        // (1 + 2 + 1 + 0.5) halved for the matched index
        assert_eq!(plan.estimated_cost, 2.25);
        assert_eq!(plan.indexes, vec!["customer_id".to_string()]);
    }

    #[test]
    fn test_common_filter_without_index_warns() {
        let context = OptimizationContext {
            common_filters: vec!["status".to_string()],
            ..Default::default()
        };
        let plan = QueryOptimizer::optimize("SELECT id FROM t WHERE status = 'open' LIMIT 5", Some(&context));
        assert_eq!(plan.estimated_rows, 5);
        assert!(plan.warnings.iter().any(|w| w.contains("status")));
    }

    #[test]
    fn test_performance_ratings() {
        let plan = QueryOptimizer::optimize("SELECT 1", None);
        let rate = |ms| {
            QueryOptimizer::analyze_query_performance(
                &QueryStatistics {
                    execution_time_ms: ms,
                    ..Default::default()
                },
                &plan,
            )
            .performance
        };
        assert_eq!(rate(50), PerformanceRating::Excellent);
        assert_eq!(rate(300), PerformanceRating::Good);
        assert_eq!(rate(1500), PerformanceRating::Fair);
        assert_eq!(rate(5000), PerformanceRating::Poor);
    }

    #[test]
    fn test_suggestions() {
        let suggestions = QueryOptimizer::suggest_optimizations(
            "SELECT * FROM a JOIN b ON a.id = b.a JOIN c ON c.id = b.c JOIN d ON d.id = c.d \
             JOIN e ON e.id = d.e ORDER BY a.id",
        );
        assert_eq!(suggestions.len(), 4);

        let suggestions =
            QueryOptimizer::suggest_optimizations("SELECT id FROM users WHERE name LIKE '%son' LIMIT 10");
        assert_eq!(suggestions.len(), 1);
        assert!(suggestions[0].contains("LIKE"));
    }
}
