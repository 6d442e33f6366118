use regex::Regex;
use sqlparser::ast::{SetExpr, Statement};
use sqlparser::dialect::{Dialect, MsSqlDialect, MySqlDialect, PostgreSqlDialect};
use sqlparser::parser::Parser;
use std::sync::LazyLock;

use crate::api::middleware::AppError;
use crate::models::SqlDialect;

static LEADING_SELECT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*SELECT(\s+DISTINCT)?\s+").expect("valid regex"));
static LIMIT_KEYWORD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bLIMIT\s+\d+|^\s*SELECT\s+(?:DISTINCT\s+)?TOP\s*\(?\s*\d+|\bFETCH\s+(?:NEXT|FIRST)\s+\d+\s+ROWS?\s+ONLY")
        .expect("valid regex")
});
static COMMENT_OR_STRING_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)'(?:[^']|'')*'|--[^\n]*|/\*.*?\*/").expect("valid regex")
});

/// SQL validation service for ensuring queries are safe and valid
pub struct SqlValidator;

impl SqlValidator {
    fn parser_dialect(dialect: SqlDialect) -> Box<dyn Dialect> {
        match dialect {
            SqlDialect::PostgreSQL => Box::new(PostgreSqlDialect {}),
            SqlDialect::MySQL => Box::new(MySqlDialect {}),
            SqlDialect::SqlServer => Box::new(MsSqlDialect {}),
        }
    }

    fn parse(dialect: SqlDialect, sql: &str) -> Result<Vec<Statement>, AppError> {
        let parser_dialect = Self::parser_dialect(dialect);
        Parser::parse_sql(parser_dialect.as_ref(), sql)
            .map_err(|e| AppError::Validation(format!("SQL parsing error: {}", e)))
    }

    /// Validate SQL and ensure it is a single SELECT statement
    pub fn validate_select_only(dialect: SqlDialect, sql: &str) -> Result<(), AppError> {
        let ast = Self::parse(dialect, sql)?;

        if ast.is_empty() {
            return Err(AppError::Validation("Empty SQL query".to_string()));
        }
        if ast.len() > 1 {
            return Err(AppError::Validation(
                "Multiple statements are not allowed. Submit one SELECT query.".to_string(),
            ));
        }

        match &ast[0] {
            Statement::Query(_) => Ok(()),
            Statement::Insert { .. } => Err(Self::rejected("INSERT")),
            Statement::Update { .. } => Err(Self::rejected("UPDATE")),
            Statement::Delete { .. } => Err(Self::rejected("DELETE")),
            Statement::Drop { .. } => Err(Self::rejected("DROP")),
            Statement::CreateTable { .. } => Err(Self::rejected("CREATE TABLE")),
            Statement::AlterTable { .. } => Err(Self::rejected("ALTER TABLE")),
            Statement::Truncate { .. } => Err(Self::rejected("TRUNCATE")),
            other => {
                let text = other.to_string();
                let keyword = text.split_whitespace().next().unwrap_or("This");
                Err(Self::rejected(keyword))
            }
        }
    }

    fn rejected(kind: &str) -> AppError {
        AppError::Validation(format!(
            "{} statements are not allowed. Only SELECT queries are permitted.",
            kind
        ))
    }

    /// Whether the query already limits its rows (LIMIT, TOP or OFFSET ... FETCH)
    ///
    /// Uses the AST when the dialect parser accepts the query, otherwise a
    /// lexical check that ignores comments and string literals.
    pub fn has_row_limit(dialect: SqlDialect, sql: &str) -> bool {
        match Self::parse(dialect, sql) {
            Ok(ast) => ast.first().map(Self::check_limit_in_statement).unwrap_or(false),
            Err(_) => {
                let stripped = COMMENT_OR_STRING_RE.replace_all(sql, " ");
                LIMIT_KEYWORD_RE.is_match(&stripped)
            }
        }
    }

    /// Check a statement for any row-limiting clause using the AST
    fn check_limit_in_statement(stmt: &Statement) -> bool {
        match stmt {
            Statement::Query(query) => {
                if query.limit_clause.is_some() || query.fetch.is_some() {
                    return true;
                }
                match query.body.as_ref() {
                    SetExpr::Select(select) => select.top.is_some(),
                    _ => false,
                }
            }
            _ => false,
        }
    }

    /// Add a dialect-correct row limit if the query has none.
    ///
    /// Returns the SQL to run and whether a limit was added. SQL Server gets
    /// `SELECT TOP n`; the other dialects get a trailing `LIMIT n`.
    pub fn apply_row_limit(dialect: SqlDialect, sql: &str, limit: u64) -> (String, bool) {
        if Self::has_row_limit(dialect, sql) {
            return (sql.to_string(), false);
        }

        let trimmed = sql.trim().trim_end_matches(';').trim_end();
        match dialect {
            SqlDialect::SqlServer => {
                if !LEADING_SELECT_RE.is_match(trimmed) {
                    tracing::warn!("Cannot add TOP to a query that does not start with SELECT");
                    return (trimmed.to_string(), false);
                }
                let limited = LEADING_SELECT_RE
                    .replace(trimmed, |caps: &regex::Captures| {
                        let distinct = if caps.get(1).is_some() { " DISTINCT" } else { "" };
                        format!("SELECT{} TOP {} ", distinct, limit)
                    })
                    .into_owned();
                (limited, true)
            }
            SqlDialect::PostgreSQL | SqlDialect::MySQL => {
                // A trailing line comment would swallow a same-line LIMIT
                let last_line = trimmed.rsplit('\n').next().unwrap_or_default();
                let separator = if last_line.contains("--") { '\n' } else { ' ' };
                (format!("{}{}LIMIT {}", trimmed, separator, limit), true)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_select_only() {
        let pg = SqlDialect::PostgreSQL;
        assert!(SqlValidator::validate_select_only(pg, "SELECT * FROM users").is_ok());
        assert!(SqlValidator::validate_select_only(pg, "INSERT INTO users VALUES (1)").is_err());
        assert!(SqlValidator::validate_select_only(pg, "UPDATE users SET name = 'test'").is_err());
        assert!(SqlValidator::validate_select_only(pg, "DELETE FROM users").is_err());
        assert!(SqlValidator::validate_select_only(pg, "SELECT 1; DROP TABLE users").is_err());
        assert!(SqlValidator::validate_select_only(pg, "").is_err());
    }

    #[test]
    fn test_rejection_is_validation_error() {
        let err = SqlValidator::validate_select_only(SqlDialect::MySQL, "DELETE FROM users").unwrap_err();
        assert!(matches!(err, AppError::Validation(ref msg) if msg.starts_with("DELETE")));
    }

    #[test]
    fn test_limit_detection_with_ast() {
        let pg = SqlDialect::PostgreSQL;
        assert!(!SqlValidator::has_row_limit(pg, "SELECT * FROM table_limit"));
        assert!(!SqlValidator::has_row_limit(pg, "SELECT limit_value FROM users"));
        assert!(!SqlValidator::has_row_limit(pg, "SELECT * FROM users /* LIMIT 5 */"));
        assert!(SqlValidator::has_row_limit(pg, "SELECT * FROM users LIMIT 50"));
        assert!(SqlValidator::has_row_limit(pg, "SELECT * FROM users LIMIT 100 OFFSET 10"));
    }

    #[test]
    fn test_sql_server_limits() {
        let ms = SqlDialect::SqlServer;
        assert!(SqlValidator::has_row_limit(ms, "SELECT TOP 10 * FROM users"));
        assert!(SqlValidator::has_row_limit(
            ms,
            "SELECT id FROM users ORDER BY id OFFSET 0 ROWS FETCH NEXT 5 ROWS ONLY"
        ));
        assert!(!SqlValidator::has_row_limit(ms, "SELECT id FROM users"));
    }

    #[test]
    fn test_apply_row_limit() {
        let (sql, applied) = SqlValidator::apply_row_limit(SqlDialect::PostgreSQL, "SELECT * FROM users;", 1000);
        assert_eq!(sql, "SELECT * FROM users LIMIT 1000");
        assert!(applied);

        let (sql, applied) = SqlValidator::apply_row_limit(SqlDialect::MySQL, "SELECT * FROM users LIMIT 5", 1000);
        assert_eq!(sql, "SELECT * FROM users LIMIT 5");
        assert!(!applied);

        let (sql, applied) =
            SqlValidator::apply_row_limit(SqlDialect::SqlServer, "select distinct name from users", 25);
        assert_eq!(sql, "SELECT DISTINCT TOP 25 name from users");
        assert!(applied);
    }

    #[test]
    fn test_row_limit_after_trailing_comment() {
        let (sql, applied) = SqlValidator::apply_row_limit(
            SqlDialect::PostgreSQL,
            "SELECT * FROM users -- active only",
            100,
        );
        assert!(applied);
        assert_eq!(sql, "SELECT * FROM users -- active only\nLIMIT 100");
        assert!(SqlValidator::has_row_limit(SqlDialect::PostgreSQL, &sql));

        let (sql, _) = SqlValidator::apply_row_limit(
            SqlDialect::MySQL,
            "-- report\nSELECT id FROM orders",
            10,
        );
        assert_eq!(sql, "-- report\nSELECT id FROM orders LIMIT 10");
    }

    #[test]
    fn test_lexical_fallback_ignores_literals() {
        // Unparseable text falls back to the lexical check
        assert!(!SqlValidator::has_row_limit(SqlDialect::PostgreSQL, "SELECT 'LIMIT 5' FROM users WHERE ("));
        assert!(SqlValidator::has_row_limit(SqlDialect::PostgreSQL, "SELECT a FROM users WHERE ( LIMIT 5"));
    }
}
