// Column type inference and scalar helpers shared by the parser, the
// in-memory row pipeline and the profiler.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use regex::Regex;
use serde_json::{Number, Value};
use std::cmp::Ordering;
use std::sync::LazyLock;

use crate::models::ColumnType;

static DATE_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        // ISO 8601 date with optional time and offset
        r"^\d{4}-\d{2}-\d{2}([T ]\d{2}:\d{2}(:\d{2}(\.\d+)?)?(Z|[+-]\d{2}:?\d{2})?)?$",
        r"^\d{4}/\d{1,2}/\d{1,2}$",
        r"^\d{1,2}/\d{1,2}/\d{2,4}$",
        r"^\d{1,2}-\d{1,2}-\d{2,4}$",
    ]
    .iter()
    .filter_map(|p| Regex::new(p).ok())
    .collect()
});

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%d %B %Y", "%d %b %Y", "%B %d, %Y", "%b %d, %Y"];
const DATETIME_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y/%m/%d %H:%M:%S"];

const BOOLEAN_TOKENS: &[&str] = &["true", "false", "yes", "no", "1", "0", "y", "n"];
const TRUE_TOKENS: &[&str] = &["true", "yes", "1", "y"];

/// Null, or a string that is empty after trimming
pub fn is_null_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

/// Display form of a scalar; strings are not quoted
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Parse a finite number from a JSON number or numeric string
pub fn parse_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64().filter(|f| f.is_finite()),
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return None;
            }
            trimmed.parse::<f64>().ok().filter(|f| f.is_finite())
        }
        _ => None,
    }
}

pub fn is_boolean_token(value: &Value) -> bool {
    match value {
        Value::Bool(_) => true,
        Value::String(s) => BOOLEAN_TOKENS.contains(&s.trim().to_lowercase().as_str()),
        Value::Number(n) => matches!(n.as_f64(), Some(f) if f == 0.0 || f == 1.0),
        _ => false,
    }
}

/// Whether a string looks like a date, by pattern or by a known format
pub fn is_date_string(s: &str) -> bool {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return false;
    }
    if DATE_PATTERNS.iter().any(|re| re.is_match(trimmed)) {
        return true;
    }
    parse_date(trimmed).is_some()
}

/// Parse the date formats accepted by inference into a timestamp
pub fn parse_date(s: &str) -> Option<NaiveDateTime> {
    let trimmed = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.naive_utc());
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(trimmed) {
        return Some(dt.naive_utc());
    }
    for format in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Some(dt);
        }
    }
    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(trimmed, format) {
            return date.and_hms_opt(0, 0, 0);
        }
    }
    None
}

/// Infer a column type from its values.
///
/// Nulls are skipped. Numeric wins when every value is a finite number
/// (integer if all are integral), then date, then boolean, else string.
/// An empty or all-null column is a string column.
pub fn detect_data_type<'a, I>(values: I) -> ColumnType
where
    I: IntoIterator<Item = &'a Value>,
{
    let non_null: Vec<&Value> = values.into_iter().filter(|v| !is_null_value(v)).collect();
    if non_null.is_empty() {
        return ColumnType::String;
    }

    let numbers: Vec<f64> = non_null.iter().filter_map(|v| parse_number(v)).collect();
    if numbers.len() == non_null.len() {
        return if numbers.iter().all(|n| n.fract() == 0.0) {
            ColumnType::Integer
        } else {
            ColumnType::Decimal
        };
    }

    if non_null
        .iter()
        .all(|v| matches!(v, Value::String(s) if is_date_string(s)))
    {
        return ColumnType::Date;
    }

    if non_null.iter().all(|v| is_boolean_token(v)) {
        return ColumnType::Boolean;
    }

    ColumnType::String
}

/// Convert a raw value to the representation of `column_type`.
/// Values that do not fit are returned unchanged.
pub fn coerce_value(value: &Value, column_type: ColumnType) -> Value {
    if is_null_value(value) {
        return Value::Null;
    }
    match column_type {
        ColumnType::Integer => match parse_number(value) {
            Some(n) if n >= i64::MIN as f64 && n <= i64::MAX as f64 => Value::from(n as i64),
            _ => value.clone(),
        },
        ColumnType::Decimal => parse_number(value)
            .and_then(Number::from_f64)
            .map(Value::Number)
            .unwrap_or_else(|| value.clone()),
        ColumnType::Boolean => match value {
            Value::Bool(_) => value.clone(),
            other => {
                let token = value_to_string(other).trim().to_lowercase();
                Value::Bool(TRUE_TOKENS.contains(&token.as_str()))
            }
        },
        ColumnType::Date | ColumnType::String => value.clone(),
    }
}

/// Loose equality: numeric when both sides are numbers, boolean when one side
/// is a boolean, otherwise by display string.
pub fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Null, Value::Null) => true,
        (Value::Null, _) | (_, Value::Null) => false,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::Bool(b), other) | (other, Value::Bool(b)) => {
            is_boolean_token(other) && {
                let token = value_to_string(other).trim().to_lowercase();
                TRUE_TOKENS.contains(&token.as_str()) == *b
            }
        }
        _ => match (parse_number(left), parse_number(right)) {
            (Some(a), Some(b)) => a == b,
            _ => value_to_string(left) == value_to_string(right),
        },
    }
}

/// Total order over scalars: numbers first (numerically), then everything
/// else by display string, then nulls.
pub fn compare_values(left: &Value, right: &Value) -> Ordering {
    match (is_null_value(left), is_null_value(right)) {
        (true, true) => return Ordering::Equal,
        (true, false) => return Ordering::Greater,
        (false, true) => return Ordering::Less,
        _ => {}
    }
    match (parse_number(left), parse_number(right)) {
        (Some(a), Some(b)) => a.total_cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => value_to_string(left).cmp(&value_to_string(right)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_integer_vs_decimal() {
        assert_eq!(detect_data_type(&[json!("1"), json!("2"), json!(null)]), ColumnType::Integer);
        assert_eq!(detect_data_type(&[json!("1"), json!("2.5")]), ColumnType::Decimal);
        assert_eq!(detect_data_type(&[json!(3), json!(4.0)]), ColumnType::Integer);
    }

    #[test]
    fn test_date_and_boolean_detection() {
        assert_eq!(
            detect_data_type(&[json!("2024-01-15"), json!("03/04/2023"), json!("2024-02-01T10:00:00Z")]),
            ColumnType::Date
        );
        assert_eq!(detect_data_type(&[json!("Yes"), json!("n"), json!("TRUE")]), ColumnType::Boolean);
        assert_eq!(detect_data_type(&[json!("yes"), json!("maybe")]), ColumnType::String);
    }

    #[test]
    fn test_empty_column_defaults_to_string() {
        assert_eq!(detect_data_type(&[]), ColumnType::String);
        assert_eq!(detect_data_type(&[json!(null), json!("  ")]), ColumnType::String);
    }

    #[test]
    fn test_non_finite_numbers_are_not_numeric() {
        assert!(parse_number(&json!("inf")).is_none());
        assert!(parse_number(&json!("NaN")).is_none());
        assert_eq!(parse_number(&json!(" 42 ")), Some(42.0));
    }

    #[test]
    fn test_coercion() {
        assert_eq!(coerce_value(&json!("30"), ColumnType::Integer), json!(30));
        assert_eq!(coerce_value(&json!("2.5"), ColumnType::Decimal), json!(2.5));
        assert_eq!(coerce_value(&json!("Y"), ColumnType::Boolean), json!(true));
        assert_eq!(coerce_value(&json!(""), ColumnType::String), Value::Null);
    }

    #[test]
    fn test_loose_equality_and_ordering() {
        assert!(values_equal(&json!("30"), &json!(30)));
        assert!(values_equal(&json!(true), &json!("yes")));
        assert!(!values_equal(&json!(null), &json!("")));
        assert_eq!(compare_values(&json!(10), &json!("9")), Ordering::Greater);
        assert_eq!(compare_values(&json!(null), &json!(1)), Ordering::Greater);
    }

    #[test]
    fn test_mixed_values_order_is_transitive() {
        let values = [
            json!(2),
            json!(10),
            json!("1a"),
            json!("7"),
            json!(-3.5),
            json!("abc"),
            json!(true),
            json!(null),
            json!(""),
        ];

        // Numbers always precede text
        assert_eq!(compare_values(&json!(10), &json!("1a")), Ordering::Less);
        assert_eq!(compare_values(&json!("1a"), &json!(2)), Ordering::Greater);

        for a in &values {
            assert_eq!(compare_values(a, a), Ordering::Equal);
            for b in &values {
                assert_eq!(compare_values(a, b), compare_values(b, a).reverse());
                for c in &values {
                    if compare_values(a, b) != Ordering::Greater
                        && compare_values(b, c) != Ordering::Greater
                    {
                        assert_ne!(compare_values(a, c), Ordering::Greater, "{} {} {}", a, b, c);
                    }
                }
            }
        }
    }
}
