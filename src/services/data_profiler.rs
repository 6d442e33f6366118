// Column statistics and data quality scoring over an in-memory row set.
//
// Every call recomputes from the rows passed in; nothing is cached or updated
// incrementally.

use chrono::Utc;
use serde_json::{Number, Value};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use crate::models::{
    ColumnDefinition, ColumnProfile, ColumnType, DataIssue, DataProfile, IssueType, QualityScores,
    Row, Severity,
};
use crate::services::type_inference::{
    detect_data_type, is_boolean_token, is_date_string, is_null_value, parse_number,
    value_to_string,
};

const MAX_SAMPLE_VALUES: usize = 10;
const HIGH_NULL_PERCENTAGE: f64 = 50.0;
const MEDIUM_NULL_PERCENTAGE: f64 = 20.0;
const LOW_UNIQUE_PERCENTAGE: f64 = 50.0;
const VERY_LOW_UNIQUE_PERCENTAGE: f64 = 20.0;
const MIN_VALUES_FOR_DUPLICATE_CHECK: usize = 10;
const NUMERIC_MAJORITY_SHARE: f64 = 0.8;
const OUTLIER_Z_SCORE: f64 = 3.0;
const OUTLIER_SHARE: f64 = 0.05;

/// Profile `rows` using known column definitions.
pub fn profile_data(rows: &[Row], columns: &[ColumnDefinition]) -> DataProfile {
    let column_names: Vec<String> = columns.iter().map(|c| c.column_name.clone()).collect();
    let column_profiles: Vec<ColumnProfile> = columns
        .iter()
        .map(|c| profile_column(rows, &c.column_name, c.data_type))
        .collect();

    build_profile(rows, &column_names, column_profiles)
}

/// Profile rows whose schema is unknown; columns come from the union of
/// row keys in first-seen order and types are inferred.
pub fn profile_rows(rows: &[Row]) -> DataProfile {
    let column_names = collect_column_names(rows);
    let column_profiles: Vec<ColumnProfile> = column_names
        .iter()
        .map(|name| {
            let data_type = detect_data_type(rows.iter().filter_map(|r| r.get(name)));
            profile_column(rows, name, data_type)
        })
        .collect();

    build_profile(rows, &column_names, column_profiles)
}

pub fn collect_column_names(rows: &[Row]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut names = Vec::new();
    for row in rows {
        for key in row.keys() {
            if seen.insert(key.clone()) {
                names.push(key.clone());
            }
        }
    }
    names
}

fn build_profile(rows: &[Row], column_names: &[String], columns: Vec<ColumnProfile>) -> DataProfile {
    let total_rows = rows.len();
    let duplicate_rows = count_duplicate_rows(rows, column_names);

    let completeness = average(columns.iter().map(|c| 100.0 - c.null_percentage), 100.0);
    let uniqueness = if total_rows == 0 {
        100.0
    } else {
        (1.0 - duplicate_rows as f64 / total_rows as f64) * 100.0
    };
    let validity = average(columns.iter().map(|c| validity_of(rows, c)), 100.0);
    let consistency = average(columns.iter().map(|c| consistency_of(rows, &c.column_name)), 100.0);
    let overall = (completeness + uniqueness + validity + consistency) / 4.0;

    DataProfile {
        total_rows,
        total_columns: column_names.len(),
        duplicate_rows,
        columns,
        quality: QualityScores {
            completeness: round2(completeness),
            uniqueness: round2(uniqueness),
            validity: round2(validity),
            consistency: round2(consistency),
            overall: round2(overall),
        },
        profiled_at: Utc::now(),
    }
}

/// Statistics, issues and quality score for one column
pub fn profile_column(rows: &[Row], column: &str, data_type: ColumnType) -> ColumnProfile {
    let values: Vec<&Value> = rows
        .iter()
        .map(|r| r.get(column).unwrap_or(&Value::Null))
        .collect();
    let total_count = values.len();
    let non_null: Vec<&Value> = values.iter().copied().filter(|v| !is_null_value(v)).collect();
    let null_count = total_count - non_null.len();

    let distinct: HashSet<String> = non_null.iter().map(|v| value_to_string(v)).collect();
    let unique_count = distinct.len();
    let duplicate_count = non_null.len() - unique_count;

    let null_percentage = percentage(null_count, total_count);
    let unique_percentage = percentage(unique_count, non_null.len());

    let numbers: Vec<f64> = non_null.iter().filter_map(|v| parse_number(v)).collect();
    let mut profile = ColumnProfile {
        column_name: column.to_string(),
        data_type,
        total_count,
        null_count,
        null_percentage,
        unique_count,
        unique_percentage,
        duplicate_count,
        min: None,
        max: None,
        mean: None,
        median: None,
        mode: mode_of(&non_null),
        std_dev: None,
        sample_values: sample_values(&non_null),
        issues: Vec::new(),
        quality_score: 0.0,
    };

    if data_type.is_numeric() && !numbers.is_empty() {
        let mut sorted = numbers.clone();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
        let mean = numbers.iter().sum::<f64>() / numbers.len() as f64;

        profile.min = sorted.first().copied().map(number_value);
        profile.max = sorted.last().copied().map(number_value);
        profile.mean = Some(mean);
        profile.median = Some(median_of(&sorted));
        profile.std_dev = Some(std_dev_of(&numbers, mean));
    } else if !non_null.is_empty() {
        let mut sorted: Vec<String> = non_null.iter().map(|v| value_to_string(v)).collect();
        sorted.sort();
        profile.min = sorted.first().cloned().map(Value::String);
        profile.max = sorted.last().cloned().map(Value::String);
    }

    profile.issues = detect_issues(&profile, &non_null, &numbers);
    profile.quality_score = column_quality_score(&profile);
    profile
}

fn detect_issues(profile: &ColumnProfile, non_null: &[&Value], numbers: &[f64]) -> Vec<DataIssue> {
    let mut issues = Vec::new();

    if profile.null_percentage > MEDIUM_NULL_PERCENTAGE {
        let severity = if profile.null_percentage > HIGH_NULL_PERCENTAGE {
            Severity::High
        } else {
            Severity::Medium
        };
        issues.push(DataIssue {
            issue_type: IssueType::Missing,
            severity,
            description: format!(
                "Column '{}' has {}% missing values",
                profile.column_name, profile.null_percentage
            ),
            affected_rows: profile.null_count,
        });
    }

    if non_null.len() > MIN_VALUES_FOR_DUPLICATE_CHECK && profile.unique_percentage < LOW_UNIQUE_PERCENTAGE {
        let severity = if profile.unique_percentage < VERY_LOW_UNIQUE_PERCENTAGE {
            Severity::High
        } else {
            Severity::Medium
        };
        issues.push(DataIssue {
            issue_type: IssueType::Duplicate,
            severity,
            description: format!(
                "Column '{}' has only {}% unique values",
                profile.column_name, profile.unique_percentage
            ),
            affected_rows: profile.duplicate_count,
        });
    }

    let invalid = invalid_count(non_null, numbers);
    if invalid > 0 {
        issues.push(DataIssue {
            issue_type: IssueType::Invalid,
            severity: Severity::Medium,
            description: format!(
                "Column '{}' is mostly numeric but has {} non-numeric values",
                profile.column_name, invalid
            ),
            affected_rows: invalid,
        });
    }

    if let (Some(mean), Some(std_dev)) = (profile.mean, profile.std_dev) {
        if std_dev > 0.0 {
            let outliers = numbers
                .iter()
                .filter(|n| ((*n - mean) / std_dev).abs() > OUTLIER_Z_SCORE)
                .count();
            if outliers as f64 > numbers.len() as f64 * OUTLIER_SHARE {
                issues.push(DataIssue {
                    issue_type: IssueType::Outlier,
                    severity: Severity::Low,
                    description: format!(
                        "Column '{}' has {} values more than {} standard deviations from the mean",
                        profile.column_name, outliers, OUTLIER_Z_SCORE
                    ),
                    affected_rows: outliers,
                });
            }
        }
    }

    issues
}

/// Non-numeric values in a column that is otherwise numeric
fn invalid_count(non_null: &[&Value], numbers: &[f64]) -> usize {
    if non_null.is_empty() || numbers.len() == non_null.len() {
        return 0;
    }
    if (numbers.len() as f64) / (non_null.len() as f64) >= NUMERIC_MAJORITY_SHARE {
        non_null.len() - numbers.len()
    } else {
        0
    }
}

fn column_quality_score(profile: &ColumnProfile) -> f64 {
    let penalties: f64 = profile.issues.iter().map(|i| i.severity.penalty()).sum();
    let score = 100.0
        - profile.null_percentage * 0.5
        - (100.0 - profile.unique_percentage) * 0.3
        - penalties;
    round2(score.clamp(0.0, 100.0))
}

fn validity_of(rows: &[Row], profile: &ColumnProfile) -> f64 {
    let non_null = rows
        .iter()
        .filter_map(|r| r.get(&profile.column_name))
        .filter(|v| !is_null_value(v))
        .count();
    let invalid: usize = profile
        .issues
        .iter()
        .filter(|i| i.issue_type == IssueType::Invalid)
        .map(|i| i.affected_rows)
        .sum();
    if non_null == 0 {
        100.0
    } else {
        (1.0 - invalid as f64 / non_null as f64) * 100.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum ValueKind {
    Number,
    Boolean,
    Date,
    Text,
    Nested,
}

fn kind_of(value: &Value) -> ValueKind {
    match value {
        Value::Bool(_) => ValueKind::Boolean,
        Value::Array(_) | Value::Object(_) => ValueKind::Nested,
        v if parse_number(v).is_some() => ValueKind::Number,
        Value::String(s) if is_date_string(s) => ValueKind::Date,
        v if is_boolean_token(v) => ValueKind::Boolean,
        _ => ValueKind::Text,
    }
}

/// Share of non-null values that have the column's dominant kind
fn consistency_of(rows: &[Row], column: &str) -> f64 {
    let mut counts: HashMap<ValueKind, usize> = HashMap::new();
    let mut total = 0usize;
    for value in rows.iter().filter_map(|r| r.get(column)).filter(|v| !is_null_value(v)) {
        *counts.entry(kind_of(value)).or_default() += 1;
        total += 1;
    }
    if total == 0 {
        return 100.0;
    }
    let dominant = counts.values().copied().max().unwrap_or(0);
    dominant as f64 / total as f64 * 100.0
}

/// Rows whose full value tuple already appeared earlier
fn count_duplicate_rows(rows: &[Row], column_names: &[String]) -> usize {
    let mut seen = HashSet::with_capacity(rows.len());
    rows.iter()
        .filter(|row| {
            let tuple: Vec<&Value> = column_names
                .iter()
                .map(|c| row.get(c).unwrap_or(&Value::Null))
                .collect();
            let key = serde_json::to_string(&tuple).unwrap_or_default();
            !seen.insert(key)
        })
        .count()
}

fn mode_of(values: &[&Value]) -> Option<Value> {
    let mut counts: HashMap<String, (usize, usize)> = HashMap::new();
    for (index, value) in values.iter().enumerate() {
        let entry = counts.entry(value_to_string(value)).or_insert((0, index));
        entry.0 += 1;
    }
    // Highest count wins; ties go to the value seen first
    counts
        .values()
        .max_by(|a, b| a.0.cmp(&b.0).then(b.1.cmp(&a.1)))
        .map(|(_, first_index)| values[*first_index].clone())
}

fn sample_values(values: &[&Value]) -> Vec<Value> {
    let mut seen = HashSet::new();
    let mut samples = Vec::new();
    for value in values {
        if samples.len() >= MAX_SAMPLE_VALUES {
            break;
        }
        if seen.insert(value_to_string(value)) {
            samples.push((*value).clone());
        }
    }
    samples
}

fn median_of(sorted: &[f64]) -> f64 {
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// Population standard deviation
fn std_dev_of(numbers: &[f64], mean: f64) -> f64 {
    let variance = numbers.iter().map(|n| (n - mean).powi(2)).sum::<f64>() / numbers.len() as f64;
    variance.sqrt()
}

fn number_value(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
        Value::from(n as i64)
    } else {
        Number::from_f64(n).map(Value::Number).unwrap_or(Value::Null)
    }
}

fn percentage(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        round2(part as f64 / whole as f64 * 100.0)
    }
}

fn average<I: Iterator<Item = f64>>(values: I, empty: f64) -> f64 {
    let (sum, count) = values.fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
    if count == 0 {
        empty
    } else {
        sum / count as f64
    }
}

pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
