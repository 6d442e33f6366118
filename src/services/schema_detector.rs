// Primary key and relationship detection over parsed file data.

use std::cmp::Ordering;
use std::collections::HashSet;
use tracing::debug;

use crate::models::{
    ColumnDefinition, ColumnType, ParsedFileData, PrimaryKeyCandidate, Relationship, Row,
    SchemaDetectionResult,
};
use crate::services::data_profiler::{profile_data, round2};
use crate::services::type_inference::{is_null_value, value_to_string};

const MIN_KEY_UNIQUENESS: f64 = 0.95;
const MIN_KEY_COMPLETENESS: f64 = 0.95;
const MIN_KEY_SCORE: f64 = 0.9;
const MIN_RELATIONSHIP_OVERLAP: f64 = 0.8;

/// Rows scanned for relationship detection
pub const MAX_RELATIONSHIP_ROWS: usize = 1_000;
/// Columns compared pairwise for relationship detection
pub const MAX_RELATIONSHIP_COLUMNS: usize = 50;

const KEY_NAMES: &[&str] = &["id", "_id", "pk", "key", "uuid", "guid"];

/// Detect keys, relationships and quality for parsed data.
///
/// Returned columns are copies of the parsed definitions with
/// `is_primary_key` set for every accepted candidate.
pub fn detect_schema(parsed: &ParsedFileData) -> SchemaDetectionResult {
    let primary_keys = detect_primary_keys(&parsed.rows, &parsed.columns);
    let relationships = detect_relationships(&parsed.rows, &parsed.columns);

    let columns = parsed
        .columns
        .iter()
        .cloned()
        .map(|mut column| {
            column.is_primary_key = primary_keys
                .iter()
                .any(|pk| pk.column_name == column.column_name);
            column
        })
        .collect();

    SchemaDetectionResult {
        columns,
        primary_keys,
        relationships,
        data_quality: profile_data(&parsed.rows, &parsed.columns),
    }
}

/// Columns that can identify a row, best candidate first
pub fn detect_primary_keys(rows: &[Row], columns: &[ColumnDefinition]) -> Vec<PrimaryKeyCandidate> {
    if rows.is_empty() {
        return Vec::new();
    }

    let mut candidates: Vec<PrimaryKeyCandidate> = columns
        .iter()
        .filter_map(|column| score_key_candidate(rows, column))
        .filter(|candidate| candidate.score > MIN_KEY_SCORE)
        .collect();

    candidates.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
    candidates
}

fn score_key_candidate(rows: &[Row], column: &ColumnDefinition) -> Option<PrimaryKeyCandidate> {
    let non_null: Vec<String> = rows
        .iter()
        .filter_map(|r| r.get(&column.column_name))
        .filter(|v| !is_null_value(v))
        .map(value_to_string)
        .collect();
    if non_null.is_empty() {
        return None;
    }

    let distinct: HashSet<&str> = non_null.iter().map(String::as_str).collect();
    let uniqueness = distinct.len() as f64 / non_null.len() as f64;
    let completeness = non_null.len() as f64 / rows.len() as f64;
    if uniqueness < MIN_KEY_UNIQUENESS || completeness < MIN_KEY_COMPLETENESS {
        return None;
    }

    let type_score = match column.data_type {
        ColumnType::Integer | ColumnType::String => 1.0,
        _ => 0.5,
    };
    let name_score = if is_key_like_name(&column.column_name) {
        1.0
    } else {
        0.5
    };

    Some(PrimaryKeyCandidate {
        column_name: column.column_name.clone(),
        score: round2(uniqueness * completeness * type_score * name_score),
        uniqueness: round2(uniqueness),
        completeness: round2(completeness),
    })
}

fn is_key_like_name(name: &str) -> bool {
    let lower = name.trim().to_lowercase();
    KEY_NAMES.contains(&lower.as_str())
}

/// Column pairs whose value sets largely overlap.
///
/// Both directions of every pair are tested. Only the first
/// `MAX_RELATIONSHIP_ROWS` rows and `MAX_RELATIONSHIP_COLUMNS` columns are
/// considered.
pub fn detect_relationships(rows: &[Row], columns: &[ColumnDefinition]) -> Vec<Relationship> {
    if rows.len() > MAX_RELATIONSHIP_ROWS || columns.len() > MAX_RELATIONSHIP_COLUMNS {
        debug!(
            "Relationship detection bounded to {} rows and {} columns (input {}x{})",
            MAX_RELATIONSHIP_ROWS,
            MAX_RELATIONSHIP_COLUMNS,
            rows.len(),
            columns.len()
        );
    }
    let rows = &rows[..rows.len().min(MAX_RELATIONSHIP_ROWS)];
    let columns = &columns[..columns.len().min(MAX_RELATIONSHIP_COLUMNS)];

    let value_sets: Vec<HashSet<String>> = columns
        .iter()
        .map(|column| {
            rows.iter()
                .filter_map(|r| r.get(&column.column_name))
                .filter(|v| !is_null_value(v))
                .map(value_to_string)
                .collect()
        })
        .collect();

    let mut relationships = Vec::new();
    for i in 0..columns.len() {
        for j in (i + 1)..columns.len() {
            for (from, to) in [(i, j), (j, i)] {
                if let Some(confidence) = overlap(&value_sets[from], &value_sets[to]) {
                    relationships.push(Relationship {
                        from_column: columns[from].column_name.clone(),
                        to_column: columns[to].column_name.clone(),
                        confidence: round2(confidence),
                    });
                }
            }
        }
    }
    relationships
}

/// Share of `source` values also present in `target`, if above the threshold
fn overlap(source: &HashSet<String>, target: &HashSet<String>) -> Option<f64> {
    if source.is_empty() {
        return None;
    }
    let shared = source.intersection(target).count();
    let ratio = shared as f64 / source.len() as f64;
    (ratio > MIN_RELATIONSHIP_OVERLAP).then_some(ratio)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ParseOptions;
    use crate::services::file_parser::FileParser;
    use serde_json::json;

    fn column(name: &str, data_type: ColumnType) -> ColumnDefinition {
        ColumnDefinition {
            column_name: name.to_string(),
            data_type,
            is_nullable: false,
            is_primary_key: false,
            sample_values: Vec::new(),
            description: None,
        }
    }

    #[test]
    fn test_unique_id_column_is_primary_key() {
        let rows: Vec<Row> = (0..100)
            .map(|i| json!({ "id": i, "group": i % 2 }).as_object().cloned().unwrap())
            .collect();
        let columns = vec![column("id", ColumnType::Integer), column("group", ColumnType::Integer)];

        let keys = detect_primary_keys(&rows, &columns);
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].column_name, "id");
        assert_eq!(keys[0].score, 1.0);
    }

    #[test]
    fn test_half_duplicate_column_is_not_primary_key() {
        let rows: Vec<Row> = (0..100)
            .map(|i| json!({ "id": i / 2 }).as_object().cloned().unwrap())
            .collect();
        let keys = detect_primary_keys(&rows, &[column("id", ColumnType::Integer)]);
        assert!(keys.is_empty());
    }

    #[test]
    fn test_unnamed_unique_column_scores_too_low() {
        let rows: Vec<Row> = (0..20)
            .map(|i| json!({ "email": format!("u{}@x.io", i) }).as_object().cloned().unwrap())
            .collect();
        assert!(detect_primary_keys(&rows, &[column("email", ColumnType::String)]).is_empty());
    }

    #[test]
    fn test_relationships_in_both_directions() {
        let rows: Vec<Row> = (0..10)
            .map(|i| {
                json!({ "customer_id": i, "ref": i, "other": format!("x{}", i) })
                    .as_object()
                    .cloned()
                    .unwrap()
            })
            .collect();
        let columns = vec![
            column("customer_id", ColumnType::Integer),
            column("ref", ColumnType::Integer),
            column("other", ColumnType::String),
        ];

        let relationships = detect_relationships(&rows, &columns);
        assert_eq!(relationships.len(), 2);
        assert!(relationships
            .iter()
            .any(|r| r.from_column == "ref" && r.to_column == "customer_id" && r.confidence == 1.0));
    }

    #[test]
    fn test_csv_end_to_end() {
        let parsed = FileParser::parse(
            b"name,age\nAlice,30\nBob,\nCarol,25",
            "people.csv",
            &ParseOptions::default(),
        )
        .unwrap();
        assert_eq!(parsed.row_count, 3);

        let result = detect_schema(&parsed);
        let age = result.columns.iter().find(|c| c.column_name == "age").unwrap();
        assert_eq!(age.data_type, ColumnType::Integer);
        assert!(!age.is_primary_key);
        assert!(result.primary_keys.iter().all(|pk| pk.column_name != "age"));

        let age_profile = result
            .data_quality
            .columns
            .iter()
            .find(|c| c.column_name == "age")
            .unwrap();
        assert!((age_profile.null_percentage - 33.33).abs() < 0.01);
    }

    #[test]
    fn test_key_like_names() {
        assert!(is_key_like_name("ID"));
        assert!(is_key_like_name(" Guid "));
        assert!(is_key_like_name("_id"));
        assert!(!is_key_like_name("order_id"));
        assert!(!is_key_like_name("row_uuid"));
        assert!(!is_key_like_name("name"));
    }

    #[test]
    fn test_unique_foreign_key_column_is_not_primary_key() {
        let rows: Vec<Row> = (0..20)
            .map(|i| json!({ "customer_id": i }).as_object().cloned().unwrap())
            .collect();
        let keys = detect_primary_keys(&rows, &[column("customer_id", ColumnType::Integer)]);
        assert!(keys.is_empty());
    }
}
