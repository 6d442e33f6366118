// In-memory post-processing shared by the file and API fetch paths.
//
// Steps always run in the same order: filter, project, order, offset, limit.

use serde_json::Value;
use std::cmp::Ordering;

use crate::api::middleware::AppError;
use crate::models::{FetchOptions, FilterCondition, FilterOperator, OrderByClause, Row, SortDirection};
use crate::services::type_inference::{
    compare_values, is_null_value, parse_number, value_to_string, values_equal,
};

/// Output of the pipeline with the count after filtering, before pagination
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub rows: Vec<Row>,
    pub filtered_count: usize,
}

/// Apply `options` to `rows`.
pub fn apply(rows: Vec<Row>, options: &FetchOptions) -> Result<PipelineOutput, AppError> {
    options.validate()?;

    let filtered = apply_filters(rows, &options.filters)?;
    let filtered_count = filtered.len();
    let mut projected = project_columns(filtered, &options.columns);
    apply_order_by(&mut projected, &options.order_by);
    let paginated = paginate(projected, options.offset, options.limit);

    Ok(PipelineOutput {
        rows: paginated,
        filtered_count,
    })
}

/// Keep the rows matching every filter
pub fn apply_filters(rows: Vec<Row>, filters: &[FilterCondition]) -> Result<Vec<Row>, AppError> {
    if filters.is_empty() {
        return Ok(rows);
    }
    for filter in filters {
        filter.validate()?;
    }

    let mut kept = Vec::with_capacity(rows.len());
    for row in rows {
        let mut matches = true;
        for filter in filters {
            if !matches_filter(&row, filter)? {
                matches = false;
                break;
            }
        }
        if matches {
            kept.push(row);
        }
    }
    Ok(kept)
}

/// Evaluate one filter against one row
pub fn matches_filter(row: &Row, filter: &FilterCondition) -> Result<bool, AppError> {
    let cell = row.get(&filter.column).unwrap_or(&Value::Null);
    let expected = &filter.value;

    let result = match filter.operator {
        FilterOperator::IsNull => is_null_value(cell),
        FilterOperator::IsNotNull => !is_null_value(cell),
        _ if is_null_value(cell) => match filter.operator {
            FilterOperator::NotEquals => !is_null_value(expected),
            FilterOperator::NotIn => true,
            FilterOperator::Equals => is_null_value(expected),
            _ => false,
        },
        FilterOperator::Equals => values_equal(cell, expected),
        FilterOperator::NotEquals => !values_equal(cell, expected),
        FilterOperator::Contains => text_of(cell).contains(&text_of(expected)),
        FilterOperator::StartsWith => text_of(cell).starts_with(&text_of(expected)),
        FilterOperator::EndsWith => text_of(cell).ends_with(&text_of(expected)),
        FilterOperator::GreaterThan => ordered(cell, expected) == Some(Ordering::Greater),
        FilterOperator::GreaterThanOrEqual => {
            matches!(ordered(cell, expected), Some(Ordering::Greater | Ordering::Equal))
        }
        FilterOperator::LessThan => ordered(cell, expected) == Some(Ordering::Less),
        FilterOperator::LessThanOrEqual => {
            matches!(ordered(cell, expected), Some(Ordering::Less | Ordering::Equal))
        }
        FilterOperator::Between => {
            let (low, high) = filter.between_bounds()?;
            matches!(ordered(cell, low), Some(Ordering::Greater | Ordering::Equal))
                && matches!(ordered(cell, high), Some(Ordering::Less | Ordering::Equal))
        }
        FilterOperator::In => filter.list_values()?.iter().any(|v| values_equal(cell, v)),
        FilterOperator::NotIn => !filter.list_values()?.iter().any(|v| values_equal(cell, v)),
    };

    Ok(result)
}

/// Case-insensitive text used by the substring operators
fn text_of(value: &Value) -> String {
    value_to_string(value).to_lowercase()
}

/// Compare a cell with a filter operand; None when the operand is null
fn ordered(cell: &Value, operand: &Value) -> Option<Ordering> {
    if is_null_value(operand) {
        return None;
    }
    match (parse_number(cell), parse_number(operand)) {
        (Some(a), Some(b)) => a.partial_cmp(&b),
        _ => Some(value_to_string(cell).cmp(&value_to_string(operand))),
    }
}

/// Keep only `columns`, in that order; an empty list keeps every column.
/// Columns absent from a row are projected as null.
pub fn project_columns(rows: Vec<Row>, columns: &[String]) -> Vec<Row> {
    if columns.is_empty() {
        return rows;
    }
    rows.into_iter()
        .map(|row| {
            columns
                .iter()
                .map(|column| (column.clone(), row.get(column).cloned().unwrap_or(Value::Null)))
                .collect()
        })
        .collect()
}

/// Stable multi-key sort; nulls sort last in both directions
pub fn apply_order_by(rows: &mut [Row], order_by: &[OrderByClause]) {
    if order_by.is_empty() {
        return;
    }
    rows.sort_by(|a, b| {
        for clause in order_by {
            let left = a.get(&clause.column).unwrap_or(&Value::Null);
            let right = b.get(&clause.column).unwrap_or(&Value::Null);

            let ordering = match (is_null_value(left), is_null_value(right)) {
                (true, true) => Ordering::Equal,
                (true, false) => Ordering::Greater,
                (false, true) => Ordering::Less,
                (false, false) => {
                    let natural = compare_values(left, right);
                    match clause.direction {
                        SortDirection::Asc => natural,
                        SortDirection::Desc => natural.reverse(),
                    }
                }
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    });
}

/// Skip `offset` rows, then keep at most `limit`
pub fn paginate(rows: Vec<Row>, offset: Option<usize>, limit: Option<usize>) -> Vec<Row> {
    let skipped = rows.into_iter().skip(offset.unwrap_or(0));
    match limit {
        Some(limit) => skipped.take(limit).collect(),
        None => skipped.collect(),
    }
}
