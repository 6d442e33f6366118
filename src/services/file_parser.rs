// File parser: decodes CSV, Excel and JSON uploads into typed rows.

use calamine::{open_workbook_auto_from_rs, Data, DataType as _, Reader};
use chrono::{NaiveDateTime, Timelike};
use serde_json::{Number, Value};
use std::collections::HashSet;
use std::io::Cursor;
use std::path::Path;

use crate::api::middleware::AppError;
use crate::models::{ColumnDefinition, ColumnType, ParseOptions, ParsedFileData, Row};
use crate::services::type_inference::{coerce_value, detect_data_type, is_null_value};

/// Rows kept in `ParsedFileData::sample_data`
pub const SAMPLE_ROWS: usize = 10;
/// Distinct values kept per column definition
const SAMPLE_VALUES: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Csv,
    Excel,
    Json,
    Parquet,
}

impl FileFormat {
    /// Resolve the format from a file name's extension
    pub fn from_file_name(file_name: &str) -> Result<Self, AppError> {
        let extension = Path::new(file_name)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_lowercase())
            .ok_or_else(|| {
                AppError::UnsupportedFormat(format!("File '{}' has no extension", file_name))
            })?;

        match extension.as_str() {
            "csv" => Ok(FileFormat::Csv),
            "xlsx" | "xls" => Ok(FileFormat::Excel),
            "json" | "jsonl" | "ndjson" => Ok(FileFormat::Json),
            "parquet" => Ok(FileFormat::Parquet),
            other => Err(AppError::UnsupportedFormat(format!(
                "Unsupported file format: .{}",
                other
            ))),
        }
    }
}

/// Tabular file decoder
pub struct FileParser;

impl FileParser {
    /// Parse `buffer` according to the extension of `file_name`.
    ///
    /// `options.limit` truncates the returned rows only; `row_count` always
    /// reports the full parsed length.
    pub fn parse(
        buffer: &[u8],
        file_name: &str,
        options: &ParseOptions,
    ) -> Result<ParsedFileData, AppError> {
        let format = FileFormat::from_file_name(file_name)?;

        let (headers, rows) = match format {
            FileFormat::Csv => Self::parse_csv(buffer)?,
            FileFormat::Excel => Self::parse_excel(buffer)?,
            FileFormat::Json => Self::parse_json(buffer)?,
            FileFormat::Parquet => {
                return Err(AppError::UnsupportedFormat(
                    "Parquet files are not supported yet".to_string(),
                ))
            }
        };

        let parsed = Self::build_parsed_data(headers, rows, options);
        tracing::debug!(
            "Parsed {} rows and {} columns from {}",
            parsed.row_count,
            parsed.column_count,
            file_name
        );
        Ok(parsed)
    }

    fn parse_csv(buffer: &[u8]) -> Result<(Vec<String>, Vec<Row>), AppError> {
        let buffer = buffer.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(buffer);
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(buffer);

        let raw_headers: Vec<String> = reader
            .headers()
            .map_err(|e| AppError::Parse(format!("Invalid CSV header: {}", e)))?
            .iter()
            .map(|h| h.to_string())
            .collect();
        let headers = Self::normalize_headers(raw_headers);

        let mut rows = Vec::new();
        for (idx, record) in reader.records().enumerate() {
            let record = record.map_err(|e| {
                AppError::Parse(format!("Invalid CSV content at record {}: {}", idx + 1, e))
            })?;
            if record.iter().all(|field| field.is_empty()) {
                continue;
            }

            let row: Row = headers
                .iter()
                .enumerate()
                .map(|(col_idx, header)| {
                    let value = match record.get(col_idx) {
                        Some(field) if !field.is_empty() => Value::String(field.to_string()),
                        _ => Value::Null,
                    };
                    (header.clone(), value)
                })
                .collect();
            rows.push(row);
        }

        Ok((headers, rows))
    }

    fn parse_excel(buffer: &[u8]) -> Result<(Vec<String>, Vec<Row>), AppError> {
        let mut workbook = open_workbook_auto_from_rs(Cursor::new(buffer.to_vec()))
            .map_err(|e| AppError::Parse(format!("Invalid Excel file: {}", e)))?;

        let range = workbook
            .worksheet_range_at(0)
            .ok_or_else(|| AppError::Parse("Excel workbook contains no sheets".to_string()))?
            .map_err(|e| AppError::Parse(format!("Failed to read Excel sheet: {}", e)))?;

        let mut sheet_rows = range.rows();
        let headers = match sheet_rows.next() {
            Some(header_row) => Self::normalize_headers(
                header_row
                    .iter()
                    .map(|cell| match Self::excel_cell_to_json(cell) {
                        Value::Null => String::new(),
                        Value::String(s) => s,
                        other => other.to_string(),
                    })
                    .collect(),
            ),
            None => return Ok((Vec::new(), Vec::new())),
        };

        let mut rows = Vec::new();
        for sheet_row in sheet_rows {
            let values: Vec<Value> = sheet_row.iter().map(Self::excel_cell_to_json).collect();
            if values.iter().all(is_null_value) {
                continue;
            }
            let row: Row = headers
                .iter()
                .enumerate()
                .map(|(idx, header)| (header.clone(), values.get(idx).cloned().unwrap_or(Value::Null)))
                .collect();
            rows.push(row);
        }

        Ok((headers, rows))
    }

    fn excel_cell_to_json(cell: &Data) -> Value {
        match cell {
            Data::Empty | Data::Error(_) => Value::Null,
            Data::String(s) if s.trim().is_empty() => Value::Null,
            Data::String(s) => Value::String(s.clone()),
            Data::Int(i) => Value::from(*i),
            Data::Float(f) => Number::from_f64(*f).map(Value::Number).unwrap_or(Value::Null),
            Data::Bool(b) => Value::Bool(*b),
            other => other
                .as_datetime()
                .map(|dt| Value::String(Self::format_datetime(dt)))
                .unwrap_or_else(|| Value::String(other.to_string())),
        }
    }

    fn format_datetime(dt: NaiveDateTime) -> String {
        if dt.hour() == 0 && dt.minute() == 0 && dt.second() == 0 {
            dt.format("%Y-%m-%d").to_string()
        } else {
            dt.format("%Y-%m-%dT%H:%M:%S").to_string()
        }
    }

    /// Parse a JSON array (or single object), falling back to JSON Lines
    fn parse_json(buffer: &[u8]) -> Result<(Vec<String>, Vec<Row>), AppError> {
        let text = std::str::from_utf8(buffer)
            .map_err(|e| AppError::Parse(format!("JSON file is not valid UTF-8: {}", e)))?;
        let text = text.trim_start_matches('\u{feff}').trim();

        let items = match serde_json::from_str::<Value>(text) {
            Ok(Value::Array(items)) => items,
            Ok(Value::Object(object)) => vec![Value::Object(object)],
            Ok(_) => {
                return Err(AppError::Parse(
                    "JSON content must be an array of objects or a single object".to_string(),
                ))
            }
            Err(document_err) => {
                let mut items = Vec::new();
                for (line_no, line) in text.lines().enumerate() {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    let item = serde_json::from_str::<Value>(line).map_err(|line_err| {
                        AppError::Parse(format!(
                            "Invalid JSON: {} (JSON Lines fallback failed at line {}: {})",
                            document_err,
                            line_no + 1,
                            line_err
                        ))
                    })?;
                    items.push(item);
                }
                items
            }
        };

        let mut headers: Vec<String> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        let mut rows = Vec::with_capacity(items.len());

        for item in items {
            let object = match item {
                Value::Object(object) => object,
                scalar => {
                    let mut wrapped = Row::new();
                    wrapped.insert("value".to_string(), scalar);
                    wrapped
                }
            };

            let row: Row = object
                .into_iter()
                .map(|(key, value)| {
                    if seen.insert(key.clone()) {
                        headers.push(key.clone());
                    }
                    let value = match value {
                        nested @ (Value::Array(_) | Value::Object(_)) => Value::String(nested.to_string()),
                        scalar => scalar,
                    };
                    (key, value)
                })
                .collect();
            rows.push(row);
        }

        // Fill keys missing from individual objects so every row has the same shape
        for row in rows.iter_mut() {
            for header in &headers {
                if !row.contains_key(header) {
                    row.insert(header.clone(), Value::Null);
                }
            }
        }

        Ok((headers, rows))
    }

    /// Name blank headers `column_N` and de-duplicate repeated ones
    fn normalize_headers(raw: Vec<String>) -> Vec<String> {
        let mut seen: HashSet<String> = HashSet::new();
        raw.into_iter()
            .enumerate()
            .map(|(idx, header)| {
                let base = match header.trim() {
                    "" => format!("column_{}", idx + 1),
                    trimmed => trimmed.to_string(),
                };
                let mut name = base.clone();
                let mut suffix = 2;
                while !seen.insert(name.clone()) {
                    name = format!("{}_{}", base, suffix);
                    suffix += 1;
                }
                name
            })
            .collect()
    }

    fn build_parsed_data(headers: Vec<String>, mut rows: Vec<Row>, options: &ParseOptions) -> ParsedFileData {
        let mut columns = Vec::with_capacity(headers.len());

        for header in &headers {
            let data_type = if options.detect_schema {
                detect_data_type(rows.iter().filter_map(|row| row.get(header)))
            } else {
                ColumnType::String
            };

            let mut is_nullable = false;
            let mut samples: Vec<Value> = Vec::new();
            for row in rows.iter_mut() {
                let Some(value) = row.get_mut(header) else {
                    is_nullable = true;
                    continue;
                };
                if options.detect_schema {
                    *value = coerce_value(value, data_type);
                }
                if is_null_value(value) {
                    is_nullable = true;
                } else if samples.len() < SAMPLE_VALUES && !samples.contains(value) {
                    samples.push(value.clone());
                }
            }

            columns.push(ColumnDefinition {
                column_name: header.clone(),
                data_type,
                is_nullable,
                is_primary_key: false,
                sample_values: samples,
                description: None,
            });
        }

        let row_count = rows.len();
        let sample_data: Vec<Row> = rows.iter().take(SAMPLE_ROWS).cloned().collect();
        if let Some(limit) = options.limit {
            rows.truncate(limit);
        }

        ParsedFileData {
            rows,
            column_count: columns.len(),
            columns,
            row_count,
            sample_data,
        }
    }
}
