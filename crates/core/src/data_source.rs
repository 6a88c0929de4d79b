//! Data-source loading: turns a create-task payload into data rows.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CoreError;
use crate::types::Row;

/// Data rows supplied with a create-task request.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DataSource {
    /// Rows given directly as JSON objects.
    Inline { rows: Vec<Row> },
    /// A JSON document holding an array of objects.
    Json { content: String },
    /// CSV text; the first non-blank line holds the headers.
    Csv { content: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSourceKind {
    Inline,
    Json,
    Csv,
}

/// Descriptor kept on the task record in place of the rows themselves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataSourceInfo {
    pub kind: DataSourceKind,
    pub row_count: u64,
}

impl DataSource {
    pub fn kind(&self) -> DataSourceKind {
        match self {
            Self::Inline { .. } => DataSourceKind::Inline,
            Self::Json { .. } => DataSourceKind::Json,
            Self::Csv { .. } => DataSourceKind::Csv,
        }
    }

    /// Parse the source into rows. Unreadable content is a validation error.
    pub fn load(&self) -> Result<Vec<Row>, CoreError> {
        match self {
            Self::Inline { rows } => Ok(rows.clone()),
            Self::Json { content } => parse_json_rows(content),
            Self::Csv { content } => parse_csv_rows(content),
        }
    }
}

fn parse_json_rows(content: &str) -> Result<Vec<Row>, CoreError> {
    let value: Value = serde_json::from_str(content)
        .map_err(|e| CoreError::Validation(format!("data source is not valid JSON: {e}")))?;

    let Value::Array(items) = value else {
        return Err(CoreError::Validation(
            "JSON data source must be an array of objects".into(),
        ));
    };

    items
        .into_iter()
        .enumerate()
        .map(|(i, item)| match item {
            Value::Object(map) => Ok(map),
            _ => Err(CoreError::Validation(format!(
                "JSON data source row {i} is not an object"
            ))),
        })
        .collect()
}

fn parse_csv_rows(content: &str) -> Result<Vec<Row>, CoreError> {
    let mut lines = content.lines().filter(|l| !l.trim().is_empty());

    let headers = match lines.next() {
        Some(line) => split_csv_line(line)?,
        None => {
            return Err(CoreError::Validation(
                "CSV data source has no header line".into(),
            ))
        }
    };
    if headers.iter().any(|h| h.is_empty()) {
        return Err(CoreError::Validation(
            "CSV data source has an empty header".into(),
        ));
    }

    lines
        .enumerate()
        .map(|(i, line)| {
            let fields = split_csv_line(line)?;
            if fields.len() != headers.len() {
                return Err(CoreError::Validation(format!(
                    "CSV row {} has {} fields, expected {}",
                    i + 1,
                    fields.len(),
                    headers.len()
                )));
            }
            Ok(headers
                .iter()
                .cloned()
                .zip(fields.into_iter().map(Value::String))
                .collect())
        })
        .collect()
}

/// Split one CSV record. Double-quoted fields may contain commas and `""`.
fn split_csv_line(line: &str) -> Result<Vec<String>, CoreError> {
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match (c, in_quotes) {
            ('"', true) => {
                if chars.peek() == Some(&'"') {
                    chars.next();
                    field.push('"');
                } else {
                    in_quotes = false;
                }
            }
            ('"', false) if field.is_empty() => in_quotes = true,
            (',', false) => fields.push(std::mem::take(&mut field).trim().to_string()),
            _ => field.push(c),
        }
    }

    if in_quotes {
        return Err(CoreError::Validation(format!(
            "unterminated quoted field in CSV line: {line}"
        )));
    }
    fields.push(field.trim().to_string());
    Ok(fields)
}
