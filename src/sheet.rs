//! Tabular sheet templates. The workbook engine itself lives behind
//! [`SheetWriter`]; this module decides what is written into which binding.

use chrono::NaiveDate;
use serde_json::Value as JsonValue;

use crate::error::DocBindError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RowWriteMode {
    /// Shift existing rows below the binding down.
    #[default]
    Insert,
    /// Write over whatever the template already holds.
    Overwrite,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Empty,
    Text(String),
    Number(f64),
    Bool(bool),
    Date(NaiveDate),
}

impl CellValue {
    /// Maps one raw collection field. Strings become dates only when the
    /// column asks for a date format and the string is an ISO date.
    pub fn from_json(value: &JsonValue, column: &ColumnBinding) -> Self {
        match value {
            JsonValue::Null => CellValue::Empty,
            JsonValue::Bool(flag) => CellValue::Bool(*flag),
            JsonValue::Number(number) => number
                .as_f64()
                .map(CellValue::Number)
                .unwrap_or_else(|| CellValue::Text(number.to_string())),
            JsonValue::String(text) => {
                if column.date_format.is_some() {
                    if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
                        return CellValue::Date(date);
                    }
                }
                CellValue::Text(text.clone())
            }
            other => CellValue::Text(other.to_string()),
        }
    }
}

/// One column of a row binding: which element field feeds it and how the
/// workbook should format it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnBinding {
    pub key: String,
    pub number_format: Option<String>,
    pub date_format: Option<String>,
}

impl ColumnBinding {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            number_format: None,
            date_format: None,
        }
    }

    pub fn number_format(mut self, format: impl Into<String>) -> Self {
        self.number_format = Some(format.into());
        self
    }

    pub fn date_format(mut self, format: impl Into<String>) -> Self {
        self.date_format = Some(format.into());
        self
    }
}

/// Where a placeholder lands in the workbook. Placeholders without an
/// explicit binding use a range named after themselves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SheetBinding {
    pub placeholder: String,
    /// Named range or header in the workbook.
    pub range: String,
    pub columns: Vec<ColumnBinding>,
    pub mode: RowWriteMode,
    pub number_format: Option<String>,
}

impl SheetBinding {
    pub fn new(placeholder: impl Into<String>) -> Self {
        let placeholder = placeholder.into();
        Self {
            range: placeholder.clone(),
            placeholder,
            columns: Vec::new(),
            mode: RowWriteMode::default(),
            number_format: None,
        }
    }

    pub fn range(mut self, range: impl Into<String>) -> Self {
        self.range = range.into();
        self
    }

    pub fn column(mut self, column: ColumnBinding) -> Self {
        self.columns.push(column);
        self
    }

    pub fn mode(mut self, mode: RowWriteMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn number_format(mut self, format: impl Into<String>) -> Self {
        self.number_format = Some(format.into());
        self
    }

    /// Columns for `rows`: the declared ones, else the keys of the first
    /// object element.
    pub(crate) fn effective_columns(&self, rows: &[JsonValue]) -> Vec<ColumnBinding> {
        if !self.columns.is_empty() {
            return self.columns.clone();
        }
        match rows.first() {
            Some(JsonValue::Object(fields)) => fields.keys().map(ColumnBinding::new).collect(),
            _ => vec![ColumnBinding::new("value")],
        }
    }
}

pub(crate) fn rows_to_cells(rows: &[JsonValue], columns: &[ColumnBinding]) -> Vec<Vec<CellValue>> {
    rows.iter()
        .map(|row| match row {
            JsonValue::Object(fields) => columns
                .iter()
                .map(|column| {
                    fields
                        .get(&column.key)
                        .map(|value| CellValue::from_json(value, column))
                        .unwrap_or(CellValue::Empty)
                })
                .collect(),
            scalar => {
                let column = columns.first().cloned().unwrap_or_else(|| ColumnBinding::new("value"));
                vec![CellValue::from_json(scalar, &column)]
            }
        })
        .collect()
}

/// Narrow interface to a spreadsheet engine holding an opened template.
pub trait SheetWriter {
    fn has_binding(&self, name: &str) -> bool;

    fn bind_value(
        &mut self,
        name: &str,
        cell: CellValue,
        number_format: Option<&str>,
    ) -> Result<(), DocBindError>;

    fn bind_rows(
        &mut self,
        name: &str,
        rows: Vec<Vec<CellValue>>,
        columns: &[ColumnBinding],
        mode: RowWriteMode,
    ) -> Result<(), DocBindError>;

    fn to_bytes(&mut self) -> Result<Vec<u8>, DocBindError>;
}
