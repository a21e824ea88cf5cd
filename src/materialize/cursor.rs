//! Tabular cursor abstraction and the in-memory row set

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fmt;

static NULL_CELL: CellValue = CellValue::Null;

// ============================================================================
// Cell Value
// ============================================================================

/// A single cell produced by an execution backend
///
/// Serializes in its native JSON type: `null`, boolean, integer, float or
/// string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CellValue {
    /// Missing value
    Null,
    /// Boolean value
    Bool(bool),
    /// Integer value
    Int(i64),
    /// Floating point value
    Float(f64),
    /// Text value
    Text(String),
}

impl CellValue {
    /// String coercion used by the stringifying formats, `None` for null
    pub fn to_text(&self) -> Option<String> {
        match self {
            CellValue::Null => None,
            other => Some(other.to_string()),
        }
    }

    /// Check if the cell is null
    pub fn is_null(&self) -> bool {
        matches!(self, CellValue::Null)
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Null => Ok(()),
            CellValue::Bool(v) => write!(f, "{}", v),
            CellValue::Int(v) => write!(f, "{}", v),
            CellValue::Float(v) => write!(f, "{}", v),
            CellValue::Text(v) => f.write_str(v),
        }
    }
}

impl From<&str> for CellValue {
    fn from(v: &str) -> Self {
        CellValue::Text(v.to_string())
    }
}

impl From<String> for CellValue {
    fn from(v: String) -> Self {
        CellValue::Text(v)
    }
}

impl From<i64> for CellValue {
    fn from(v: i64) -> Self {
        CellValue::Int(v)
    }
}

impl From<f64> for CellValue {
    fn from(v: f64) -> Self {
        CellValue::Float(v)
    }
}

impl From<bool> for CellValue {
    fn from(v: bool) -> Self {
        CellValue::Bool(v)
    }
}

impl<T: Into<CellValue>> From<Option<T>> for CellValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(CellValue::Null)
    }
}

// ============================================================================
// Tabular Cursor
// ============================================================================

/// Forward-only, pull-based row source
///
/// `read` advances to the next row and returns `false` once exhausted. The
/// materializer makes a single pass and never rewinds.
pub trait TabularCursor {
    /// Number of columns
    fn field_count(&self) -> usize;

    /// Raw name of column `index`
    fn field_name(&self, index: usize) -> &str;

    /// Advance to the next row
    fn read(&mut self) -> Result<bool>;

    /// Cell `index` of the current row
    fn value(&self, index: usize) -> &CellValue;
}

// ============================================================================
// Row Set
// ============================================================================

/// Owned in-memory result that can be walked as a [`TabularCursor`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RowSet {
    columns: Vec<String>,
    rows: Vec<Vec<CellValue>>,
    #[serde(skip)]
    position: Option<usize>,
}

impl RowSet {
    /// Create an empty row set with the given raw column names
    pub fn new<S: Into<String>>(columns: impl IntoIterator<Item = S>) -> Self {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
            position: None,
        }
    }

    /// Append a row (builder style)
    pub fn with_row<V: Into<CellValue>>(mut self, row: impl IntoIterator<Item = V>) -> Self {
        self.push_row(row);
        self
    }

    /// Append a row
    ///
    /// Short rows read as null in their missing cells.
    pub fn push_row<V: Into<CellValue>>(&mut self, row: impl IntoIterator<Item = V>) {
        self.rows.push(row.into_iter().map(Into::into).collect());
    }

    /// Raw column names
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Number of rows
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Check if there are no rows
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Move the cursor back before the first row
    pub fn rewind(&mut self) {
        self.position = None;
    }
}

impl TabularCursor for RowSet {
    fn field_count(&self) -> usize {
        self.columns.len()
    }

    fn field_name(&self, index: usize) -> &str {
        self.columns.get(index).map(String::as_str).unwrap_or_default()
    }

    fn read(&mut self) -> Result<bool> {
        let next = self.position.map_or(0, |p| p + 1);
        if next < self.rows.len() {
            self.position = Some(next);
            Ok(true)
        } else {
            self.position = Some(self.rows.len());
            Ok(false)
        }
    }

    fn value(&self, index: usize) -> &CellValue {
        self.position
            .and_then(|p| self.rows.get(p))
            .and_then(|row| row.get(index))
            .unwrap_or(&NULL_CELL)
    }
}
