//! Result Materializer
//!
//! Reshapes a [`TabularCursor`] into one of five JSON representations chosen
//! by [`OutputFormat`]:
//!
//! - **Table**: array of row objects, cells in native type
//! - **Dictionary**: normalized column name to list of stringified values
//! - **KeyValueArray**: `{"Key", "Value"}` pairs from the first two columns
//!   only; further columns are ignored
//! - **TwoDimensionalArray**: header row of normalized names, then one
//!   stringified row per cursor row
//! - **SimpleUnpivotedTable**: wide table rebuilt from (key, label, value)
//!   triples, see [`unpivot`]
//!
//! Without a cursor every format yields the same [`EMPTY_RESPONSE`]
//! sentinel so clients can classify "no data" uniformly. Output is
//! pretty-printed JSON and identical input produces byte-identical output.

mod cursor;
pub mod unpivot;

pub use cursor::{CellValue, RowSet, TabularCursor};

use crate::error::{Error, Result};
use crate::request::OutputFormat;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Payload returned for every format when the backend produced no reader
pub const EMPTY_RESPONSE: &str = "{'empty':'no data'}";

const MEASURES_PREFIX: &str = "[Measures].";
const CAPTION_SUFFIX: &str = ".[MEMBER_CAPTION]";

/// Check if a payload is the empty sentinel
pub fn is_empty_response(payload: &str) -> bool {
    payload == EMPTY_RESPONSE
}

/// Client-facing label for a raw MDX column name
///
/// Strips the `[Measures].` prefix and `.[MEMBER_CAPTION]` suffix, removes
/// brackets, splits on `.`, drops member-key segments (those containing `&`)
/// and returns the last remaining segment.
///
/// ```
/// use olap_gateway::materialize::normalize_column_name;
///
/// assert_eq!(normalize_column_name("[Measures].[Sales Amount]"), "Sales Amount");
/// assert_eq!(normalize_column_name("[Date].[Year].[Year].[MEMBER_CAPTION]"), "Year");
/// ```
pub fn normalize_column_name(raw: &str) -> String {
    let stripped = raw
        .strip_prefix(MEASURES_PREFIX)
        .unwrap_or(raw)
        .replace(CAPTION_SUFFIX, "");
    let unbracketed: String = stripped.chars().filter(|c| *c != '[' && *c != ']').collect();

    unbracketed
        .split('.')
        .filter(|segment| !segment.contains('&'))
        .last()
        .unwrap_or_default()
        .to_string()
}

/// Materialize a cursor into the requested format
///
/// `None` means the backend produced no reader at all; the result is then
/// [`EMPTY_RESPONSE`] regardless of format.
pub fn materialize(cursor: Option<&mut dyn TabularCursor>, format: OutputFormat) -> Result<String> {
    let Some(cursor) = cursor else {
        return Ok(EMPTY_RESPONSE.to_string());
    };

    match format {
        OutputFormat::Table => to_json(&to_table(cursor)?),
        OutputFormat::Dictionary => to_json(&to_dictionary(cursor)?),
        OutputFormat::KeyValueArray => to_json(&to_key_value_array(cursor)?),
        OutputFormat::TwoDimensionalArray => to_json(&to_two_dimensional_array(cursor)?),
        OutputFormat::SimpleUnpivotedTable => to_json(&unpivot::unpivot(cursor)?),
    }
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    Ok(serde_json::to_string_pretty(value)?)
}

/// Normalized names of every column, in cursor order
pub fn column_names(cursor: &dyn TabularCursor) -> Vec<String> {
    (0..cursor.field_count())
        .map(|i| normalize_column_name(cursor.field_name(i)))
        .collect()
}

/// Normalized names, rejecting two columns that normalize to the same label
fn unique_column_names(cursor: &dyn TabularCursor) -> Result<Vec<String>> {
    let names = column_names(cursor);
    let mut seen = std::collections::HashSet::with_capacity(names.len());
    for name in &names {
        if !seen.insert(name.as_str()) {
            return Err(Error::Validation(format!(
                "duplicate column name after normalization: {}",
                name
            )));
        }
    }
    Ok(names)
}

// ============================================================================
// Formats
// ============================================================================

/// One row of [`OutputFormat::Table`]
pub type TableRow = IndexMap<String, CellValue>;

/// Rows as objects keyed by normalized column name, cells in native type
pub fn to_table(cursor: &mut dyn TabularCursor) -> Result<Vec<TableRow>> {
    let names = unique_column_names(cursor)?;
    let mut rows = Vec::new();

    while cursor.read()? {
        let row = names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), cursor.value(i).clone()))
            .collect();
        rows.push(row);
    }

    Ok(rows)
}

/// Column name to ordered list of stringified values, nulls kept
pub fn to_dictionary(
    cursor: &mut dyn TabularCursor,
) -> Result<IndexMap<String, Vec<Option<String>>>> {
    let names = unique_column_names(cursor)?;
    let mut columns: Vec<Vec<Option<String>>> = vec![Vec::new(); names.len()];

    while cursor.read()? {
        for (i, column) in columns.iter_mut().enumerate() {
            column.push(cursor.value(i).to_text());
        }
    }

    Ok(names.into_iter().zip(columns).collect())
}

/// Entry of [`OutputFormat::KeyValueArray`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyValue {
    /// First column
    #[serde(rename = "Key")]
    pub key: Option<String>,
    /// Second column
    #[serde(rename = "Value")]
    pub value: Option<String>,
}

/// Pairs built from columns 0 and 1; any further columns are ignored
pub fn to_key_value_array(cursor: &mut dyn TabularCursor) -> Result<Vec<KeyValue>> {
    let count = cursor.field_count();
    let cell = |cursor: &dyn TabularCursor, i: usize| {
        if i < count {
            cursor.value(i).to_text()
        } else {
            None
        }
    };

    let mut pairs = Vec::new();
    while cursor.read()? {
        pairs.push(KeyValue {
            key: cell(cursor, 0),
            value: cell(cursor, 1),
        });
    }
    Ok(pairs)
}

/// Header row of normalized names followed by stringified rows
pub fn to_two_dimensional_array(
    cursor: &mut dyn TabularCursor,
) -> Result<Vec<Vec<Option<String>>>> {
    let header: Vec<Option<String>> = column_names(cursor).into_iter().map(Some).collect();
    let count = header.len();
    let mut rows = vec![header];

    while cursor.read()? {
        rows.push((0..count).map(|i| cursor.value(i).to_text()).collect());
    }

    Ok(rows)
}
