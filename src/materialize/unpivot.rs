//! Simple unpivot
//!
//! Rebuilds a wide table from a 3-column `(key, label, value)` result. The
//! distinct labels, in first-seen order, become the non-key columns and the
//! distinct keys, in first-seen order, become the rows. A combination that
//! never appeared is left out of its row object entirely.

use super::{normalize_column_name, TabularCursor};
use crate::error::{Error, Result};
use indexmap::{IndexMap, IndexSet};

/// Unpivoted output: ordered column list and one object per key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnpivotedTable {
    /// Key column followed by the distinct labels
    pub columns: Vec<String>,
    /// One object per distinct key
    pub rows: Vec<IndexMap<String, Option<String>>>,
}

impl serde::Serialize for UnpivotedTable {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.rows.serialize(serializer)
    }
}

/// Unpivot a `(key, label, value)` cursor
///
/// Fails with [`Error::Validation`] unless the cursor has exactly three
/// columns, when the same `(key, label)` pair appears twice, or when a
/// label equals the key column name.
pub fn unpivot(cursor: &mut dyn TabularCursor) -> Result<UnpivotedTable> {
    if cursor.field_count() != 3 {
        return Err(Error::Validation(format!(
            "simple unpivot needs exactly 3 columns (key, label, value), got {}",
            cursor.field_count()
        )));
    }

    let key_column = normalize_column_name(cursor.field_name(0));
    let mut cells: IndexMap<(String, String), Option<String>> = IndexMap::new();

    while cursor.read()? {
        let key = cursor.value(0).to_text().unwrap_or_default();
        let label = cursor.value(1).to_text().unwrap_or_default();
        let value = cursor.value(2).to_text();

        if cells.insert((key.clone(), label.clone()), value).is_some() {
            return Err(Error::Validation(format!(
                "duplicate unpivot pair: ({}, {})",
                key, label
            )));
        }
    }

    let labels: IndexSet<String> = cells.keys().map(|(_, label)| label.clone()).collect();
    if labels.contains(&key_column) {
        return Err(Error::Validation(format!(
            "unpivot label collides with key column: {}",
            key_column
        )));
    }

    let mut columns = Vec::with_capacity(labels.len() + 1);
    columns.push(key_column.clone());
    columns.extend(labels.iter().cloned());

    let mut by_key: IndexMap<String, IndexMap<String, Option<String>>> = IndexMap::new();
    for ((key, label), value) in cells {
        by_key
            .entry(key.clone())
            .or_insert_with(|| {
                let mut row = IndexMap::new();
                row.insert(key_column.clone(), Some(key));
                row
            })
            .insert(label, value);
    }

    // Key column first, then labels in column order
    let rank = |name: &String| labels.get_index_of(name).map_or(0, |i| i + 1);
    let rows = by_key
        .into_values()
        .map(|mut row| {
            row.sort_by(|a, _, b, _| rank(a).cmp(&rank(b)));
            row
        })
        .collect();

    Ok(UnpivotedTable {
        columns,
        rows,
    })
}
