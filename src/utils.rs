use std::fs::{self, DirBuilder};
use std::path::Path;

use anyhow::{Context, Result, bail};
use indexmap::IndexMap;
use serde_json::Value;

use crate::merger::Record;

/// Creates a directory if it doesn't exist
pub fn ensure_dir(path: impl AsRef<Path>) -> std::io::Result<()> {
    DirBuilder::new()
        .recursive(true)
        .create(path)
}

/// Turns a column name like `advanced_work` into `Advanced Work`
pub fn readable_label(column: &str) -> String {
    let mut label = String::with_capacity(column.len());
    let mut word_start = true;

    for c in column.chars().map(|c| if c == '_' { ' ' } else { c }) {
        if c.is_alphabetic() {
            if word_start {
                label.extend(c.to_uppercase());
            } else {
                label.extend(c.to_lowercase());
            }
            word_start = false;
        } else {
            label.push(c);
            word_start = true;
        }
    }

    label
}

/// Loads key/value records from a JSON array of objects.
///
/// Strings are kept as-is, numbers and booleans are stringified and `null`
/// is treated as an absent column. Column order follows the file.
pub fn load_records(path: impl AsRef<Path>) -> Result<Vec<Record>> {
    let path = path.as_ref();
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read records from {}", path.display()))?;
    let rows: Vec<IndexMap<String, Value>> = serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse records in {}", path.display()))?;

    let mut records = Vec::with_capacity(rows.len());
    for (i, row) in rows.into_iter().enumerate() {
        let mut record = Record::with_capacity(row.len());
        for (column, value) in row {
            let value = match value {
                Value::Null => continue,
                Value::String(s) => s,
                Value::Bool(b) => b.to_string(),
                Value::Number(n) => n.to_string(),
                other => bail!(
                    "row {} column {:?} in {} is not a scalar: {}",
                    i,
                    column,
                    path.display(),
                    other
                ),
            };
            record.insert(column, value);
        }
        records.push(record);
    }

    Ok(records)
}
