//! Row store adapter.
//!
//! A backend exposes named tables, each an ordered header list plus rows kept
//! in insertion order. Every stored row carries exactly the table's columns:
//! values absent from a written record (or null) are stored as `""`, keys that
//! are not columns are dropped. The adapter enforces no uniqueness; callers
//! check before inserting.

mod memory;
mod sqlite;

pub use memory::MemoryBackend;
pub use sqlite::SqliteBackend;

use crate::error::{CampusError, Result};
use crate::util::loose_eq;
use serde_json::Value;

/// A row keyed by column name.
pub type Record = serde_json::Map<String, Value>;

/// Stable locator of a row inside its table.
pub type RowId = i64;

/// A row as read back from a table, with its locator.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRow {
    pub row: RowId,
    pub record: Record,
}

pub trait TableStore: Send {
    /// Table names in creation order.
    fn list_tables(&self) -> Result<Vec<String>>;

    fn has_table(&self, table: &str) -> Result<bool>;

    /// Create the table, or reset it (drop all rows, replace headers) if it exists.
    fn create_table(&mut self, table: &str, columns: &[String]) -> Result<()>;

    fn drop_table(&mut self, table: &str) -> Result<()>;

    fn headers(&self, table: &str) -> Result<Vec<String>>;

    /// All rows in insertion order.
    fn scan(&self, table: &str) -> Result<Vec<StoredRow>>;

    fn get(&self, table: &str, row: RowId) -> Result<Option<StoredRow>>;

    fn append(&mut self, table: &str, record: &Record) -> Result<RowId>;

    /// Rewrite the full row. Columns absent from `record` become `""`.
    fn update(&mut self, table: &str, row: RowId, record: &Record) -> Result<()>;

    fn delete(&mut self, table: &str, row: RowId) -> Result<()>;

    fn begin(&mut self) -> Result<()>;

    fn commit(&mut self) -> Result<()>;

    fn rollback(&mut self) -> Result<()>;

    fn row_count(&self, table: &str) -> Result<usize> {
        Ok(self.scan(table)?.len())
    }

    /// First row (in row order) whose `column` loosely equals `value`.
    /// A column missing from the headers never matches.
    fn find(&self, table: &str, column: &str, value: &Value) -> Result<Option<StoredRow>> {
        let headers = self.headers(table)?;
        if !headers.iter().any(|h| h == column) {
            return Ok(None);
        }
        Ok(self.scan(table)?.into_iter().find(|stored| {
            stored
                .record
                .get(column)
                .map(|cell| loose_eq(cell, value))
                .unwrap_or(false)
        }))
    }

    /// Overwrite individual cells, leaving the rest of the row untouched.
    /// Keys that are not columns are ignored.
    fn set_cells(&mut self, table: &str, row: RowId, patch: &Record) -> Result<()> {
        let mut stored = self
            .get(table, row)?
            .ok_or_else(|| CampusError::not_found(format!("Row {row} in {table}")))?;
        for (key, value) in patch {
            if stored.record.contains_key(key) {
                stored.record.insert(key.clone(), value.clone());
            }
        }
        self.update(table, row, &stored.record)
    }
}

/// Project a record onto the table's headers, in header order.
pub fn normalize_row(headers: &[String], record: &Record) -> Record {
    let mut row = Record::new();
    for header in headers {
        let value = match record.get(header) {
            None | Some(Value::Null) => Value::String(String::new()),
            Some(v) => v.clone(),
        };
        row.insert(header.clone(), value);
    }
    row
}
