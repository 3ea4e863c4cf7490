use super::{normalize_row, Record, RowId, StoredRow, TableStore};
use crate::error::{CampusError, Result};

#[derive(Debug, Clone)]
struct MemTable {
    name: String,
    columns: Vec<String>,
    rows: Vec<(RowId, Record)>,
}

#[derive(Debug, Clone, Default)]
struct State {
    tables: Vec<MemTable>,
    next_row: RowId,
}

/// In-memory backend. Used by tests and as a scratch store; nothing is persisted.
/// Transactions snapshot the whole state and restore it on rollback.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    state: State,
    snapshot: Option<State>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        MemoryBackend::default()
    }

    fn table(&self, name: &str) -> Result<&MemTable> {
        self.state
            .tables
            .iter()
            .find(|t| t.name == name)
            .ok_or_else(|| CampusError::table_not_found(name))
    }

    fn table_mut(&mut self, name: &str) -> Result<&mut MemTable> {
        self.state
            .tables
            .iter_mut()
            .find(|t| t.name == name)
            .ok_or_else(|| CampusError::table_not_found(name))
    }
}

impl TableStore for MemoryBackend {
    fn list_tables(&self) -> Result<Vec<String>> {
        Ok(self.state.tables.iter().map(|t| t.name.clone()).collect())
    }

    fn has_table(&self, table: &str) -> Result<bool> {
        Ok(self.state.tables.iter().any(|t| t.name == table))
    }

    fn create_table(&mut self, table: &str, columns: &[String]) -> Result<()> {
        match self.state.tables.iter().position(|t| t.name == table) {
            Some(index) => {
                let existing = &mut self.state.tables[index];
                existing.columns = columns.to_vec();
                existing.rows.clear();
            }
            None => self.state.tables.push(MemTable {
                name: table.to_string(),
                columns: columns.to_vec(),
                rows: Vec::new(),
            }),
        }
        Ok(())
    }

    fn drop_table(&mut self, table: &str) -> Result<()> {
        self.state.tables.retain(|t| t.name != table);
        Ok(())
    }

    fn headers(&self, table: &str) -> Result<Vec<String>> {
        Ok(self.table(table)?.columns.clone())
    }

    fn scan(&self, table: &str) -> Result<Vec<StoredRow>> {
        let t = self.table(table)?;
        Ok(t.rows
            .iter()
            .map(|(row, record)| StoredRow {
                row: *row,
                record: normalize_row(&t.columns, record),
            })
            .collect())
    }

    fn get(&self, table: &str, row: RowId) -> Result<Option<StoredRow>> {
        let t = self.table(table)?;
        Ok(t.rows
            .iter()
            .find(|(id, _)| *id == row)
            .map(|(id, record)| StoredRow {
                row: *id,
                record: normalize_row(&t.columns, record),
            }))
    }

    fn append(&mut self, table: &str, record: &Record) -> Result<RowId> {
        self.table(table)?;
        self.state.next_row += 1;
        let row = self.state.next_row;
        let t = self.table_mut(table)?;
        let normalized = normalize_row(&t.columns, record);
        t.rows.push((row, normalized));
        Ok(row)
    }

    fn update(&mut self, table: &str, row: RowId, record: &Record) -> Result<()> {
        let t = self.table_mut(table)?;
        let normalized = normalize_row(&t.columns, record);
        let slot = t
            .rows
            .iter_mut()
            .find(|(id, _)| *id == row)
            .ok_or_else(|| CampusError::not_found(format!("Row {row} in {table}")))?;
        slot.1 = normalized;
        Ok(())
    }

    fn delete(&mut self, table: &str, row: RowId) -> Result<()> {
        let t = self.table_mut(table)?;
        let before = t.rows.len();
        t.rows.retain(|(id, _)| *id != row);
        if t.rows.len() == before {
            return Err(CampusError::not_found(format!("Row {row} in {table}")));
        }
        Ok(())
    }

    fn begin(&mut self) -> Result<()> {
        self.snapshot = Some(self.state.clone());
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        self.snapshot = None;
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        if let Some(snapshot) = self.snapshot.take() {
            self.state = snapshot;
        }
        Ok(())
    }

    fn row_count(&self, table: &str) -> Result<usize> {
        Ok(self.table(table)?.rows.len())
    }
}
