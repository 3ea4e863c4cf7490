use super::{normalize_row, Record, RowId, StoredRow, TableStore};
use crate::error::{CampusError, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;

/// SQLite-backed row store. Each logical table is a `sheets` entry holding its
/// ordered headers; rows live in `sheet_rows` as JSON objects, ordered by row id.
pub struct SqliteBackend {
    conn: Connection,
}

impl SqliteBackend {
    /// Open or create the database file at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        let db = SqliteBackend { conn };
        db.initialize_tables()?;
        Ok(db)
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = SqliteBackend { conn };
        db.initialize_tables()?;
        Ok(db)
    }

    fn initialize_tables(&self) -> Result<()> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS sheets (
                name TEXT PRIMARY KEY,
                columns_json TEXT NOT NULL,
                position INTEGER NOT NULL,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS sheet_rows (
                row_id INTEGER PRIMARY KEY AUTOINCREMENT,
                sheet TEXT NOT NULL,
                data_json TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_sheet_rows_sheet ON sheet_rows(sheet, row_id);
            ",
        )?;
        Ok(())
    }

    fn columns_of(&self, table: &str) -> Result<Option<Vec<String>>> {
        let json: Option<String> = self
            .conn
            .query_row(
                "SELECT columns_json FROM sheets WHERE name = ?1",
                params![table],
                |row| row.get(0),
            )
            .optional()?;
        match json {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    fn require_columns(&self, table: &str) -> Result<Vec<String>> {
        self.columns_of(table)?
            .ok_or_else(|| CampusError::table_not_found(table))
    }

    fn parse_row(columns: &[String], row: RowId, data_json: &str) -> Result<StoredRow> {
        let record: Record = serde_json::from_str(data_json)?;
        Ok(StoredRow {
            row,
            record: normalize_row(columns, &record),
        })
    }
}

impl TableStore for SqliteBackend {
    fn list_tables(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT name FROM sheets ORDER BY position")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut names = Vec::new();
        for row in rows {
            names.push(row?);
        }
        Ok(names)
    }

    fn has_table(&self, table: &str) -> Result<bool> {
        Ok(self.columns_of(table)?.is_some())
    }

    fn create_table(&mut self, table: &str, columns: &[String]) -> Result<()> {
        let columns_json = serde_json::to_string(columns)?;
        if self.has_table(table)? {
            self.conn.execute(
                "UPDATE sheets SET columns_json = ?2 WHERE name = ?1",
                params![table, columns_json],
            )?;
            self.conn
                .execute("DELETE FROM sheet_rows WHERE sheet = ?1", params![table])?;
        } else {
            self.conn.execute(
                "INSERT INTO sheets (name, columns_json, position)
                 VALUES (?1, ?2, (SELECT COALESCE(MAX(position), 0) + 1 FROM sheets))",
                params![table, columns_json],
            )?;
        }
        Ok(())
    }

    fn drop_table(&mut self, table: &str) -> Result<()> {
        self.conn
            .execute("DELETE FROM sheet_rows WHERE sheet = ?1", params![table])?;
        self.conn
            .execute("DELETE FROM sheets WHERE name = ?1", params![table])?;
        Ok(())
    }

    fn headers(&self, table: &str) -> Result<Vec<String>> {
        self.require_columns(table)
    }

    fn scan(&self, table: &str) -> Result<Vec<StoredRow>> {
        let columns = self.require_columns(table)?;
        let mut stmt = self.conn.prepare(
            "SELECT row_id, data_json FROM sheet_rows WHERE sheet = ?1 ORDER BY row_id",
        )?;
        let rows = stmt.query_map(params![table], |row| {
            Ok((row.get::<_, RowId>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut result = Vec::new();
        for row in rows {
            let (row_id, data_json) = row?;
            result.push(Self::parse_row(&columns, row_id, &data_json)?);
        }
        Ok(result)
    }

    fn get(&self, table: &str, row: RowId) -> Result<Option<StoredRow>> {
        let columns = self.require_columns(table)?;
        let data_json: Option<String> = self
            .conn
            .query_row(
                "SELECT data_json FROM sheet_rows WHERE sheet = ?1 AND row_id = ?2",
                params![table, row],
                |r| r.get(0),
            )
            .optional()?;
        data_json
            .map(|json| Self::parse_row(&columns, row, &json))
            .transpose()
    }

    fn append(&mut self, table: &str, record: &Record) -> Result<RowId> {
        let columns = self.require_columns(table)?;
        let data_json = serde_json::to_string(&normalize_row(&columns, record))?;
        self.conn.execute(
            "INSERT INTO sheet_rows (sheet, data_json) VALUES (?1, ?2)",
            params![table, data_json],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn update(&mut self, table: &str, row: RowId, record: &Record) -> Result<()> {
        let columns = self.require_columns(table)?;
        let data_json = serde_json::to_string(&normalize_row(&columns, record))?;
        let changed = self.conn.execute(
            "UPDATE sheet_rows SET data_json = ?3 WHERE sheet = ?1 AND row_id = ?2",
            params![table, row, data_json],
        )?;
        if changed == 0 {
            return Err(CampusError::not_found(format!("Row {row} in {table}")));
        }
        Ok(())
    }

    fn delete(&mut self, table: &str, row: RowId) -> Result<()> {
        self.require_columns(table)?;
        let changed = self.conn.execute(
            "DELETE FROM sheet_rows WHERE sheet = ?1 AND row_id = ?2",
            params![table, row],
        )?;
        if changed == 0 {
            return Err(CampusError::not_found(format!("Row {row} in {table}")));
        }
        Ok(())
    }

    fn begin(&mut self) -> Result<()> {
        self.conn.execute_batch("BEGIN IMMEDIATE TRANSACTION")?;
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        self.conn.execute_batch("COMMIT")?;
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        self.conn.execute_batch("ROLLBACK")?;
        Ok(())
    }

    fn row_count(&self, table: &str) -> Result<usize> {
        self.require_columns(table)?;
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sheet_rows WHERE sheet = ?1",
            params![table],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}
