mod collection;

pub use collection::Collection;

use crate::backend::{MemoryBackend, Record, RowId, SqliteBackend, StoredRow, TableStore};
use crate::config::CampusConfig;
use crate::error::{CampusError, Result};
use crate::schema::{erp_schema, SchemaDefinition, TableDefinition};
use crate::util::{generate_id, now_iso};
use serde::Serialize;
use serde_json::Value;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// The main entry point for campusdb.
/// Owns the row store behind a single writer lock, together with the schema
/// and runtime configuration, and hands out collection and service handles.
pub struct Store {
    backend: Mutex<Box<dyn TableStore>>,
    schema: SchemaDefinition,
    config: CampusConfig,
}

/// Row count of one provisioned table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableStats {
    pub table: String,
    pub rows: usize,
}

impl Store {
    /// Open (or create) a SQLite-backed store at the given database file.
    pub fn open(path: &Path, config: CampusConfig) -> Result<Self> {
        let backend = SqliteBackend::open(path)?;
        Self::with_backend(Box::new(backend), config)
    }

    /// A store over the in-memory backend, with every table provisioned.
    pub fn open_in_memory(config: CampusConfig) -> Result<Self> {
        let store = Self::with_backend(Box::new(MemoryBackend::new()), config)?;
        store.ensure_tables()?;
        Ok(store)
    }

    /// Wrap an arbitrary backend. Uses the built-in ERP schema.
    pub fn with_backend(backend: Box<dyn TableStore>, config: CampusConfig) -> Result<Self> {
        Ok(Store {
            backend: Mutex::new(backend),
            schema: erp_schema()?,
            config,
        })
    }

    /// Replace the schema, e.g. with one parsed from a custom file.
    pub fn with_schema(mut self, schema: SchemaDefinition) -> Self {
        self.schema = schema;
        self
    }

    pub fn schema(&self) -> &SchemaDefinition {
        &self.schema
    }

    pub fn config(&self) -> &CampusConfig {
        &self.config
    }

    fn lock(&self) -> Result<MutexGuard<'_, Box<dyn TableStore>>> {
        self.backend
            .lock()
            .map_err(|_| CampusError::Other("Store lock poisoned".into()))
    }

    /// Run `f` as one unit: the writer lock is held throughout and the backend
    /// transaction is committed on `Ok` and rolled back on `Err`.
    pub fn transaction<T>(&self, f: impl FnOnce(&mut Tx<'_>) -> Result<T>) -> Result<T> {
        let mut guard = self.lock()?;
        guard.begin()?;

        let outcome = {
            let mut tx = Tx {
                backend: &mut **guard,
                schema: &self.schema,
                config: &self.config,
            };
            f(&mut tx)
        };

        match outcome {
            Ok(value) => {
                guard.commit()?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback_err) = guard.rollback() {
                    log::error!("Rollback failed after '{e}': {rollback_err}");
                }
                Err(e)
            }
        }
    }

    /// Run a read-only closure under the lock, without a backend transaction.
    pub fn read<T>(&self, f: impl FnOnce(&Tx<'_>) -> Result<T>) -> Result<T> {
        let mut guard = self.lock()?;
        let tx = Tx {
            backend: &mut **guard,
            schema: &self.schema,
            config: &self.config,
        };
        f(&tx)
    }

    /// Create every schema table, resetting the ones that already exist.
    /// Returns the table names in provisioning order.
    pub fn provision(&self) -> Result<Vec<String>> {
        let tables = self.transaction(|tx| {
            let mut names = Vec::new();
            for table in &tx.schema.tables {
                tx.backend.create_table(&table.name, &table.columns)?;
                names.push(table.name.clone());
            }
            Ok(names)
        })?;
        log::info!("Provisioned {} tables", tables.len());
        Ok(tables)
    }

    /// Create only the schema tables that do not exist yet. Returns the ones created.
    pub fn ensure_tables(&self) -> Result<Vec<String>> {
        let created = self.transaction(|tx| {
            let mut created = Vec::new();
            for table in &tx.schema.tables {
                if !tx.backend.has_table(&table.name)? {
                    tx.backend.create_table(&table.name, &table.columns)?;
                    created.push(table.name.clone());
                }
            }
            Ok(created)
        })?;
        if !created.is_empty() {
            log::info!("Created missing tables: {}", created.join(", "));
        }
        Ok(created)
    }

    /// Rows per existing table, in creation order.
    pub fn stats(&self) -> Result<Vec<TableStats>> {
        self.read(|tx| {
            let mut stats = Vec::new();
            for table in tx.backend.list_tables()? {
                let rows = tx.backend.row_count(&table)?;
                stats.push(TableStats { table, rows });
            }
            Ok(stats)
        })
    }

    /// Get a generic collection handle for any schema table.
    pub fn collection(&self, name: &str) -> Result<Collection<'_>> {
        self.schema.require(name)?;
        Ok(Collection::new(self, name))
    }
}

/// Scoped access to the row store for the duration of one [`Store::transaction`]
/// or [`Store::read`]. Service operations compose on `Tx` so that nested calls
/// never re-take the writer lock.
pub struct Tx<'a> {
    backend: &'a mut dyn TableStore,
    schema: &'a SchemaDefinition,
    config: &'a CampusConfig,
}

impl<'a> Tx<'a> {
    pub fn schema(&self) -> &'a SchemaDefinition {
        self.schema
    }

    pub fn config(&self) -> &'a CampusConfig {
        self.config
    }

    pub fn table(&self, name: &str) -> Result<&'a TableDefinition> {
        self.schema.require(name)
    }

    pub fn has_table(&self, table: &str) -> Result<bool> {
        self.backend.has_table(table)
    }

    pub fn scan(&self, table: &str) -> Result<Vec<StoredRow>> {
        self.backend.scan(table)
    }

    /// All records of a table in row order.
    pub fn records(&self, table: &str) -> Result<Vec<Record>> {
        Ok(self.scan(table)?.into_iter().map(|r| r.record).collect())
    }

    pub fn find(&self, table: &str, column: &str, value: &Value) -> Result<Option<StoredRow>> {
        self.backend.find(table, column, value)
    }

    pub fn append(&mut self, table: &str, record: &Record) -> Result<RowId> {
        self.backend.append(table, record)
    }

    pub fn update(&mut self, table: &str, row: RowId, record: &Record) -> Result<()> {
        self.backend.update(table, row, record)
    }

    pub fn set_cells(&mut self, table: &str, row: RowId, patch: &Record) -> Result<()> {
        self.backend.set_cells(table, row, patch)
    }

    pub fn delete(&mut self, table: &str, row: RowId) -> Result<()> {
        self.backend.delete(table, row)
    }

    /// A fresh identifier with the configured strategy.
    pub fn new_id(&self, prefix: &str) -> String {
        generate_id(prefix, self.config.ids.strategy)
    }

    pub fn now(&self) -> String {
        now_iso()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{AUDIT_LOG, STUDENTS, USERS};
    use serde_json::json;

    fn test_store() -> Store {
        Store::open_in_memory(CampusConfig::for_tests()).unwrap()
    }

    fn record(value: Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_open_in_memory_provisions_all_tables() {
        let store = test_store();
        let stats = store.stats().unwrap();
        assert_eq!(stats.len(), 18);
        assert_eq!(stats[0], TableStats { table: STUDENTS.into(), rows: 0 });
    }

    #[test]
    fn test_provision_resets_tables() {
        let store = test_store();
        store
            .transaction(|tx| {
                tx.append(USERS, &record(json!({ "user_id": "USR1" })))?;
                Ok(())
            })
            .unwrap();
        assert_eq!(store.read(|tx| Ok(tx.records(USERS)?.len())).unwrap(), 1);

        let tables = store.provision().unwrap();
        assert_eq!(tables.len(), 18);
        assert_eq!(store.read(|tx| Ok(tx.records(USERS)?.len())).unwrap(), 0);
    }

    #[test]
    fn test_ensure_tables_creates_only_missing() {
        let mut backend = MemoryBackend::new();
        backend
            .create_table(USERS, &["user_id".to_string()])
            .unwrap();
        let store = Store::with_backend(Box::new(backend), CampusConfig::for_tests()).unwrap();
        let created = store.ensure_tables().unwrap();
        assert_eq!(created.len(), 17);
        assert!(!created.contains(&USERS.to_string()));
        assert!(store.ensure_tables().unwrap().is_empty());
    }

    #[test]
    fn test_failed_transaction_rolls_back() {
        let store = test_store();
        let result: Result<()> = store.transaction(|tx| {
            tx.append(AUDIT_LOG, &record(json!({ "log_id": "LOG1" })))?;
            Err(CampusError::Conflict("boom".into()))
        });
        assert!(matches!(result, Err(CampusError::Conflict(_))));
        assert_eq!(store.read(|tx| Ok(tx.records(AUDIT_LOG)?.len())).unwrap(), 0);
    }

    #[test]
    fn test_sqlite_store_persists() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("campus.db");
        {
            let store = Store::open(&path, CampusConfig::for_tests()).unwrap();
            store.provision().unwrap();
            store
                .collection(STUDENTS)
                .unwrap()
                .create(record(json!({
                    "student_id": "S1", "first_name": "Ira", "last_name": "Rao",
                    "email": "ira@college.edu"
                })))
                .unwrap();
        }
        let store = Store::open(&path, CampusConfig::for_tests()).unwrap();
        let student = store.collection(STUDENTS).unwrap().get("S1").unwrap();
        assert_eq!(student["first_name"], json!("Ira"));
    }

    #[test]
    fn test_unknown_collection() {
        let store = test_store();
        assert!(matches!(
            store.collection("Payroll"),
            Err(CampusError::Schema(_))
        ));
    }
}
