use super::{Store, Tx};
use crate::backend::{Record, StoredRow};
use crate::error::{CampusError, Result};
use crate::schema::TableDefinition;
use crate::util::{field_text, is_blank, loose_eq};
use crate::validation;
use serde_json::Value;

/// Generated ids are retried on collision, which only the timestamp strategy can produce.
const ID_ATTEMPTS: usize = 8;

/// Schema-driven CRUD shared by every entity service. Each mutation writes
/// exactly one audit entry through [`Tx::audit`].
impl<'a> Tx<'a> {
    /// Locate an entity row by its id column.
    pub fn find_entity(&self, table: &str, id: &str) -> Result<Option<StoredRow>> {
        let def = self.table(table)?;
        let column = id_column(def)?;
        self.find(table, column, &Value::String(id.to_string()))
    }

    /// Like [`Tx::find_entity`], failing with `"<Entity> not found"`.
    pub fn require_entity(&self, table: &str, id: &str) -> Result<StoredRow> {
        let def = self.table(table)?;
        self.find_entity(table, id)?
            .ok_or_else(|| CampusError::not_found(def.entity_name()))
    }

    pub fn get_entity(&self, table: &str, id: &str) -> Result<Record> {
        Ok(self.require_entity(table, id)?.record)
    }

    /// Rows whose cells loosely equal every non-blank filter value.
    pub fn list_entities(&self, table: &str, filters: &Record) -> Result<Vec<Record>> {
        let active: Vec<(&String, &Value)> = filters
            .iter()
            .filter(|(_, v)| !is_blank(Some(v)))
            .collect();
        Ok(self
            .records(table)?
            .into_iter()
            .filter(|record| {
                active.iter().all(|(key, value)| {
                    record
                        .get(key.as_str())
                        .map(|cell| loose_eq(cell, value))
                        .unwrap_or(false)
                })
            })
            .collect())
    }

    /// Validate, fill defaults and ids, check unique columns, append and audit.
    /// Returns the row as stored.
    pub fn create_entity(&mut self, table: &str, mut data: Record) -> Result<Record> {
        let def = self.table(table)?;
        let now = self.now();

        validation::validate_and_prepare(def, &mut data, &now)?;

        if let (Some(column), Some(prefix)) = (def.id_column(), def.id_prefix()) {
            if is_blank(data.get(column)) {
                let id = self.unused_id(table, column, prefix)?;
                data.insert(column.to_string(), Value::String(id));
            }
        }

        self.check_unique(def, &data, None)?;

        if let Some(created) = &def.timestamps.created {
            if is_blank(data.get(created)) {
                data.insert(created.clone(), Value::String(now.clone()));
            }
        }
        if let Some(updated) = &def.timestamps.updated {
            data.insert(updated.clone(), Value::String(now.clone()));
        }

        let row = self.append(table, &data)?;
        let stored = self
            .backend
            .get(table, row)?
            .ok_or_else(|| CampusError::not_found(def.entity_name()))?;

        let entity_id = entity_id_of(def, &stored.record);
        self.audit(table, &entity_id, "create", None, Some(&stored.record))?;
        Ok(stored.record)
    }

    /// Shallow-merge `patch` over the stored row, touch the updated timestamp,
    /// rewrite the full row and audit `update` with before/after snapshots.
    /// The id column is never changed.
    pub fn update_entity(&mut self, table: &str, id: &str, patch: &Record) -> Result<Record> {
        self.update_entity_as(table, id, patch, "update")
    }

    /// [`Tx::update_entity`] recorded under a specific audit action.
    pub fn update_entity_as(
        &mut self,
        table: &str,
        id: &str,
        patch: &Record,
        action: &str,
    ) -> Result<Record> {
        let def = self.table(table)?;
        let stored = self.require_entity(table, id)?;

        let mut merged = stored.record.clone();
        for (key, value) in patch {
            if Some(key.as_str()) == def.id_column() {
                continue;
            }
            merged.insert(key.clone(), value.clone());
        }
        if let Some(updated) = &def.timestamps.updated {
            merged.insert(updated.clone(), Value::String(self.now()));
        }

        let result = validation::validate_row(def, &merged);
        if let Some(message) = result.message() {
            return Err(CampusError::Validation(message));
        }
        self.check_unique(def, &merged, Some(stored.row))?;

        self.update(table, stored.row, &merged)?;
        let after = self
            .backend
            .get(table, stored.row)?
            .map(|s| s.record)
            .unwrap_or(merged);

        self.audit(table, id, action, Some(&stored.record), Some(&after))?;
        Ok(after)
    }

    /// Soft delete where the schema declares one, otherwise remove the row.
    /// Audits `delete` carrying the old row.
    pub fn delete_entity(&mut self, table: &str, id: &str) -> Result<()> {
        let def = self.table(table)?;
        let stored = self.require_entity(table, id)?;

        match &def.soft_delete {
            Some(soft) => {
                let mut patch = Record::new();
                patch.insert(soft.column.clone(), soft.value.clone());
                if let Some(updated) = &def.timestamps.updated {
                    patch.insert(updated.clone(), Value::String(self.now()));
                }
                self.set_cells(table, stored.row, &patch)?;
            }
            None => self.delete(table, stored.row)?,
        }

        self.audit(table, id, "delete", Some(&stored.record), None)
    }

    fn unused_id(&self, table: &str, column: &str, prefix: &str) -> Result<String> {
        for _ in 0..ID_ATTEMPTS {
            let id = self.new_id(prefix);
            if self
                .find(table, column, &Value::String(id.clone()))?
                .is_none()
            {
                return Ok(id);
            }
        }
        Err(CampusError::Other(format!(
            "Could not generate an unused {column} for {table}"
        )))
    }

    /// Reject a record whose unique column value already appears on another row.
    fn check_unique(
        &self,
        def: &TableDefinition,
        data: &Record,
        exclude: Option<crate::backend::RowId>,
    ) -> Result<()> {
        let mut unique: Vec<&str> = def.unique.iter().map(String::as_str).collect();
        if let Some(id) = def.id_column() {
            if !unique.contains(&id) {
                unique.push(id);
            }
        }

        for column in unique {
            let Some(value) = data.get(column).filter(|v| !is_blank(Some(v))) else {
                continue;
            };
            let taken = self.scan(&def.name)?.into_iter().any(|stored| {
                Some(stored.row) != exclude
                    && stored
                        .record
                        .get(column)
                        .map(|cell| loose_eq(cell, value))
                        .unwrap_or(false)
            });
            if taken {
                let what = if Some(column) == def.id_column() {
                    "ID"
                } else {
                    column
                };
                return Err(CampusError::Conflict(format!(
                    "{} with this {what} already exists",
                    def.entity_name()
                )));
            }
        }
        Ok(())
    }
}

fn id_column(def: &TableDefinition) -> Result<&str> {
    def.id_column()
        .ok_or_else(|| CampusError::Schema(format!("Table '{}' has no id column", def.name)))
}

fn entity_id_of(def: &TableDefinition, record: &Record) -> String {
    def.id_column()
        .map(|column| field_text(record, column))
        .unwrap_or_default()
}

/// A handle to a single table, for generic CRUD through the store.
pub struct Collection<'a> {
    store: &'a Store,
    name: String,
}

impl<'a> Collection<'a> {
    pub(super) fn new(store: &'a Store, name: &str) -> Self {
        Collection {
            store,
            name: name.to_string(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get an entity by id
    pub fn get(&self, id: &str) -> Result<Record> {
        self.store.read(|tx| tx.get_entity(&self.name, id))
    }

    /// List entities matching every non-blank filter
    pub fn list(&self, filters: &Record) -> Result<Vec<Record>> {
        self.store.read(|tx| tx.list_entities(&self.name, filters))
    }

    pub fn create(&self, data: Record) -> Result<Record> {
        self.store.transaction(|tx| tx.create_entity(&self.name, data))
    }

    pub fn update(&self, id: &str, patch: &Record) -> Result<Record> {
        self.store
            .transaction(|tx| tx.update_entity(&self.name, id, patch))
    }

    pub fn delete(&self, id: &str) -> Result<()> {
        self.store.transaction(|tx| tx.delete_entity(&self.name, id))
    }
}
