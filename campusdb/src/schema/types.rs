use crate::error::{CampusError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Default value token replaced with the current timestamp at insert time.
pub const NOW_TOKEN: &str = "$now";

/// Top-level schema definition parsed from the schema YAML.
/// Tables keep their declaration order, which is also the provisioning order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaDefinition {
    #[serde(default)]
    pub tables: Vec<TableDefinition>,
}

/// Definition of a single table: its ordered columns plus entity metadata
/// consumed by the generic collection layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableDefinition {
    pub name: String,
    pub columns: Vec<String>,
    /// Human name used in messages ("Student not found").
    #[serde(default)]
    pub entity: Option<String>,
    #[serde(default)]
    pub id: Option<IdDefinition>,
    #[serde(default)]
    pub required: Vec<String>,
    /// Write-only fields accepted on create but never stored.
    #[serde(default)]
    pub inputs: Vec<String>,
    #[serde(default)]
    pub unique: Vec<String>,
    #[serde(default)]
    pub defaults: BTreeMap<String, serde_json::Value>,
    #[serde(rename = "enum", default)]
    pub enums: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub formats: BTreeMap<String, FieldFormat>,
    #[serde(default)]
    pub timestamps: TimestampColumns,
    /// Soft delete: flip a column instead of removing the row.
    #[serde(default)]
    pub soft_delete: Option<SoftDelete>,
}

/// Primary key column. When `prefix` is set, ids are generated; otherwise callers supply them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdDefinition {
    pub column: String,
    #[serde(default)]
    pub prefix: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TimestampColumns {
    #[serde(default)]
    pub created: Option<String>,
    #[serde(default)]
    pub updated: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SoftDelete {
    pub column: String,
    pub value: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldFormat {
    Email,
    Number,
    Date,
}

impl SchemaDefinition {
    pub fn table(&self, name: &str) -> Option<&TableDefinition> {
        self.tables.iter().find(|t| t.name == name)
    }

    pub fn require(&self, name: &str) -> Result<&TableDefinition> {
        self.table(name)
            .ok_or_else(|| CampusError::Schema(format!("Table '{name}' not defined in schema")))
    }

    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.iter().map(|t| t.name.as_str())
    }

    /// Check that every column referenced by table metadata is declared.
    pub fn check(&self) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for table in &self.tables {
            if !seen.insert(table.name.as_str()) {
                return Err(CampusError::Schema(format!(
                    "Table '{}' is declared twice",
                    table.name
                )));
            }
            table.check()?;
        }
        Ok(())
    }
}

impl TableDefinition {
    pub fn entity_name(&self) -> &str {
        self.entity.as_deref().unwrap_or(&self.name)
    }

    pub fn id_column(&self) -> Option<&str> {
        self.id.as_ref().map(|id| id.column.as_str())
    }

    pub fn id_prefix(&self) -> Option<&str> {
        self.id.as_ref().and_then(|id| id.prefix.as_deref())
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c == column)
    }

    pub fn is_input(&self, field: &str) -> bool {
        self.inputs.iter().any(|f| f == field)
    }

    fn check(&self) -> Result<()> {
        if self.columns.is_empty() {
            return Err(CampusError::Schema(format!(
                "Table '{}' has no columns",
                self.name
            )));
        }

        let mut referenced: Vec<&str> = Vec::new();
        referenced.extend(self.id_column());
        referenced.extend(self.required.iter().map(String::as_str));
        referenced.extend(self.unique.iter().map(String::as_str));
        referenced.extend(self.defaults.keys().map(String::as_str));
        referenced.extend(self.enums.keys().map(String::as_str));
        referenced.extend(self.formats.keys().map(String::as_str));
        referenced.extend(self.timestamps.created.as_deref());
        referenced.extend(self.timestamps.updated.as_deref());
        referenced.extend(self.soft_delete.as_ref().map(|s| s.column.as_str()));

        for column in referenced {
            if !self.has_column(column) && !self.is_input(column) {
                return Err(CampusError::Schema(format!(
                    "Table '{}' references unknown column '{column}'",
                    self.name
                )));
            }
        }
        Ok(())
    }
}
