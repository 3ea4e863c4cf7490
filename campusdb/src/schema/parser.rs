use crate::error::Result;
use super::types::SchemaDefinition;
use std::path::Path;

/// The schema the ERP ships with.
const ERP_SCHEMA: &str = include_str!("erp_schema.yaml");

/// Parse a schema YAML file into a SchemaDefinition
pub fn parse_schema(path: &Path) -> Result<SchemaDefinition> {
    let content = std::fs::read_to_string(path)?;
    parse_schema_str(&content)
}

/// Parse a schema YAML string into a SchemaDefinition
pub fn parse_schema_str(content: &str) -> Result<SchemaDefinition> {
    let schema: SchemaDefinition = serde_yaml::from_str(content)?;
    schema.check()?;
    Ok(schema)
}

/// The built-in ERP schema with all eighteen tables.
pub fn erp_schema() -> Result<SchemaDefinition> {
    parse_schema_str(ERP_SCHEMA)
}
