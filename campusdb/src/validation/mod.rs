use crate::backend::Record;
use crate::error::{CampusError, Result};
use crate::schema::{FieldFormat, TableDefinition, NOW_TOKEN};
use crate::util::{cell_text, is_blank, parse_timestamp};
use regex::Regex;
use serde_json::Value;
use once_cell::sync::Lazy;

/// Result of validating a record against its table definition
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    /// Required fields that are absent, null or empty, in declaration order.
    pub missing: Vec<String>,
    pub errors: Vec<String>,
}

impl ValidationResult {
    pub fn is_ok(&self) -> bool {
        self.missing.is_empty() && self.errors.is_empty()
    }

    /// The first problem, phrased for callers. Missing fields are reported together.
    pub fn message(&self) -> Option<String> {
        if !self.missing.is_empty() {
            return Some(missing_fields_message(&self.missing));
        }
        self.errors.first().cloned()
    }
}

pub fn missing_fields_message(missing: &[String]) -> String {
    format!("Missing required fields: {}", missing.join(", "))
}

/// Names from `fields` whose value in `data` is blank.
pub fn missing_fields(data: &Record, fields: &[&str]) -> Vec<String> {
    fields
        .iter()
        .filter(|f| is_blank(data.get(**f)))
        .map(|f| f.to_string())
        .collect()
}

/// Fail with a `Validation` error listing every blank field.
pub fn require_fields(data: &Record, fields: &[&str]) -> Result<()> {
    let missing = missing_fields(data, fields);
    if missing.is_empty() {
        Ok(())
    } else {
        Err(CampusError::Validation(missing_fields_message(&missing)))
    }
}

/// Check a value against an allowed set, producing `Invalid role 'x' (expected one of: ...)`.
pub fn check_enum(field: &str, value: &Value, allowed: &[String]) -> Result<()> {
    let text = cell_text(value);
    if allowed.iter().any(|a| *a == text) {
        return Ok(());
    }
    Err(CampusError::Validation(format!(
        "Invalid {field} '{text}' (expected one of: {})",
        allowed.join(", ")
    )))
}

/// Validate a record's data against its table definition.
/// Enum and format checks only apply to non-blank values.
pub fn validate_record(table: &TableDefinition, data: &Record) -> ValidationResult {
    check_record(table, data, false)
}

/// Validate a stored row about to be rewritten. Required input-only fields
/// never reach storage, so they are not expected here.
pub fn validate_row(table: &TableDefinition, data: &Record) -> ValidationResult {
    check_record(table, data, true)
}

fn check_record(table: &TableDefinition, data: &Record, stored: bool) -> ValidationResult {
    let mut result = ValidationResult::default();

    for field in &table.required {
        if stored && table.is_input(field) {
            continue;
        }
        if is_blank(data.get(field)) {
            result.missing.push(field.clone());
        }
    }

    for (field, allowed) in &table.enums {
        let Some(value) = data.get(field).filter(|v| !is_blank(Some(v))) else {
            continue;
        };
        if let Err(e) = check_enum(field, value, allowed) {
            result.errors.push(e.to_string());
        }
    }

    for (field, format) in &table.formats {
        let Some(value) = data.get(field).filter(|v| !is_blank(Some(v))) else {
            continue;
        };
        if let Some(message) = check_format(field, *format, value) {
            result.errors.push(message);
        }
    }

    result
}

fn check_format(field: &str, format: FieldFormat, value: &Value) -> Option<String> {
    let text = cell_text(value);
    let ok = match format {
        FieldFormat::Email => RE_EMAIL.is_match(&text),
        FieldFormat::Number => value.is_number() || text.trim().parse::<f64>().is_ok(),
        FieldFormat::Date => parse_timestamp(&text).is_some(),
    };
    if ok {
        return None;
    }
    let expected = match format {
        FieldFormat::Email => "an email address",
        FieldFormat::Number => "a number",
        FieldFormat::Date => "a date",
    };
    Some(format!("Invalid {field} '{text}' (expected {expected})"))
}

static RE_EMAIL: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap());

/// Fill blank fields with their declared defaults. `$now` becomes `now`.
pub fn apply_defaults(table: &TableDefinition, data: &mut Record, now: &str) {
    for (field, default) in &table.defaults {
        if !is_blank(data.get(field)) {
            continue;
        }
        let value = match default {
            Value::String(s) if s == NOW_TOKEN => Value::String(now.to_string()),
            other => other.clone(),
        };
        data.insert(field.clone(), value);
    }
}

/// Validate and apply defaults. Returns an error if validation fails.
/// Required fields are checked before defaults are applied, so a default never
/// hides a missing required value.
pub fn validate_and_prepare(table: &TableDefinition, data: &mut Record, now: &str) -> Result<()> {
    let result = validate_record(table, data);
    if let Some(message) = result.message() {
        return Err(CampusError::Validation(message));
    }
    apply_defaults(table, data, now);
    Ok(())
}
