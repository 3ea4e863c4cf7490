//! Append-only audit trail.
//!
//! Every mutation made through the store appends one `AuditLog` row carrying
//! the table, the entity id, the action, the session actor and a field-level
//! diff of the before/after snapshots. Entries are never updated or deleted.

use crate::backend::Record;
use crate::config::{AuditMode, DiffMode};
use crate::error::{CampusError, Result};
use crate::schema::AUDIT_LOG;
use crate::store::{Store, Tx};
use crate::util::{cell_text, field_text, parse_bound, parse_timestamp, to_iso};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;

/// One row of the audit log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub log_id: String,
    pub sheet_name: String,
    pub entity_id: String,
    pub action: String,
    pub user_id: String,
    pub timestamp: String,
    pub diff: String,
    pub notes: String,
}

impl AuditEntry {
    fn from_record(record: &Record) -> Self {
        AuditEntry {
            log_id: field_text(record, "log_id"),
            sheet_name: field_text(record, "sheet_name"),
            entity_id: field_text(record, "entity_id"),
            action: field_text(record, "action"),
            user_id: field_text(record, "user_id"),
            timestamp: field_text(record, "timestamp"),
            diff: field_text(record, "diff"),
            notes: field_text(record, "notes"),
        }
    }

    fn parsed_timestamp(&self) -> Option<DateTime<Utc>> {
        parse_timestamp(&self.timestamp)
    }
}

/// Filters for [`Tx::audit_logs`]. Every set field must match exactly;
/// the date bounds are inclusive.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditFilter {
    pub sheet_name: Option<String>,
    pub entity_id: Option<String>,
    pub action: Option<String>,
    pub user_id: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
}

/// A group of recent audit entries sharing table and action.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Activity {
    #[serde(rename = "type")]
    pub kind: String,
    pub description: String,
    pub timestamp: String,
    pub count: usize,
}

/// Fields whose values are replaced in diffs; a change is still reported.
const REDACTED_FIELDS: &[&str] = &["hashed_password"];

/// Field-level diff between two snapshots: `key: old -> new` joined by `"; "`.
///
/// Empty unless both snapshots are present. In `NewKeys` mode only keys of
/// `new` are compared, so a key dropped from `new` is never reported.
pub fn compute_diff(old: Option<&Record>, new: Option<&Record>, mode: DiffMode) -> String {
    let (Some(old), Some(new)) = (old, new) else {
        return String::new();
    };

    let mut keys: Vec<&String> = new.keys().collect();
    if mode == DiffMode::Symmetric {
        let seen: BTreeSet<&String> = new.keys().collect();
        keys.extend(old.keys().filter(|k| !seen.contains(k)));
    }

    let render = |key: &str, v: Option<&Value>| {
        if REDACTED_FIELDS.contains(&key) {
            return "[redacted]".to_string();
        }
        v.map(cell_text).unwrap_or_default()
    };
    keys.into_iter()
        .filter(|key| old.get(*key) != new.get(*key))
        .map(|key| {
            format!(
                "{key}: {} -> {}",
                render(key, old.get(key)),
                render(key, new.get(key))
            )
        })
        .collect::<Vec<_>>()
        .join("; ")
}

fn matches(wanted: &Option<String>, actual: &str) -> bool {
    match wanted.as_deref() {
        None | Some("") => true,
        Some(w) => w == actual,
    }
}

impl<'a> Tx<'a> {
    /// Append an audit entry for a mutation. A missing AuditLog table is
    /// skipped with a warning, or fails the mutation in `fail_closed` mode.
    pub fn audit(
        &mut self,
        table: &str,
        entity_id: &str,
        action: &str,
        old: Option<&Record>,
        new: Option<&Record>,
    ) -> Result<()> {
        let config = &self.config().audit;
        if !self.has_table(AUDIT_LOG)? {
            return match config.mode {
                AuditMode::Warn => {
                    log::warn!("AuditLog table not found - skipping audit of {action} on {table}/{entity_id}");
                    Ok(())
                }
                AuditMode::FailClosed => Err(CampusError::table_not_found(AUDIT_LOG)),
            };
        }

        let prefix = self
            .table(AUDIT_LOG)?
            .id_prefix()
            .unwrap_or("LOG")
            .to_string();
        let entry = AuditEntry {
            log_id: self.new_id(&prefix),
            sheet_name: table.to_string(),
            entity_id: entity_id.to_string(),
            action: action.to_string(),
            user_id: config.actor.clone(),
            timestamp: self.now(),
            diff: compute_diff(old, new, config.diff),
            notes: String::new(),
        };

        let record = match serde_json::to_value(&entry)? {
            Value::Object(map) => map,
            _ => return Err(CampusError::Other("Audit entry is not an object".into())),
        };
        self.append(AUDIT_LOG, &record)?;
        log::debug!("audit {action} {table}/{entity_id}");
        Ok(())
    }

    /// Audit entries matching `filter`, newest first.
    pub fn audit_logs(&self, filter: &AuditFilter) -> Result<Vec<AuditEntry>> {
        if !self.has_table(AUDIT_LOG)? {
            return Err(CampusError::table_not_found(AUDIT_LOG));
        }
        let start = parse_bound("start_date", filter.start_date.as_deref())?;
        let end = parse_bound("end_date", filter.end_date.as_deref())?;

        let mut logs: Vec<AuditEntry> = self
            .records(AUDIT_LOG)?
            .iter()
            .map(AuditEntry::from_record)
            .filter(|log| {
                matches(&filter.sheet_name, &log.sheet_name)
                    && matches(&filter.entity_id, &log.entity_id)
                    && matches(&filter.action, &log.action)
                    && matches(&filter.user_id, &log.user_id)
            })
            .filter(|log| {
                if start.is_none() && end.is_none() {
                    return true;
                }
                // entries without a readable timestamp cannot satisfy a range
                let Some(ts) = log.parsed_timestamp() else {
                    return false;
                };
                start.map_or(true, |s| ts >= s) && end.map_or(true, |e| ts <= e)
            })
            .collect();

        logs.sort_by(|a, b| b.parsed_timestamp().cmp(&a.parsed_timestamp()));
        Ok(logs)
    }

    /// Audit activity of the last seven days, grouped by table and action.
    pub fn recent_activity(&self, limit: usize) -> Result<Vec<Activity>> {
        let since = Utc::now() - Duration::days(7);
        let logs = self.audit_logs(&AuditFilter {
            start_date: Some(to_iso(since)),
            ..AuditFilter::default()
        })?;

        let mut groups: Vec<(String, String, Activity)> = Vec::new();
        for log in logs.iter().take(limit * 2) {
            let position = groups
                .iter()
                .position(|(table, action, _)| *table == log.sheet_name && *action == log.action);
            match position {
                Some(i) => {
                    let group = &mut groups[i].2;
                    group.count += 1;
                    if parse_timestamp(&log.timestamp) > parse_timestamp(&group.timestamp) {
                        group.timestamp = log.timestamp.clone();
                    }
                }
                None => groups.push((
                    log.sheet_name.clone(),
                    log.action.clone(),
                    Activity {
                        kind: activity_type(&log.sheet_name).to_string(),
                        description: activity_description(&log.sheet_name, &log.action),
                        timestamp: log.timestamp.clone(),
                        count: 1,
                    },
                )),
            }
        }

        let mut activities: Vec<Activity> = groups
            .into_iter()
            .map(|(_, _, mut activity)| {
                if activity.count > 1 {
                    activity.description =
                        format!("{} ({} items)", activity.description, activity.count);
                }
                activity
            })
            .collect();
        activities.sort_by(|a, b| parse_timestamp(&b.timestamp).cmp(&parse_timestamp(&a.timestamp)));
        activities.truncate(limit);
        Ok(activities)
    }
}

fn activity_type(table: &str) -> &'static str {
    match table {
        "Students" | "Users" => "user",
        "Admissions" => "admission",
        "Transactions" => "payment",
        "Exams" => "exam",
        "HostelAllocations" => "hostel",
        "Courses" => "course",
        _ => "system",
    }
}

fn activity_description(table: &str, action: &str) -> String {
    let known = match (table, action) {
        ("Students", "create") => "New student registered",
        ("Students", "update") => "Student information updated",
        ("Admissions", "create") => "New admission application",
        ("Admissions", "update") => "Admission updated",
        ("Admissions", "update_status") => "Admission status changed",
        ("Users", "create") => "New user created",
        ("Users", "update") => "User information updated",
        ("Transactions", "create") => "Payment processed",
        ("Exams", "create") => "Exam scheduled",
        ("Exams", "update") => "Exam updated",
        ("HostelAllocations", "create") => "Room allocated",
        ("HostelAllocations", "deallocate") => "Room deallocated",
        ("Courses", "create") => "Course created",
        ("Courses", "update") => "Course updated",
        _ => return format!("{table} {action}"),
    };
    known.to_string()
}

/// Read access to the audit log.
pub struct AuditTrail<'a> {
    store: &'a Store,
}

impl Store {
    pub fn audit(&self) -> AuditTrail<'_> {
        AuditTrail { store: self }
    }
}

impl<'a> AuditTrail<'a> {
    /// Append an entry outside any other mutation.
    pub fn log(
        &self,
        table: &str,
        entity_id: &str,
        action: &str,
        old: Option<&Record>,
        new: Option<&Record>,
    ) -> Result<()> {
        self.store
            .transaction(|tx| tx.audit(table, entity_id, action, old, new))
    }

    pub fn logs(&self, filter: &AuditFilter) -> Result<Vec<AuditEntry>> {
        self.store.read(|tx| tx.audit_logs(filter))
    }

    pub fn recent_activity(&self, limit: usize) -> Result<Vec<Activity>> {
        self.store.read(|tx| tx.recent_activity(limit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MemoryBackend, TableStore};
    use crate::config::CampusConfig;
    use crate::schema::{STUDENTS, USERS};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn test_store() -> Store {
        Store::open_in_memory(CampusConfig::for_tests()).unwrap()
    }

    fn record(value: Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    fn seed_entry(store: &Store, table: &str, action: &str, timestamp: &str) {
        store
            .transaction(|tx| {
                let entry = record(json!({
                    "log_id": tx.new_id("LOG"), "sheet_name": table, "entity_id": "E1",
                    "action": action, "user_id": "system", "timestamp": timestamp
                }));
                tx.append(AUDIT_LOG, &entry)?;
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_diff_reports_changed_new_keys() {
        let old = record(json!({ "name": "A", "role": "staff", "gone": "x" }));
        let new = record(json!({ "name": "A", "role": "admin", "added": 3 }));
        assert_eq!(
            compute_diff(Some(&old), Some(&new), DiffMode::NewKeys),
            "role: staff -> admin; added:  -> 3"
        );
        assert_eq!(
            compute_diff(Some(&old), Some(&new), DiffMode::Symmetric),
            "role: staff -> admin; added:  -> 3; gone: x -> "
        );
    }

    #[test]
    fn test_diff_empty_without_both_sides() {
        let new = record(json!({ "name": "A" }));
        assert_eq!(compute_diff(None, Some(&new), DiffMode::NewKeys), "");
        assert_eq!(compute_diff(Some(&new), None, DiffMode::Symmetric), "");
        assert_eq!(compute_diff(Some(&new), Some(&new), DiffMode::NewKeys), "");
    }

    #[test]
    fn test_diff_redacts_password_hash() {
        let old = record(json!({ "hashed_password": "$2b$04$old" }));
        let new = record(json!({ "hashed_password": "$2b$04$new" }));
        assert_eq!(
            compute_diff(Some(&old), Some(&new), DiffMode::NewKeys),
            "hashed_password: [redacted] -> [redacted]"
        );
    }

    #[test]
    fn test_diff_is_strict_about_types() {
        let old = record(json!({ "year": "1" }));
        let new = record(json!({ "year": 1 }));
        assert_eq!(compute_diff(Some(&old), Some(&new), DiffMode::NewKeys), "year: 1 -> 1");
    }

    #[test]
    fn test_audit_appends_with_actor() {
        let mut config = CampusConfig::for_tests();
        config.audit.actor = "registrar@college.edu".into();
        let store = Store::open_in_memory(config).unwrap();
        store
            .audit()
            .log(USERS, "USR1", "login", None, Some(&record(json!({ "user_id": "USR1" }))))
            .unwrap();

        let logs = store.audit().logs(&AuditFilter::default()).unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].user_id, "registrar@college.edu");
        assert_eq!(logs[0].action, "login");
        assert!(logs[0].log_id.starts_with("LOG"));
        assert_eq!(logs[0].diff, "");
    }

    #[test]
    fn test_logs_sorted_newest_first_for_any_insert_order() {
        let store = test_store();
        for ts in [
            "2024-03-02T10:00:00.000Z",
            "2024-03-05T10:00:00.000Z",
            "2024-03-01T10:00:00.000Z",
            "2024-03-04T10:00:00.000Z",
        ] {
            seed_entry(&store, STUDENTS, "update", ts);
        }
        let stamps: Vec<String> = store
            .audit()
            .logs(&AuditFilter::default())
            .unwrap()
            .into_iter()
            .map(|l| l.timestamp)
            .collect();
        assert_eq!(
            stamps,
            vec![
                "2024-03-05T10:00:00.000Z",
                "2024-03-04T10:00:00.000Z",
                "2024-03-02T10:00:00.000Z",
                "2024-03-01T10:00:00.000Z",
            ]
        );
    }

    #[test]
    fn test_filters_and_date_range() {
        let store = test_store();
        seed_entry(&store, STUDENTS, "create", "2024-03-01T09:00:00.000Z");
        seed_entry(&store, STUDENTS, "update", "2024-03-02T09:00:00.000Z");
        seed_entry(&store, USERS, "create", "2024-03-03T09:00:00.000Z");

        let filter = AuditFilter {
            sheet_name: Some(STUDENTS.into()),
            ..AuditFilter::default()
        };
        assert_eq!(store.audit().logs(&filter).unwrap().len(), 2);

        let filter = AuditFilter {
            start_date: Some("2024-03-02".into()),
            end_date: Some("2024-03-03T09:00:00.000Z".into()),
            ..AuditFilter::default()
        };
        let logs = store.audit().logs(&filter).unwrap();
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0].sheet_name, USERS);

        let filter = AuditFilter {
            start_date: Some("someday".into()),
            ..AuditFilter::default()
        };
        assert!(matches!(
            store.audit().logs(&filter),
            Err(CampusError::Validation(_))
        ));
    }

    #[test]
    fn test_missing_audit_table() {
        let backend = MemoryBackend::new();
        let store = Store::with_backend(Box::new(backend), CampusConfig::for_tests()).unwrap();
        assert_eq!(
            store.audit().logs(&AuditFilter::default()).unwrap_err().to_string(),
            "AuditLog sheet not found"
        );
        // warn mode lets the write through
        store.audit().log(USERS, "USR1", "create", None, None).unwrap();
    }

    #[test]
    fn test_fail_closed_rolls_back_mutation() {
        let mut config = CampusConfig::for_tests();
        config.audit.mode = AuditMode::FailClosed;
        let mut backend = MemoryBackend::new();
        let schema = crate::schema::erp_schema().unwrap();
        let students = schema.require(STUDENTS).unwrap();
        backend.create_table(STUDENTS, &students.columns).unwrap();
        let store = Store::with_backend(Box::new(backend), config).unwrap();

        let err = store
            .collection(STUDENTS)
            .unwrap()
            .create(record(json!({
                "student_id": "S1", "first_name": "A", "last_name": "B", "email": "a@b.co"
            })))
            .unwrap_err();
        assert!(matches!(err, CampusError::NotFound { .. }));
        assert_eq!(store.read(|tx| Ok(tx.records(STUDENTS)?.len())).unwrap(), 0);
    }

    #[test]
    fn test_recent_activity_groups() {
        let store = test_store();
        let now = Utc::now();
        let recent = |mins: i64| crate::util::to_iso(now - Duration::minutes(mins));
        seed_entry(&store, STUDENTS, "create", &recent(30));
        seed_entry(&store, STUDENTS, "create", &recent(10));
        seed_entry(&store, "HostelAllocations", "deallocate", &recent(20));
        seed_entry(&store, "Library", "borrow", &recent(5));
        seed_entry(&store, STUDENTS, "create", "2020-01-01T00:00:00.000Z");

        let activity = store.audit().recent_activity(10).unwrap();
        assert_eq!(activity.len(), 3);
        assert_eq!(activity[0].description, "Library borrow");
        assert_eq!(activity[0].kind, "system");
        assert_eq!(activity[1].description, "New student registered (2 items)");
        assert_eq!(activity[1].count, 2);
        assert_eq!(activity[1].kind, "user");
        assert_eq!(activity[2].description, "Room deallocated");

        assert_eq!(store.audit().recent_activity(1).unwrap().len(), 1);
    }
}
