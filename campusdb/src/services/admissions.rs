use super::filter_record;
use crate::backend::Record;
use crate::error::{CampusError, Result};
use crate::schema::{ADMISSIONS, STUDENTS};
use crate::store::Store;
use crate::util::{field_text, loose_eq};
use crate::validation;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Student fields an admission does not carry; copied from the caller's data on admit.
const STUDENT_EXTRA_FIELDS: &[&str] = &[
    "father_name",
    "mother_name",
    "dob",
    "gender",
    "address",
    "programme_id",
    "photo_drive_file_id",
];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AdmissionFilter {
    pub status: Option<String>,
    /// Matches `programme_applied`.
    pub programme: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusChange {
    pub status: String,
    pub verifier_notes: String,
    pub assigned_officer_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AdmissionStats {
    pub total: usize,
    pub pending: usize,
    pub under_review: usize,
    pub approved: usize,
    pub rejected: usize,
    pub admitted: usize,
}

/// Result of converting an approved admission into a student.
#[derive(Debug, Clone, Serialize)]
pub struct Admitted {
    pub student: Record,
    pub admission: Record,
}

/// Admission applications and their conversion into students.
pub struct Admissions<'a> {
    store: &'a Store,
}

impl Store {
    pub fn admissions(&self) -> Admissions<'_> {
        Admissions { store: self }
    }
}

impl<'a> Admissions<'a> {
    /// File a new application. Status always starts as `pending`.
    pub fn create(&self, data: &Record) -> Result<Record> {
        self.store.transaction(|tx| {
            let def = tx.table(ADMISSIONS)?;
            let mut data = data.clone();

            if let Some(message) = validation::validate_record(def, &data).message() {
                return Err(CampusError::Validation(message));
            }
            let email = data.get("email").cloned().unwrap_or(Value::Null);
            if tx.find(ADMISSIONS, "email", &email)?.is_some() {
                return Err(CampusError::Conflict(
                    "An admission application with this email already exists".into(),
                ));
            }

            let applicant_name = format!(
                "{} {}",
                field_text(&data, "first_name"),
                field_text(&data, "last_name")
            );
            data.insert("application_ref".into(), json!(tx.new_id("APP")));
            data.insert("applicant_name".into(), json!(applicant_name));
            data.insert("status".into(), json!("pending"));
            for cleared in ["verifier_notes", "admitted_on", "student_id"] {
                data.insert(cleared.into(), json!(""));
            }
            data.remove("admission_id");

            tx.create_entity(ADMISSIONS, data)
        })
    }

    pub fn get(&self, admission_id: &str) -> Result<Record> {
        self.store.read(|tx| tx.get_entity(ADMISSIONS, admission_id))
    }

    pub fn by_email(&self, email: &str) -> Result<Vec<Record>> {
        self.store.read(|tx| {
            Ok(tx
                .records(ADMISSIONS)?
                .into_iter()
                .filter(|a| a.get("email").map_or(false, |e| loose_eq(e, &json!(email))))
                .collect())
        })
    }

    pub fn list(&self, filter: &AdmissionFilter) -> Result<Vec<Record>> {
        let filters = filter_record(&[
            ("status", &filter.status),
            ("programme_applied", &filter.programme),
            ("email", &filter.email),
        ]);
        self.store.read(|tx| tx.list_entities(ADMISSIONS, &filters))
    }

    pub fn update(&self, admission_id: &str, patch: &Record) -> Result<Record> {
        self.store
            .transaction(|tx| tx.update_entity(ADMISSIONS, admission_id, patch))
    }

    /// Move an application through its workflow, recording verifier notes.
    pub fn update_status(&self, admission_id: &str, change: &StatusChange) -> Result<Record> {
        self.store.transaction(|tx| {
            let def = tx.table(ADMISSIONS)?;
            if let Some(allowed) = def.enums.get("status") {
                validation::check_enum("status", &json!(change.status), allowed)?;
            }

            let mut patch = Record::new();
            patch.insert("status".into(), json!(change.status));
            patch.insert("verifier_notes".into(), json!(change.verifier_notes));
            if let Some(officer) = change.assigned_officer_id.as_deref().filter(|o| !o.is_empty()) {
                patch.insert("assigned_officer_id".into(), json!(officer));
            }
            if change.status == "admitted" {
                patch.insert("admitted_on".into(), json!(tx.now()));
            }
            tx.update_entity_as(ADMISSIONS, admission_id, &patch, "update_status")
        })
    }

    pub fn delete(&self, admission_id: &str) -> Result<()> {
        self.store
            .transaction(|tx| tx.delete_entity(ADMISSIONS, admission_id))
    }

    /// Turn an approved application into a student record and mark it admitted.
    /// `extra` supplies the student fields an application does not collect.
    pub fn admit_student(&self, admission_id: &str, extra: &Record) -> Result<Admitted> {
        self.store.transaction(|tx| {
            let admission = tx.get_entity(ADMISSIONS, admission_id)?;
            if field_text(&admission, "status") != "approved" {
                return Err(CampusError::Conflict(
                    "Admission must be approved first".into(),
                ));
            }

            let mut student_id = tx.new_id("STD");
            while tx.find_entity(STUDENTS, &student_id)?.is_some() {
                student_id = tx.new_id("STD");
            }

            let mut student = Record::new();
            student.insert("student_id".into(), json!(student_id));
            for (to, from) in [
                ("admission_id", "admission_id"),
                ("first_name", "first_name"),
                ("last_name", "last_name"),
                ("email", "email"),
                ("phone", "phone"),
                ("programme_name", "programme_applied"),
            ] {
                student.insert(to.into(), admission.get(from).cloned().unwrap_or(json!("")));
            }
            for field in STUDENT_EXTRA_FIELDS {
                if let Some(value) = extra.get(*field) {
                    student.insert(field.to_string(), value.clone());
                }
            }
            student.insert("enrollment_status".into(), json!("active"));
            student.insert("year_of_study".into(), json!(1));

            let student = tx.create_entity(STUDENTS, student)?;

            let mut patch = Record::new();
            patch.insert("student_id".into(), json!(student_id));
            patch.insert("status".into(), json!("admitted"));
            patch.insert("admitted_on".into(), json!(tx.now()));
            let admission =
                tx.update_entity_as(ADMISSIONS, admission_id, &patch, "convert_to_student")?;

            log::info!("Admission {admission_id} converted to student {student_id}");
            Ok(Admitted { student, admission })
        })
    }

    pub fn stats(&self) -> Result<AdmissionStats> {
        self.store.read(|tx| {
            let mut stats = AdmissionStats::default();
            for admission in tx.records(ADMISSIONS)? {
                stats.total += 1;
                match field_text(&admission, "status").as_str() {
                    "pending" => stats.pending += 1,
                    "under_review" => stats.under_review += 1,
                    "approved" => stats.approved += 1,
                    "rejected" => stats.rejected += 1,
                    "admitted" => stats.admitted += 1,
                    _ => {}
                }
            }
            Ok(stats)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditFilter;
    use crate::config::CampusConfig;
    use pretty_assertions::assert_eq;

    fn test_store() -> Store {
        Store::open_in_memory(CampusConfig::for_tests()).unwrap()
    }

    fn record(value: Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    fn application(email: &str) -> Record {
        record(json!({
            "first_name": "Kavya", "last_name": "Iyer", "email": email,
            "phone": "9876543210", "programme_applied": "BSc Physics",
            "status": "approved"
        }))
    }

    fn approve(store: &Store, id: &str) {
        store
            .admissions()
            .update_status(
                id,
                &StatusChange {
                    status: "approved".into(),
                    verifier_notes: "documents verified".into(),
                    assigned_officer_id: Some("USR9".into()),
                },
            )
            .unwrap();
    }

    #[test]
    fn test_create_sets_workflow_fields() {
        let store = test_store();
        let created = store.admissions().create(&application("k@x.com")).unwrap();
        assert!(created["admission_id"].as_str().unwrap().starts_with("ADM"));
        assert!(created["application_ref"].as_str().unwrap().starts_with("APP"));
        assert_eq!(created["applicant_name"], json!("Kavya Iyer"));
        assert_eq!(created["status"], json!("pending"));
        assert_ne!(created["applied_on"], json!(""));
    }

    #[test]
    fn test_create_validation_and_conflict() {
        let store = test_store();
        let err = store
            .admissions()
            .create(&record(json!({ "first_name": "A", "email": "a@x.com" })))
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Missing required fields: last_name, phone, programme_applied"
        );

        store.admissions().create(&application("k@x.com")).unwrap();
        let err = store.admissions().create(&application("k@x.com")).unwrap_err();
        assert!(matches!(err, CampusError::Conflict(_)));
    }

    #[test]
    fn test_update_status() {
        let store = test_store();
        let id = store.admissions().create(&application("k@x.com")).unwrap()["admission_id"]
            .as_str()
            .unwrap()
            .to_string();

        let err = store
            .admissions()
            .update_status(&id, &StatusChange { status: "lost".into(), ..StatusChange::default() })
            .unwrap_err();
        assert!(matches!(err, CampusError::Validation(_)));

        approve(&store, &id);
        let admission = store.admissions().get(&id).unwrap();
        assert_eq!(admission["status"], json!("approved"));
        assert_eq!(admission["assigned_officer_id"], json!("USR9"));
        assert_eq!(admission["admitted_on"], json!(""));

        let logs = store
            .audit()
            .logs(&AuditFilter { action: Some("update_status".into()), ..AuditFilter::default() })
            .unwrap();
        assert_eq!(logs.len(), 1);
        assert!(logs[0].diff.contains("status: pending -> approved"));
    }

    #[test]
    fn test_admit_requires_approval() {
        let store = test_store();
        let id = store.admissions().create(&application("k@x.com")).unwrap()["admission_id"]
            .as_str()
            .unwrap()
            .to_string();
        let err = store.admissions().admit_student(&id, &Record::new()).unwrap_err();
        assert_eq!(err.to_string(), "Admission must be approved first");
        assert!(matches!(err, CampusError::Conflict(_)));
    }

    #[test]
    fn test_admit_student_writes_two_audit_entries() {
        let store = test_store();
        let id = store.admissions().create(&application("k@x.com")).unwrap()["admission_id"]
            .as_str()
            .unwrap()
            .to_string();
        approve(&store, &id);
        let before = store.audit().logs(&AuditFilter::default()).unwrap().len();

        let admitted = store
            .admissions()
            .admit_student(&id, &record(json!({ "gender": "F", "programme_id": "BSC-PHY" })))
            .unwrap();
        let student_id = admitted.student["student_id"].as_str().unwrap().to_string();
        assert!(student_id.starts_with("STD"));
        assert_eq!(admitted.student["programme_name"], json!("BSc Physics"));
        assert_eq!(admitted.student["gender"], json!("F"));
        assert_eq!(admitted.student["admission_id"], json!(id));
        assert_eq!(admitted.admission["status"], json!("admitted"));
        assert_eq!(admitted.admission["student_id"], json!(student_id));

        let logs = store.audit().logs(&AuditFilter::default()).unwrap();
        assert_eq!(logs.len(), before + 2);
        let actions: Vec<&str> = logs.iter().map(|l| l.action.as_str()).collect();
        assert!(actions.contains(&"convert_to_student"));
        assert!(store.students().get(&student_id).is_ok());
    }

    #[test]
    fn test_list_stats_and_delete() {
        let store = test_store();
        let first = store.admissions().create(&application("a@x.com")).unwrap();
        store.admissions().create(&application("b@x.com")).unwrap();
        let id = first["admission_id"].as_str().unwrap().to_string();
        approve(&store, &id);

        let approved = store
            .admissions()
            .list(&AdmissionFilter { status: Some("approved".into()), ..AdmissionFilter::default() })
            .unwrap();
        assert_eq!(approved.len(), 1);
        assert_eq!(store.admissions().by_email("b@x.com").unwrap().len(), 1);

        let stats = store.admissions().stats().unwrap();
        assert_eq!(stats, AdmissionStats { total: 2, pending: 1, approved: 1, ..AdmissionStats::default() });

        store.admissions().delete(&id).unwrap();
        assert_eq!(store.admissions().get(&id).unwrap_err().to_string(), "Admission not found");
    }
}
