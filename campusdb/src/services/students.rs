use super::{count_by, filter_record};
use crate::backend::Record;
use crate::error::Result;
use crate::schema::{ENROLLMENTS, STUDENTS};
use crate::store::{Store, Tx};
use crate::util::{field_text, loose_eq};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StudentFilter {
    pub programme_id: Option<String>,
    pub enrollment_status: Option<String>,
    pub year_of_study: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StudentStats {
    pub total: usize,
    pub active: usize,
    pub inactive: usize,
    /// Keyed by programme name.
    pub by_programme: BTreeMap<String, usize>,
    pub by_year: BTreeMap<String, usize>,
}

pub struct Students<'a> {
    store: &'a Store,
}

impl Store {
    pub fn students(&self) -> Students<'_> {
        Students { store: self }
    }
}

impl<'a> Students<'a> {
    pub fn get(&self, student_id: &str) -> Result<Record> {
        self.store.read(|tx| tx.get_entity(STUDENTS, student_id))
    }

    pub fn list(&self, filter: &StudentFilter) -> Result<Vec<Record>> {
        let filters = filter_record(&[
            ("programme_id", &filter.programme_id),
            ("enrollment_status", &filter.enrollment_status),
            ("year_of_study", &filter.year_of_study),
        ]);
        self.store.read(|tx| tx.list_entities(STUDENTS, &filters))
    }

    /// Register a student under a caller-supplied `student_id`.
    pub fn create(&self, data: &Record) -> Result<Record> {
        self.store
            .transaction(|tx| tx.create_entity(STUDENTS, data.clone()))
    }

    pub fn update(&self, student_id: &str, patch: &Record) -> Result<Record> {
        self.store
            .transaction(|tx| tx.update_entity(STUDENTS, student_id, patch))
    }

    /// Soft delete: the student is marked `inactive`.
    pub fn delete(&self, student_id: &str) -> Result<()> {
        self.store
            .transaction(|tx| tx.delete_entity(STUDENTS, student_id))
    }

    /// Enrollment rows of one student.
    pub fn courses(&self, student_id: &str) -> Result<Vec<Record>> {
        self.store.read(|tx| enrollments_of(tx, student_id))
    }

    pub fn stats(&self) -> Result<StudentStats> {
        self.store.read(student_stats)
    }
}

pub(crate) fn enrollments_of(tx: &Tx<'_>, student_id: &str) -> Result<Vec<Record>> {
    Ok(tx
        .records(ENROLLMENTS)?
        .into_iter()
        .filter(|e| e.get("student_id").map_or(false, |s| loose_eq(s, &json!(student_id))))
        .collect())
}

pub(crate) fn student_stats(tx: &Tx<'_>) -> Result<StudentStats> {
    let students = tx.records(STUDENTS)?;
    let active = students
        .iter()
        .filter(|s| field_text(s, "enrollment_status") == "active")
        .count();
    Ok(StudentStats {
        total: students.len(),
        active,
        inactive: students.len() - active,
        by_programme: count_by(&students, "programme_name"),
        by_year: count_by(&students, "year_of_study"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CampusConfig;
    use crate::error::CampusError;
    use serde_json::Value;

    fn test_store() -> Store {
        Store::open_in_memory(CampusConfig::for_tests()).unwrap()
    }

    fn record(value: Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    fn student(id: &str, programme: &str, year: i64) -> Record {
        record(json!({
            "student_id": id, "first_name": "Rohan", "last_name": "Das",
            "email": format!("{}@college.edu", id.to_lowercase()),
            "programme_id": programme, "programme_name": programme, "year_of_study": year
        }))
    }

    #[test]
    fn test_create_and_duplicate() {
        let store = test_store();
        let created = store.students().create(&student("S1", "BCOM", 2)).unwrap();
        assert_eq!(created["enrollment_status"], json!("active"));
        assert_eq!(created["year_of_study"], json!(2));

        let err = store.students().create(&student("S1", "BCOM", 2)).unwrap_err();
        assert_eq!(err.to_string(), "Student with this ID already exists");
    }

    #[test]
    fn test_invalid_email_rejected() {
        let store = test_store();
        let mut data = student("S1", "BCOM", 1);
        data.insert("email".into(), json!("rohan.college.edu"));
        assert!(matches!(
            store.students().create(&data),
            Err(CampusError::Validation(_))
        ));
    }

    #[test]
    fn test_list_filters() {
        let store = test_store();
        store.students().create(&student("S1", "BCOM", 1)).unwrap();
        store.students().create(&student("S2", "BCOM", 2)).unwrap();
        store.students().create(&student("S3", "BA", 2)).unwrap();

        let filter = StudentFilter {
            programme_id: Some("BCOM".into()),
            year_of_study: Some("2".into()),
            ..StudentFilter::default()
        };
        let found = store.students().list(&filter).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0]["student_id"], json!("S2"));
    }

    #[test]
    fn test_soft_delete_and_stats() {
        let store = test_store();
        store.students().create(&student("S1", "BCOM", 1)).unwrap();
        store.students().create(&student("S2", "BCOM", 2)).unwrap();
        store.students().create(&student("S3", "", 2)).unwrap();
        store.students().delete("S2").unwrap();

        let stats = store.students().stats().unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.active, 2);
        assert_eq!(stats.inactive, 1);
        assert_eq!(stats.by_programme["BCOM"], 2);
        assert_eq!(stats.by_programme["Unknown"], 1);
        assert_eq!(stats.by_year["2"], 2);
        assert!(matches!(
            store.students().delete("S9"),
            Err(CampusError::NotFound { .. })
        ));
    }

    #[test]
    fn test_update_touches_timestamp() {
        let store = test_store();
        let created = store.students().create(&student("S1", "BCOM", 1)).unwrap();
        let updated = store
            .students()
            .update("S1", &record(json!({ "phone": "9000000001" })))
            .unwrap();
        assert_eq!(updated["phone"], json!("9000000001"));
        assert_eq!(updated["created_at"], created["created_at"]);
    }
}
