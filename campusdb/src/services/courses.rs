use super::filter_record;
use crate::backend::Record;
use crate::error::{CampusError, Result};
use crate::schema::{COURSES, ENROLLMENTS, EXAMS, STUDENTS};
use crate::store::{Store, Tx};
use crate::util::{cell_number, field_text, loose_eq};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CourseFilter {
    pub programme_id: Option<String>,
    pub semester: Option<String>,
}

pub struct Courses<'a> {
    store: &'a Store,
}

impl Store {
    pub fn courses(&self) -> Courses<'_> {
        Courses { store: self }
    }
}

impl<'a> Courses<'a> {
    pub fn get(&self, course_id: &str) -> Result<Record> {
        self.store.read(|tx| tx.get_entity(COURSES, course_id))
    }

    pub fn list(&self, filter: &CourseFilter) -> Result<Vec<Record>> {
        let filters = filter_record(&[
            ("programme_id", &filter.programme_id),
            ("semester", &filter.semester),
        ]);
        self.store.read(|tx| tx.list_entities(COURSES, &filters))
    }

    /// Courses arranged for a timetable view: by semester, then course id.
    pub fn timetable(&self, filter: &CourseFilter) -> Result<Vec<Record>> {
        let mut courses = self.list(filter)?;
        courses.sort_by(|a, b| {
            let semester = |r: &Record| cell_number(r.get("semester")).unwrap_or(0.0);
            semester(a)
                .total_cmp(&semester(b))
                .then_with(|| field_text(a, "course_id").cmp(&field_text(b, "course_id")))
        });
        Ok(courses)
    }

    pub fn create(&self, data: &Record) -> Result<Record> {
        self.store
            .transaction(|tx| tx.create_entity(COURSES, data.clone()))
    }

    pub fn update(&self, course_id: &str, patch: &Record) -> Result<Record> {
        self.store
            .transaction(|tx| tx.update_entity(COURSES, course_id, patch))
    }

    /// Remove a course. Refused while any enrollment references it.
    pub fn delete(&self, course_id: &str) -> Result<()> {
        self.store.transaction(|tx| {
            tx.require_entity(COURSES, course_id)?;
            if !referencing(tx, ENROLLMENTS, course_id)?.is_empty() {
                return Err(CampusError::Conflict(
                    "Cannot delete course with active enrollments".into(),
                ));
            }
            tx.delete_entity(COURSES, course_id)
        })
    }

    pub fn enrollments(&self, course_id: &str) -> Result<Vec<Record>> {
        self.store.read(|tx| referencing(tx, ENROLLMENTS, course_id))
    }

    pub fn exams(&self, course_id: &str) -> Result<Vec<Record>> {
        self.store.read(|tx| referencing(tx, EXAMS, course_id))
    }

    /// Enroll a student. Both must exist and the student may hold only one
    /// active enrollment per course.
    pub fn enroll(&self, student_id: &str, course_id: &str) -> Result<Record> {
        self.store.transaction(|tx| {
            tx.require_entity(STUDENTS, student_id)?;
            tx.require_entity(COURSES, course_id)?;

            let duplicate = referencing(tx, ENROLLMENTS, course_id)?.iter().any(|e| {
                e.get("student_id")
                    .map_or(false, |s| loose_eq(s, &json!(student_id)))
                    && field_text(e, "status") == "active"
            });
            if duplicate {
                return Err(CampusError::Conflict(
                    "Student is already enrolled in this course".into(),
                ));
            }

            let mut enrollment = Record::new();
            enrollment.insert("student_id".into(), json!(student_id));
            enrollment.insert("course_id".into(), json!(course_id));
            tx.create_entity(ENROLLMENTS, enrollment)
        })
    }
}

/// Rows of `table` whose `course_id` matches.
fn referencing(tx: &Tx<'_>, table: &str, course_id: &str) -> Result<Vec<Record>> {
    let id = Value::String(course_id.to_string());
    Ok(tx
        .records(table)?
        .into_iter()
        .filter(|r| r.get("course_id").map_or(false, |c| loose_eq(c, &id)))
        .collect())
}
