use super::{filter_record, within};
use crate::backend::Record;
use crate::error::{CampusError, Result};
use crate::schema::{EXAMS, MARKS};
use crate::store::{Store, Tx};
use crate::util::{cell_number, cell_text, cell_timestamp, field_text, is_blank, parse_bound, round1};
use crate::validation::require_fields;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;

/// Marks at or above this pass.
pub const PASS_MARK: f64 = 40.0;

/// Letter grade for a mark out of 100.
pub fn grade_for(marks: f64) -> &'static str {
    match marks {
        m if m >= 90.0 => "A+",
        m if m >= 80.0 => "A",
        m if m >= 70.0 => "B+",
        m if m >= 60.0 => "B",
        m if m >= 50.0 => "C",
        m if m >= PASS_MARK => "D",
        _ => "F",
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExamFilter {
    pub course_id: Option<String>,
    pub invigilator_id: Option<String>,
    /// Inclusive bounds on `exam_date`.
    pub start_date: Option<String>,
    pub end_date: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExamStats {
    pub total_exams: usize,
    pub completed_exams: usize,
    pub upcoming_exams: usize,
    pub total_marks_entered: usize,
    pub average_marks: f64,
    /// Percentage of entered marks at or above [`PASS_MARK`].
    pub pass_rate: f64,
}

pub struct Exams<'a> {
    store: &'a Store,
}

impl Store {
    pub fn exams(&self) -> Exams<'_> {
        Exams { store: self }
    }
}

impl<'a> Exams<'a> {
    pub fn list(&self, filter: &ExamFilter) -> Result<Vec<Record>> {
        let start = parse_bound("start_date", filter.start_date.as_deref())?;
        let end = parse_bound("end_date", filter.end_date.as_deref())?;
        let filters = filter_record(&[
            ("course_id", &filter.course_id),
            ("invigilator_id", &filter.invigilator_id),
        ]);
        self.store.read(|tx| {
            Ok(tx
                .list_entities(EXAMS, &filters)?
                .into_iter()
                .filter(|exam| within(exam.get("exam_date"), start, end))
                .collect())
        })
    }

    pub fn get(&self, exam_id: &str) -> Result<Record> {
        self.store.read(|tx| tx.get_entity(EXAMS, exam_id))
    }

    pub fn create(&self, data: &Record) -> Result<Record> {
        self.store
            .transaction(|tx| tx.create_entity(EXAMS, data.clone()))
    }

    pub fn update(&self, exam_id: &str, patch: &Record) -> Result<Record> {
        self.store
            .transaction(|tx| tx.update_entity(EXAMS, exam_id, patch))
    }

    /// Remove an exam that has no marks recorded against it.
    pub fn delete(&self, exam_id: &str) -> Result<()> {
        self.store.transaction(|tx| {
            tx.require_entity(EXAMS, exam_id)?;
            if !marks_where(tx, |m| field_text(m, "exam_id") == exam_id)?.is_empty() {
                return Err(CampusError::Conflict(
                    "Cannot delete exam with marks already entered".into(),
                ));
            }
            tx.delete_entity(EXAMS, exam_id)
        })
    }

    pub fn marks(&self, exam_id: &str) -> Result<Vec<Record>> {
        self.store
            .read(|tx| marks_where(tx, |m| field_text(m, "exam_id") == exam_id))
    }

    /// A student's marks, optionally narrowed to one exam.
    pub fn student_results(&self, student_id: &str, exam_id: Option<&str>) -> Result<Vec<Record>> {
        self.store.read(|tx| {
            marks_where(tx, |m| {
                field_text(m, "student_id") == student_id
                    && exam_id.map_or(true, |e| field_text(m, "exam_id") == e)
            })
        })
    }

    /// Record a student's marks for an exam, replacing any earlier entry.
    /// `data` carries `marks_obtained` and optionally `entered_by`.
    pub fn enter_marks(&self, exam_id: &str, student_id: &str, data: &Record) -> Result<Record> {
        self.store.transaction(|tx| {
            require_fields(data, &["marks_obtained"])?;
            let raw = data.get("marks_obtained").cloned().unwrap_or_default();
            let marks = cell_number(Some(&raw)).ok_or_else(|| {
                CampusError::Validation(format!(
                    "Invalid marks_obtained '{}' (expected a number)",
                    cell_text(&raw)
                ))
            })?;
            tx.require_entity(EXAMS, exam_id)?;

            let mut entry = Record::new();
            entry.insert("marks_obtained".into(), raw);
            entry.insert("grade".into(), json!(grade_for(marks)));
            entry.insert(
                "entered_by".into(),
                data.get("entered_by")
                    .filter(|v| !is_blank(Some(v)))
                    .cloned()
                    .unwrap_or_else(|| json!("system")),
            );
            entry.insert("entered_on".into(), json!(tx.now()));

            let existing = marks_where(tx, |m| {
                field_text(m, "exam_id") == exam_id && field_text(m, "student_id") == student_id
            })?
            .into_iter()
            .next();
            match existing {
                Some(previous) => {
                    let marks_id = field_text(&previous, "marks_id");
                    tx.update_entity(MARKS, &marks_id, &entry)
                }
                None => {
                    entry.insert("exam_id".into(), json!(exam_id));
                    entry.insert("student_id".into(), json!(student_id));
                    tx.create_entity(MARKS, entry)
                }
            }
        })
    }

    pub fn stats(&self) -> Result<ExamStats> {
        self.store.read(exam_stats)
    }
}

fn marks_where(tx: &Tx<'_>, keep: impl Fn(&Record) -> bool) -> Result<Vec<Record>> {
    Ok(tx.records(MARKS)?.into_iter().filter(|m| keep(m)).collect())
}

/// Exams dated before now count as completed; undated ones as upcoming.
pub(crate) fn exam_stats(tx: &Tx<'_>) -> Result<ExamStats> {
    let exams = tx.records(EXAMS)?;
    let marks = tx.records(MARKS)?;
    let now = Utc::now();

    let mut stats = ExamStats {
        total_exams: exams.len(),
        ..ExamStats::default()
    };
    let mut total = 0.0;
    let mut passed = 0usize;

    for exam in &exams {
        match cell_timestamp(exam.get("exam_date")) {
            Some(date) if date < now => stats.completed_exams += 1,
            _ => stats.upcoming_exams += 1,
        }

        let exam_id = field_text(exam, "exam_id");
        for mark in marks.iter().filter(|m| field_text(m, "exam_id") == exam_id) {
            let Some(value) = cell_number(mark.get("marks_obtained")) else {
                continue;
            };
            stats.total_marks_entered += 1;
            total += value;
            if value >= PASS_MARK {
                passed += 1;
            }
        }
    }

    if stats.total_marks_entered > 0 {
        let entered = stats.total_marks_entered as f64;
        stats.average_marks = round1(total / entered);
        stats.pass_rate = round1(passed as f64 / entered * 100.0);
    }
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditFilter;
    use crate::config::CampusConfig;
    use serde_json::Value;

    fn test_store() -> Store {
        Store::open_in_memory(CampusConfig::for_tests()).unwrap()
    }

    fn record(value: Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    fn setup() -> Store {
        let store = test_store();
        for (id, course, date, invigilator) in [
            ("EX1", "CS101", "2020-03-01", "T1"),
            ("EX2", "CS101", "2099-03-01", "T2"),
            ("EX3", "ME101", "2021-11-15", "T1"),
        ] {
            store
                .exams()
                .create(&record(json!({
                    "exam_id": id, "course_id": course, "exam_date": date,
                    "invigilator_id": invigilator
                })))
                .unwrap();
        }
        store
    }

    #[test]
    fn test_grade_bands() {
        let cases = [
            (95.0, "A+"), (90.0, "A+"), (89.9, "A"), (80.0, "A"), (75.0, "B+"),
            (60.0, "B"), (55.0, "C"), (40.0, "D"), (39.5, "F"), (0.0, "F"),
        ];
        for (marks, grade) in cases {
            assert_eq!(grade_for(marks), grade, "marks {marks}");
        }
    }

    #[test]
    fn test_list_filters() {
        let store = setup();
        let by_course = store
            .exams()
            .list(&ExamFilter { course_id: Some("CS101".into()), ..ExamFilter::default() })
            .unwrap();
        assert_eq!(by_course.len(), 2);

        let ranged = store
            .exams()
            .list(&ExamFilter {
                start_date: Some("2020-01-01".into()),
                end_date: Some("2021-12-31".into()),
                ..ExamFilter::default()
            })
            .unwrap();
        let ids: Vec<String> = ranged.iter().map(|e| field_text(e, "exam_id")).collect();
        assert_eq!(ids, ["EX1", "EX3"]);

        assert!(matches!(
            store.exams().list(&ExamFilter { start_date: Some("soon".into()), ..ExamFilter::default() }),
            Err(CampusError::Validation(_))
        ));
    }

    #[test]
    fn test_enter_marks_upserts() {
        let store = setup();
        let first = store
            .exams()
            .enter_marks("EX1", "S1", &record(json!({ "marks_obtained": 72 })))
            .unwrap();
        assert_eq!(first["grade"], json!("B+"));
        assert_eq!(first["entered_by"], json!("system"));
        let marks_id = field_text(&first, "marks_id");
        assert!(marks_id.starts_with("MRK"));

        let second = store
            .exams()
            .enter_marks("EX1", "S1", &record(json!({ "marks_obtained": "91", "entered_by": "T1" })))
            .unwrap();
        assert_eq!(field_text(&second, "marks_id"), marks_id);
        assert_eq!(second["grade"], json!("A+"));
        assert_eq!(store.exams().marks("EX1").unwrap().len(), 1);

        let updates = store
            .audit()
            .logs(&AuditFilter { sheet_name: Some("Marks".into()), action: Some("update".into()), ..AuditFilter::default() })
            .unwrap();
        assert_eq!(updates.len(), 1);

        assert!(matches!(
            store.exams().enter_marks("EX1", "S2", &Record::new()),
            Err(CampusError::Validation(_))
        ));
        assert!(matches!(
            store.exams().enter_marks("EX1", "S2", &record(json!({ "marks_obtained": "abc" }))),
            Err(CampusError::Validation(_))
        ));
        assert!(matches!(
            store.exams().enter_marks("EX9", "S2", &record(json!({ "marks_obtained": 50 }))),
            Err(CampusError::NotFound { .. })
        ));
    }

    #[test]
    fn test_results_delete_guard_and_stats() {
        let store = setup();
        store.exams().enter_marks("EX1", "S1", &record(json!({ "marks_obtained": 80 }))).unwrap();
        store.exams().enter_marks("EX1", "S2", &record(json!({ "marks_obtained": 30 }))).unwrap();
        store.exams().enter_marks("EX3", "S1", &record(json!({ "marks_obtained": 55 }))).unwrap();

        assert_eq!(store.exams().student_results("S1", None).unwrap().len(), 2);
        assert_eq!(store.exams().student_results("S1", Some("EX3")).unwrap().len(), 1);

        let err = store.exams().delete("EX1").unwrap_err();
        assert_eq!(err.to_string(), "Cannot delete exam with marks already entered");
        store.exams().delete("EX2").unwrap();

        let stats = store.exams().stats().unwrap();
        assert_eq!(
            stats,
            ExamStats {
                total_exams: 2,
                completed_exams: 2,
                upcoming_exams: 0,
                total_marks_entered: 3,
                average_marks: 55.0,
                pass_rate: 66.7,
            }
        );
    }
}
