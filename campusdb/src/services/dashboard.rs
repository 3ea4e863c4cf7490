//! Aggregated figures for the admin and student dashboards. Each report reads
//! the whole store under one lock, so the numbers are mutually consistent.

use super::fees::{fee_stats, student_fee_summary};
use super::hostel::hostel_stats;
use super::students::{enrollments_of, student_stats};
use crate::audit::Activity;
use crate::error::{CampusError, Result};
use crate::schema::{ADMISSIONS, COURSES, EXAMS, MARKS, STUDENTS, USERS};
use crate::store::{Store, Tx};
use crate::util::{cell_number, cell_timestamp, field_text, is_truthy, round1};
use chrono::{Duration, NaiveDate, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};

/// Tables whose absence marks the database as degraded.
const CORE_TABLES: [&str; 3] = [USERS, ADMISSIONS, STUDENTS];

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DashboardStats {
    /// Students whose enrollment is active.
    pub total_students: usize,
    pub total_courses: usize,
    pub total_fees_collected: f64,
    pub hostel_occupancy: f64,
    /// Exams dated now or later.
    pub pending_exams: usize,
    pub active_users: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StudentDashboard {
    pub enrolled_courses: usize,
    pub pending_fees: f64,
    /// Mean of the student's marks; `None` before any are entered.
    pub average_marks: Option<f64>,
    pub completed_exams: usize,
    pub upcoming_exams: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SystemHealth {
    /// `healthy`, or `warning` when a core table is missing.
    pub database_status: String,
    pub missing_tables: Vec<String>,
    pub active_users: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrendPoint {
    pub date: String,
    pub count: usize,
}

pub struct Dashboard<'a> {
    store: &'a Store,
}

impl Store {
    pub fn dashboard(&self) -> Dashboard<'_> {
        Dashboard { store: self }
    }
}

impl<'a> Dashboard<'a> {
    /// Institution-wide figures. A missing table contributes zero.
    pub fn stats(&self) -> Result<DashboardStats> {
        self.store.read(|tx| {
            let now = Utc::now();
            Ok(DashboardStats {
                total_students: or_default(student_stats(tx))?.active,
                total_courses: or_default(tx.records(COURSES))?.len(),
                total_fees_collected: or_default(fee_stats(tx))?.total_collected,
                hostel_occupancy: or_default(hostel_stats(tx))?.occupancy_rate,
                pending_exams: or_default(tx.records(EXAMS))?
                    .iter()
                    .filter(|exam| cell_timestamp(exam.get("exam_date")).map_or(false, |d| d >= now))
                    .count(),
                active_users: or_default(active_users(tx))?,
            })
        })
    }

    pub fn student(&self, student_id: &str) -> Result<StudentDashboard> {
        self.store.read(|tx| {
            let enrollments = or_default(enrollments_of(tx, student_id))?;
            let mut stats = StudentDashboard {
                enrolled_courses: enrollments.len(),
                pending_fees: or_default(student_fee_summary(tx, student_id))?.total_pending,
                ..StudentDashboard::default()
            };

            let marks: Vec<f64> = or_default(tx.records(MARKS))?
                .iter()
                .filter(|m| field_text(m, "student_id") == student_id)
                .filter_map(|m| cell_number(m.get("marks_obtained")))
                .collect();
            stats.completed_exams = marks.len();
            if !marks.is_empty() {
                stats.average_marks = Some(round1(marks.iter().sum::<f64>() / marks.len() as f64));
            }

            let courses: HashSet<String> = enrollments
                .iter()
                .map(|e| field_text(e, "course_id"))
                .collect();
            let now = Utc::now();
            stats.upcoming_exams = or_default(tx.records(EXAMS))?
                .iter()
                .filter(|exam| courses.contains(&field_text(exam, "course_id")))
                .filter(|exam| cell_timestamp(exam.get("exam_date")).map_or(false, |d| d >= now))
                .count();
            Ok(stats)
        })
    }

    pub fn recent_activity(&self, limit: usize) -> Result<Vec<Activity>> {
        self.store.read(|tx| tx.recent_activity(limit))
    }

    pub fn system_health(&self) -> Result<SystemHealth> {
        self.store.read(|tx| {
            let mut missing_tables = Vec::new();
            for table in CORE_TABLES {
                if !tx.has_table(table)? {
                    missing_tables.push(table.to_string());
                }
            }
            if !missing_tables.is_empty() {
                log::warn!("Core tables missing: {}", missing_tables.join(", "));
            }
            Ok(SystemHealth {
                database_status: if missing_tables.is_empty() { "healthy" } else { "warning" }.into(),
                missing_tables,
                active_users: or_default(active_users(tx))?,
            })
        })
    }

    /// Admissions per application day for the last `days` days, oldest first,
    /// ending today. Days without applications report zero.
    pub fn admission_trends(&self, days: u32) -> Result<Vec<TrendPoint>> {
        self.store.read(|tx| {
            let today = Utc::now().date_naive();
            let mut counts: BTreeMap<NaiveDate, usize> = (0..i64::from(days))
                .map(|back| (today - Duration::days(back), 0))
                .collect();
            for admission in tx.records(ADMISSIONS)? {
                let Some(applied) = cell_timestamp(admission.get("applied_on")) else {
                    continue;
                };
                if let Some(count) = counts.get_mut(&applied.date_naive()) {
                    *count += 1;
                }
            }
            Ok(counts
                .into_iter()
                .map(|(date, count)| TrendPoint {
                    date: date.format("%Y-%m-%d").to_string(),
                    count,
                })
                .collect())
        })
    }
}

fn active_users(tx: &Tx<'_>) -> Result<usize> {
    Ok(tx
        .records(USERS)?
        .iter()
        .filter(|u| is_truthy(u.get("active")))
        .count())
}

/// Treat a missing table as empty; other failures propagate.
fn or_default<T: Default>(result: Result<T>) -> Result<T> {
    match result {
        Err(CampusError::NotFound { .. }) => Ok(T::default()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{NewUser, Role};
    use crate::backend::{MemoryBackend, Record};
    use crate::config::CampusConfig;
    use crate::util::to_iso;
    use serde_json::{json, Value};

    fn test_store() -> Store {
        Store::open_in_memory(CampusConfig::for_tests()).unwrap()
    }

    fn record(value: Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    fn populated() -> Store {
        let store = test_store();
        for (id, status) in [("S1", "active"), ("S2", "active"), ("S3", "inactive")] {
            store
                .students()
                .create(&record(json!({
                    "student_id": id, "first_name": "A", "last_name": "B",
                    "email": format!("{id}@college.edu"), "enrollment_status": status
                })))
                .unwrap();
        }
        for id in ["CS101", "CS102"] {
            store
                .courses()
                .create(&record(json!({
                    "course_id": id, "title": id, "credits": 3, "programme_id": "CS"
                })))
                .unwrap();
        }
        store.courses().enroll("S1", "CS101").unwrap();
        for (id, course, date) in [
            ("EX1", "CS101", "2020-01-10"),
            ("EX2", "CS101", "2099-01-10"),
            ("EX3", "CS102", "2099-02-10"),
        ] {
            store
                .exams()
                .create(&record(json!({ "exam_id": id, "course_id": course, "exam_date": date })))
                .unwrap();
        }
        store.exams().enter_marks("EX1", "S1", &record(json!({ "marks_obtained": 67 }))).unwrap();
        store
            .fees()
            .create_fee_structure(&record(json!({
                "fee_id": "F1", "component": "Tuition", "amount": 1000,
                "effective_from": "2020-01-01"
            })))
            .unwrap();
        store
            .fees()
            .create_payment(&record(json!({ "student_id": "S1", "amount": 400, "payment_mode": "upi" })))
            .unwrap();
        for (id, status) in [("R1", "available"), ("R2", "available")] {
            store
                .hostel()
                .create_room(&record(json!({
                    "room_id": id, "hostel": "H", "block": "A", "floor": 1, "room_no": id,
                    "status": status
                })))
                .unwrap();
        }
        store.hostel().allocate("S2", "R1", &Record::new()).unwrap();
        store
            .users()
            .create_user(&NewUser::new("staff1", "staff1@college.edu", "pw", Role::Staff))
            .unwrap();
        store
    }

    #[test]
    fn test_dashboard_stats() {
        let store = populated();
        assert_eq!(
            store.dashboard().stats().unwrap(),
            DashboardStats {
                total_students: 2,
                total_courses: 2,
                total_fees_collected: 400.0,
                hostel_occupancy: 50.0,
                pending_exams: 2,
                active_users: 1,
            }
        );
    }

    #[test]
    fn test_student_dashboard() {
        let store = populated();
        assert_eq!(
            store.dashboard().student("S1").unwrap(),
            StudentDashboard {
                enrolled_courses: 1,
                pending_fees: 600.0,
                average_marks: Some(67.0),
                completed_exams: 1,
                upcoming_exams: 1,
            }
        );
        let fresh = store.dashboard().student("S3").unwrap();
        assert_eq!(fresh.average_marks, None);
        assert_eq!(fresh.pending_fees, 1000.0);
    }

    #[test]
    fn test_missing_tables_count_as_empty() {
        let store =
            Store::with_backend(Box::new(MemoryBackend::new()), CampusConfig::for_tests()).unwrap();
        assert_eq!(store.dashboard().stats().unwrap(), DashboardStats::default());

        let health = store.dashboard().system_health().unwrap();
        assert_eq!(health.database_status, "warning");
        assert_eq!(health.missing_tables, ["Users", "Admissions", "Students"]);

        let healthy = populated().dashboard().system_health().unwrap();
        assert_eq!(healthy.database_status, "healthy");
        assert_eq!(healthy.active_users, 1);
    }

    #[test]
    fn test_admission_trends() {
        let store = test_store();
        let today = Utc::now();
        for (n, applied_on) in [
            to_iso(today),
            to_iso(today),
            to_iso(today - Duration::days(2)),
            to_iso(today - Duration::days(40)),
        ]
        .iter()
        .enumerate()
        {
            let admission = store
                .admissions()
                .create(&record(json!({
                    "first_name": "P", "last_name": "Q", "email": format!("p{n}@mail.com"),
                    "phone": "99", "programme_applied": "CS"
                })))
                .unwrap();
            store
                .admissions()
                .update(
                    &field_text(&admission, "admission_id"),
                    &record(json!({ "applied_on": applied_on })),
                )
                .unwrap();
        }

        let trends = store.dashboard().admission_trends(7).unwrap();
        assert_eq!(trends.len(), 7);
        assert_eq!(trends[6].date, today.format("%Y-%m-%d").to_string());
        assert_eq!(trends[6].count, 2);
        assert_eq!(trends[4].count, 1);
        assert_eq!(trends.iter().map(|t| t.count).sum::<usize>(), 3);
    }

    #[test]
    fn test_recent_activity_reads_audit() {
        let store = populated();
        let activity = store.dashboard().recent_activity(5).unwrap();
        assert!(!activity.is_empty());
        assert!(activity.len() <= 5);
    }
}
