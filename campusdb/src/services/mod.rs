//! Entity services over the ERP tables. Each service is a thin handle on the
//! [`Store`](crate::store::Store); every operation runs in one store
//! transaction and composes the generic collection operations on `Tx`.

pub mod admissions;
pub mod courses;
pub mod dashboard;
pub mod exams;
pub mod fees;
pub mod hostel;
pub mod library;
pub mod notifications;
pub mod settings;
pub mod students;

pub use admissions::{AdmissionFilter, AdmissionStats, Admissions, Admitted, StatusChange};
pub use courses::{CourseFilter, Courses};
pub use dashboard::{Dashboard, DashboardStats, StudentDashboard, SystemHealth, TrendPoint};
pub use exams::{grade_for, ExamFilter, ExamStats, Exams, PASS_MARK};
pub use fees::{
    FeeStats, FeeStructureFilter, Fees, Payment, PaymentFilter, ReceiptFilter, StudentFeeSummary,
};
pub use hostel::{AllocationFilter, BlockStats, Hostel, HostelStats, RoomFilter};
pub use library::{ItemFilter, Library, Returned};
pub use notifications::{
    BulkOutcome, FailedNotification, NotificationStats, Notifications, RecentNotification,
};
pub use settings::Settings;
pub use students::{StudentFilter, StudentStats, Students};

use crate::backend::Record;
use crate::util::{cell_text, cell_timestamp};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::BTreeMap;

/// Equality filters from optional values; unset and blank entries are skipped.
pub(crate) fn filter_record(pairs: &[(&str, &Option<String>)]) -> Record {
    let mut filters = Record::new();
    for (column, value) in pairs {
        if let Some(value) = value.as_deref().filter(|v| !v.is_empty()) {
            filters.insert(column.to_string(), Value::String(value.to_string()));
        }
    }
    filters
}

/// Whether a timestamp cell lies inside an inclusive range. Without bounds every
/// row passes; with bounds an unreadable cell never does.
pub(crate) fn within(
    cell: Option<&Value>,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
) -> bool {
    if start.is_none() && end.is_none() {
        return true;
    }
    let Some(ts) = cell_timestamp(cell) else {
        return false;
    };
    start.map_or(true, |s| ts >= s) && end.map_or(true, |e| ts <= e)
}

/// Count records per key; blank keys are grouped under `Unknown`.
pub(crate) fn count_by<'r>(
    records: impl IntoIterator<Item = &'r Record>,
    column: &str,
) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for record in records {
        let key = record.get(column).map(cell_text).unwrap_or_default();
        let key = if key.is_empty() { "Unknown".to_string() } else { key };
        *counts.entry(key).or_insert(0) += 1;
    }
    counts
}

/// Insert `value` under `key` unless the record already has a non-blank value.
pub(crate) fn default_field(data: &mut Record, key: &str, value: Value) {
    if crate::util::is_blank(data.get(key)) {
        data.insert(key.to_string(), value);
    }
}
