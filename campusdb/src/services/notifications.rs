use super::students::StudentFilter;
use crate::backend::Record;
use crate::error::Result;
use crate::schema::NOTIFICATIONS;
use crate::store::{Store, Tx};
use crate::util::{cell_timestamp, field_text, loose_eq};
use chrono::{Duration, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use std::cmp::Reverse;
use std::collections::BTreeMap;

const RECENT_DAYS: i64 = 7;
const RECENT_LIMIT: usize = 10;

/// Result of a bulk send. Items fail independently.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BulkOutcome {
    pub created: usize,
    pub errors: usize,
    pub notifications: Vec<Record>,
    pub failed_notifications: Vec<FailedNotification>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FailedNotification {
    pub data: Record,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecentNotification {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub subject: String,
    pub sent_on: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NotificationStats {
    pub total: usize,
    pub sent: usize,
    pub read: usize,
    pub by_type: BTreeMap<String, usize>,
    /// Up to ten notifications from the last week, newest first.
    pub recent_activity: Vec<RecentNotification>,
}

pub struct Notifications<'a> {
    store: &'a Store,
}

impl Store {
    pub fn notifications(&self) -> Notifications<'_> {
        Notifications { store: self }
    }
}

impl<'a> Notifications<'a> {
    /// Notifications addressed to `recipient`, newest first.
    pub fn for_recipient(&self, recipient: &str) -> Result<Vec<Record>> {
        self.store.read(|tx| for_recipient(tx, recipient))
    }

    /// Send a notification. It is stamped `sent` at the current time.
    pub fn create(&self, data: &Record) -> Result<Record> {
        self.store.transaction(|tx| create(tx, data))
    }

    pub fn update(&self, notification_id: &str, patch: &Record) -> Result<Record> {
        self.store
            .transaction(|tx| tx.update_entity(NOTIFICATIONS, notification_id, patch))
    }

    pub fn mark_read(&self, notification_id: &str) -> Result<Record> {
        let mut patch = Record::new();
        patch.insert("status".into(), json!("read"));
        self.update(notification_id, &patch)
    }

    /// Send each notification in its own transaction, collecting failures.
    pub fn create_bulk(&self, items: &[Record]) -> Result<BulkOutcome> {
        let mut outcome = BulkOutcome::default();
        for data in items {
            match self.store.transaction(|tx| create(tx, data)) {
                Ok(notification) => outcome.notifications.push(notification),
                Err(e) if e.is_domain() => outcome.failed_notifications.push(FailedNotification {
                    data: data.clone(),
                    error: e.to_string(),
                }),
                Err(e) => return Err(e),
            }
        }
        outcome.created = outcome.notifications.len();
        outcome.errors = outcome.failed_notifications.len();
        log::info!(
            "Bulk notification: {} created, {} failed",
            outcome.created,
            outcome.errors
        );
        Ok(outcome)
    }

    pub fn notify_all_students(&self, subject: &str, body: &str, kind: &str) -> Result<BulkOutcome> {
        self.notify_students(&StudentFilter::default(), subject, body, kind)
    }

    /// Notify every student matching `criteria`.
    pub fn notify_students(
        &self,
        criteria: &StudentFilter,
        subject: &str,
        body: &str,
        kind: &str,
    ) -> Result<BulkOutcome> {
        let kind = if kind.is_empty() { "announcement" } else { kind };
        let items: Vec<Record> = self
            .store
            .students()
            .list(criteria)?
            .iter()
            .map(|student| {
                let mut item = Record::new();
                item.insert("recipient".into(), json!(field_text(student, "student_id")));
                item.insert("type".into(), json!(kind));
                item.insert("subject".into(), json!(subject));
                item.insert("body".into(), json!(body));
                item
            })
            .collect();
        self.create_bulk(&items)
    }

    pub fn unread_count(&self, recipient: &str) -> Result<usize> {
        self.store.read(|tx| unread_count(tx, recipient))
    }

    /// Delete read notifications sent more than `days_old` days ago.
    /// Returns how many were removed.
    pub fn cleanup(&self, days_old: i64) -> Result<usize> {
        self.store.transaction(|tx| {
            let cutoff = Utc::now() - Duration::days(days_old);
            let stale: Vec<String> = tx
                .records(NOTIFICATIONS)?
                .iter()
                .filter(|n| {
                    field_text(n, "status") == "read"
                        && cell_timestamp(n.get("sent_on")).map_or(false, |sent| sent < cutoff)
                })
                .map(|n| field_text(n, "notification_id"))
                .collect();
            for id in &stale {
                tx.delete_entity(NOTIFICATIONS, id)?;
            }
            log::info!("Cleaned up {} old notifications", stale.len());
            Ok(stale.len())
        })
    }

    pub fn stats(&self) -> Result<NotificationStats> {
        self.store.read(|tx| {
            let all = tx.records(NOTIFICATIONS)?;
            let since = Utc::now() - Duration::days(RECENT_DAYS);
            let mut stats = NotificationStats {
                total: all.len(),
                ..NotificationStats::default()
            };

            let mut recent = Vec::new();
            for n in &all {
                match field_text(n, "status").as_str() {
                    "sent" => stats.sent += 1,
                    "read" => stats.read += 1,
                    _ => {}
                }
                let kind = field_text(n, "type");
                let kind = if kind.is_empty() { "unknown".to_string() } else { kind };
                *stats.by_type.entry(kind).or_insert(0) += 1;

                if let Some(sent) = cell_timestamp(n.get("sent_on")).filter(|s| *s >= since) {
                    recent.push((sent, n));
                }
            }

            recent.sort_by_key(|(sent, _)| Reverse(*sent));
            stats.recent_activity = recent
                .into_iter()
                .take(RECENT_LIMIT)
                .map(|(_, n)| RecentNotification {
                    id: field_text(n, "notification_id"),
                    kind: field_text(n, "type"),
                    subject: field_text(n, "subject"),
                    sent_on: field_text(n, "sent_on"),
                })
                .collect();
            Ok(stats)
        })
    }
}

fn create(tx: &mut Tx<'_>, data: &Record) -> Result<Record> {
    let mut data = data.clone();
    data.remove("notification_id");
    data.insert("sent_on".into(), json!(tx.now()));
    data.insert("status".into(), json!("sent"));
    data.insert("response".into(), json!(""));
    tx.create_entity(NOTIFICATIONS, data)
}

pub(crate) fn for_recipient(tx: &Tx<'_>, recipient: &str) -> Result<Vec<Record>> {
    let recipient = Value::String(recipient.to_string());
    let mut found: Vec<Record> = tx
        .records(NOTIFICATIONS)?
        .into_iter()
        .filter(|n| n.get("recipient").map_or(false, |r| loose_eq(r, &recipient)))
        .collect();
    found.sort_by_key(|n| Reverse(cell_timestamp(n.get("sent_on"))));
    Ok(found)
}

pub(crate) fn unread_count(tx: &Tx<'_>, recipient: &str) -> Result<usize> {
    Ok(for_recipient(tx, recipient)?
        .iter()
        .filter(|n| field_text(n, "status") != "read")
        .count())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditFilter;
    use crate::config::CampusConfig;
    use crate::error::CampusError;

    fn test_store() -> Store {
        Store::open_in_memory(CampusConfig::for_tests()).unwrap()
    }

    fn record(value: Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    fn note(recipient: &str, kind: &str, subject: &str) -> Record {
        record(json!({ "recipient": recipient, "type": kind, "subject": subject, "body": "..." }))
    }

    fn backdate(store: &Store, id: &str, sent_on: &str) {
        store
            .notifications()
            .update(id, &record(json!({ "sent_on": sent_on })))
            .unwrap();
    }

    #[test]
    fn test_create_and_recipient_order() {
        let store = test_store();
        let older = store.notifications().create(&note("S1", "fee", "Fee due")).unwrap();
        let newer = store.notifications().create(&note("S1", "exam", "Exam soon")).unwrap();
        store.notifications().create(&note("S2", "exam", "Exam soon")).unwrap();
        assert_eq!(older["status"], json!("sent"));
        assert!(field_text(&older, "notification_id").starts_with("NOTIF"));

        backdate(&store, &field_text(&older, "notification_id"), "2026-01-01T09:00:00.000Z");
        backdate(&store, &field_text(&newer, "notification_id"), "2026-02-01T09:00:00.000Z");

        let inbox = store.notifications().for_recipient("S1").unwrap();
        let subjects: Vec<String> = inbox.iter().map(|n| field_text(n, "subject")).collect();
        assert_eq!(subjects, ["Exam soon", "Fee due"]);

        let err = store
            .notifications()
            .create(&record(json!({ "recipient": "S1" })))
            .unwrap_err();
        assert_eq!(err.to_string(), "Missing required fields: type, subject, body");
    }

    #[test]
    fn test_mark_read_and_unread_count() {
        let store = test_store();
        let first = store.notifications().create(&note("S1", "fee", "A")).unwrap();
        store.notifications().create(&note("S1", "fee", "B")).unwrap();
        assert_eq!(store.notifications().unread_count("S1").unwrap(), 2);

        let read = store
            .notifications()
            .mark_read(&field_text(&first, "notification_id"))
            .unwrap();
        assert_eq!(read["status"], json!("read"));
        assert_eq!(store.notifications().unread_count("S1").unwrap(), 1);
        assert!(matches!(
            store.notifications().mark_read("NOTIF-missing"),
            Err(CampusError::NotFound { .. })
        ));
    }

    #[test]
    fn test_bulk_collects_failures() {
        let store = test_store();
        let outcome = store
            .notifications()
            .create_bulk(&[
                note("S1", "fee", "A"),
                record(json!({ "recipient": "S2", "type": "fee" })),
                note("S3", "fee", "C"),
            ])
            .unwrap();
        assert_eq!(outcome.created, 2);
        assert_eq!(outcome.errors, 1);
        assert_eq!(
            outcome.failed_notifications[0].error,
            "Missing required fields: subject, body"
        );
    }

    #[test]
    fn test_notify_students() {
        let store = test_store();
        for (id, programme) in [("S1", "CS"), ("S2", "CS"), ("S3", "ME")] {
            store
                .students()
                .create(&record(json!({
                    "student_id": id, "first_name": "A", "last_name": "B",
                    "email": format!("{id}@college.edu"), "programme_id": programme
                })))
                .unwrap();
        }

        let all = store.notifications().notify_all_students("Holiday", "Closed", "").unwrap();
        assert_eq!(all.created, 3);
        assert_eq!(all.notifications[0]["type"], json!("announcement"));

        let cs = store
            .notifications()
            .notify_students(
                &StudentFilter { programme_id: Some("CS".into()), ..StudentFilter::default() },
                "Lab",
                "Moved",
                "academic",
            )
            .unwrap();
        assert_eq!(cs.created, 2);
        assert_eq!(store.notifications().unread_count("S1").unwrap(), 2);
    }

    #[test]
    fn test_cleanup_and_stats() {
        let store = test_store();
        let old_read = store.notifications().create(&note("S1", "fee", "Old read")).unwrap();
        let old_unread = store.notifications().create(&note("S1", "fee", "Old unread")).unwrap();
        store.notifications().create(&note("S2", "exam", "Fresh")).unwrap();

        let old_read_id = field_text(&old_read, "notification_id");
        store.notifications().mark_read(&old_read_id).unwrap();
        backdate(&store, &old_read_id, "2020-01-01T00:00:00.000Z");
        backdate(&store, &field_text(&old_unread, "notification_id"), "2020-01-01T00:00:00.000Z");

        let stats = store.notifications().stats().unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.sent, 2);
        assert_eq!(stats.read, 1);
        assert_eq!(stats.by_type["fee"], 2);
        assert_eq!(stats.recent_activity.len(), 1);
        assert_eq!(stats.recent_activity[0].subject, "Fresh");

        assert_eq!(store.notifications().cleanup(30).unwrap(), 1);
        assert_eq!(store.notifications().stats().unwrap().total, 2);
        let deletes = store
            .audit()
            .logs(&AuditFilter { action: Some("delete".into()), ..AuditFilter::default() })
            .unwrap();
        assert_eq!(deletes.len(), 1);
        assert_eq!(deletes[0].entity_id, old_read_id);
    }
}
