use super::filter_record;
use crate::backend::Record;
use crate::error::{CampusError, Result};
use crate::schema::{BORROW_HISTORY, LIBRARY_ITEMS, STUDENTS};
use crate::store::{Store, Tx};
use crate::util::{cell_number, cell_timestamp, field_text, is_blank, to_iso};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ItemFilter {
    pub status: Option<String>,
    pub author: Option<String>,
}

/// Outcome of returning an item.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Returned {
    pub item: Record,
    /// The closed borrow record, when one was open.
    pub history: Option<Record>,
    pub fine: f64,
}

pub struct Library<'a> {
    store: &'a Store,
}

impl Store {
    pub fn library(&self) -> Library<'_> {
        Library { store: self }
    }
}

impl<'a> Library<'a> {
    pub fn items(&self, filter: &ItemFilter) -> Result<Vec<Record>> {
        let filters = filter_record(&[("status", &filter.status), ("author", &filter.author)]);
        self.store.read(|tx| tx.list_entities(LIBRARY_ITEMS, &filters))
    }

    pub fn get(&self, item_id: &str) -> Result<Record> {
        self.store.read(|tx| tx.get_entity(LIBRARY_ITEMS, item_id))
    }

    /// Catalogue a new item. It starts on the shelf with no fines.
    pub fn create(&self, data: &Record) -> Result<Record> {
        self.store.transaction(|tx| {
            let mut data = data.clone();
            data.insert("status".into(), json!("available"));
            data.insert("fines".into(), json!(0));
            data.insert("borrower_id".into(), json!(""));
            data.insert("due_date".into(), json!(""));
            tx.create_entity(LIBRARY_ITEMS, data)
        })
    }

    pub fn update(&self, item_id: &str, patch: &Record) -> Result<Record> {
        self.store
            .transaction(|tx| tx.update_entity(LIBRARY_ITEMS, item_id, patch))
    }

    /// Soft delete: the item is marked `withdrawn`.
    pub fn withdraw(&self, item_id: &str) -> Result<()> {
        self.store
            .transaction(|tx| tx.delete_entity(LIBRARY_ITEMS, item_id))
    }

    /// Lend an available item for `days` (the configured loan period when
    /// `None`). Records a BorrowHistory row.
    pub fn borrow(&self, item_id: &str, student_id: &str, days: Option<i64>) -> Result<Record> {
        self.store.transaction(|tx| {
            let item = tx.get_entity(LIBRARY_ITEMS, item_id)?;
            if field_text(&item, "status") != "available" {
                return Err(CampusError::Conflict(
                    "Item is not available for borrowing".into(),
                ));
            }
            tx.require_entity(STUDENTS, student_id)?;

            let due = due_date(days.unwrap_or(tx.config().library.loan_days))?;

            let mut patch = Record::new();
            patch.insert("status".into(), json!("borrowed"));
            patch.insert("borrower_id".into(), json!(student_id));
            patch.insert("due_date".into(), json!(to_iso(due)));
            let item = tx.update_entity_as(LIBRARY_ITEMS, item_id, &patch, "borrow")?;

            let mut history = Record::new();
            history.insert("item_id".into(), json!(item_id));
            history.insert("student_id".into(), json!(student_id));
            tx.create_entity(BORROW_HISTORY, history)?;

            log::info!("Item {item_id} lent to {student_id} until {}", to_iso(due));
            Ok(item)
        })
    }

    /// Take a borrowed item back. Every whole day past the due date costs the
    /// configured daily fine, added to the item's running total.
    pub fn return_item(&self, item_id: &str) -> Result<Returned> {
        self.store.transaction(|tx| {
            let item = tx.get_entity(LIBRARY_ITEMS, item_id)?;
            if field_text(&item, "status") != "borrowed" {
                return Err(CampusError::Conflict("Item is not currently borrowed".into()));
            }

            let now = Utc::now();
            let overdue_days = cell_timestamp(item.get("due_date"))
                .map(|due| (now - due).num_days().max(0))
                .unwrap_or(0);
            let fine = overdue_days as f64 * tx.config().library.fine_per_day;
            let fines = cell_number(item.get("fines")).unwrap_or(0.0) + fine;

            let mut patch = Record::new();
            patch.insert("status".into(), json!("available"));
            patch.insert("borrower_id".into(), json!(""));
            patch.insert("due_date".into(), json!(""));
            patch.insert("fines".into(), json!(fines));
            let item = tx.update_entity_as(LIBRARY_ITEMS, item_id, &patch, "return")?;

            let history = close_history(tx, item_id, fine)?;
            if fine > 0.0 {
                log::info!("Item {item_id} returned {overdue_days} day(s) late, fine {fine}");
            }
            Ok(Returned { item, history, fine })
        })
    }

    /// Borrow records, optionally for one student only.
    pub fn borrow_history(&self, student_id: Option<&str>) -> Result<Vec<Record>> {
        let filter = student_id.map(str::to_string);
        let filters = filter_record(&[("student_id", &filter)]);
        self.store
            .read(|tx| tx.list_entities(BORROW_HISTORY, &filters))
    }

    /// Borrowed items whose due date has passed.
    pub fn overdue(&self) -> Result<Vec<Record>> {
        let now = Utc::now();
        self.store.read(|tx| {
            Ok(tx
                .records(LIBRARY_ITEMS)?
                .into_iter()
                .filter(|item| field_text(item, "status") == "borrowed")
                .filter(|item| cell_timestamp(item.get("due_date")).map_or(false, |due| due < now))
                .collect())
        })
    }
}

fn due_date(days: i64) -> Result<DateTime<Utc>> {
    let invalid = || {
        CampusError::Validation(format!(
            "Invalid loan period '{days}' (expected a positive number of days)"
        ))
    };
    if days <= 0 {
        return Err(invalid());
    }
    Duration::try_days(days)
        .and_then(|period| Utc::now().checked_add_signed(period))
        .ok_or_else(invalid)
}

/// Stamp the item's open borrow record with the return time and fine.
fn close_history(tx: &mut Tx<'_>, item_id: &str, fine: f64) -> Result<Option<Record>> {
    let open = tx
        .scan(BORROW_HISTORY)?
        .into_iter()
        .rev()
        .find(|h| field_text(&h.record, "item_id") == item_id && is_blank(h.record.get("returned_on")));
    let Some(open) = open else {
        log::warn!("No open borrow record for item {item_id}");
        return Ok(None);
    };

    let mut patch = Record::new();
    patch.insert("returned_on".into(), json!(tx.now()));
    patch.insert("fine_amount".into(), json!(fine));
    tx.set_cells(BORROW_HISTORY, open.row, &patch)?;
    let borrow_id = field_text(&open.record, "borrow_id");
    Ok(Some(tx.get_entity(BORROW_HISTORY, &borrow_id)?))
}
