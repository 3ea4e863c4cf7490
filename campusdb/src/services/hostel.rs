use super::{default_field, filter_record};
use crate::backend::{Record, StoredRow};
use crate::error::{CampusError, Result};
use crate::schema::{HOSTEL_ALLOCATIONS, HOSTEL_ROOMS, STUDENTS};
use crate::store::{Store, Tx};
use crate::util::{field_text, loose_eq, round1};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RoomFilter {
    pub hostel: Option<String>,
    pub status: Option<String>,
    pub floor: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AllocationFilter {
    pub student_id: Option<String>,
    pub room_id: Option<String>,
    pub status: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BlockStats {
    pub total: usize,
    pub available: usize,
    pub occupied: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HostelStats {
    pub total_rooms: usize,
    pub available_rooms: usize,
    pub occupied_rooms: usize,
    pub total_allocations: usize,
    pub active_allocations: usize,
    /// Percentage of rooms occupied, one decimal place.
    pub occupancy_rate: f64,
    pub by_hostel: BTreeMap<String, BlockStats>,
    pub by_block: BTreeMap<String, BlockStats>,
}

/// Hostel rooms and student allocations.
pub struct Hostel<'a> {
    store: &'a Store,
}

impl Store {
    pub fn hostel(&self) -> Hostel<'_> {
        Hostel { store: self }
    }
}

impl<'a> Hostel<'a> {
    pub fn rooms(&self, filter: &RoomFilter) -> Result<Vec<Record>> {
        let filters = filter_record(&[
            ("hostel", &filter.hostel),
            ("status", &filter.status),
            ("floor", &filter.floor),
        ]);
        self.store.read(|tx| tx.list_entities(HOSTEL_ROOMS, &filters))
    }

    pub fn room(&self, room_id: &str) -> Result<Record> {
        self.store.read(|tx| tx.get_entity(HOSTEL_ROOMS, room_id))
    }

    /// Add a room. New rooms are always `available` and unoccupied.
    pub fn create_room(&self, data: &Record) -> Result<Record> {
        self.store.transaction(|tx| {
            let mut data = data.clone();
            data.insert("status".into(), json!("available"));
            for cleared in ["current_student_id", "allocated_on", "released_on"] {
                data.insert(cleared.into(), json!(""));
            }
            tx.create_entity(HOSTEL_ROOMS, data)
        })
    }

    pub fn update_room(&self, room_id: &str, patch: &Record) -> Result<Record> {
        self.store
            .transaction(|tx| tx.update_entity(HOSTEL_ROOMS, room_id, patch))
    }

    /// Allocate an available room to a student without an active allocation.
    /// `details` may carry `allocated_by` and `reason`.
    pub fn allocate(&self, student_id: &str, room_id: &str, details: &Record) -> Result<Record> {
        self.store.transaction(|tx| {
            let room = tx.require_entity(HOSTEL_ROOMS, room_id)?;
            if field_text(&room.record, "status") != "available" {
                return Err(CampusError::Conflict(
                    "Room is not available for allocation".into(),
                ));
            }
            if active_allocation(tx, student_id)?.is_some() {
                return Err(CampusError::Conflict(
                    "Student already has a room allocation".into(),
                ));
            }

            let mut allocation = Record::new();
            for key in ["allocated_by", "reason"] {
                if let Some(value) = details.get(key) {
                    allocation.insert(key.into(), value.clone());
                }
            }
            allocation.insert("student_id".into(), json!(student_id));
            allocation.insert("room_id".into(), json!(room_id));
            allocation.insert("status".into(), json!("active"));
            default_field(&mut allocation, "released_on", json!(""));
            let allocation = tx.create_entity(HOSTEL_ALLOCATIONS, allocation)?;
            let alloc_id = field_text(&allocation, "alloc_id");

            let now = tx.now();
            let mut patch = Record::new();
            patch.insert("current_student_id".into(), json!(student_id));
            patch.insert("status".into(), json!("occupied"));
            patch.insert("allocated_on".into(), json!(now));
            patch.insert("updated_at".into(), json!(now));
            tx.set_cells(HOSTEL_ROOMS, room.row, &patch)?;

            link_student(tx, student_id, &alloc_id)?;
            log::info!("Allocated room {room_id} to student {student_id}");
            Ok(allocation)
        })
    }

    /// Release the student's active allocation and free the room.
    pub fn deallocate(&self, student_id: &str, reason: &str) -> Result<()> {
        self.store.transaction(|tx| {
            let allocation = active_allocation(tx, student_id)?.ok_or_else(|| {
                CampusError::not_found("Active room allocation")
            })?;
            let alloc_id = field_text(&allocation.record, "alloc_id");
            let room_id = field_text(&allocation.record, "room_id");
            let now = tx.now();

            let mut patch = Record::new();
            patch.insert("released_on".into(), json!(now));
            patch.insert(
                "reason".into(),
                json!(if reason.is_empty() { "Deallocated" } else { reason }),
            );
            patch.insert("status".into(), json!("inactive"));
            patch.insert("updated_at".into(), json!(now));
            tx.set_cells(HOSTEL_ALLOCATIONS, allocation.row, &patch)?;

            if let Some(room) = tx.find_entity(HOSTEL_ROOMS, &room_id)? {
                let mut room_patch = Record::new();
                room_patch.insert("current_student_id".into(), json!(""));
                room_patch.insert("status".into(), json!("available"));
                room_patch.insert("released_on".into(), json!(now));
                room_patch.insert("updated_at".into(), json!(now));
                tx.set_cells(HOSTEL_ROOMS, room.row, &room_patch)?;
            }
            link_student(tx, student_id, "")?;

            let after = tx.get_entity(HOSTEL_ALLOCATIONS, &alloc_id)?;
            tx.audit(
                HOSTEL_ALLOCATIONS,
                &alloc_id,
                "deallocate",
                Some(&allocation.record),
                Some(&after),
            )
        })
    }

    /// The student's active allocation, if any.
    pub fn student_allocation(&self, student_id: &str) -> Result<Option<Record>> {
        self.store
            .read(|tx| Ok(active_allocation(tx, student_id)?.map(|a| a.record)))
    }

    pub fn allocations(&self, filter: &AllocationFilter) -> Result<Vec<Record>> {
        let filters = filter_record(&[
            ("student_id", &filter.student_id),
            ("room_id", &filter.room_id),
            ("status", &filter.status),
        ]);
        self.store
            .read(|tx| tx.list_entities(HOSTEL_ALLOCATIONS, &filters))
    }

    pub fn stats(&self) -> Result<HostelStats> {
        self.store.read(hostel_stats)
    }
}

fn active_allocation(tx: &Tx<'_>, student_id: &str) -> Result<Option<StoredRow>> {
    Ok(tx.scan(HOSTEL_ALLOCATIONS)?.into_iter().find(|a| {
        a.record
            .get("student_id")
            .map_or(false, |s| loose_eq(s, &json!(student_id)))
            && field_text(&a.record, "status") == "active"
    }))
}

/// Point the student's `hostel_alloc_id` at an allocation; unknown students are skipped.
fn link_student(tx: &mut Tx<'_>, student_id: &str, alloc_id: &str) -> Result<()> {
    if let Some(student) = tx.find_entity(STUDENTS, student_id)? {
        let mut patch = Record::new();
        patch.insert("hostel_alloc_id".into(), json!(alloc_id));
        tx.set_cells(STUDENTS, student.row, &patch)?;
    }
    Ok(())
}

pub(crate) fn hostel_stats(tx: &Tx<'_>) -> Result<HostelStats> {
    let rooms = tx.records(HOSTEL_ROOMS)?;
    let allocations = tx.records(HOSTEL_ALLOCATIONS)?;

    let mut stats = HostelStats {
        total_rooms: rooms.len(),
        total_allocations: allocations.len(),
        ..HostelStats::default()
    };

    for room in &rooms {
        let status = field_text(room, "status");
        let available = status == "available";
        let occupied = status == "occupied";
        if available {
            stats.available_rooms += 1;
        } else if occupied {
            stats.occupied_rooms += 1;
        }

        for (key, groups) in [
            (field_text(room, "hostel"), &mut stats.by_hostel),
            (field_text(room, "block"), &mut stats.by_block),
        ] {
            let key = if key.is_empty() { "Unknown".to_string() } else { key };
            let group = groups.entry(key).or_default();
            group.total += 1;
            group.available += usize::from(available);
            group.occupied += usize::from(occupied);
        }
    }

    stats.active_allocations = allocations
        .iter()
        .filter(|a| field_text(a, "status") == "active")
        .count();
    if stats.total_rooms > 0 {
        stats.occupancy_rate =
            round1(stats.occupied_rooms as f64 / stats.total_rooms as f64 * 100.0);
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

    fn room(id: &str, hostel: &str, block: &str) -> Record {
        record(json!({
            "room_id": id, "hostel": hostel, "block": block, "floor": 1, "room_no": id,
            "status": "occupied"
        }))
    }

    fn setup() -> Store {
        let store = test_store();
        store.hostel().create_room(&room("R101", "Ganga", "A")).unwrap();
        store.hostel().create_room(&room("R102", "Ganga", "B")).unwrap();
        store.hostel().create_room(&room("R201", "Yamuna", "A")).unwrap();
        store
            .students()
            .create(&record(json!({
                "student_id": "S1", "first_name": "Tara", "last_name": "Sen",
                "email": "tara@college.edu"
            })))
            .unwrap();
        store
    }

    #[test]
    fn test_create_room_defaults() {
        let store = setup();
        let created = store.hostel().room("R101").unwrap();
        assert_eq!(created["status"], json!("available"));
        assert_eq!(created["capacity"], json!(1));
        assert_eq!(created["rent_per_month"], json!(0));
        let floor_one = store
            .hostel()
            .rooms(&RoomFilter { floor: Some("1".into()), ..RoomFilter::default() })
            .unwrap();
        assert_eq!(floor_one.len(), 3);
    }

    #[test]
    fn test_allocate_and_deallocate() {
        let store = setup();
        let allocation = store
            .hostel()
            .allocate("S1", "R101", &record(json!({ "allocated_by": "USR7" })))
            .unwrap();
        let alloc_id = allocation["alloc_id"].as_str().unwrap().to_string();
        assert!(alloc_id.starts_with("ALLOC"));
        assert_eq!(allocation["reason"], json!("Regular allocation"));
        assert_eq!(allocation["allocated_by"], json!("USR7"));

        let room = store.hostel().room("R101").unwrap();
        assert_eq!(room["status"], json!("occupied"));
        assert_eq!(room["current_student_id"], json!("S1"));
        assert_eq!(store.students().get("S1").unwrap()["hostel_alloc_id"], json!(alloc_id));

        let err = store.hostel().allocate("S1", "R102", &Record::new()).unwrap_err();
        assert_eq!(err.to_string(), "Student already has a room allocation");
        let err = store.hostel().allocate("S2", "R101", &Record::new()).unwrap_err();
        assert_eq!(err.to_string(), "Room is not available for allocation");
        assert!(matches!(
            store.hostel().allocate("S2", "R999", &Record::new()),
            Err(CampusError::NotFound { .. })
        ));

        store.hostel().deallocate("S1", "").unwrap();
        assert!(store.hostel().student_allocation("S1").unwrap().is_none());
        let room = store.hostel().room("R101").unwrap();
        assert_eq!(room["status"], json!("available"));
        assert_eq!(room["current_student_id"], json!(""));
        assert_eq!(store.students().get("S1").unwrap()["hostel_alloc_id"], json!(""));

        let released = store
            .hostel()
            .allocations(&AllocationFilter { student_id: Some("S1".into()), ..AllocationFilter::default() })
            .unwrap();
        assert_eq!(released[0]["status"], json!("inactive"));
        assert_eq!(released[0]["reason"], json!("Deallocated"));

        let logs = store
            .audit()
            .logs(&AuditFilter { action: Some("deallocate".into()), ..AuditFilter::default() })
            .unwrap();
        assert_eq!(logs.len(), 1);
        assert!(logs[0].diff.contains("status: active -> inactive"));

        assert!(matches!(
            store.hostel().deallocate("S1", "again"),
            Err(CampusError::NotFound { .. })
        ));
    }

    #[test]
    fn test_stats() {
        let store = setup();
        store.hostel().allocate("S1", "R101", &Record::new()).unwrap();
        store
            .hostel()
            .update_room("R201", &record(json!({ "status": "maintenance" })))
            .unwrap();

        let stats = store.hostel().stats().unwrap();
        assert_eq!(stats.total_rooms, 3);
        assert_eq!(stats.occupied_rooms, 1);
        assert_eq!(stats.available_rooms, 1);
        assert_eq!(stats.active_allocations, 1);
        assert_eq!(stats.occupancy_rate, 33.3);
        assert_eq!(stats.by_hostel["Ganga"], BlockStats { total: 2, available: 1, occupied: 1 });
        assert_eq!(stats.by_block["A"], BlockStats { total: 2, available: 0, occupied: 1 });
    }

    #[test]
    fn test_invalid_room_status_rejected() {
        let store = setup();
        assert!(matches!(
            store.hostel().update_room("R101", &record(json!({ "status": "haunted" }))),
            Err(CampusError::Validation(_))
        ));
    }
}
