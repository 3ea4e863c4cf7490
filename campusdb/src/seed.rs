//! Bootstrap accounts and sample data for a freshly provisioned store.

use crate::auth::{LoginProfile, NewUser, Role};
use crate::backend::Record;
use crate::error::{CampusError, Result};
use crate::store::Store;
use serde::Serialize;
use serde_json::json;

pub const ADMIN_EMAIL: &str = "admin@college.edu";
pub const ADMIN_PASSWORD: &str = "admin123";

const SAMPLE_PASSWORD: &str = "password";

/// What a seeding run created. Records that already existed are skipped.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SeedReport {
    pub users: Vec<String>,
    pub admissions: Vec<String>,
    pub skipped: usize,
}

/// Create the default administrator unless an account with its email exists.
pub fn bootstrap_admin(store: &Store) -> Result<Option<LoginProfile>> {
    let admin = NewUser {
        display_name: Some("System Administrator".into()),
        ..NewUser::new("admin", ADMIN_EMAIL, ADMIN_PASSWORD, Role::Admin)
    };
    match store.users().create_user(&admin) {
        Ok(profile) => {
            log::info!("Admin user created: {ADMIN_EMAIL}");
            Ok(Some(profile))
        }
        Err(CampusError::Conflict(_)) => {
            log::info!("Admin user already exists");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

/// Sample staff, warden and student accounts plus one admission application.
pub fn seed_sample_data(store: &Store) -> Result<SeedReport> {
    let mut report = SeedReport::default();

    let users = [
        ("staff1", "staff@college.edu", "Staff Member", Role::Staff),
        ("warden1", "warden@college.edu", "Hostel Warden", Role::HostelWarden),
        ("student1", "student@college.edu", "John Doe", Role::Student),
    ];
    for (username, email, display_name, role) in users {
        let user = NewUser {
            display_name: Some(display_name.into()),
            ..NewUser::new(username, email, SAMPLE_PASSWORD, role)
        };
        match store.users().create_user(&user) {
            Ok(profile) => {
                log::info!("Sample user created: {username}");
                report.users.push(profile.user_id);
            }
            Err(CampusError::Conflict(_)) => report.skipped += 1,
            Err(e) => return Err(e),
        }
    }

    let admission: Record = [
        ("first_name", "Jane"),
        ("last_name", "Smith"),
        ("email", "jane.smith@example.com"),
        ("phone", "+1234567890"),
        ("programme_applied", "Computer Science"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), json!(v)))
    .collect();
    match store.admissions().create(&admission) {
        Ok(created) => {
            log::info!("Sample admission created");
            report
                .admissions
                .push(crate::util::field_text(&created, "admission_id"));
        }
        Err(CampusError::Conflict(_)) => report.skipped += 1,
        Err(e) => return Err(e),
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CampusConfig;

    fn test_store() -> Store {
        Store::open_in_memory(CampusConfig::for_tests()).unwrap()
    }

    #[test]
    fn test_bootstrap_admin_is_idempotent() {
        let store = test_store();
        let admin = bootstrap_admin(&store).unwrap().unwrap();
        assert_eq!(admin.role, "admin");
        assert_eq!(admin.display_name, "System Administrator");
        assert!(bootstrap_admin(&store).unwrap().is_none());

        let profile = store.users().login(ADMIN_EMAIL, ADMIN_PASSWORD).unwrap();
        assert_eq!(profile.user_id, admin.user_id);
    }

    #[test]
    fn test_seed_sample_data() {
        let store = test_store();
        let first = seed_sample_data(&store).unwrap();
        assert_eq!(first.users.len(), 3);
        assert_eq!(first.admissions.len(), 1);
        assert_eq!(first.skipped, 0);

        let again = seed_sample_data(&store).unwrap();
        assert!(again.users.is_empty());
        assert_eq!(again.skipped, 4);

        let warden = store.users().login("warden@college.edu", "password").unwrap();
        assert_eq!(warden.role, "hostel_warden");
    }
}
