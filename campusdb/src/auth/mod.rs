//! Users and credentials: session-less login, account management and
//! password changes over the `Users` table.

mod password;

pub use password::{legacy_sha256_hex, PasswordHasher};

use crate::backend::Record;
use crate::error::{CampusError, Result};
use crate::schema::USERS;
use crate::store::Store;
use crate::util::{cell_text, field_text, is_blank, is_truthy};
use crate::validation;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Staff,
    Student,
    HostelWarden,
}

impl Role {
    pub const ALL: [Role; 4] = [Role::Admin, Role::Staff, Role::Student, Role::HostelWarden];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Staff => "staff",
            Role::Student => "student",
            Role::HostelWarden => "hostel_warden",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = CampusError;

    fn from_str(s: &str) -> Result<Self> {
        Role::ALL
            .into_iter()
            .find(|r| r.as_str() == s)
            .ok_or_else(|| {
                let allowed: Vec<&str> = Role::ALL.iter().map(Role::as_str).collect();
                CampusError::Validation(format!(
                    "Invalid role '{s}' (expected one of: {})",
                    allowed.join(", ")
                ))
            })
    }
}

/// What a successful login or account creation hands back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoginProfile {
    pub user_id: String,
    pub username: String,
    pub email: String,
    pub display_name: String,
    pub role: String,
}

impl LoginProfile {
    fn from_record(record: &Record) -> Self {
        LoginProfile {
            user_id: field_text(record, "user_id"),
            username: field_text(record, "username"),
            email: field_text(record, "email"),
            display_name: field_text(record, "display_name"),
            role: field_text(record, "role"),
        }
    }
}

/// A user row without its password hash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: String,
    pub username: String,
    pub email: String,
    pub display_name: String,
    pub role: String,
    pub auth_provider: String,
    pub last_login: String,
    pub active: bool,
    pub created_at: String,
    pub updated_at: String,
    pub notes: String,
}

impl UserProfile {
    fn from_record(record: &Record) -> Self {
        UserProfile {
            user_id: field_text(record, "user_id"),
            username: field_text(record, "username"),
            email: field_text(record, "email"),
            display_name: field_text(record, "display_name"),
            role: field_text(record, "role"),
            auth_provider: field_text(record, "auth_provider"),
            last_login: field_text(record, "last_login"),
            active: is_truthy(record.get("active")),
            created_at: field_text(record, "created_at"),
            updated_at: field_text(record, "updated_at"),
            notes: field_text(record, "notes"),
        }
    }
}

/// Input for [`Users::create_user`]. Blank strings count as missing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password: String,
    pub role: String,
    pub display_name: Option<String>,
    pub notes: Option<String>,
}

impl NewUser {
    pub fn new(username: &str, email: &str, password: &str, role: Role) -> Self {
        NewUser {
            username: username.to_string(),
            email: email.to_string(),
            password: password.to_string(),
            role: role.as_str().to_string(),
            ..NewUser::default()
        }
    }

    fn to_record(&self) -> Record {
        let mut data = Record::new();
        data.insert("username".into(), json!(self.username));
        data.insert("email".into(), json!(self.email));
        data.insert("password".into(), json!(self.password));
        data.insert("role".into(), json!(self.role));
        let display_name = self
            .display_name
            .as_deref()
            .filter(|d| !d.is_empty())
            .unwrap_or(&self.username);
        data.insert("display_name".into(), json!(display_name));
        data.insert("notes".into(), json!(self.notes.clone().unwrap_or_default()));
        data
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UserFilter {
    pub role: Option<String>,
    pub active: Option<bool>,
}

/// User accounts and credentials.
pub struct Users<'a> {
    store: &'a Store,
}

impl Store {
    pub fn users(&self) -> Users<'_> {
        Users { store: self }
    }
}

/// A password that matched the stored hash of an active user.
struct Verified {
    user_id: String,
    hashed: String,
}

impl<'a> Users<'a> {
    fn hasher(&self) -> PasswordHasher {
        PasswordHasher::new(self.store.config().auth.bcrypt_cost)
    }

    /// Authenticate by email and password. The first row with the email decides.
    /// Hashing runs outside the store lock.
    pub fn login(&self, email: &str, password: &str) -> Result<LoginProfile> {
        let hasher = self.hasher();
        let stored = self.store.read(|tx| {
            tx.find(USERS, "email", &json!(email))?
                .map(|s| s.record)
                .ok_or_else(|| CampusError::not_found("User"))
        })?;
        let verified = check_login(&hasher, &stored, password)?;

        let upgraded = if self.store.config().auth.upgrade_legacy_hashes
            && hasher.needs_upgrade(&verified.hashed)
        {
            Some(hasher.hash(password)?)
        } else {
            None
        };

        self.store.transaction(|tx| {
            let current = tx
                .find(USERS, "email", &json!(email))?
                .ok_or_else(|| CampusError::not_found("User"))?;
            let rechecked;
            let verified = if field_text(&current.record, "user_id") == verified.user_id
                && field_text(&current.record, "hashed_password") == verified.hashed
            {
                if !is_truthy(current.record.get("active")) {
                    return Err(CampusError::Inactive);
                }
                &verified
            } else {
                rechecked = check_login(&hasher, &current.record, password)?;
                &rechecked
            };
            let user_id = verified.user_id.clone();

            let mut patch = Record::new();
            patch.insert("last_login".into(), json!(tx.now()));
            let upgrade = upgraded
                .as_ref()
                .filter(|_| hasher.needs_upgrade(&verified.hashed));
            if let Some(hashed) = upgrade {
                patch.insert("hashed_password".into(), json!(hashed));
                log::info!("Upgraded legacy password hash for user {user_id}");
            }
            tx.set_cells(USERS, current.row, &patch)?;

            let mut audit = Record::new();
            audit.insert("user_id".into(), json!(user_id));
            tx.audit(USERS, &user_id, "login", None, Some(&audit))?;

            Ok(LoginProfile::from_record(&current.record))
        })
    }

    pub fn create_user(&self, user: &NewUser) -> Result<LoginProfile> {
        let mut data = user.to_record();
        let def = self.store.schema().require(USERS)?;
        let check = validation::validate_record(def, &data);
        if let Some(message) = check.message() {
            return Err(CampusError::Validation(message));
        }
        let hashed = self.hasher().hash(&user.password)?;
        data.insert("hashed_password".into(), Value::String(hashed));

        self.store.transaction(|tx| {
            if tx.find(USERS, "email", &json!(user.email))?.is_some() {
                return Err(CampusError::Conflict(
                    "User with this email already exists".into(),
                ));
            }
            let created = tx.create_entity(USERS, data)?;
            log::info!(
                "Created user {} with role {}",
                field_text(&created, "user_id"),
                user.role
            );
            Ok(LoginProfile::from_record(&created))
        })
    }

    pub fn get_user(&self, user_id: &str) -> Result<UserProfile> {
        self.store
            .read(|tx| Ok(UserProfile::from_record(&tx.get_entity(USERS, user_id)?)))
    }

    /// Shallow-merge `patch` into the user. A `password` key is hashed into
    /// `hashed_password` and never stored itself; the hash cannot be set directly.
    pub fn update_user(&self, user_id: &str, patch: &Record) -> Result<UserProfile> {
        let mut patch = patch.clone();
        patch.remove("hashed_password");
        if let Some(password) = patch.remove("password") {
            if !is_blank(Some(&password)) {
                let hashed = self.hasher().hash(&cell_text(&password))?;
                patch.insert("hashed_password".into(), json!(hashed));
            }
        }

        self.store.transaction(|tx| {
            let updated = tx.update_entity(USERS, user_id, &patch)?;
            Ok(UserProfile::from_record(&updated))
        })
    }

    /// Soft delete: the account stays but can no longer log in.
    pub fn delete_user(&self, user_id: &str) -> Result<()> {
        self.store.transaction(|tx| tx.delete_entity(USERS, user_id))
    }

    pub fn change_password(&self, user_id: &str, old: &str, new: &str) -> Result<()> {
        let hasher = self.hasher();
        let current = self
            .store
            .read(|tx| Ok(field_text(&tx.get_entity(USERS, user_id)?, "hashed_password")))?;
        if !hasher.verify(old, &current)? {
            return Err(incorrect_password());
        }
        if new.is_empty() {
            return Err(CampusError::Validation(
                validation::missing_fields_message(&["new_password".to_string()]),
            ));
        }
        let hashed = hasher.hash(new)?;

        self.store.transaction(|tx| {
            let stored = tx.require_entity(USERS, user_id)?;
            let latest = field_text(&stored.record, "hashed_password");
            if latest != current && !hasher.verify(old, &latest)? {
                return Err(incorrect_password());
            }

            let mut patch = Record::new();
            patch.insert("hashed_password".into(), json!(hashed));
            patch.insert("updated_at".into(), json!(tx.now()));
            tx.set_cells(USERS, stored.row, &patch)?;

            let mut audit = Record::new();
            audit.insert("user_id".into(), json!(user_id));
            tx.audit(USERS, user_id, "password_change", None, Some(&audit))
        })
    }

    pub fn get_all_users(&self, filter: &UserFilter) -> Result<Vec<UserProfile>> {
        self.store.read(|tx| {
            Ok(tx
                .records(USERS)?
                .iter()
                .map(UserProfile::from_record)
                .filter(|user| {
                    filter
                        .role
                        .as_deref()
                        .map_or(true, |role| role.is_empty() || user.role == role)
                        && filter.active.map_or(true, |active| user.active == active)
                })
                .collect())
        })
    }
}

fn check_login(hasher: &PasswordHasher, record: &Record, password: &str) -> Result<Verified> {
    let user_id = field_text(record, "user_id");
    if !is_truthy(record.get("active")) {
        log::info!("Login refused for inactive user {user_id}");
        return Err(CampusError::Inactive);
    }
    let hashed = field_text(record, "hashed_password");
    if !hasher.verify(password, &hashed)? {
        log::warn!("Failed login for user {user_id}");
        return Err(CampusError::InvalidCredential("Invalid password".into()));
    }
    Ok(Verified { user_id, hashed })
}

fn incorrect_password() -> CampusError {
    CampusError::InvalidCredential("Current password is incorrect".into())
}
