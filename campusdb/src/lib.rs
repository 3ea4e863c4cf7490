pub mod audit;
pub mod auth;
pub mod backend;
pub mod config;
pub mod error;
pub mod response;
pub mod schema;
pub mod seed;
pub mod services;
pub mod store;
pub mod util;
pub mod validation;

pub use audit::{AuditEntry, AuditFilter, AuditTrail};
pub use auth::{LoginProfile, NewUser, Role, UserFilter, UserProfile, Users};
pub use backend::{MemoryBackend, Record, SqliteBackend, TableStore};
pub use config::CampusConfig;
pub use error::{CampusError, Result};
pub use schema::SchemaDefinition;
pub use store::{Collection, Store, Tx};
