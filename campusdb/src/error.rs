use thiserror::Error;

#[derive(Error, Debug)]
pub enum CampusError {
    #[error("{entity} not found")]
    NotFound { entity: String },

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    InvalidCredential(String),

    #[error("Account is inactive")]
    Inactive,

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Password hashing error: {0}")]
    PasswordHash(#[from] bcrypt::BcryptError),

    #[error("{0}")]
    Other(String),
}

impl CampusError {
    /// A missing table, reported the way a missing sheet was: `"Users sheet not found"`.
    pub fn table_not_found(table: &str) -> Self {
        CampusError::NotFound {
            entity: format!("{table} sheet"),
        }
    }

    pub fn not_found(entity: impl Into<String>) -> Self {
        CampusError::NotFound {
            entity: entity.into(),
        }
    }

    /// Whether this error belongs to the domain taxonomy (as opposed to an
    /// infrastructure failure whose message should not reach API callers).
    pub fn is_domain(&self) -> bool {
        matches!(
            self,
            CampusError::NotFound { .. }
                | CampusError::Validation(_)
                | CampusError::Conflict(_)
                | CampusError::InvalidCredential(_)
                | CampusError::Inactive
        )
    }
}

pub type Result<T> = std::result::Result<T, CampusError>;
